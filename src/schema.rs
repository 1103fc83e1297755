// Hand-maintained: the tables are created with raw SQL in db.rs and this
// file must mirror them exactly.

diesel::table! {
    hash_table (hash, song_id) {
        hash -> BigInt,
        offset -> Double,
        song_id -> Text,
    }
}

diesel::table! {
    song_info (song_id) {
        song_id -> Text,
        artist -> Text,
        album -> Text,
        title -> Text,
    }
}

diesel::table! {
    catalog_meta (key) {
        key -> Text,
        value -> Text,
    }
}
