//! Down-mixing and resampling to the canonical signal form.
//!
//! Every pipeline stage downstream of this module assumes mono audio at
//! [`SAMPLE_RATE`] (22,050 Hz). Stereo sources are down-mixed by averaging
//! the two channels; rate conversion is linear interpolation between source
//! samples. Both operations are cheap compared to the FFT work that follows,
//! so no windowed-sinc machinery is used here.

use crate::error::{Error, Result};
use crate::SAMPLE_RATE;

/// Average interleaved stereo pairs into a mono buffer.
///
/// `out[i] = 0.5 * (in[2i] + in[2i+1])`. A trailing unpaired sample is
/// dropped.
pub fn downmix_stereo(samples: &[f64]) -> Vec<f64> {
    samples
        .chunks_exact(2)
        .map(|pair| 0.5 * (pair[0] + pair[1]))
        .collect()
}

/// Linearly resample `input` from `from_rate` to `to_rate`.
///
/// Output length is `floor(len / ratio)` where `ratio = from_rate / to_rate`.
/// When the source and target rates are equal the input is returned
/// unchanged, bit for bit.
pub fn resample(input: Vec<f64>, from_rate: u32, to_rate: u32) -> Result<Vec<f64>> {
    if input.is_empty() {
        return Err(Error::InvalidAudio);
    }
    if from_rate == to_rate {
        return Ok(input);
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (input.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let s = i as f64 * ratio;
        let index = s as usize;

        if index < input.len() - 1 {
            let fraction = s - index as f64;
            output.push(input[index] * (1.0 - fraction) + input[index + 1] * fraction);
        } else if index < input.len() {
            // Last valid source sample: nothing ahead to interpolate toward.
            output.push(input[index]);
        }
    }

    Ok(output)
}

/// Reduce a decoded buffer to the canonical form: mono, 22,050 Hz.
///
/// `channels` must be 1 or 2; sources with more channels are folded to mono
/// at decode time before they reach this function.
pub fn canonicalize(samples: Vec<f64>, sample_rate: u32, channels: u16) -> Result<Vec<f64>> {
    if samples.is_empty() {
        return Err(Error::InvalidAudio);
    }

    let mono = match channels {
        1 => samples,
        2 => downmix_stereo(&samples),
        n => {
            return Err(Error::DecodeFailed(format!(
                "expected mono or stereo input, got {} channels",
                n
            )))
        }
    };

    resample(mono, sample_rate, SAMPLE_RATE)
}
