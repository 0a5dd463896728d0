//! NCO frequency tuning.

use crate::error::{DdcError, DdcResult};

/// Width of the NCO phase accumulator in bits.
pub const FREQ_WORD_BITS: i32 = 32;

/// A requested frequency shift mapped onto the NCO.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    /// Frequency the NCO actually produces, in Hz.
    pub actual_freq: f64,
    /// Phase increment, two's complement.
    pub freq_word: i32,
}

/// Fold `freq` into the first Nyquist zone `[-rate/2, rate/2]`.
pub fn wrap_frequency(freq: f64, rate: f64) -> f64 {
    let wrapped = freq % rate;
    if wrapped.abs() > rate / 2.0 {
        wrapped - wrapped.signum() * rate
    } else {
        wrapped
    }
}

/// Phase increment for shifting by `requested_freq` at `input_rate`, and the
/// frequency that increment really yields.
pub fn tune(requested_freq: f64, input_rate: f64) -> DdcResult<Tuning> {
    if !input_rate.is_finite() || input_rate <= 0.0 {
        return Err(DdcError::InvalidArgument(format!(
            "input rate must be positive, got {}",
            input_rate
        )));
    }
    if !requested_freq.is_finite() {
        return Err(DdcError::InvalidArgument(format!(
            "frequency must be finite, got {}",
            requested_freq
        )));
    }
    let scale = 2f64.powi(FREQ_WORD_BITS);
    let freq = wrap_frequency(requested_freq, input_rate);
    // +rate/2 rounds to 2^31, which wraps to the same phase as -rate/2
    let freq_word = (freq / input_rate * scale).round() as i64 as i32;
    Ok(Tuning {
        actual_freq: f64::from(freq_word) / scale * input_rate,
        freq_word,
    })
}
