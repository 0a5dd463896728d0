//! Gain compensation for the CIC + DDS chain.
//!
//! The CIC introduces a gain of `cic^4` which the hardware partially removes
//! with a power-of-two shift. What remains, together with the DDS gain, is
//! corrected by a fixed-point scaling word. The quantization error of that
//! word is kept per channel as the residual scaling so the host can report
//! exact output scaling.

use crate::invariant_ppt::{assert_invariant, SCALING_WORD_RANGE};

/// Gain of the DDS (frequency shift) stage.
pub const DDS_GAIN: f64 = 2.0;
/// Binary scale of the IQ scaling word.
pub const FIXPOINT_SCALING: f64 = (1u32 << 15) as f64;
/// CIC filter order.
pub const CIC_ORDER: i32 = 4;

/// Result of a gain compensation computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainCompensation {
    /// Total algorithmic gain after the hardware's own shift compensation.
    pub total_gain: f64,
    /// Fixed-point correction word written to the scaling register.
    pub scaling_word: i32,
    /// Gain left over after applying `scaling_word`.
    pub residual: f64,
}

/// Algorithmic gain of the DDC for a given CIC decimation.
///
/// The CIC has R = `cic_decim`, M = 1, N = 4, so its gain is `R^4`; the
/// hardware shifts that down by `2^ceil(log2(R^4))`.
pub fn dsp_gain(cic_decim: u32) -> f64 {
    let cic_gain = f64::from(cic_decim).powi(CIC_ORDER);
    DDS_GAIN * cic_gain / 2f64.powf(cic_gain.log2().ceil())
}

/// Closest fixed-point correction for `dsp_gain` and its residual.
pub fn compensate(dsp_gain: f64) -> GainCompensation {
    let target = FIXPOINT_SCALING / dsp_gain;
    // f64::round rounds half away from zero
    let scaling_word = target.round() as i32;
    assert_invariant(
        SCALING_WORD_RANGE,
        (0..=i32::from(i16::MAX) + 1).contains(&scaling_word),
        "scaling word fits the IQ scaler",
        Some("compensate"),
    );
    GainCompensation {
        total_gain: dsp_gain,
        scaling_word,
        residual: dsp_gain * f64::from(scaling_word) / FIXPOINT_SCALING,
    }
}

/// Per-channel cache of the residual scaling.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualScaling {
    residuals: Vec<f64>,
}

impl ResidualScaling {
    /// All channels start at unity.
    pub fn new(num_chans: usize) -> Self {
        Self {
            residuals: vec![1.0; num_chans],
        }
    }

    /// Compute the compensation for `cic_decim` on `chan` and cache the
    /// residual.
    pub fn update(&mut self, chan: usize, cic_decim: u32) -> GainCompensation {
        let comp = compensate(dsp_gain(cic_decim));
        if let Some(slot) = self.residuals.get_mut(chan) {
            *slot = comp.residual;
        }
        comp
    }

    pub fn get(&self, chan: usize) -> Option<f64> {
        self.residuals.get(chan).copied()
    }
}
