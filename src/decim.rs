//! Decimation catalogue: which decimations the halfband + CIC chain can
//! realize, coercion of arbitrary ratios onto them, and the register word.

use crate::error::{DdcError, DdcResult};
use crate::invariant_ppt::{
    assert_invariant, CATALOGUE_ORDERED, COERCE_IN_CATALOGUE, ENCODE_ROUNDTRIP,
};

/// Largest halfband count we accept from the hardware readback.
pub const MAX_HALFBANDS: u32 = 24;
/// Largest CIC decimation that fits the low byte of the decimation word.
pub const MAX_CIC_DECIM: u32 = 0xFF;

/// A decimation split into halfband stages and CIC remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimWord {
    /// Number of enabled halfband stages.
    pub halfbands: u32,
    /// Decimation left for the CIC.
    pub cic: u32,
}

impl DecimWord {
    /// Register layout: halfband count in the high byte, CIC in the low byte.
    pub fn word(&self) -> u32 {
        (self.halfbands << 8) | self.cic
    }

    /// Split a register word back into its fields.
    pub fn from_word(word: u32) -> Self {
        Self {
            halfbands: (word >> 8) & 0xFF,
            cic: word & 0xFF,
        }
    }

    /// Total decimation `2^halfbands * cic`.
    pub fn decim(&self) -> i64 {
        1i64.checked_shl(self.halfbands).unwrap_or(0) * i64::from(self.cic)
    }

    /// Odd CIC decimation with no halfband enabled: expect passband CIC
    /// roll-off.
    pub fn has_rolloff(&self) -> bool {
        self.cic > 1 && self.halfbands == 0
    }
}

/// Immutable, ascending set of realizable decimations.
#[derive(Debug, Clone, PartialEq)]
pub struct DecimCatalogue {
    num_halfbands: u32,
    cic_max_decim: u32,
    decims: Vec<i64>,
}

impl DecimCatalogue {
    /// Build the catalogue from the hardware capability readbacks.
    pub fn new(num_halfbands: u32, cic_max_decim: u32) -> DdcResult<Self> {
        if cic_max_decim == 0 || cic_max_decim > MAX_CIC_DECIM {
            return Err(DdcError::InvalidCapability(format!(
                "max CIC decimation {} outside (0, {}]",
                cic_max_decim, MAX_CIC_DECIM
            )));
        }
        if num_halfbands > MAX_HALFBANDS {
            return Err(DdcError::InvalidCapability(format!(
                "{} halfbands exceeds {}",
                num_halfbands, MAX_HALFBANDS
            )));
        }
        let mut decims = vec![1i64];
        for hb in 0..num_halfbands {
            for cic in 1..cic_max_decim {
                decims.push((1i64 << hb) * i64::from(cic));
            }
        }
        decims.sort_unstable();
        decims.dedup();

        assert_invariant(
            CATALOGUE_ORDERED,
            decims[0] >= 1 && decims.windows(2).all(|w| w[0] < w[1]),
            "catalogue strictly ascending and positive",
            Some("DecimCatalogue::new"),
        );
        Ok(Self {
            num_halfbands,
            cic_max_decim,
            decims,
        })
    }

    pub fn num_halfbands(&self) -> u32 {
        self.num_halfbands
    }

    pub fn cic_max_decim(&self) -> u32 {
        self.cic_max_decim
    }

    /// All valid decimations, smallest first.
    pub fn decims(&self) -> &[i64] {
        &self.decims
    }

    pub fn contains(&self, decim: i64) -> bool {
        self.decims.binary_search(&decim).is_ok()
    }

    pub fn min(&self) -> i64 {
        self.decims[0]
    }

    pub fn max(&self) -> i64 {
        self.decims[self.decims.len() - 1]
    }

    /// Closest valid decimation to `requested`. Ties go to the larger value;
    /// requests outside the catalogue clip to its ends.
    pub fn coerce(&self, requested: f64) -> DdcResult<i64> {
        if !requested.is_finite() || requested <= 0.0 {
            return Err(DdcError::InvalidArgument(format!(
                "requested decimation must be positive, got {}",
                requested
            )));
        }
        // First member >= requested
        let upper = self.decims.partition_point(|&d| (d as f64) < requested);
        let coerced = if upper == 0 {
            self.decims[0]
        } else if upper == self.decims.len() {
            self.decims[upper - 1]
        } else {
            let below = self.decims[upper - 1];
            let above = self.decims[upper];
            if requested - (below as f64) < (above as f64) - requested {
                below
            } else {
                above
            }
        };
        assert_invariant(
            COERCE_IN_CATALOGUE,
            self.contains(coerced),
            "coerced decimation is valid",
            Some("DecimCatalogue::coerce"),
        );
        Ok(coerced)
    }

    /// Split `decim` into halfbands and CIC remainder.
    ///
    /// Fails with [`DdcError::UnsupportedDecimation`] if the CIC cannot
    /// realize what is left; for catalogue members this never happens.
    pub fn encode(&self, decim: i64) -> DdcResult<DecimWord> {
        let unsupported = |cic: i64| DdcError::UnsupportedDecimation {
            decim,
            cic,
            cic_max: self.cic_max_decim,
        };
        if decim <= 0 {
            return Err(unsupported(decim));
        }
        let mut halfbands = 0u32;
        let mut cic = decim;
        while cic % 2 == 0 && halfbands < self.num_halfbands {
            halfbands += 1;
            cic /= 2;
        }
        if cic <= 0 || cic > i64::from(self.cic_max_decim) {
            return Err(unsupported(cic));
        }
        let encoded = DecimWord {
            halfbands,
            cic: cic as u32,
        };
        assert_invariant(
            ENCODE_ROUNDTRIP,
            encoded.decim() == decim,
            "decimation word decodes to the requested decimation",
            Some("DecimCatalogue::encode"),
        );
        if encoded.has_rolloff() {
            tracing::warn!(
                decim,
                "The requested decimation is odd; expect passband CIC rolloff. \
                 Select an even decimation to enable a halfband filter. \
                 Decimations factorable by 4 enable 2 halfbands, those factorable by 8 enable 3."
            );
        }
        Ok(encoded)
    }
}
