//! Error types for block control.

use thiserror::Error;

/// Result type for block control operations.
pub type DdcResult<T> = Result<T, DdcError>;

/// Errors raised by the property store, the resolver engine, the DSP solvers
/// and the block controllers built on them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DdcError {
    /// Argument rejected before any state was touched.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Access to a property that was never registered.
    #[error("Property '{name}' not found at {scope}")]
    NotFound { name: String, scope: String },

    /// A property with this key already exists.
    #[error("Property '{name}' already registered at {scope}")]
    AlreadyRegistered { name: String, scope: String },

    /// Property value has a different type than requested.
    #[error("Type mismatch for property '{name}': expected {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A resolver touched a property outside its declared inputs/outputs.
    #[error("Resolver '{resolver}' accessed undeclared property '{property}'")]
    UndeclaredAccess { resolver: String, property: String },

    /// Decimation cannot be expressed with the available halfbands and CIC.
    #[error("Unsupported decimation {decim}: CIC remainder {cic} outside (0, {cic_max}]")]
    UnsupportedDecimation { decim: i64, cic: i64, cic_max: u32 },

    /// Resolution did not reach a fixed point.
    #[error("Resolution did not converge after {iterations} iterations (still dirty: {dirty:?})")]
    ResolutionDivergence {
        iterations: usize,
        dirty: Vec<String>,
    },

    /// FPGA compat number major version does not match.
    #[error("FPGA compat mismatch for {block}: expected major {expected}, got {actual}")]
    CompatMismatch {
        block: String,
        expected: u16,
        actual: u16,
    },

    /// Hardware capability readback is outside the supported range.
    #[error("Invalid hardware capability: {0}")]
    InvalidCapability(String),

    /// Port index out of range or input/output counts disagree.
    #[error("Port mismatch: {0}")]
    PortMismatch(String),

    /// No factory registered for this NoC ID.
    #[error("No block registered for NoC ID 0x{0:08X}")]
    UnknownBlock(u32),

    /// Register transport failure.
    #[error("Register access failed at 0x{address:08x}: {reason}")]
    Register { address: u32, reason: String },

    /// Invalid graph connection.
    #[error("Graph error: {0}")]
    Graph(String),
}

impl DdcError {
    /// Caller may retry with different input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DdcError::InvalidArgument(_) | DdcError::TypeMismatch { .. } | DdcError::Register { .. }
        )
    }

    /// Internal consistency failure; the current operation cannot complete.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DdcError::UnsupportedDecimation { .. }
                | DdcError::ResolutionDivergence { .. }
                | DdcError::CompatMismatch { .. }
                | DdcError::UndeclaredAccess { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(DdcError::InvalidArgument("rate".into()).is_recoverable());
        assert!(!DdcError::InvalidArgument("rate".into()).is_fatal());
        let div = DdcError::ResolutionDivergence {
            iterations: 4,
            dirty: vec!["x@user:0".into()],
        };
        assert!(div.is_fatal());
        assert!(!div.is_recoverable());
    }

    #[test]
    fn error_messages() {
        let err = DdcError::UnknownBlock(0xDDC0_0000);
        assert_eq!(err.to_string(), "No block registered for NoC ID 0xDDC00000");
        let err = DdcError::UnsupportedDecimation {
            decim: 17,
            cic: 17,
            cic_max: 16,
        };
        assert!(err.to_string().contains("(0, 16]"));
    }
}
