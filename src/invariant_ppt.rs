//! PPT invariant system: runtime invariant enforcement with contract tracking.
//!
//! Control-plane code calls [`assert_invariant`] at the points where a
//! structural property must hold. With the `ppt` feature enabled, every
//! checked invariant is recorded so integration tests can assert (via
//! [`contract_test`]) that the code paths guarding it actually ran.

#[cfg(feature = "ppt")]
use lazy_static::lazy_static;
#[cfg(feature = "ppt")]
use std::collections::HashSet;
#[cfg(feature = "ppt")]
use std::sync::Mutex;

/// Block input and output port counts are equal.
pub const PORT_COUNT_MATCH: u32 = 1;
/// Decimation catalogue is non-empty, strictly ascending, positive.
pub const CATALOGUE_ORDERED: u32 = 2;
/// Coerced decimation is a catalogue member.
pub const COERCE_IN_CATALOGUE: u32 = 3;
/// Encoded decimation word decodes back to the requested decimation.
pub const ENCODE_ROUNDTRIP: u32 = 4;
/// Resolver touched only declared properties.
pub const RESOLVER_ACCESS_DECLARED: u32 = 5;
/// Resolution pass ended with no dirty property.
pub const RESOLUTION_FIXED_POINT: u32 = 6;
/// Forwarded stream command was rescaled across the rate boundary.
pub const STREAM_CMD_RESCALED: u32 = 7;
/// Forwarded stream command kept its mode and correlation id.
pub const STREAM_CMD_PRESERVED: u32 = 8;
/// Fixed-point scaling word is within the 16-bit signed range.
pub const SCALING_WORD_RANGE: u32 = 9;
/// Block factory registered before use.
pub const REGISTRY_LIFECYCLE: u32 = 10;
/// Edge joins an existing output port to a free input port.
pub const GRAPH_LEGALITY: u32 = 11;
/// Invalid edges are rejected before the graph changes.
pub const GRAPH_REJECTS_INVALID: u32 = 12;

#[cfg(feature = "ppt")]
lazy_static! {
    static ref INVARIANT_LOG: Mutex<HashSet<u32>> = Mutex::new(HashSet::new());
}

#[cfg(feature = "ppt")]
/// Assert an invariant: logs it and panics on failure.
pub(crate) fn assert_invariant(id: u32, condition: bool, message: &str, context: Option<&str>) {
    if !condition {
        let full_message = if let Some(ctx) = context {
            format!("Invariant {} failed: {} (context: {})", id, message, ctx)
        } else {
            format!("Invariant {} failed: {}", id, message)
        };
        tracing::error!("{}", full_message);
        panic!("{}", full_message);
    }
    INVARIANT_LOG.lock().unwrap().insert(id);
}

#[cfg(not(feature = "ppt"))]
/// Assert an invariant: checks condition and panics on failure.
pub(crate) fn assert_invariant(_id: u32, condition: bool, message: &str, _context: Option<&str>) {
    if !condition {
        panic!("Invariant failed: {}", message);
    }
}

#[cfg(feature = "ppt")]
/// Contract test: checks that specified invariants were asserted.
pub fn contract_test(test_name: &str, required_invariants: &[u32]) {
    let log = INVARIANT_LOG.lock().unwrap();
    let missing: Vec<u32> = required_invariants
        .iter()
        .copied()
        .filter(|inv| !log.contains(inv))
        .collect();
    drop(log);
    if !missing.is_empty() {
        panic!(
            "Contract test '{}' failed: invariants not enforced: {:?}",
            test_name, missing
        );
    }
}

#[cfg(not(feature = "ppt"))]
/// Contract test: no-op when PPT feature is disabled.
pub fn contract_test(_test_name: &str, _required_invariants: &[u32]) {}

#[cfg(feature = "ppt")]
/// Clear invariant log.
pub fn clear_invariant_log() {
    INVARIANT_LOG.lock().unwrap().clear();
}

#[cfg(not(feature = "ppt"))]
/// Clear invariant log: no-op when PPT feature is disabled.
pub fn clear_invariant_log() {}
