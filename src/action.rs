//! Action messages exchanged between block ports.
//!
//! Actions travel along graph edges, from one block's port to its neighbour.
//! The payload is a closed enum, so handlers dispatch on the variant instead
//! of probing the message type at runtime.
//!
//! All messages are:
//! - Immutable once built; forwarding builds a new message per hop
//! - Tagged with a correlation id that survives every hop
//! - Cheap to clone

use std::sync::atomic::{AtomicU64, Ordering};

use crate::regs::TimeSpec;

/// Action key for stream commands.
pub const ACTION_KEY_STREAM_CMD: &str = "stream_cmd";

static NEXT_ACTION_ID: AtomicU64 = AtomicU64::new(1);

/// How a stream command wants samples delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamMode {
    /// Stream until told to stop.
    StartContinuous,
    /// Stop a continuous stream.
    StopContinuous,
    /// Deliver `num_samps` samples, then end the burst.
    NumSampsAndDone,
    /// Deliver `num_samps` samples, more commands follow.
    NumSampsAndMore,
}

impl StreamMode {
    /// Single-character code, as shown in stream command traces.
    pub fn code(&self) -> char {
        match self {
            StreamMode::StartContinuous => 'a',
            StreamMode::StopContinuous => 'o',
            StreamMode::NumSampsAndDone => 'd',
            StreamMode::NumSampsAndMore => 'm',
        }
    }

    /// Whether the command carries a sample count.
    pub fn is_num_samps(&self) -> bool {
        matches!(self, StreamMode::NumSampsAndDone | StreamMode::NumSampsAndMore)
    }
}

/// A streaming command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamCmd {
    pub mode: StreamMode,
    /// Sample count; only meaningful for the num-samps modes.
    pub num_samps: u64,
    /// Start immediately rather than at `time_spec`.
    pub stream_now: bool,
    pub time_spec: Option<TimeSpec>,
}

impl StreamCmd {
    pub fn new(mode: StreamMode) -> Self {
        Self {
            mode,
            num_samps: 0,
            stream_now: true,
            time_spec: None,
        }
    }

    pub fn num_samps(mode: StreamMode, num_samps: u64) -> Self {
        Self {
            num_samps,
            ..Self::new(mode)
        }
    }

    /// Start at a given time instead of now.
    pub fn at(mut self, time: TimeSpec) -> Self {
        self.stream_now = false;
        self.time_spec = Some(time);
        self
    }

    /// Sample count, if the mode carries one.
    pub fn sample_count(&self) -> Option<u64> {
        self.mode.is_num_samps().then_some(self.num_samps)
    }
}

/// What an action carries.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    /// Stream start/stop/burst request.
    StreamCmd(StreamCmd),
    /// Any other action, identified by key. Blocks forward or drop these.
    Other { key: String, args: Vec<u8> },
}

impl ActionPayload {
    /// Routing key of the payload.
    pub fn key(&self) -> &str {
        match self {
            ActionPayload::StreamCmd(_) => ACTION_KEY_STREAM_CMD,
            ActionPayload::Other { key, .. } => key,
        }
    }
}

/// An action message.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionInfo {
    /// Correlation id, shared by every hop of the same request.
    pub id: u64,
    pub payload: ActionPayload,
}

impl ActionInfo {
    /// New action with a fresh correlation id.
    pub fn new(payload: ActionPayload) -> Self {
        Self {
            id: NEXT_ACTION_ID.fetch_add(1, Ordering::Relaxed),
            payload,
        }
    }

    pub fn stream_cmd(cmd: StreamCmd) -> Self {
        Self::new(ActionPayload::StreamCmd(cmd))
    }

    /// Next-hop copy of this action carrying `payload`.
    pub fn forward(&self, payload: ActionPayload) -> Self {
        Self {
            id: self.id,
            payload,
        }
    }

    pub fn key(&self) -> &str {
        self.payload.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_unique() {
        let a = ActionInfo::stream_cmd(StreamCmd::new(StreamMode::StartContinuous));
        let b = ActionInfo::stream_cmd(StreamCmd::new(StreamMode::StartContinuous));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn forward_keeps_correlation_id() {
        let a = ActionInfo::stream_cmd(StreamCmd::num_samps(StreamMode::NumSampsAndDone, 10));
        let b = a.forward(ActionPayload::StreamCmd(StreamCmd::num_samps(
            StreamMode::NumSampsAndDone,
            40,
        )));
        assert_eq!(a.id, b.id);
        assert_ne!(a, b);
    }

    #[test]
    fn sample_count_only_for_num_samps() {
        assert_eq!(
            StreamCmd::num_samps(StreamMode::NumSampsAndMore, 100).sample_count(),
            Some(100)
        );
        assert_eq!(StreamCmd::new(StreamMode::StartContinuous).sample_count(), None);
        assert_eq!(StreamMode::StopContinuous.code(), 'o');
    }

    #[test]
    fn timed_command() {
        let cmd = StreamCmd::new(StreamMode::StartContinuous).at(TimeSpec(2.0));
        assert!(!cmd.stream_now);
        assert_eq!(cmd.time_spec, Some(TimeSpec(2.0)));
    }

    #[test]
    fn payload_keys() {
        let a = ActionInfo::stream_cmd(StreamCmd::new(StreamMode::StopContinuous));
        assert_eq!(a.key(), ACTION_KEY_STREAM_CMD);
        let b = ActionInfo::new(ActionPayload::Other {
            key: "rx_event".into(),
            args: vec![],
        });
        assert_eq!(b.key(), "rx_event");
    }
}
