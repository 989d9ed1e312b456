//! Streaming primitives shared by providers and the relay.
//!
//! Contract:
//! - A provider stream yields 0..n `Delta` events in generation order, then at
//!   most one `Usage` event, then ends.
//! - Transport and upstream failures travel as `Err` items; the stream ends
//!   after the first error.
//!
//! Errors live in the item `Result` rather than in the event enum, so the
//! events themselves stay `Clone` and `PartialEq` for tests and buffering.

use crate::error::RelayResult;
use crate::usage::UsageRecord;

/// What the relay receives incrementally from a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Partial assistant text, forwarded verbatim.
    Delta(String),
    /// Token accounting for the finished reply; arrives after the last delta.
    Usage(UsageRecord),
}

impl UpstreamEvent {
    /// Convenience accessor for `Delta` contents.
    pub fn as_delta(&self) -> Option<&str> {
        match self {
            Self::Delta(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Boxed stream of upstream events. Providers return this from `open_stream`.
pub type EventStream = futures::stream::BoxStream<'static, RelayResult<UpstreamEvent>>;
