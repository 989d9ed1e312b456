use async_trait::async_trait;
use futures::stream;

use crate::error::RelayResult;
use crate::model::Message;
use crate::stream::{EventStream, UpstreamEvent};
use crate::usage::UsageRecord;

/// A backend that can stream one assistant reply for a chat history.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Open a streaming completion for the given history.
    /// Any failure here happens before a single reply byte exists, so callers
    /// can still answer with a proper error response.
    async fn open_stream(&self, history: &[Message]) -> RelayResult<EventStream>;
}

/// A dummy provider implementation that always streams a canned reply.
/// Used when no API key is configured, and as a placeholder in tests.
pub struct NullProvider;

impl NullProvider {
    const REPLY: [&'static str; 3] = ["[null", " provider", " response]"];
}

#[async_trait]
impl ChatProvider for NullProvider {
    fn name(&self) -> &str {
        "null"
    }

    async fn open_stream(&self, history: &[Message]) -> RelayResult<EventStream> {
        let prompt: u32 = history.iter().map(|m| m.content.len() as u32).sum();
        let mut events: Vec<RelayResult<UpstreamEvent>> = Self::REPLY
            .iter()
            .map(|d| Ok(UpstreamEvent::Delta((*d).to_string())))
            .collect();
        events.push(Ok(UpstreamEvent::Usage(UsageRecord::new(
            prompt, 0, prompt,
        ))));
        Ok(Box::pin(stream::iter(events)))
    }
}
