//! Client side of the reply stream.
//!
//! The reply arrives as plain bytes with an optional usage trailer at the
//! very end. Chunk boundaries are arbitrary, so the client never inspects a
//! chunk in isolation: every chunk is folded into a growing accumulator and
//! trailer extraction re-runs over the whole buffer. The trailer is
//! recognized exactly when its last byte arrives, no matter how the network
//! fragmented it.

use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::error::{RelayError, RelayResult};
use crate::http_client::{HttpClient, truncate};
use crate::model::{ChatTurnRequest, ErrorBody, Message};
use crate::trailer;
use crate::usage::UsageRecord;

/// Shown in place of partial content when a reply fails.
pub const ERROR_TEXT: &str = "An error occurred while streaming the reply.";

/// Monotonically growing reply buffer. One per reply.
#[derive(Debug, Default)]
pub struct ReplyAccumulator {
    buf: Vec<u8>,
    usage_seen: bool,
}

/// View of the reply after one chunk has been folded in.
#[derive(Debug)]
pub struct Snapshot {
    /// Visible content, trailer stripped.
    pub content: String,
    /// `Some` only on the push where the usage record first surfaced.
    pub newly_extracted: Option<UsageRecord>,
}

impl ReplyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk and re-extract against the full buffer.
    ///
    /// A buffer that currently ends mid-way through a multi-byte character
    /// decodes with a replacement character; the next push heals it because
    /// decoding always starts over from the first byte.
    pub fn push(&mut self, chunk: &[u8]) -> Snapshot {
        self.buf.extend_from_slice(chunk);
        let text = String::from_utf8_lossy(&self.buf);
        let extraction = trailer::extract_usage(&text);
        let newly_extracted = match extraction.usage {
            Some(usage) if !self.usage_seen => {
                self.usage_seen = true;
                Some(usage)
            }
            _ => None,
        };
        Snapshot {
            content: extraction.content.to_string(),
            newly_extracted,
        }
    }
}

/// Observer for reply progress.
///
/// `on_reply` receives the full content so far after every chunk, already
/// stripped of the trailer. `on_usage` fires at most once per reply.
pub trait ReplySink {
    fn on_reply(&mut self, content: &str);
    fn on_usage(&mut self, usage: &UsageRecord);
}

/// Final outcome of one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub content: String,
    pub usage: Option<UsageRecord>,
}

/// Streaming client for the relay's chat route.
pub struct ChatClient {
    http: HttpClient,
    base: String,
}

impl ChatClient {
    pub fn new(http: HttpClient, base: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into(),
        }
    }

    /// Send the history and stream the reply into `sink`.
    ///
    /// On any failure, before or mid-stream, the sink's content is replaced
    /// by [`ERROR_TEXT`] and the error is returned. Partial content is
    /// discarded, not kept.
    pub async fn send(
        &self,
        history: &[Message],
        sink: &mut dyn ReplySink,
    ) -> RelayResult<ChatReply> {
        match self.stream_reply(history, sink).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!(error = %e, "reply failed; substituting error text");
                sink.on_reply(ERROR_TEXT);
                Err(e)
            }
        }
    }

    async fn stream_reply(
        &self,
        history: &[Message],
        sink: &mut dyn ReplySink,
    ) -> RelayResult<ChatReply> {
        let url = format!("{}/api/chat", self.base);
        let req = ChatTurnRequest {
            messages: history.to_vec(),
        };
        let resp = self.http.post_raw(&url, &req, &[], "relay").await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(parsed) => parsed.error,
                Err(_) => truncate(&body, 300),
            };
            return Err(RelayError::Rejected {
                target: "relay".to_string(),
                code: status.as_str().to_string(),
                message,
            });
        }

        let mut acc = ReplyAccumulator::new();
        let mut reply = ChatReply {
            content: String::new(),
            usage: None,
        };
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| RelayError::Interrupted(e.to_string()))?;
            let snapshot = acc.push(&chunk);
            sink.on_reply(&snapshot.content);
            if let Some(usage) = snapshot.newly_extracted {
                debug!(total_tokens = usage.total_tokens, "usage trailer extracted");
                sink.on_usage(&usage);
                reply.usage = Some(usage);
            }
            reply.content = snapshot.content;
        }
        Ok(reply)
    }
}
