use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};

use crate::error::{RelayError, RelayResult};
use crate::model::{Message, Role};
use crate::provider::ChatProvider;
use crate::stream::{EventStream, UpstreamEvent};
use crate::trailer::encode_trailer;
use crate::usage::UsageRecord;

/// The streaming core. Validates a history, opens the provider stream, and
/// exposes it as the relay's byte protocol: deltas verbatim and in order,
/// then one usage trailer as the final bytes iff the upstream reported usage.
#[derive(Clone)]
pub struct Relay {
    provider: Arc<dyn ChatProvider>,
}

impl Relay {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Reject histories the upstream would choke on before contacting it.
    fn validate(history: &[Message]) -> RelayResult<()> {
        if history.is_empty() {
            return Err(RelayError::InvalidRequest("empty message history".into()));
        }
        if history
            .iter()
            .any(|m| m.role == Role::Assistant && m.image.is_some())
        {
            return Err(RelayError::InvalidRequest(
                "image attachments are only valid on user turns".into(),
            ));
        }
        Ok(())
    }

    /// Validate and open the upstream stream. Any error here surfaces before
    /// the first response byte, so the server can still answer with JSON.
    pub async fn open(&self, history: &[Message]) -> RelayResult<RelayStream> {
        Self::validate(history)?;
        let inner = self.provider.open_stream(history).await?;
        Ok(RelayStream::new(inner))
    }
}

/// Byte stream the server hands to the HTTP layer.
///
/// Deltas pass through unmodified and in order; nothing inspects them for
/// marker bytes. The trailer, when one is due, is always the final item. An
/// upstream failure after the first byte ends the stream with an error; bytes
/// already sent cannot be retracted, so the transport aborts from there.
pub struct RelayStream {
    inner: EventStream,
    usage: Option<UsageRecord>,
    deltas: u64,
    done: bool,
}

impl RelayStream {
    fn new(inner: EventStream) -> Self {
        Self {
            inner,
            usage: None,
            deltas: 0,
            done: false,
        }
    }
}

impl futures_util::stream::Stream for RelayStream {
    type Item = RelayResult<Bytes>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;
        loop {
            if self.done {
                return Poll::Ready(None);
            }
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(UpstreamEvent::Delta(text)))) => {
                    if text.is_empty() {
                        continue;
                    }
                    self.deltas += 1;
                    return Poll::Ready(Some(Ok(Bytes::from(text))));
                }
                Poll::Ready(Some(Ok(UpstreamEvent::Usage(u)))) => {
                    self.usage = Some(u);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    // A failed reply never gets a trailer.
                    self.done = true;
                    warn!(error = %e, deltas = self.deltas, "upstream failed mid-reply");
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    if let Some(u) = self.usage {
                        info!(
                            deltas = self.deltas,
                            prompt_tokens = u.prompt_tokens,
                            completion_tokens = u.completion_tokens,
                            "reply complete"
                        );
                        return Poll::Ready(Some(Ok(Bytes::from(encode_trailer(&u)))));
                    }
                    info!(deltas = self.deltas, "reply complete without usage");
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::StreamExt;

    /// Provider that replays a fixed script of events.
    struct Scripted<F>(F);

    #[async_trait]
    impl<F> ChatProvider for Scripted<F>
    where
        F: Fn() -> Vec<RelayResult<UpstreamEvent>> + Send + Sync,
    {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn open_stream(&self, _history: &[Message]) -> RelayResult<EventStream> {
            Ok(Box::pin(futures::stream::iter((self.0)())))
        }
    }

    fn relay_with<F>(script: F) -> Relay
    where
        F: Fn() -> Vec<RelayResult<UpstreamEvent>> + Send + Sync + 'static,
    {
        Relay::new(Arc::new(Scripted(script)))
    }

    fn user(content: &str) -> Message {
        Message {
            role: Role::User,
            content: content.into(),
            image: None,
        }
    }

    fn delta(s: &str) -> RelayResult<UpstreamEvent> {
        Ok(UpstreamEvent::Delta(s.into()))
    }

    #[tokio::test]
    async fn forwards_deltas_verbatim_then_appends_trailer() {
        let relay = relay_with(|| {
            vec![
                delta("4"),
                delta(" is"),
                delta(" the answer"),
                Ok(UpstreamEvent::Usage(UsageRecord::new(5, 3, 8))),
            ]
        });

        let stream = relay.open(&[user("2+2=?")]).await.expect("open ok");
        let chunks: Vec<Bytes> = stream.map(|c| c.expect("chunk ok")).collect().await;

        assert_eq!(chunks[0], Bytes::from("4"));
        assert_eq!(chunks[1], Bytes::from(" is"));
        assert_eq!(chunks[2], Bytes::from(" the answer"));
        assert_eq!(
            chunks[3],
            Bytes::from(
                "\n[[TOKEN_USAGE:{\"prompt_tokens\":5,\"completion_tokens\":3,\"total_tokens\":8}]]"
            )
        );
        assert_eq!(chunks.len(), 4);
    }

    #[tokio::test]
    async fn no_usage_means_no_trailer() {
        let relay = relay_with(|| vec![delta("hello"), delta(" world")]);
        let stream = relay.open(&[user("hi")]).await.unwrap();
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec![Bytes::from("hello"), Bytes::from(" world")]);
    }

    #[tokio::test]
    async fn empty_deltas_are_skipped() {
        let relay = relay_with(|| vec![delta(""), delta("a"), delta("")]);
        let stream = relay.open(&[user("hi")]).await.unwrap();
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec![Bytes::from("a")]);
    }

    #[tokio::test]
    async fn mid_stream_error_ends_stream_without_trailer() {
        let relay = relay_with(|| {
            vec![
                delta("partial"),
                Ok(UpstreamEvent::Usage(UsageRecord::new(1, 1, 2))),
                Err(RelayError::Interrupted("connection reset".into())),
            ]
        });

        let mut stream = relay.open(&[user("hi")]).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from("partial"));

        let second = stream.next().await.unwrap();
        assert!(matches!(second, Err(RelayError::Interrupted(_))));

        // Stream is over; no trailer follows a failure.
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn empty_history_is_rejected_before_upstream() {
        let relay = relay_with(|| vec![delta("never")]);
        let err = relay.open(&[]).await.err().unwrap();
        assert!(matches!(err, RelayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn image_on_assistant_turn_is_rejected() {
        let relay = relay_with(|| vec![delta("never")]);
        let history = vec![
            user("look at this"),
            Message {
                role: Role::Assistant,
                content: "sure".into(),
                image: Some("data:image/png;base64,AAA".into()),
            },
        ];
        let err = relay.open(&history).await.err().unwrap();
        assert!(matches!(err, RelayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn provider_open_failure_propagates() {
        struct Failing;

        #[async_trait]
        impl ChatProvider for Failing {
            fn name(&self) -> &str {
                "failing"
            }
            async fn open_stream(&self, _history: &[Message]) -> RelayResult<EventStream> {
                Err(RelayError::Unreachable {
                    target: "openai".into(),
                })
            }
        }

        let relay = Relay::new(Arc::new(Failing));
        let err = relay.open(&[user("hi")]).await.err().unwrap();
        assert!(matches!(err, RelayError::Unreachable { .. }));
    }
}
