use async_trait::async_trait;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RelayResult;
use crate::http_client::{HttpClient, SseLine};
use crate::model::{Message, Role};
use crate::provider::ChatProvider;
use crate::stream::{EventStream, UpstreamEvent};
use crate::usage::UsageRecord;

#[derive(Debug, Clone)]
pub struct OpenAI {
    http: HttpClient,
    base: String,
    model: String,
    name: String, // "openai"
    api_key: SecretString,
}

impl OpenAI {
    pub fn new(http: HttpClient, api_key: SecretString, base: String, model: String) -> Self {
        Self {
            http,
            api_key,
            base,
            model,
            name: "openai".into(),
        }
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        OpenAI::new(
            HttpClient::new_default().unwrap(),
            SecretString::new("test-key".into()),
            server_base.to_string(),
            "gpt-4o-mini".into(),
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key.expose_secret()),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]
    }
}

// ---- Wire structs (chat completions, streaming) ----
#[derive(Serialize)]
struct OAChatReq<'a> {
    model: &'a str,
    messages: Vec<OAMessage<'a>>,
    stream: bool,
    stream_options: OAStreamOptions,
}

#[derive(Serialize)]
struct OAStreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct OAMessage<'a> {
    role: &'a str,
    content: OAContent<'a>,
}

/// Either a bare string or the multipart form used for image turns.
#[derive(Serialize)]
#[serde(untagged)]
enum OAContent<'a> {
    Text(&'a str),
    Parts(Vec<OAContentPart<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OAContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: OAImageUrl<'a> },
}

#[derive(Serialize)]
struct OAImageUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct OAStreamChunk {
    #[serde(default)]
    choices: Vec<OAStreamChoice>,
    usage: Option<UsageRecord>,
}

#[derive(Deserialize)]
struct OAStreamChoice {
    #[serde(default)]
    delta: OADelta,
}

#[derive(Deserialize, Default)]
struct OADelta {
    content: Option<String>,
}

/// Map a history turn to the wire form. A turn with an image expands to the
/// multipart content array; plain turns stay a bare string.
fn wire_messages(history: &[Message]) -> Vec<OAMessage<'_>> {
    history
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let content = match &m.image {
                Some(url) => OAContent::Parts(vec![
                    OAContentPart::Text { text: &m.content },
                    OAContentPart::ImageUrl {
                        image_url: OAImageUrl { url },
                    },
                ]),
                None => OAContent::Text(&m.content),
            };
            OAMessage { role, content }
        })
        .collect()
}

/// Parse one SSE line into upstream events. Non-data lines, the `[DONE]`
/// sentinel, empty deltas, and unparseable payloads all produce nothing.
fn parse_sse_line(line: &str) -> Vec<UpstreamEvent> {
    let Some(data) = line.strip_prefix("data: ") else {
        return Vec::new();
    };
    let data = data.trim();
    if data == "[DONE]" || data.is_empty() {
        return Vec::new();
    }
    let chunk: OAStreamChunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "skipping unparseable stream chunk");
            return Vec::new();
        }
    };
    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content
            && !content.is_empty()
        {
            events.push(UpstreamEvent::Delta(content));
        }
    }
    // Usage rides the final chunk (empty choices); keep it after any deltas.
    if let Some(usage) = chunk.usage {
        events.push(UpstreamEvent::Usage(usage));
    }
    events
}

#[async_trait]
impl ChatProvider for OpenAI {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open_stream(&self, history: &[Message]) -> RelayResult<EventStream> {
        let payload = OAChatReq {
            model: &self.model,
            messages: wire_messages(history),
            stream: true,
            stream_options: OAStreamOptions {
                include_usage: true,
            },
        };
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let url = format!("{}/chat/completions", self.base);
        let lines = self
            .http
            .post_sse_lines(&url, &payload, &hdrs, &self.name)
            .await?;

        let events = lines.flat_map(|item| {
            let evs: Vec<RelayResult<UpstreamEvent>> = match item {
                Ok(SseLine { line }) => parse_sse_line(&line).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            futures::stream::iter(evs)
        });
        Ok(Box::pin(events))
    }
}
