//! In-band usage trailer: recognition and encoding.
//!
//! A successful relay stream ends with
//! `\n[[TOKEN_USAGE:{"prompt_tokens":5,"completion_tokens":3,"total_tokens":8}]]`
//! as its absolute final bytes. `extract_usage` strips that marker from
//! accumulated text; `encode_trailer` produces it. Extraction is pure and
//! idempotent, so consumers can re-run it over a growing buffer after every
//! chunk without tracking parser state.
//!
//! Known limitation: assistant text that itself ends in marker-shaped bytes is
//! indistinguishable from a real trailer. Payloads written by `encode_trailer`
//! never contain `]]`, and a marker whose payload is not valid usage JSON is
//! left in place as visible text rather than guessed at.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::usage::UsageRecord;

static TRAILER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n?\[\[TOKEN_USAGE:(.+?)\]\]$").expect("trailer regex"));

/// Result of running the extractor over accumulated text.
/// `content` borrows from the input; no usage means the input came back whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extraction<'a> {
    pub content: &'a str,
    pub usage: Option<UsageRecord>,
}

/// Strip a trailing usage marker, if the text ends with a well-formed one.
///
/// The marker is only recognized as a suffix; the same byte sequence earlier
/// in the text is ordinary content. A suffix marker whose payload fails to
/// parse is also ordinary content.
pub fn extract_usage(text: &str) -> Extraction<'_> {
    let Some(caps) = TRAILER_RE.captures(text) else {
        return Extraction {
            content: text,
            usage: None,
        };
    };
    let (whole, [payload]) = caps.extract();
    match serde_json::from_str::<UsageRecord>(payload) {
        Ok(usage) => Extraction {
            content: &text[..text.len() - whole.len()],
            usage: Some(usage),
        },
        Err(_) => Extraction {
            content: text,
            usage: None,
        },
    }
}

/// Encode the trailer appended after the final content byte of a stream.
pub fn encode_trailer(usage: &UsageRecord) -> String {
    format!(
        "\n[[TOKEN_USAGE:{}]]",
        serde_json::to_string(usage).unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(p: u32, c: u32, t: u32) -> UsageRecord {
        UsageRecord::new(p, c, t)
    }

    #[test]
    fn plain_text_passes_through() {
        let out = extract_usage("The answer is 4.");
        assert_eq!(out.content, "The answer is 4.");
        assert_eq!(out.usage, None);
    }

    #[test]
    fn empty_input_passes_through() {
        let out = extract_usage("");
        assert_eq!(out.content, "");
        assert_eq!(out.usage, None);
    }

    #[test]
    fn encode_then_extract_roundtrips() {
        let usage = rec(5, 3, 8);
        let text = format!("4 is the answer{}", encode_trailer(&usage));
        let out = extract_usage(&text);
        assert_eq!(out.content, "4 is the answer");
        assert_eq!(out.usage, Some(usage));
    }

    #[test]
    fn marker_without_leading_newline_matches() {
        let text = r#"[[TOKEN_USAGE:{"prompt_tokens":1,"completion_tokens":2,"total_tokens":3}]]"#;
        let out = extract_usage(text);
        assert_eq!(out.content, "");
        assert_eq!(out.usage, Some(rec(1, 2, 3)));
    }

    #[test]
    fn leading_newline_is_stripped_with_marker() {
        let text = format!("hi{}", encode_trailer(&rec(1, 1, 2)));
        let out = extract_usage(&text);
        assert_eq!(out.content, "hi");
        assert!(!out.content.ends_with('\n'));
    }

    #[test]
    fn extraction_is_idempotent() {
        let usage = rec(10, 4, 14);
        let text = format!("partial reply{}", encode_trailer(&usage));
        let first = extract_usage(&text);
        let second = extract_usage(first.content);
        assert_eq!(second.content, first.content);
        assert_eq!(second.usage, None);
    }

    #[test]
    fn marker_mid_text_is_left_alone() {
        let text = format!("before{}after", encode_trailer(&rec(1, 1, 2)));
        let out = extract_usage(&text);
        assert_eq!(out.content, text.as_str());
        assert_eq!(out.usage, None);
    }

    #[test]
    fn malformed_payload_stays_visible() {
        let text = "reply\n[[TOKEN_USAGE:not-json]]";
        let out = extract_usage(text);
        assert_eq!(out.content, text);
        assert_eq!(out.usage, None);
    }

    #[test]
    fn truncated_marker_stays_visible() {
        let text = "reply\n[[TOKEN_USAGE:{\"prompt_tokens\":5";
        let out = extract_usage(text);
        assert_eq!(out.content, text);
        assert_eq!(out.usage, None);
    }

    #[test]
    fn multibyte_content_slices_cleanly() {
        let usage = rec(2, 2, 4);
        let text = format!("héllo wörld 🦀{}", encode_trailer(&usage));
        let out = extract_usage(&text);
        assert_eq!(out.content, "héllo wörld 🦀");
        assert_eq!(out.usage, Some(usage));
    }

    #[test]
    fn payload_with_extra_fields_still_parses() {
        let text = r#"ok
[[TOKEN_USAGE:{"prompt_tokens":1,"completion_tokens":2,"total_tokens":3,"model":"gpt-4o-mini"}]]"#;
        let out = extract_usage(text);
        assert_eq!(out.content, "ok");
        assert_eq!(out.usage, Some(rec(1, 2, 3)));
    }

    #[test]
    fn trailer_payload_is_compact_json() {
        let s = encode_trailer(&rec(5, 3, 8));
        assert_eq!(
            s,
            "\n[[TOKEN_USAGE:{\"prompt_tokens\":5,\"completion_tokens\":3,\"total_tokens\":8}]]"
        );
    }
}
