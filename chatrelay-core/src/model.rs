use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One chat turn. `image` is an optional data URI (or https URL) attached to
/// a user turn; the relay passes content through verbatim in either case.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// POST body accepted by the relay: the full history, oldest first.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatTurnRequest {
    pub messages: Vec<Message>,
}

/// JSON body of every relay failure response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_json_roundtrip_lowercase() {
        let json = r#"{"role":"assistant","content":"ok"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.image, None);
        let back = serde_json::to_string(&msg).unwrap();
        assert!(back.contains("\"assistant\""));
    }

    #[test]
    fn absent_image_is_not_serialized() {
        let msg = Message {
            role: Role::User,
            content: "hi".into(),
            image: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("image"));
    }

    #[test]
    fn image_survives_roundtrip() {
        let msg = Message {
            role: Role::User,
            content: "what is this?".into(),
            image: Some("data:image/png;base64,aGk=".into()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn chat_turn_request_decodes_client_shape() {
        let json = r#"{"messages":[
            {"role":"user","content":"2+2=?"},
            {"role":"assistant","content":"4"},
            {"role":"user","content":"and 3+3?"}
        ]}"#;
        let req: ChatTurnRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.messages.len(), 3);
        assert_eq!(req.messages[1].role, Role::Assistant);
        assert_eq!(req.messages[2].content, "and 3+3?");
    }

    #[test]
    fn error_body_roundtrip() {
        let body = ErrorBody {
            error: "Failed to process chat request".into(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"error":"Failed to process chat request"}"#);
        let back: ErrorBody = serde_json::from_str(&json).unwrap();
        assert_eq!(back, body);
    }
}
