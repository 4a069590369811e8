//! Gmail REST v1 wire types and message decoding.

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use super::{MessageDetails, MessageId};

/// `users.messages.list` response.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesResponse {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
    pub next_page_token: Option<String>,
    pub result_size_estimate: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    pub thread_id: Option<String>,
}

/// `users.messages.get?format=full` response (fields the service reads).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartBody {
    pub data: Option<String>,
    pub size: Option<u64>,
}

/// `users.labels.list` response.
#[derive(Debug, Default, Deserialize)]
pub struct ListLabelsResponse {
    #[serde(default)]
    pub labels: Vec<GmailLabel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailLabel {
    pub id: String,
    pub name: String,
}

/// `users.labels.create` request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLabelRequest<'a> {
    pub name: &'a str,
    pub message_list_visibility: &'a str,
    pub label_list_visibility: &'a str,
}

impl<'a> CreateLabelRequest<'a> {
    pub fn visible(name: &'a str) -> Self {
        Self {
            name,
            message_list_visibility: "show",
            label_list_visibility: "labelShow",
        }
    }
}

/// `users.messages.modify` request body.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_label_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_label_ids: Vec<String>,
}

/// `users.messages.send` request body.
#[derive(Debug, Serialize)]
pub struct SendRequest {
    pub raw: String,
}

/// Case-insensitive header lookup.
pub fn header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Decode Gmail's base64url body data. Gmail omits padding on some parts.
pub fn decode_body_data(data: &str) -> Option<String> {
    let bytes = URL_SAFE
        .decode(data)
        .or_else(|_| URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn is_plain_text(part: &MessagePart) -> bool {
    if let Some(mime) = &part.mime_type
        && mime.eq_ignore_ascii_case("text/plain")
    {
        return true;
    }
    header(&part.headers, "Content-Type")
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/plain"))
}

fn part_data(part: &MessagePart) -> Option<&str> {
    part.body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .filter(|d| !d.is_empty())
}

/// Extract the text/plain body of a payload.
///
/// Multipart payloads yield their first text/plain part (searched depth
/// first); single-part payloads yield their own body. `Some("")` means the
/// message has no readable text; `None` means the data was not decodable.
pub fn extract_body(payload: &MessagePart) -> Option<String> {
    if payload.parts.is_empty() {
        return match part_data(payload) {
            Some(data) => decode_body_data(data),
            None => Some(String::new()),
        };
    }
    match find_plain_part(&payload.parts) {
        Some(data) => decode_body_data(data),
        None => Some(String::new()),
    }
}

fn find_plain_part(parts: &[MessagePart]) -> Option<&str> {
    for part in parts {
        if is_plain_text(part)
            && let Some(data) = part_data(part)
        {
            return Some(data);
        }
        if let Some(found) = find_plain_part(&part.parts) {
            return Some(found);
        }
    }
    None
}

/// Convert a full Gmail message into loop-facing details.
///
/// Returns `None` when the message lacks a payload, a `Subject` or `From`
/// header, or carries an undecodable body.
pub fn into_details(message: GmailMessage) -> Option<MessageDetails> {
    let payload = message.payload?;
    let subject = header(&payload.headers, "Subject")?.to_string();
    let from = header(&payload.headers, "From")?.to_string();
    let body = extract_body(&payload)?;
    Some(MessageDetails {
        id: MessageId(message.id),
        from,
        subject,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(s: &str) -> String {
        URL_SAFE.encode(s.as_bytes())
    }

    fn message_json(payload: serde_json::Value) -> GmailMessage {
        serde_json::from_value(serde_json::json!({
            "id": "m1",
            "labelIds": ["UNREAD", "INBOX"],
            "payload": payload,
        }))
        .unwrap()
    }

    #[test]
    fn single_part_body() {
        let msg = message_json(serde_json::json!({
            "mimeType": "text/plain",
            "headers": [
                {"name": "Subject", "value": "Hello"},
                {"name": "From", "value": "Alice <alice@example.com>"}
            ],
            "body": {"data": encode("Hi there"), "size": 8}
        }));
        let details = into_details(msg).unwrap();
        assert_eq!(details.id, MessageId::new("m1"));
        assert_eq!(details.subject, "Hello");
        assert_eq!(details.from, "Alice <alice@example.com>");
        assert_eq!(details.body, "Hi there");
    }

    #[test]
    fn multipart_prefers_plain_text() {
        let msg = message_json(serde_json::json!({
            "mimeType": "multipart/alternative",
            "headers": [
                {"name": "subject", "value": "Mixed"},
                {"name": "from", "value": "bob@example.com"}
            ],
            "parts": [
                {"mimeType": "text/html", "body": {"data": encode("<p>html</p>")}},
                {
                    "headers": [{"name": "Content-Type", "value": "text/plain; charset=UTF-8"}],
                    "body": {"data": encode("plain body")}
                }
            ]
        }));
        assert_eq!(into_details(msg).unwrap().body, "plain body");
    }

    #[test]
    fn nested_multipart_is_searched() {
        let msg = message_json(serde_json::json!({
            "mimeType": "multipart/mixed",
            "headers": [
                {"name": "Subject", "value": "Nested"},
                {"name": "From", "value": "c@example.com"}
            ],
            "parts": [
                {
                    "mimeType": "multipart/alternative",
                    "parts": [
                        {"mimeType": "text/plain", "body": {"data": encode("deep")}}
                    ]
                }
            ]
        }));
        assert_eq!(into_details(msg).unwrap().body, "deep");
    }

    #[test]
    fn missing_subject_is_undecodable() {
        let msg = message_json(serde_json::json!({
            "headers": [{"name": "From", "value": "a@example.com"}],
            "body": {"data": encode("x")}
        }));
        assert!(into_details(msg).is_none());
    }

    #[test]
    fn no_plain_part_gives_empty_body() {
        let msg = message_json(serde_json::json!({
            "headers": [
                {"name": "Subject", "value": "Only html"},
                {"name": "From", "value": "a@example.com"}
            ],
            "parts": [{"mimeType": "text/html", "body": {"data": encode("<b>x</b>")}}]
        }));
        assert_eq!(into_details(msg).unwrap().body, "");
    }

    #[test]
    fn unpadded_data_decodes() {
        // "ab" encodes to "YWI=" with padding
        assert_eq!(decode_body_data("YWI").as_deref(), Some("ab"));
        assert_eq!(decode_body_data("YWI=").as_deref(), Some("ab"));
        assert!(decode_body_data("***").is_none());
    }

    #[test]
    fn modify_request_omits_empty_lists() {
        let req = ModifyRequest {
            remove_label_ids: vec!["UNREAD".into()],
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, serde_json::json!({"removeLabelIds": ["UNREAD"]}));
    }

    #[test]
    fn list_response_without_messages() {
        let resp: ListMessagesResponse =
            serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).unwrap();
        assert!(resp.messages.is_empty());
    }
}
