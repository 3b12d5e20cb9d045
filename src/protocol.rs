use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChatError;

/// Upper bound of a single read, and so of a single protocol unit.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 1024;

/// Wire protocol format:
///
/// One JSON object per socket read or write, UTF-8, at most
/// `max_message_len` bytes. There is no length prefix and no delimiter:
/// a unit must arrive in a single read.
///
///   {"action": "presence", "time": 1.0, "user": {"account_name": "alice"}}
///   {"action": "message", "time": 1.0, "from": "alice", "to": "bob", "message_text": "hi"}
///   {"action": "exit", "account_name": "alice"}
///   {"status_code": 200, "status": "OK"}
///
/// Requests carry an `action` tag. Replies have no tag and are recognised
/// by `status_code`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}

/// Client-originated units, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Request {
    Presence {
        time: f64,
        user: Account,
    },
    #[serde(rename = "message")]
    Chat(Chat),
    Exit {
        account_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_name: String,
}

/// A directed text message. The relay forwards it to `destination` as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub time: f64,
    #[serde(rename = "from")]
    pub sender: String,
    #[serde(rename = "to")]
    pub destination: String,
    #[serde(rename = "message_text")]
    pub text: String,
}

/// The relay's reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status_code: u16,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            status_code: 200,
            status: "OK".to_string(),
            error: None,
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self {
            status_code: 400,
            status: "Bad Request".to_string(),
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

impl From<Chat> for Message {
    fn from(chat: Chat) -> Self {
        Message::Request(Request::Chat(chat))
    }
}

/// Decode one read's worth of bytes.
///
/// Anything that is not a JSON object is `MalformedPayload`: the stream
/// cannot be trusted after it. An object that is not one of the protocol
/// units is `ProtocolViolation`, which the relay answers with a 400.
pub fn decode(bytes: &[u8]) -> Result<Message, ChatError> {
    let text =
        std::str::from_utf8(bytes).map_err(|e| ChatError::MalformedPayload(e.to_string()))?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| ChatError::MalformedPayload(e.to_string()))?;

    let Value::Object(fields) = value else {
        return Err(ChatError::MalformedPayload(
            "expected a JSON object".to_string(),
        ));
    };

    let message = if fields.contains_key("action") {
        serde_json::from_value::<Request>(Value::Object(fields))
            .map(Message::Request)
            .map_err(|e| ChatError::ProtocolViolation(e.to_string()))?
    } else if fields.contains_key("status_code") {
        serde_json::from_value::<Response>(Value::Object(fields))
            .map(Message::Response)
            .map_err(|e| ChatError::ProtocolViolation(e.to_string()))?
    } else {
        return Err(ChatError::ProtocolViolation(
            "object has neither `action` nor `status_code`".to_string(),
        ));
    };

    message.validate()?;
    Ok(message)
}

/// Encode a unit for a single socket write.
pub fn encode(message: &Message) -> Result<Vec<u8>, ChatError> {
    serde_json::to_vec(message).map_err(|e| ChatError::ProtocolViolation(e.to_string()))
}

impl Message {
    /// Names must be non-empty; serde already checked presence and types.
    fn validate(&self) -> Result<(), ChatError> {
        let Message::Request(request) = self else {
            return Ok(());
        };

        let names: Vec<(&str, &str)> = match request {
            Request::Presence { user, .. } => {
                vec![("user.account_name", user.account_name.as_str())]
            }
            Request::Chat(chat) => vec![
                ("from", chat.sender.as_str()),
                ("to", chat.destination.as_str()),
            ],
            Request::Exit { account_name, .. } => vec![("account_name", account_name.as_str())],
        };

        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(ChatError::ProtocolViolation(format!("empty `{field}`")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence(name: &str) -> Message {
        Request::Presence {
            time: 1_700_000_000.25,
            user: Account {
                account_name: name.to_string(),
            },
        }
        .into()
    }

    #[test]
    fn decodes_presence_from_existing_clients() {
        let raw = br#"{"action": "presence", "time": 1700000000.25, "user": {"account_name": "alice", "status": "here"}}"#;
        assert_eq!(decode(raw).unwrap(), presence("alice"));
    }

    #[test]
    fn decodes_chat_with_wire_key_names() {
        let raw = br#"{"action":"message","time":5,"from":"alice","to":"bob","message_text":"hi"}"#;
        let Message::Request(Request::Chat(chat)) = decode(raw).unwrap() else {
            panic!("expected a chat");
        };
        assert_eq!(chat.sender, "alice");
        assert_eq!(chat.destination, "bob");
        assert_eq!(chat.text, "hi");
        assert_eq!(chat.time, 5.0);
    }

    #[test]
    fn decodes_exit_with_and_without_time() {
        let bare = decode(br#"{"action":"exit","account_name":"alice"}"#).unwrap();
        assert_eq!(
            bare,
            Message::Request(Request::Exit {
                account_name: "alice".into(),
                time: None,
            })
        );

        let timed = decode(br#"{"action":"exit","time":2.5,"account_name":"alice"}"#).unwrap();
        assert!(matches!(
            timed,
            Message::Request(Request::Exit { time: Some(t), .. }) if t == 2.5
        ));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = decode(b"{\"action\": \"presence\"").unwrap_err();
        assert!(matches!(err, ChatError::MalformedPayload(_)));

        let err = decode(&[0xff, 0xfe, b'{']).unwrap_err();
        assert!(matches!(err, ChatError::MalformedPayload(_)));
    }

    #[test]
    fn non_object_json_is_malformed() {
        let cases: [&[u8]; 4] = [b"[1, 2, 3]", b"\"presence\"", b"42", b"null"];
        for raw in cases {
            let err = decode(raw).unwrap_err();
            assert!(matches!(err, ChatError::MalformedPayload(_)), "{raw:?}");
        }
    }

    #[test]
    fn two_units_in_one_read_are_malformed() {
        let raw = br#"{"action":"exit","account_name":"a"}{"action":"exit","account_name":"b"}"#;
        assert!(matches!(
            decode(raw).unwrap_err(),
            ChatError::MalformedPayload(_)
        ));
    }

    #[test]
    fn missing_fields_are_protocol_violations() {
        let cases: [&[u8]; 5] = [
            br#"{"action":"presence","time":1}"#,
            br#"{"action":"presence","user":{"account_name":"a"}}"#,
            br#"{"action":"message","time":1,"from":"a","to":"b"}"#,
            br#"{"action":"exit"}"#,
            br#"{"hello":"world"}"#,
        ];
        for raw in cases {
            let err = decode(raw).unwrap_err();
            assert!(matches!(err, ChatError::ProtocolViolation(_)), "{err}");
        }
    }

    #[test]
    fn unknown_action_is_a_protocol_violation() {
        let err = decode(br#"{"action":"join","room":"lobby"}"#).unwrap_err();
        assert!(matches!(err, ChatError::ProtocolViolation(_)));
    }

    #[test]
    fn empty_names_are_protocol_violations() {
        let err = decode(br#"{"action":"presence","time":1,"user":{"account_name":"  "}}"#)
            .unwrap_err();
        assert!(matches!(err, ChatError::ProtocolViolation(_)));

        let err = decode(br#"{"action":"message","time":1,"from":"a","to":"","message_text":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, ChatError::ProtocolViolation(_)));
    }

    #[test]
    fn replies_omit_absent_error() {
        let raw = encode(&Response::ok().into()).unwrap();
        let value: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value, serde_json::json!({"status_code": 200, "status": "OK"}));

        let raw = encode(&Response::bad_request("name taken").into()).unwrap();
        let value: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"status_code": 400, "status": "Bad Request", "error": "name taken"})
        );
    }

    #[test]
    fn every_variant_survives_encode_then_decode() {
        let messages = [
            presence("alice"),
            Chat {
                time: 3.5,
                sender: "alice".into(),
                destination: "bob".into(),
                text: "héllo {\"quoted\"}".into(),
            }
            .into(),
            Request::Exit {
                account_name: "alice".into(),
                time: None,
            }
            .into(),
            Response::ok().into(),
            Response::bad_request("malformed request").into(),
        ];

        for message in messages {
            let bytes = encode(&message).unwrap();
            assert!(bytes.len() <= DEFAULT_MAX_MESSAGE_LEN);
            assert_eq!(decode(&bytes).unwrap(), message);
        }
    }
}
