//! Newline-delimited JSON frames exchanged between a controller and a worker.
//!
//! ```text
//! greeting  {"name":"backhaul","service":"local","version":"0.2.0"}
//! request   {"cmd":"configOption","param":["repo1-cipher-type"]}
//! success   {} | {"out":<value>}
//! error     {"err":39,"out":"invalid command 'bogus'","errStack":"..."}
//! ```
//!
//! The codec knows nothing about what a command means, it only tells the
//! documented top-level keys apart.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Identity every server announces in its greeting.
pub const PROTOCOL_NAME: &str = "backhaul";
/// Engine version; client and server must match exactly.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const GREETING_NAME: &str = "name";
pub const GREETING_SERVICE: &str = "service";
pub const GREETING_VERSION: &str = "version";

pub const KEY_COMMAND: &str = "cmd";
pub const KEY_PARAM: &str = "param";
pub const KEY_OUTPUT: &str = "out";
pub const KEY_ERROR: &str = "err";
pub const KEY_ERROR_STACK: &str = "errStack";

/// First frame a server writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    pub name: String,
    pub service: String,
    pub version: String,
}

impl Greeting {
    /// Greeting carrying this engine's own identity and version.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            name: PROTOCOL_NAME.to_owned(),
            service: service.into(),
            version: PROTOCOL_VERSION.to_owned(),
        }
    }
}

/// Controller to worker request. `param` is omitted when empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub param: Vec<Value>,
}

/// Worker to controller response.
///
/// `out: None` means the key was absent, `Some(Value::Null)` is an explicit
/// null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub out: Option<Value>,
    #[serde(
        rename = "errStack",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub err_stack: Option<Value>,
}

/// Keeps an explicit `null` as `Some(Value::Null)` so it stays distinct from an
/// absent key.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Response {
    pub fn success(out: Option<Value>) -> Self {
        Self { err: None, out, err_stack: None }
    }

    pub fn error(code: i64, message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            err: Some(code),
            out: Some(Value::String(message.into())),
            err_stack: Some(Value::String(stack.into())),
        }
    }
}

/// Any frame the protocol knows about.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Greeting(Greeting),
    Request(Request),
    Response(Response),
}

/// Serialises a message into a single line (without the trailing newline).
pub fn encode(message: &Message) -> Result<String> {
    let encoded = match message {
        Message::Greeting(greeting) => serde_json::to_string(greeting),
        Message::Request(request) => serde_json::to_string(request),
        Message::Response(response) => serde_json::to_string(response),
    };
    encoded.map_err(|e| Error::Framing(format!("unable to encode frame: {e}")))
}

/// Parses a line into a JSON object, failing with a framing error that quotes
/// the offending text.
pub fn decode_object(frame: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(frame) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::Framing(format!("expected object at '{frame}'"))),
        Err(e) => Err(Error::Framing(format!("unable to parse frame '{frame}': {e}"))),
    }
}

/// Classifies a frame by its top-level keys.
pub fn decode(frame: &str) -> Result<Message> {
    let map = decode_object(frame)?;

    let typed = |what: &str, e: serde_json::Error| {
        Error::Framing(format!("invalid {what} frame '{frame}': {e}"))
    };

    if map.contains_key(KEY_COMMAND) {
        serde_json::from_value(Value::Object(map))
            .map(Message::Request)
            .map_err(|e| typed("request", e))
    } else if map.contains_key(GREETING_NAME) {
        serde_json::from_value(Value::Object(map))
            .map(Message::Greeting)
            .map_err(|e| typed("greeting", e))
    } else {
        serde_json::from_value(Value::Object(map))
            .map(Message::Response)
            .map_err(|e| typed("response", e))
    }
}

/// Decodes a frame that must be a request.
pub fn decode_request(frame: &str) -> Result<Request> {
    match decode(frame)? {
        Message::Request(request) => Ok(request),
        _ => Err(Error::Protocol(format!("expected request frame but got '{frame}'"))),
    }
}

/// Decodes a frame that must be a response.
pub fn decode_response(frame: &str) -> Result<Response> {
    match decode(frame)? {
        Message::Response(response) => Ok(response),
        _ => Err(Error::Protocol(format!("expected response frame but got '{frame}'"))),
    }
}
