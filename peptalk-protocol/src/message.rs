//! PepTalk commands, responses and inbound message decoding.

use crate::error::{PepError, RequestId};
use crate::escape::{escape, unescape};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an inserted, copied or moved node lands relative to its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    First,
    Last,
    Before,
    After,
}

impl Location {
    /// Serializes the location, with its sibling for `before`/`after`.
    ///
    /// `before`/`after` without a sibling would produce a malformed request
    /// and is rejected before anything is sent.
    pub fn encode(self, sibling: Option<&str>) -> Result<String, PepError> {
        match (self, sibling) {
            (Location::First, _) => Ok("first".to_string()),
            (Location::Last, _) => Ok("last".to_string()),
            (Location::Before, Some(s)) => Ok(format!("before {}", escape(s))),
            (Location::After, Some(s)) => Ok(format!("after {}", escape(s))),
            (location, None) => Err(PepError::unspecified(
                RequestId::Wildcard,
                format!("location '{}' requires a sibling", location),
                None,
            )),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::First => write!(f, "first"),
            Location::Last => write!(f, "last"),
            Location::Before => write!(f, "before"),
            Location::After => write!(f, "after"),
        }
    }
}

/// A PepTalk command, without the request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get {
        path: String,
        depth: Option<u32>,
    },
    SetText {
        path: String,
        text: String,
    },
    SetAttribute {
        path: String,
        key: String,
        value: String,
    },
    Insert {
        path: String,
        xml: String,
        location: Location,
        sibling: Option<String>,
    },
    Delete {
        path: String,
    },
    Copy {
        source: String,
        dest: String,
        location: Location,
        sibling: Option<String>,
    },
    Move {
        source: String,
        dest: String,
        location: Location,
        sibling: Option<String>,
    },
    Replace {
        path: String,
        xml: String,
    },
    EnsurePath {
        path: String,
    },
    Uri {
        path: String,
        uri_type: String,
        base: Option<String>,
    },
    Protocol {
        capabilities: Vec<String>,
    },
    Reinitialize,
    Close,
    /// Pre-formatted command text, sent as is.
    Raw(String),
}

impl Command {
    /// Encodes the command into request text (without id or line terminator).
    pub fn encode(&self) -> Result<String, PepError> {
        let text = match self {
            Command::Get { path, depth } => match depth {
                Some(depth) => format!("get {} {}", escape(path), depth),
                None => format!("get {}", escape(path)),
            },
            Command::SetText { path, text } => {
                format!("set text {} {}", escape(path), escape(text))
            }
            Command::SetAttribute { path, key, value } => format!(
                "set attribute {} {} {}",
                escape(path),
                escape(key),
                escape(value)
            ),
            Command::Insert {
                path,
                xml,
                location,
                sibling,
            } => format!(
                "insert {} {} {}",
                escape(path),
                location.encode(sibling.as_deref())?,
                escape(xml)
            ),
            Command::Delete { path } => format!("delete {}", escape(path)),
            Command::Copy {
                source,
                dest,
                location,
                sibling,
            } => format!(
                "copy {} {} {}",
                escape(source),
                escape(dest),
                location.encode(sibling.as_deref())?
            ),
            Command::Move {
                source,
                dest,
                location,
                sibling,
            } => format!(
                "move {} {} {}",
                escape(source),
                escape(dest),
                location.encode(sibling.as_deref())?
            ),
            Command::Replace { path, xml } => {
                format!("replace {} {}", escape(path), escape(xml))
            }
            Command::EnsurePath { path } => format!("ensure-path {}", escape(path)),
            Command::Uri {
                path,
                uri_type,
                base,
            } => match base {
                Some(base) => format!("uri {} {} {}", escape(path), uri_type, escape(base)),
                None => format!("uri {} {}", escape(path), uri_type),
            },
            Command::Protocol { capabilities } => {
                if capabilities.is_empty() {
                    "protocol".to_string()
                } else {
                    format!("protocol {}", capabilities.join(" "))
                }
            }
            Command::Reinitialize => "reinitialize".to_string(),
            Command::Close => "close".to_string(),
            Command::Raw(text) => text.clone(),
        };
        Ok(text)
    }
}

/// A successful response, paired with the request that produced it.
/// Failures travel as [`PepError`](crate::PepError) instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    /// Request text as sent (without id).
    pub sent: String,
    pub body: String,
}

impl Response {
    pub fn ok(id: u64, sent: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            sent: sent.into(),
            body: body.into(),
        }
    }
}

/// Outcome carried by a numbered response line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// `ok`, with the unescaped body.
    Ok(String),
    /// `protocol ...`, the full remainder verbatim.
    Protocol(String),
    /// Anything else. `kind` is `None` when no `error <kind>` could be found.
    Error {
        kind: Option<String>,
        description: String,
    },
}

impl Outcome {
    /// Resolves this outcome against the request it answers.
    pub fn into_result(self, id: u64, sent: &str) -> Result<Response, PepError> {
        match self {
            Outcome::Ok(body) | Outcome::Protocol(body) => Ok(Response::ok(id, sent, body)),
            Outcome::Error {
                kind: Some(kind),
                description,
            } => Err(PepError::from_server(
                id,
                &kind,
                description,
                Some(sent.to_string()),
            )),
            Outcome::Error {
                kind: None,
                description,
            } => Err(PepError::unspecified(id, description, Some(sent.to_string()))),
        }
    }
}

/// A decoded inbound line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboundMessage {
    /// Answer to the request with this id.
    Response { id: u64, outcome: Outcome },
    /// Server-pushed message, not tied to a waiting request.
    Event { id: RequestId, body: String },
}

/// `error` must start within this many characters of the response remainder.
const ERROR_KEYWORD_WINDOW: usize = 10;

/// Decodes one complete line. Returns `None` for lines that carry nothing.
pub fn parse_line(line: &str) -> Option<InboundMessage> {
    let (head, rest) = line.split_once(' ')?;
    if head.is_empty() {
        return None;
    }

    let id = match head.parse::<u64>() {
        Ok(id) => id,
        Err(_) => {
            return Some(InboundMessage::Event {
                id: RequestId::Wildcard,
                body: rest.to_string(),
            })
        }
    };

    if rest.starts_with("begin") {
        return Some(InboundMessage::Event {
            id: RequestId::Wildcard,
            body: "begin".to_string(),
        });
    }

    let outcome = if let Some(body) = rest.strip_prefix("ok") {
        Outcome::Ok(unescape(body.strip_prefix(' ').unwrap_or(body)))
    } else if rest.starts_with("protocol") {
        Outcome::Protocol(rest.to_string())
    } else {
        parse_error(rest)
    };

    Some(InboundMessage::Response { id, outcome })
}

fn parse_error(rest: &str) -> Outcome {
    match rest.find("error") {
        Some(index) if index <= ERROR_KEYWORD_WINDOW => {
            let after = rest[index + "error".len()..].trim_start();
            let (kind, description) = after.split_once(' ').unwrap_or((after, ""));
            if kind.is_empty() {
                return Outcome::Error {
                    kind: None,
                    description: rest.to_string(),
                };
            }
            Outcome::Error {
                kind: Some(kind.to_string()),
                description: unescape(description),
            }
        }
        _ => Outcome::Error {
            kind: None,
            description: rest.to_string(),
        },
    }
}

impl InboundMessage {
    pub fn id(&self) -> RequestId {
        match self {
            InboundMessage::Response { id, .. } => RequestId::Id(*id),
            InboundMessage::Event { id, .. } => *id,
        }
    }
}
