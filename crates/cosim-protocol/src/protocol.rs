//! Wire types for the firmware protocol.
//!
//! Every exchange is one request line and one reply line, each a JSON
//! object terminated by `\n`:
//!
//! ```text
//! -> {"type": "px4.Configuration", "payload": {...}}
//! <- {"Success": {"type": "px4.States", "value": [...]}}
//! <- {"Failure": "mission rejected"}
//! <- {"Rejected": {"expected": "px4.Configuration", "received": "px4.Reset"}}
//! ```
//!
//! The `type` tags carry [`Message::TYPE`] so each side can check it is
//! talking about the message it expects. `Rejected` is the server refusing a
//! request of the wrong type; the handler never saw it.

use crate::error::{ProtocolError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Longest slice of an offending frame quoted in an error.
const QUOTE_LIMIT: usize = 120;

/// A value that can travel over the protocol.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type identity carried on the wire.
    const TYPE: &'static str;
}

/// Outbound application message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RequestFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl RequestFrame {
    pub fn new<M: Message>(message: &M) -> Result<Self> {
        Ok(Self {
            kind: M::TYPE.to_string(),
            payload: serde_json::to_value(message)?,
        })
    }

    /// Decode the payload, rejecting frames of another type.
    pub fn into_message<M: Message>(self) -> Result<M> {
        if self.kind != M::TYPE {
            return Err(ProtocolError::MessageTypeMismatch {
                expected: M::TYPE.to_string(),
                actual: self.kind,
            });
        }
        Ok(serde_json::from_value(self.payload)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TypedValue {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Rejection {
    pub expected: String,
    pub received: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum ReplyFrame {
    Success(TypedValue),
    Failure(String),
    Rejected(Rejection),
}

impl ReplyFrame {
    /// Reply to a request whose type tag is not the served one.
    pub fn rejected(expected: impl Into<String>, received: impl Into<String>) -> Self {
        ReplyFrame::Rejected(Rejection {
            expected: expected.into(),
            received: received.into(),
        })
    }
}

/// Outcome of a firmware exchange as carried on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope<T> {
    /// The handler returned a value.
    Success(T),
    /// The handler failed with this reason.
    Failure(String),
}

impl<T: Message> Envelope<T> {
    /// Unwrap, turning a failure into [`ProtocolError::Firmware`].
    pub fn into_result(self) -> Result<T> {
        match self {
            Envelope::Success(value) => Ok(value),
            Envelope::Failure(reason) => Err(ProtocolError::Firmware(reason)),
        }
    }

    pub(crate) fn to_frame(&self) -> Result<ReplyFrame> {
        Ok(match self {
            Envelope::Success(value) => ReplyFrame::Success(TypedValue {
                kind: T::TYPE.to_string(),
                value: serde_json::to_value(value)?,
            }),
            Envelope::Failure(reason) => ReplyFrame::Failure(reason.clone()),
        })
    }

    /// Decode one reply line.
    ///
    /// A success carrying a different type tag than `T::TYPE` is a
    /// [`ProtocolError::ResponseTypeMismatch`], a `Rejected` reply is the
    /// server's [`ProtocolError::MessageTypeMismatch`], and anything else is
    /// a [`ProtocolError::ResponseShape`].
    pub fn decode(line: &str) -> Result<Self> {
        let line = line.trim();
        let frame: ReplyFrame =
            serde_json::from_str(line).map_err(|_| ProtocolError::ResponseShape(quote(line)))?;

        match frame {
            ReplyFrame::Failure(reason) => Ok(Envelope::Failure(reason)),
            ReplyFrame::Rejected(rejection) => Err(ProtocolError::MessageTypeMismatch {
                expected: rejection.expected,
                actual: rejection.received,
            }),
            ReplyFrame::Success(typed) if typed.kind != T::TYPE => {
                Err(ProtocolError::ResponseTypeMismatch {
                    expected: T::TYPE.to_string(),
                    actual: typed.kind,
                })
            }
            ReplyFrame::Success(typed) => Ok(Envelope::Success(serde_json::from_value(typed.value)?)),
        }
    }
}

impl<T, E: std::fmt::Display> From<std::result::Result<T, E>> for Envelope<T> {
    fn from(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(value) => Envelope::Success(value),
            Err(e) => Envelope::Failure(e.to_string()),
        }
    }
}

fn quote(line: &str) -> String {
    match line.char_indices().nth(QUOTE_LIMIT) {
        Some((idx, _)) => format!("{}...", &line[..idx]),
        None => line.to_string(),
    }
}

/// Write one frame followed by a newline and flush.
pub(crate) async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(frame)?;
    tracing::trace!(frame = %line, "Writing frame");
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
