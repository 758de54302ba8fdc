//! Bridge frames.
//!
//! The bridge speaks JSON objects tagged by `type`. Clients send `send`,
//! `publish`, `register`, `unregister` and `ping`; the server answers with
//! `rec`, `err` and `pong`. Field names follow the bridge's camelCase wire
//! shape (`replyAddress`, `failureCode`, `failureType`).

use crate::Address;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Message headers. The bridge carries them as a flat string map.
pub type Headers = BTreeMap<String, String>;

/// Frames sent from client to bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Point-to-point delivery, optionally expecting a reply.
    Send {
        address: Address,
        #[serde(default)]
        headers: Headers,
        body: Value,
        #[serde(
            rename = "replyAddress",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        reply_address: Option<Address>,
    },
    /// Broadcast to every consumer of the address.
    Publish {
        address: Address,
        #[serde(default)]
        headers: Headers,
        body: Value,
    },
    /// Start receiving `rec` frames for an address.
    Register {
        address: Address,
        #[serde(default)]
        headers: Headers,
    },
    /// Stop receiving frames for an address.
    Unregister {
        address: Address,
        #[serde(default)]
        headers: Headers,
    },
    /// Keep-alive.
    Ping,
}

/// Frames sent from bridge to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A message delivered on an address the client registered (or a reply).
    Rec(Message),
    /// A failure, either for an address or for the connection as a whole.
    Err(Failure),
    /// Answer to a `ping`.
    Pong,
}

/// An inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub address: Address,
    #[serde(default)]
    pub body: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: Headers,
    #[serde(
        rename = "replyAddress",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reply_address: Option<Address>,
}

impl Message {
    pub fn new(address: Address, body: Value) -> Self {
        Self {
            address,
            body,
            headers: Headers::new(),
            reply_address: None,
        }
    }

    /// Decode the body into a concrete type.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }
}

/// A failure reported by the bridge.
///
/// Reply failures carry `failureCode`/`failureType`/`message`; access
/// rejections usually carry only a `body` such as `"access_denied"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(
        rename = "failureCode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub code: Option<i32>,
    #[serde(
        rename = "failureType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Failure {
    /// A failure carrying only a message.
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, &self.body) {
            (Some(message), _) => f.write_str(message)?,
            (None, Some(Value::String(body))) => f.write_str(body)?,
            (None, Some(body)) => write!(f, "{body}")?,
            (None, None) => f.write_str("unknown failure")?,
        }
        if let Some(kind) = &self.kind {
            write!(f, " ({kind}")?;
            if let Some(code) = self.code {
                write!(f, ", code {code}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl std::error::Error for Failure {}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
