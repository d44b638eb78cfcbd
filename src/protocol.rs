//! Node-to-collector line protocol
//!
//! One message per line, fields separated by `;`, CRLF on the wire:
//!
//! ```text
//! Nodo_1;HELLO
//! Nodo_1;C=17
//! ```
//!
//! [`LineFramer`] rebuilds lines from the raw byte stream of a link.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier a sensing node puts in front of every message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form without underscores used in status output ("Nodo_1" -> "nodo1")
    pub fn status_key(&self) -> String {
        self.0
            .chars()
            .filter(|c| *c != '_')
            .flat_map(char::to_lowercase)
            .collect()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("missing ';' separator in {0:?}")]
    MissingSeparator(String),

    #[error("payload {0:?} is neither HELLO nor C=<count>")]
    MissingCount(String),

    #[error("invalid count {0:?}")]
    InvalidCount(String),

    #[error("empty node identifier in {0:?}")]
    EmptyNodeId(String),
}

const HELLO: &str = "HELLO";
const COUNT_PREFIX: &str = "C=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeMessage {
    /// Sent once after start-up
    Hello { node: NodeId },
    /// Valid events since the previous report
    Count { node: NodeId, count: u32 },
}

impl NodeMessage {
    pub fn node(&self) -> &NodeId {
        match self {
            NodeMessage::Hello { node } | NodeMessage::Count { node, .. } => node,
        }
    }

    /// Line without terminator
    pub fn to_line(&self) -> String {
        self.to_string()
    }

    /// Line as written to the link, CRLF-terminated
    pub fn to_wire(&self) -> String {
        format!("{}\r\n", self)
    }

    pub fn parse_line(line: &str) -> Result<Self, ProtocolError> {
        line.parse()
    }
}

impl fmt::Display for NodeMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeMessage::Hello { node } => write!(f, "{};{}", node, HELLO),
            NodeMessage::Count { node, count } => write!(f, "{};{}{}", node, COUNT_PREFIX, count),
        }
    }
}

impl FromStr for NodeMessage {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (node, payload) = line
            .split_once(';')
            .ok_or_else(|| ProtocolError::MissingSeparator(line.to_string()))?;

        let node = node.trim();
        if node.is_empty() {
            return Err(ProtocolError::EmptyNodeId(line.to_string()));
        }
        let node = NodeId::new(node);

        let payload = payload.trim();
        if payload == HELLO {
            return Ok(NodeMessage::Hello { node });
        }

        let digits = payload
            .strip_prefix(COUNT_PREFIX)
            .ok_or_else(|| ProtocolError::MissingCount(payload.to_string()))?;
        // u32::from_str accepts a leading '+', the wire format does not
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidCount(digits.to_string()));
        }
        let count = digits
            .parse()
            .map_err(|_| ProtocolError::InvalidCount(digits.to_string()))?;

        Ok(NodeMessage::Count { node, count })
    }
}

/// Splits a link's byte stream into trimmed text lines.
///
/// Only printable ASCII is kept; CR or LF ends a line, so CRLF yields one line.
/// A line longer than `max_len` is dropped whole.
#[derive(Debug, Clone)]
pub struct LineFramer {
    current: String,
    max_len: usize,
    overflowed: bool,
}

impl LineFramer {
    pub fn new(max_len: usize) -> Self {
        Self {
            current: String::new(),
            max_len,
            overflowed: false,
        }
    }

    /// Feed bytes, returning every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            match b {
                b'\r' | b'\n' => {
                    if self.overflowed {
                        tracing::warn!("Discarding line longer than {} bytes", self.max_len);
                    } else {
                        let line = self.current.trim();
                        if !line.is_empty() {
                            lines.push(line.to_string());
                        }
                    }
                    self.current.clear();
                    self.overflowed = false;
                }
                32..=126 => {
                    if self.current.len() < self.max_len {
                        self.current.push(b as char);
                    } else {
                        self.overflowed = true;
                    }
                }
                _ => {}
            }
        }
        lines
    }

    /// Bytes held for the line in progress
    pub fn pending(&self) -> &str {
        &self.current
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(256)
    }
}
