//! Queue name parsing, normalization and formatting.
//!
//! A [`QueueName`] identifies a queue independent of any open handle. It
//! carries the queue-type classification, the addressing scheme, and both
//! the canonical wire-form name and the human path form. Parsing accepts
//! either form and normalizes, so equality is stable across input spelling.

use crate::error::FormatError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Queue-type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Private,
    Public,
    System,
}

/// How the queue's host is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AddressScheme {
    /// The local machine (`.`).
    Local,
    /// A named host resolved by the provider's own name service.
    Direct,
    /// A protocol-qualified address, e.g. `TCP:192.168.0.1`.
    Protocol(String),
}

/// An immutable, normalized queue identity.
///
/// Two names are equal iff their classification, base name and normalized
/// address agree; comparison is case-insensitive because all components are
/// lowercased during parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueName {
    kind: QueueKind,
    scheme: AddressScheme,
    address: String,
    name: String,
}

impl QueueName {
    /// Parse a path-style (`host\private$\name`) or canonical
    /// (`DIRECT=OS:host\PRIVATE$\name`) queue name.
    pub fn parse(input: &str) -> Result<Self, FormatError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(FormatError::queue_name(input, "empty name"));
        }
        let lower = trimmed.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("direct=") {
            Self::parse_canonical(input, rest)
        } else if lower.contains('=') {
            Err(FormatError::queue_name(
                input,
                "unsupported canonical prefix",
            ))
        } else {
            Self::parse_path(input, &lower)
        }
    }

    /// Build a private queue on the local machine.
    pub fn private_local(name: &str) -> Result<Self, FormatError> {
        Self::parse(&format!(".\\private$\\{}", name))
    }

    /// Queue-type classification.
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Addressing scheme.
    pub fn scheme(&self) -> &AddressScheme {
        &self.scheme
    }

    /// Normalized host address (`.` for local).
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The queue's base name.
    pub fn queue(&self) -> &str {
        &self.name
    }

    /// The fully qualified, provider-resolvable canonical form.
    pub fn canonical(&self) -> String {
        let proto = match &self.scheme {
            AddressScheme::Local | AddressScheme::Direct => "OS".to_string(),
            AddressScheme::Protocol(p) => p.to_ascii_uppercase(),
        };
        format!("DIRECT={}:{}\\{}", proto, self.address, self.suffix(true))
    }

    /// The human path form.
    pub fn path(&self) -> String {
        format!("{}\\{}", self.address, self.suffix(false))
    }

    fn suffix(&self, upper_keyword: bool) -> String {
        match self.kind {
            QueueKind::Private => {
                let keyword = if upper_keyword { "PRIVATE$" } else { "private$" };
                format!("{}\\{}", keyword, self.name)
            }
            QueueKind::Public | QueueKind::System => self.name.clone(),
        }
    }

    fn parse_canonical(original: &str, rest: &str) -> Result<Self, FormatError> {
        let (proto, location) = rest
            .split_once(':')
            .ok_or_else(|| FormatError::queue_name(original, "missing protocol separator"))?;
        if proto.is_empty() {
            return Err(FormatError::queue_name(original, "empty protocol"));
        }
        let mut segments = location.split('\\');
        let address = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FormatError::queue_name(original, "missing address"))?;
        let tail: Vec<&str> = segments.collect();
        let (kind, name) = Self::classify(original, &tail)?;
        let scheme = if address == "." {
            AddressScheme::Local
        } else if proto == "os" {
            AddressScheme::Direct
        } else {
            AddressScheme::Protocol(proto.to_string())
        };
        Ok(Self {
            kind,
            scheme,
            address: address.to_string(),
            name,
        })
    }

    fn parse_path(original: &str, lower: &str) -> Result<Self, FormatError> {
        let mut segments = lower.split('\\');
        let address = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FormatError::queue_name(original, "missing machine segment"))?;
        let tail: Vec<&str> = segments.collect();
        if tail.is_empty() {
            return Err(FormatError::queue_name(original, "missing queue segment"));
        }
        let (kind, name) = Self::classify(original, &tail)?;
        let scheme = if address == "." {
            AddressScheme::Local
        } else {
            AddressScheme::Direct
        };
        Ok(Self {
            kind,
            scheme,
            address: address.to_string(),
            name,
        })
    }

    fn classify(original: &str, tail: &[&str]) -> Result<(QueueKind, String), FormatError> {
        match tail {
            ["private$", name] => {
                Self::validate_segment(original, name)?;
                Ok((QueueKind::Private, (*name).to_string()))
            }
            [name] if *name == "system$" || name.starts_with("system$;") => {
                Ok((QueueKind::System, (*name).to_string()))
            }
            [name] => {
                Self::validate_segment(original, name)?;
                Ok((QueueKind::Public, (*name).to_string()))
            }
            _ => Err(FormatError::queue_name(original, "unrecognized queue path")),
        }
    }

    fn validate_segment(original: &str, segment: &str) -> Result<(), FormatError> {
        if segment.is_empty() {
            return Err(FormatError::queue_name(original, "empty queue segment"));
        }
        if segment
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '\\' | '/' | ':' | '='))
        {
            return Err(FormatError::queue_name(
                original,
                "illegal character in queue segment",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl FromStr for QueueName {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Serialized as the canonical string.
impl Serialize for QueueName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for QueueName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "name_tests.rs"]
mod tests;
