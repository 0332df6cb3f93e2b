//! SIWE (EIP-4361 style) challenge message: construction and parsing.
//!
//! The message is the only transport for domain, chain id and nonce, so the
//! verifier reads them back out of the signed text. Rendering and parsing share
//! the label constants below; a layout change must touch both halves of this file.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

/// Suffix of the first line, after the requesting domain.
pub const HEADER_SUFFIX: &str = " wants you to sign in with your Ethereum account:";

const HEADER_MARKER: &str = " wants you to sign in";
const URI: &str = "URI";
const VERSION: &str = "Version";
const CHAIN_ID: &str = "Chain ID";
const NONCE: &str = "Nonce";
const ISSUED_AT: &str = "Issued At";
const EXPIRATION_TIME: &str = "Expiration Time";

/// Message version written when none is given.
pub const DEFAULT_VERSION: &str = "1";

/// Statement written when none is given.
pub const DEFAULT_STATEMENT: &str = "Sign in to continue";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field: {0}")]
    InvalidField(&'static str),

    #[error("Unexpected line: {0}")]
    UnexpectedLine(String),
}

/// A sign-in challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiweMessage {
    pub domain: String,
    pub address: String,
    pub statement: String,
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expiration_time: Option<DateTime<Utc>>,
}

impl SiweMessage {
    /// Create a challenge issued now, version "1", default statement, no expiry.
    pub fn new(
        domain: impl Into<String>,
        address: impl Into<String>,
        uri: impl Into<String>,
        chain_id: u64,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            address: address.into(),
            statement: DEFAULT_STATEMENT.to_string(),
            uri: uri.into(),
            version: DEFAULT_VERSION.to_string(),
            chain_id,
            nonce: nonce.into(),
            issued_at: Utc::now(),
            expiration_time: None,
        }
    }

    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = statement.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at;
        self
    }

    pub fn expires_at(mut self, expiration_time: DateTime<Utc>) -> Self {
        self.expiration_time = Some(expiration_time);
        self
    }

    /// Parse a message produced by the `Display` impl back into its fields.
    pub fn parse(message: &str) -> Result<Self, MessageError> {
        let mut lines = message.split('\n');

        let domain = lines
            .next()
            .and_then(|line| line.strip_suffix(HEADER_SUFFIX))
            .ok_or(MessageError::MissingField("domain"))?;
        let address = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or(MessageError::MissingField("address"))?;
        expect_blank(lines.next())?;

        let statement = lines
            .next()
            .filter(|line| field_value(line, URI).is_none())
            .ok_or(MessageError::MissingField("statement"))?;
        expect_blank(lines.next())?;

        let uri = required(lines.next(), URI)?;
        let version = required(lines.next(), VERSION)?;
        let chain_id = required(lines.next(), CHAIN_ID)?
            .parse::<u64>()
            .map_err(|_| MessageError::InvalidField(CHAIN_ID))?;
        let nonce = required(lines.next(), NONCE)?;
        if !is_nonce_token(nonce) {
            return Err(MessageError::InvalidField(NONCE));
        }
        let issued_at = parse_timestamp(required(lines.next(), ISSUED_AT)?, ISSUED_AT)?;
        let expiration_time = match lines.next() {
            Some(line) => {
                let value = required(Some(line), EXPIRATION_TIME)
                    .map_err(|_| MessageError::UnexpectedLine(line.to_string()))?;
                Some(parse_timestamp(value, EXPIRATION_TIME)?)
            }
            None => None,
        };
        if let Some(extra) = lines.next() {
            return Err(MessageError::UnexpectedLine(extra.to_string()));
        }

        Ok(Self {
            domain: domain.to_string(),
            address: address.to_string(),
            statement: statement.to_string(),
            uri: uri.to_string(),
            version: version.to_string(),
            chain_id,
            nonce: nonce.to_string(),
            issued_at,
            expiration_time,
        })
    }
}

impl fmt::Display for SiweMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}{HEADER_SUFFIX}", self.domain)?;
        writeln!(f, "{}", self.address)?;
        writeln!(f)?;
        writeln!(f, "{}", self.statement)?;
        writeln!(f)?;
        writeln!(f, "{URI}: {}", self.uri)?;
        writeln!(f, "{VERSION}: {}", self.version)?;
        writeln!(f, "{CHAIN_ID}: {}", self.chain_id)?;
        writeln!(f, "{NONCE}: {}", self.nonce)?;
        write!(f, "{ISSUED_AT}: {}", format_timestamp(&self.issued_at))?;
        if let Some(expiration_time) = &self.expiration_time {
            write!(f, "\n{EXPIRATION_TIME}: {}", format_timestamp(expiration_time))?;
        }
        Ok(())
    }
}

/// Render the canonical challenge string.
pub fn build_message(message: &SiweMessage) -> String {
    message.to_string()
}

/// Requesting domain: the text of the first line before " wants you to sign in".
pub fn extract_domain(message: &str) -> Option<&str> {
    let first_line = message.lines().next()?.trim();
    first_line
        .split_once(HEADER_MARKER)
        .map(|(domain, _)| domain)
}

/// Nonce from the first `Nonce:` line after the header.
pub fn extract_nonce(message: &str) -> Option<&str> {
    let value = find_field(message, NONCE)?;
    let end = value
        .find(|c: char| !is_nonce_char(c))
        .unwrap_or(value.len());
    let nonce = &value[..end];
    (!nonce.is_empty()).then_some(nonce)
}

/// Chain id from the first `Chain ID:` line after the header.
pub fn extract_chain_id(message: &str) -> Option<u64> {
    let value = find_field(message, CHAIN_ID)?;
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn find_field<'a>(message: &'a str, label: &str) -> Option<&'a str> {
    message
        .split('\n')
        .skip(1)
        .find_map(|line| field_value(line, label))
        .map(str::trim_start)
}

fn field_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    line.strip_prefix(label)?.strip_prefix(':')
}

fn required<'a>(line: Option<&'a str>, label: &'static str) -> Result<&'a str, MessageError> {
    line.and_then(|line| field_value(line, label))
        .and_then(|value| value.strip_prefix(' '))
        .ok_or(MessageError::MissingField(label))
}

fn expect_blank(line: Option<&str>) -> Result<(), MessageError> {
    match line {
        Some("") => Ok(()),
        Some(other) => Err(MessageError::UnexpectedLine(other.to_string())),
        None => Err(MessageError::MissingField(URI)),
    }
}

fn parse_timestamp(value: &str, label: &'static str) -> Result<DateTime<Utc>, MessageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| MessageError::InvalidField(label))
}

fn is_nonce_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

fn is_nonce_token(value: &str) -> bool {
    !value.is_empty() && value.chars().all(is_nonce_char)
}
