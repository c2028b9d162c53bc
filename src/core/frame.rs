//! Scale frame decoding.
//!
//! A raw frame is whatever the scale sent up to its end-of-frame marker. It
//! may carry control bytes and line noise around the useful part, which is a
//! status letter (`S` settled, `U` unsettled) and a decimal weight.

use std::fmt;

use regex::Regex;
use thiserror::Error;

/// Whether the scale reports the load as at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Settled,
    Unsettled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Settled => "S",
            Status::Unsettled => "U",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub status: Status,
    pub weight: f64,
}

impl Reading {
    pub fn new(status: Status, weight: f64) -> Self {
        Self { status, weight }
    }

    pub fn is_settled(&self) -> bool {
        self.status == Status::Settled
    }
}

/// Why a frame was discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("no status token in frame '{0}'")]
    MissingStatus(String),

    #[error("no weight token in frame '{0}'")]
    MissingWeight(String),

    #[error("weight token '{0}' is not a finite number")]
    InvalidWeight(String),
}

/// Decodes raw frames into [`Reading`]s. The patterns are compiled once.
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    status_re: Regex,
    weight_re: Regex,
}

impl FrameExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            status_re: Regex::new(r"[SU]")?,
            weight_re: Regex::new(r"[0-9]+(?:\.[0-9]+)?")?,
        })
    }

    /// Drops every byte outside printable ASCII (0x20..=0x7E).
    pub fn sanitize(raw: &[u8]) -> String {
        raw.iter()
            .copied()
            .filter(|b| (0x20..=0x7e).contains(b))
            .map(char::from)
            .collect()
    }

    /// Finds the status and weight tokens in already sanitized text.
    ///
    /// Both tokens are the leftmost matches and are searched independently,
    /// so their order in the frame does not matter.
    pub fn parse(&self, text: &str) -> Result<Reading, ParseFailure> {
        let status = match self.status_re.find(text).map(|m| m.as_str()) {
            Some("S") => Status::Settled,
            Some(_) => Status::Unsettled,
            None => return Err(ParseFailure::MissingStatus(text.to_string())),
        };

        let token = self
            .weight_re
            .find(text)
            .ok_or_else(|| ParseFailure::MissingWeight(text.to_string()))?
            .as_str();

        let weight: f64 = token
            .parse()
            .map_err(|_| ParseFailure::InvalidWeight(token.to_string()))?;
        if !weight.is_finite() {
            return Err(ParseFailure::InvalidWeight(token.to_string()));
        }

        Ok(Reading::new(status, weight))
    }

    /// Sanitizes and parses one raw frame.
    pub fn extract(&self, raw: &[u8]) -> Result<Reading, ParseFailure> {
        self.parse(&Self::sanitize(raw))
    }
}
