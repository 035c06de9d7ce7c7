use crate::{Result, constants::DISPLAY_TIMESTAMP_FORMAT, error::Error};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Fixed position a physical scanner is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerRole {
    /// Scanner reading from below the conveyor.
    Bottom,

    /// Scanner reading from above the conveyor.
    Top,
}

impl ScannerRole {
    /// Both roles, bottom first.
    pub const ALL: [ScannerRole; 2] = [ScannerRole::Bottom, ScannerRole::Top];

    /// Lowercase name used in configuration and events.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ScannerRole::Bottom => "bottom",
            ScannerRole::Top => "top",
        }
    }

    /// TCP port assumed when only an IP is configured for this role.
    #[must_use]
    pub fn default_port(&self) -> u16 {
        match self {
            ScannerRole::Bottom => crate::constants::DEFAULT_BOTTOM_SCANNER_PORT,
            ScannerRole::Top => crate::constants::DEFAULT_TOP_SCANNER_PORT,
        }
    }
}

impl fmt::Display for ScannerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScannerRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bottom" => Ok(ScannerRole::Bottom),
            "top" => Ok(ScannerRole::Top),
            other => Err(Error::UnknownRole(other.to_string())),
        }
    }
}

/// Network address identifying one scanner (host + TCP port).
///
/// Scanner state is keyed by this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawAddress")]
pub struct ScannerAddress {
    host: String,
    port: u16,
}

#[derive(Deserialize)]
struct RawAddress {
    host: String,
    port: u16,
}

impl TryFrom<RawAddress> for ScannerAddress {
    type Error = Error;

    fn try_from(raw: RawAddress) -> Result<Self> {
        ScannerAddress::new(raw.host, raw.port)
    }
}

impl ScannerAddress {
    /// Create a new address.
    ///
    /// # Errors
    /// Returns `Error::InvalidAddress` if the host is empty or the port is 0.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into().trim().to_string();
        if host.is_empty() {
            return Err(Error::InvalidAddress("host must not be empty".to_string()));
        }
        if port == 0 {
            return Err(Error::InvalidAddress(format!("{host}: port must be 1-65535")));
        }
        Ok(Self { host, port })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ScannerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for ScannerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidAddress(format!("missing port in {s}")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidAddress(format!("invalid port in {s}")))?;
        ScannerAddress::new(host, port)
    }
}

/// A barcode as read from a scanner, normalized for safe downstream embedding.
///
/// Normalization decodes the raw bytes as ASCII (non-ASCII bytes become the
/// replacement character), HTML-escapes `& < > " '`, then strips surrounding
/// whitespace including the line terminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Barcode(String);

impl Barcode {
    /// Normalize raw scanner bytes into a barcode.
    ///
    /// Returns `None` if nothing is left after stripping whitespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use scanbridge_core::Barcode;
    ///
    /// let barcode = Barcode::normalize(b"  ABC123\r\n").unwrap();
    /// assert_eq!(barcode.as_str(), "ABC123");
    ///
    /// assert!(Barcode::normalize(b"\r\n").is_none());
    /// ```
    #[must_use]
    pub fn normalize(raw: &[u8]) -> Option<Self> {
        let text: String = raw
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
            .collect();
        let escaped = escape_html(&text);
        let trimmed = escaped.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Barcode(trimmed.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wire form sent to the inspection machine: the barcode followed by CR LF.
    #[must_use]
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.0.len() + 2);
        line.extend_from_slice(self.0.as_bytes());
        line.extend_from_slice(crate::constants::LINE_TERMINATOR);
        line
    }
}

impl fmt::Display for Barcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// The single retained history entry of a scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BarcodeEntry {
    pub barcode: Barcode,

    #[serde(serialize_with = "serialize_display_timestamp")]
    pub timestamp: DateTime<Local>,
}

impl BarcodeEntry {
    pub fn new(barcode: Barcode, timestamp: DateTime<Local>) -> Self {
        Self { barcode, timestamp }
    }
}

/// Format a wall-clock time the way notification events carry it.
#[must_use]
pub fn display_timestamp(at: &DateTime<Local>) -> String {
    at.format(DISPLAY_TIMESTAMP_FORMAT).to_string()
}

fn serialize_display_timestamp<S: Serializer>(
    at: &DateTime<Local>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&display_timestamp(at))
}
