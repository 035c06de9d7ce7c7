//! Inbound endpoint configuration.
//!
//! The profile collaborator hands the bridge a JSON document with one output
//! section and up to two scanner endpoints:
//!
//! ```json
//! {
//!   "output": { "device": "/dev/ttyTHS2", "baud_rate": 9600 },
//!   "bottom": { "comm_type": "ethernet", "model": "MicroHAWK ID-40", "ip": "10.0.0.5", "port": 2001 },
//!   "top":    { "comm_type": "rs232", "device": "/dev/ttyUSB0", "baud_rate": 115200 }
//! }
//! ```
//!
//! Raw sections are kept loosely typed so that [`EndpointConfig::validate`]
//! can report every problem at once. Validation turns them into
//! [`ScannerEndpoint`] and [`SerialSettings`].

use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_OUTPUT_DEVICE, KNOWN_SCANNER_MODELS, OTHER_SCANNER_MODEL,
    STANDARD_BAUD_RATES,
};
use crate::error::{Error, Result};
use crate::types::{ScannerAddress, ScannerRole};

/// Transport of a scanner endpoint.
///
/// Anything other than `rs232` (case-insensitive) is read as ethernet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum CommType {
    #[default]
    Ethernet,
    Rs232,
}

impl From<String> for CommType {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case("rs232") {
            CommType::Rs232
        } else {
            CommType::Ethernet
        }
    }
}

/// Serial parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    #[serde(rename = "N")]
    None,
    #[serde(rename = "E")]
    Even,
    #[serde(rename = "O")]
    Odd,
}

impl Parity {
    /// Parse `N`, `E` or `O` (case-insensitive).
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter.trim().to_ascii_uppercase().as_str() {
            "N" => Some(Parity::None),
            "E" => Some(Parity::Even),
            "O" => Some(Parity::Odd),
            _ => None,
        }
    }

    pub fn as_letter(&self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }
}

impl std::str::FromStr for Parity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Parity::from_letter(s).ok_or_else(|| Error::Config(format!("parity must be N, E or O, got {s:?}")))
    }
}

/// Validated serial port parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_OUTPUT_DEVICE.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl SerialSettings {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: u8) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }
}

impl fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} {}{}{}",
            self.device,
            self.baud_rate,
            self.data_bits,
            self.parity.as_letter(),
            self.stop_bits
        )
    }
}

/// Raw serial fields shared by scanner and output sections.
struct RawSerial<'a> {
    device: Option<&'a str>,
    baud_rate: Option<u32>,
    byte_size: Option<u8>,
    stop_bits: Option<u8>,
    parity: Option<&'a str>,
}

impl RawSerial<'_> {
    /// Check every field, pushing one message per problem.
    fn check(&self, issues: &mut Vec<String>) -> Option<SerialSettings> {
        let start = issues.len();

        let device = self.device.map(str::trim).unwrap_or_default();
        let lower = device.to_ascii_lowercase();
        if device.is_empty() {
            issues.push("serial device path is required".to_string());
        } else if !(lower.starts_with("com") || lower.contains("tty")) {
            issues.push(format!("{device:?} is not a serial device path"));
        }

        let baud_rate = self.baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
        if !STANDARD_BAUD_RATES.contains(&baud_rate) {
            issues.push(format!("{baud_rate} is not a standard baud rate"));
        }

        let data_bits = self.byte_size.unwrap_or(8);
        if !(5..=8).contains(&data_bits) {
            issues.push(format!("byte size must be 5-8, got {data_bits}"));
        }

        let stop_bits = self.stop_bits.unwrap_or(1);
        if stop_bits != 1 && stop_bits != 2 {
            issues.push(format!("stop bits must be 1 or 2, got {stop_bits}"));
        }

        let parity = match self.parity {
            None => Parity::None,
            Some(letter) => Parity::from_letter(letter).unwrap_or_else(|| {
                issues.push(format!("parity must be N, E or O, got {letter:?}"));
                Parity::None
            }),
        };

        (issues.len() == start).then(|| SerialSettings {
            device: device.to_string(),
            baud_rate,
            data_bits,
            stop_bits,
            parity,
        })
    }
}

/// How a validated scanner endpoint is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerLink {
    Ethernet(ScannerAddress),
    Rs232(SerialSettings),
}

/// A scanner endpoint that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerEndpoint {
    pub role: ScannerRole,

    /// Known model name, or `Other Scanner`.
    pub model: String,

    pub name: Option<String>,
    pub link: ScannerLink,
}

impl ScannerEndpoint {
    /// Network address, for ethernet endpoints.
    pub fn address(&self) -> Option<&ScannerAddress> {
        match &self.link {
            ScannerLink::Ethernet(address) => Some(address),
            ScannerLink::Rs232(_) => None,
        }
    }
}

/// One scanner section as found in the profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub comm_type: CommType,
    pub model: String,
    pub name: Option<String>,
    pub mac: Option<String>,

    // ethernet
    pub ip: Option<String>,
    pub port: Option<u32>,

    // rs232
    pub device: Option<String>,
    pub baud_rate: Option<u32>,
    pub byte_size: Option<u8>,
    pub stop_bits: Option<u8>,
    pub parity: Option<String>,
}

impl EndpointConfig {
    /// Ethernet endpoint with the role's default port.
    pub fn ethernet(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            ..Default::default()
        }
    }

    /// Rs232 endpoint with 9600 8N1 defaults.
    pub fn rs232(device: impl Into<String>) -> Self {
        Self {
            comm_type: CommType::Rs232,
            device: Some(device.into()),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u32) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = Some(baud_rate);
        self
    }

    pub fn with_parity(mut self, parity: impl Into<String>) -> Self {
        self.parity = Some(parity.into());
        self
    }

    /// Validate this section for `role`.
    ///
    /// One validator serves both roles; the role only picks the default port
    /// and labels the error.
    ///
    /// # Errors
    /// `Error::InvalidEndpoint` listing every problem found.
    ///
    /// # Examples
    ///
    /// ```
    /// use scanbridge_core::{EndpointConfig, ScannerRole};
    ///
    /// let endpoint = EndpointConfig::ethernet("10.0.0.5").validate(ScannerRole::Top).unwrap();
    /// assert_eq!(endpoint.address().unwrap().port(), 2003);
    /// assert_eq!(endpoint.model, "Other Scanner");
    /// ```
    pub fn validate(&self, role: ScannerRole) -> Result<ScannerEndpoint> {
        let mut issues = Vec::new();

        let link = match self.comm_type {
            CommType::Ethernet => self.check_ethernet(role, &mut issues).map(ScannerLink::Ethernet),
            CommType::Rs232 => RawSerial {
                device: self.device.as_deref(),
                baud_rate: self.baud_rate,
                byte_size: self.byte_size,
                stop_bits: self.stop_bits,
                parity: self.parity.as_deref(),
            }
            .check(&mut issues)
            .map(ScannerLink::Rs232),
        };

        match link {
            Some(link) if issues.is_empty() => {
                let endpoint = ScannerEndpoint {
                    role,
                    model: normalize_model(&self.model),
                    name: self.name.clone().filter(|n| !n.trim().is_empty()),
                    link,
                };
                debug!(%role, model = %endpoint.model, "Endpoint validated");
                Ok(endpoint)
            }
            _ => Err(Error::InvalidEndpoint {
                role: role.to_string(),
                issues,
            }),
        }
    }

    fn check_ethernet(&self, role: ScannerRole, issues: &mut Vec<String>) -> Option<ScannerAddress> {
        let ip = self.ip.as_deref().map(str::trim).unwrap_or_default();
        let ip_ok = if ip.is_empty() {
            issues.push("ip is required".to_string());
            false
        } else if ip.parse::<IpAddr>().is_err() {
            issues.push(format!("{ip:?} is not a valid IP address"));
            false
        } else {
            true
        };

        let port = self.port.unwrap_or(u32::from(role.default_port()));
        let port = match u16::try_from(port) {
            Ok(port) if port != 0 => Some(port),
            _ => {
                issues.push(format!("port must be 1-65535, got {port}"));
                None
            }
        };

        match (ip_ok, port) {
            (true, Some(port)) => ScannerAddress::new(ip, port).ok(),
            _ => None,
        }
    }
}

/// Output section: the inspection machine's serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub device: String,
    pub baud_rate: u32,
    pub byte_size: u8,
    pub stop_bits: u8,
    pub parity: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_OUTPUT_DEVICE.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            byte_size: 8,
            stop_bits: 1,
            parity: "N".to_string(),
        }
    }
}

impl OutputConfig {
    /// Validate into serial settings, with the same rules as rs232 scanners.
    ///
    /// # Errors
    /// `Error::InvalidEndpoint` (role `output`) listing every problem found.
    pub fn validate(&self) -> Result<SerialSettings> {
        let mut issues = Vec::new();
        let settings = RawSerial {
            device: Some(&self.device),
            baud_rate: Some(self.baud_rate),
            byte_size: Some(self.byte_size),
            stop_bits: Some(self.stop_bits),
            parity: Some(&self.parity),
        }
        .check(&mut issues);

        settings.ok_or_else(|| Error::InvalidEndpoint {
            role: "output".to_string(),
            issues,
        })
    }
}

/// Whole bridge profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub output: OutputConfig,
    pub bottom: Option<EndpointConfig>,
    pub top: Option<EndpointConfig>,
}

impl BridgeConfig {
    /// Parse a profile from JSON text.
    ///
    /// # Errors
    /// `Error::Json` if the document does not match the profile shape.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a profile file.
    ///
    /// # Errors
    /// `Error::Io` if the file cannot be read, `Error::Json` if it does not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading bridge profile");
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn endpoint(&self, role: ScannerRole) -> Option<&EndpointConfig> {
        match role {
            ScannerRole::Bottom => self.bottom.as_ref(),
            ScannerRole::Top => self.top.as_ref(),
        }
    }

    pub fn with_endpoint(mut self, role: ScannerRole, endpoint: EndpointConfig) -> Self {
        match role {
            ScannerRole::Bottom => self.bottom = Some(endpoint),
            ScannerRole::Top => self.top = Some(endpoint),
        }
        self
    }

    /// Validate every configured scanner endpoint, bottom first.
    ///
    /// # Errors
    /// The first role whose section is invalid.
    pub fn scanner_endpoints(&self) -> Result<Vec<ScannerEndpoint>> {
        ScannerRole::ALL
            .iter()
            .filter_map(|&role| self.endpoint(role).map(|endpoint| endpoint.validate(role)))
            .collect()
    }
}

/// Map a configured model name onto the known list.
pub fn normalize_model(model: &str) -> String {
    let trimmed = model.trim();
    let lower = trimmed.to_lowercase();
    if KNOWN_SCANNER_MODELS.contains(&lower.as_str()) {
        trimmed.to_string()
    } else {
        OTHER_SCANNER_MODEL.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn issues(result: Result<ScannerEndpoint>) -> Vec<String> {
        match result {
            Err(Error::InvalidEndpoint { issues, .. }) => issues,
            other => panic!("expected InvalidEndpoint, got {other:?}"),
        }
    }

    #[test]
    fn test_ethernet_default_ports() {
        let config = EndpointConfig::ethernet("10.0.0.5");
        let bottom = config.validate(ScannerRole::Bottom).unwrap();
        let top = config.validate(ScannerRole::Top).unwrap();
        assert_eq!(bottom.address().unwrap().to_string(), "10.0.0.5:2001");
        assert_eq!(top.address().unwrap().to_string(), "10.0.0.5:2003");
    }

    #[test]
    fn test_ethernet_explicit_port() {
        let endpoint = EndpointConfig::ethernet("192.168.188.20")
            .with_port(9004)
            .validate(ScannerRole::Top)
            .unwrap();
        assert_eq!(endpoint.address().unwrap().port(), 9004);
    }

    #[rstest]
    #[case(None, Some(2001), 1)]
    #[case(Some("10.0.0"), Some(2001), 1)]
    #[case(Some("10.0.0.5"), Some(0), 1)]
    #[case(Some("10.0.0.5"), Some(70000), 1)]
    #[case(Some("scanner"), Some(0), 2)]
    fn test_ethernet_issues(#[case] ip: Option<&str>, #[case] port: Option<u32>, #[case] count: usize) {
        let config = EndpointConfig {
            ip: ip.map(String::from),
            port,
            ..Default::default()
        };
        assert_eq!(issues(config.validate(ScannerRole::Bottom)).len(), count);
    }

    #[rstest]
    #[case("/dev/ttyUSB0")]
    #[case("COM3")]
    #[case("com12")]
    fn test_rs232_device_paths(#[case] device: &str) {
        let endpoint = EndpointConfig::rs232(device).validate(ScannerRole::Bottom).unwrap();
        let ScannerLink::Rs232(ref settings) = endpoint.link else {
            panic!("expected rs232 link");
        };
        assert_eq!(settings.device, device);
        assert_eq!(settings.to_string(), format!("{device} @ 9600 8N1"));
        assert!(endpoint.address().is_none());
    }

    #[test]
    fn test_rs232_reports_every_issue() {
        let config = EndpointConfig {
            comm_type: CommType::Rs232,
            device: Some("/dev/sda".to_string()),
            baud_rate: Some(12345),
            byte_size: Some(9),
            stop_bits: Some(3),
            parity: Some("X".to_string()),
            ..Default::default()
        };
        let found = issues(config.validate(ScannerRole::Top));
        assert_eq!(found.len(), 5, "{found:?}");
        assert!(found[4].contains("parity"));
    }

    #[test]
    fn test_rs232_settings_parsed() {
        let endpoint = EndpointConfig::rs232("/dev/ttyS1")
            .with_baud_rate(115200)
            .with_parity("e")
            .validate(ScannerRole::Top)
            .unwrap();
        let ScannerLink::Rs232(ref settings) = endpoint.link else {
            panic!("expected rs232 link");
        };
        assert_eq!(settings.baud_rate, 115200);
        assert_eq!(settings.parity, Parity::Even);
    }

    #[test]
    fn test_error_names_role() {
        let err = EndpointConfig::default().validate(ScannerRole::Top).unwrap_err();
        assert_eq!(err.to_string(), "Invalid top endpoint: ip is required");
    }

    #[rstest]
    #[case("MicroHAWK ID-40", "MicroHAWK ID-40")]
    #[case("f430-f", "f430-f")]
    #[case("Acme 3000", "Other Scanner")]
    #[case("", "Other Scanner")]
    fn test_model_normalization(#[case] model: &str, #[case] expected: &str) {
        assert_eq!(normalize_model(model), expected);
    }

    #[rstest]
    #[case("ethernet", CommType::Ethernet)]
    #[case("RS232", CommType::Rs232)]
    #[case("bluetooth", CommType::Ethernet)]
    fn test_comm_type_lenient(#[case] raw: &str, #[case] expected: CommType) {
        assert_eq!(CommType::from(raw.to_string()), expected);
    }

    #[test]
    fn test_profile_from_json() {
        let config = BridgeConfig::from_json(
            r#"{
                "output": { "device": "/dev/ttyTHS1", "baud_rate": 19200 },
                "bottom": { "comm_type": "ethernet", "model": "F420", "ip": "10.0.0.5", "port": 2001 },
                "top": { "comm_type": "usb", "ip": "10.0.0.6" }
            }"#,
        )
        .unwrap();

        let output = config.output.validate().unwrap();
        assert_eq!(output.device, "/dev/ttyTHS1");
        assert_eq!(output.baud_rate, 19200);
        assert_eq!(output.parity, Parity::None);

        let endpoints = config.scanner_endpoints().unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].role, ScannerRole::Bottom);
        assert_eq!(endpoints[0].model, "F420");
        assert_eq!(endpoints[1].address().unwrap().to_string(), "10.0.0.6:2003");
    }

    #[test]
    fn test_empty_profile_uses_defaults() {
        let config = BridgeConfig::from_json("{}").unwrap();
        assert_eq!(config.output.validate().unwrap(), SerialSettings::default());
        assert!(config.scanner_endpoints().unwrap().is_empty());
    }

    #[test]
    fn test_output_invalid() {
        let output = OutputConfig {
            device: "/var/log".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            output.validate(),
            Err(Error::InvalidEndpoint { role, .. }) if role == "output"
        ));
    }
}
