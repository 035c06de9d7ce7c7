//! Scanner discovery wire format.
//!
//! Discovery is a broadcast query answered by every compatible scanner on the
//! segment. Both directions are comma-separated ASCII:
//!
//! ```text
//! query:    <op,019,00,FF:FF:FF:FF:FF:FF,255.255.255.255,espmac,espip,0,0>
//! response: ...,<mac>,<ip>,...,<tcp1>,<tcp2>,.,<name>,.,model=<m>,.,.,serial=<s>,firmware=<f>,weblink=<w>
//!            5     6         14     15      17        19           22         23          24
//! ```
//!
//! Field 6 carries the responder's IP. The query itself (which loops back to
//! the sender on a broadcast segment) carries the placeholder `espip` there;
//! [`parse_response`] reports such datagrams as `Ok(None)`.

use serde::Serialize;

use scanbridge_core::constants::{DISCOVERY_QUERY, DISCOVERY_SENTINEL};
use scanbridge_core::{Error, Result};

// Response field offsets
const FIELD_MAC: usize = 5;
const FIELD_IP: usize = 6;
const FIELD_TCP1: usize = 14;
const FIELD_TCP2: usize = 15;
const FIELD_NAME: usize = 17;
const FIELD_MODEL: usize = 19;
const FIELD_SERIAL: usize = 22;
const FIELD_FIRMWARE: usize = 23;
const FIELD_WEBLINK: usize = 24;

/// A scanner that answered the discovery query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredScanner {
    pub mac: String,
    pub ip: String,
    pub tcp_port_1: u16,
    pub tcp_port_2: u16,
    pub name: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
    pub weblink: String,
}

/// The fixed broadcast query.
pub fn discovery_query() -> &'static [u8] {
    DISCOVERY_QUERY
}

/// Parse one discovery datagram.
///
/// Returns `Ok(None)` for a datagram whose IP field is the query placeholder.
///
/// # Errors
/// `Error::MalformedResponse` if a required field is missing, a port does not
/// parse, or a `key=value` field has no `=`.
///
/// # Examples
///
/// ```
/// use scanbridge_protocol::{discovery_query, parse_response};
///
/// // Our own query echoed back is not a candidate.
/// assert_eq!(parse_response(discovery_query()).unwrap(), None);
/// ```
pub fn parse_response(datagram: &[u8]) -> Result<Option<DiscoveredScanner>> {
    let text = String::from_utf8_lossy(datagram);
    let text = text.trim().trim_start_matches('<').trim_end_matches('>');
    let fields: Vec<&str> = text.split(',').map(str::trim).collect();

    let ip = field(&fields, FIELD_IP)?;
    if ip == DISCOVERY_SENTINEL {
        return Ok(None);
    }

    Ok(Some(DiscoveredScanner {
        mac: field(&fields, FIELD_MAC)?.to_string(),
        ip: ip.to_string(),
        tcp_port_1: port(&fields, FIELD_TCP1)?,
        tcp_port_2: port(&fields, FIELD_TCP2)?,
        name: field(&fields, FIELD_NAME)?.to_string(),
        model: suffix(&fields, FIELD_MODEL)?.to_string(),
        serial: suffix(&fields, FIELD_SERIAL)?.to_string(),
        firmware: suffix(&fields, FIELD_FIRMWARE)?.to_string(),
        weblink: suffix(&fields, FIELD_WEBLINK)?.to_string(),
    }))
}

fn field<'a>(fields: &[&'a str], index: usize) -> Result<&'a str> {
    fields.get(index).copied().ok_or_else(|| {
        Error::MalformedResponse(format!("{} fields, need at least {}", fields.len(), index + 1))
    })
}

fn port(fields: &[&str], index: usize) -> Result<u16> {
    let raw = field(fields, index)?;
    raw.parse()
        .map_err(|_| Error::MalformedResponse(format!("field {index}: {raw:?} is not a port")))
}

fn suffix<'a>(fields: &[&'a str], index: usize) -> Result<&'a str> {
    let raw = field(fields, index)?;
    raw.split_once('=')
        .map(|(_, value)| value)
        .ok_or_else(|| Error::MalformedResponse(format!("field {index}: {raw:?} has no '='")))
}
