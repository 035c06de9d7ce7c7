//! Timing, wire and device constants for the barcode bridge.
//!
//! Every worker in the bridge runs on fixed timings: scanners are polled on a
//! short cadence, connect attempts back off for a long fixed pause, and the
//! inspection machine is re-sent the current barcode on a slow cadence while the
//! barcode is still fresh. Those values live here so the config structs in the
//! other crates can use them as defaults.
//!
//! # Usage
//!
//! ```
//! use scanbridge_core::constants::*;
//! use std::time::Duration;
//!
//! let backoff = Duration::from_secs(CONNECT_BACKOFF_SECS);
//! assert_eq!(backoff, Duration::from_secs(30));
//! assert_eq!(CONNECT_MAX_ATTEMPTS, 3);
//! ```

// ============================================================================
// Connect Retry Policy
// ============================================================================

/// Total number of connect attempts before a worker declares terminal failure.
///
/// Applies to both the scanner (TCP) and the inspection machine (serial) paths.
pub const CONNECT_MAX_ATTEMPTS: u32 = 3;

/// Pause between two consecutive connect attempts, in seconds.
pub const CONNECT_BACKOFF_SECS: u64 = 30;

// ============================================================================
// Scanner Connection
// ============================================================================

/// Timeout for opening the TCP connection to a scanner, in milliseconds.
pub const SCANNER_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Delay before each read attempt in the scanner read loop, in milliseconds.
pub const SCANNER_POLL_INTERVAL_MS: u64 = 500;

/// How long a single read waits for a CR LF terminated line, in milliseconds.
///
/// Expiry is not an error: the loop just polls again.
pub const SCANNER_READ_TIMEOUT_MS: u64 = 3000;

/// Default TCP port of the first (bottom) scanner.
pub const DEFAULT_BOTTOM_SCANNER_PORT: u16 = 2001;

/// Default TCP port of the second (top) scanner.
pub const DEFAULT_TOP_SCANNER_PORT: u16 = 2003;

/// Line terminator emitted by scanners and expected by the inspection machine.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Maximum accepted length of a single scanner line, in bytes.
///
/// A scanner that never sends a terminator would otherwise grow the read
/// buffer without bound.
pub const MAX_LINE_LENGTH: usize = 4096;

// ============================================================================
// Barcode Debouncing
// ============================================================================

/// Minimum time between two accepted barcodes from one scanner, in milliseconds.
pub const RATE_LIMIT_INTERVAL_MS: u64 = 100;

// ============================================================================
// Inspection Output
// ============================================================================

/// Maximum age of the current barcode for it to still be sent, in seconds.
pub const OUTPUT_FRESHNESS_SECS: u64 = 30;

/// Pause after each send (or failed send) to the inspection machine, in seconds.
pub const OUTPUT_SEND_INTERVAL_SECS: u64 = 10;

/// Serial device the inspection machine is attached to.
pub const DEFAULT_OUTPUT_DEVICE: &str = "/dev/ttyTHS2";

/// Default serial baud rate for the inspection machine.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Delay after opening a serial port before its buffers are cleared, in milliseconds.
pub const SERIAL_OPEN_SETTLE_MS: u64 = 3000;

/// Delay after a serial write and again after the flush, in milliseconds.
pub const SERIAL_WRITE_SETTLE_MS: u64 = 2000;

/// How long a serial receive waits for a NUL terminated reply, in milliseconds.
pub const SERIAL_RECEIVE_TIMEOUT_MS: u64 = 5000;

/// Poll cadence of a serial receive, in milliseconds.
pub const SERIAL_RECEIVE_POLL_MS: u64 = 10;

// ============================================================================
// Discovery
// ============================================================================

/// UDP port used by compatible scanners for discovery queries and responses.
pub const DISCOVERY_PORT: u16 = 30717;

/// Broadcast address the discovery query is sent to.
pub const DISCOVERY_BROADCAST_IP: &str = "192.168.188.255";

/// Discovery query datagram.
///
/// The embedded `espmac`/`espip` placeholders are what the query itself
/// carries at fields 5 and 6; a response repeating them is our own query
/// echoed back, not a device.
pub const DISCOVERY_QUERY: &[u8] = b"<op,019,00,FF:FF:FF:FF:FF:FF,255.255.255.255,espmac,espip,0,0>";

/// Field 6 value that marks a datagram as a query rather than a device response.
pub const DISCOVERY_SENTINEL: &str = "espip";

/// How long to wait for a response before resending the query, in seconds.
pub const DISCOVERY_RESPONSE_TIMEOUT_SECS: u64 = 5;

/// Total number of discovery query sends.
pub const DISCOVERY_MAX_ATTEMPTS: u32 = 3;

/// Hard bound on the listener's lifetime regardless of resends, in seconds.
pub const DISCOVERY_LISTENER_TIMEOUT_SECS: u64 = 10;

/// Receive buffer size for a discovery datagram.
pub const DISCOVERY_DATAGRAM_SIZE: usize = 1024;

/// Pause after a received datagram that was not a candidate, in milliseconds.
pub const DISCOVERY_IDLE_PAUSE_MS: u64 = 1000;

/// IP reported in a failed discovery result.
pub const DISCOVERY_FAILURE_IP: &str = "-1";

// ============================================================================
// Reachability Probe
// ============================================================================

/// Connect timeout of the reachability probe, in seconds.
pub const PROBE_CONNECT_TIMEOUT_SECS: u64 = 5;

/// How long a caller waits on a probe handle, in seconds.
pub const PROBE_WAIT_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// Notifications
// ============================================================================

/// Format of the human-readable timestamps carried in notification events.
pub const DISPLAY_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Capacity of the event channel between workers and the notification transport.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// `tracing` target of the append-only barcode log.
pub const BARCODE_LOG_TARGET: &str = "barcode_log";

// ============================================================================
// Device Configuration
// ============================================================================

/// Model name given to scanners whose configured model is not recognised.
pub const OTHER_SCANNER_MODEL: &str = "Other Scanner";

/// Scanner models known to speak the discovery and line protocols.
///
/// Comparison is case-insensitive.
pub const KNOWN_SCANNER_MODELS: &[&str] = &[
    "microhawk mv",
    "microhawk mv-20",
    "microhawk mv-30",
    "microhawk mv-40",
    "microhawk mv-45",
    "microhawk id-20",
    "microhawk id-30",
    "microhawk id-40",
    "microhawk id-45",
    "id-45",
    "f420",
    "f420-f",
    "f430",
    "f430-f",
];

/// Standard serial baud rates accepted by endpoint validation.
pub const STANDARD_BAUD_RATES: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400, 460800, 500000, 576000, 921600, 1000000, 1152000, 1500000, 2000000, 2500000,
    3000000, 3500000, 4000000,
];
