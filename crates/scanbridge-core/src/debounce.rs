//! Per-scanner barcode rate limiting and duplicate detection.
//!
//! Scanners re-read the same label many times a second while it sits in the
//! field of view. The debouncer turns that stream into a small number of
//! meaningful transitions:
//!
//! - reads arriving less than `rate_limit_interval` after the last *accepted*
//!   read are rejected, and only the first rejection of a window asks to be logged
//! - an accepted read of a new value replaces the single history entry
//! - an accepted read of the same value refreshes the entry's timestamp in place
//!
//! ```text
//!              elapsed < interval                elapsed >= interval
//!  observe() ─────────────────────> Rejected    ─────────────────────> value changed? ── yes ──> AcceptedNew
//!                                                                           │
//!                                                                           └── no ───> AcceptedDuplicate
//! ```
//!
//! Everything here is a pure state transition; time is passed in by the caller.
//!
//! # Examples
//!
//! ```
//! use scanbridge_core::{Barcode, DebounceConfig, ScanDecision, ScannerState};
//! use std::time::Duration;
//! use tokio::time::Instant;
//!
//! let config = DebounceConfig::default();
//! let mut state = ScannerState::new("10.0.0.5:2001".parse().unwrap());
//! let t0 = Instant::now();
//! let at = chrono::Local::now();
//! let code = Barcode::normalize(b"ABC123").unwrap();
//!
//! assert_eq!(state.observe(code.clone(), t0, at, &config), ScanDecision::AcceptedNew);
//! assert!(state.observe(code.clone(), t0 + Duration::from_millis(50), at, &config).is_rejected());
//! assert_eq!(
//!     state.observe(code, t0 + Duration::from_millis(200), at, &config),
//!     ScanDecision::AcceptedDuplicate
//! );
//! ```

use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::Instant;

use crate::constants::RATE_LIMIT_INTERVAL_MS;
use crate::types::{Barcode, BarcodeEntry, ScannerAddress};

/// Debouncer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Minimum time between two accepted reads from one scanner.
    pub rate_limit_interval: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            rate_limit_interval: Duration::from_millis(RATE_LIMIT_INTERVAL_MS),
        }
    }
}

impl DebounceConfig {
    pub fn with_rate_limit_interval(mut self, interval: Duration) -> Self {
        self.rate_limit_interval = interval;
        self
    }
}

/// Outcome of feeding one read to a [`ScannerState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDecision {
    /// Read arrived inside the rate-limit window and was dropped.
    Rejected {
        /// Time since the window started.
        elapsed: Duration,

        /// `true` for the first rejection of the current window only.
        notice: bool,
    },

    /// Read was accepted and differs from the retained entry (or is the first ever).
    AcceptedNew,

    /// Read was accepted and repeats the retained entry; its timestamp was refreshed.
    AcceptedDuplicate,
}

impl ScanDecision {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    pub fn is_accepted(&self) -> bool {
        !self.is_rejected()
    }
}

/// Debounce state of one scanner.
///
/// Created on the first line from a previously unseen address. The window
/// start begins unset so the very first read is always accepted.
#[derive(Debug, Clone)]
pub struct ScannerState {
    address: ScannerAddress,

    /// Capacity-1 history: the latest accepted read.
    last: Option<BarcodeEntry>,

    window_start: Option<Instant>,

    suppressed_notice_emitted: bool,
}

impl ScannerState {
    pub fn new(address: ScannerAddress) -> Self {
        Self {
            address,
            last: None,
            window_start: None,
            suppressed_notice_emitted: false,
        }
    }

    pub fn address(&self) -> &ScannerAddress {
        &self.address
    }

    /// Latest accepted barcode, if any.
    pub fn last_barcode(&self) -> Option<&Barcode> {
        self.last.as_ref().map(|entry| &entry.barcode)
    }

    /// The retained history entry, if any.
    pub fn last_entry(&self) -> Option<&BarcodeEntry> {
        self.last.as_ref()
    }

    /// Snapshot of the retained history (zero or one entries).
    pub fn history(&self) -> Vec<BarcodeEntry> {
        self.last.iter().cloned().collect()
    }

    pub fn suppressed_notice_emitted(&self) -> bool {
        self.suppressed_notice_emitted
    }

    /// Feed one read at monotonic time `now` (wall-clock `at`) and apply the transition.
    ///
    /// Rejections never touch the retained entry.
    pub fn observe(
        &mut self,
        barcode: Barcode,
        now: Instant,
        at: DateTime<Local>,
        config: &DebounceConfig,
    ) -> ScanDecision {
        if let Some(start) = self.window_start {
            let elapsed = now.saturating_duration_since(start);
            if elapsed < config.rate_limit_interval {
                let notice = !self.suppressed_notice_emitted;
                self.suppressed_notice_emitted = true;
                return ScanDecision::Rejected { elapsed, notice };
            }
        }

        self.window_start = Some(now);
        self.suppressed_notice_emitted = false;

        match self.last.as_mut() {
            Some(entry) if entry.barcode == barcode => {
                entry.timestamp = at;
                ScanDecision::AcceptedDuplicate
            }
            _ => {
                self.last = Some(BarcodeEntry::new(barcode, at));
                ScanDecision::AcceptedNew
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use proptest::prelude::*;

    fn code(s: &str) -> Barcode {
        Barcode::normalize(s.as_bytes()).unwrap()
    }

    fn state() -> ScannerState {
        ScannerState::new("10.0.0.5:2001".parse().unwrap())
    }

    #[test]
    fn test_first_read_always_accepted() {
        let mut state = state();
        let decision = state.observe(code("ABC123"), Instant::now(), Local::now(), &DebounceConfig::default());
        assert_eq!(decision, ScanDecision::AcceptedNew);
        assert_eq!(state.last_barcode(), Some(&code("ABC123")));
    }

    #[test]
    fn test_reference_sequence() {
        let config = DebounceConfig::default();
        let mut state = state();
        let t0 = Instant::now();
        let w0 = Local::now();

        assert_eq!(
            state.observe(code("ABC123"), t0, w0, &config),
            ScanDecision::AcceptedNew
        );

        let rejected = state.observe(
            code("ABC123"),
            t0 + Duration::from_millis(50),
            w0 + TimeDelta::milliseconds(50),
            &config,
        );
        assert!(rejected.is_rejected());
        assert_eq!(state.last_entry().unwrap().timestamp, w0);

        let w2 = w0 + TimeDelta::milliseconds(200);
        assert_eq!(
            state.observe(code("ABC123"), t0 + Duration::from_millis(200), w2, &config),
            ScanDecision::AcceptedDuplicate
        );
        assert_eq!(state.history().len(), 1);
        assert_eq!(state.last_entry().unwrap().timestamp, w2);

        assert_eq!(
            state.observe(
                code("XYZ999"),
                t0 + Duration::from_millis(400),
                w0 + TimeDelta::milliseconds(400),
                &config
            ),
            ScanDecision::AcceptedNew
        );
        assert_eq!(state.last_barcode(), Some(&code("XYZ999")));
        assert_eq!(state.history().len(), 1);
    }

    #[test]
    fn test_rejection_does_not_replace_entry() {
        let config = DebounceConfig::default();
        let mut state = state();
        let t0 = Instant::now();
        state.observe(code("ABC123"), t0, Local::now(), &config);

        let decision = state.observe(code("OTHER"), t0 + Duration::from_millis(10), Local::now(), &config);
        assert!(decision.is_rejected());
        assert_eq!(state.last_barcode(), Some(&code("ABC123")));
    }

    #[test]
    fn test_notice_once_per_window() {
        let config = DebounceConfig::default();
        let mut state = state();
        let t0 = Instant::now();
        state.observe(code("A"), t0, Local::now(), &config);

        let first = state.observe(code("A"), t0 + Duration::from_millis(10), Local::now(), &config);
        let second = state.observe(code("A"), t0 + Duration::from_millis(20), Local::now(), &config);
        assert!(matches!(first, ScanDecision::Rejected { notice: true, .. }));
        assert!(matches!(second, ScanDecision::Rejected { notice: false, .. }));
        assert!(state.suppressed_notice_emitted());

        // Next accepted read opens a new window and re-arms the notice.
        state.observe(code("A"), t0 + Duration::from_millis(150), Local::now(), &config);
        assert!(!state.suppressed_notice_emitted());
        let third = state.observe(code("A"), t0 + Duration::from_millis(160), Local::now(), &config);
        assert!(matches!(third, ScanDecision::Rejected { notice: true, .. }));
    }

    #[test]
    fn test_rejected_elapsed_reported() {
        let config = DebounceConfig::default();
        let mut state = state();
        let t0 = Instant::now();
        state.observe(code("A"), t0, Local::now(), &config);
        let decision = state.observe(code("A"), t0 + Duration::from_millis(40), Local::now(), &config);
        assert_eq!(
            decision,
            ScanDecision::Rejected {
                elapsed: Duration::from_millis(40),
                notice: true
            }
        );
    }

    #[test]
    fn test_boundary_exactly_interval_is_accepted() {
        let config = DebounceConfig::default();
        let mut state = state();
        let t0 = Instant::now();
        state.observe(code("A"), t0, Local::now(), &config);
        let decision = state.observe(code("A"), t0 + config.rate_limit_interval, Local::now(), &config);
        assert_eq!(decision, ScanDecision::AcceptedDuplicate);
    }

    #[test]
    fn test_rejections_do_not_extend_window() {
        let config = DebounceConfig::default();
        let mut state = state();
        let t0 = Instant::now();
        state.observe(code("A"), t0, Local::now(), &config);
        state.observe(code("B"), t0 + Duration::from_millis(90), Local::now(), &config);
        let decision = state.observe(code("B"), t0 + Duration::from_millis(100), Local::now(), &config);
        assert_eq!(decision, ScanDecision::AcceptedNew);
    }

    proptest! {
        #[test]
        fn prop_window_decides_acceptance(gap_ms in 0u64..300, same in any::<bool>()) {
            let config = DebounceConfig::default();
            let mut state = state();
            let t0 = Instant::now();
            state.observe(code("FIRST"), t0, Local::now(), &config);

            let next = if same { code("FIRST") } else { code("SECOND") };
            let decision = state.observe(next, t0 + Duration::from_millis(gap_ms), Local::now(), &config);

            if gap_ms < RATE_LIMIT_INTERVAL_MS {
                prop_assert!(decision.is_rejected());
                prop_assert_eq!(state.last_barcode(), Some(&code("FIRST")));
            } else if same {
                prop_assert_eq!(decision, ScanDecision::AcceptedDuplicate);
            } else {
                prop_assert_eq!(decision, ScanDecision::AcceptedNew);
                prop_assert_eq!(state.last_barcode(), Some(&code("SECOND")));
            }
            prop_assert!(state.history().len() <= 1);
        }
    }
}
