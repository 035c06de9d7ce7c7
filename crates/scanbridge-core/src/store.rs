//! Shared barcode store.
//!
//! The store owns the two pieces of state that cross worker boundaries: the
//! per-address [`ScannerState`] map and the process-wide current output
//! barcode. Both sit behind one mutex so a scan is debounced and published
//! atomically, and the output forwarder never sees a half-written value.
//!
//! The store is cheap to clone; clones share the same state. Construct one at
//! startup and hand a clone to every worker.
//!
//! # Examples
//!
//! ```
//! use scanbridge_core::{Barcode, BarcodeStore, DebounceConfig};
//! use std::time::Duration;
//! use tokio::time::Instant;
//!
//! let store = BarcodeStore::new();
//! let address = "10.0.0.5:2001".parse().unwrap();
//! let barcode = Barcode::normalize(b"ABC123").unwrap();
//!
//! let outcome = store.record_scan(&address, barcode, Instant::now(), chrono::Local::now(), &DebounceConfig::default());
//! assert!(outcome.decision.is_accepted());
//!
//! let fresh = store.fresh_barcode(Instant::now(), Duration::from_secs(30));
//! assert_eq!(fresh.unwrap().as_str(), "ABC123");
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::Instant;

use crate::debounce::{DebounceConfig, ScanDecision, ScannerState};
use crate::types::{Barcode, BarcodeEntry, ScannerAddress};

/// The most recent accepted barcode across all scanners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentBarcode {
    pub barcode: Barcode,

    /// Scanner that produced it.
    pub source: ScannerAddress,

    /// Monotonic acceptance time, used for freshness and write ordering.
    pub recorded_at: Instant,

    /// Wall-clock acceptance time, for display.
    pub timestamp: DateTime<Local>,
}

impl CurrentBarcode {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.recorded_at)
    }

    /// `true` while the barcode is at most `window` old.
    pub fn is_fresh(&self, now: Instant, window: Duration) -> bool {
        self.age(now) <= window
    }
}

/// Result of [`BarcodeStore::record_scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub decision: ScanDecision,

    /// Snapshot of the scanner's retained history after the transition.
    pub history: Vec<BarcodeEntry>,
}

#[derive(Debug, Default)]
struct StoreInner {
    scanners: HashMap<ScannerAddress, ScannerState>,
    current: Option<CurrentBarcode>,
}

/// Lock-guarded store shared by scanner connections and the output forwarder.
#[derive(Debug, Clone, Default)]
pub struct BarcodeStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl BarcodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // The guarded data stays consistent even if a holder panicked: every
        // mutation below completes before the guard is released.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Debounce one read from `address` and, if accepted, publish it as the
    /// current output barcode.
    ///
    /// The scanner state is created on the first read from an unseen address.
    /// Publishing is last-writer-wins by acceptance time: a write carrying an
    /// older `now` than the stored value is not published.
    pub fn record_scan(
        &self,
        address: &ScannerAddress,
        barcode: Barcode,
        now: Instant,
        at: DateTime<Local>,
        config: &DebounceConfig,
    ) -> ScanOutcome {
        let mut inner = self.lock();

        let state = inner
            .scanners
            .entry(address.clone())
            .or_insert_with(|| ScannerState::new(address.clone()));
        let decision = state.observe(barcode.clone(), now, at, config);
        let history = state.history();

        if decision.is_accepted() {
            let newer = inner
                .current
                .as_ref()
                .is_none_or(|current| current.recorded_at <= now);
            if newer {
                inner.current = Some(CurrentBarcode {
                    barcode,
                    source: address.clone(),
                    recorded_at: now,
                    timestamp: at,
                });
            }
        }

        ScanOutcome { decision, history }
    }

    /// Copy of the current output barcode.
    pub fn current(&self) -> Option<CurrentBarcode> {
        self.lock().current.clone()
    }

    /// The current barcode if it is at most `window` old at `now`.
    pub fn fresh_barcode(&self, now: Instant, window: Duration) -> Option<Barcode> {
        self.lock()
            .current
            .as_ref()
            .filter(|current| current.is_fresh(now, window))
            .map(|current| current.barcode.clone())
    }

    /// Copy of one scanner's debounce state.
    pub fn scanner_state(&self, address: &ScannerAddress) -> Option<ScannerState> {
        self.lock().scanners.get(address).cloned()
    }

    /// Number of scanners that have sent at least one line.
    pub fn scanner_count(&self) -> usize {
        self.lock().scanners.len()
    }
}
