//! Request deduplication and single-flight tracking
//!
//! Agents retry. Without a gate, a retried tool call would speak the same
//! sentence twice, or worse, twice at the same time. The gate keeps the
//! set of fingerprints currently running and a cache of recently seen
//! ones.

use log::debug;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Minimum time a recent-request entry is retained
const MIN_RETENTION_SECS: f64 = 60.0;

/// Identity of "this text, at this speed, on this engine"
///
/// The text is hashed with SHA-256 and truncated to 16 hex digits. A
/// collision would only cause a false dedupe, which is acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(engine: &str, speed: f64, text: &str) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        let hex = format!("{:x}", digest);
        Self(format!("{}:{:.3}:{}", engine, speed, &hex[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a request was or was not let through
#[derive(Debug)]
pub enum Admission {
    /// Go ahead; the ticket releases the fingerprint when dropped
    Proceed(GateTicket),
    /// The same request is executing right now
    AlreadyRunning,
    /// The same request finished or started within the dedupe window
    RecentDuplicate,
}

#[derive(Default)]
struct GateState {
    in_flight: HashSet<Fingerprint>,
    recent: HashMap<Fingerprint, Instant>,
}

/// Shared dedupe state
#[derive(Clone, Default)]
pub struct RequestGate {
    state: Arc<Mutex<GateState>>,
}

impl RequestGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a request may run, using the current time
    pub fn admit(&self, fingerprint: &Fingerprint, window_secs: f64) -> Admission {
        self.admit_at(fingerprint, window_secs, Instant::now())
    }

    /// Decide whether a request may run at time `now`
    ///
    /// A window of zero or less disables dedupe: the cache is cleared and
    /// the request proceeds without being recorded.
    pub fn admit_at(&self, fingerprint: &Fingerprint, window_secs: f64, now: Instant) -> Admission {
        let mut state = self.lock();

        if window_secs.is_nan() || window_secs <= 0.0 {
            state.recent.clear();
            return Admission::Proceed(GateTicket {
                gate: self.clone(),
                fingerprint: fingerprint.clone(),
                tracked: false,
            });
        }

        let keep = window_secs * 2.0;
        let keep = keep.max(MIN_RETENTION_SECS);
        let keep = Duration::try_from_secs_f64(keep).unwrap_or(Duration::MAX);
        state
            .recent
            .retain(|_, seen| now.saturating_duration_since(*seen) <= keep);

        if state.in_flight.contains(fingerprint) {
            debug!("{} already running", fingerprint);
            return Admission::AlreadyRunning;
        }

        if let Some(seen) = state.recent.get(fingerprint) {
            if now.saturating_duration_since(*seen).as_secs_f64() < window_secs {
                debug!("{} seen within {}s, deduping", fingerprint, window_secs);
                return Admission::RecentDuplicate;
            }
        }

        state.recent.insert(fingerprint.clone(), now);
        state.in_flight.insert(fingerprint.clone());
        Admission::Proceed(GateTicket {
            gate: self.clone(),
            fingerprint: fingerprint.clone(),
            tracked: true,
        })
    }

    /// Mark a fingerprint finished
    ///
    /// Re-stamps the cache so an immediate duplicate after completion is
    /// still caught for one more window.
    pub fn release(&self, fingerprint: &Fingerprint) {
        let mut state = self.lock();
        state.in_flight.remove(fingerprint);
        state.recent.insert(fingerprint.clone(), Instant::now());
    }

    /// Undo an admission for a request that never ran
    fn forget(&self, fingerprint: &Fingerprint) {
        let mut state = self.lock();
        state.in_flight.remove(fingerprint);
        state.recent.remove(fingerprint);
    }

    pub fn is_in_flight(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().in_flight.contains(fingerprint)
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Proof of admission; releases the fingerprint exactly once on drop
pub struct GateTicket {
    gate: RequestGate,
    fingerprint: Fingerprint,
    /// False when dedupe was disabled and nothing was recorded
    tracked: bool,
}

impl GateTicket {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Give the fingerprint back without marking it recently seen
    pub fn cancel(mut self) {
        if self.tracked {
            self.gate.forget(&self.fingerprint);
            self.tracked = false;
        }
    }
}

impl fmt::Debug for GateTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateTicket")
            .field("fingerprint", &self.fingerprint)
            .field("tracked", &self.tracked)
            .finish()
    }
}

impl Drop for GateTicket {
    fn drop(&mut self) {
        if self.tracked {
            self.gate.release(&self.fingerprint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(text: &str) -> Fingerprint {
        Fingerprint::new("say", 1.0, text)
    }

    #[test]
    fn test_fingerprint_shape() {
        let f = fp("Hello world");
        let parts: Vec<&str> = f.as_str().split(':').collect();
        assert_eq!(parts[0], "say");
        assert_eq!(parts[1], "1.000");
        assert_eq!(parts[2].len(), 16);
        assert_eq!(f, fp("Hello world"));
        assert_ne!(f, fp("Hello world!"));
        assert_ne!(f, Fingerprint::new("say", 1.25, "Hello world"));
        assert_ne!(f, Fingerprint::new("espeak", 1.0, "Hello world"));
    }

    #[test]
    fn test_in_flight_rejected() {
        let gate = RequestGate::new();
        let f = fp("one");
        let ticket = match gate.admit(&f, 30.0) {
            Admission::Proceed(t) => t,
            other => panic!("expected proceed, got {:?}", other),
        };
        assert!(gate.is_in_flight(&f));
        assert!(matches!(gate.admit(&f, 30.0), Admission::AlreadyRunning));

        drop(ticket);
        assert!(!gate.is_in_flight(&f));
    }

    #[test]
    fn test_recent_duplicate_then_expiry() {
        let gate = RequestGate::new();
        let f = fp("two");
        let start = Instant::now();
        let ticket = gate.admit_at(&f, 30.0, start);
        drop(ticket);

        let soon = Instant::now() + Duration::from_secs(10);
        assert!(matches!(gate.admit_at(&f, 30.0, soon), Admission::RecentDuplicate));

        let later = Instant::now() + Duration::from_secs(31);
        assert!(matches!(gate.admit_at(&f, 30.0, later), Admission::Proceed(_)));
    }

    #[test]
    fn test_disabled_window_records_nothing() {
        let gate = RequestGate::new();
        let f = fp("three");
        let first = gate.admit(&f, 0.0);
        let second = gate.admit(&f, 0.0);
        assert!(matches!(first, Admission::Proceed(_)));
        assert!(matches!(second, Admission::Proceed(_)));
        assert_eq!(gate.in_flight_count(), 0);
        drop(first);
        drop(second);
        assert!(matches!(gate.admit(&f, 30.0), Admission::Proceed(_)));
    }

    #[test]
    fn test_prune_keeps_window() {
        let gate = RequestGate::new();
        let old = fp("old");
        let start = Instant::now();
        drop(gate.admit_at(&old, 1.0, start));

        // 61s later the 60s minimum retention has passed and the entry is gone
        let later = Instant::now() + Duration::from_secs(61);
        let other = fp("other");
        drop(gate.admit_at(&other, 1.0, later));
        assert_eq!(gate.lock().recent.len(), 1);
    }

    #[test]
    fn test_cancel_leaves_no_trace() {
        let gate = RequestGate::new();
        let f = fp("five");
        match gate.admit(&f, 30.0) {
            Admission::Proceed(ticket) => ticket.cancel(),
            other => panic!("expected proceed, got {:?}", other),
        }
        assert!(!gate.is_in_flight(&f));
        assert!(matches!(gate.admit(&f, 30.0), Admission::Proceed(_)));
    }

    #[test]
    fn test_release_restamps() {
        let gate = RequestGate::new();
        let f = fp("four");
        let past = Instant::now();
        let ticket = gate.admit_at(&f, 5.0, past);
        std::thread::sleep(Duration::from_millis(20));
        drop(ticket);
        let stamped = *gate.lock().recent.get(&f).unwrap();
        assert!(stamped > past);
    }
}
