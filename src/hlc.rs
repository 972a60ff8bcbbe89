//! Hybrid Logical Clock: monotonic, comparable, causally-aware timestamps.
//!
//! An [`Hlc`] is `physical` (wall-clock ms since epoch), `logical` (a
//! counter that advances when the wall clock doesn't), and `nonce` (a
//! random tie-break). The canonical string form is
//! `"<physical>-<logical>-<nonce>"` with both numeric fields zero-padded so
//! lexical order agrees with the `(physical, logical, nonce)` tuple order —
//! see the module docs below for why `physical` is padded too.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const PHYSICAL_WIDTH: usize = 13;
const LOGICAL_WIDTH: usize = 6;
const NONCE_LEN: usize = 6;
const NONCE_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// A single Hybrid Logical Clock value.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Hlc {
    physical_ms: u64,
    logical: u32,
    nonce: String,
}

impl Hlc {
    /// Builds an HLC from raw parts. Exposed for adapters that deserialize
    /// a remote peer's timestamp wholesale.
    #[must_use]
    pub fn from_parts(physical_ms: u64, logical: u32, nonce: impl Into<String>) -> Self {
        Self {
            physical_ms,
            logical,
            nonce: nonce.into(),
        }
    }

    #[must_use]
    pub fn physical_ms(&self) -> u64 {
        self.physical_ms
    }

    #[must_use]
    pub fn logical(&self) -> u32 {
        self.logical
    }

    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }
}

impl Ord for Hlc {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.physical_ms, self.logical, &self.nonce).cmp(&(
            other.physical_ms,
            other.logical,
            &other.nonce,
        ))
    }
}

impl PartialOrd for Hlc {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:0pwidth$}-{:0lwidth$}-{}",
            self.physical_ms,
            self.logical,
            self.nonce,
            pwidth = PHYSICAL_WIDTH,
            lwidth = LOGICAL_WIDTH,
        )
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HlcParseError {
    #[error("malformed HLC string: {0}")]
    Malformed(String),
}

impl FromStr for Hlc {
    type Err = HlcParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        let physical = parts
            .next()
            .ok_or_else(|| HlcParseError::Malformed(s.to_string()))?;
        let logical = parts
            .next()
            .ok_or_else(|| HlcParseError::Malformed(s.to_string()))?;
        let nonce = parts
            .next()
            .ok_or_else(|| HlcParseError::Malformed(s.to_string()))?;

        let physical_ms = physical
            .parse::<u64>()
            .map_err(|_| HlcParseError::Malformed(s.to_string()))?;
        let logical = logical
            .parse::<u32>()
            .map_err(|_| HlcParseError::Malformed(s.to_string()))?;

        if nonce.is_empty() {
            return Err(HlcParseError::Malformed(s.to_string()));
        }

        Ok(Self {
            physical_ms,
            logical,
            nonce: nonce.to_string(),
        })
    }
}

impl Serialize for Hlc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hlc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(DeError::custom)
    }
}

/// Injectable wall-clock source, so [`Clock`] is testable without sleeping.
///
/// Production code uses [`SystemTimeSource`]; tests supply a fixed or
/// step-controlled source. Threading the clock through the store
/// constructor (rather than a global singleton) makes the clock
/// "injected clock" resolution.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Reads the real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_millis() as u64
    }
}

struct ClockState {
    /// `None` until the first `tick()`/`observe()`, so constructing a clock
    /// doesn't itself consume the first logical slot at the construction
    /// instant.
    current: Option<Hlc>,
}

/// A Hybrid Logical Clock. Process-wide mutable state, serialized behind a
/// [`Mutex`] since it is process-wide shared state.
pub struct Clock<T: TimeSource = SystemTimeSource> {
    time: T,
    state: Mutex<ClockState>,
}

impl Clock<SystemTimeSource> {
    /// A clock driven by the real system clock, starting from zero.
    #[must_use]
    pub fn new() -> Self {
        Self::with_time_source(SystemTimeSource)
    }
}

impl Default for Clock<SystemTimeSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeSource> Clock<T> {
    /// A clock driven by an arbitrary [`TimeSource`] — used in tests to
    /// pin or step wall time deterministically.
    pub fn with_time_source(time: T) -> Self {
        Self {
            time,
            state: Mutex::new(ClockState { current: None }),
        }
    }

    /// Produces a new, strictly-greater-than-the-previous HLC.
    pub fn tick(&self) -> Hlc {
        let now = self.time.now_ms();
        let mut state = self.state.lock().expect("clock mutex poisoned");
        let next = match &state.current {
            Some(current) if now <= current.physical_ms => {
                Hlc::from_parts(current.physical_ms, current.logical + 1, fresh_nonce())
            }
            _ => Hlc::from_parts(now, 0, fresh_nonce()),
        };
        state.current = Some(next.clone());
        next
    }

    /// Folds a remote HLC into local state if it's causally ahead.
    pub fn observe(&self, remote: &Hlc) {
        let mut state = self.state.lock().expect("clock mutex poisoned");
        let is_ahead = match &state.current {
            Some(current) => remote > current,
            None => true,
        };
        if is_ahead {
            state.current = Some(remote.clone());
        }
    }

    /// The current HLC without advancing it. Before the first `tick()` or
    /// `observe()`, this ticks once to establish a starting point.
    #[must_use]
    pub fn current(&self) -> Hlc {
        let existing = self.state.lock().expect("clock mutex poisoned").current.clone();
        existing.unwrap_or_else(|| self.tick())
    }
}

fn fresh_nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..NONCE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..NONCE_ALPHABET.len());
            NONCE_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    struct FixedTime(AtomicU64);

    impl TimeSource for FixedTime {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn canonical_string_round_trips() {
        let hlc = Hlc::from_parts(1_700_000_000_123, 7, "ab3xq9");
        let s = hlc.to_string();
        assert_eq!(s, "1700000000123-000007-ab3xq9");
        assert_eq!(s.parse::<Hlc>().unwrap(), hlc);
    }

    #[test]
    fn tick_monotonicity_same_instant() {
        // Three ticks at a fixed wall time yield logical 0,1,2
        // and strictly increasing canonical strings.
        let clock = Clock::with_time_source(FixedTime(AtomicU64::new(1_000)));
        let t0 = clock.tick();
        let t1 = clock.tick();
        let t2 = clock.tick();

        assert_eq!(t0.logical(), 0);
        assert_eq!(t1.logical(), 1);
        assert_eq!(t2.logical(), 2);
        assert!(t0 < t1);
        assert!(t1 < t2);
        assert!(t0.to_string() < t1.to_string());
        assert!(t1.to_string() < t2.to_string());
    }

    #[test]
    fn tick_advances_physical_resets_logical() {
        let time = FixedTime(AtomicU64::new(1_000));
        let clock = Clock::with_time_source(time);
        let first = clock.tick();
        assert_eq!(first.logical(), 0);

        clock.time.0.store(2_000, Ordering::SeqCst);
        let second = clock.tick();
        assert_eq!(second.physical_ms(), 2_000);
        assert_eq!(second.logical(), 0);
        assert!(second > first);
    }

    #[test]
    fn clock_going_backward_still_advances_logically() {
        let time = FixedTime(AtomicU64::new(5_000));
        let clock = Clock::with_time_source(time);
        let first = clock.tick();

        // Wall clock regresses.
        clock.time.0.store(1_000, Ordering::SeqCst);
        let second = clock.tick();

        assert_eq!(second.physical_ms(), first.physical_ms());
        assert_eq!(second.logical(), first.logical() + 1);
        assert!(second > first);
    }

    #[test]
    fn observe_safety() {
        let clock = Clock::with_time_source(FixedTime(AtomicU64::new(1_000)));
        let local = clock.tick();
        let remote = Hlc::from_parts(local.physical_ms() + 10, 0, "zzzzzz");

        clock.observe(&remote);
        claims::assert_ge!(clock.current(), remote);
    }

    #[test]
    fn observe_ignores_older_or_equal() {
        let clock = Clock::with_time_source(FixedTime(AtomicU64::new(1_000)));
        let local = clock.tick();
        let stale = Hlc::from_parts(0, 0, "aaaaaa");

        clock.observe(&stale);
        assert_eq!(clock.current(), local);
    }

    #[test]
    fn two_ticks_on_same_process_never_tie() {
        let clock = Clock::with_time_source(FixedTime(AtomicU64::new(42)));
        let a = clock.tick();
        let b = clock.tick();
        assert_ne!(a, b);
        claims::assert_le!(a, b);
    }

    #[test]
    fn parse_rejects_malformed_input() {
        claims::assert_err!("not-an-hlc".parse::<Hlc>());
        claims::assert_err!("123-abc-xyz".parse::<Hlc>());
        claims::assert_err!("123-456-".parse::<Hlc>());
    }
}
