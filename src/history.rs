use crate::decoder::DecodeResult;
use crate::error::Result;
use crate::ring_buffer::RingHistory;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Number of distinct payloads remembered for duplicate suppression
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// A previously emitted result and when it was last emitted
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub timestamp: Instant,
    pub result: DecodeResult,
}

impl HistoryEntry {
    pub fn new(result: DecodeResult, timestamp: Instant) -> Self {
        Self { timestamp, result }
    }

    /// History key: payload text only, format and timestamp are ignored
    pub fn same_payload(&self, other: &HistoryEntry) -> bool {
        self.result.text == other.result.text
    }
}

/// Outcome of offering a decoded result to the history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Payload not in the history
    FirstSeen,
    /// Payload seen before, but its cooldown has elapsed
    CooledDown,
    /// Payload seen within the cooldown window; drop it
    Duplicate,
}

impl Admission {
    pub fn should_emit(&self) -> bool {
        !matches!(self, Admission::Duplicate)
    }
}

/// Cooldown gate over the recently emitted payloads
#[derive(Debug)]
pub struct ResultHistory {
    ring: RingHistory<HistoryEntry>,
    cooldown: Duration,
}

impl ResultHistory {
    pub fn new(capacity: usize, cooldown: Duration) -> Self {
        Self {
            ring: RingHistory::new(capacity),
            cooldown,
        }
    }

    /// Fallible constructor for a capacity taken from session options
    pub fn try_new(capacity: usize, cooldown: Duration) -> Result<Self> {
        Ok(Self {
            ring: RingHistory::try_new(capacity)?,
            cooldown,
        })
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Decide whether `result`, decoded at `now`, is emitted.
    ///
    /// Emitting records `now` for the payload. A suppressed duplicate leaves the
    /// stored timestamp untouched, so a payload held in view is re-emitted once
    /// per cooldown window.
    pub fn admit(&mut self, result: &DecodeResult, now: Instant) -> Admission {
        let mut candidate = HistoryEntry::new(result.clone(), now);
        let found = self.ring.find_index(&mut candidate, HistoryEntry::same_payload);

        let admission = match found {
            None => Admission::FirstSeen,
            Some(_) if now.saturating_duration_since(candidate.timestamp) >= self.cooldown => {
                Admission::CooledDown
            }
            Some(_) => Admission::Duplicate,
        };

        match (admission, found) {
            (Admission::FirstSeen, _) => {
                trace!("New payload '{}' added to history", result.text);
                self.ring.add(HistoryEntry::new(result.clone(), now));
            }
            (Admission::CooledDown, Some(index)) => {
                trace!("Payload '{}' cooled down, refreshing timestamp", result.text);
                self.ring.set(index, HistoryEntry::new(result.clone(), now));
            }
            _ => {
                debug!(
                    "Suppressing duplicate '{}' ({:?} since last emission)",
                    result.text,
                    now.saturating_duration_since(candidate.timestamp)
                );
            }
        }

        admission
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::BarcodeFormat;

    fn result(text: &str) -> DecodeResult {
        DecodeResult::new(text, BarcodeFormat::QrCode)
    }

    #[test]
    fn test_first_sighting_is_emitted() {
        let mut history = ResultHistory::new(10, Duration::from_millis(500));
        let t0 = Instant::now();

        assert_eq!(history.admit(&result("abc"), t0), Admission::FirstSeen);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_cooldown_boundary() {
        let cooldown = Duration::from_millis(500);
        let mut history = ResultHistory::new(10, cooldown);
        let t0 = Instant::now();
        history.admit(&result("abc"), t0);

        let just_before = t0 + cooldown - Duration::from_millis(1);
        assert_eq!(history.admit(&result("abc"), just_before), Admission::Duplicate);

        assert_eq!(history.admit(&result("abc"), t0 + cooldown), Admission::CooledDown);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_duplicates_do_not_refresh_timestamp() {
        let cooldown = Duration::from_millis(500);
        let mut history = ResultHistory::new(10, cooldown);
        let t0 = Instant::now();
        history.admit(&result("abc"), t0);

        // Held in view: repeated sightings inside the window stay suppressed
        for ms in [100, 200, 300, 400] {
            let admission = history.admit(&result("abc"), t0 + Duration::from_millis(ms));
            assert_eq!(admission, Admission::Duplicate);
        }

        // Measured from the last emission, not the last sighting
        let admission = history.admit(&result("abc"), t0 + Duration::from_millis(500));
        assert!(admission.should_emit());
    }

    #[test]
    fn test_distinct_payloads_always_emitted() {
        let mut history = ResultHistory::new(10, Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(history.admit(&result("one"), t0).should_emit());
        assert!(history.admit(&result("two"), t0).should_emit());
        assert!(history.admit(&result("three"), t0).should_emit());
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_format_ignored_for_equality() {
        let mut history = ResultHistory::new(10, Duration::from_secs(60));
        let t0 = Instant::now();

        history.admit(&DecodeResult::new("4006381333931", BarcodeFormat::Ean13), t0);
        let other = DecodeResult::new("4006381333931", BarcodeFormat::Code128);
        assert_eq!(history.admit(&other, t0), Admission::Duplicate);
    }

    #[test]
    fn test_evicted_payload_is_emitted_again() {
        let mut history = ResultHistory::new(2, Duration::from_secs(60));
        let t0 = Instant::now();

        history.admit(&result("a"), t0);
        history.admit(&result("b"), t0);
        history.admit(&result("c"), t0); // evicts "a"

        assert_eq!(history.admit(&result("a"), t0), Admission::FirstSeen);
    }

    #[test]
    fn test_try_new_rejects_zero_capacity() {
        assert!(ResultHistory::try_new(0, Duration::from_millis(500)).is_err());

        let history = ResultHistory::try_new(1, Duration::from_millis(500)).unwrap();
        assert!(history.is_empty());
    }
}
