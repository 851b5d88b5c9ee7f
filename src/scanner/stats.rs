use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-session pipeline counters
#[derive(Debug, Default)]
pub struct ScanStats {
    frames_received: AtomicU64,
    frames_skipped: AtomicU64,
    decode_attempts: AtomicU64,
    decode_misses: AtomicU64,
    results_emitted: AtomicU64,
    duplicates_suppressed: AtomicU64,
    frame_errors: AtomicU64,
    autofocus_requests: AtomicU64,
}

/// Point-in-time copy of [`ScanStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStatsSnapshot {
    pub frames_received: u64,
    pub frames_skipped: u64,
    pub decode_attempts: u64,
    pub decode_misses: u64,
    pub results_emitted: u64,
    pub duplicates_suppressed: u64,
    pub frame_errors: u64,
    pub autofocus_requests: u64,
}

impl ScanStats {
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode(&self, found: bool) {
        self.decode_attempts.fetch_add(1, Ordering::Relaxed);
        if !found {
            self.decode_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_emitted(&self) {
        self.results_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_error(&self) {
        self.frame_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_autofocus(&self) {
        self.autofocus_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ScanStatsSnapshot {
        ScanStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            decode_attempts: self.decode_attempts.load(Ordering::Relaxed),
            decode_misses: self.decode_misses.load(Ordering::Relaxed),
            results_emitted: self.results_emitted.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
            autofocus_requests: self.autofocus_requests.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.frames_received,
            &self.frames_skipped,
            &self.decode_attempts,
            &self.decode_misses,
            &self.results_emitted,
            &self.duplicates_suppressed,
            &self.frame_errors,
            &self.autofocus_requests,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl ScanStatsSnapshot {
    /// Fraction of decode attempts that found a symbol
    pub fn hit_rate(&self) -> f64 {
        if self.decode_attempts == 0 {
            0.0
        } else {
            (self.decode_attempts - self.decode_misses) as f64 / self.decode_attempts as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_reset() {
        let stats = ScanStats::default();
        stats.record_frame();
        stats.record_frame();
        stats.record_decode(true);
        stats.record_decode(false);
        stats.record_emitted();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_received, 2);
        assert_eq!(snapshot.decode_attempts, 2);
        assert_eq!(snapshot.decode_misses, 1);
        assert_eq!(snapshot.results_emitted, 1);
        assert!((snapshot.hit_rate() - 0.5).abs() < f64::EPSILON);

        stats.reset();
        assert_eq!(stats.snapshot(), ScanStatsSnapshot::default());
    }
}
