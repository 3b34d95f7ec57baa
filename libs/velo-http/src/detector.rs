//! Online network-quality detection.
//!
//! A bounded ring buffer of request outcomes feeds an EWMA latency
//! estimate and timeout/success ratios, classified against a threshold
//! table with hysteresis: demotion is immediate, promotion requires
//! several consecutive better windows. Snapshot reads are lock-free and
//! allocation-free.

use crate::config::DetectorConfig;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// One completed request outcome.
#[derive(Debug, Clone, Copy)]
pub struct QualitySample {
    /// Time to the first byte of the response (or to the failure).
    pub latency: Duration,
    /// Total request duration including body transfer.
    pub total_duration: Duration,
    /// The attempt ended in a deadline expiry.
    pub timed_out: bool,
    /// The attempt ended in a transport failure.
    pub transport_failure: bool,
    /// Bytes moved in either direction.
    pub bytes_transferred: u64,
    /// The attempt produced a response. An empty body is still a success.
    pub success: bool,
}

/// Network quality bands, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualityLevel {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// Point-in-time view of the detector. Reading one never perturbs the
/// detector state.
#[derive(Debug, Clone, Copy)]
pub struct QualitySnapshot {
    pub level: QualityLevel,
    pub ewma_latency_ms: f64,
    pub timeout_ratio: f64,
    pub success_ratio: f64,
    pub sample_count: usize,
}

impl QualitySnapshot {
    fn cold_start() -> Self {
        Self {
            level: QualityLevel::Good,
            ewma_latency_ms: 0.0,
            timeout_ratio: 0.0,
            success_ratio: 1.0,
            sample_count: 0,
        }
    }
}

struct DetectorState {
    samples: VecDeque<QualitySample>,
    ewma_latency_ms: Option<f64>,
    level: QualityLevel,
    better_streak: usize,
    consecutive_timeouts: usize,
}

/// Online detector of network quality.
///
/// `record` takes a short mutex; `snapshot` is an `arc-swap` load of a
/// `Copy` struct published on each update.
pub struct NetworkQualityDetector {
    config: DetectorConfig,
    state: Mutex<DetectorState>,
    snapshot: ArcSwap<QualitySnapshot>,
}

impl NetworkQualityDetector {
    #[must_use]
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DetectorState {
                samples: VecDeque::new(),
                ewma_latency_ms: None,
                level: QualityLevel::Good,
                better_streak: 0,
                consecutive_timeouts: 0,
            }),
            snapshot: ArcSwap::from_pointee(QualitySnapshot::cold_start()),
        }
    }

    /// Record one completed attempt and reclassify.
    pub fn record(&self, sample: QualitySample) {
        let mut state = self.state.lock();

        if state.samples.len() >= self.config.window.max(1) {
            state.samples.pop_front();
        }
        state.samples.push_back(sample);

        let latency_ms = duration_ms(sample.latency);
        let alpha = self.config.ewma_alpha.clamp(0.0, 1.0);
        let ewma = match state.ewma_latency_ms {
            Some(prev) => alpha * latency_ms + (1.0 - alpha) * prev,
            None => latency_ms,
        };
        state.ewma_latency_ms = Some(ewma);

        let count = state.samples.len();
        let timeouts = state.samples.iter().filter(|s| s.timed_out).count();
        let successes = state.samples.iter().filter(|s| s.success).count();
        #[allow(clippy::cast_precision_loss)]
        let (timeout_ratio, success_ratio) =
            (timeouts as f64 / count as f64, successes as f64 / count as f64);

        if sample.timed_out {
            state.consecutive_timeouts += 1;
        } else {
            state.consecutive_timeouts = 0;
        }

        let candidate = classify(ewma, timeout_ratio, success_ratio);

        if state.consecutive_timeouts >= self.config.timeout_burst.max(1) {
            // Hard timeout burst: demote immediately regardless of windowed
            // ratios.
            state.level = QualityLevel::Poor;
            state.better_streak = 0;
        } else if candidate > state.level {
            // Worse band: demote immediately.
            state.level = candidate;
            state.better_streak = 0;
        } else if candidate < state.level {
            // Better band: promote only after the configured streak.
            state.better_streak += 1;
            if state.better_streak >= self.config.promote_streak.max(1) {
                state.level = candidate;
                state.better_streak = 0;
            }
        } else {
            state.better_streak = 0;
        }

        self.snapshot.store(Arc::new(QualitySnapshot {
            level: state.level,
            ewma_latency_ms: ewma,
            timeout_ratio,
            success_ratio,
            sample_count: count,
        }));
    }

    /// Current quality view. Allocation-free and never blocks on `record`.
    #[must_use]
    pub fn snapshot(&self) -> QualitySnapshot {
        **self.snapshot.load()
    }
}

impl Default for NetworkQualityDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl std::fmt::Debug for NetworkQualityDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("NetworkQualityDetector")
            .field("level", &snapshot.level)
            .field("sample_count", &snapshot.sample_count)
            .finish()
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Threshold table. Evaluated best-band-first; a band matches only when
/// latency, timeout ratio, and success ratio all qualify.
fn classify(ewma_latency_ms: f64, timeout_ratio: f64, success_ratio: f64) -> QualityLevel {
    if ewma_latency_ms < 120.0 && timeout_ratio < 0.01 && success_ratio >= 0.99 {
        QualityLevel::Excellent
    } else if ewma_latency_ms < 300.0 && timeout_ratio < 0.03 && success_ratio >= 0.97 {
        QualityLevel::Good
    } else if ewma_latency_ms < 900.0 && timeout_ratio < 0.08 && success_ratio >= 0.90 {
        QualityLevel::Fair
    } else {
        QualityLevel::Poor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_sample(latency_ms: u64) -> QualitySample {
        QualitySample {
            latency: Duration::from_millis(latency_ms),
            total_duration: Duration::from_millis(latency_ms + 1),
            timed_out: false,
            transport_failure: false,
            bytes_transferred: 512,
            success: true,
        }
    }

    fn timeout_sample() -> QualitySample {
        QualitySample {
            latency: Duration::from_millis(2000),
            total_duration: Duration::from_millis(2000),
            timed_out: true,
            transport_failure: false,
            bytes_transferred: 0,
            success: false,
        }
    }

    #[test]
    fn test_cold_start_is_good_baseline() {
        let detector = NetworkQualityDetector::default();
        let snap = detector.snapshot();
        assert_eq!(snap.level, QualityLevel::Good);
        assert_eq!(snap.sample_count, 0);
    }

    #[test]
    fn test_classification_bands() {
        assert_eq!(classify(50.0, 0.0, 1.0), QualityLevel::Excellent);
        assert_eq!(classify(200.0, 0.0, 1.0), QualityLevel::Good);
        assert_eq!(classify(500.0, 0.05, 0.95), QualityLevel::Fair);
        assert_eq!(classify(2000.0, 0.5, 0.5), QualityLevel::Poor);
        // Latency alone does not qualify a band: bad ratios pull it down.
        assert_eq!(classify(50.0, 0.5, 0.5), QualityLevel::Poor);
    }

    #[test]
    fn test_promotion_requires_streak() {
        let detector = NetworkQualityDetector::default();

        // Two excellent samples are not enough (K = 3).
        detector.record(ok_sample(20));
        detector.record(ok_sample(20));
        assert_eq!(detector.snapshot().level, QualityLevel::Good);

        detector.record(ok_sample(20));
        assert_eq!(detector.snapshot().level, QualityLevel::Excellent);
    }

    #[test]
    fn test_promotion_streak_resets_on_equal_band() {
        let detector = NetworkQualityDetector::default();

        detector.record(ok_sample(20)); // excellent band, streak 1
        detector.record(ok_sample(20)); // streak 2
        detector.record(ok_sample(250)); // good band: streak resets
        detector.record(ok_sample(20));
        detector.record(ok_sample(20));
        assert_eq!(detector.snapshot().level, QualityLevel::Good);

        detector.record(ok_sample(20)); // third consecutive excellent window
        assert_eq!(detector.snapshot().level, QualityLevel::Excellent);
    }

    #[test]
    fn test_demotion_is_immediate() {
        let detector = NetworkQualityDetector::default();
        for _ in 0..3 {
            detector.record(ok_sample(20));
        }
        assert_eq!(detector.snapshot().level, QualityLevel::Excellent);

        // One slow window drags the EWMA past the excellent band.
        detector.record(ok_sample(5000));
        assert!(detector.snapshot().level > QualityLevel::Excellent);
    }

    #[test]
    fn test_timeout_burst_demotes_to_poor() {
        let detector = NetworkQualityDetector::default();
        for _ in 0..10 {
            detector.record(ok_sample(20));
        }
        detector.record(timeout_sample());
        detector.record(timeout_sample());
        detector.record(timeout_sample());
        assert_eq!(detector.snapshot().level, QualityLevel::Poor);
    }

    #[test]
    fn test_window_is_bounded() {
        let config = DetectorConfig {
            window: 4,
            ..DetectorConfig::default()
        };
        let detector = NetworkQualityDetector::new(config);
        for _ in 0..20 {
            detector.record(ok_sample(20));
        }
        assert_eq!(detector.snapshot().sample_count, 4);
    }

    #[test]
    fn test_snapshot_does_not_perturb_state() {
        let detector = NetworkQualityDetector::default();
        detector.record(ok_sample(20));
        let first = detector.snapshot();
        for _ in 0..100 {
            let _ = detector.snapshot();
        }
        let second = detector.snapshot();
        assert_eq!(first.sample_count, second.sample_count);
        assert!((first.ewma_latency_ms - second.ewma_latency_ms).abs() < f64::EPSILON);
    }

    #[test]
    fn test_success_ratio_tracks_window() {
        let config = DetectorConfig {
            window: 10,
            ..DetectorConfig::default()
        };
        let detector = NetworkQualityDetector::new(config);
        for _ in 0..5 {
            detector.record(ok_sample(20));
        }
        for _ in 0..5 {
            detector.record(QualitySample {
                transport_failure: true,
                success: false,
                ..ok_sample(20)
            });
        }
        let snap = detector.snapshot();
        assert!((snap.success_ratio - 0.5).abs() < 1e-9);
    }
}
