//! Affect sensing: channel consumer, debouncer, and the JSON feed poller.
//!
//! Raw classifier samples arrive on a bounded channel. The [`Debouncer`]
//! suppresses jitter: the reported emotion only changes after N
//! consecutive agreeing samples, or after the candidate has persisted for
//! the dwell period. [`AffectSignal::latest`] never blocks and never
//! errors on sensor absence; once samples stop arriving for longer than
//! the staleness timeout, it reports neutral with the stale flag set.

use anyhow::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::AffectConfig;
use crate::models::{AffectSample, Emotion};

pub const CHANNEL_CAPACITY: usize = 64;

/// Debounced reading handed to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffectReading {
    pub emotion: Emotion,
    pub confidence: f32,
    /// True when no sample has arrived within the staleness timeout; the
    /// emotion is forced to neutral in that case.
    pub stale: bool,
}

/// A debounced change in the reported emotion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffectTransition {
    pub from: Emotion,
    pub to: Emotion,
    pub confidence: f32,
}

/// Pure jitter filter over raw affect samples.
///
/// The reported emotion starts neutral. A differing raw sample becomes a
/// candidate; the candidate is accepted once `required_samples` agreeing
/// samples arrive consecutively, or once it has persisted for `dwell`.
/// Any disagreeing sample resets the candidate.
#[derive(Debug)]
pub struct Debouncer {
    required_samples: usize,
    dwell: Duration,
    reported: Emotion,
    candidate: Option<Candidate>,
}

#[derive(Debug)]
struct Candidate {
    emotion: Emotion,
    agreeing: usize,
    since: Instant,
    last_confidence: f32,
}

impl Debouncer {
    pub fn new(required_samples: usize, dwell: Duration) -> Self {
        Self {
            required_samples: required_samples.max(1),
            dwell,
            reported: Emotion::Neutral,
            candidate: None,
        }
    }

    pub fn from_config(config: &AffectConfig) -> Self {
        Self::new(config.debounce_samples, config.dwell())
    }

    pub fn reported(&self) -> Emotion {
        self.reported
    }

    /// Feed one raw sample; returns the transition if the reported emotion
    /// just changed.
    pub fn observe(&mut self, sample: &AffectSample) -> Option<AffectTransition> {
        self.observe_at(sample, Instant::now())
    }

    fn observe_at(&mut self, sample: &AffectSample, now: Instant) -> Option<AffectTransition> {
        if sample.emotion == self.reported {
            self.candidate = None;
            return None;
        }

        match &mut self.candidate {
            Some(c) if c.emotion == sample.emotion => {
                c.agreeing += 1;
                c.last_confidence = sample.confidence;
            }
            _ => {
                self.candidate = Some(Candidate {
                    emotion: sample.emotion,
                    agreeing: 1,
                    since: now,
                    last_confidence: sample.confidence,
                });
            }
        }

        let candidate = self.candidate.as_ref()?;
        let accepted = candidate.agreeing >= self.required_samples
            || (candidate.agreeing > 1 && now.duration_since(candidate.since) >= self.dwell);
        if !accepted {
            return None;
        }

        let from = self.reported;
        let to = candidate.emotion;
        let confidence = candidate.last_confidence;
        self.reported = to;
        self.candidate = None;
        Some(AffectTransition {
            from,
            to,
            confidence,
        })
    }
}

/// Consumer side of the affect channel. Owned by the orchestrator; polled
/// between presentation steps, never awaited on.
pub struct AffectSignal {
    rx: mpsc::Receiver<AffectSample>,
    debouncer: Debouncer,
    staleness_timeout: Duration,
    last_sample_at: Option<Instant>,
    last_confidence: f32,
}

impl AffectSignal {
    pub fn new(rx: mpsc::Receiver<AffectSample>, config: &AffectConfig) -> Self {
        Self {
            rx,
            debouncer: Debouncer::from_config(config),
            staleness_timeout: config.staleness_timeout(),
            last_sample_at: None,
            last_confidence: 0.0,
        }
    }

    /// Drain whatever samples have arrived, run them through the
    /// debouncer, and return any transitions plus the raw samples for the
    /// session history. Non-blocking.
    pub fn drain(&mut self) -> (Vec<AffectSample>, Vec<AffectTransition>) {
        let mut samples = Vec::new();
        let mut transitions = Vec::new();
        while let Ok(sample) = self.rx.try_recv() {
            self.last_sample_at = Some(Instant::now());
            self.last_confidence = sample.confidence;
            if let Some(t) = self.debouncer.observe(&sample) {
                debug!(from = %t.from, to = %t.to, "debounced affect transition");
                transitions.push(t);
            }
            samples.push(sample);
        }
        (samples, transitions)
    }

    /// Current debounced reading. Sensor silence past the staleness
    /// timeout degrades to neutral rather than erroring.
    pub fn latest(&self) -> AffectReading {
        let stale = match self.last_sample_at {
            Some(at) => at.elapsed() > self.staleness_timeout,
            None => true,
        };
        if stale {
            AffectReading {
                emotion: Emotion::Neutral,
                confidence: 0.0,
                stale: true,
            }
        } else {
            AffectReading {
                emotion: self.debouncer.reported(),
                confidence: self.last_confidence,
                stale: false,
            }
        }
    }
}

/// Spawn the JSON feed poller: reads a classifier output file on an
/// interval and forwards one sample per poll. A missing or malformed feed
/// is sensor silence, not an error; the channel consumer degrades to
/// neutral on its own.
pub fn spawn_feed_poller(
    feed_path: PathBuf,
    poll_interval: Duration,
    tx: mpsc::Sender<AffectSample>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut warned = false;
        loop {
            match read_feed(&feed_path) {
                Ok(Some(sample)) => {
                    warned = false;
                    // A full channel means the consumer is behind; drop
                    // the sample rather than stall the poller.
                    if tx.try_send(sample).is_err() && tx.is_closed() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    if !warned {
                        warn!(feed = %feed_path.display(), error = %e, "affect feed unreadable");
                        warned = true;
                    }
                }
            }
            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(poll_interval).await;
        }
    })
}

/// Parse the classifier feed file: `{"faces_data": [{"emotion": ...,
/// "confidence": ...}]}`, first face wins. Absent file → no sample.
fn read_feed(path: &Path) -> Result<Option<AffectSample>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let json: serde_json::Value = serde_json::from_str(&content)?;
    let Some(face) = json
        .get("faces_data")
        .and_then(|f| f.as_array())
        .and_then(|faces| faces.first())
    else {
        return Ok(None);
    };

    let emotion = match face
        .get("emotion")
        .and_then(|e| e.as_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("happy") => Emotion::Happy,
        Some("confused") => Emotion::Confused,
        Some("frustrated") => Emotion::Frustrated,
        // Unknown labels collapse to neutral.
        _ => Emotion::Neutral,
    };
    let confidence = face
        .get("confidence")
        .and_then(|c| c.as_f64())
        .unwrap_or(1.0) as f32;

    Ok(Some(AffectSample {
        timestamp: Utc::now(),
        emotion,
        confidence,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(emotion: Emotion) -> AffectSample {
        AffectSample {
            timestamp: Utc::now(),
            emotion,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_debouncer_starts_neutral() {
        let d = Debouncer::new(3, Duration::from_secs(2));
        assert_eq!(d.reported(), Emotion::Neutral);
    }

    #[test]
    fn test_jitter_produces_no_transition() {
        let mut d = Debouncer::new(3, Duration::from_secs(60));
        assert!(d.observe(&sample(Emotion::Confused)).is_none());
        assert!(d.observe(&sample(Emotion::Neutral)).is_none());
        assert!(d.observe(&sample(Emotion::Confused)).is_none());
        assert!(d.observe(&sample(Emotion::Happy)).is_none());
        assert_eq!(d.reported(), Emotion::Neutral);
    }

    #[test]
    fn test_three_consecutive_samples_transition_once() {
        let mut d = Debouncer::new(3, Duration::from_secs(60));
        assert!(d.observe(&sample(Emotion::Confused)).is_none());
        assert!(d.observe(&sample(Emotion::Confused)).is_none());
        let t = d.observe(&sample(Emotion::Confused)).unwrap();
        assert_eq!(t.from, Emotion::Neutral);
        assert_eq!(t.to, Emotion::Confused);
        assert_eq!(d.reported(), Emotion::Confused);
        // Further agreeing samples are quiet.
        assert!(d.observe(&sample(Emotion::Confused)).is_none());
    }

    #[test]
    fn test_disagreeing_sample_resets_candidate() {
        let mut d = Debouncer::new(3, Duration::from_secs(60));
        d.observe(&sample(Emotion::Confused));
        d.observe(&sample(Emotion::Confused));
        d.observe(&sample(Emotion::Frustrated));
        // Confused count restarted; two more are not enough.
        d.observe(&sample(Emotion::Confused));
        assert!(d.observe(&sample(Emotion::Confused)).is_none());
        let t = d.observe(&sample(Emotion::Confused));
        assert!(t.is_some());
    }

    #[test]
    fn test_dwell_accepts_persistent_candidate() {
        let mut d = Debouncer::new(100, Duration::from_millis(0));
        let start = Instant::now();
        assert!(d
            .observe_at(&sample(Emotion::Frustrated), start)
            .is_none());
        // Second agreeing sample at/after the dwell deadline is accepted
        // even though the count criterion is far away.
        let t = d.observe_at(&sample(Emotion::Frustrated), start + Duration::from_millis(1));
        assert_eq!(t.unwrap().to, Emotion::Frustrated);
    }

    #[test]
    fn test_return_to_reported_clears_candidate() {
        let mut d = Debouncer::new(2, Duration::from_secs(60));
        d.observe(&sample(Emotion::Confused));
        d.observe(&sample(Emotion::Neutral));
        assert!(d.observe(&sample(Emotion::Confused)).is_none());
        assert_eq!(d.reported(), Emotion::Neutral);
    }

    #[tokio::test]
    async fn test_signal_reports_stale_neutral_without_samples() {
        let (_tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let signal = AffectSignal::new(rx, &rx_config());
        let reading = signal.latest();
        assert!(reading.stale);
        assert_eq!(reading.emotion, Emotion::Neutral);
    }

    #[tokio::test]
    async fn test_signal_drain_and_latest() {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut signal = AffectSignal::new(rx, &rx_config());
        for _ in 0..3 {
            tx.send(sample(Emotion::Confused)).await.unwrap();
        }
        let (samples, transitions) = signal.drain();
        assert_eq!(samples.len(), 3);
        assert_eq!(transitions.len(), 1);
        let reading = signal.latest();
        assert!(!reading.stale);
        assert_eq!(reading.emotion, Emotion::Confused);
    }

    fn rx_config() -> AffectConfig {
        AffectConfig {
            debounce_samples: 3,
            dwell_ms: 60_000,
            staleness_timeout_ms: 5_000,
            feed_path: None,
            poll_interval_ms: 1_000,
        }
    }

    #[test]
    fn test_read_feed_missing_file() {
        let result = read_feed(Path::new("/nonexistent/feed.json")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_read_feed_first_face_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        std::fs::write(
            &path,
            r#"{"faces_data": [{"emotion": "Confused", "confidence": 0.75}, {"emotion": "happy"}]}"#,
        )
        .unwrap();
        let sample = read_feed(&path).unwrap().unwrap();
        assert_eq!(sample.emotion, Emotion::Confused);
        assert!((sample.confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_read_feed_unknown_emotion_is_neutral() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        std::fs::write(&path, r#"{"faces_data": [{"emotion": "surprised"}]}"#).unwrap();
        assert_eq!(read_feed(&path).unwrap().unwrap().emotion, Emotion::Neutral);
    }
}
