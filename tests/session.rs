//! Orchestrator behavior under affect changes, exercised through the
//! public API with scripted collaborators and paused time.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use tutor_harness::affect::AffectSignal;
use tutor_harness::config::{AffectConfig, SessionConfig};
use tutor_harness::generate::{Assessor, ContentRef, Generator};
use tutor_harness::models::{AffectSample, Emotion, Modality, Pacing, QuizOutcome, SegmentStatus};
use tutor_harness::session::SessionOrchestrator;

/// Initial generation is instant; every regeneration gets a sequence
/// number, and all but the latest hang until cancelled.
struct ScriptedGenerator {
    regen_calls: AtomicUsize,
    hang_first_regen: bool,
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        segment_index: usize,
        _title: &str,
        _grounding: &str,
        pacing: Pacing,
    ) -> Result<ContentRef> {
        Ok(ContentRef {
            modality: Modality::Slides,
            location: format!("mem://segment/{}/{}", segment_index, pacing).into(),
            pacing,
        })
    }

    async fn regenerate(
        &self,
        _segment_index: usize,
        _title: &str,
        _grounding: &str,
        pacing: Pacing,
    ) -> Result<ContentRef> {
        let call = self.regen_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang_first_regen && call == 1 {
            tokio::time::sleep(Duration::from_secs(1800)).await;
            panic!("superseded regeneration must never complete");
        }
        Ok(ContentRef {
            modality: Modality::Slides,
            location: format!("mem://regen/{}", call).into(),
            pacing,
        })
    }
}

struct FixedAssessor;

#[async_trait]
impl Assessor for FixedAssessor {
    async fn assess(&self, _topic: &str, _grounding: &str) -> Result<QuizOutcome> {
        Ok(QuizOutcome {
            questions: 5,
            correct: 5,
        })
    }
}

fn session_cfg() -> SessionConfig {
    SessionConfig {
        regeneration_timeout_secs: 5,
        segment_seconds: 2,
        output_dir: "output".into(),
    }
}

fn affect_cfg() -> AffectConfig {
    AffectConfig {
        debounce_samples: 3,
        dwell_ms: 600_000,
        staleness_timeout_ms: 600_000,
        feed_path: None,
        poll_interval_ms: 100,
    }
}

fn sample(emotion: Emotion) -> AffectSample {
    AffectSample {
        timestamp: Utc::now(),
        emotion,
        confidence: 0.9,
    }
}

#[tokio::test(start_paused = true)]
async fn test_second_flip_supersedes_first_regeneration() {
    let generator = Arc::new(ScriptedGenerator {
        regen_calls: AtomicUsize::new(0),
        hang_first_regen: true,
    });
    let (tx, rx) = mpsc::channel(64);
    let cfg = affect_cfg();
    let orch = SessionOrchestrator::new(
        session_cfg(),
        cfg.clone(),
        "gravity",
        "test-learner",
        vec![String::from("grounding"); 4],
        generator.clone(),
        Arc::new(FixedAssessor),
        AffectSignal::new(rx, &cfg),
    );

    let feeder = tokio::spawn(async move {
        // Segment 1 is presenting; first flip starts the hanging
        // regeneration of segment 2.
        tokio::time::sleep(Duration::from_millis(250)).await;
        for _ in 0..3 {
            let _ = tx.send(sample(Emotion::Confused)).await;
        }
        // Second flip while the first regeneration is still in flight.
        tokio::time::sleep(Duration::from_millis(400)).await;
        for _ in 0..3 {
            let _ = tx.send(sample(Emotion::Frustrated)).await;
        }
    });

    let state = orch.run().await.unwrap();
    feeder.await.unwrap();

    // Both flips were recorded, both targeting the next segment.
    assert_eq!(state.adaptation_log.len(), 2);
    assert_eq!(state.adaptation_log[0].trigger_emotion, Emotion::Confused);
    assert_eq!(state.adaptation_log[1].trigger_emotion, Emotion::Frustrated);
    assert!(state
        .adaptation_log
        .iter()
        .all(|e| e.target_segment_index == 2 && e.decided_pacing == Pacing::Slow));

    // Only the superseding regeneration's output was committed.
    assert_eq!(generator.regen_calls.load(Ordering::SeqCst), 2);
    let seg = &state.segments[1];
    assert_eq!(seg.status, SegmentStatus::Presented);
    assert_eq!(seg.pacing, Pacing::Slow);
    assert_eq!(seg.content_ref.as_deref(), Some("mem://regen/2"));
}

#[tokio::test(start_paused = true)]
async fn test_adaptation_during_last_segment_is_a_no_op() {
    let generator = Arc::new(ScriptedGenerator {
        regen_calls: AtomicUsize::new(0),
        hang_first_regen: false,
    });
    let (tx, rx) = mpsc::channel(64);
    let cfg = affect_cfg();
    let orch = SessionOrchestrator::new(
        session_cfg(),
        cfg.clone(),
        "gravity",
        "test-learner",
        vec![String::from("grounding"); 4],
        generator.clone(),
        Arc::new(FixedAssessor),
        AffectSignal::new(rx, &cfg),
    );

    let feeder = tokio::spawn(async move {
        // Wait until segment 4 is presenting (3 full segments at 2s
        // each), then flip.
        tokio::time::sleep(Duration::from_millis(6_500)).await;
        for _ in 0..3 {
            let _ = tx.send(sample(Emotion::Confused)).await;
        }
    });

    let state = orch.run().await.unwrap();
    feeder.await.unwrap();

    // Nothing left to adapt: no event, no regeneration.
    assert!(state.adaptation_log.is_empty());
    assert_eq!(generator.regen_calls.load(Ordering::SeqCst), 0);
    assert!(state
        .segments
        .iter()
        .all(|s| s.status == SegmentStatus::Presented && s.pacing == Pacing::Normal));
    // The samples themselves still land in the history.
    assert!(state
        .affect_history
        .iter()
        .any(|s| s.emotion == Emotion::Confused));
}

#[tokio::test(start_paused = true)]
async fn test_presentation_order_and_windows_are_strict() {
    let generator = Arc::new(ScriptedGenerator {
        regen_calls: AtomicUsize::new(0),
        hang_first_regen: false,
    });
    let (_tx, rx) = mpsc::channel(64);
    let cfg = affect_cfg();
    let orch = SessionOrchestrator::new(
        session_cfg(),
        cfg.clone(),
        "gravity",
        "test-learner",
        Vec::new(),
        generator,
        Arc::new(FixedAssessor),
        AffectSignal::new(rx, &cfg),
    );

    let state = orch.run().await.unwrap();

    assert_eq!(state.segments.len(), 4);
    for window in state.segments.windows(2) {
        let earlier = window[0].presented_until.unwrap();
        let later = window[1].presented_from.unwrap();
        assert!(later >= earlier);
    }
    assert_eq!(state.quiz.as_ref().unwrap().questions, 5);
}
