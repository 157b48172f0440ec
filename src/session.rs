//! Session orchestration: the phase machine that drives a four-segment
//! tutoring session against the generation and sensing collaborators.
//!
//! The orchestrator owns the [`SessionState`] exclusively. Generation runs
//! in spawned tasks that report back over a channel; every task carries a
//! ticket, and a result is committed only if its ticket is still the
//! current one for that segment. Superseding a regeneration (a second
//! debounced affect flip for the same target) aborts the old task, raises
//! its cancel flag, and issues a fresh ticket, so a cancelled task's
//! output can never land in the session record.
//!
//! Presentation is never interrupted: adaptation always targets the next
//! unpresented segment. At a segment boundary the orchestrator waits a
//! bounded time for an in-flight regeneration, then falls back to the
//! last ready version and notes the degradation in the adaptation log.

use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::affect::{AffectSignal, AffectTransition};
use crate::config::{AffectConfig, SessionConfig};
use crate::generate::{Assessor, ContentRef, Generator};
use crate::models::{AdaptationEvent, Pacing, SegmentStatus, SessionState};
use crate::plan::{ContentPlan, SEGMENT_COUNT};

/// Orchestrator phase, advanced strictly forward.
///
/// Ingestion is not a phase here: material must exist before the
/// orchestrator is constructed, so the caller runs it first and hands in
/// the groundings. Likewise there is no distinct adapting phase;
/// adaptation happens inline while a segment presents, regenerating the
/// next segment in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Presenting(usize),
    Reporting,
    Complete,
}

struct GenOutcome {
    segment_index: usize,
    ticket: u64,
    pacing: Pacing,
    result: Result<ContentRef>,
}

struct InFlight {
    ticket: u64,
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
}

pub struct SessionOrchestrator {
    session_cfg: SessionConfig,
    affect_cfg: AffectConfig,
    generator: Arc<dyn Generator>,
    assessor: Arc<dyn Assessor>,
    signal: AffectSignal,
    state: SessionState,
    plan: ContentPlan,
    /// Grounding context per segment, fixed at planning time. Pacing
    /// changes regenerate against the same grounding.
    groundings: Vec<String>,
    phase: Phase,
    outcome_tx: mpsc::Sender<GenOutcome>,
    outcome_rx: mpsc::Receiver<GenOutcome>,
    /// Current ticket per segment (1-based key); an outcome with any
    /// other ticket is discarded.
    expected_ticket: Vec<u64>,
    next_ticket: u64,
    in_flight: HashMap<usize, InFlight>,
}

impl SessionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_cfg: SessionConfig,
        affect_cfg: AffectConfig,
        topic: &str,
        learner: &str,
        groundings: Vec<String>,
        generator: Arc<dyn Generator>,
        assessor: Arc<dyn Assessor>,
        signal: AffectSignal,
    ) -> Self {
        let plan = ContentPlan::derive(topic);
        let state = SessionState::new(topic, learner, plan.to_segments());
        let (outcome_tx, outcome_rx) = mpsc::channel(SEGMENT_COUNT * 2);
        let mut groundings = groundings;
        groundings.resize(SEGMENT_COUNT, String::new());
        Self {
            session_cfg,
            affect_cfg,
            generator,
            assessor,
            signal,
            state,
            plan,
            groundings,
            phase: Phase::Planning,
            outcome_tx,
            outcome_rx,
            expected_ticket: vec![0; SEGMENT_COUNT],
            next_ticket: 1,
            in_flight: HashMap::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drive the session to completion and return the frozen record.
    pub async fn run(mut self) -> Result<SessionState> {
        info!(session = %self.state.session_id, topic = %self.state.topic, "session starting");

        // Planning: kick off generation for all four segments up front so
        // later segments build while earlier ones present.
        for index in 1..=SEGMENT_COUNT {
            self.spawn_generation(index, Pacing::Normal, false);
        }

        for index in 1..=SEGMENT_COUNT {
            self.await_segment_ready(index).await;
            self.phase = Phase::Presenting(index);
            self.present_segment(index).await;
        }

        self.phase = Phase::Reporting;
        self.cancel_all();

        let grounding = self.groundings.join("\n\n");
        match self.assessor.assess(&self.state.topic, &grounding).await {
            Ok(outcome) => {
                info!(
                    questions = outcome.questions,
                    correct = outcome.correct,
                    "quiz complete"
                );
                self.state.quiz = Some(outcome);
            }
            Err(e) => {
                // The session record survives without a quiz.
                warn!(error = %e, "assessment failed, session continues without a quiz");
            }
        }

        self.phase = Phase::Complete;
        Ok(self.state)
    }

    /// Present one segment for its configured length, polling the affect
    /// signal throughout. Presentation itself is never interrupted.
    async fn present_segment(&mut self, index: usize) {
        self.state.current_segment = index;
        {
            let seg = self.state.segment_mut(index);
            seg.presented_from = Some(Utc::now());
            info!(segment = index, title = %seg.title, pacing = %seg.pacing, "presenting segment");
        }

        let deadline = tokio::time::Instant::now() + self.session_cfg.segment_length();
        let mut tick = tokio::time::interval(self.affect_cfg.poll_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            while let Ok(outcome) = self.outcome_rx.try_recv() {
                self.commit(outcome);
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = tick.tick() => {
                    let (samples, transitions) = self.signal.drain();
                    self.state.affect_history.extend(samples);
                    for t in transitions {
                        self.handle_transition(index, t);
                    }
                }
            }
        }

        let seg = self.state.segment_mut(index);
        seg.presented_until = Some(Utc::now());
        seg.status = SegmentStatus::Presented;
    }

    /// React to a debounced affect transition during presentation of
    /// segment `presenting`. Only confusion and frustration adapt, and
    /// only content that has not been presented yet: the next segment.
    fn handle_transition(&mut self, presenting: usize, transition: AffectTransition) {
        if !transition.to.triggers_adaptation() {
            return;
        }
        if presenting >= SEGMENT_COUNT {
            // Nothing left to adapt.
            return;
        }

        let target = presenting + 1;
        info!(
            emotion = %transition.to,
            target = target,
            "debounced affect change, adapting next segment"
        );

        self.state.adaptation_log.push(AdaptationEvent {
            trigger_emotion: transition.to,
            trigger_confidence: transition.confidence,
            target_segment_index: target,
            decided_pacing: Pacing::Slow,
            timestamp: Utc::now(),
            degraded_note: None,
        });

        let seg = self.state.segment_mut(target);
        if seg.status == SegmentStatus::Ready {
            seg.status = SegmentStatus::Superseded;
        }
        self.spawn_generation(target, Pacing::Slow, true);
    }

    /// Start a (re)generation task for a segment, superseding any task
    /// already in flight for it.
    fn spawn_generation(&mut self, index: usize, pacing: Pacing, regen: bool) {
        if let Some(old) = self.in_flight.remove(&index) {
            old.cancel.store(true, Ordering::SeqCst);
            old.handle.abort();
            info!(segment = index, "superseded in-flight regeneration");
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.expected_ticket[index - 1] = ticket;

        {
            let seg = self.state.segment_mut(index);
            if seg.status == SegmentStatus::Planned {
                seg.status = SegmentStatus::Generating;
            }
        }

        let title = self
            .plan
            .segment(index)
            .map(|p| p.title.clone())
            .unwrap_or_default();
        let grounding = self.groundings[index - 1].clone();
        let generator = Arc::clone(&self.generator);
        let tx = self.outcome_tx.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_in_task = Arc::clone(&cancel);

        let handle = tokio::spawn(async move {
            let result = if regen {
                generator
                    .regenerate(index, &title, &grounding, pacing)
                    .await
            } else {
                generator.generate(index, &title, &grounding, pacing).await
            };
            if cancel_in_task.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx
                .send(GenOutcome {
                    segment_index: index,
                    ticket,
                    pacing,
                    result,
                })
                .await;
        });

        self.in_flight.insert(
            index,
            InFlight {
                ticket,
                handle,
                cancel,
            },
        );
    }

    /// Commit a generation outcome if its ticket is still current.
    fn commit(&mut self, outcome: GenOutcome) {
        let index = outcome.segment_index;
        if outcome.ticket != self.expected_ticket[index - 1] {
            // Produced by a superseded task; never committed.
            return;
        }
        if let Some(inflight) = self.in_flight.get(&index) {
            if inflight.ticket == outcome.ticket {
                self.in_flight.remove(&index);
            }
        }

        let seg = self.state.segment_mut(index);
        if seg.status == SegmentStatus::Presented {
            return;
        }
        match outcome.result {
            Ok(content) => {
                seg.content_ref = Some(content.location_string());
                seg.pacing = outcome.pacing;
                seg.status = SegmentStatus::Ready;
                seg.degraded_note = None;
                info!(segment = index, pacing = %outcome.pacing, "segment content ready");
            }
            Err(e) => {
                warn!(segment = index, error = %e, "generation failed, retaining previous content");
                // Fall back to whatever version exists (possibly none).
                seg.status = SegmentStatus::Ready;
                if !self.note_degraded(index, &format!("regeneration failed: {}", e)) {
                    // Initial generation, no adaptation event to annotate;
                    // record the failure on the segment itself.
                    self.state.segment_mut(index).degraded_note =
                        Some(format!("initial generation failed: {}", e));
                }
            }
        }
    }

    /// Bounded wait for a segment to become presentable. On timeout, the
    /// in-flight task is cancelled and the last ready version stands.
    async fn await_segment_ready(&mut self, index: usize) {
        if self.state.segment(index).status == SegmentStatus::Ready {
            return;
        }

        let deadline = tokio::time::Instant::now() + self.session_cfg.regeneration_timeout();
        while self.state.segment(index).status != SegmentStatus::Ready {
            let outcome = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => None,
                outcome = self.outcome_rx.recv() => outcome,
            };
            match outcome {
                Some(outcome) => self.commit(outcome),
                None => {
                    warn!(
                        segment = index,
                        "regeneration timed out, presenting last ready version"
                    );
                    if let Some(old) = self.in_flight.remove(&index) {
                        old.cancel.store(true, Ordering::SeqCst);
                        old.handle.abort();
                    }
                    // Invalidate any late result for this segment.
                    self.expected_ticket[index - 1] = 0;
                    if !self.note_degraded(index, "regeneration timed out, retained prior version")
                    {
                        self.state.segment_mut(index).degraded_note =
                            Some("initial generation timed out".to_string());
                    }
                    self.state.segment_mut(index).status = SegmentStatus::Ready;
                    break;
                }
            }
        }
    }

    /// Attach a degradation note to the most recent adaptation event for
    /// this segment. Returns false when no annotatable event exists, which
    /// means the failure happened outside any adaptation.
    fn note_degraded(&mut self, index: usize, note: &str) -> bool {
        if let Some(event) = self
            .state
            .adaptation_log
            .iter_mut()
            .rev()
            .find(|e| e.target_segment_index == index && e.degraded_note.is_none())
        {
            event.degraded_note = Some(note.to_string());
            return true;
        }
        false
    }

    fn cancel_all(&mut self) {
        for (_, old) in self.in_flight.drain() {
            old.cancel.store(true, Ordering::SeqCst);
            old.handle.abort();
        }
    }
}
