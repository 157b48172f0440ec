//! Core data models used throughout Tutor Harness.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the ingestion pipeline, plus the session-side records
//! (segments, affect samples, adaptation events) owned by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized source document produced by the ingestor.
///
/// `id` is derived from `source_uri` so re-ingesting the same source maps
/// to the same document row.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source_uri: String,
    pub title: Option<String>,
    pub raw_text: String,
}

/// A bounded passage of a document's text.
///
/// `id` is a deterministic hash of `(document_id, ordinal, text)`, which
/// makes re-ingestion of unchanged content idempotent: identical content
/// yields identical ids, and the index upserts by id.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub ordinal: i64,
    pub text: String,
    pub token_count: usize,
}

/// Provenance metadata carried alongside each indexed vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMetadata {
    pub source_uri: String,
    pub ordinal: i64,
}

/// A scored passage returned from the retriever, ordered descending by
/// score with ties broken by ascending ordinal.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub score: f32,
    pub text: String,
    pub source_uri: String,
    pub ordinal: i64,
}

/// Counters and warnings from one ingestion batch.
///
/// A bad document or a chunk whose embedding never succeeds is recorded
/// here rather than failing the batch.
#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub documents_ingested: u64,
    pub documents_skipped: u64,
    pub chunks_written: u64,
    pub chunks_dropped: u64,
    pub warnings: Vec<String>,
}

// ============ Session-side records ============

/// Lifecycle of a curriculum segment.
///
/// `Superseded` marks a segment whose ready content is being replaced by an
/// adapted regeneration before it was ever presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Planned,
    Generating,
    Ready,
    Presented,
    Superseded,
}

/// Presentation pacing requested from the generation collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    Normal,
    Slow,
}

impl std::fmt::Display for Pacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pacing::Normal => write!(f, "normal"),
            Pacing::Slow => write!(f, "slow"),
        }
    }
}

/// Delivery form of a generated segment artifact. Selected in config and
/// carried through to the prompt shape and artifact name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    #[default]
    Slides,
    AudioScript,
    Video,
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modality::Slides => write!(f, "slides"),
            Modality::AudioScript => write!(f, "audio-script"),
            Modality::Video => write!(f, "video"),
        }
    }
}

/// One of the four curriculum segments.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    /// 1-based position in the fixed four-segment curriculum.
    pub index: usize,
    pub title: String,
    pub status: SegmentStatus,
    pub pacing: Pacing,
    /// Opaque reference handed back by the generation collaborator.
    pub content_ref: Option<String>,
    /// Presentation window, set when the segment starts and finishes.
    pub presented_from: Option<DateTime<Utc>>,
    pub presented_until: Option<DateTime<Utc>>,
    /// Set when content generation for this segment failed or timed out
    /// outside any adaptation, so the session presented degraded content.
    pub degraded_note: Option<String>,
}

impl Segment {
    pub fn planned(index: usize, title: &str) -> Self {
        Self {
            index,
            title: title.to_string(),
            status: SegmentStatus::Planned,
            pacing: Pacing::Normal,
            content_ref: None,
            presented_from: None,
            presented_until: None,
            degraded_note: None,
        }
    }
}

/// Emotion classes consumed from the sensing collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Neutral,
    Happy,
    Confused,
    Frustrated,
}

impl Emotion {
    /// Whether a debounced transition into this emotion should trigger
    /// adaptation of not-yet-presented content.
    pub fn triggers_adaptation(self) -> bool {
        matches!(self, Emotion::Confused | Emotion::Frustrated)
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Emotion::Neutral => write!(f, "neutral"),
            Emotion::Happy => write!(f, "happy"),
            Emotion::Confused => write!(f, "confused"),
            Emotion::Frustrated => write!(f, "frustrated"),
        }
    }
}

/// One raw classifier observation. Produced externally; never mutated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AffectSample {
    pub timestamp: DateTime<Utc>,
    pub emotion: Emotion,
    pub confidence: f32,
}

/// Immutable audit record of one adaptation decision.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptationEvent {
    pub trigger_emotion: Emotion,
    pub trigger_confidence: f32,
    pub target_segment_index: usize,
    pub decided_pacing: Pacing,
    pub timestamp: DateTime<Utc>,
    /// Set when the regeneration failed or timed out and the session fell
    /// back to the retained content.
    pub degraded_note: Option<String>,
}

/// Quiz outcome passed through from the external assessment collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct QuizOutcome {
    pub questions: u32,
    pub correct: u32,
}

impl QuizOutcome {
    pub fn score(&self) -> f64 {
        if self.questions == 0 {
            0.0
        } else {
            f64::from(self.correct) / f64::from(self.questions)
        }
    }
}

/// The single mutable session record, owned exclusively by the
/// orchestrator for the session's lifetime and frozen at the end for the
/// report builder. Collaborators communicate through return values and
/// channels, never by mutating this directly.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub session_id: String,
    pub topic: String,
    pub learner: String,
    pub current_segment: usize,
    pub segments: Vec<Segment>,
    pub affect_history: Vec<AffectSample>,
    pub adaptation_log: Vec<AdaptationEvent>,
    pub quiz: Option<QuizOutcome>,
}

impl SessionState {
    pub fn new(topic: &str, learner: &str, segments: Vec<Segment>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            learner: learner.to_string(),
            current_segment: 0,
            segments,
            affect_history: Vec::new(),
            adaptation_log: Vec::new(),
            quiz: None,
        }
    }

    pub fn segment(&self, index: usize) -> &Segment {
        &self.segments[index - 1]
    }

    pub fn segment_mut(&mut self, index: usize) -> &mut Segment {
        &mut self.segments[index - 1]
    }
}
