//! End-of-session report rendering.
//!
//! Purely a function of the frozen [`SessionState`]: the same state always
//! renders the same markdown (timestamps excepted, since they live in the
//! state itself). Covers per-segment affect distribution over each
//! presentation window, the adaptation log with degradation notes, the
//! quiz outcome, and the feedback lines keyed off score and observed
//! affect.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::{Emotion, SegmentStatus, SessionState};

/// Render the report and write it under the output directory as
/// `final_report.md`. Returns the written path.
pub fn write_report(state: &SessionState, output_dir: &Path) -> Result<PathBuf> {
    let rendered = render(state);
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output dir {}", output_dir.display()))?;
    let path = output_dir.join("final_report.md");
    std::fs::write(&path, &rendered)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "final report written");
    Ok(path)
}

/// Render the session record to markdown.
pub fn render(state: &SessionState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Learning Session Report for {}", state.learner);
    let _ = writeln!(out);
    let _ = writeln!(out, "**Topic:** {}", state.topic);
    let _ = writeln!(out, "**Session ID:** {}", state.session_id);
    let _ = writeln!(out);

    let _ = writeln!(out, "## Performance Summary");
    let _ = writeln!(out);
    match &state.quiz {
        Some(quiz) => {
            let _ = writeln!(
                out,
                "- **Final Quiz Score:** {:.0}% ({}/{} correct)",
                quiz.score() * 100.0,
                quiz.correct,
                quiz.questions
            );
        }
        None => {
            let _ = writeln!(out, "- **Final Quiz Score:** not assessed");
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Segments");
    let _ = writeln!(out);
    for seg in &state.segments {
        let _ = writeln!(
            out,
            "- **{}. {}** — {} pacing{}{}",
            seg.index,
            seg.title,
            seg.pacing,
            match &seg.content_ref {
                Some(r) => format!(", content: `{}`", r),
                None => String::from(", no content produced"),
            },
            match &seg.degraded_note {
                Some(note) => format!(" — degraded: {}", note),
                None => String::new(),
            }
        );
        let distribution = segment_affect_distribution(state, seg.index);
        if !distribution.is_empty() {
            let line = distribution
                .iter()
                .map(|(emotion, count)| format!("{} x{}", emotion, count))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(out, "  - observed affect: {}", line);
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Engagement Analysis");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "- **Dominant Emotional State:** {}",
        dominant_emotion(state)
            .map(|e| capitalize(&e.to_string()))
            .unwrap_or_else(|| String::from("N/A"))
    );
    if !state.affect_history.is_empty() {
        let trend = state
            .affect_history
            .iter()
            .map(|s| s.emotion.to_string())
            .collect::<Vec<_>>()
            .join(" -> ");
        let _ = writeln!(out, "- **Emotion Trend during Session:** {}", trend);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Adaptations");
    let _ = writeln!(out);
    if state.adaptation_log.is_empty() {
        let _ = writeln!(out, "No pacing adaptations were needed.");
    } else {
        for event in &state.adaptation_log {
            let _ = writeln!(
                out,
                "- {}: detected {} (confidence {:.2}), segment {} re-paced to {}{}",
                event.timestamp.format("%H:%M:%S"),
                event.trigger_emotion,
                event.trigger_confidence,
                event.target_segment_index,
                event.decided_pacing,
                match &event.degraded_note {
                    Some(note) => format!(" — degraded: {}", note),
                    None => String::new(),
                }
            );
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Personalized Feedback");
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", feedback(state));

    out
}

/// Raw sample counts per emotion within one segment's presentation
/// window, ordered by descending count then emotion name for stable
/// output.
fn segment_affect_distribution(state: &SessionState, index: usize) -> Vec<(Emotion, usize)> {
    let seg = state.segment(index);
    if seg.status != SegmentStatus::Presented {
        return Vec::new();
    }
    let (Some(from), Some(until)) = (seg.presented_from, seg.presented_until) else {
        return Vec::new();
    };

    let mut counts: HashMap<Emotion, usize> = HashMap::new();
    for sample in &state.affect_history {
        if sample.timestamp >= from && sample.timestamp <= until {
            *counts.entry(sample.emotion).or_insert(0) += 1;
        }
    }
    let mut out: Vec<(Emotion, usize)> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.to_string().cmp(&b.0.to_string())));
    out
}

fn dominant_emotion(state: &SessionState) -> Option<Emotion> {
    let mut counts: HashMap<Emotion, usize> = HashMap::new();
    for sample in &state.affect_history {
        *counts.entry(sample.emotion).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.to_string().cmp(&a.0.to_string())))
        .map(|(emotion, _)| emotion)
}

fn feedback(state: &SessionState) -> String {
    let mut out = String::new();
    let score = state.quiz.as_ref().map(|q| q.score());
    match score {
        Some(s) if s < 0.7 => out.push_str(
            "It seems you found some of the concepts challenging. We recommend \
             revisiting the generated segment content before moving on. ",
        ),
        Some(_) => out.push_str("Excellent work! You have a solid grasp of the material. "),
        None => out.push_str("The quiz could not be assessed this session. "),
    }

    let struggled = state
        .affect_history
        .iter()
        .any(|s| s.emotion.triggers_adaptation());
    if struggled {
        out.push_str(
            "We noticed you may have been confused at times. The content was \
             adapted to a slower, more explanatory pace; revisiting those \
             segments might be helpful.",
        );
    } else {
        out.push_str("Your engagement levels appeared stable and positive throughout the session.");
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
