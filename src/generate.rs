//! Generation collaborators for segment content and the end-of-session
//! quiz.
//!
//! Content generation is external: the orchestrator hands over a segment
//! title, grounding context, and pacing, and gets back a reference to the
//! produced artifact. [`Generator`] and [`Assessor`] are the seams; the
//! HTTP implementations talk to an Ollama-compatible `/api/generate`
//! endpoint with the same bounded-retry policy as the embedding client and
//! write the generated text under the session output directory.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::config::GenerationConfig;
use crate::models::{Modality, Pacing, QuizOutcome};

/// Reference to a generated artifact on disk.
#[derive(Debug, Clone)]
pub struct ContentRef {
    pub modality: Modality,
    pub location: PathBuf,
    pub pacing: Pacing,
}

impl ContentRef {
    pub fn location_string(&self) -> String {
        self.location.display().to_string()
    }
}

/// Segment content collaborator.
///
/// `regenerate` receives the same grounding as the original `generate`
/// call; only the pacing differs. Implementations must be cancel-safe:
/// the orchestrator may drop the future at any await point.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        segment_index: usize,
        title: &str,
        grounding: &str,
        pacing: Pacing,
    ) -> Result<ContentRef>;

    async fn regenerate(
        &self,
        segment_index: usize,
        title: &str,
        grounding: &str,
        pacing: Pacing,
    ) -> Result<ContentRef> {
        self.generate(segment_index, title, grounding, pacing).await
    }
}

/// Quiz collaborator; invoked once, after the final segment.
#[async_trait]
pub trait Assessor: Send + Sync {
    async fn assess(&self, topic: &str, grounding: &str) -> Result<QuizOutcome>;
}

/// Content generator backed by an Ollama-compatible HTTP endpoint.
pub struct HttpGenerator {
    config: GenerationConfig,
    client: reqwest::Client,
    output_dir: PathBuf,
}

impl HttpGenerator {
    pub fn new(config: &GenerationConfig, output_dir: &Path) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            client,
            output_dir: output_dir.to_path_buf(),
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/generate", self.config.url))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return json
                            .get("response")
                            .and_then(|r| r.as_str())
                            .map(|s| s.to_string())
                            .ok_or_else(|| {
                                anyhow::anyhow!("Invalid generation response: missing response field")
                            });
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Generation API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Generation API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "Generation connection error (is the service running at {}?): {}",
                        self.config.url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Generation failed after retries")))
    }

    async fn write_artifact(
        &self,
        segment_index: usize,
        pacing: Pacing,
        text: &str,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| {
                format!("Failed to create output dir {}", self.output_dir.display())
            })?;
        let path = self.output_dir.join(artifact_file_name(
            self.config.modality,
            segment_index,
            pacing,
        ));
        tokio::fs::write(&path, text)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

fn artifact_file_name(modality: Modality, segment_index: usize, pacing: Pacing) -> String {
    format!("segment_{}_{}_{}.md", segment_index, pacing, modality)
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(
        &self,
        segment_index: usize,
        title: &str,
        grounding: &str,
        pacing: Pacing,
    ) -> Result<ContentRef> {
        let prompt = segment_prompt(title, grounding, pacing, self.config.modality);
        let text = self.complete(&prompt).await?;
        let location = self.write_artifact(segment_index, pacing, &text).await?;
        Ok(ContentRef {
            modality: self.config.modality,
            location,
            pacing,
        })
    }
}

#[async_trait]
impl Assessor for HttpGenerator {
    async fn assess(&self, topic: &str, grounding: &str) -> Result<QuizOutcome> {
        let prompt = quiz_prompt(topic, grounding);
        let text = match self.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                // A missing quiz never fails the session.
                warn!(error = %e, "quiz generation failed, using fallback quiz");
                return Ok(simulated_outcome(FALLBACK_QUESTION_COUNT));
            }
        };

        let questions = count_questions(&text).max(1);
        Ok(simulated_outcome(questions))
    }
}

const FALLBACK_QUESTION_COUNT: u32 = 5;

/// Learner answers are not collected yet; score at a fixed 80% of the
/// generated questions.
fn simulated_outcome(questions: u32) -> QuizOutcome {
    QuizOutcome {
        questions,
        correct: (questions as f64 * 0.8) as u32,
    }
}

fn count_questions(quiz_text: &str) -> u32 {
    quiz_text
        .lines()
        .filter(|line| {
            let line = line.trim_start();
            line.starts_with("Q")
                && line
                    .chars()
                    .nth(1)
                    .map(|c| c.is_ascii_digit())
                    .unwrap_or(false)
        })
        .count() as u32
}

fn segment_prompt(title: &str, grounding: &str, pacing: Pacing, modality: Modality) -> String {
    let pacing_directive = match pacing {
        Pacing::Normal => "Use a standard pace suitable for a motivated learner.",
        Pacing::Slow => {
            "The learner is struggling. Slow down: shorter sentences, more \
             intermediate steps, one extra concrete example, and a brief \
             recap at the end."
        }
    };
    let modality_directive = match modality {
        Modality::Slides => {
            "Format the output as a markdown slide deck: one `##` heading per \
             slide, each followed by 3-5 concise bullet points."
        }
        Modality::AudioScript => {
            "Format the output as a narration script meant to be read aloud: \
             conversational full-sentence prose, no headings, no references \
             to anything visual."
        }
        Modality::Video => {
            "Format the output as a scene-by-scene video script: for each \
             scene, a one-line visual description prefixed with `Scene:` \
             followed by the narration for that scene."
        }
    };
    if grounding.trim().is_empty() {
        format!(
            "Write teaching content for a lesson segment titled \"{}\".\n\
             No source material is available; rely on general knowledge and \
             keep claims conservative.\n{}\n{}",
            title, modality_directive, pacing_directive
        )
    } else {
        format!(
            "Write teaching content for a lesson segment titled \"{}\".\n\
             Ground every claim in the source material below; do not invent \
             facts beyond it.\n{}\n{}\n\nSource material:\n{}",
            title, modality_directive, pacing_directive, grounding
        )
    }
}

fn quiz_prompt(topic: &str, grounding: &str) -> String {
    format!(
        "Create exactly 5 multiple-choice questions about \"{}\" based on \
         the source material below. Number them Q1 through Q5, each with \
         options A-D and the correct answer marked.\n\nSource material:\n{}",
        topic, grounding
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_questions() {
        let text = "Intro line\nQ1. What is X?\nA) ...\nQ2. Why Y?\nQ3: How?\n";
        assert_eq!(count_questions(text), 3);
    }

    #[test]
    fn test_count_questions_ignores_non_questions() {
        assert_eq!(count_questions("Quality matters\nQuery plans\n"), 0);
    }

    #[test]
    fn test_simulated_outcome_scores_eighty_percent() {
        let outcome = simulated_outcome(5);
        assert_eq!(outcome.questions, 5);
        assert_eq!(outcome.correct, 4);
        assert!((outcome.score() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_segment_prompt_carries_pacing() {
        let slow = segment_prompt("Core Concepts", "material", Pacing::Slow, Modality::Slides);
        assert!(slow.contains("Slow down"));
        let normal = segment_prompt("Core Concepts", "material", Pacing::Normal, Modality::Slides);
        assert!(!normal.contains("Slow down"));
    }

    #[test]
    fn test_segment_prompt_shapes_output_per_modality() {
        let slides = segment_prompt("Intro", "material", Pacing::Normal, Modality::Slides);
        assert!(slides.contains("slide deck"));

        let audio = segment_prompt("Intro", "material", Pacing::Normal, Modality::AudioScript);
        assert!(audio.contains("read aloud"));
        assert!(!audio.contains("slide deck"));

        let video = segment_prompt("Intro", "material", Pacing::Normal, Modality::Video);
        assert!(video.contains("scene-by-scene"));
    }

    #[test]
    fn test_segment_prompt_empty_grounding_falls_back() {
        let prompt = segment_prompt("Intro", "   ", Pacing::Normal, Modality::Slides);
        assert!(prompt.contains("No source material"));
        assert!(!prompt.contains("Source material:"));
    }

    #[test]
    fn test_artifact_file_name_per_modality() {
        assert_eq!(
            artifact_file_name(Modality::Slides, 1, Pacing::Normal),
            "segment_1_normal_slides.md"
        );
        assert_eq!(
            artifact_file_name(Modality::AudioScript, 2, Pacing::Slow),
            "segment_2_slow_audio-script.md"
        );
        assert_eq!(
            artifact_file_name(Modality::Video, 3, Pacing::Normal),
            "segment_3_normal_video.md"
        );
    }
}
