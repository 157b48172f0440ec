//! Session content planning.
//!
//! A session always follows the same four-part arc regardless of topic:
//! orientation, core concepts, a worked example, and synthesis with a
//! short assessment. The plan carries a per-segment focus query used to
//! retrieve grounding material for that segment alone.

use crate::models::Segment;

pub const SEGMENT_COUNT: usize = 4;

#[derive(Debug, Clone)]
pub struct PlannedSegment {
    pub index: usize,
    pub title: String,
    /// Retrieval query scoped to this segment's slice of the topic.
    pub focus_query: String,
}

#[derive(Debug, Clone)]
pub struct ContentPlan {
    pub topic: String,
    pub segments: Vec<PlannedSegment>,
}

impl ContentPlan {
    /// Derive the fixed four-segment arc for a topic. Deterministic: the
    /// same topic always yields the same plan.
    pub fn derive(topic: &str) -> Self {
        let topic = topic.trim().to_string();
        let segments = vec![
            PlannedSegment {
                index: 1,
                title: format!("Introduction to {}", topic),
                focus_query: format!("{} overview motivation fundamentals", topic),
            },
            PlannedSegment {
                index: 2,
                title: format!("Core Concepts of {}", topic),
                focus_query: format!("{} key concepts principles definitions", topic),
            },
            PlannedSegment {
                index: 3,
                title: format!("{} in Practice", topic),
                focus_query: format!("{} worked example application walkthrough", topic),
            },
            PlannedSegment {
                index: 4,
                title: format!("Review and Assessment: {}", topic),
                focus_query: format!("{} summary review common pitfalls", topic),
            },
        ];
        Self { topic, segments }
    }

    /// Materialize the plan as session segments, all in the planned state.
    pub fn to_segments(&self) -> Vec<Segment> {
        self.segments
            .iter()
            .map(|p| Segment::planned(p.index, &p.title))
            .collect()
    }

    pub fn segment(&self, index: usize) -> Option<&PlannedSegment> {
        self.segments.get(index.checked_sub(1)?)
    }
}
