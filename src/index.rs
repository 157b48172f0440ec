//! Content-addressed vector index with approximate nearest-neighbor query.
//!
//! The index keys entries by chunk id and maintains a small HNSW-style
//! layered proximity graph over the vectors, giving logarithmic expected
//! query cost. Upsert of an existing id replaces its vector and metadata
//! in place — no duplicate entries — which is the dedup guarantee that
//! makes re-ingestion idempotent.
//!
//! # Concurrency
//!
//! Entries are held as `Arc<IndexEntry>` behind an `RwLock`ed map:
//! replacing an entry swaps the whole `Arc`, so concurrent queries never
//! observe a torn or partially written vector. The graph topology has its
//! own lock and is only written when a new id is inserted.
//!
//! # Determinism
//!
//! Layer assignment is derived from a hash of the chunk id rather than an
//! RNG, so rebuilding the index from the same entries in the same order
//! produces the same graph. Query results are sorted by descending
//! similarity with ties broken by ascending chunk ordinal.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

use crate::embedding::cosine_similarity;
use crate::models::ChunkMetadata;

/// Max neighbors per node on upper layers; layer 0 allows twice this.
const M: usize = 16;
/// Candidate list size while building neighbor links.
const EF_CONSTRUCTION: usize = 64;
/// Minimum candidate list size at query time.
const EF_SEARCH: usize = 64;

/// One indexed vector with its provenance. Owned exclusively by the
/// index; never mutated after insert — updates replace the whole entry.
#[derive(Debug)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A scored match returned from [`EmbeddingIndex::query`].
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub chunk_id: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

struct Node {
    chunk_id: String,
    level: usize,
    /// Adjacency per layer, `neighbors[l]` for layers 0..=level.
    neighbors: Vec<Vec<usize>>,
}

#[derive(Default)]
struct Graph {
    nodes: Vec<Node>,
    entry_point: Option<usize>,
}

pub struct EmbeddingIndex {
    dims: usize,
    graph: RwLock<Graph>,
    entries: RwLock<HashMap<String, Arc<IndexEntry>>>,
}

/// f32 similarity ordered for use in heaps. NaN never occurs because
/// cosine similarity of finite vectors is finite.
#[derive(PartialEq)]
struct Scored(f32, usize);

impl Eq for Scored {}
impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scored {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0).then(self.1.cmp(&other.1))
    }
}

impl EmbeddingIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            graph: RwLock::new(Graph::default()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(chunk_id)
    }

    /// Insert or replace the entry for `chunk_id`.
    ///
    /// An existing id gets its vector and metadata replaced in place via an
    /// `Arc` swap; the entry count does not grow and the graph is left
    /// untouched. A new id is linked into the proximity graph.
    pub fn upsert(&self, chunk_id: &str, vector: Vec<f32>, metadata: ChunkMetadata) -> Result<()> {
        if vector.len() != self.dims {
            bail!(
                "Vector dims mismatch for {}: expected {}, got {}",
                chunk_id,
                self.dims,
                vector.len()
            );
        }

        let entry = Arc::new(IndexEntry {
            chunk_id: chunk_id.to_string(),
            vector,
            metadata,
        });

        let existing = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.insert(chunk_id.to_string(), entry).is_some()
        };
        if existing {
            return Ok(());
        }

        let mut graph = self.graph.write().unwrap_or_else(|e| e.into_inner());
        self.link_new_node(&mut graph, chunk_id);
        Ok(())
    }

    /// Return at most `k` entries by descending cosine similarity; ties
    /// broken by ascending chunk ordinal. An empty index yields an empty
    /// vector, never an error.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        if vector.len() != self.dims {
            bail!(
                "Query dims mismatch: expected {}, got {}",
                self.dims,
                vector.len()
            );
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let graph = self.graph.read().unwrap_or_else(|e| e.into_inner());
        let Some(mut current) = graph.entry_point else {
            return Ok(Vec::new());
        };

        // Greedy descent through the upper layers.
        let top = graph.nodes[current].level;
        for layer in (1..=top).rev() {
            current = self.greedy_closest(&graph, vector, current, layer);
        }

        let ef = EF_SEARCH.max(k * 4);
        let candidates = self.search_layer(&graph, vector, current, ef, 0);

        let mut hits: Vec<IndexHit> = candidates
            .into_iter()
            .filter_map(|(node_idx, score)| {
                self.entry(&graph.nodes[node_idx].chunk_id).map(|e| IndexHit {
                    chunk_id: e.chunk_id.clone(),
                    score,
                    metadata: e.metadata.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.metadata.ordinal.cmp(&b.metadata.ordinal))
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn entry(&self, chunk_id: &str) -> Option<Arc<IndexEntry>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(chunk_id)
            .cloned()
    }

    fn similarity(&self, query: &[f32], node: &Node) -> f32 {
        match self.entry(&node.chunk_id) {
            Some(e) => cosine_similarity(query, &e.vector),
            None => f32::NEG_INFINITY,
        }
    }

    fn greedy_closest(&self, graph: &Graph, query: &[f32], start: usize, layer: usize) -> usize {
        let mut current = start;
        let mut best = self.similarity(query, &graph.nodes[current]);
        loop {
            let mut improved = false;
            if layer < graph.nodes[current].neighbors.len() {
                for &n in &graph.nodes[current].neighbors[layer] {
                    let sim = self.similarity(query, &graph.nodes[n]);
                    if sim > best {
                        best = sim;
                        current = n;
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Best-first expansion at one layer, keeping the `ef` best visited.
    fn search_layer(
        &self,
        graph: &Graph,
        query: &[f32],
        start: usize,
        ef: usize,
        layer: usize,
    ) -> Vec<(usize, f32)> {
        let start_sim = self.similarity(query, &graph.nodes[start]);
        let mut visited: HashSet<usize> = HashSet::from([start]);
        // Max-heap of frontier nodes, min-heap of current best set.
        let mut frontier: BinaryHeap<Scored> = BinaryHeap::from([Scored(start_sim, start)]);
        let mut best: BinaryHeap<Reverse<Scored>> =
            BinaryHeap::from([Reverse(Scored(start_sim, start))]);

        while let Some(Scored(sim, node_idx)) = frontier.pop() {
            let worst = best.peek().map(|Reverse(s)| s.0).unwrap_or(f32::NEG_INFINITY);
            if sim < worst && best.len() >= ef {
                break;
            }

            if layer < graph.nodes[node_idx].neighbors.len() {
                for &n in &graph.nodes[node_idx].neighbors[layer] {
                    if !visited.insert(n) {
                        continue;
                    }
                    let n_sim = self.similarity(query, &graph.nodes[n]);
                    let worst = best.peek().map(|Reverse(s)| s.0).unwrap_or(f32::NEG_INFINITY);
                    if best.len() < ef || n_sim > worst {
                        frontier.push(Scored(n_sim, n));
                        best.push(Reverse(Scored(n_sim, n)));
                        if best.len() > ef {
                            best.pop();
                        }
                    }
                }
            }
        }

        best.into_iter().map(|Reverse(Scored(s, i))| (i, s)).collect()
    }

    fn link_new_node(&self, graph: &mut Graph, chunk_id: &str) {
        let level = assign_level(chunk_id);
        let idx = graph.nodes.len();
        graph.nodes.push(Node {
            chunk_id: chunk_id.to_string(),
            level,
            neighbors: vec![Vec::new(); level + 1],
        });

        let Some(vector) = self.entry(chunk_id).map(|e| e.vector.clone()) else {
            return;
        };

        let Some(ep) = graph.entry_point else {
            graph.entry_point = Some(idx);
            return;
        };

        let mut current = ep;
        let top = graph.nodes[ep].level;

        // Descend to one layer above the new node's level.
        for layer in ((level + 1)..=top).rev() {
            current = self.greedy_closest(graph, &vector, current, layer);
        }

        // Link into every layer the new node participates in.
        for layer in (0..=level.min(top)).rev() {
            let candidates = self.search_layer(graph, &vector, current, EF_CONSTRUCTION, layer);
            let mut sorted = candidates;
            sorted.sort_by(|a, b| b.1.total_cmp(&a.1));

            let cap = layer_cap(layer);
            let selected: Vec<usize> = sorted.iter().take(M).map(|&(n, _)| n).collect();

            for &n in &selected {
                graph.nodes[idx].neighbors[layer].push(n);
                graph.nodes[n].neighbors[layer].push(idx);
                if graph.nodes[n].neighbors[layer].len() > cap {
                    self.prune_neighbors(graph, n, layer, cap);
                }
            }

            if let Some(&(closest, _)) = sorted.first() {
                current = closest;
            }
        }

        if level > top {
            graph.entry_point = Some(idx);
        }
    }

    /// Keep only the `cap` most similar neighbors of `node_idx` at `layer`.
    fn prune_neighbors(&self, graph: &mut Graph, node_idx: usize, layer: usize, cap: usize) {
        let Some(base) = self.entry(&graph.nodes[node_idx].chunk_id) else {
            return;
        };
        let mut scored: Vec<(usize, f32)> = graph.nodes[node_idx].neighbors[layer]
            .iter()
            .map(|&n| (n, self.similarity(&base.vector, &graph.nodes[n])))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(cap);
        graph.nodes[node_idx].neighbors[layer] = scored.into_iter().map(|(n, _)| n).collect();
    }
}

fn layer_cap(layer: usize) -> usize {
    if layer == 0 {
        M * 2
    } else {
        M
    }
}

/// Deterministic geometric layer assignment from the chunk id hash.
fn assign_level(chunk_id: &str) -> usize {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let raw = u64::from_le_bytes(digest[..8].try_into().unwrap_or([0u8; 8]));
    // Uniform in (0, 1], then the usual -ln(u) / ln(M) draw.
    let u = (raw as f64 + 1.0) / (u64::MAX as f64 + 2.0);
    let ml = 1.0 / (M as f64).ln();
    ((-u.ln()) * ml).floor() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(ordinal: i64) -> ChunkMetadata {
        ChunkMetadata {
            source_uri: "file:///doc.txt".to_string(),
            ordinal,
        }
    }

    /// Deterministic unit vector on a 4-dimensional basis mix.
    fn vec4(a: f32, b: f32, c: f32, d: f32) -> Vec<f32> {
        vec![a, b, c, d]
    }

    #[test]
    fn test_empty_index_query_returns_empty() {
        let index = EmbeddingIndex::new(4);
        let hits = index.query(&vec4(1.0, 0.0, 0.0, 0.0), 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_dims_mismatch_rejected() {
        let index = EmbeddingIndex::new(4);
        assert!(index.upsert("c1", vec![1.0, 2.0], meta(0)).is_err());
        assert!(index.query(&[1.0, 2.0], 5).is_err());
    }

    #[test]
    fn test_upsert_same_id_twice_does_not_grow() {
        let index = EmbeddingIndex::new(4);
        index.upsert("c1", vec4(1.0, 0.0, 0.0, 0.0), meta(0)).unwrap();
        index.upsert("c1", vec4(0.0, 1.0, 0.0, 0.0), meta(7)).unwrap();
        assert_eq!(index.len(), 1);

        // Replacement is visible: the new vector and metadata win.
        let hits = index.query(&vec4(0.0, 1.0, 0.0, 0.0), 1).unwrap();
        assert_eq!(hits[0].chunk_id, "c1");
        assert_eq!(hits[0].metadata.ordinal, 7);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_exact_match_ranks_first() {
        let index = EmbeddingIndex::new(4);
        index.upsert("gd", vec4(1.0, 0.0, 0.0, 0.0), meta(0)).unwrap();
        index.upsert("u1", vec4(0.0, 1.0, 0.0, 0.0), meta(1)).unwrap();
        index.upsert("u2", vec4(0.0, 0.0, 1.0, 0.0), meta(2)).unwrap();
        index.upsert("u3", vec4(0.0, 0.0, 0.0, 1.0), meta(3)).unwrap();
        index.upsert("u4", vec4(0.0, 0.5, 0.5, 0.0), meta(4)).unwrap();

        let hits = index.query(&vec4(1.0, 0.0, 0.0, 0.0), 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk_id, "gd");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_scores_non_increasing_and_k_respected() {
        let index = EmbeddingIndex::new(4);
        for i in 0..20 {
            let angle = i as f32 * 0.1;
            index
                .upsert(
                    &format!("c{}", i),
                    vec4(angle.cos(), angle.sin(), 0.0, 0.0),
                    meta(i),
                )
                .unwrap();
        }
        let hits = index.query(&vec4(1.0, 0.0, 0.0, 0.0), 7).unwrap();
        assert_eq!(hits.len(), 7);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_ties_broken_by_ascending_ordinal() {
        let index = EmbeddingIndex::new(4);
        // Identical vectors, distinct ordinals, inserted out of order.
        index.upsert("b", vec4(1.0, 0.0, 0.0, 0.0), meta(5)).unwrap();
        index.upsert("a", vec4(1.0, 0.0, 0.0, 0.0), meta(2)).unwrap();
        index.upsert("c", vec4(1.0, 0.0, 0.0, 0.0), meta(9)).unwrap();

        let hits = index.query(&vec4(1.0, 0.0, 0.0, 0.0), 3).unwrap();
        let ordinals: Vec<i64> = hits.iter().map(|h| h.metadata.ordinal).collect();
        assert_eq!(ordinals, vec![2, 5, 9]);
    }

    #[test]
    fn test_level_assignment_deterministic() {
        assert_eq!(assign_level("chunk-42"), assign_level("chunk-42"));
    }

    #[test]
    fn test_concurrent_reads_during_writes() {
        use std::sync::Arc as StdArc;
        let index = StdArc::new(EmbeddingIndex::new(4));
        for i in 0..50 {
            let angle = i as f32 * 0.05;
            index
                .upsert(
                    &format!("c{}", i),
                    vec4(angle.cos(), angle.sin(), 0.0, 0.0),
                    meta(i),
                )
                .unwrap();
        }

        let writer = {
            let index = index.clone();
            std::thread::spawn(move || {
                for round in 0..20 {
                    for i in 0..50 {
                        let angle = (i + round) as f32 * 0.05;
                        index
                            .upsert(
                                &format!("c{}", i),
                                vec4(angle.cos(), angle.sin(), 0.0, 0.0),
                                meta(i),
                            )
                            .unwrap();
                    }
                }
            })
        };

        // Readers must always see whole vectors: every hit's score stays
        // within the valid cosine range and entry count never changes.
        for _ in 0..100 {
            let hits = index.query(&vec4(1.0, 0.0, 0.0, 0.0), 5).unwrap();
            assert!(!hits.is_empty());
            for h in &hits {
                assert!(h.score >= -1.0001 && h.score <= 1.0001);
            }
            assert_eq!(index.len(), 50);
        }

        writer.join().unwrap();
    }
}
