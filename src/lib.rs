//! # Tutor Harness
//!
//! A local-first adaptive tutoring engine.
//!
//! Tutor Harness ingests source material into a retrieval knowledge base
//! (chunking, embedding, vector index), then drives a four-segment
//! tutoring session whose content is grounded in retrieved passages and
//! whose pacing adapts to a live affect signal from an external
//! engagement classifier.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐
//! │  Sources  │──▶│   Pipeline    │──▶│  SQLite   │
//! │ md/txt/pdf│   │ Chunk+Embed  │   │  + Index  │
//! └───────────┘   └──────────────┘   └─────┬─────┘
//!                                          │ retrieve
//!                 ┌──────────────┐   ┌─────▼─────┐
//!   affect feed ─▶│ Orchestrator │◀──│ Retriever │
//!                 │  4 segments  │   └───────────┘
//!                 └──────┬───────┘
//!                        ▼
//!                  final_report.md
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tutor init                          # create database
//! tutor ingest ./docs                 # ingest local files
//! tutor search "newton's second law"  # inspect retrieval
//! tutor run "classical mechanics"     # run an adaptive session
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Source text extraction (markdown, text, PDF) |
//! | [`chunk`] | Windowed text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | In-memory approximate nearest neighbor index |
//! | [`store`] | SQLite persistence |
//! | [`scrape`] | Web article fallback for topics without local material |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieve`] | Top-K retrieval with provenance |
//! | [`plan`] | Four-segment curriculum planning |
//! | [`generate`] | Content and quiz generation collaborators |
//! | [`affect`] | Affect sensing, debouncing, feed polling |
//! | [`session`] | Session orchestration |
//! | [`report`] | Final report rendering |

pub mod affect;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod generate;
pub mod index;
pub mod ingest;
pub mod models;
pub mod plan;
pub mod report;
pub mod retrieve;
pub mod scrape;
pub mod session;
pub mod store;
