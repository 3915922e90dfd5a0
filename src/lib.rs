//! # Report Pipeline
//!
//! Acquisition and semantic indexing of periodic financial disclosure
//! reports for a fixed set of companies.
//!
//! A crawler downloads candidate report files; the pipeline normalizes each
//! file's reporting period, deduplicates it against blob storage and the
//! catalog, publishes new artifacts, records them in the catalog and turns
//! their text into vectors for semantic search. One bad document never
//! stops its company and one bad company never stops the batch. Re-runs are
//! idempotent: a `(ticker, year, period)` is cataloged exactly once.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Crawler    │──▶│  Period    │──▶│ Blob dedup + │──▶│ Catalog  │
//! │ (source)    │   │ normalizer │   │   publish    │   │ (SQLite) │
//! └─────────────┘   └────────────┘   └──────────────┘   └────┬─────┘
//!                                                            │
//!                  ┌──────────────┐   ┌──────────────┐       │
//!                  │ Vector index │◀──│ Text indexer │◀──────┘
//!                  │   (Qdrant)   │   │ extract/chunk│
//!                  └──────────────┘   │    /embed    │
//!                                     └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! reports init                          # create the catalog
//! reports run                           # process every configured company
//! reports run-one --query 7702077840 --ticker MOEX --skip-indexing
//! reports list --ticker MOEX
//! reports serve                         # HTTP trigger + catalog API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed failures per stage |
//! | [`period`] | Reporting-period normalizer |
//! | [`blob`] | Blob keys, dedup probe, publishing (S3, in-memory) |
//! | [`catalog`] | Report catalog over SQLite |
//! | [`extract`] | Text extraction from PDF/DOCX/ZIP |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector`] | Vector index abstraction (Qdrant, in-memory) |
//! | [`indexer`] | Extract → chunk → embed → upsert |
//! | [`source`] | Crawler capability and manifest replay |
//! | [`pipeline`] | Batch orchestration |
//! | [`server`] | HTTP trigger and catalog API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod blob;
pub mod catalog;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod migrate;
pub mod models;
pub mod period;
pub mod pipeline;
pub mod server;
pub mod source;
pub mod vector;
