//! Live ranking engine for faculty evaluation campaigns.
//!
//! Evaluation submissions stream in from a document store that only offers
//! index-constrained queries. This crate keeps a resilient subscription on
//! that stream, normalizes the loosely-typed records, and recomputes ranked
//! per-professor, per-category rubric scores on every snapshot.

pub mod aggregate;
pub mod category;
pub mod config;
pub mod db;
pub mod error;
pub mod feeds;
pub mod memory;
pub mod models;
pub mod normalize;
pub mod rankings;
pub mod report;
pub mod store;
pub mod subscription;
pub mod suppression;

pub use error::{Error, Result};
pub use rankings::{LiveRankings, RankingBoard, RankingSnapshot};
pub use store::{DocumentStore, StoreError};
