//! # codesim core
//!
//! Shared, runtime-agnostic logic for codesim: the document model, content
//! normalization, trigram vectorization, cosine similarity, the comparison
//! service with its result cache, ingestion job tracking, and the storage
//! abstraction.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. The application
//! crate supplies a concrete [`store::Store`] and drives ingestion.

pub mod cache;
pub mod compare;
pub mod error;
pub mod jobs;
pub mod language;
pub mod models;
pub mod normalize;
pub mod similarity;
pub mod store;
pub mod trigram;

pub use error::{Error, Result};
pub use language::Language;
