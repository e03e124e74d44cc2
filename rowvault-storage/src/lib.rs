//! # rowvault Storage
//!
//! Versioned, content-addressed storage for tabular datasets.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Write Path                             │
//! │                                                             │
//! │  Rows ──> Row Store (hash, dedup) ──> Commit Graph          │
//! │                                          │                  │
//! │                                          ▼                  │
//! │                                  Ref Store (CAS update)     │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Read Path                              │
//! │                                                             │
//! │  ref name ──> Ref Store ──> commit id ──> Manifest          │
//! │                                              │              │
//! │                                              ▼              │
//! │                                   Row Store (LRU cached)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod commit_graph;
pub mod datasets;
pub mod refs;
pub mod row_store;

pub use commit_graph::CommitGraph;
pub use datasets::DatasetStore;
pub use refs::RefStore;
pub use row_store::{DiskRowStore, MemoryRowStore};
