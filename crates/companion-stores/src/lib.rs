//! Store adapters (C1): thin, typed wrappers over the relational store, the
//! vector store, and the KV cache. Every user-data operation carries a
//! `UserId`; the SQL guard and the vector store's filter-by-construction
//! design make it structurally hard to accidentally issue an unscoped query.

pub mod kv;
pub mod profile;
pub mod relational;
pub mod sql_guard;
pub mod vector;

pub use kv::KvCache;
pub use profile::{EngagementSnapshot, UserProfile, UserProfileStore, UserStatus};
pub use qdrant_client::qdrant::{RetrievedPoint, ScoredPoint};
pub use relational::RelationalStore;
pub use vector::{retrieved_payload_str, MemoryKind, VectorStore};
