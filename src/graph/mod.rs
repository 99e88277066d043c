//! Persistent network graph
//!
//! Directed graph of observed endpoints and the flows between them, backed
//! by a keyed SQLite container. Nodes and edges are upserted with merge
//! semantics; reads return self-consistent snapshots.

mod store;

pub use store::{EdgePatch, GraphStore, NodePatch, StoreError};
