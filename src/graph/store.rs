//! SQLite-backed graph store
//!
//! Two keyed tables (nodes, edges), each row holding the JSON-serialized
//! property blob plus an update stamp. Every upsert commits before the call
//! returns, so recovery after a crash simply reopens the container and
//! surfaces the last-committed state. Same-key upserts are serialized by the
//! connection mutex; readers copy rows out under the same lock, so they
//! always observe a whole node or edge, never a partial merge.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::models::{Edge, Node, NodeState, NodeType, Protocol};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt property blob for {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("edge endpoint missing: {0}")]
    MissingEndpoint(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Partial node update applied by [`GraphStore::upsert_node`].
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub node_type: Option<NodeType>,
    pub label: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub risk_score: Option<f64>,
    /// Added to the stored alert counter
    pub alert_increment: u64,
    pub department: Option<String>,
    pub state: Option<NodeState>,
}

/// Partial edge update applied by [`GraphStore::upsert_edge`].
#[derive(Debug, Clone)]
pub struct EdgePatch {
    pub protocol: Protocol,
    pub dst_port: u16,
    /// Added to the stored byte counter
    pub byte_delta: u64,
    pub last_seen: DateTime<Utc>,
}

/// Thread-safe persistent graph store
#[derive(Clone)]
pub struct GraphStore {
    conn: Arc<Mutex<Connection>>,
}

impl GraphStore {
    /// Open or create the graph container at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        restrict_permissions(path.as_ref())?;
        info!(path = %path.as_ref().display(), "graph store opened");
        Ok(store)
    }

    /// Open a non-persistent in-memory store (`--inmemory` and tests).
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        // journal_mode returns a row, so it goes through the checked API.
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                properties_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS edges (
                source TEXT NOT NULL,
                target TEXT NOT NULL,
                properties_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (source, target)
            );
            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target);
            "#,
        )?;
        Ok(())
    }

    /// Create the node if absent, otherwise merge properties. Shadow type
    /// is sticky: once a node is `shadow` it stays that way until reset.
    pub fn upsert_node(&self, id: &str, patch: NodePatch) -> Result<Node, StoreError> {
        let id = id.to_lowercase();
        let now = patch.last_seen.unwrap_or_else(Utc::now);
        let conn = self.conn.lock().unwrap();

        let existing: Option<String> = conn
            .query_row(
                "SELECT properties_json FROM nodes WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let node = match existing {
            Some(blob) => {
                let mut node: Node =
                    serde_json::from_str(&blob).map_err(|source| StoreError::Corrupt {
                        key: id.clone(),
                        source,
                    })?;

                if let Some(node_type) = patch.node_type {
                    if node.node_type != NodeType::Shadow {
                        node.node_type = node_type;
                    }
                }
                if let Some(label) = patch.label {
                    node.label = label;
                }
                if now > node.last_seen {
                    node.last_seen = now;
                }
                if let Some(risk) = patch.risk_score {
                    node.risk_score = risk.clamp(0.0, 100.0);
                }
                node.alert_count += patch.alert_increment;
                if patch.department.is_some() {
                    node.department = patch.department;
                }
                if let Some(state) = patch.state {
                    node.state = state;
                }
                node
            }
            None => Node {
                id: id.clone(),
                node_type: patch.node_type.unwrap_or(NodeType::External),
                label: patch.label.unwrap_or_else(|| id.clone()),
                first_seen: now,
                last_seen: now,
                risk_score: patch.risk_score.unwrap_or(0.0).clamp(0.0, 100.0),
                alert_count: patch.alert_increment,
                department: patch.department,
                state: patch.state.unwrap_or_default(),
            },
        };

        let blob = serde_json::to_string(&node).map_err(|source| StoreError::Corrupt {
            key: id.clone(),
            source,
        })?;
        conn.execute(
            "INSERT INTO nodes (id, properties_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET properties_json = ?2, updated_at = ?3",
            params![id, blob, now.to_rfc3339()],
        )?;

        Ok(node)
    }

    /// Aggregate an edge observation. Both endpoints must exist.
    pub fn upsert_edge(&self, src: &str, dst: &str, patch: EdgePatch) -> Result<Edge, StoreError> {
        let src = src.to_lowercase();
        let dst = dst.to_lowercase();
        let conn = self.conn.lock().unwrap();

        for endpoint in [&src, &dst] {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM nodes WHERE id = ?1",
                    params![endpoint],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::MissingEndpoint(endpoint.clone()));
            }
        }

        let existing: Option<String> = conn
            .query_row(
                "SELECT properties_json FROM edges WHERE source = ?1 AND target = ?2",
                params![src, dst],
                |row| row.get(0),
            )
            .optional()?;

        let edge = match existing {
            Some(blob) => {
                let mut edge: Edge =
                    serde_json::from_str(&blob).map_err(|source| StoreError::Corrupt {
                        key: format!("{src}->{dst}"),
                        source,
                    })?;
                edge.protocol = patch.protocol;
                edge.dst_port = patch.dst_port;
                edge.byte_count += patch.byte_delta;
                edge.flow_count += 1;
                if patch.last_seen > edge.last_seen {
                    edge.last_seen = patch.last_seen;
                }
                edge
            }
            None => Edge {
                source: src.clone(),
                target: dst.clone(),
                protocol: patch.protocol,
                dst_port: patch.dst_port,
                byte_count: patch.byte_delta,
                flow_count: 1,
                last_seen: patch.last_seen,
            },
        };

        let blob = serde_json::to_string(&edge).map_err(|source| StoreError::Corrupt {
            key: format!("{src}->{dst}"),
            source,
        })?;
        conn.execute(
            "INSERT INTO edges (source, target, properties_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source, target) DO UPDATE SET properties_json = ?3, updated_at = ?4",
            params![src, dst, blob, patch.last_seen.to_rfc3339()],
        )?;

        Ok(edge)
    }

    pub fn get_node(&self, id: &str) -> Result<Option<Node>, StoreError> {
        let id = id.to_lowercase();
        let conn = self.conn.lock().unwrap();
        let blob: Option<String> = conn
            .query_row(
                "SELECT properties_json FROM nodes WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        blob.map(|b| {
            serde_json::from_str(&b).map_err(|source| StoreError::Corrupt { key: id, source })
        })
        .transpose()
    }

    pub fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, properties_json FROM nodes")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (key, blob) = row?;
            nodes.push(
                serde_json::from_str(&blob).map_err(|source| StoreError::Corrupt { key, source })?,
            );
        }
        Ok(nodes)
    }

    pub fn list_edges(&self) -> Result<Vec<Edge>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT source, target, properties_json FROM edges")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut edges = Vec::new();
        for row in rows {
            let (src, dst, blob) = row?;
            edges.push(serde_json::from_str(&blob).map_err(|source| StoreError::Corrupt {
                key: format!("{src}->{dst}"),
                source,
            })?);
        }
        Ok(edges)
    }

    /// Nodes adjacent to `id` in either direction.
    pub fn neighbors(&self, id: &str) -> Result<Vec<Node>, StoreError> {
        let id = id.to_lowercase();
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT n.id, n.properties_json FROM nodes n
             WHERE n.id IN (
                 SELECT target FROM edges WHERE source = ?1
                 UNION
                 SELECT source FROM edges WHERE target = ?1
             )",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (key, blob) = row?;
            nodes.push(
                serde_json::from_str(&blob).map_err(|source| StoreError::Corrupt { key, source })?,
            );
        }
        Ok(nodes)
    }

    /// Empty both collections.
    pub fn reset(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("DELETE FROM edges; DELETE FROM nodes;")?;
        Ok(())
    }

    pub fn node_count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if path.exists() {
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_patch(node_type: NodeType) -> NodePatch {
        NodePatch {
            node_type: Some(node_type),
            ..Default::default()
        }
    }

    #[test]
    fn upsert_creates_then_merges() {
        let store = GraphStore::open_memory().unwrap();

        let created = store.upsert_node("10.0.0.5", node_patch(NodeType::Internal)).unwrap();
        assert_eq!(created.label, "10.0.0.5");
        assert_eq!(created.alert_count, 0);

        let merged = store
            .upsert_node(
                "10.0.0.5",
                NodePatch {
                    alert_increment: 2,
                    risk_score: Some(40.0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(merged.alert_count, 2);
        assert_eq!(merged.risk_score, 40.0);
        assert_eq!(merged.first_seen, created.first_seen);
    }

    #[test]
    fn node_ids_are_case_folded() {
        let store = GraphStore::open_memory().unwrap();
        store.upsert_node("API.OpenAI.com", node_patch(NodeType::Shadow)).unwrap();
        assert!(store.get_node("api.openai.com").unwrap().is_some());
    }

    #[test]
    fn shadow_type_is_sticky() {
        let store = GraphStore::open_memory().unwrap();
        store.upsert_node("api.openai.com", node_patch(NodeType::Shadow)).unwrap();
        let node = store
            .upsert_node("api.openai.com", node_patch(NodeType::External))
            .unwrap();
        assert_eq!(node.node_type, NodeType::Shadow);
    }

    #[test]
    fn edge_requires_both_endpoints() {
        let store = GraphStore::open_memory().unwrap();
        store.upsert_node("10.0.0.5", node_patch(NodeType::Internal)).unwrap();

        let patch = EdgePatch {
            protocol: Protocol::Https,
            dst_port: 443,
            byte_delta: 100,
            last_seen: Utc::now(),
        };
        let err = store.upsert_edge("10.0.0.5", "missing.example", patch).unwrap_err();
        assert!(matches!(err, StoreError::MissingEndpoint(_)));
    }

    #[test]
    fn edge_aggregates_bytes_and_flows() {
        let store = GraphStore::open_memory().unwrap();
        store.upsert_node("10.0.0.5", node_patch(NodeType::Internal)).unwrap();
        store.upsert_node("api.openai.com", node_patch(NodeType::Shadow)).unwrap();

        let patch = |bytes: u64| EdgePatch {
            protocol: Protocol::Https,
            dst_port: 443,
            byte_delta: bytes,
            last_seen: Utc::now(),
        };
        store.upsert_edge("10.0.0.5", "api.openai.com", patch(100)).unwrap();
        let edge = store.upsert_edge("10.0.0.5", "api.openai.com", patch(250)).unwrap();

        assert_eq!(edge.byte_count, 350);
        assert_eq!(edge.flow_count, 2);
        assert_eq!(store.list_edges().unwrap().len(), 1);
    }

    #[test]
    fn neighbors_cover_both_directions() {
        let store = GraphStore::open_memory().unwrap();
        for id in ["a", "b", "c"] {
            store.upsert_node(id, node_patch(NodeType::Internal)).unwrap();
        }
        let patch = || EdgePatch {
            protocol: Protocol::Tcp,
            dst_port: 22,
            byte_delta: 1,
            last_seen: Utc::now(),
        };
        store.upsert_edge("a", "b", patch()).unwrap();
        store.upsert_edge("c", "a", patch()).unwrap();

        let mut ids: Vec<String> = store.neighbors("a").unwrap().into_iter().map(|n| n.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn reset_empties_both_collections() {
        let store = GraphStore::open_memory().unwrap();
        store.upsert_node("a", node_patch(NodeType::Internal)).unwrap();
        store.upsert_node("b", node_patch(NodeType::External)).unwrap();
        store
            .upsert_edge(
                "a",
                "b",
                EdgePatch {
                    protocol: Protocol::Tcp,
                    dst_port: 80,
                    byte_delta: 10,
                    last_seen: Utc::now(),
                },
            )
            .unwrap();

        store.reset().unwrap();
        assert!(store.list_nodes().unwrap().is_empty());
        assert!(store.list_edges().unwrap().is_empty());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");

        {
            let store = GraphStore::open(&path).unwrap();
            store.upsert_node("10.0.0.5", node_patch(NodeType::Internal)).unwrap();
        }

        let store = GraphStore::open(&path).unwrap();
        let node = store.get_node("10.0.0.5").unwrap().unwrap();
        assert_eq!(node.node_type, NodeType::Internal);
    }
}
