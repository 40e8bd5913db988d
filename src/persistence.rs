//! State Persistence (`spec.md` §4.6 / §6)
//!
//! Durable JSON snapshot of node state plus bounded per-node traceroute
//! history, written atomically (sibling `.tmp` then rename) and loaded
//! with corruption-safe fallback. The on-disk schema is bit-exact per
//! `spec.md` §6: no teacher file persists JSON to a plain path this way
//! (the teacher's own `storage.rs` is a SQLite store), so this module is
//! grounded directly on the spec's file-layout table and the original
//! Python `state_persistence.py`'s atomic-rename / corruption-backup
//! behavior, expressed with `tokio::fs` the way the teacher does async
//! file I/O elsewhere in its runtime modules.

use crate::domain::NodeId;
use crate::error::{MapperError, MapperResult};
use crate::node_tracker::NodeState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const SCHEMA_VERSION: &str = "1.0";

/// One entry in a node's bounded traceroute history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the traceroute completed.
    pub timestamp: DateTime<Utc>,
    /// Whether it succeeded.
    pub success: bool,
    /// Number of hops in the discovered route.
    pub hop_count: usize,
    /// Ordered hop descriptors, opaque to this crate.
    pub route: Vec<serde_json::Value>,
    /// Per-hop SNR readings, if reported.
    #[serde(default)]
    pub snr_values: Vec<f64>,
    /// Per-hop RSSI readings, if reported.
    #[serde(default)]
    pub rssi_values: Vec<i32>,
    /// Round-trip duration, in milliseconds.
    pub duration_ms: f64,
    /// Failure description, if this entry records a failure.
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotFile {
    version: String,
    last_saved: DateTime<Utc>,
    #[serde(default)]
    nodes: HashMap<NodeId, NodeState>,
    #[serde(default)]
    traceroute_history: HashMap<NodeId, Vec<HistoryEntry>>,
}

/// Durable snapshot store for node state and traceroute history.
#[derive(Debug)]
pub struct StatePersistence {
    state_file_path: PathBuf,
    history_per_node: usize,
}

impl StatePersistence {
    /// Creates a new persistence handle rooted at `state_file_path`.
    #[must_use]
    pub fn new(state_file_path: impl Into<PathBuf>, history_per_node: usize) -> Self {
        Self { state_file_path: state_file_path.into(), history_per_node }
    }

    fn temp_path(&self) -> PathBuf {
        self.state_file_path.with_extension("tmp")
    }

    async fn read_existing(&self) -> Option<SnapshotFile> {
        let bytes = tokio::fs::read(&self.state_file_path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    async fn write_atomic(&self, file: &SnapshotFile) -> MapperResult<()> {
        if let Some(parent) = self.state_file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(file)
            .map_err(|e| MapperError::PersistCorrupt(e.to_string()))?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, &json).await?;
        tokio::fs::rename(&temp, &self.state_file_path).await?;
        Ok(())
    }

    /// Writes the full node-state snapshot, preserving any existing
    /// `traceroute_history` section (`spec.md` §4.6). Returns `false`
    /// without a partial write on I/O failure.
    pub async fn save_state(&self, nodes: &HashMap<NodeId, NodeState>, now: DateTime<Utc>) -> bool {
        let history = self.read_existing().await.map(|f| f.traceroute_history).unwrap_or_default();
        let file = SnapshotFile {
            version: SCHEMA_VERSION.to_string(),
            last_saved: now,
            nodes: nodes.clone(),
            traceroute_history: history,
        };

        match self.write_atomic(&file).await {
            Ok(()) => {
                debug!(node_count = nodes.len(), path = %self.state_file_path.display(), "saved state");
                true
            }
            Err(e) => {
                error!(error = %e, path = %self.state_file_path.display(), "failed to save state");
                false
            }
        }
    }

    /// Loads the node-state snapshot. A missing file returns an empty
    /// map without error; a corrupt file is backed up to a timestamped
    /// sibling and an empty map is returned (`spec.md` §4.6).
    pub async fn load_state(&self, now: DateTime<Utc>) -> HashMap<NodeId, NodeState> {
        if !self.state_file_path.exists() {
            info!(path = %self.state_file_path.display(), "no state file, starting empty");
            return HashMap::new();
        }

        let bytes = match tokio::fs::read(&self.state_file_path).await {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, path = %self.state_file_path.display(), "I/O error loading state");
                return HashMap::new();
            }
        };

        match serde_json::from_slice::<SnapshotFile>(&bytes) {
            Ok(file) => {
                if file.version != SCHEMA_VERSION {
                    warn!(found = %file.version, expected = SCHEMA_VERSION, "state file version mismatch");
                }
                info!(node_count = file.nodes.len(), "loaded state");
                file.nodes
            }
            Err(e) => {
                error!(error = %e, path = %self.state_file_path.display(), "corrupted state file");
                self.backup_corrupted(now).await;
                HashMap::new()
            }
        }
    }

    async fn backup_corrupted(&self, now: DateTime<Utc>) {
        let backup = corrupted_backup_path(&self.state_file_path, now);
        match tokio::fs::copy(&self.state_file_path, &backup).await {
            Ok(_) => info!(backup = %backup.display(), "backed up corrupted state file"),
            Err(e) => error!(error = %e, "failed to back up corrupted state file"),
        }
    }

    /// Appends `entry` to `node_id`'s history, truncating to
    /// `history_per_node` most recent entries, preserving the `nodes`
    /// section of the same file (`spec.md` §4.6).
    pub async fn save_history(&self, node_id: &NodeId, entry: HistoryEntry) -> bool {
        let mut file = self.read_existing().await.unwrap_or_default();
        let history = file.traceroute_history.entry(node_id.clone()).or_default();
        history.push(entry);
        if history.len() > self.history_per_node {
            let excess = history.len() - self.history_per_node;
            history.drain(0..excess);
        }
        file.version = SCHEMA_VERSION.to_string();
        file.last_saved = Utc::now();

        match self.write_atomic(&file).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, node_id = %node_id, "failed to save traceroute history");
                false
            }
        }
    }

    /// Returns `node_id`'s history, most recent `limit` entries if given.
    pub async fn history(&self, node_id: &NodeId, limit: Option<usize>) -> Vec<HistoryEntry> {
        let Some(file) = self.read_existing().await else {
            return Vec::new();
        };
        let mut entries = file.traceroute_history.get(node_id).cloned().unwrap_or_default();
        if let Some(limit) = limit {
            if entries.len() > limit {
                entries = entries.split_off(entries.len() - limit);
            }
        }
        entries
    }
}

fn corrupted_backup_path(original: &Path, now: DateTime<Utc>) -> PathBuf {
    let stamp = now.format("%Y%m%d_%H%M%S");
    let base = original.with_extension("");
    let file_name = base.file_name().and_then(|s| s.to_str()).unwrap_or("state");
    original.with_file_name(format!("{file_name}.corrupted.{stamp}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NodeId;
    use chrono::Utc;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn node_state(id: &str, now: DateTime<Utc>) -> NodeState {
        serde_json::from_value(serde_json::json!({
            "node_id": id,
            "is_direct": false,
            "last_seen": now,
            "last_traced": null,
            "next_recheck": null,
            "last_trace_success": false,
            "trace_count": 0,
            "failure_count": 0,
            "snr": null,
            "rssi": null,
            "role": null,
            "was_offline": false,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn round_trips_a_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let persistence = StatePersistence::new(&path, 10);

        let now = Utc::now();
        let a = NodeId::try_new("!a").unwrap();
        let mut nodes = HashMap::new();
        nodes.insert(a.clone(), node_state("!a", now));

        assert!(persistence.save_state(&nodes, now).await);
        let loaded = persistence.load_state(now).await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[&a].node_id, a);
        assert!((loaded[&a].last_seen - now).num_seconds().abs() <= 1);
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty_without_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let persistence = StatePersistence::new(&path, 10);
        assert!(persistence.load_state(Utc::now()).await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_backed_up_and_load_returns_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, b"{not valid json").await.unwrap();
        let persistence = StatePersistence::new(&path, 10);

        let loaded = persistence.load_state(Utc::now()).await;
        assert!(loaded.is_empty());

        let mut backups = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut found_backup = false;
        while let Some(entry) = backups.next_entry().await.unwrap() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.contains(".corrupted.") {
                found_backup = true;
            }
        }
        assert!(found_backup);
    }

    #[tokio::test]
    async fn history_is_truncated_to_history_per_node() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let persistence = StatePersistence::new(&path, 2);
        let a = NodeId::try_new("!a").unwrap();

        for i in 0..5 {
            let entry = HistoryEntry {
                timestamp: Utc::now(),
                success: true,
                hop_count: i,
                route: vec![],
                snr_values: vec![],
                rssi_values: vec![],
                duration_ms: 100.0,
                error_message: None,
            };
            assert!(persistence.save_history(&a, entry).await);
        }

        let history = persistence.history(&a, None).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].hop_count, 3);
        assert_eq!(history[1].hop_count, 4);
    }

    #[tokio::test]
    async fn history_save_preserves_node_snapshot_section() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let persistence = StatePersistence::new(&path, 10);
        let now = Utc::now();
        let a = NodeId::try_new("!a").unwrap();
        let mut nodes = HashMap::new();
        nodes.insert(a.clone(), node_state("!a", now));
        persistence.save_state(&nodes, now).await;

        let entry = HistoryEntry {
            timestamp: now,
            success: true,
            hop_count: 2,
            route: vec![],
            snr_values: vec![],
            rssi_values: vec![],
            duration_ms: 50.0,
            error_message: None,
        };
        persistence.save_history(&a, entry).await;

        let loaded = persistence.load_state(now).await;
        assert_eq!(loaded.len(), 1);
    }
}
