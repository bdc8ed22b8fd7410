//! Running-process registry
//!
//! Tracks every process that may outlive a single statement of the loop:
//! background shell commands (until they exit or are stopped) and in-flight
//! sandboxed executions (until they return). One mutex guards the map.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::process::Child;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics::RUNNING_PROCESSES;

use super::executor::{kill_group, kill_tree};

/// What a registry entry represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    /// Shell command left running after its tool call returned
    Background,
    /// Sandboxed run currently awaited by a tool call
    Execution,
}

/// Public view of a registry entry
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub id: String,
    pub pid: Option<u32>,
    /// Command line or tool label
    pub label: String,
    pub kind: ProcessKind,
    pub started_at: DateTime<Utc>,
    /// Combined stdout/stderr log, background processes only
    pub log_path: Option<PathBuf>,
}

struct Entry {
    info: ProcessInfo,
    kill_tx: Option<oneshot::Sender<()>>,
}

/// Shared handle to the registry; clones see the same map
#[derive(Clone, Default)]
pub struct ProcessRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, entry: Entry) {
        let mut entries = self.lock();
        entries.insert(entry.info.id.clone(), entry);
        RUNNING_PROCESSES.set(entries.len() as i64);
    }

    fn remove(&self, id: &str) -> Option<Entry> {
        let mut entries = self.lock();
        let removed = entries.remove(id);
        RUNNING_PROCESSES.set(entries.len() as i64);
        removed
    }

    /// Record an in-flight execution; the entry is removed when the guard drops
    pub fn track_execution(&self, label: &str, pid: Option<u32>) -> ExecutionGuard {
        let id = Uuid::now_v7().to_string();
        self.insert(Entry {
            info: ProcessInfo {
                id: id.clone(),
                pid,
                label: label.to_string(),
                kind: ProcessKind::Execution,
                started_at: Utc::now(),
                log_path: None,
            },
            kill_tx: None,
        });
        ExecutionGuard {
            registry: self.clone(),
            id,
        }
    }

    /// Adopt a spawned background child and watch it until exit or stop
    ///
    /// Must be called from within a tokio runtime.
    pub fn register_background(
        &self,
        id: String,
        label: String,
        mut child: Child,
        log_path: PathBuf,
    ) -> ProcessInfo {
        let (kill_tx, kill_rx) = oneshot::channel();
        let info = ProcessInfo {
            id: id.clone(),
            pid: child.id(),
            label,
            kind: ProcessKind::Background,
            started_at: Utc::now(),
            log_path: Some(log_path),
        };
        self.insert(Entry {
            info: info.clone(),
            kill_tx: Some(kill_tx),
        });
        info!(process_id = %id, pid = ?info.pid, label = %info.label, "Background process started");

        let registry = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = child.wait() => match result {
                    Ok(status) => debug!(process_id = %id, %status, "Background process exited"),
                    Err(e) => error!(process_id = %id, error = %e, "Failed to wait on background process"),
                },
                _ = kill_rx => {
                    debug!(process_id = %id, "Background process stop requested");
                    kill_tree(&mut child).await;
                }
            }
            registry.remove(&id);
        });

        info
    }

    /// Kill a registered process; `None` if no such id is running
    pub fn stop(&self, id: &str) -> Option<ProcessInfo> {
        let entry = self.remove(id)?;
        // Kill now, not when the watcher next runs; the runtime may be shutting down
        kill_group(entry.info.pid);
        if let Some(tx) = entry.kill_tx {
            // The watcher reaps; it may have just observed exit, so ignore a closed channel
            let _ = tx.send(());
        }
        info!(process_id = %id, label = %entry.info.label, "Process stopped");
        Some(entry.info)
    }

    pub fn get(&self, id: &str) -> Option<ProcessInfo> {
        self.lock().get(id).map(|e| e.info.clone())
    }

    /// All tracked processes, oldest first
    pub fn list(&self) -> Vec<ProcessInfo> {
        let mut infos: Vec<_> = self.lock().values().map(|e| e.info.clone()).collect();
        infos.sort_by_key(|i| i.started_at);
        infos
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Stop every background process; used on session exit
    pub fn shutdown(&self) -> usize {
        let ids: Vec<String> = self
            .lock()
            .values()
            .filter(|e| e.info.kind == ProcessKind::Background)
            .map(|e| e.info.id.clone())
            .collect();
        let count = ids.iter().filter(|id| self.stop(id).is_some()).count();
        if count > 0 {
            warn!(count, "Stopped background processes on shutdown");
        }
        count
    }
}

/// Removes an execution entry when dropped
pub struct ExecutionGuard {
    registry: ProcessRegistry,
    id: String,
}

impl ExecutionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
