use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use opwatch_core::{
    JobHandle, JobKind, JobStatus, ReadModel, RegistrySnapshot, RunId, WorkspaceId,
    WorkspaceSnapshot,
};
use opwatch_logging::{op_error, op_info, op_warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("could not serialize snapshot: {0}")]
    Serialize(String),
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    Ok(())
}

/// Atomically write content to `{dir}/{filename}` by writing a temp file then renaming.
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn write(&self, filename: &str, content: &str) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}

// JSON values are stored as JSON text; RON cannot tell a JSON object from a
// struct on the way back in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedJob {
    id: RunId,
    kind: JobKind,
    status: JobStatus,
    progress: Option<f64>,
    message: Option<String>,
    result_json: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedReadModel {
    kind: JobKind,
    partial: bool,
    run_id: Option<RunId>,
    value_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedWorkspace {
    id: WorkspaceId,
    jobs: Vec<PersistedJob>,
    read_models: Vec<PersistedReadModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedState {
    saved_at: String,
    workspaces: Vec<PersistedWorkspace>,
}

/// Writes every workspace state to `path` as pretty RON.
pub fn save_snapshot(path: &Path, snapshot: &RegistrySnapshot) -> Result<PathBuf, PersistError> {
    let (dir, filename) = split_path(path)?;

    let state = PersistedState {
        saved_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        workspaces: snapshot
            .workspaces
            .iter()
            .map(|(id, workspace)| PersistedWorkspace {
                id: id.clone(),
                jobs: workspace.jobs.iter().map(persist_job).collect(),
                read_models: workspace
                    .read_models
                    .iter()
                    .map(|(kind, model)| PersistedReadModel {
                        kind: *kind,
                        partial: model.partial,
                        run_id: model.run_id.clone(),
                        value_json: model.value.to_string(),
                    })
                    .collect(),
            })
            .collect(),
    };

    let pretty = ron::ser::PrettyConfig::new();
    let content = ron::ser::to_string_pretty(&state, pretty).map_err(|err| {
        op_error!("Failed to serialize session snapshot: {}", err);
        PersistError::Serialize(err.to_string())
    })?;

    let writer = AtomicFileWriter::new(dir);
    match writer.write(&filename, &content) {
        Ok(target) => {
            op_info!(
                "Saved {} workspaces to {:?}",
                snapshot.workspaces.len(),
                target
            );
            Ok(target)
        }
        Err(err) => {
            op_error!("Failed to write session snapshot to {:?}: {}", path, err);
            Err(err)
        }
    }
}

/// Reads a snapshot written by [`save_snapshot`]. A missing or unreadable
/// file yields an empty snapshot.
pub fn load_snapshot(path: &Path) -> RegistrySnapshot {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return RegistrySnapshot::default();
        }
        Err(err) => {
            op_warn!("Failed to read session snapshot from {:?}: {}", path, err);
            return RegistrySnapshot::default();
        }
    };

    let state: PersistedState = match ron::from_str(&content) {
        Ok(state) => state,
        Err(err) => {
            op_warn!("Failed to parse session snapshot from {:?}: {}", path, err);
            return RegistrySnapshot::default();
        }
    };

    let mut snapshot = RegistrySnapshot::default();
    for workspace in state.workspaces {
        let restored = WorkspaceSnapshot {
            jobs: workspace.jobs.into_iter().map(restore_job).collect(),
            read_models: workspace
                .read_models
                .into_iter()
                .filter_map(|model| {
                    let value = match serde_json::from_str(&model.value_json) {
                        Ok(value) => value,
                        Err(err) => {
                            op_warn!("Dropping unreadable cached {}: {}", model.kind, err);
                            return None;
                        }
                    };
                    Some((
                        model.kind,
                        ReadModel {
                            value,
                            partial: model.partial,
                            run_id: model.run_id,
                        },
                    ))
                })
                .collect(),
        };
        snapshot.workspaces.insert(workspace.id, restored);
    }

    op_info!(
        "Loaded {} workspaces saved at {} from {:?}",
        snapshot.workspaces.len(),
        state.saved_at,
        path
    );
    snapshot
}

fn persist_job(handle: &JobHandle) -> PersistedJob {
    PersistedJob {
        id: handle.id.clone(),
        kind: handle.kind,
        status: handle.status,
        progress: handle.progress,
        message: handle.message.clone(),
        result_json: handle.result.as_ref().map(|value| value.to_string()),
    }
}

fn restore_job(job: PersistedJob) -> JobHandle {
    JobHandle {
        id: job.id,
        kind: job.kind,
        status: job.status,
        progress: job.progress,
        message: job.message,
        result: job
            .result_json
            .and_then(|text| serde_json::from_str(&text).ok()),
    }
}

fn split_path(path: &Path) -> Result<(PathBuf, String), PersistError> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| PersistError::OutputDir(format!("{path:?} has no file name")))?
        .to_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, filename))
}
