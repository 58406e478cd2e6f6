//! Parameter snapshots.
//!
//! Snapshots are flat binary records of every learnable parameter, written
//! with burn's full-precision recorder. Loading goes through an architecture
//! template; any shape or key mismatch surfaces as a recorder error with no
//! partial restore.

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Error type for snapshot operations.
#[derive(Debug)]
pub enum CheckpointError {
    /// IO error during save/load or directory scanning.
    Io(io::Error),
    /// Burn recorder error (includes shape/key mismatches on load).
    Recorder(String),
    /// No snapshot found in the checkpoint directory.
    NoCheckpoints,
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointError::Io(e) => write!(f, "IO error: {}", e),
            CheckpointError::Recorder(e) => write!(f, "recorder error: {}", e),
            CheckpointError::NoCheckpoints => write!(f, "no checkpoints found"),
        }
    }
}

impl std::error::Error for CheckpointError {}

impl From<io::Error> for CheckpointError {
    fn from(e: io::Error) -> Self {
        CheckpointError::Io(e)
    }
}

/// Load a snapshot into an architecture template.
///
/// The template (usually `Agent::new(...)` with fresh weights) defines the
/// expected keys and shapes; mismatches fail the whole load.
pub fn load_snapshot<B: Backend, M: Module<B>>(
    template: M,
    path: &Path,
    device: &B::Device,
) -> Result<M, CheckpointError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    template
        .load_file(path, &recorder, device)
        .map_err(|e| CheckpointError::Recorder(e.to_string()))
}

/// Metadata for one stored snapshot.
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    pub path: PathBuf,
    pub step: usize,
}

/// Writes periodic parameter snapshots and prunes old ones.
pub struct Checkpointer {
    dir: PathBuf,
    save_interval: usize,
    keep_last_n: usize,
    history: Vec<CheckpointInfo>,
}

impl Checkpointer {
    /// Create a checkpointer, creating the directory if needed.
    ///
    /// `save_interval` is measured in training iterations; 0 disables
    /// periodic saves. `keep_last_n == 0` keeps every snapshot.
    pub fn new(
        dir: impl Into<PathBuf>,
        save_interval: usize,
        keep_last_n: usize,
    ) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            save_interval,
            keep_last_n,
            history: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a periodic save is due at this iteration.
    pub fn should_save(&self, iteration: usize) -> bool {
        self.save_interval > 0 && iteration > 0 && iteration % self.save_interval == 0
    }

    /// Save a snapshot tagged with the global step.
    pub fn save<B: Backend, M: Module<B>>(
        &mut self,
        model: &M,
        step: usize,
    ) -> Result<PathBuf, CheckpointError> {
        let path = self.dir.join(format!("snapshot_{:010}.bin", step));
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        model
            .clone()
            .save_file(&path, &recorder)
            .map_err(|e| CheckpointError::Recorder(e.to_string()))?;

        self.history.push(CheckpointInfo {
            path: path.clone(),
            step,
        });
        self.prune();

        Ok(path)
    }

    /// Find the newest snapshot on disk.
    pub fn find_latest(&self) -> Result<CheckpointInfo, CheckpointError> {
        let mut snapshots = self.list()?;
        snapshots.pop().ok_or(CheckpointError::NoCheckpoints)
    }

    /// List stored snapshots, oldest first.
    pub fn list(&self) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let mut snapshots: Vec<CheckpointInfo> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                let name = path.file_name()?.to_str()?;
                let step = name
                    .strip_prefix("snapshot_")?
                    .strip_suffix(".bin")?
                    .parse()
                    .ok()?;
                Some(CheckpointInfo { path, step })
            })
            .collect();
        snapshots.sort_by_key(|info| info.step);
        Ok(snapshots)
    }

    fn prune(&mut self) {
        if self.keep_last_n == 0 {
            return;
        }
        while self.history.len() > self.keep_last_n {
            let old = self.history.remove(0);
            if let Err(e) = fs::remove_file(&old.path) {
                log::warn!("failed to prune snapshot {:?}: {}", old.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use burn::backend::NdArray;
    use tempfile::tempdir;

    type TestBackend = NdArray<f32>;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    #[test]
    fn test_should_save_interval() {
        let dir = tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path(), 10, 0).unwrap();
        assert!(!checkpointer.should_save(0));
        assert!(!checkpointer.should_save(5));
        assert!(checkpointer.should_save(10));
        assert!(checkpointer.should_save(20));

        let disabled = Checkpointer::new(dir.path(), 0, 0).unwrap();
        assert!(!disabled.should_save(10));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let mut checkpointer = Checkpointer::new(dir.path(), 1, 0).unwrap();

        TestBackend::seed(&device(), 11);
        let agent: Agent<TestBackend> = Agent::new(3, &device());
        let path = checkpointer.save(&agent, 2048).unwrap();
        assert!(path.exists());

        // A fresh template gets different random weights, then the exact
        // stored parameters on load.
        TestBackend::seed(&device(), 99);
        let template: Agent<TestBackend> = Agent::new(3, &device());
        let restored = load_snapshot(template, &path, &device()).unwrap();

        let obs = burn::tensor::Tensor::<TestBackend, 4>::zeros([1, 4, 84, 84], &device());
        let original_values = agent.forward(obs.clone()).values.into_data();
        let restored_values = restored.forward(obs).values.into_data();
        assert_eq!(
            original_values.as_slice::<f32>().unwrap(),
            restored_values.as_slice::<f32>().unwrap()
        );
    }

    #[test]
    fn test_prune_keeps_last_n() {
        let dir = tempdir().unwrap();
        let mut checkpointer = Checkpointer::new(dir.path(), 1, 2).unwrap();

        TestBackend::seed(&device(), 5);
        let agent: Agent<TestBackend> = Agent::new(2, &device());
        for step in [100usize, 200, 300, 400] {
            checkpointer.save(&agent, step).unwrap();
        }

        let listed = checkpointer.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].step, 300);
        assert_eq!(listed[1].step, 400);
        assert_eq!(checkpointer.find_latest().unwrap().step, 400);
    }

    #[test]
    fn test_find_latest_empty_dir() {
        let dir = tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path(), 1, 0).unwrap();
        assert!(matches!(
            checkpointer.find_latest(),
            Err(CheckpointError::NoCheckpoints)
        ));
    }
}
