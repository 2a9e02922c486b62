//! Best-checkpoint bookkeeping for one run.

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{TrainError, TrainResult};

#[derive(Debug, Clone, PartialEq)]
pub struct BestCheckpoint {
    pub epoch: usize,
    /// Percentage-scale evaluation score.
    pub score: f64,
    pub path: PathBuf,
}

/// Keeps at most one checkpoint on disk under `prefix`: the first epoch to reach the highest
/// score. A replacement is written before its predecessor is removed.
#[derive(Debug, Clone)]
pub struct CheckpointSelector {
    prefix: PathBuf,
    best: Option<BestCheckpoint>,
}

impl CheckpointSelector {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            best: None,
        }
    }

    /// `{prefix}_{epoch}.bin`
    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.with_suffix(&format!("_{epoch}.bin"))
    }

    /// `{prefix}_best.txt`
    pub fn sidecar_path(&self) -> PathBuf {
        self.with_suffix("_best.txt")
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut raw: OsString = self.prefix.clone().into_os_string();
        raw.push(suffix);
        PathBuf::from(raw)
    }

    pub fn best(&self) -> Option<&BestCheckpoint> {
        self.best.as_ref()
    }

    /// Strictly better than the current best. Ties and NaN never improve.
    pub fn is_improvement(&self, score: f64) -> bool {
        match &self.best {
            Some(best) => score > best.score,
            None => score > f64::NEG_INFINITY,
        }
    }

    /// Offers an epoch's score. On improvement, `save` writes the checkpoint to the given path,
    /// the previous best file is deleted, and `true` is returned.
    pub fn observe<F>(&mut self, epoch: usize, score: f64, save: F) -> TrainResult<bool>
    where
        F: FnOnce(&Path) -> TrainResult<()>,
    {
        if !self.is_improvement(score) {
            return Ok(false);
        }
        let path = self.checkpoint_path(epoch);
        save(&path)?;
        fs::metadata(&path).map_err(|e| TrainError::io(&path, e))?;
        tracing::info!(epoch, score, path = %path.display(), "saved best checkpoint");

        if let Some(prev) = &self.best {
            if prev.path != path {
                fs::remove_file(&prev.path).map_err(|e| TrainError::io(&prev.path, e))?;
                tracing::debug!(path = %prev.path.display(), "removed superseded checkpoint");
            }
        }
        self.best = Some(BestCheckpoint { epoch, score, path });
        Ok(true)
    }

    /// Writes the best score to the sidecar and returns the winning checkpoint.
    pub fn finish(self) -> TrainResult<BestCheckpoint> {
        let sidecar = self.sidecar_path();
        let best = self.best.ok_or(TrainError::NoCheckpoint(self.prefix))?;
        fs::write(&sidecar, format!("{:?}", best.score))
            .map_err(|e| TrainError::io(&sidecar, e))?;
        tracing::info!(score = best.score, path = %sidecar.display(), "recorded best score");
        Ok(best)
    }
}

pub fn save_model<B: Backend, M: Module<B>>(model: &M, path: &Path) -> TrainResult<()> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| TrainError::Checkpoint {
            path: path.to_path_buf(),
            msg: format!("failed to save checkpoint: {e}"),
        })
}

/// Restores parameters saved by [`save_model`] into `model`.
pub fn load_checkpoint<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> TrainResult<M> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(path, &recorder, device)
        .map_err(|e| TrainError::Checkpoint {
            path: path.to_path_buf(),
            msg: format!("failed to load checkpoint: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_marker(tag: &'static str) -> impl FnOnce(&Path) -> TrainResult<()> {
        move |path: &Path| fs::write(path, tag).map_err(|e| TrainError::io(path, e))
    }

    #[test]
    fn paths_follow_prefix() {
        let sel = CheckpointSelector::new("out/vit/exp1_tiles_vit");
        assert_eq!(
            sel.checkpoint_path(3),
            PathBuf::from("out/vit/exp1_tiles_vit_3.bin")
        );
        assert_eq!(
            sel.sidecar_path(),
            PathBuf::from("out/vit/exp1_tiles_vit_best.txt")
        );
    }

    #[test]
    fn keeps_only_the_best_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sel = CheckpointSelector::new(dir.path().join("run"));

        assert!(sel.observe(0, 50.0, write_marker("e0")).unwrap());
        assert!(sel.observe(1, 75.0, write_marker("e1")).unwrap());
        assert!(!sel.checkpoint_path(0).exists());
        assert!(sel.checkpoint_path(1).exists());

        // Lower score: save is never invoked.
        let lower = sel
            .observe(2, 60.0, |_| panic!("save must not run for a lower score"))
            .unwrap();
        assert!(!lower);
        assert!(!sel.checkpoint_path(2).exists());

        let best = sel.finish().unwrap();
        assert_eq!(best.epoch, 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("run_best.txt")).unwrap(),
            "75.0"
        );
    }

    #[test]
    fn ties_do_not_replace() {
        let dir = tempfile::tempdir().unwrap();
        let mut sel = CheckpointSelector::new(dir.path().join("tie"));
        assert!(sel.observe(0, 80.0, write_marker("first")).unwrap());
        assert!(!sel.observe(1, 80.0, write_marker("second")).unwrap());
        assert!(!sel.is_improvement(f64::NAN));
        assert_eq!(sel.best().map(|b| b.epoch), Some(0));
        assert!(sel.checkpoint_path(0).exists());
        assert!(!sel.checkpoint_path(1).exists());
    }

    #[test]
    fn failed_save_keeps_previous_best() {
        let dir = tempfile::tempdir().unwrap();
        let mut sel = CheckpointSelector::new(dir.path().join("fail"));
        sel.observe(0, 10.0, write_marker("ok")).unwrap();
        let err = sel.observe(1, 20.0, |path| {
            Err(TrainError::Checkpoint {
                path: path.to_path_buf(),
                msg: "disk full".into(),
            })
        });
        assert!(err.is_err());
        assert!(sel.checkpoint_path(0).exists());
        assert_eq!(sel.best().map(|b| b.epoch), Some(0));
    }

    #[test]
    fn save_that_writes_nothing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sel = CheckpointSelector::new(dir.path().join("ghost"));
        assert!(matches!(
            sel.observe(0, 1.0, |_| Ok(())),
            Err(TrainError::Io { .. })
        ));
        assert!(sel.best().is_none());
    }

    #[test]
    fn finish_without_checkpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sel = CheckpointSelector::new(dir.path().join("none"));
        assert!(matches!(sel.finish(), Err(TrainError::NoCheckpoint(_))));
    }
}
