#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod device;
pub mod error;
pub mod fit;
pub mod logging;
pub mod metrics;
pub mod patch;
pub mod progress;
pub mod runner;
pub mod schedule;
pub mod util;

pub use checkpoint::{load_checkpoint, save_model, BestCheckpoint, CheckpointSelector};
pub use dataset::{BatchSource, DatasetKind, TileBatch, TileDataset, TileSample, TileShape};
pub use device::{resolve_backend, AcceleratorDetector, BackendKind};
pub use error::{TrainError, TrainResult};
pub use fit::{fit, FitConfig, FitOutcome};
pub use metrics::{balanced_accuracy, MetricAccumulator};
pub use patch::{embed_patch, training_patch, PatchRegion};
pub use patch_models::{
    ConvTileClassifier, ConvTileClassifierConfig, LinearTileClassifier,
    LinearTileClassifierConfig, PatchProducer, PatchProducerConfig, ProjectionPatchProducer,
    TileClassifier,
};
pub use runner::{run_eval_pass, run_train_pass, PassContext, PassSummary};
pub use schedule::{LrSchedule, StepCadence};
pub use util::{run_train, TrainArgs};

