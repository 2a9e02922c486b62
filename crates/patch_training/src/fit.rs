//! Multi-epoch driver: train, evaluate, keep the best checkpoint.

use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::SgdConfig;
use burn::tensor::backend::AutodiffBackend;
use patch_models::{PatchProducer, TileClassifier};
use std::path::PathBuf;

use crate::checkpoint::{save_model, CheckpointSelector};
use crate::dataset::BatchSource;
use crate::error::{TrainError, TrainResult};
use crate::patch::PatchRegion;
use crate::progress::ProgressSink;
use crate::runner::{run_eval_pass, run_train_pass, PassContext, PassSummary};
use crate::schedule::{LrSchedule, StepCadence};

#[derive(Debug, Clone)]
pub struct FitConfig {
    pub epochs: usize,
    /// Base rate for the cosine schedule.
    pub learning_rate: f64,
    /// Peak rate for the cyclic schedule.
    pub max_lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    /// Cosine annealing per epoch instead of the per-batch one-cycle schedule.
    pub cosine: bool,
    /// Checkpoints land at `{save_prefix}_{epoch}.bin`, the score at `{save_prefix}_best.txt`.
    pub save_prefix: PathBuf,
    pub region: PatchRegion,
}

impl FitConfig {
    pub fn new(save_prefix: impl Into<PathBuf>) -> Self {
        Self {
            epochs: 120,
            learning_rate: 3e-4,
            max_lr: 0.1,
            momentum: 0.4,
            weight_decay: 5e-4,
            cosine: false,
            save_prefix: save_prefix.into(),
            region: PatchRegion::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochRecord {
    pub epoch: usize,
    /// Rate at the start of the training pass.
    pub lr: f64,
    pub train: PassSummary,
    /// Percentage scale.
    pub eval_score: f64,
    pub improved: bool,
}

#[derive(Debug)]
pub struct FitOutcome<M> {
    pub best_path: PathBuf,
    /// Percentage scale; equals the sidecar contents.
    pub best_score: f64,
    pub best_epoch: usize,
    /// Model after the final epoch (not necessarily the best one).
    pub model: M,
    pub schedule: LrSchedule,
    pub history: Vec<EpochRecord>,
}

/// Runs `cfg.epochs` rounds of train pass, eval pass, checkpoint selection and (for the cosine
/// schedule) one epoch-level rate step, with SGD (momentum, weight decay). Any checkpoint I/O
/// failure aborts the run.
pub fn fit<B, M, P, D, E>(
    model: M,
    producer: &P,
    train: &D,
    test: &E,
    device: &B::Device,
    cfg: &FitConfig,
    progress: &mut dyn ProgressSink,
) -> TrainResult<FitOutcome<M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + TileClassifier<B>,
    M::InnerModule: TileClassifier<B::InnerBackend>,
    P: PatchProducer,
    D: BatchSource,
    E: BatchSource,
{
    if cfg.epochs == 0 {
        return Err(TrainError::InvalidArgument("epochs must be >= 1".into()));
    }
    if train.num_batches() == 0 {
        return Err(TrainError::EmptyDataset("training split".into()));
    }
    if test.num_batches() == 0 {
        return Err(TrainError::EmptyDataset("evaluation split".into()));
    }
    if model.patch_features().is_none() {
        return Err(TrainError::PatchUnsupported);
    }

    let mut optim = SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(cfg.momentum)
                .with_dampening(0.0),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(cfg.weight_decay as _)))
        .init::<B, M>();
    let mut schedule = if cfg.cosine {
        LrSchedule::cosine(cfg.learning_rate, cfg.epochs)?
    } else {
        LrSchedule::cyclic(cfg.max_lr, cfg.epochs, train.num_batches())
    };
    let train_loss = CrossEntropyLossConfig::new().init::<B>(device);
    let eval_loss = CrossEntropyLossConfig::new().init::<B::InnerBackend>(device);
    let mut selector = CheckpointSelector::new(cfg.save_prefix.clone());
    let mut history = Vec::with_capacity(cfg.epochs);

    tracing::info!(
        epochs = cfg.epochs,
        cadence = ?schedule.cadence(),
        train_batches = train.num_batches(),
        eval_batches = test.num_batches(),
        "starting fit"
    );

    let mut model = model;
    for epoch in 0..cfg.epochs {
        let ctx = PassContext {
            epoch,
            epochs: cfg.epochs,
        };
        let lr = schedule.lr();
        let (trained, summary) = run_train_pass(
            model,
            producer,
            train,
            device,
            &train_loss,
            &mut optim,
            &mut schedule,
            progress,
            ctx,
        )?;
        model = trained;

        let score = run_eval_pass(
            &model.valid(),
            producer,
            test,
            device,
            &eval_loss,
            &cfg.region,
            progress,
            ctx,
        )?;
        let improved =
            selector.observe(epoch, score, |path| save_model::<B, M>(&model, path))?;
        // Epoch-level schedules advance only once evaluation is done.
        if schedule.cadence() == StepCadence::PerEpoch {
            schedule.on_epoch_end();
        }
        tracing::info!(
            epoch,
            train_loss = summary.mean_loss,
            train_score = summary.score * 100.0,
            score,
            improved,
            "epoch done"
        );
        history.push(EpochRecord {
            epoch,
            lr,
            train: summary,
            eval_score: score,
            improved,
        });
    }

    let best = selector.finish()?;
    Ok(FitOutcome {
        best_path: best.path,
        best_score: best.score,
        best_epoch: best.epoch,
        model,
        schedule,
        history,
    })
}
