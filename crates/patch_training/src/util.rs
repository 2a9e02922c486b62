use anyhow::Context;
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use clap::{Parser, ValueEnum};
use patch_models::{
    ConvTileClassifier, ConvTileClassifierConfig, LinearTileClassifier,
    LinearTileClassifierConfig, PatchProducer, ProjectionPatchProducer, TileClassifier,
};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::dataset::{DatasetKind, ManifestConfig, SyntheticConfig, TileDataset};
use crate::device::{platform_detector, resolve_backend, BackendKind};
use crate::fit::{fit, FitConfig};
use crate::patch::PatchRegion;
use crate::progress::{ConsoleProgress, NullProgress, ProgressSink};

type CpuBackend = Autodiff<burn_ndarray::NdArray<f32>>;
#[cfg(feature = "backend-wgpu")]
type GpuBackend = Autodiff<burn_wgpu::Wgpu<f32>>;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Linear,
    Conv,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::Conv => "conv",
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train a tile classifier with metadata patches and keep the best checkpoint"
)]
pub struct TrainArgs {
    /// Dataset to train on.
    #[arg(long, value_enum, default_value_t = DatasetKind::Synthetic)]
    pub dataset: DatasetKind,
    /// Model to train.
    #[arg(long, value_enum, default_value_t = ModelKind::Linear)]
    pub model: ModelKind,
    /// Prefix for output names, to keep experiments apart.
    #[arg(long, default_value = "")]
    pub output_prefix: String,
    /// Number of epochs.
    #[arg(long, default_value_t = 120)]
    pub epochs: usize,
    /// Base learning rate (cosine schedule).
    #[arg(long, default_value_t = 3e-4)]
    pub learning_rate: f64,
    /// Peak learning rate (cyclic schedule).
    #[arg(long, default_value_t = 0.1)]
    pub max_lr: f64,
    /// Batch size.
    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,
    /// SGD momentum.
    #[arg(long, default_value_t = 0.4)]
    pub momentum: f64,
    /// Use per-epoch cosine annealing instead of the per-batch one-cycle schedule.
    #[arg(long)]
    pub cosine: bool,
    /// Backend to use (ndarray, or wgpu if built with backend-wgpu).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Root for trained models (overrides the config file).
    #[arg(long)]
    pub output_root: Option<PathBuf>,
    /// Manifest dataset root (overrides the config file).
    #[arg(long)]
    pub data_root: Option<PathBuf>,
    /// Seed for data shuffling and the patch producer (overrides the config file).
    #[arg(long)]
    pub seed: Option<u64>,
    /// Hide the progress bar.
    #[arg(long)]
    pub quiet: bool,
}

/// Outcome of a CLI run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub best_path: PathBuf,
    pub best_score: f64,
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<RunSummary> {
    run_train_with_config(args, RunConfig::load())
}

pub fn run_train_with_config(args: TrainArgs, mut cfg: RunConfig) -> anyhow::Result<RunSummary> {
    let backend = resolve_backend(args.backend, platform_detector().as_ref());
    if let Some(root) = args.output_root.clone() {
        cfg.output_root = root;
    }
    if let Some(root) = args.data_root.clone() {
        cfg.data_root = root;
    }
    if let Some(seed) = args.seed {
        cfg.seed = seed;
    }

    let (train, test) = match args.dataset {
        DatasetKind::Synthetic => SyntheticConfig {
            metadata_dim: cfg.patch.metadata_dim,
            seed: cfg.seed,
            ..Default::default()
        }
        .build(args.batch_size)?,
        DatasetKind::Manifest => ManifestConfig::new(&cfg.data_root)
            .build(args.batch_size, cfg.seed)
            .with_context(|| {
                format!("failed to load manifests under {}", cfg.data_root.display())
            })?,
    };
    if train.metadata_dim() != cfg.patch.metadata_dim {
        anyhow::bail!(
            "dataset metadata has {} values per sample but the patch producer expects {}",
            train.metadata_dim(),
            cfg.patch.metadata_dim
        );
    }

    let producer = ProjectionPatchProducer::new(cfg.patch, cfg.seed);
    let region = PatchRegion::default();
    region.check_fits(
        train.shape().dims(),
        producer.patch_channels(),
        producer.patch_size(),
    )?;

    let model_dir = cfg.output_root.join(args.model.as_str());
    fs::create_dir_all(&model_dir)
        .with_context(|| format!("failed to create {}", model_dir.display()))?;
    let save_prefix = model_dir.join(format!(
        "{}{}_{}",
        args.output_prefix,
        args.dataset.as_str(),
        args.model.as_str()
    ));

    let fit_cfg = FitConfig {
        epochs: args.epochs,
        learning_rate: args.learning_rate,
        max_lr: args.max_lr,
        momentum: args.momentum,
        cosine: args.cosine,
        region,
        ..FitConfig::new(save_prefix)
    };
    let mut progress: Box<dyn ProgressSink> = if args.quiet {
        Box::new(NullProgress)
    } else {
        Box::new(ConsoleProgress::new())
    };

    let summary = match backend {
        #[cfg(feature = "backend-wgpu")]
        BackendKind::Wgpu => train_on::<GpuBackend>(
            args.model,
            &producer,
            &train,
            &test,
            &fit_cfg,
            &mut *progress,
        )?,
        _ => train_on::<CpuBackend>(
            args.model,
            &producer,
            &train,
            &test,
            &fit_cfg,
            &mut *progress,
        )?,
    };

    tracing::info!(
        "Training complete: {} with accuracy: {:.4}",
        summary.best_path.display(),
        summary.best_score
    );
    Ok(summary)
}

fn train_on<B: AutodiffBackend>(
    model: ModelKind,
    producer: &ProjectionPatchProducer,
    train: &TileDataset,
    test: &TileDataset,
    cfg: &FitConfig,
    progress: &mut dyn ProgressSink,
) -> anyhow::Result<RunSummary> {
    let device = B::Device::default();
    let num_classes = train.num_classes().max(test.num_classes()).max(2);
    let shape = train.shape();
    let patch_features =
        Some(producer.patch_channels() * producer.patch_size() * producer.patch_size());

    match model {
        ModelKind::Linear => {
            let model = LinearTileClassifier::<B>::new(
                LinearTileClassifierConfig {
                    channels: shape.channels,
                    height: shape.height,
                    width: shape.width,
                    num_classes,
                    patch_features,
                    ..Default::default()
                },
                &device,
            );
            train_model::<B, _>(model, producer, train, test, &device, cfg, progress)
        }
        ModelKind::Conv => {
            let model = ConvTileClassifier::<B>::new(
                ConvTileClassifierConfig {
                    channels: shape.channels,
                    num_classes,
                    patch_features,
                    ..Default::default()
                },
                &device,
            );
            train_model::<B, _>(model, producer, train, test, &device, cfg, progress)
        }
    }
}

fn train_model<B, M>(
    model: M,
    producer: &ProjectionPatchProducer,
    train: &TileDataset,
    test: &TileDataset,
    device: &B::Device,
    cfg: &FitConfig,
    progress: &mut dyn ProgressSink,
) -> anyhow::Result<RunSummary>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + TileClassifier<B>,
    M::InnerModule: TileClassifier<B::InnerBackend>,
{
    let outcome = fit::<B, M, _, _, _>(model, producer, train, test, device, cfg, progress)
        .with_context(|| format!("training run {}", cfg.save_prefix.display()))?;
    Ok(RunSummary {
        best_path: outcome.best_path,
        best_score: outcome.best_score,
    })
}

/// Reads the score recorded by a finished run.
pub fn read_best_score(sidecar: &Path) -> anyhow::Result<f64> {
    let raw = fs::read_to_string(sidecar)
        .with_context(|| format!("failed to read {}", sidecar.display()))?;
    raw.trim()
        .parse::<f64>()
        .with_context(|| format!("{} does not hold a score", sidecar.display()))
}
