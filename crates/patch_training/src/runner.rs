//! One pass over a data source: the training pass and the evaluation pass.

use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLoss;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Int, Tensor};
use patch_models::{PatchProducer, TileClassifier};

use crate::dataset::BatchSource;
use crate::error::{TrainError, TrainResult};
use crate::metrics::MetricAccumulator;
use crate::patch::{embed_patch, training_patch, PatchRegion};
use crate::progress::ProgressSink;
use crate::schedule::{LrSchedule, StepCadence};

/// Position of a pass inside the run, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassContext {
    pub epoch: usize,
    pub epochs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassSummary {
    pub batches: usize,
    pub mean_loss: f64,
    /// Balanced accuracy in `[0, 1]`.
    pub score: f64,
}

/// Trains `model` for one pass and returns the updated model.
///
/// The patch goes in as an auxiliary model input; images are fed unmodified. The optimizer
/// steps once per batch at the schedule's current rate. A per-batch schedule advances after
/// every step. Per-epoch schedules are left to the caller, which steps them after evaluation.
#[allow(clippy::too_many_arguments)]
pub fn run_train_pass<B, M, O, P, D>(
    mut model: M,
    producer: &P,
    source: &D,
    device: &B::Device,
    loss_fn: &CrossEntropyLoss<B>,
    optim: &mut O,
    schedule: &mut LrSchedule,
    progress: &mut dyn ProgressSink,
    ctx: PassContext,
) -> TrainResult<(M, PassSummary)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + TileClassifier<B>,
    O: Optimizer<M, B>,
    P: PatchProducer,
    D: BatchSource,
{
    let features = model.patch_features().ok_or(TrainError::PatchUnsupported)?;
    let batches = source.num_batches();
    let mut metrics = MetricAccumulator::new();
    let mut loss_sum = 0.0;

    for batch_idx in 0..batches {
        let batch = source.batch::<B>(batch_idx, device)?;
        let targets = batch.targets.clone();
        let patch = training_patch(producer, batch.metadata, features)?;
        let logits = model
            .forward_with_patch(batch.images, patch)
            .ok_or(TrainError::PatchUnsupported)?;

        let loss = loss_fn.forward(logits.clone(), batch.targets);
        loss_sum += loss.clone().into_scalar().elem::<f64>();
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(schedule.lr(), model, grads);
        if schedule.cadence() == StepCadence::PerBatch {
            schedule.on_batch_end();
        }

        metrics.record(&predicted_labels(logits.detach())?, &labels(targets)?)?;
        progress.report(
            ctx.epoch,
            ctx.epochs,
            batch_idx,
            batches,
            &status(loss_sum, batch_idx, metrics.current_score()),
        );
    }

    let summary = PassSummary {
        batches,
        mean_loss: mean(loss_sum, batches),
        score: metrics.current_score(),
    };
    tracing::debug!(
        epoch = ctx.epoch,
        loss = summary.mean_loss,
        score = summary.score * 100.0,
        lr = schedule.lr(),
        "train pass done"
    );
    Ok((model, summary))
}

/// Evaluates `model` for one pass with the patch painted into `region` of every tile.
///
/// Takes the inference module, so no gradients are tracked. Returns balanced accuracy on the
/// percentage scale.
#[allow(clippy::too_many_arguments)]
pub fn run_eval_pass<B, M, P, D>(
    model: &M,
    producer: &P,
    source: &D,
    device: &B::Device,
    loss_fn: &CrossEntropyLoss<B>,
    region: &PatchRegion,
    progress: &mut dyn ProgressSink,
    ctx: PassContext,
) -> TrainResult<f64>
where
    B: Backend,
    M: TileClassifier<B>,
    P: PatchProducer,
    D: BatchSource,
{
    let batches = source.num_batches();
    let mut metrics = MetricAccumulator::new();
    let mut loss_sum = 0.0;

    for batch_idx in 0..batches {
        let batch = source.batch::<B>(batch_idx, device)?;
        let images = embed_patch(producer, batch.images, batch.metadata, region)?;
        let logits = model.forward(images);

        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
        loss_sum += loss.into_scalar().elem::<f64>();

        metrics.record(&predicted_labels(logits)?, &labels(batch.targets)?)?;
        progress.report(
            ctx.epoch,
            ctx.epochs,
            batch_idx,
            batches,
            &status(loss_sum, batch_idx, metrics.current_score()),
        );
    }

    let score = 100.0 * metrics.current_score();
    tracing::debug!(
        epoch = ctx.epoch,
        loss = mean(loss_sum, batches),
        score,
        "eval pass done"
    );
    Ok(score)
}

fn status(loss_sum: f64, batch_idx: usize, score: f64) -> String {
    format!(
        "Loss: {:.3}   Acc: {:.3}%",
        loss_sum / (batch_idx + 1) as f64,
        100.0 * score
    )
}

fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn predicted_labels<B: Backend>(logits: Tensor<B, 2>) -> TrainResult<Vec<usize>> {
    let n = logits.dims()[0];
    labels(logits.argmax(1).reshape([n]))
}

fn labels<B: Backend>(tensor: Tensor<B, 1, Int>) -> TrainResult<Vec<usize>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map(|v| v.into_iter().map(|x| x.max(0) as usize).collect())
        .map_err(|e| TrainError::Tensor(format!("{e:?}")))
}
