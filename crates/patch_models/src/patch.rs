//! Metadata-to-patch producers.

use burn::tensor::activation::tanh;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Maps a metadata batch `[N, M]` to a patch batch `[N, Cp, P, P]`.
///
/// Producers are built once per run and must be deterministic for fixed parameters.
pub trait PatchProducer {
    /// Metadata width `M` the producer expects.
    fn metadata_dim(&self) -> usize;
    /// Patch side length `P`.
    fn patch_size(&self) -> usize;
    /// Patch channel count `Cp`.
    fn patch_channels(&self) -> usize {
        1
    }
    fn produce<B: Backend>(&self, metadata: Tensor<B, 2>) -> Tensor<B, 4>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchProducerConfig {
    pub metadata_dim: usize,
    pub patch_size: usize,
    /// Amplitude of the patch; outputs lie in `[-strength, strength]`.
    pub strength: f32,
}

impl Default for PatchProducerConfig {
    fn default() -> Self {
        Self {
            metadata_dim: 36,
            patch_size: 16,
            strength: 0.2,
        }
    }
}

/// Fixed random projection of metadata onto a single-channel square patch.
#[derive(Debug, Clone)]
pub struct ProjectionPatchProducer {
    cfg: PatchProducerConfig,
    /// Row-major `[metadata_dim, patch_size * patch_size]`.
    weights: Vec<f32>,
}

impl ProjectionPatchProducer {
    pub fn new(cfg: PatchProducerConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let fan_in = cfg.metadata_dim.max(1) as f32;
        let scale = 1.0 / fan_in.sqrt();
        let len = cfg.metadata_dim * cfg.patch_size * cfg.patch_size;
        let weights = (0..len)
            .map(|_| rng.random_range(-1.0f32..1.0) * scale)
            .collect();
        Self { cfg, weights }
    }

    pub fn config(&self) -> PatchProducerConfig {
        self.cfg
    }
}

impl PatchProducer for ProjectionPatchProducer {
    fn metadata_dim(&self) -> usize {
        self.cfg.metadata_dim
    }

    fn patch_size(&self) -> usize {
        self.cfg.patch_size
    }

    fn produce<B: Backend>(&self, metadata: Tensor<B, 2>) -> Tensor<B, 4> {
        let n = metadata.dims()[0];
        let p = self.cfg.patch_size;
        let weights = Tensor::<B, 2>::from_data(
            TensorData::new(self.weights.clone(), [self.cfg.metadata_dim, p * p]),
            &metadata.device(),
        );
        let patch = tanh(metadata.matmul(weights)).mul_scalar(self.cfg.strength);
        patch.reshape([n, 1, p, p])
    }
}
