//! Burn classifiers for patch-injected image tiles.
//!
//! Every classifier maps a batch of tiles `[N, C, H, W]` to class logits `[N, K]`.
//! During training a classifier may also consume the flattened metadata patch as an
//! auxiliary input; whether it can is declared through [`TileClassifier::patch_features`].
//!
//! - `LinearTileClassifier`: flatten + MLP, additive patch fusion.
//! - `ConvTileClassifier`: two conv blocks + pooled MLP head, additive patch fusion.

pub mod patch;

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

pub use patch::{PatchProducer, PatchProducerConfig, ProjectionPatchProducer};

/// Classifier surface consumed by the training loop.
pub trait TileClassifier<B: Backend> {
    /// Image-only forward, used for evaluation.
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Width of the flattened patch vector this model fuses, if it accepts one.
    fn patch_features(&self) -> Option<usize> {
        None
    }

    /// Forward with an auxiliary patch vector `[N, patch_features]`.
    /// Returns `None` when the model has no patch input.
    fn forward_with_patch(
        &self,
        images: Tensor<B, 4>,
        patch: Tensor<B, 2>,
    ) -> Option<Tensor<B, 2>> {
        let _ = (images, patch);
        None
    }
}

#[derive(Debug, Clone)]
pub struct LinearTileClassifierConfig {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub hidden: usize,
    pub num_classes: usize,
    /// Flattened patch width; `None` builds an image-only model.
    pub patch_features: Option<usize>,
}

impl Default for LinearTileClassifierConfig {
    fn default() -> Self {
        Self {
            channels: 3,
            height: 32,
            width: 32,
            hidden: 64,
            num_classes: 2,
            patch_features: Some(16 * 16),
        }
    }
}

#[derive(Debug, Module)]
pub struct LinearTileClassifier<B: Backend> {
    stem: nn::Linear<B>,
    patch_embed: Option<nn::Linear<B>>,
    head: nn::Linear<B>,
    patch_features: usize,
}

impl<B: Backend> LinearTileClassifier<B> {
    pub fn new(cfg: LinearTileClassifierConfig, device: &B::Device) -> Self {
        let input_dim = cfg.channels * cfg.height * cfg.width;
        let stem = nn::LinearConfig::new(input_dim, cfg.hidden).init(device);
        let patch_embed = cfg
            .patch_features
            .map(|dim| nn::LinearConfig::new(dim, cfg.hidden).init(device));
        let head = nn::LinearConfig::new(cfg.hidden, cfg.num_classes.max(1)).init(device);
        Self {
            stem,
            patch_embed,
            head,
            patch_features: cfg.patch_features.unwrap_or(0),
        }
    }

    fn embed(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [n, c, h, w] = images.dims();
        self.stem.forward(images.reshape([n, c * h * w]))
    }
}

impl<B: Backend> TileClassifier<B> for LinearTileClassifier<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(relu(self.embed(images)))
    }

    fn patch_features(&self) -> Option<usize> {
        self.patch_embed.as_ref().map(|_| self.patch_features)
    }

    fn forward_with_patch(
        &self,
        images: Tensor<B, 4>,
        patch: Tensor<B, 2>,
    ) -> Option<Tensor<B, 2>> {
        let patch_embed = self.patch_embed.as_ref()?;
        let x = self.embed(images) + patch_embed.forward(patch);
        Some(self.head.forward(relu(x)))
    }
}

#[derive(Debug, Clone)]
pub struct ConvTileClassifierConfig {
    pub channels: usize,
    pub filters: usize,
    pub hidden: usize,
    pub num_classes: usize,
    pub patch_features: Option<usize>,
}

impl Default for ConvTileClassifierConfig {
    fn default() -> Self {
        Self {
            channels: 3,
            filters: 16,
            hidden: 128,
            num_classes: 2,
            patch_features: Some(16 * 16),
        }
    }
}

/// Pooled grid side; the conv trunk always hands `filters * 2 * POOL * POOL` features to the head.
const POOL: usize = 4;

#[derive(Debug, Module)]
pub struct ConvTileClassifier<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: AdaptiveAvgPool2d,
    fc: nn::Linear<B>,
    patch_embed: Option<nn::Linear<B>>,
    head: nn::Linear<B>,
    patch_features: usize,
}

impl<B: Backend> ConvTileClassifier<B> {
    pub fn new(cfg: ConvTileClassifierConfig, device: &B::Device) -> Self {
        let filters = cfg.filters.max(1);
        let conv1 = Conv2dConfig::new([cfg.channels, filters], [3, 3])
            .with_padding(nn::PaddingConfig2d::Same)
            .init(device);
        let conv2 = Conv2dConfig::new([filters, filters * 2], [3, 3])
            .with_padding(nn::PaddingConfig2d::Same)
            .init(device);
        let pool = AdaptiveAvgPool2dConfig::new([POOL, POOL]).init();
        let fc = nn::LinearConfig::new(filters * 2 * POOL * POOL, cfg.hidden).init(device);
        let patch_embed = cfg
            .patch_features
            .map(|dim| nn::LinearConfig::new(dim, cfg.hidden).init(device));
        let head = nn::LinearConfig::new(cfg.hidden, cfg.num_classes.max(1)).init(device);
        Self {
            conv1,
            conv2,
            pool,
            fc,
            patch_embed,
            head,
            patch_features: cfg.patch_features.unwrap_or(0),
        }
    }

    fn embed(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.conv1.forward(images));
        let x = relu(self.conv2.forward(x));
        let x = self.pool.forward(x);
        let [n, c, h, w] = x.dims();
        self.fc.forward(x.reshape([n, c * h * w]))
    }
}

impl<B: Backend> TileClassifier<B> for ConvTileClassifier<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(relu(self.embed(images)))
    }

    fn patch_features(&self) -> Option<usize> {
        self.patch_embed.as_ref().map(|_| self.patch_features)
    }

    fn forward_with_patch(
        &self,
        images: Tensor<B, 4>,
        patch: Tensor<B, 2>,
    ) -> Option<Tensor<B, 2>> {
        let patch_embed = self.patch_embed.as_ref()?;
        let x = self.embed(images) + patch_embed.forward(patch);
        Some(self.head.forward(relu(x)))
    }
}

pub mod prelude {
    pub use super::{
        ConvTileClassifier, ConvTileClassifierConfig, LinearTileClassifier,
        LinearTileClassifierConfig, PatchProducer, PatchProducerConfig, ProjectionPatchProducer,
        TileClassifier,
    };
}
