use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::error::{TrainError, TrainResult};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// Seeded in-memory tiles; class is visible in the lower-left quadrant.
    Synthetic,
    /// `train.json` / `test.json` manifests under the data root.
    Manifest,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Synthetic => "synthetic",
            DatasetKind::Manifest => "manifest",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl TileShape {
    pub fn pixels(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }
}

#[derive(Debug, Clone)]
pub struct TileSample {
    /// CHW layout, normalized to [0, 1].
    pub image_chw: Vec<f32>,
    pub label: usize,
    pub metadata: Vec<f32>,
}

/// One batch: images `[N, C, H, W]`, labels `[N]`, metadata `[N, M]`.
#[derive(Debug, Clone)]
pub struct TileBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
    pub metadata: Tensor<B, 2>,
}

impl<B: Backend> TileBatch<B> {
    pub fn new(
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
        metadata: Tensor<B, 2>,
    ) -> TrainResult<Self> {
        let n = images.dims()[0];
        let lead = [n, targets.dims()[0], metadata.dims()[0]];
        if lead.iter().any(|d| *d != n) {
            return Err(TrainError::ShapeMismatch {
                context: "batch leading dimension",
                expected: vec![n, n, n],
                actual: lead.to_vec(),
            });
        }
        Ok(Self {
            images,
            targets,
            metadata,
        })
    }

    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Finite, restartable batch sequence. Every pass walks `0..num_batches()`.
pub trait BatchSource {
    fn num_batches(&self) -> usize;
    fn batch<B: Backend>(&self, index: usize, device: &B::Device) -> TrainResult<TileBatch<B>>;
}

#[derive(Debug, Clone)]
pub struct TileDataset {
    samples: Vec<TileSample>,
    shape: TileShape,
    metadata_dim: usize,
    batch_size: usize,
}

impl TileDataset {
    pub fn from_samples(
        samples: Vec<TileSample>,
        shape: TileShape,
        metadata_dim: usize,
        batch_size: usize,
    ) -> TrainResult<Self> {
        if batch_size == 0 {
            return Err(TrainError::InvalidArgument("batch size must be >= 1".into()));
        }
        for (idx, sample) in samples.iter().enumerate() {
            if sample.image_chw.len() != shape.pixels() || sample.metadata.len() != metadata_dim {
                return Err(TrainError::ShapeMismatch {
                    context: "tile sample",
                    expected: vec![idx, shape.pixels(), metadata_dim],
                    actual: vec![idx, sample.image_chw.len(), sample.metadata.len()],
                });
            }
        }
        Ok(Self {
            samples,
            shape,
            metadata_dim,
            batch_size,
        })
    }

    pub fn shuffle(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        self.samples.shuffle(&mut rng);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn shape(&self) -> TileShape {
        self.shape
    }

    pub fn metadata_dim(&self) -> usize {
        self.metadata_dim
    }

    /// Largest label + 1.
    pub fn num_classes(&self) -> usize {
        self.samples.iter().map(|s| s.label + 1).max().unwrap_or(0)
    }
}

impl BatchSource for TileDataset {
    fn num_batches(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    fn batch<B: Backend>(&self, index: usize, device: &B::Device) -> TrainResult<TileBatch<B>> {
        let start = index * self.batch_size;
        if start >= self.samples.len() {
            return Err(TrainError::InvalidArgument(format!(
                "batch {index} out of range ({} batches)",
                self.num_batches()
            )));
        }
        let end = (start + self.batch_size).min(self.samples.len());
        let chunk = &self.samples[start..end];
        let n = chunk.len();

        let mut image_buf = Vec::with_capacity(n * self.shape.pixels());
        let mut meta_buf = Vec::with_capacity(n * self.metadata_dim);
        let mut labels = Vec::with_capacity(n);
        for sample in chunk {
            image_buf.extend_from_slice(&sample.image_chw);
            meta_buf.extend_from_slice(&sample.metadata);
            labels.push(sample.label as i64);
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(
                image_buf,
                [n, self.shape.channels, self.shape.height, self.shape.width],
            ),
            device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [n]), device);
        let metadata =
            Tensor::<B, 2>::from_data(TensorData::new(meta_buf, [n, self.metadata_dim]), device);
        TileBatch::new(images, targets, metadata)
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub train_samples: usize,
    pub test_samples: usize,
    pub num_classes: usize,
    pub shape: TileShape,
    pub metadata_dim: usize,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            train_samples: 256,
            test_samples: 64,
            num_classes: 2,
            shape: TileShape {
                channels: 3,
                height: 32,
                width: 32,
            },
            metadata_dim: 36,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    /// Builds (train, test). The class raises brightness in the lower-left quadrant, which the
    /// evaluation patch never covers.
    pub fn build(&self, batch_size: usize) -> TrainResult<(TileDataset, TileDataset)> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut make = |count: usize| -> Vec<TileSample> {
            (0..count)
                .map(|i| {
                    let label = i % self.num_classes.max(1);
                    let signal = label as f32 / self.num_classes.max(1) as f32;
                    let TileShape {
                        channels,
                        height,
                        width,
                    } = self.shape;
                    let mut image_chw = Vec::with_capacity(self.shape.pixels());
                    for _c in 0..channels {
                        for y in 0..height {
                            for x in 0..width {
                                let noise = rng.random_range(0.0f32..0.5);
                                let lit = y >= height / 2 && x < width / 2;
                                image_chw.push(if lit { noise + signal * 0.5 } else { noise });
                            }
                        }
                    }
                    let metadata = (0..self.metadata_dim)
                        .map(|_| rng.random_range(-1.0f32..1.0))
                        .collect();
                    TileSample {
                        image_chw,
                        label,
                        metadata,
                    }
                })
                .collect()
        };
        let train = make(self.train_samples);
        let test = make(self.test_samples);
        let mut train = TileDataset::from_samples(train, self.shape, self.metadata_dim, batch_size)?;
        train.shuffle(self.seed);
        let test = TileDataset::from_samples(test, self.shape, self.metadata_dim, batch_size)?;
        Ok((train, test))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    /// Image path relative to the manifest root.
    pub image: String,
    pub label: usize,
    pub metadata: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestConfig {
    pub root: PathBuf,
    pub train_file: String,
    pub test_file: String,
}

impl ManifestConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            train_file: "train.json".into(),
            test_file: "test.json".into(),
        }
    }

    /// Loads both splits. All tiles share the first tile's dimensions and metadata width.
    pub fn build(&self, batch_size: usize, seed: u64) -> TrainResult<(TileDataset, TileDataset)> {
        let (train, shape, meta_dim) = self.load_split(&self.train_file, None)?;
        let (test, _, _) = self.load_split(&self.test_file, Some((shape, meta_dim)))?;
        let mut train = TileDataset::from_samples(train, shape, meta_dim, batch_size)?;
        train.shuffle(seed);
        let test = TileDataset::from_samples(test, shape, meta_dim, batch_size)?;
        Ok((train, test))
    }

    fn load_split(
        &self,
        file: &str,
        expect: Option<(TileShape, usize)>,
    ) -> TrainResult<(Vec<TileSample>, TileShape, usize)> {
        let path = self.root.join(file);
        let raw = fs::read(&path).map_err(|e| TrainError::io(&path, e))?;
        let entries: Vec<ManifestEntry> =
            serde_json::from_slice(&raw).map_err(|e| TrainError::Dataset {
                path: path.clone(),
                msg: e.to_string(),
            })?;
        if entries.is_empty() {
            return Err(TrainError::EmptyDataset(path.display().to_string()));
        }

        let mut expect = expect;
        let mut samples = Vec::with_capacity(entries.len());
        for entry in entries {
            let img_path = self.root.join(&entry.image);
            let rgb = image::open(&img_path)
                .map_err(|e| TrainError::Dataset {
                    path: img_path.clone(),
                    msg: e.to_string(),
                })?
                .to_rgb8();
            let (w, h) = rgb.dimensions();
            let shape = TileShape {
                channels: 3,
                height: h as usize,
                width: w as usize,
            };
            let (want_shape, want_meta) = *expect.get_or_insert((shape, entry.metadata.len()));
            if shape != want_shape || entry.metadata.len() != want_meta {
                return Err(TrainError::Dataset {
                    path: img_path,
                    msg: format!(
                        "tile is {}x{} with {} metadata values, expected {}x{} with {}",
                        w,
                        h,
                        entry.metadata.len(),
                        want_shape.width,
                        want_shape.height,
                        want_meta
                    ),
                });
            }

            // Normalized pixel data in CHW order.
            let mut image_chw = Vec::with_capacity(shape.pixels());
            for c in 0..3 {
                for y in 0..h {
                    for x in 0..w {
                        image_chw.push(rgb.get_pixel(x, y)[c] as f32 / 255.0);
                    }
                }
            }
            samples.push(TileSample {
                image_chw,
                label: entry.label,
                metadata: entry.metadata,
            });
        }
        let (shape, meta_dim) = expect.ok_or_else(|| TrainError::EmptyDataset(file.into()))?;
        Ok((samples, shape, meta_dim))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn batches_cover_all_samples() {
        let cfg = SyntheticConfig {
            train_samples: 10,
            test_samples: 3,
            metadata_dim: 4,
            ..Default::default()
        };
        let (train, test) = cfg.build(4).unwrap();
        assert_eq!(train.num_batches(), 3);
        assert_eq!(test.num_batches(), 1);
        assert_eq!(train.num_classes(), 2);

        let device = Default::default();
        let last = train.batch::<B>(2, &device).unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last.images.dims(), [2, 3, 32, 32]);
        assert_eq!(last.metadata.dims(), [2, 4]);
        assert!(train.batch::<B>(3, &device).is_err());
    }

    #[test]
    fn synthetic_is_seeded() {
        let cfg = SyntheticConfig {
            train_samples: 4,
            test_samples: 0,
            ..Default::default()
        };
        let (a, _) = cfg.build(2).unwrap();
        let (b, _) = cfg.build(2).unwrap();
        assert_eq!(a.samples[0].image_chw, b.samples[0].image_chw);
        assert_eq!(a.samples[0].metadata, b.samples[0].metadata);
    }

    #[test]
    fn rejects_bad_samples() {
        let shape = TileShape {
            channels: 1,
            height: 2,
            width: 2,
        };
        let sample = TileSample {
            image_chw: vec![0.0; 3],
            label: 0,
            metadata: vec![],
        };
        assert!(TileDataset::from_samples(vec![sample], shape, 0, 1).is_err());
        assert!(TileDataset::from_samples(vec![], shape, 0, 0).is_err());
    }

    #[test]
    fn batch_leading_dims_must_agree() {
        let device = Default::default();
        let images = Tensor::<B, 4>::zeros([2, 1, 2, 2], &device);
        let targets = Tensor::<B, 1, Int>::zeros([3], &device);
        let metadata = Tensor::<B, 2>::zeros([2, 1], &device);
        assert!(TileBatch::new(images, targets, metadata).is_err());
    }
}
