//! How metadata patches enter a batch.
//!
//! Training feeds the flattened patch to the model as a second input and leaves the pixels
//! alone. Evaluation paints the patch into a fixed corner of the tile and the model sees only
//! pixels.

use std::ops::Range;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use patch_models::PatchProducer;

use crate::error::{TrainError, TrainResult};

/// Tile region overwritten by the evaluation patch: `rows` × `[col_start, width)`, all channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRegion {
    pub rows: Range<usize>,
    pub col_start: usize,
}

impl Default for PatchRegion {
    fn default() -> Self {
        Self {
            rows: 0..16,
            col_start: 16,
        }
    }
}

impl PatchRegion {
    /// Row and column ranges for a tile of `height` × `width`.
    pub fn ranges(
        &self,
        height: usize,
        width: usize,
    ) -> TrainResult<(Range<usize>, Range<usize>)> {
        if self.rows.end > height || self.rows.is_empty() || self.col_start >= width {
            return Err(TrainError::ShapeMismatch {
                context: "patch region vs tile",
                expected: vec![self.rows.end, self.col_start + 1],
                actual: vec![height, width],
            });
        }
        Ok((self.rows.clone(), self.col_start..width))
    }

    /// Checks up front that a `[channels, patch_size, patch_size]` patch covers the region of a
    /// `[channels, height, width]` tile exactly (a single patch channel may broadcast).
    pub fn check_fits(
        &self,
        tile: [usize; 3],
        patch_channels: usize,
        patch_size: usize,
    ) -> TrainResult<()> {
        let [channels, height, width] = tile;
        let (rows, cols) = self.ranges(height, width)?;
        let region = [channels, rows.len(), cols.len()];
        let patch = [patch_channels, patch_size, patch_size];
        if !covers(patch, region) {
            return Err(TrainError::ShapeMismatch {
                context: "patch vs region",
                expected: region.to_vec(),
                actual: patch.to_vec(),
            });
        }
        Ok(())
    }
}

fn covers(patch: [usize; 3], region: [usize; 3]) -> bool {
    (patch[0] == region[0] || patch[0] == 1) && patch[1] == region[1] && patch[2] == region[2]
}

fn check_metadata<B: Backend, P: PatchProducer>(
    producer: &P,
    metadata: &Tensor<B, 2>,
    batch: usize,
) -> TrainResult<()> {
    let dims = metadata.dims();
    if dims != [batch, producer.metadata_dim()] {
        return Err(TrainError::ShapeMismatch {
            context: "metadata",
            expected: vec![batch, producer.metadata_dim()],
            actual: dims.to_vec(),
        });
    }
    Ok(())
}

/// Training path: the patch flattened to `[N, features]` for the model's auxiliary input.
pub fn training_patch<B: Backend, P: PatchProducer>(
    producer: &P,
    metadata: Tensor<B, 2>,
    expected_features: usize,
) -> TrainResult<Tensor<B, 2>> {
    let batch = metadata.dims()[0];
    check_metadata(producer, &metadata, batch)?;
    let patch = producer.produce(metadata);
    let [n, c, h, w] = patch.dims();
    if n != batch || c * h * w != expected_features {
        return Err(TrainError::ShapeMismatch {
            context: "training patch vs model input",
            expected: vec![batch, expected_features],
            actual: vec![n, c * h * w],
        });
    }
    Ok(patch.reshape([n, c * h * w]))
}

/// Evaluation path: writes the patch over `region` of every image and returns the patched
/// batch. Pixels outside the region are untouched.
pub fn embed_patch<B: Backend, P: PatchProducer>(
    producer: &P,
    images: Tensor<B, 4>,
    metadata: Tensor<B, 2>,
    region: &PatchRegion,
) -> TrainResult<Tensor<B, 4>> {
    let [n, channels, height, width] = images.dims();
    check_metadata(producer, &metadata, n)?;
    let (rows, cols) = region.ranges(height, width)?;
    let patch = producer.produce(metadata);
    let [pn, pc, ph, pw] = patch.dims();
    let expected = [channels, rows.len(), cols.len()];
    if pn != n || !covers([pc, ph, pw], expected) {
        return Err(TrainError::ShapeMismatch {
            context: "evaluation patch vs region",
            expected: vec![n, channels, rows.len(), cols.len()],
            actual: vec![pn, pc, ph, pw],
        });
    }
    let patch = if pc == channels {
        patch
    } else {
        Tensor::cat(vec![patch; channels], 1)
    };
    Ok(images.slice_assign([0..n, 0..channels, rows, cols], patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use patch_models::{PatchProducerConfig, ProjectionPatchProducer};

    type B = NdArray<f32>;

    fn producer(patch_size: usize) -> ProjectionPatchProducer {
        ProjectionPatchProducer::new(
            PatchProducerConfig {
                metadata_dim: 3,
                patch_size,
                strength: 0.5,
            },
            11,
        )
    }

    fn tiles(n: usize, c: usize, h: usize, w: usize) -> Tensor<B, 4> {
        let values: Vec<f32> = (0..n * c * h * w).map(|i| (i % 97) as f32 + 1.0).collect();
        Tensor::from_data(TensorData::new(values, [n, c, h, w]), &Default::default())
    }

    fn metadata(n: usize) -> Tensor<B, 2> {
        let values: Vec<f32> = (0..n * 3).map(|i| i as f32 * 0.3 - 1.0).collect();
        Tensor::from_data(TensorData::new(values, [n, 3]), &Default::default())
    }

    #[test]
    fn embed_touches_only_region() {
        let (n, c, h, w) = (2, 3, 24, 32);
        let images = tiles(n, c, h, w);
        let before = images.clone().into_data().to_vec::<f32>().unwrap();
        let patched = embed_patch(&producer(16), images, metadata(n), &PatchRegion::default())
            .unwrap()
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        let patch = producer(16)
            .produce(metadata(n))
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        for b in 0..n {
            for ch in 0..c {
                for y in 0..h {
                    for x in 0..w {
                        let idx = ((b * c + ch) * h + y) * w + x;
                        if y < 16 && x >= 16 {
                            let p = patch[(b * 16 + y) * 16 + (x - 16)];
                            assert_eq!(patched[idx], p);
                        } else {
                            assert_eq!(patched[idx].to_bits(), before[idx].to_bits());
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn embed_rejects_mismatched_region() {
        // 8x8 patch cannot cover rows [0,16) x cols [16,32).
        let err = embed_patch(
            &producer(8),
            tiles(1, 1, 32, 32),
            metadata(1),
            &PatchRegion::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TrainError::ShapeMismatch { .. }));

        // Tile too narrow for the region.
        let err = embed_patch(
            &producer(16),
            tiles(1, 1, 16, 16),
            metadata(1),
            &PatchRegion::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TrainError::ShapeMismatch { .. }));
    }

    #[test]
    fn training_patch_flattens_without_touching_images() {
        let images = tiles(2, 3, 32, 32);
        let before = images.clone().into_data().to_vec::<f32>().unwrap();
        let flat = training_patch(&producer(16), metadata(2), 256).unwrap();
        assert_eq!(flat.dims(), [2, 256]);
        assert_eq!(images.into_data().to_vec::<f32>().unwrap(), before);
    }

    #[test]
    fn training_patch_checks_model_width() {
        let err = training_patch(&producer(16), metadata(2), 100).unwrap_err();
        assert!(matches!(err, TrainError::ShapeMismatch { .. }));
    }

    #[test]
    fn metadata_width_is_checked() {
        let wide = Tensor::<B, 2>::zeros([2, 5], &Default::default());
        assert!(training_patch(&producer(16), wide, 256).is_err());
    }

    #[test]
    fn region_fit_check() {
        let region = PatchRegion::default();
        assert!(region.check_fits([3, 32, 32], 1, 16).is_ok());
        assert!(region.check_fits([3, 32, 32], 3, 16).is_ok());
        assert!(region.check_fits([3, 32, 32], 2, 16).is_err());
        assert!(region.check_fits([3, 32, 48], 1, 16).is_err());
    }
}
