use burn::backend::Autodiff;
use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use patch_models::{
    ConvTileClassifier, ConvTileClassifierConfig, LinearTileClassifier,
    LinearTileClassifierConfig, TileClassifier,
};

// CPU backend so the shape checks never need a GPU.
type ADBackend = Autodiff<NdArray<f32>>;

#[test]
fn linear_classifier_shapes() {
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let model = LinearTileClassifier::<ADBackend>::new(
        LinearTileClassifierConfig {
            channels: 1,
            height: 32,
            width: 32,
            hidden: 8,
            num_classes: 3,
            patch_features: Some(64),
        },
        &device,
    );
    assert_eq!(model.patch_features(), Some(64));

    let images = Tensor::<ADBackend, 4>::zeros([2, 1, 32, 32], &device);
    assert_eq!(model.forward(images.clone()).dims(), [2, 3]);

    let patch = Tensor::<ADBackend, 2>::zeros([2, 64], &device);
    let logits = model
        .forward_with_patch(images, patch)
        .expect("patch-capable model");
    assert_eq!(logits.dims(), [2, 3]);
}

#[test]
fn conv_classifier_shapes() {
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let model = ConvTileClassifier::<ADBackend>::new(
        ConvTileClassifierConfig {
            channels: 3,
            filters: 4,
            hidden: 16,
            num_classes: 2,
            patch_features: Some(256),
        },
        &device,
    );
    let images = Tensor::<ADBackend, 4>::zeros([3, 3, 32, 32], &device);
    let patch = Tensor::<ADBackend, 2>::zeros([3, 256], &device);
    assert_eq!(model.forward(images.clone()).dims(), [3, 2]);
    assert_eq!(
        model.forward_with_patch(images, patch).map(|t| t.dims()),
        Some([3, 2])
    );
}

#[test]
fn image_only_model_declines_patch() {
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let model = LinearTileClassifier::<ADBackend>::new(
        LinearTileClassifierConfig {
            patch_features: None,
            ..Default::default()
        },
        &device,
    );
    assert_eq!(model.patch_features(), None);
    let images = Tensor::<ADBackend, 4>::zeros([1, 3, 32, 32], &device);
    let patch = Tensor::<ADBackend, 2>::zeros([1, 256], &device);
    assert!(model.forward_with_patch(images, patch).is_none());
}
