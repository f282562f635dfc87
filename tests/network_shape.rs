use burn::backend::NdArray;
use burn::tensor::{backend::Backend, Distribution, Tensor};
use semseg::network::{build, build_pretrained, PyramidEncoderConfig};
use semseg::{Error, NetworkConfig};

type TestBackend = NdArray<f32>;

fn light_encoder() -> PyramidEncoderConfig {
    PyramidEncoderConfig::new().with_channels(vec![8, 8, 8, 8, 8])
}

#[test]
fn standard_input_yields_cropped_class_probabilities() {
    let device = <TestBackend as Backend>::Device::default();
    let encoder = light_encoder().init::<TestBackend>(&device).unwrap();
    let config = NetworkConfig::new([224, 224, 3], 3);
    let network = build(&config, encoder, &device).unwrap();

    for batch in [1, 2] {
        let images = Tensor::<TestBackend, 4>::random(
            [batch, 224, 224, 3],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let out = network.forward(images);
        assert_eq!(out.dims(), [batch, 216, 216, 3]);

        let deviation = (out.sum_dim(3) - 1.0).abs().max().into_scalar();
        assert!(deviation < 1e-4, "probabilities deviate from 1 by {deviation}");
    }
}

#[test]
fn dropout_and_batch_norm_keep_the_contract() {
    let device = <TestBackend as Backend>::Device::default();
    let encoder = light_encoder().init::<TestBackend>(&device).unwrap();
    let config = NetworkConfig::new([64, 96, 3], 2)
        .with_crop_size(2)
        .with_dropout(true)
        .with_batch_norm(true)
        .with_decoder_channels(vec![16, 8, 8, 4]);
    let network = build(&config, encoder, &device).unwrap();

    let out = network.forward(Tensor::ones([3, 64, 96, 3], &device));
    assert_eq!(out.dims(), [3, 60, 92, 2]);
    assert_eq!(network.output_shape(), [60, 92, 2]);
}

#[test]
fn pretrained_weights_are_required() {
    let dir = tempfile::tempdir().unwrap();
    let device = <TestBackend as Backend>::Device::default();
    let config = NetworkConfig::new([64, 64, 3], 2);

    let err = build_pretrained::<TestBackend>(
        &config,
        &light_encoder(),
        &dir.path().join("absent.mpk"),
        &device,
    )
    .unwrap_err();
    assert!(matches!(err, Error::MissingResource { .. }));

    let weights = dir.path().join("encoder.mpk");
    light_encoder()
        .init::<TestBackend>(&device)
        .unwrap()
        .save(&weights)
        .unwrap();
    let network = build_pretrained::<TestBackend>(&config, &light_encoder(), &weights, &device)
        .unwrap();
    assert_eq!(network.taps().len(), 5);
}

#[test]
fn weights_must_match_the_encoder_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let device = <TestBackend as Backend>::Device::default();
    let weights = dir.path().join("encoder.mpk");
    light_encoder()
        .init::<TestBackend>(&device)
        .unwrap()
        .save(&weights)
        .unwrap();

    let err = build_pretrained::<TestBackend>(
        &NetworkConfig::new([64, 64, 3], 2),
        &PyramidEncoderConfig::new(),
        &weights,
        &device,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Record(_)), "{err}");
}
