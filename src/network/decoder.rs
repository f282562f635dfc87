use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{ConvTranspose2d, ConvTranspose2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer,
    },
    tensor::{
        activation::{relu, softmax},
        backend::Backend,
        Tensor,
    },
};

/// Padding and output padding that make a stride-2 transposed convolution
/// exactly double the spatial size.
pub(crate) fn doubling_padding(kernel_size: usize) -> ([usize; 2], [usize; 2]) {
    let padding = kernel_size.saturating_sub(1) / 2;
    let padding_out = 2 + 2 * padding - kernel_size;
    ([padding; 2], [padding_out; 2])
}

#[derive(Config, Debug)]
pub struct UpsampleConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = false)]
    pub dropout: bool,
    #[config(default = 0.5)]
    pub dropout_rate: f64,
    #[config(default = false)]
    pub batch_norm: bool,
}

/// Transposed convolution doubling resolution, then optional batch norm,
/// optional dropout and a ReLU.
#[derive(Module, Debug)]
pub struct Upsample<B: Backend> {
    conv: ConvTranspose2d<B>,
    norm: Option<BatchNorm<B, 2>>,
    dropout: Option<Dropout>,
}

impl UpsampleConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Upsample<B> {
        let (padding, padding_out) = doubling_padding(self.kernel_size);
        let conv = ConvTranspose2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([2, 2])
        .with_padding(padding)
        .with_padding_out(padding_out)
        .with_bias(false)
        .with_initializer(Initializer::Normal {
            mean: 0.0,
            std: 0.02,
        })
        .init(device);

        Upsample {
            conv,
            norm: self
                .batch_norm
                .then(|| BatchNormConfig::new(self.out_channels).init(device)),
            dropout: self
                .dropout
                .then(|| DropoutConfig::new(self.dropout_rate).init()),
        }
    }
}

impl<B: Backend> Upsample<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.conv.forward(input);
        if let Some(norm) = &self.norm {
            x = norm.forward(x);
        }
        if let Some(dropout) = &self.dropout {
            x = dropout.forward(x);
        }
        relu(x)
    }
}

#[derive(Config, Debug)]
pub struct DecoderConfig {
    /// Channels of the lowest-resolution encoder map, the decoder's input.
    pub deepest_channels: usize,
    /// Channels of the remaining encoder maps, highest resolution first.
    pub skip_channels: Vec<usize>,
    /// Output channels of each upsampling stage, applied in order.
    pub stage_channels: Vec<usize>,
    pub num_classes: usize,
    #[config(default = 4)]
    pub crop_size: usize,
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = false)]
    pub dropout: bool,
    #[config(default = 0.5)]
    pub dropout_rate: f64,
    #[config(default = false)]
    pub batch_norm: bool,
}

/// Upsampling stages joined to encoder maps by concatenation, followed by a
/// class projection, softmax and symmetric crop.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    stages: Vec<Upsample<B>>,
    head: ConvTranspose2d<B>,
    crop_size: usize,
}

impl DecoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Decoder<B> {
        let mut in_channels = self.deepest_channels;
        let mut stages = Vec::with_capacity(self.stage_channels.len());
        for (&out_channels, &skip) in self.stage_channels.iter().zip(self.skip_channels.iter().rev()) {
            stages.push(
                UpsampleConfig::new(in_channels, out_channels)
                    .with_kernel_size(self.kernel_size)
                    .with_dropout(self.dropout)
                    .with_dropout_rate(self.dropout_rate)
                    .with_batch_norm(self.batch_norm)
                    .init(device),
            );
            in_channels = out_channels + skip;
        }

        let (padding, padding_out) = doubling_padding(self.kernel_size);
        let head = ConvTranspose2dConfig::new(
            [in_channels, self.num_classes],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([2, 2])
        .with_padding(padding)
        .with_padding_out(padding_out)
        // Transposed convolutions only report fan-in to their initializer.
        .with_initializer(Initializer::KaimingUniform {
            gain: 1.0 / 3.0f64.sqrt(),
            fan_out_only: false,
        })
        .init(device);

        Decoder {
            stages,
            head,
            crop_size: self.crop_size,
        }
    }
}

impl<B: Backend> Decoder<B> {
    /// `deepest` is the lowest-resolution encoder map; `skips` are the others,
    /// highest resolution first. Skips are consumed deepest-first, so the
    /// highest-resolution map joins last.
    pub fn forward(&self, deepest: Tensor<B, 4>, skips: Vec<Tensor<B, 4>>) -> Tensor<B, 4> {
        let x = self
            .stages
            .iter()
            .zip(skips.into_iter().rev())
            .fold(deepest, |x, (stage, skip)| {
                Tensor::cat(vec![stage.forward(x), skip], 1)
            });

        let probabilities = softmax(self.head.forward(x), 1);
        crop(probabilities, self.crop_size)
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }
}

/// Trims `margin` pixels from every spatial edge of a `[b, c, h, w]` tensor.
pub fn crop<B: Backend>(x: Tensor<B, 4>, margin: usize) -> Tensor<B, 4> {
    if margin == 0 {
        return x;
    }
    let [batch, channels, height, width] = x.dims();
    x.slice([
        0..batch,
        0..channels,
        margin..height - margin,
        margin..width - margin,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn padding_doubles_for_common_kernels() {
        for kernel in 1..=5 {
            let (padding, padding_out) = doubling_padding(kernel);
            let size = 7;
            let out = (size - 1) * 2 + kernel + padding_out[0] - 2 * padding[0];
            assert_eq!(out, 2 * size, "kernel {kernel}");
            assert!(padding_out[0] < 2);
        }
    }

    #[test]
    fn upsample_doubles_and_sets_channels() {
        let device = Default::default();
        for batch_norm in [false, true] {
            let stage = UpsampleConfig::new(4, 6)
                .with_dropout(true)
                .with_batch_norm(batch_norm)
                .init::<TestBackend>(&device);
            let out = stage.forward(Tensor::ones([2, 4, 5, 7], &device));
            assert_eq!(out.dims(), [2, 6, 10, 14]);
        }
    }

    #[test]
    fn skips_join_in_reverse() {
        let device = Default::default();
        // Skips highest resolution first: 16x16 with 2 channels, 8x8 with 3.
        let decoder = DecoderConfig::new(5, vec![2, 3], vec![4, 4], 2)
            .with_crop_size(1)
            .init::<TestBackend>(&device);
        let skips = vec![
            Tensor::zeros([1, 2, 16, 16], &device),
            Tensor::zeros([1, 3, 8, 8], &device),
        ];

        let out = decoder.forward(Tensor::ones([1, 5, 4, 4], &device), skips);
        assert_eq!(decoder.num_stages(), 2);
        assert_eq!(out.dims(), [1, 2, 30, 30]);
    }

    #[test]
    fn head_outputs_class_probabilities() {
        let device = Default::default();
        let decoder = DecoderConfig::new(3, vec![2], vec![4], 3)
            .with_crop_size(0)
            .init::<TestBackend>(&device);
        let skips = vec![Tensor::ones([2, 2, 8, 8], &device)];

        let out = decoder.forward(Tensor::ones([2, 3, 4, 4], &device), skips);
        assert_eq!(out.dims(), [2, 3, 16, 16]);
        let deviation = (out.sum_dim(1) - 1.0).abs().max().into_scalar();
        assert!(deviation < 1e-4, "probabilities deviate from 1 by {deviation}");
    }

    #[test]
    fn crop_trims_each_edge() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::zeros([1, 1, 10, 12], &device);
        assert_eq!(crop(x.clone(), 2).dims(), [1, 1, 6, 8]);
        assert_eq!(crop(x, 0).dims(), [1, 1, 10, 12]);
    }
}
