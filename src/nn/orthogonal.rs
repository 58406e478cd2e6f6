//! Orthogonal weight initialization for linear and convolutional layers.
//!
//! Orthogonal matrices preserve vector norms, so gradients through freshly
//! initialized layers neither explode nor vanish. The PPO literature pairs
//! this with layer-specific gains: sqrt(2) for ReLU hidden layers, 0.01 for
//! the action head (near-uniform initial policy), 1.0 for the value head.
//!
//! Burn has no built-in QR decomposition, so the orthogonal basis is produced
//! by Gram-Schmidt over the raw weight data on the CPU. The seed matrix comes
//! from the backend RNG (`Distribution::Normal`), so runs are reproducible
//! after `B::seed`.

use burn::module::{Module, Param};
use burn::tensor::backend::Backend;
use burn::tensor::module::conv2d;
use burn::tensor::ops::ConvOptions;
use burn::tensor::{Distribution, Tensor};

/// Orthonormalize the rows of a row-major `rows x cols` matrix in place.
///
/// Requires `rows <= cols`; rows beyond the rank of the input degenerate and
/// are replaced with a unit basis vector.
fn gram_schmidt_rows(data: &mut [f32], rows: usize, cols: usize) {
    debug_assert_eq!(data.len(), rows * cols);
    debug_assert!(rows <= cols);

    for i in 0..rows {
        // Subtract projections onto the already-orthonormal rows above.
        for j in 0..i {
            let mut dot = 0.0f32;
            for c in 0..cols {
                dot += data[i * cols + c] * data[j * cols + c];
            }
            for c in 0..cols {
                data[i * cols + c] -= dot * data[j * cols + c];
            }
        }

        let norm: f32 = (0..cols)
            .map(|c| data[i * cols + c] * data[i * cols + c])
            .sum::<f32>()
            .sqrt();

        if norm > 1e-10 {
            for c in 0..cols {
                data[i * cols + c] /= norm;
            }
        } else {
            // Degenerate row (linearly dependent seed): fall back to a basis
            // vector, which is orthogonal to every unit-norm row that has no
            // component there.
            for c in 0..cols {
                data[i * cols + c] = 0.0;
            }
            data[i * cols + i % cols] = 1.0;
        }
    }
}

/// Generate a `rows x cols` orthogonal weight matrix scaled by `gain`.
///
/// Tall matrices get orthonormal columns, wide matrices orthonormal rows
/// (matching the semi-orthogonal convention of the reference initializers).
pub fn orthogonal_matrix<B: Backend>(
    rows: usize,
    cols: usize,
    gain: f64,
    device: &B::Device,
) -> Tensor<B, 2> {
    let seed =
        Tensor::<B, 2>::random([rows, cols], Distribution::Normal(0.0, 1.0), device);
    let seed_data = seed.into_data();
    let raw: &[f32] = seed_data
        .as_slice()
        .expect("backend must expose f32 weight data");

    let mut data = raw.to_vec();
    if rows <= cols {
        gram_schmidt_rows(&mut data, rows, cols);
    } else {
        // Orthonormalize columns by transposing, working on rows, and
        // transposing back.
        let mut transposed = vec![0.0f32; rows * cols];
        for r in 0..rows {
            for c in 0..cols {
                transposed[c * rows + r] = data[r * cols + c];
            }
        }
        gram_schmidt_rows(&mut transposed, cols, rows);
        for r in 0..rows {
            for c in 0..cols {
                data[r * cols + c] = transposed[c * rows + r];
            }
        }
    }

    let gain = gain as f32;
    for v in &mut data {
        *v *= gain;
    }

    Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([rows, cols])
}

/// Configuration for [`OrthogonalLinear`].
#[derive(Debug, Clone)]
pub struct OrthogonalLinearConfig {
    pub d_input: usize,
    pub d_output: usize,
    /// Gain factor applied to the orthogonal weights.
    pub gain: f64,
}

impl OrthogonalLinearConfig {
    pub fn new(d_input: usize, d_output: usize) -> Self {
        Self {
            d_input,
            d_output,
            gain: 1.0,
        }
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    /// Initialize the layer with orthogonal weights and zero bias.
    pub fn init<B: Backend>(&self, device: &B::Device) -> OrthogonalLinear<B> {
        let weight = orthogonal_matrix::<B>(self.d_output, self.d_input, self.gain, device);
        OrthogonalLinear {
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(Tensor::zeros([self.d_output], device)),
            d_input: self.d_input,
            d_output: self.d_output,
        }
    }
}

/// Dense layer with orthogonal initialization.
#[derive(Module, Debug)]
pub struct OrthogonalLinear<B: Backend> {
    /// Weight matrix [d_output, d_input].
    pub weight: Param<Tensor<B, 2>>,
    /// Bias [d_output], initialized to zero.
    pub bias: Param<Tensor<B, 1>>,
    d_input: usize,
    d_output: usize,
}

impl<B: Backend> OrthogonalLinear<B> {
    /// `y = x W^T + b` for input `[batch, d_input]`.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        debug_assert_eq!(input.dims()[1], self.d_input);
        input.matmul(self.weight.val().transpose()) + self.bias.val().unsqueeze_dim(0)
    }

    pub fn d_input(&self) -> usize {
        self.d_input
    }

    pub fn d_output(&self) -> usize {
        self.d_output
    }
}

/// Configuration for [`OrthogonalConv2d`].
#[derive(Debug, Clone)]
pub struct OrthogonalConv2dConfig {
    pub channels_in: usize,
    pub channels_out: usize,
    /// Square kernel side length.
    pub kernel_size: usize,
    /// Square stride.
    pub stride: usize,
    pub gain: f64,
}

impl OrthogonalConv2dConfig {
    pub fn new(channels_in: usize, channels_out: usize, kernel_size: usize) -> Self {
        Self {
            channels_in,
            channels_out,
            kernel_size,
            stride: 1,
            gain: 1.0,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    /// Initialize the layer.
    ///
    /// The kernel is initialized as an orthogonal
    /// `[channels_out, channels_in * k * k]` matrix reshaped to
    /// `[channels_out, channels_in, k, k]`, with zero bias.
    pub fn init<B: Backend>(&self, device: &B::Device) -> OrthogonalConv2d<B> {
        let k = self.kernel_size;
        let flat = orthogonal_matrix::<B>(
            self.channels_out,
            self.channels_in * k * k,
            self.gain,
            device,
        );
        let weight = flat.reshape([self.channels_out, self.channels_in, k, k]);

        OrthogonalConv2d {
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(Tensor::zeros([self.channels_out], device)),
            stride: self.stride,
        }
    }
}

/// Valid-padding 2D convolution with orthogonal initialization.
#[derive(Module, Debug)]
pub struct OrthogonalConv2d<B: Backend> {
    /// Kernel [channels_out, channels_in, k, k].
    pub weight: Param<Tensor<B, 4>>,
    /// Bias [channels_out], initialized to zero.
    pub bias: Param<Tensor<B, 1>>,
    stride: usize,
}

impl<B: Backend> OrthogonalConv2d<B> {
    /// Convolve input `[batch, channels_in, h, w]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        conv2d(
            input,
            self.weight.val(),
            Some(self.bias.val()),
            ConvOptions::new([self.stride, self.stride], [0, 0], [1, 1], 1),
        )
    }
}
