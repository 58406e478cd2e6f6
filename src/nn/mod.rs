//! Neural network building blocks.

pub mod orthogonal;

pub use orthogonal::{
    orthogonal_matrix, OrthogonalConv2d, OrthogonalConv2dConfig, OrthogonalLinear,
    OrthogonalLinearConfig,
};
