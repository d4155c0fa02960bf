//! # wgan-core — Networks
//!
//! Every network needed to train a weight-clipped Wasserstein GAN:
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`activation`] | `Activation` (ReLU / LeakyReLU / Tanh) |
//! | [`blocks`] | `ConvBlock`, `UpBlock`: transform → BatchNorm2d → activation |
//! | [`residual`] | `ResidualBlock`, `ResNet` feature extractor (CIFAR) |
//! | [`generator`] | `Generator`: latent → image in [-1, 1] |
//! | [`critic`] | `Critic`: image → unbounded score |
//! | [`params`] | trainable-var selection, weight clipping, counts |
//!
//! All networks implement [`candle_nn::ModuleT`]; `train = true` makes batch
//! norm use (and update) batch statistics. Parameters live in the `VarMap`
//! behind the `VarBuilder` passed to `new`.

pub mod activation;
pub mod blocks;
pub mod critic;
pub mod generator;
pub mod params;
pub mod residual;

// ── Public re-exports ───────────────────────────────────────────────────────

pub use activation::Activation;
pub use blocks::{ConvBlock, ConvSpec, UpBlock};
pub use critic::Critic;
pub use generator::Generator;
pub use params::{
    clamp_vars, is_buffer, max_abs, named_trainable_vars, named_vars, parameter_count,
};
pub use residual::{ResNet, ResidualBlock};
