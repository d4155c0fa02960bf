//! Convolution stages: transform → BatchNorm2d → activation.
//!
//! Batch norm runs on batch statistics when `train = true` and on its running
//! statistics otherwise. The running statistics live in the same `VarMap` as
//! the learned weights under `<prefix>.bn.running_mean` / `running_var`; see
//! [`crate::params::is_buffer`].

use candle_core::{Result, Tensor};
use candle_nn::{
    batch_norm, conv2d, conv_transpose2d, BatchNorm, Conv2d, Conv2dConfig, ConvTranspose2d,
    ConvTranspose2dConfig, Module, ModuleT, VarBuilder,
};

use crate::activation::Activation;

const BN_EPS: f64 = 1e-5;

/// Square-kernel convolution geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvSpec {
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
}

impl ConvSpec {
    pub const fn new(kernel: usize, stride: usize, padding: usize) -> Self {
        Self {
            kernel,
            stride,
            padding,
        }
    }

    /// `k=4, s=2, p=1`: doubles (transposed) or halves (plain) spatial size.
    pub const RESAMPLE: Self = Self::new(4, 2, 1);
    /// `k=3, s=1, p=1`: size-preserving.
    pub const SAME_3X3: Self = Self::new(3, 1, 1);
    /// `k=1, s=1, p=0`: channel projection.
    pub const POINTWISE: Self = Self::new(1, 1, 0);

    fn conv2d_config(&self) -> Conv2dConfig {
        Conv2dConfig {
            padding: self.padding,
            stride: self.stride,
            ..Default::default()
        }
    }

    fn conv_transpose2d_config(&self) -> ConvTranspose2dConfig {
        ConvTranspose2dConfig {
            padding: self.padding,
            stride: self.stride,
            ..Default::default()
        }
    }
}

// ── ConvBlock ───────────────────────────────────────────────────────────────

/// `Conv2d → BatchNorm2d → activation` (activation optional, for shortcut
/// projections that are summed before activating).
pub struct ConvBlock {
    conv: Conv2d,
    bn: BatchNorm,
    activation: Option<Activation>,
}

impl ConvBlock {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        spec: ConvSpec,
        activation: Option<Activation>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let conv = conv2d(
            in_channels,
            out_channels,
            spec.kernel,
            spec.conv2d_config(),
            vb.pp("conv"),
        )?;
        let bn = batch_norm(out_channels, BN_EPS, vb.pp("bn"))?;
        Ok(Self {
            conv,
            bn,
            activation,
        })
    }
}

impl ModuleT for ConvBlock {
    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.conv.forward(x)?;
        let x = self.bn.forward_t(&x, train)?;
        match self.activation {
            Some(act) => act.apply(&x),
            None => Ok(x),
        }
    }
}

// ── UpBlock ─────────────────────────────────────────────────────────────────

/// `ConvTranspose2d → BatchNorm2d → ReLU`: one generator upsampling stage.
pub struct UpBlock {
    conv: ConvTranspose2d,
    bn: BatchNorm,
}

impl UpBlock {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        spec: ConvSpec,
        vb: VarBuilder,
    ) -> Result<Self> {
        let conv = conv_transpose2d(
            in_channels,
            out_channels,
            spec.kernel,
            spec.conv_transpose2d_config(),
            vb.pp("conv"),
        )?;
        let bn = batch_norm(out_channels, BN_EPS, vb.pp("bn"))?;
        Ok(Self { conv, bn })
    }
}

impl ModuleT for UpBlock {
    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.conv.forward(x)?;
        self.bn.forward_t(&x, train)?.relu()
    }
}

/// Bare transposed convolution (generator output layer, no normalisation).
pub fn output_conv_transpose(
    in_channels: usize,
    out_channels: usize,
    spec: ConvSpec,
    vb: VarBuilder,
) -> Result<ConvTranspose2d> {
    conv_transpose2d(
        in_channels,
        out_channels,
        spec.kernel,
        spec.conv_transpose2d_config(),
        vb,
    )
}

/// Bare convolution (critic scoring layer, no normalisation).
pub fn output_conv(
    in_channels: usize,
    out_channels: usize,
    spec: ConvSpec,
    vb: VarBuilder,
) -> Result<Conv2d> {
    conv2d(
        in_channels,
        out_channels,
        spec.kernel,
        spec.conv2d_config(),
        vb,
    )
}

// ── Tests ───────────────────────────────────────────────────────────────────
