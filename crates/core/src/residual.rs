//! Residual building blocks for the CIFAR generator.
//!
//! ```text
//! ResidualBlock(c_in → c_out):
//!   main     = ReLU(BN(Conv3x3( ReLU(BN(Conv3x3(x))) )))
//!   shortcut = x                      if c_in == c_out
//!            = BN(Conv1x1(x))         otherwise
//!   out      = ReLU(main + shortcut)
//!
//! ResNet(c):
//!   a   = ConvBlock3x3(c → c)(x) → blocks c→128→256→512→1024
//!   b   = ConvBlock3x3(c → 1024)(x)
//!   out = ConvBlock3x3(1024 → c)( ReLU(a + b) )
//! ```

use candle_core::{Result, Tensor};
use candle_nn::{ModuleT, VarBuilder};

use crate::activation::Activation;
use crate::blocks::{ConvBlock, ConvSpec};

/// Width of the ResNet's wide path and of its last residual block.
pub const RESNET_WIDE_CHANNELS: usize = 1024;

/// Output widths of the four chained residual blocks.
const RESNET_BLOCK_WIDTHS: [usize; 4] = [128, 256, 512, RESNET_WIDE_CHANNELS];

// ── ResidualBlock ───────────────────────────────────────────────────────────

pub struct ResidualBlock {
    conv1: ConvBlock,
    conv2: ConvBlock,
    /// `None` = identity shortcut.
    shortcut: Option<ConvBlock>,
}

impl ResidualBlock {
    pub fn new(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Self> {
        let conv1 = ConvBlock::new(
            in_channels,
            out_channels,
            ConvSpec::SAME_3X3,
            Some(Activation::Relu),
            vb.pp("conv1"),
        )?;
        let conv2 = ConvBlock::new(
            out_channels,
            out_channels,
            ConvSpec::SAME_3X3,
            Some(Activation::Relu),
            vb.pp("conv2"),
        )?;
        let shortcut = if in_channels != out_channels {
            Some(ConvBlock::new(
                in_channels,
                out_channels,
                ConvSpec::POINTWISE,
                None,
                vb.pp("shortcut"),
            )?)
        } else {
            None
        };
        Ok(Self {
            conv1,
            conv2,
            shortcut,
        })
    }

    pub fn has_projection(&self) -> bool {
        self.shortcut.is_some()
    }
}

impl ModuleT for ResidualBlock {
    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let main = self.conv1.forward_t(x, train)?;
        let main = self.conv2.forward_t(&main, train)?;
        let residual = match &self.shortcut {
            Some(proj) => proj.forward_t(x, train)?,
            None => x.clone(),
        };
        (main + residual)?.relu()
    }
}

// ── ResNet feature extractor ────────────────────────────────────────────────

/// Channel- and size-preserving feature extractor inserted after each
/// generator upsampling stage.
pub struct ResNet {
    narrow: ConvBlock,
    wide: ConvBlock,
    blocks: Vec<ResidualBlock>,
    out: ConvBlock,
}

impl ResNet {
    pub fn new(channels: usize, vb: VarBuilder) -> Result<Self> {
        let narrow = ConvBlock::new(
            channels,
            channels,
            ConvSpec::SAME_3X3,
            Some(Activation::Relu),
            vb.pp("narrow"),
        )?;
        let wide = ConvBlock::new(
            channels,
            RESNET_WIDE_CHANNELS,
            ConvSpec::SAME_3X3,
            Some(Activation::Relu),
            vb.pp("wide"),
        )?;

        let mut blocks = Vec::with_capacity(RESNET_BLOCK_WIDTHS.len());
        let mut width = channels;
        for (i, &next) in RESNET_BLOCK_WIDTHS.iter().enumerate() {
            blocks.push(ResidualBlock::new(width, next, vb.pp(format!("blk.{i}")))?);
            width = next;
        }

        let out = ConvBlock::new(
            RESNET_WIDE_CHANNELS,
            channels,
            ConvSpec::SAME_3X3,
            Some(Activation::Relu),
            vb.pp("out"),
        )?;
        Ok(Self {
            narrow,
            wide,
            blocks,
            out,
        })
    }
}

impl ModuleT for ResNet {
    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let mut a = self.narrow.forward_t(x, train)?;
        for block in &self.blocks {
            a = block.forward_t(&a, train)?;
        }
        let b = self.wide.forward_t(x, train)?;
        let merged = (a + b)?.relu()?;
        self.out.forward_t(&merged, train)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
