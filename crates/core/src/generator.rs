//! Generator: latent `(N, latent_dim, 1, 1)` → image `(N, C, H, W)` in [-1, 1].
//!
//! Spatial sizes per stage:
//!
//! | Variant | 1 | 2 | 3 | 4 | out |
//! |---------|---|---|---|---|-----|
//! | MNIST   | 2 | 4 | 8 | 14 (padding 2) | 28 |
//! | CIFAR   | 2 | 4 | 8 | 16 | 32 |
//!
//! The CIFAR generator runs a [`ResNet`] after each of the four stages.

use candle_core::{Result, Tensor};
use candle_nn::{ConvTranspose2d, Module, ModuleT, VarBuilder};

use wgan_common::{Variant, WganConfig};

use crate::activation::Activation;
use crate::blocks::{output_conv_transpose, ConvSpec, UpBlock};
use crate::residual::ResNet;

/// Output widths of the four upsampling stages.
const STAGE_WIDTHS: [usize; 4] = [1024, 512, 256, 64];

/// One upsampling stage, optionally followed by a ResNet feature extractor.
struct Stage {
    up: UpBlock,
    features: Option<ResNet>,
}

impl Stage {
    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.up.forward_t(x, train)?;
        match &self.features {
            Some(resnet) => resnet.forward_t(&x, train),
            None => Ok(x),
        }
    }
}

pub struct Generator {
    stages: Vec<Stage>,
    out: ConvTranspose2d,
    latent_dim: usize,
}

impl Generator {
    pub fn new(vb: VarBuilder, config: &WganConfig) -> Result<Self> {
        let shape = config.image_shape();
        let with_resnet = config.variant == Variant::Cifar;

        let mut stages = Vec::with_capacity(STAGE_WIDTHS.len());
        let mut width = config.latent_dim;
        for (i, &next) in STAGE_WIDTHS.iter().enumerate() {
            // 8 → 14 instead of 8 → 16 so the output lands on 28 × 28.
            let spec = if config.variant == Variant::Mnist && i == STAGE_WIDTHS.len() - 1 {
                ConvSpec::new(4, 2, 2)
            } else {
                ConvSpec::RESAMPLE
            };
            let up = UpBlock::new(width, next, spec, vb.pp(format!("up.{i}")))?;
            let features = if with_resnet {
                Some(ResNet::new(next, vb.pp(format!("res.{i}")))?)
            } else {
                None
            };
            stages.push(Stage { up, features });
            width = next;
        }

        let out = output_conv_transpose(width, shape.channels, ConvSpec::RESAMPLE, vb.pp("out"))?;
        Ok(Self {
            stages,
            out,
            latent_dim: config.latent_dim,
        })
    }

    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }
}

impl ModuleT for Generator {
    fn forward_t(&self, z: &Tensor, train: bool) -> Result<Tensor> {
        let mut x = z.clone();
        for stage in &self.stages {
            x = stage.forward_t(&x, train)?;
        }
        Activation::Tanh.apply(&self.out.forward(&x)?)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn check_output(config: &WganConfig, n: usize) {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let generator = Generator::new(vb, config).unwrap();
        let z = Tensor::randn(0f32, 1f32, (n, config.latent_dim, 1, 1), &dev).unwrap();
        let img = generator.forward_t(&z, true).unwrap();

        let shape = config.image_shape();
        assert_eq!(img.dims(), &[n, shape.channels, shape.height, shape.width]);
        let max_abs = img.abs().unwrap().max_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(max_abs <= 1.0, "tanh output out of range: {max_abs}");
    }

    #[test]
    fn mnist_output_shape_and_range() {
        check_output(&WganConfig::mnist(), 3);
    }

    #[test]
    fn cifar_output_shape_and_range() {
        check_output(&WganConfig::cifar(), 2);
    }

    #[test]
    fn mnist_has_no_resnet_params() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _g = Generator::new(vb, &WganConfig::mnist()).unwrap();
        let data = varmap.data().lock().unwrap();
        assert!(data.keys().all(|k| !k.starts_with("res.")));
        assert!(data.contains_key("up.3.conv.weight"));
        assert!(data.contains_key("out.weight"));
    }

    #[test]
    fn eval_mode_uses_running_stats() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let generator = Generator::new(vb, &WganConfig::mnist()).unwrap();
        // A single latent works in eval mode: no batch statistics needed.
        let z = Tensor::randn(0f32, 1f32, (1, 100, 1, 1), &dev).unwrap();
        assert_eq!(generator.forward_t(&z, false).unwrap().dims(), &[1, 1, 28, 28]);
    }
}
