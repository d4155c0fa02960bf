//! Critic: image `(N, C, H, W)` → one unbounded realness score per sample.
//!
//! No sigmoid: a Wasserstein critic is a 1-Lipschitz scoring function, not a
//! classifier. The Lipschitz bound is approximated by clipping its weights in
//! the trainer.

use candle_core::{Result, Tensor};
use candle_nn::{Conv2d, Module, ModuleT, VarBuilder};

use wgan_common::{Variant, WganConfig};

use crate::activation::{Activation, CRITIC_LEAKY_SLOPE};
use crate::blocks::{output_conv, ConvBlock, ConvSpec};

/// `(out_channels, conv geometry)` of each downsampling stage, per variant.
///
/// MNIST: 28 → 14 → 7 → 4 (3x3 last stage). CIFAR: 32 → 16 → 8 → 4.
fn stage_specs(variant: Variant) -> [(usize, ConvSpec); 3] {
    match variant {
        Variant::Mnist => [
            (64, ConvSpec::RESAMPLE),
            (256, ConvSpec::RESAMPLE),
            (512, ConvSpec::new(3, 2, 1)),
        ],
        Variant::Cifar => [
            (64, ConvSpec::RESAMPLE),
            (256, ConvSpec::RESAMPLE),
            (512, ConvSpec::RESAMPLE),
        ],
    }
}

pub struct Critic {
    stages: Vec<ConvBlock>,
    /// 4 × 4 → 1 × 1, one channel.
    score: Conv2d,
}

impl Critic {
    pub fn new(vb: VarBuilder, config: &WganConfig) -> Result<Self> {
        let activation = match config.variant {
            Variant::Mnist => Activation::LeakyRelu(CRITIC_LEAKY_SLOPE),
            Variant::Cifar => Activation::Relu,
        };

        let mut stages = Vec::with_capacity(3);
        let mut width = config.image_shape().channels;
        for (i, (next, spec)) in stage_specs(config.variant).into_iter().enumerate() {
            stages.push(ConvBlock::new(
                width,
                next,
                spec,
                Some(activation),
                vb.pp(format!("down.{i}")),
            )?);
            width = next;
        }
        let score = output_conv(width, 1, ConvSpec::new(4, 1, 0), vb.pp("score"))?;
        Ok(Self { stages, score })
    }
}

impl ModuleT for Critic {
    /// Returns shape `(N,)`.
    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let mut h = x.clone();
        for stage in &self.stages {
            h = stage.forward_t(&h, train)?;
        }
        self.score.forward(&h)?.flatten_all()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn build(config: &WganConfig) -> (VarMap, Critic) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let critic = Critic::new(vb, config).unwrap();
        (varmap, critic)
    }

    #[test]
    fn mnist_one_score_per_sample() {
        let (_vm, critic) = build(&WganConfig::mnist());
        let x = Tensor::rand(-1f32, 1f32, (5, 1, 28, 28), &Device::Cpu).unwrap();
        assert_eq!(critic.forward_t(&x, true).unwrap().dims(), &[5]);
    }

    #[test]
    fn cifar_one_score_per_sample() {
        let (_vm, critic) = build(&WganConfig::cifar());
        let x = Tensor::rand(-1f32, 1f32, (3, 3, 32, 32), &Device::Cpu).unwrap();
        assert_eq!(critic.forward_t(&x, true).unwrap().dims(), &[3]);
    }

    #[test]
    fn scores_are_not_squashed() {
        let (varmap, critic) = build(&WganConfig::cifar());
        // Inflate the scoring bias: an unbounded critic passes it straight through.
        {
            let data = varmap.data().lock().unwrap();
            let bias = data.get("score.bias").unwrap();
            bias.set(&Tensor::new(&[50f32], &Device::Cpu).unwrap()).unwrap();
        }
        let x = Tensor::zeros((2, 3, 32, 32), DType::F32, &Device::Cpu).unwrap();
        let scores: Vec<f32> = critic.forward_t(&x, false).unwrap().to_vec1().unwrap();
        assert!(scores.iter().all(|s| *s > 1.0), "scores look bounded: {scores:?}");
    }
}
