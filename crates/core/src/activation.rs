//! Pointwise activations used between convolution stages.
//!
//! | Activation | Formula | Used by |
//! |------------|---------|---------|
//! | ReLU       | max(0, x) | generator stages, CIFAR critic, residual blocks |
//! | LeakyReLU  | max(x, s·x) | MNIST critic (s = 0.2) |
//! | Tanh       | tanh(x) | generator output, bounds images to [-1, 1] |

use candle_core::{Result, Tensor};

/// Slope of the negative half of the MNIST critic's LeakyReLU.
pub const CRITIC_LEAKY_SLOPE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Relu,
    LeakyRelu(f64),
    Tanh,
}

impl Activation {
    pub fn apply(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Relu => x.relu(),
            Self::LeakyRelu(slope) => candle_nn::ops::leaky_relu(x, *slope),
            Self::Tanh => x.tanh(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn leaky_relu_keeps_scaled_negatives() {
        let x = Tensor::new(&[-1.0f32, 0.0, 2.0], &Device::Cpu).unwrap();
        let y: Vec<f32> = Activation::LeakyRelu(0.2)
            .apply(&x)
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!((y[0] + 0.2).abs() < 1e-6);
        assert_eq!(y[1], 0.0);
        assert_eq!(y[2], 2.0);
    }

    #[test]
    fn tanh_is_bounded() {
        let x = Tensor::new(&[-50.0f32, 50.0], &Device::Cpu).unwrap();
        let y: Vec<f32> = Activation::Tanh.apply(&x).unwrap().to_vec1().unwrap();
        assert!(y.iter().all(|v| v.abs() <= 1.0));
    }
}
