//! RMSprop with named, persistable state.
//!
//! ```text
//! v ← α·v + (1 − α)·g²
//! θ ← θ − lr · g / (√v + ε)
//! ```
//!
//! `candle-nn` ships SGD and AdamW only, and neither exposes its state. This
//! optimiser keys each `square_avg` by parameter name so a checkpoint can
//! restore it exactly.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::{Device, Result, Tensor, Var};
use candle_nn::Optimizer;

const STEP_KEY: &str = "step";

#[derive(Debug, Clone, Copy)]
pub struct ParamsRmsProp {
    pub lr: f64,
    pub alpha: f64,
    pub eps: f64,
}

impl Default for ParamsRmsProp {
    fn default() -> Self {
        Self {
            lr: 0.01,
            alpha: 0.99,
            eps: 1e-8,
        }
    }
}

#[derive(Debug)]
struct VarRmsProp {
    name: String,
    var: Var,
    square_avg: Var,
}

#[derive(Debug)]
pub struct RmsProp {
    vars: Vec<VarRmsProp>,
    step_t: usize,
    params: ParamsRmsProp,
}

impl RmsProp {
    /// Build over named parameters. Names key the persisted state.
    pub fn from_named(vars: Vec<(String, Var)>, params: ParamsRmsProp) -> Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|(_, var)| var.dtype().is_float())
            .map(|(name, var)| {
                let square_avg = Var::zeros(var.dims(), var.dtype(), var.device())?;
                Ok(VarRmsProp {
                    name,
                    var,
                    square_avg,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            vars,
            step_t: 0,
            params,
        })
    }

    /// Number of optimiser steps applied so far.
    pub fn step_count(&self) -> usize {
        self.step_t
    }

    pub fn params(&self) -> &ParamsRmsProp {
        &self.params
    }

    /// Snapshot of the optimiser state: `<name>.square_avg` per parameter plus
    /// `step`.
    pub fn state_tensors(&self) -> Result<HashMap<String, Tensor>> {
        let mut out = HashMap::with_capacity(self.vars.len() + 1);
        for v in &self.vars {
            out.insert(
                format!("{}.square_avg", v.name),
                v.square_avg.as_tensor().copy()?,
            );
        }
        out.insert(
            STEP_KEY.to_string(),
            Tensor::new(&[self.step_t as i64], &Device::Cpu)?,
        );
        Ok(out)
    }

    /// Restore state written by [`state_tensors`](Self::state_tensors). Every
    /// parameter must have an entry of matching shape.
    pub fn load_state(&mut self, tensors: &HashMap<String, Tensor>) -> Result<()> {
        for v in &self.vars {
            let key = format!("{}.square_avg", v.name);
            let t = tensors
                .get(&key)
                .ok_or_else(|| candle_core::Error::msg(format!("optimizer state missing {key}")))?;
            let t = t.to_device(v.var.device())?.to_dtype(v.var.dtype())?;
            v.square_avg.set(&t)?;
        }
        let step = tensors
            .get(STEP_KEY)
            .ok_or_else(|| candle_core::Error::msg("optimizer state missing step"))?
            .to_vec1::<i64>()?;
        self.step_t = step.first().copied().unwrap_or(0).max(0) as usize;
        Ok(())
    }
}

impl Optimizer for RmsProp {
    type Config = ParamsRmsProp;

    /// Unnamed construction: parameters are keyed by position.
    fn new(vars: Vec<Var>, params: ParamsRmsProp) -> Result<Self> {
        let named = vars
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect();
        Self::from_named(named, params)
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr;
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step_t += 1;
        let ParamsRmsProp { lr, alpha, eps } = self.params;
        for v in &self.vars {
            let theta = &v.var;
            if let Some(g) = grads.get(theta.as_tensor()) {
                let square_avg = v
                    .square_avg
                    .as_tensor()
                    .affine(alpha, 0.0)?
                    .add(&g.sqr()?.affine(1.0 - alpha, 0.0)?)?;
                let denom = square_avg.sqrt()?.affine(1.0, eps)?;
                let update = g.div(&denom)?.affine(lr, 0.0)?;
                theta.set(&theta.as_tensor().sub(&update)?)?;
                v.square_avg.set(&square_avg)?;
            }
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
