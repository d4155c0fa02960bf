//! A network bundled with its parameters and optimiser.

use candle_core::backprop::GradStore;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{ModuleT, Optimizer, VarBuilder, VarMap};

use wgan_core::{clamp_vars, named_trainable_vars, parameter_count};

use crate::optim::{ParamsRmsProp, RmsProp};

/// Owns a model, the `VarMap` holding its parameters, and the RMSprop
/// instance that is the only thing allowed to update them.
pub struct Network<M> {
    model: M,
    varmap: VarMap,
    /// Trainable vars (buffers excluded), sorted by name.
    vars: Vec<Var>,
    optimizer: RmsProp,
}

impl<M: ModuleT> Network<M> {
    pub fn new<F>(build: F, params: ParamsRmsProp, device: &Device) -> anyhow::Result<Self>
    where
        F: FnOnce(VarBuilder) -> candle_core::Result<M>,
    {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = build(vb)?;
        let named = named_trainable_vars(&varmap)?;
        let vars = named.iter().map(|(_, v)| v.clone()).collect();
        let optimizer = RmsProp::from_named(named, params)?;
        Ok(Self {
            model,
            varmap,
            vars,
            optimizer,
        })
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        self.model.forward_t(x, train)
    }

    /// One optimiser step over this network's parameters. Gradients for vars
    /// of other networks in `grads` are ignored.
    pub fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        self.optimizer.step(grads)
    }

    /// Clamp every trainable parameter into `[-bound, bound]`.
    pub fn clamp(&self, bound: f64) -> candle_core::Result<()> {
        clamp_vars(&self.vars, bound)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    pub fn optimizer(&self) -> &RmsProp {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut RmsProp {
        &mut self.optimizer
    }

    pub fn parameter_count(&self) -> usize {
        parameter_count(&self.vars)
    }
}
