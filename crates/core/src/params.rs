//! Parameter helpers over a `VarMap`.
//!
//! A `VarMap` holds two kinds of vars: learned parameters and batch-norm
//! running statistics ("buffers"). Buffers are checkpointed with everything
//! else but are never clipped and never handed to an optimiser.

use candle_core::{Result, Var};
use candle_nn::VarMap;

const BUFFER_SUFFIXES: [&str; 2] = ["running_mean", "running_var"];

/// True for batch-norm running statistics.
pub fn is_buffer(name: &str) -> bool {
    BUFFER_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Every var in the map, sorted by name.
///
/// `VarMap` iteration order is unspecified; sorting gives optimiser state and
/// checkpoints a stable layout.
pub fn named_vars(varmap: &VarMap) -> Result<Vec<(String, Var)>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| candle_core::Error::msg(format!("varmap lock poisoned: {e}")))?;
    let mut out: Vec<(String, Var)> = data
        .iter()
        .map(|(name, var)| (name.clone(), var.clone()))
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Learned parameters only, sorted by name.
pub fn named_trainable_vars(varmap: &VarMap) -> Result<Vec<(String, Var)>> {
    Ok(named_vars(varmap)?
        .into_iter()
        .filter(|(name, _)| !is_buffer(name))
        .collect())
}

/// Clamp every var into `[-bound, bound]` in place (WGAN weight clipping).
pub fn clamp_vars(vars: &[Var], bound: f64) -> Result<()> {
    let bound = bound as f32;
    for var in vars {
        let clamped = var.as_tensor().clamp(-bound, bound)?;
        var.set(&clamped)?;
    }
    Ok(())
}

/// Largest absolute value across `vars` (0 for an empty slice).
pub fn max_abs(vars: &[Var]) -> Result<f32> {
    let mut max = 0f32;
    for var in vars {
        let m = var.as_tensor().abs()?.max_all()?.to_scalar::<f32>()?;
        max = max.max(m);
    }
    Ok(max)
}

/// Total scalar count across `vars`.
pub fn parameter_count(vars: &[Var]) -> usize {
    vars.iter().map(|v| v.as_tensor().elem_count()).sum()
}
