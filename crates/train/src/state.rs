//! Mutable training progress, passed explicitly into each training phase.

/// Epoch counter and loss histories. Histories are append-only and only used
/// for diagnostics; they never drive control flow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingState {
    pub epoch: usize,
    /// One entry per generator update.
    pub generator_losses: Vec<f32>,
    /// One entry per critic update: `-mean(critic(real))`.
    pub real_losses: Vec<f32>,
    /// One entry per critic update: `mean(critic(fake))`.
    pub fake_losses: Vec<f32>,
}

impl TrainingState {
    /// Most recent Wasserstein estimate, `-(real_loss + fake_loss)`.
    pub fn last_wasserstein_estimate(&self) -> Option<f32> {
        match (self.real_losses.last(), self.fake_losses.last()) {
            (Some(r), Some(f)) => Some(-(r + f)),
            _ => None,
        }
    }
}

/// Losses of the last critic and generator updates of one batch.
#[derive(Debug, Clone, Copy)]
pub struct StepMetrics {
    pub epoch: usize,
    pub g_loss: f32,
    pub real_loss: f32,
    pub fake_loss: f32,
}
