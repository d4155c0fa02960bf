//! # wgan-train — Training Loop
//!
//! Everything that moves the weights:
//!
//! * **[`Trainer`]** — owns generator, critic and both optimisers. One call
//!   to [`Trainer::train_batch`] runs the critic updates with weight clipping
//!   and then one generator update.
//! * **[`RmsProp`]** — RMSprop whose state can be saved and restored.
//! * **[`CheckpointStore`]** — the `generator` / `critic` safetensors pair.
//! * **[`make_grid`]** / **[`sample_grid`]** — generator samples as a PNG.

pub mod checkpoint;
pub mod evaluator;
pub mod network;
pub mod optim;
pub mod state;
pub mod trainer;

pub use checkpoint::{CheckpointStore, LoadResult};
pub use evaluator::{make_grid, sample_grid, sample_latent, GridImage};
pub use network::Network;
pub use optim::{ParamsRmsProp, RmsProp};
pub use state::{StepMetrics, TrainingState};
pub use trainer::{OutputDirs, Trainer};
