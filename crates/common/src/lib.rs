//! # wgan-common — Shared Primitives
//!
//! Types and utilities shared across every crate in the workspace:
//!
//! * **[`WganConfig`]** — training hyper-parameters (serialised as JSON).
//! * **[`Variant`]** / **[`ImageShape`]** — which dataset and image geometry.
//! * **[`ImageDataset`]** / **[`InMemoryDataset`]** — data loading & batching.

pub mod config;
pub mod data;

pub use config::{ImageShape, Variant, WganConfig};
pub use data::{
    load_cifar10_dir, load_dataset, load_mnist_dir, ImageDataset, InMemoryDataset,
};
