//! Image data pipeline: dataset loading, normalisation, batching.
//!
//! Images are held in memory as one `(N, C, H, W)` f32 tensor already scaled
//! to `[-1, 1]`, the range of the generator's `tanh` output. Labels are kept
//! only because the on-disk formats carry them; training ignores them.
//!
//! * **[`InMemoryDataset`]** — tensor-backed dataset, optional per-pass shuffle.
//! * **[`load_mnist_dir`]** — MNIST IDX files (`train-images-idx3-ubyte`, ...).
//! * **[`load_cifar10_dir`]** — CIFAR-10 binary batches (`data_batch_N.bin`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::{ImageShape, Variant};

// ── Dataset trait ───────────────────────────────────────────────────────────

/// Source of `(images, labels)` batches. One call to [`batches`](Self::batches)
/// is one pass (epoch) over the data.
pub trait ImageDataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shape(&self) -> ImageShape;

    fn batches(
        &self,
        batch_size: usize,
    ) -> Box<dyn Iterator<Item = Result<(Tensor, Tensor)>> + '_>;
}

// ── InMemoryDataset ─────────────────────────────────────────────────────────

/// Dataset backed by a single image tensor.
///
/// The last batch of a pass may be smaller than `batch_size`.
pub struct InMemoryDataset {
    images: Tensor,
    labels: Tensor,
    shape: ImageShape,
    shuffle: Option<Mutex<StdRng>>,
}

impl InMemoryDataset {
    /// `images` must be `(N, C, H, W)`; `labels` must be `(N,)`.
    pub fn new(images: Tensor, labels: Tensor) -> Result<Self> {
        let (n, c, h, w) = images.dims4().context("images must be (N, C, H, W)")?;
        let n_labels = labels.dims1().context("labels must be (N,)")?;
        anyhow::ensure!(
            n == n_labels,
            "image/label count mismatch: {n} images, {n_labels} labels"
        );
        Ok(Self {
            images: images.to_dtype(DType::F32)?,
            labels,
            shape: ImageShape::new(c, h, w),
            shuffle: None,
        })
    }

    /// Shuffle sample order at the start of every pass.
    pub fn with_shuffle(mut self, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        self.shuffle = Some(Mutex::new(rng));
        self
    }

    /// Build from raw `u8` pixels laid out `N × C × H × W`, scaling
    /// `[0, 255]` to `[-1, 1]`.
    pub fn from_u8(
        pixels: Vec<u8>,
        labels: Vec<u8>,
        shape: ImageShape,
        device: &Device,
    ) -> Result<Self> {
        let n = labels.len();
        let expected = n
            .checked_mul(shape.numel())
            .with_context(|| format!("{n} images of {shape:?} overflow the pixel count"))?;
        anyhow::ensure!(
            pixels.len() == expected,
            "pixel buffer has {} bytes, expected {expected} ({n} images of {shape:?})",
            pixels.len(),
        );
        let images = Tensor::from_vec(pixels, (n, shape.channels, shape.height, shape.width), device)?
            .to_dtype(DType::F32)?
            .affine(2.0 / 255.0, -1.0)?;
        let labels: Vec<u32> = labels.into_iter().map(u32::from).collect();
        let labels = Tensor::from_vec(labels, n, device)?;
        Self::new(images, labels)
    }

    pub fn images(&self) -> &Tensor {
        &self.images
    }

    fn pass_order(&self) -> Vec<u32> {
        let n = self.images.dims()[0];
        let mut order: Vec<u32> = (0..n as u32).collect();
        if let Some(rng) = &self.shuffle {
            order.shuffle(&mut *rng.lock());
        }
        order
    }
}

impl ImageDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.images.dims()[0]
    }

    fn shape(&self) -> ImageShape {
        self.shape
    }

    fn batches(
        &self,
        batch_size: usize,
    ) -> Box<dyn Iterator<Item = Result<(Tensor, Tensor)>> + '_> {
        let order = self.pass_order();
        let batch_size = batch_size.max(1);
        let device = self.images.device().clone();
        let mut start = 0usize;
        Box::new(std::iter::from_fn(move || {
            if start >= order.len() {
                return None;
            }
            let end = (start + batch_size).min(order.len());
            let chunk = &order[start..end];
            start = end;
            let batch = Tensor::new(chunk, &device).and_then(|idx| {
                Ok((
                    self.images.index_select(&idx, 0)?,
                    self.labels.index_select(&idx, 0)?,
                ))
            });
            Some(batch.map_err(anyhow::Error::from))
        }))
    }
}

// ── MNIST (IDX format) ──────────────────────────────────────────────────────

const IDX_IMAGES_MAGIC: u32 = 0x0000_0803;
const IDX_LABELS_MAGIC: u32 = 0x0000_0801;

const MNIST_TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const MNIST_TRAIN_LABELS: &str = "train-labels-idx1-ubyte";

/// Parse an IDX3 image file. Returns `(pixels, count, rows, cols)`.
///
/// Format: magic `0x00000803` (u32 BE), count, rows, cols (u32 BE each), then
/// `count × rows × cols` bytes.
pub fn parse_idx_images(bytes: &[u8]) -> Result<(Vec<u8>, usize, usize, usize)> {
    anyhow::ensure!(bytes.len() >= 16, "IDX image file too short");
    let magic = read_u32_be(bytes, 0);
    anyhow::ensure!(
        magic == IDX_IMAGES_MAGIC,
        "invalid IDX image file: bad magic {magic:#010x}"
    );
    let count = read_u32_be(bytes, 4) as usize;
    let rows = read_u32_be(bytes, 8) as usize;
    let cols = read_u32_be(bytes, 12) as usize;
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(count))
        .and_then(|n| n.checked_add(16))
        .with_context(|| {
            format!("invalid IDX image header: {count} × {rows} × {cols} overflows")
        })?;
    anyhow::ensure!(
        bytes.len() >= expected,
        "IDX image file truncated: expected {expected} bytes, got {}",
        bytes.len()
    );
    Ok((bytes[16..expected].to_vec(), count, rows, cols))
}

/// Parse an IDX1 label file.
pub fn parse_idx_labels(bytes: &[u8]) -> Result<Vec<u8>> {
    anyhow::ensure!(bytes.len() >= 8, "IDX label file too short");
    let magic = read_u32_be(bytes, 0);
    anyhow::ensure!(
        magic == IDX_LABELS_MAGIC,
        "invalid IDX label file: bad magic {magic:#010x}"
    );
    let count = read_u32_be(bytes, 4) as usize;
    anyhow::ensure!(
        bytes.len() >= 8 + count,
        "IDX label file truncated: expected {} bytes, got {}",
        8 + count,
        bytes.len()
    );
    Ok(bytes[8..8 + count].to_vec())
}

/// Load the MNIST training split from a directory of uncompressed IDX files.
pub fn load_mnist_dir(dir: &Path, device: &Device) -> Result<InMemoryDataset> {
    let images_path = dir.join(MNIST_TRAIN_IMAGES);
    let labels_path = dir.join(MNIST_TRAIN_LABELS);
    let image_bytes = std::fs::read(&images_path)
        .with_context(|| format!("read {}", images_path.display()))?;
    let label_bytes = std::fs::read(&labels_path)
        .with_context(|| format!("read {}", labels_path.display()))?;

    let (pixels, count, rows, cols) = parse_idx_images(&image_bytes)?;
    let labels = parse_idx_labels(&label_bytes)?;
    anyhow::ensure!(
        labels.len() == count,
        "MNIST image/label count mismatch: {count} vs {}",
        labels.len()
    );
    tracing::info!(images = count, rows, cols, "Loaded MNIST");
    InMemoryDataset::from_u8(pixels, labels, ImageShape::new(1, rows, cols), device)
}

// ── CIFAR-10 (binary batches) ───────────────────────────────────────────────

const CIFAR_SHAPE: ImageShape = ImageShape::new(3, 32, 32);
/// One label byte followed by 3072 channel-major pixel bytes.
const CIFAR_RECORD_LEN: usize = 1 + 3 * 32 * 32;

/// Split a CIFAR-10 binary batch into `(pixels, labels)`.
pub fn parse_cifar_batch(bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    anyhow::ensure!(
        !bytes.is_empty() && bytes.len() % CIFAR_RECORD_LEN == 0,
        "CIFAR batch length {} is not a multiple of {CIFAR_RECORD_LEN}",
        bytes.len()
    );
    let n = bytes.len() / CIFAR_RECORD_LEN;
    let mut pixels = Vec::with_capacity(n * (CIFAR_RECORD_LEN - 1));
    let mut labels = Vec::with_capacity(n);
    for record in bytes.chunks_exact(CIFAR_RECORD_LEN) {
        labels.push(record[0]);
        pixels.extend_from_slice(&record[1..]);
    }
    Ok((pixels, labels))
}

/// Load `data_batch_1.bin` … `data_batch_5.bin` from a directory. Missing
/// batches are skipped; at least one must exist.
pub fn load_cifar10_dir(dir: &Path, device: &Device) -> Result<InMemoryDataset> {
    let files: Vec<PathBuf> = (1..=5)
        .map(|i| dir.join(format!("data_batch_{i}.bin")))
        .filter(|p| p.is_file())
        .collect();
    anyhow::ensure!(
        !files.is_empty(),
        "no CIFAR-10 batches (data_batch_N.bin) in {}",
        dir.display()
    );

    let mut pixels = Vec::new();
    let mut labels = Vec::new();
    for path in &files {
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let (p, l) = parse_cifar_batch(&bytes)
            .with_context(|| format!("parse {}", path.display()))?;
        pixels.extend(p);
        labels.extend(l);
    }
    tracing::info!(images = labels.len(), batches = files.len(), "Loaded CIFAR-10");
    InMemoryDataset::from_u8(pixels, labels, CIFAR_SHAPE, device)
}

/// Load the training split for `variant` from `dir`.
pub fn load_dataset(variant: Variant, dir: &Path, device: &Device) -> Result<InMemoryDataset> {
    match variant {
        Variant::Mnist => load_mnist_dir(dir, device),
        Variant::Cifar => load_cifar10_dir(dir, device),
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

#[inline]
fn read_u32_be(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

// ── Tests ───────────────────────────────────────────────────────────────────
