//! Sample grids: generator output → one PNG.

use std::path::Path;

use anyhow::{bail, Context};
use candle_core::{DType, Device, Tensor};
use candle_nn::ModuleT;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use wgan_core::Generator;

/// Images per grid row.
pub const GRID_ROW: usize = 8;
/// Gap between tiles and around the border, in pixels.
pub const GRID_PADDING: usize = 2;

/// An 8-bit image with interleaved channels (1 = grayscale, 3 = RGB).
#[derive(Debug, Clone, PartialEq)]
pub struct GridImage {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl GridImage {
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let color = match self.channels {
            1 => image::ColorType::L8,
            3 => image::ColorType::Rgb8,
            c => bail!("cannot encode {c}-channel image"),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        image::save_buffer(path, &self.data, self.width, self.height, color)
            .with_context(|| format!("writing {}", path.display()))
    }

    /// Pixel at `(x, y)`, one byte per channel.
    pub fn pixel(&self, x: usize, y: usize) -> &[u8] {
        let start = (y * self.width as usize + x) * self.channels;
        &self.data[start..start + self.channels]
    }
}

/// Map a value in [-1, 1] to a byte, rounding to nearest.
fn to_byte(v: f32) -> u8 {
    ((v + 1.0) * 127.5 + 0.5).clamp(0.0, 255.0) as u8
}

/// Tile `(N, C, H, W)` images in [-1, 1] into one grid, up to [`GRID_ROW`]
/// per row with [`GRID_PADDING`] pixels of black between tiles. A single
/// image is returned without padding.
pub fn make_grid(images: &Tensor) -> anyhow::Result<GridImage> {
    let (n, c, h, w) = images.dims4()?;
    if n == 0 {
        bail!("make_grid: no images");
    }
    let values = images
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;

    let (cols, rows, pad) = if n == 1 {
        (1, 1, 0)
    } else {
        let cols = n.min(GRID_ROW);
        (cols, n.div_ceil(cols), GRID_PADDING)
    };
    let width = cols * (w + pad) + pad;
    let height = rows * (h + pad) + pad;
    let mut data = vec![0u8; width * height * c];

    for idx in 0..n {
        let x0 = pad + (idx % cols) * (w + pad);
        let y0 = pad + (idx / cols) * (h + pad);
        for ch in 0..c {
            let plane = &values[(idx * c + ch) * h * w..(idx * c + ch + 1) * h * w];
            for y in 0..h {
                for x in 0..w {
                    data[((y0 + y) * width + x0 + x) * c + ch] = to_byte(plane[y * w + x]);
                }
            }
        }
    }

    Ok(GridImage {
        width: width as u32,
        height: height as u32,
        channels: c,
        data,
    })
}

/// Draw `n` latent vectors of shape `(n, latent_dim, 1, 1)` from N(0, 1).
///
/// Sampled on the host so that a seeded `rng` gives the same latents on
/// every device.
pub fn sample_latent(
    n: usize,
    latent_dim: usize,
    rng: &mut StdRng,
    device: &Device,
) -> candle_core::Result<Tensor> {
    let values: Vec<f32> = (0..n * latent_dim)
        .map(|_| rng.sample::<f32, _>(StandardNormal))
        .collect();
    Tensor::from_vec(values, (n, latent_dim, 1, 1), device)
}

/// Generate `n` images in inference mode and tile them.
pub fn sample_grid(
    generator: &Generator,
    n: usize,
    rng: &mut StdRng,
    device: &Device,
) -> anyhow::Result<GridImage> {
    let z = sample_latent(n, generator.latent_dim(), rng, device)?;
    let images = generator.forward_t(&z, false)?;
    make_grid(&images)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::{VarBuilder, VarMap};
    use rand::SeedableRng;
    use tempfile::TempDir;
    use wgan_common::WganConfig;

    #[test]
    fn byte_mapping() {
        assert_eq!(to_byte(-1.0), 0);
        assert_eq!(to_byte(0.0), 128);
        assert_eq!(to_byte(1.0), 255);
        assert_eq!(to_byte(3.0), 255);
        assert_eq!(to_byte(-3.0), 0);
    }

    #[test]
    fn single_image_is_unpadded() {
        let img = Tensor::ones((1, 1, 28, 28), DType::F32, &Device::Cpu).unwrap();
        let grid = make_grid(&img).unwrap();
        assert_eq!((grid.width, grid.height, grid.channels), (28, 28, 1));
        assert!(grid.data.iter().all(|&b| b == 255));
    }

    #[test]
    fn grid_layout_wraps_after_eight() {
        let img = Tensor::ones((10, 3, 2, 2), DType::F32, &Device::Cpu).unwrap();
        let grid = make_grid(&img).unwrap();
        // 8 columns × (2 + 2) + 2, 2 rows × (2 + 2) + 2
        assert_eq!((grid.width, grid.height, grid.channels), (34, 10, 3));
        assert_eq!(grid.data.len(), 34 * 10 * 3);

        assert_eq!(grid.pixel(0, 0), &[0, 0, 0]);
        assert_eq!(grid.pixel(2, 2), &[255, 255, 255]);
        // Gap between first and second tile.
        assert_eq!(grid.pixel(4, 2), &[0, 0, 0]);
        assert_eq!(grid.pixel(6, 2), &[255, 255, 255]);
        // Second row holds two tiles, the rest stays black.
        assert_eq!(grid.pixel(6, 6), &[255, 255, 255]);
        assert_eq!(grid.pixel(10, 6), &[0, 0, 0]);
    }

    #[test]
    fn channel_order_is_preserved() {
        // One RGB pixel: r = -1, g = 0, b = 1.
        let img = Tensor::new(&[-1f32, 0.0, 1.0], &Device::Cpu)
            .unwrap()
            .reshape((1, 3, 1, 1))
            .unwrap();
        let grid = make_grid(&img).unwrap();
        assert_eq!(grid.pixel(0, 0), &[0, 128, 255]);
    }

    #[test]
    fn saves_png() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("grid.png");
        let img = Tensor::rand(-1f32, 1f32, (3, 1, 5, 5), &Device::Cpu).unwrap();
        make_grid(&img).unwrap().save(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn seeded_latents_repeat() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        let za = sample_latent(2, 100, &mut a, &Device::Cpu).unwrap();
        let zb = sample_latent(2, 100, &mut b, &Device::Cpu).unwrap();
        assert_eq!(za.dims(), &[2, 100, 1, 1]);
        let va: Vec<f32> = za.flatten_all().unwrap().to_vec1().unwrap();
        let vb: Vec<f32> = zb.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(va, vb);
    }

    #[test]
    fn sample_grid_from_generator() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let generator = Generator::new(vb, &WganConfig::mnist()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let grid = sample_grid(&generator, 2, &mut rng, &Device::Cpu).unwrap();
        assert_eq!((grid.width, grid.height, grid.channels), (62, 32, 1));
    }
}
