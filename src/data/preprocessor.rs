// ============================================================
// Layer 4 — Image Preprocessor
// ============================================================
// Turns a decoded RGB face crop into the normalised CHW float
// buffer the network expects.
//
// Steps (applied in order):
//   1. Scale:       resize so the SHORTER side equals scale_size,
//                   keeping the aspect ratio
//   2. Random crop: cut a crop_size × crop_size window at a
//                   random offset (data augmentation)
//   3. To tensor:   bytes 0..=255 → floats 0.0..=1.0
//   4. Normalise:   (x - mean) / std per channel, using the
//                   ImageNet statistics the backbone was trained on
//
// Output layout is channel-major: all R values, then all G,
// then all B — the [3, H, W] layout Burn's Conv2d consumes.

use anyhow::{ensure, Result};
use image::{imageops::{self, FilterType}, RgbImage};
use rand::Rng;

/// ImageNet per-channel mean (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet per-channel standard deviation (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone)]
pub struct Preprocessor {
    scale_size: u32,
    crop_size:  u32,
    mean:       [f32; 3],
    std:        [f32; 3],
}

impl Preprocessor {
    /// Create a preprocessor. The crop must fit inside the scaled image.
    pub fn new(scale_size: u32, crop_size: u32) -> Result<Self> {
        ensure!(crop_size > 0, "crop size must be positive");
        ensure!(
            scale_size >= crop_size,
            "scale size {} is smaller than crop size {}",
            scale_size, crop_size
        );
        Ok(Self {
            scale_size,
            crop_size,
            mean: IMAGENET_MEAN,
            std:  IMAGENET_STD,
        })
    }

    /// Side length of the square images this preprocessor produces
    pub fn output_size(&self) -> usize {
        self.crop_size as usize
    }

    /// Full pipeline: scale → random crop → normalised CHW floats
    pub fn process<R: Rng>(&self, img: &RgbImage, rng: &mut R) -> Vec<f32> {
        let scaled  = self.scale(img);
        let cropped = self.random_crop(&scaled, rng);
        self.to_normalized_chw(&cropped)
    }

    /// Resize so the shorter side equals scale_size.
    pub fn scale(&self, img: &RgbImage) -> RgbImage {
        let (w, h) = img.dimensions();
        let s = self.scale_size;
        if w.min(h) == s {
            return img.clone();
        }
        // Same integer rounding as torchvision's Resize(int)
        let (nw, nh) = if w <= h {
            (s, ((s as u64 * h as u64) / w as u64) as u32)
        } else {
            (((s as u64 * w as u64) / h as u64) as u32, s)
        };
        imageops::resize(img, nw, nh, FilterType::Triangle)
    }

    /// Cut a crop_size square at a uniformly random offset.
    pub fn random_crop<R: Rng>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let (w, h) = img.dimensions();
        let c = self.crop_size;
        // scale() guarantees both sides ≥ scale_size ≥ crop_size
        let x = if w > c { rng.gen_range(0..=w - c) } else { 0 };
        let y = if h > c { rng.gen_range(0..=h - c) } else { 0 };
        imageops::crop_imm(img, x, y, c.min(w), c.min(h)).to_image()
    }

    /// Bytes → [0, 1] → normalised, in [3, H, W] order.
    pub fn to_normalized_chw(&self, img: &RgbImage) -> Vec<f32> {
        let (w, h) = img.dimensions();
        let plane  = (w * h) as usize;
        let mut out = vec![0.0f32; 3 * plane];

        for (i, px) in img.pixels().enumerate() {
            for c in 0..3 {
                let v = px.0[c] as f32 / 255.0;
                out[c * plane + i] = (v - self.mean[c]) / self.std[c];
            }
        }
        out
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_scale_keeps_aspect_ratio() {
        let prep = Preprocessor::new(32, 32).unwrap();
        let img  = RgbImage::new(64, 128);
        let out  = prep.scale(&img);
        assert_eq!(out.dimensions(), (32, 64));

        let wide = RgbImage::new(90, 45);
        assert_eq!(prep.scale(&wide).dimensions(), (64, 32));
    }

    #[test]
    fn test_process_output_length() {
        let prep = Preprocessor::new(40, 32).unwrap();
        let img  = RgbImage::from_pixel(50, 70, Rgb([10, 20, 30]));
        let mut rng = StdRng::seed_from_u64(7);
        let out  = prep.process(&img, &mut rng);
        assert_eq!(out.len(), 3 * 32 * 32);
    }

    #[test]
    fn test_normalisation_is_channel_major() {
        let prep = Preprocessor::new(2, 2).unwrap();
        let img  = RgbImage::from_pixel(2, 2, Rgb([255, 0, 255]));
        let out  = prep.to_normalized_chw(&img);

        let r = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let g = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!(out[..4].iter().all(|v| (v - r).abs() < 1e-6));
        assert!(out[4..8].iter().all(|v| (v - g).abs() < 1e-6));
    }

    #[test]
    fn test_crop_larger_than_scale_is_rejected() {
        assert!(Preprocessor::new(200, 224).is_err());
    }
}
