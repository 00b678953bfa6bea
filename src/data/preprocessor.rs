// ============================================================
// Layer 4 — Image Preprocessor
// ============================================================
// Turns decoded RGB images into model inputs and label maps.
//
// Image path:
//   1. resize to (height, width) with bilinear filtering
//   2. scale bytes to [0, 1] (max pixel value 255)
//   3. normalise per channel: (x - mean) / std
//   4. lay out channel-first (CHW)
//
// Mask path:
//   1. resize with nearest-neighbour (class ids must not blend)
//   2. keep the red channel; its byte value is the class id
//
// `inverse_normalize` undoes the image path for visualization.
//
// Reference: image crate `imageops::resize`

use image::{imageops::FilterType, RgbImage};

/// ImageNet channel means (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

const MAX_PIXEL_VALUE: f32 = 255.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessor {
    pub height: usize,
    pub width:  usize,
    pub mean:   [f32; 3],
    pub std:    [f32; 3],
}

impl Preprocessor {
    /// ImageNet-normalising preprocessor for `[height, width]`.
    pub fn new(image_size: [usize; 2]) -> Self {
        Self {
            height: image_size[0],
            width:  image_size[1],
            mean:   IMAGENET_MEAN,
            std:    IMAGENET_STD,
        }
    }

    /// Resize + normalise an RGB image into a CHW float vector.
    pub fn image_to_input(&self, img: &RgbImage) -> Vec<f32> {
        let img = self.resize(img, FilterType::Triangle);
        let plane = self.height * self.width;
        let mut out = vec![0.0f32; 3 * plane];

        for (x, y, px) in img.enumerate_pixels() {
            let offset = y as usize * self.width + x as usize;
            for c in 0..3 {
                out[c * plane + offset] = self.normalize(px[c], c);
            }
        }
        out
    }

    /// Resize a mask image and read class ids from its red channel.
    pub fn mask_to_labels(&self, mask: &RgbImage) -> Vec<i64> {
        let mask = self.resize(mask, FilterType::Nearest);
        mask.pixels().map(|px| px[0] as i64).collect()
    }

    pub fn normalize(&self, byte: u8, channel: usize) -> f32 {
        (byte as f32 / MAX_PIXEL_VALUE - self.mean[channel]) / self.std[channel]
    }

    fn resize(&self, img: &RgbImage, filter: FilterType) -> RgbImage {
        let (w, h) = (self.width as u32, self.height as u32);
        if img.width() == w && img.height() == h {
            img.clone()
        } else {
            image::imageops::resize(img, w, h, filter)
        }
    }
}

/// Undo normalisation of a CHW tensor slice, returning interleaved RGB bytes.
pub fn inverse_normalize(chw: &[f32], height: usize, width: usize, mean: [f32; 3], std: [f32; 3]) -> Vec<u8> {
    let plane = height * width;
    let mut out = Vec::with_capacity(plane * 3);
    for i in 0..plane {
        for c in 0..3 {
            let v = chw.get(c * plane + i).copied().unwrap_or(0.0);
            let x = (v * std[c] + mean[c]) * MAX_PIXEL_VALUE;
            out.push(x.round().clamp(0.0, 255.0) as u8);
        }
    }
    out
}
