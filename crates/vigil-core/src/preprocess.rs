//! Image → input tensor conversion.

use crate::engine::EngineError;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use serde::Deserialize;
use std::str::FromStr;

// Training-time normalization: (v - 128) / 128
const PIXEL_MEAN: f32 = 128.0;
const PIXEL_SCALE: f32 = 1.0 / 128.0;

/// Default square input edge for FaceNet-style graphs.
pub const DEFAULT_INPUT_SIZE: u32 = 160;

/// Memory layout of the graph's input tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// [batch, channel, height, width]
    #[default]
    Nchw,
    /// [batch, height, width, channel]
    Nhwc,
}

impl FromStr for TensorLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nchw" => Ok(TensorLayout::Nchw),
            "nhwc" => Ok(TensorLayout::Nhwc),
            other => Err(format!("unknown tensor layout: {other}")),
        }
    }
}

#[inline]
fn normalize(value: u8) -> f32 {
    (value as f32 - PIXEL_MEAN) * PIXEL_SCALE
}

/// Resize to `size`×`size` RGB and normalize into a single-batch tensor.
pub fn image_to_tensor(
    image: &DynamicImage,
    size: u32,
    layout: TensorLayout,
) -> Result<Array4<f32>, EngineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(EngineError::Inference(format!(
            "cannot resize a {}x{} image",
            image.width(),
            image.height()
        )));
    }
    if size == 0 {
        return Err(EngineError::Inference("graph input size is zero".into()));
    }

    let rgb = image
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();
    let s = size as usize;

    let mut tensor = match layout {
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, s, s)),
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, s, s, 3)),
    };

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let v = normalize(pixel[c]);
            match layout {
                TensorLayout::Nchw => tensor[[0, c, y, x]] = v,
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = v,
            }
        }
    }

    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(rgb)))
    }

    #[test]
    fn test_nchw_shape() {
        let tensor = image_to_tensor(&solid(32, 20, [0, 0, 0]), 16, TensorLayout::Nchw).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 16, 16]);
    }

    #[test]
    fn test_nhwc_shape() {
        let tensor = image_to_tensor(&solid(32, 20, [0, 0, 0]), 16, TensorLayout::Nhwc).unwrap();
        assert_eq!(tensor.shape(), &[1, 16, 16, 3]);
    }

    #[test]
    fn test_normalization_constants() {
        // 128 → 0.0, 0 → -1.0, 255 → 127/128
        let tensor = image_to_tensor(&solid(8, 8, [128, 0, 255]), 4, TensorLayout::Nchw).unwrap();
        assert!(tensor[[0, 0, 1, 1]].abs() < 1e-6);
        assert!((tensor[[0, 1, 1, 1]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 1, 1]] - 127.0 / 128.0).abs() < 1e-6);
    }

    #[test]
    fn test_channel_placement_nhwc() {
        let tensor = image_to_tensor(&solid(4, 4, [128, 0, 255]), 4, TensorLayout::Nhwc).unwrap();
        assert!(tensor[[0, 2, 3, 0]].abs() < 1e-6);
        assert!((tensor[[0, 2, 3, 1]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_size_image_rejected() {
        let empty = DynamicImage::new_rgb8(0, 0);
        let err = image_to_tensor(&empty, 16, TensorLayout::Nchw).unwrap_err();
        assert!(matches!(err, EngineError::Inference(_)));
    }

    #[test]
    fn test_grayscale_expanded_to_rgb() {
        let gray = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(6, 6, image::Luma([192])));
        let tensor = image_to_tensor(&gray, 6, TensorLayout::Nchw).unwrap();
        let expected = (192.0 - 128.0) / 128.0;
        for c in 0..3 {
            assert!((tensor[[0, c, 2, 2]] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_layout_parse() {
        assert_eq!("NHWC".parse::<TensorLayout>().unwrap(), TensorLayout::Nhwc);
        assert!("chw".parse::<TensorLayout>().is_err());
    }
}
