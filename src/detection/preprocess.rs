// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 预处理: JPEG字节 → 解码 → 拉伸到 N×N → /255 → CHW

use anyhow::{bail, Context, Result};
use fast_image_resize as fr;
use ndarray::Array4;

use super::types::{InputTensor, INPUT_SIZE};

pub struct Preprocessor {
    side: u32,
    resizer: fr::Resizer,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(INPUT_SIZE)
    }
}

impl Preprocessor {
    pub fn new(side: u32) -> Self {
        Self {
            side,
            resizer: fr::Resizer::new(),
        }
    }

    pub fn side(&self) -> u32 {
        self.side
    }

    /// 输出长度固定为 3·N·N, 不保持宽高比
    pub fn preprocess(&mut self, encoded: &[u8]) -> Result<InputTensor> {
        let img = image::load_from_memory(encoded).context("图像解码失败")?;
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            bail!("空图像: {}x{}", width, height);
        }

        let src = fr::images::Image::from_vec_u8(width, height, rgb.into_raw(), fr::PixelType::U8x3)
            .context("源图像缓冲无效")?;
        let mut dst = fr::images::Image::new(self.side, self.side, fr::PixelType::U8x3);
        self.resizer
            .resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new()
                    .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
            )
            .context("缩放失败")?;

        Ok(InputTensor {
            data: hwc_to_chw(dst.buffer(), self.side as usize),
            side: self.side,
            original_width: width,
            original_height: height,
        })
    }
}

/// RGBRGB... → RRR..GGG..BBB.., 同时归一化
fn hwc_to_chw(pixels: &[u8], side: usize) -> Vec<f32> {
    let plane = side * side;
    let mut data = vec![0f32; 3 * plane];
    for (i, px) in pixels.chunks_exact(3).take(plane).enumerate() {
        data[i] = px[0] as f32 / 255.0;
        data[plane + i] = px[1] as f32 / 255.0;
        data[2 * plane + i] = px[2] as f32 / 255.0;
    }
    data
}

impl InputTensor {
    /// [1, 3, N, N]
    pub fn into_array(self) -> Result<Array4<f32>> {
        let side = self.side as usize;
        Array4::from_shape_vec((1, 3, side, side), self.data).context("输入张量形状不匹配")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_hwc_to_chw_layout() {
        // 2x2: 每个像素 (r,g,b) = (i, 10+i, 20+i)
        let pixels: Vec<u8> = (0..4u8).flat_map(|i| [i, 10 + i, 20 + i]).collect();
        let chw = hwc_to_chw(&pixels, 2);
        let expected: Vec<f32> = [0u8, 1, 2, 3, 10, 11, 12, 13, 20, 21, 22, 23]
            .iter()
            .map(|&v| v as f32 / 255.0)
            .collect();
        assert_eq!(chw, expected);
    }

    #[test]
    fn test_preprocess_uniform_image() {
        let img = RgbImage::from_pixel(37, 21, Rgb([255, 0, 51]));
        let mut pre = Preprocessor::new(16);
        let t = pre.preprocess(&encode_png(&img)).unwrap();

        assert_eq!(t.data.len(), 3 * 16 * 16);
        assert_eq!((t.original_width, t.original_height), (37, 21));
        let plane = 16 * 16;
        assert!(t.data[..plane].iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(t.data[plane..2 * plane].iter().all(|&v| v.abs() < 1e-6));
        assert!(t.data[2 * plane..]
            .iter()
            .all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_preprocess_rejects_garbage() {
        let mut pre = Preprocessor::new(16);
        assert!(pre.preprocess(&[0xFF, 0xD8, 0x00, 0xFF, 0xD9]).is_err());
    }

    #[test]
    fn test_into_array_shape() {
        let img = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        let mut pre = Preprocessor::new(8);
        let arr = pre.preprocess(&encode_png(&img)).unwrap().into_array().unwrap();
        assert_eq!(arr.shape(), &[1, 3, 8, 8]);
    }
}
