//! 图像张量与文件的互转。
//!
//! 引擎内部以`[H, W, 3]`的u8数组和`image::RgbImage`两种形态流转图像，
//! 本模块提供二者互转及PNG读写的薄封装。

use std::path::Path;

use image::{Rgb, RgbImage};
use ndarray::Array3;

use crate::errors::StoreError;


pub struct Vision {
    // ...
}

impl Vision {
    /// `[H, W, 3]`的u8数组 → RGB图像
    pub fn to_rgb(array: &Array3<u8>) -> RgbImage {
        let (h, w, _) = array.dim();
        RgbImage::from_fn(w as u32, h as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            Rgb([array[[y, x, 0]], array[[y, x, 1]], array[[y, x, 2]]])
        })
    }

    /// RGB图像 → `[H, W, 3]`的u8数组
    pub fn to_array(image: &RgbImage) -> Array3<u8> {
        let (w, h) = image.dimensions();
        Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
            image.get_pixel(x as u32, y as u32)[c]
        })
    }

    /// 保存`[H, W, 3]`的u8数组为图像文件
    pub fn save_image(array: &Array3<u8>, path: &Path) -> Result<(), StoreError> {
        Self::to_rgb(array).save(path)?;
        Ok(())
    }

    /// 加载本地图像。文件不存在时返回可区分的“资源未找到”错误。
    pub fn load_image(path: &Path) -> Result<RgbImage, StoreError> {
        if !path.is_file() {
            return Err(StoreError::FileNotFound(path.to_path_buf()));
        }
        Ok(image::open(path)?.to_rgb8())
    }
}
