//! 梯度上升的正则化管线。
//!
//! 每步上升后按固定顺序施加：频率惩罚 → 模糊 → 衰减 → 随机旋转。
//! 顺序是语义的一部分：频率惩罚在模糊之前是加性项，
//! 模糊因此同时作用于本步的上升增量和频率调整；
//! 旋转放在最后，避免被同一步内的确定性平滑抵消。

use ndarray::{Array4, ArrayView3, Axis, s};
use rand::Rng;

/// 频率惩罚的强度常数
pub const PENALTY_B: f32 = 128.0;

/// 全局衰减因子：整图向灰色轻微收缩，抑制亮度失控
pub const DECAY: f32 = 0.8;

/// 频率惩罚：常数偏置加全变差（total variation）项，抑制逐像素梯度上升
/// 固有的高频噪声。偏置先于全变差计入，全变差按batch元素逐个求出后
/// 作为标量加回该元素的所有像素。
pub fn penalize(img: &mut Array4<f32>, width: usize, height: usize) {
    let area = (height * width) as f32;
    let penalty = 1.0 / (area * PENALTY_B);
    let tv_coeff = 1.0 / (area * 0.02 * PENALTY_B);

    *img += penalty * PENALTY_B;

    let batch = img.shape()[0];
    for b in 0..batch {
        let tv = total_variation(&img.index_axis(Axis(0), b));
        let mut plane = img.index_axis_mut(Axis(0), b);
        plane += tv_coeff * tv;
    }
}

/// 全变差：水平与垂直相邻像素差的绝对值之和
pub fn total_variation(plane: &ArrayView3<f32>) -> f32 {
    let (h, w, c) = plane.dim();
    let mut tv = 0.0;
    for y in 0..h {
        for x in 0..w {
            for z in 0..c {
                if y + 1 < h {
                    tv += (plane[[y + 1, x, z]] - plane[[y, x, z]]).abs();
                }
                if x + 1 < w {
                    tv += (plane[[y, x + 1, z]] - plane[[y, x, z]]).abs();
                }
            }
        }
    }
    tv
}

/// 均值（盒式）模糊：对每个batch元素的每个通道做k×k窗口平均，
/// 窗口在边界处收缩并按实际像素数归一化。
pub fn box_blur(img: &mut Array4<f32>, ksize: usize) {
    if ksize <= 1 {
        return;
    }
    let (batch, h, w, c) = img.dim();
    let back = ksize / 2;
    let ahead = ksize - 1 - back;

    for b in 0..batch {
        let src = img.index_axis(Axis(0), b).to_owned();
        let mut dst = img.index_axis_mut(Axis(0), b);
        for y in 0..h {
            let y0 = y.saturating_sub(back);
            let y1 = (y + ahead).min(h - 1);
            for x in 0..w {
                let x0 = x.saturating_sub(back);
                let x1 = (x + ahead).min(w - 1);
                let count = ((y1 - y0 + 1) * (x1 - x0 + 1)) as f32;
                for z in 0..c {
                    let window = src.slice(s![y0..=y1, x0..=x1, z]);
                    dst[[y, x, z]] = window.sum() / count;
                }
            }
        }
    }
}

/// 随机旋转：从{-10..=10}∪{0×5}中等概率取角（约31%概率不旋转），
/// 鼓励旋转不变的特征并减少平铺伪影。
pub fn random_rotate(img: &Array4<f32>) -> Array4<f32> {
    let mut angles: Vec<i32> = (-10..=10).collect();
    angles.extend([0; 5]);
    let angle = angles[rand::thread_rng().gen_range(0..angles.len())];
    if angle == 0 {
        return img.clone();
    }
    rotate(img, degrees_to_radians(angle as f32))
}

pub fn degrees_to_radians(angle: f32) -> f32 {
    3.14 * angle / 180.0
}

/// 绕空间中心旋转整个batch：逆向映射加双线性采样，越界处填0
pub fn rotate(img: &Array4<f32>, radians: f32) -> Array4<f32> {
    let (batch, h, w, c) = img.dim();
    let cy = (h as f32 - 1.0) / 2.0;
    let cx = (w as f32 - 1.0) / 2.0;
    let (sin, cos) = radians.sin_cos();

    Array4::from_shape_fn((batch, h, w, c), |(b, y, x, z)| {
        let dy = y as f32 - cy;
        let dx = x as f32 - cx;
        // 输出像素在原图中的来源坐标
        let sy = cos * dy - sin * dx + cy;
        let sx = sin * dy + cos * dx + cx;
        bilinear(img, b, sy, sx, z, h, w)
    })
}

fn bilinear(img: &Array4<f32>, b: usize, sy: f32, sx: f32, z: usize, h: usize, w: usize) -> f32 {
    if sy < 0.0 || sx < 0.0 || sy > (h - 1) as f32 || sx > (w - 1) as f32 {
        return 0.0;
    }
    let y0 = sy.floor() as usize;
    let x0 = sx.floor() as usize;
    let y1 = (y0 + 1).min(h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let fy = sy - y0 as f32;
    let fx = sx - x0 as f32;

    let top = img[[b, y0, x0, z]] * (1.0 - fx) + img[[b, y0, x1, z]] * fx;
    let bottom = img[[b, y1, x0, z]] * (1.0 - fx) + img[[b, y1, x1, z]] * fx;
    top * (1.0 - fy) + bottom * fy
}
