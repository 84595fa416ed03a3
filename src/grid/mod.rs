//! 网格拼接器：把逐位置的可视化贴片合成一张层表示图。
//!
//! 两条生成路径：`filter_activation_grid`按每个空间位置激活最强的filter
//! 直接查字典（快，纯缓存）；`direction_activation_grid`对每个位置用其
//! 自身激活向量作参考方向重新跑一次可视化（准，逐像素一次完整上升）。

use image::{RgbImage, imageops};
use ndarray::{ArrayView3, s};

use crate::errors::ModelError;
use crate::model::FeatureExtractor;
use crate::settings::Settings;
use crate::task::TaskContext;
use crate::vision::Vision;
use crate::viz::{self, Objective};


/// 把n×n（或n×m）的等尺寸贴片拼接为单张合成图。
/// 画布每轴尺寸为`n·cropped + (n-1)·margin`，初始全黑；
/// 贴片按行主序写入各自的网格单元，margin区域保持画布底色。
/// 每放置一块贴片前检查取消；触发取消返回`None`，调用方必须丢弃。
pub fn combine(
    grid: &[Vec<RgbImage>],
    settings: &Settings,
    task: &TaskContext,
    margin: usize,
) -> Option<RgbImage> {
    let rows = grid.len();
    let cols = grid.first().map_or(0, Vec::len);
    if rows == 0 || cols == 0 {
        return Some(RgbImage::new(0, 0));
    }

    let tile_w = settings.cropped_width();
    let tile_h = settings.cropped_height();
    let canvas_w = cols * tile_w + (cols - 1) * margin;
    let canvas_h = rows * tile_h + (rows - 1) * margin;

    let mut canvas = RgbImage::new(canvas_w as u32, canvas_h as u32);
    for (i, row) in grid.iter().enumerate() {
        for (j, tile) in row.iter().enumerate() {
            if !task.is_running() {
                return None;
            }
            let x = (j * (tile_w + margin)) as i64;
            let y = (i * (tile_h + margin)) as i64;
            imageops::replace(&mut canvas, tile, x, y);
        }
    }
    Some(canvas)
}

/// 基于字典的快速层表示：对激活（`[H, W, C]`）的每个空间位置，
/// 取通道argmax对应的字典图像作为该位置的贴片。
/// 取消时返回`None`；进度按已处理位置数上报。
pub fn filter_activation_grid(
    acts: &ArrayView3<f32>,
    images: &[RgbImage],
    task: &TaskContext,
) -> Option<Vec<Vec<RgbImage>>> {
    let (h, w, c) = acts.dim();
    let mut grid = Vec::with_capacity(h);
    for y in 0..h {
        let mut row = Vec::with_capacity(w);
        for x in 0..w {
            if !task.is_running() {
                return None;
            }
            let mut best = 0;
            for z in 1..c {
                if acts[[y, x, z]] > acts[[y, x, best]] {
                    best = z;
                }
            }
            row.push(images[best].clone());
            task.progress(y * w + x + 1);
        }
        grid.push(row);
    }
    Some(grid)
}

/// 逐位置的DIRECTION层表示：对每个空间位置，以该处自身的激活向量为
/// 参考方向跑一次完整的特征可视化。代价是每个位置一轮梯度上升。
pub fn direction_activation_grid(
    extractor: &dyn FeatureExtractor,
    acts: &ArrayView3<f32>,
    settings: &Settings,
    task: &TaskContext,
) -> Result<Option<Vec<Vec<RgbImage>>>, ModelError> {
    let (h, w, _) = acts.dim();
    let mut grid = Vec::with_capacity(h);
    for y in 0..h {
        let mut row = Vec::with_capacity(w);
        for x in 0..w {
            if !task.is_running() {
                return Ok(None);
            }
            let reference = acts.slice(s![y, x, ..]).to_owned();
            let image = viz::visualize(extractor, &Objective::direction(reference), settings)?;
            row.push(Vision::to_rgb(&image));
            task.progress(y * w + x + 1);
        }
        grid.push(row);
    }
    Ok(Some(grid))
}
