//! 激活分组：用NMF把一层的通道激活聚成少量语义相关的分组。
//!
//! 把空间位置摊平成[位置×通道]矩阵做非负分解，系数矩阵还原为每组一张
//! 空间热图，基矩阵即每组的通道权重向量（可作DIRECTION目标的参考方向）。
//! 分组按峰值激活出现的空间列升序排列，抵消分解本身分量次序的随机性，
//! 使同一输入的分组在界面上始终从左到右稳定展示。

mod nmf;


use image::RgbImage;
use ndarray::{Array2, Array3, Array4, ArrayView2, Axis};

use crate::errors::ModelError;
use crate::grid;
use crate::model::FeatureExtractor;
use crate::settings::Settings;
use crate::task::TaskContext;
use crate::viz::{self, Objective};

/// NMF随机初始化的固定种子：同一输入重复分组结果一致
pub const NMF_SEED: u64 = 0;

const NMF_ITERATIONS: usize = 200;

/// 分组结果：k张空间热图与k个通道权重向量，次序两两对应
#[derive(Debug, Clone)]
pub struct ActivationGroups {
    /// `[k, H, W]`，每组一张与层输出空间形状一致的激活热图
    pub maps: Array3<f32>,
    /// `[k, C]`，每组的通道权重（方向）向量
    pub channel_factors: Array2<f32>,
}

impl ActivationGroups {
    pub fn len(&self) -> usize {
        self.maps.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 对一层激活（NHWC，取batch首元素）做k组NMF分组，
/// 返回按峰值空间列升序排列的分组
pub fn group(acts: &Array4<f32>, k: usize) -> ActivationGroups {
    let plane = acts.index_axis(Axis(0), 0);
    let (h, w, c) = plane.dim();
    let flat = plane
        .to_owned()
        .into_shape((h * w, c))
        .expect("标准布局的激活摊平不会失败");

    let (coeff, factors) = nmf::factorize(&flat, k, NMF_ITERATIONS, NMF_SEED);

    // [H·W, k] → [k, H, W]
    let mut maps = Array3::zeros((k, h, w));
    for ((pos, g), &value) in coeff.indexed_iter() {
        maps[[g, pos / w, pos % w]] = value;
    }

    // 按各组峰值所在列排序，最靠左的峰排最前（稳定排序）
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by_key(|&g| peak_column(&maps.index_axis(Axis(0), g)));

    let mut sorted_maps = Array3::zeros((k, h, w));
    let mut sorted_factors = Array2::zeros((k, c));
    for (dst, &src) in order.iter().enumerate() {
        sorted_maps
            .index_axis_mut(Axis(0), dst)
            .assign(&maps.index_axis(Axis(0), src));
        sorted_factors
            .index_axis_mut(Axis(0), dst)
            .assign(&factors.index_axis(Axis(0), src));
    }

    ActivationGroups {
        maps: sorted_maps,
        channel_factors: sorted_factors,
    }
}

/// 热图峰值所在的列序号（先对每列取行向最大，再找最大列）
fn peak_column(map: &ArrayView2<f32>) -> usize {
    let (h, w) = map.dim();
    let mut best_col = 0;
    let mut best = f32::NEG_INFINITY;
    for x in 0..w {
        for y in 0..h {
            if map[[y, x]] > best {
                best = map[[y, x]];
                best_col = x;
            }
        }
    }
    best_col
}

/// 为每个分组生成一张彩色激活图：热图归一化到[0,100]后，
/// 每个空间位置映射成一块纯色贴片（色相由组序号决定，明度固定，
/// 饱和度正比于激活强度），再交给网格拼接器合成单图。
/// 每处理一组检查一次取消；触发取消时整批丢弃，返回`None`。
pub fn group_activation_maps(
    groups: &ActivationGroups,
    settings: &Settings,
    task: &TaskContext,
) -> Option<Vec<RgbImage>> {
    let k = groups.len();
    let tile_w = settings.cropped_width() as u32;
    let tile_h = settings.cropped_height() as u32;

    let mut maps = Vec::with_capacity(k);
    for g in 0..k {
        if !task.is_running() {
            return None;
        }
        let normalized = normalize_map(&groups.maps.index_axis(Axis(0), g));
        let (h, w) = normalized.dim();

        let mut grid_tiles = Vec::with_capacity(h);
        for y in 0..h {
            let mut row = Vec::with_capacity(w);
            for x in 0..w {
                let color = swatch_color(g, k, normalized[[y, x]]);
                row.push(RgbImage::from_pixel(tile_w, tile_h, image::Rgb(color)));
            }
            grid_tiles.push(row);
        }

        maps.push(grid::combine(&grid_tiles, settings, task, 0)?);
        task.progress(g + 1);
    }
    Some(maps)
}

/// 为每个分组的通道权重向量跑一次DIRECTION目标的特征可视化
pub fn group_visualizations(
    channel_factors: &Array2<f32>,
    n: usize,
    extractor: &dyn FeatureExtractor,
    settings: &Settings,
) -> Result<Vec<ndarray::Array3<u8>>, ModelError> {
    let mut images = Vec::with_capacity(n);
    for g in 0..n {
        let reference = channel_factors.row(g).to_owned();
        images.push(viz::visualize(
            extractor,
            &Objective::direction(reference),
            settings,
        )?);
    }
    Ok(images)
}

/// 把热图线性归一化到[0, 100]的u8
fn normalize_map(map: &ArrayView2<f32>) -> Array2<u8> {
    let low = map.iter().copied().fold(f32::INFINITY, f32::min);
    let high = map.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let scalar = if high > low { 100.0 / (high - low) } else { 0.0 };
    map.mapv(|v| ((v - low) * scalar).clamp(0.0, 100.0) as u8)
}

/// 组序号与归一化激活值 → HLS色板中的一种纯色
fn swatch_color(group: usize, n: usize, act: u8) -> [u8; 3] {
    let hue = (group as f32 + 360.0) / n as f32;
    let rgb = hls_to_rgb(hue, 0.5, act as f32 / 100.0);
    rgb.map(|u| (0.5 + 255.0 * u) as u8)
}

/// HLS → RGB（各分量均在[0,1]，色相按周期取模）
pub(crate) fn hls_to_rgb(h: f32, l: f32, s: f32) -> [f32; 3] {
    if s == 0.0 {
        return [l, l, l];
    }
    let m2 = if l <= 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let m1 = 2.0 * l - m2;
    let channel = |hue: f32| -> f32 {
        let hue = hue.rem_euclid(1.0);
        if hue < 1.0 / 6.0 {
            m1 + (m2 - m1) * hue * 6.0
        } else if hue < 0.5 {
            m2
        } else if hue < 2.0 / 3.0 {
            m1 + (m2 - m1) * (2.0 / 3.0 - hue) * 6.0
        } else {
            m1
        }
    };
    [channel(h + 1.0 / 3.0), channel(h), channel(h - 1.0 / 3.0)]
}
