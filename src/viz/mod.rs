//! 特征可视化引擎：梯度上升优化器与可视化单元。
//!
//! 对一张合成图像迭代执行“前向取激活 → 解析梯度拉回输入空间 → L2归一化 →
//! 上升一步 → 正则化”的循环，最后把第一个batch元素解码为8bit图像。
//! 正则化思路部分借鉴lucid，解码流程来自keras的convnet可视化教程。

pub mod objective;
pub mod regularize;

pub use objective::{DirectionLoss, FilterLoss, Loss, NeuronLoss, Objective, Target};


use ndarray::{Array3, Array4, Axis, s};
use rand::Rng;

use crate::errors::ModelError;
use crate::model::FeatureExtractor;
use crate::settings::Settings;

/// 解码时每边裁掉的像素数：去除卷积padding与模糊在边界累积的伪影
pub const BORDER_CROP: usize = 25;

/// 初始化合成图像：`[scale, H, W, 3]`的均匀噪声经`(x - 0.5·scale)·0.25`
/// 变换，得到低对比度的灰色起点。不设种子，重复运行结果不同。
pub fn initialize_image(settings: &Settings) -> Array4<f32> {
    let shape = (
        settings.scale(),
        settings.input_height(),
        settings.input_width(),
        3,
    );
    let offset = 0.5 * settings.scale() as f32;
    let mut rng = rand::thread_rng();
    Array4::from_shape_fn(shape, |_| (rng.r#gen::<f32>() - offset) * 0.25)
}

/// 执行一步梯度上升并按固定顺序施加正则化，返回本步的损失值。
/// 梯度整体做L2归一化：三类目标的损失量级相差数个数量级，
/// 归一化后步长才对所有目标保持同一含义。
pub fn gradient_ascent_step(
    extractor: &dyn FeatureExtractor,
    img: &mut Array4<f32>,
    settings: &Settings,
    objective: &Objective,
) -> Result<f32, ModelError> {
    let acts = extractor.forward(img)?;
    let loss = objective.loss(&acts);
    let grad_acts = objective.grad(&acts);
    let mut grads = extractor.backward(img, &grad_acts)?;

    l2_normalize(&mut grads);
    img.scaled_add(settings.learning_rate(), &grads);

    if settings.freq_penalization() {
        regularize::penalize(img, settings.input_width(), settings.input_height());
    }
    if settings.blur() {
        regularize::box_blur(img, settings.blur_kernel_size());
    }
    if settings.decay() {
        *img *= regularize::DECAY;
    }
    if settings.rotate() {
        *img = regularize::random_rotate(img);
    }
    Ok(loss)
}

fn l2_normalize(grads: &mut Array4<f32>) {
    let norm = grads.iter().map(|g| g * g).sum::<f32>().sqrt();
    *grads /= norm + 1e-12;
}

/// 可视化单元：构造好目标后运行`iterations`步上升并解码。
/// 除消耗算力外无任何副作用，不做持久化。
pub fn visualize(
    extractor: &dyn FeatureExtractor,
    objective: &Objective,
    settings: &Settings,
) -> Result<Array3<u8>, ModelError> {
    let mut img = initialize_image(settings);
    for _ in 0..settings.iterations() {
        gradient_ascent_step(extractor, &mut img, settings, objective)?;
    }
    Ok(deprocess(&img))
}

/// 解码：取第一个batch元素，归一化到零均值、0.15方差，
/// 每边裁掉[`BORDER_CROP`]像素，平移到0.5均值后截断到[0,1]，
/// 最后映射到[0,255]的u8。三类目标共用同一解码。
pub fn deprocess(img: &Array4<f32>) -> Array3<u8> {
    // 统计量用f64累加：f32求均值的累计误差会被1/(std+1e-5)放大，
    // 近乎平坦的图像会因此偏离0.5灰
    let mut plane = img.index_axis(Axis(0), 0).mapv(f64::from);

    let mean = plane.mean().unwrap_or(0.0);
    plane -= mean;
    let std = plane.std(0.0);
    plane /= std + 1e-5;
    plane *= 0.15;

    let (h, w, _) = plane.dim();
    let cropped = plane.slice(s![BORDER_CROP..h - BORDER_CROP, BORDER_CROP..w - BORDER_CROP, ..]);

    cropped.mapv(|v| {
        let scaled = (v + 0.5).clamp(0.0, 1.0) * 255.0;
        scaled.clamp(0.0, 255.0) as u8
    })
}
