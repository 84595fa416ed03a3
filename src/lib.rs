//! # Lucid Torch
//!
//! `lucid_torch`项目旨在用纯rust实现卷积网络的特征可视化引擎：
//! 对合成图像做梯度上升，生成最大化激活某个filter、神经元或通道方向的图像，
//! 并以“逐层可视化字典 + 激活分组（NMF） + 网格拼接”的方式，
//! 把真实输入在某一层的激活解释成可读的空间表示。
//!
//! 本crate只包含可视化引擎本身：模型加载/反射、GUI与Grad-CAM均作为外部协作方，
//! 通过[`model`]模块定义的trait接入。
//!

pub mod dictionary;
pub mod errors;
pub mod grid;
pub mod grouper;
pub mod model;
pub mod settings;
pub mod task;
pub mod vision;
pub mod viz;

#[cfg(test)]
pub(crate) mod testkit;
