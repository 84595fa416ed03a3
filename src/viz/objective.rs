//! 目标函数构造。
//!
//! 三种可视化目标（FILTER/NEURON/DIRECTION）各对应一个损失变体，
//! 用`enum_dispatch`做静态分发，避免在各组件里重复三路条件分支。
//! 每个变体除损失值外还给出关于激活的解析梯度；
//! 与特征提取器的`backward`（拉回输入空间）组合后，目标对合成图像端到端可微。
//! 构造过程绝不触碰网络权重。

use enum_dispatch::enum_dispatch;
use ndarray::{Array1, Array4, s};
use serde::{Deserialize, Serialize};

/// 可视化目标的封闭枚举：决定损失函数与字典的形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Target {
    Filter,
    Neuron,
    Direction,
}

/// 对一层激活张量（NHWC）求损失及其关于激活的梯度
#[enum_dispatch]
pub trait Loss {
    /// 损失值。DIRECTION目标的逐位置损失曲面在此归并为标量（只用于观测）。
    fn loss(&self, acts: &Array4<f32>) -> f32;

    /// 关于激活的梯度，形状与激活一致
    fn grad(&self, acts: &Array4<f32>) -> Array4<f32>;

    fn target(&self) -> Target;
}

/// FILTER目标：指定filter激活图裁掉每边2像素后的均值。
/// 裁边是为了避免卷积padding造成的边缘伪影主导优化结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterLoss {
    pub index: usize,
}

/// 激活图空间边缘的裁剪宽度（像素）
pub const ACTIVATION_TRIM: usize = 2;

impl Loss for FilterLoss {
    fn loss(&self, acts: &Array4<f32>) -> f32 {
        let (_, h, w, _) = acts.dim();
        // 空间维不足以裁边（晚期小尺寸卷积层）时退化为零损失、零梯度
        if h <= 2 * ACTIVATION_TRIM || w <= 2 * ACTIVATION_TRIM {
            return 0.0;
        }
        let trimmed = acts.slice(s![
            ..,
            ACTIVATION_TRIM..h - ACTIVATION_TRIM,
            ACTIVATION_TRIM..w - ACTIVATION_TRIM,
            self.index
        ]);
        trimmed.mean().unwrap_or(0.0)
    }

    fn grad(&self, acts: &Array4<f32>) -> Array4<f32> {
        let (b, h, w, _) = acts.dim();
        let mut grad = Array4::zeros(acts.raw_dim());
        if h <= 2 * ACTIVATION_TRIM || w <= 2 * ACTIVATION_TRIM {
            return grad;
        }
        let count = (b * (h - 2 * ACTIVATION_TRIM) * (w - 2 * ACTIVATION_TRIM)) as f32;
        grad.slice_mut(s![
            ..,
            ACTIVATION_TRIM..h - ACTIVATION_TRIM,
            ACTIVATION_TRIM..w - ACTIVATION_TRIM,
            self.index
        ])
        .fill(1.0 / count);
        grad
    }

    fn target(&self) -> Target {
        Target::Filter
    }
}

/// NEURON目标：某filter内单个空间坐标的激活（沿batch求和）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeuronLoss {
    pub filter: usize,
    pub row: usize,
    pub col: usize,
}

impl Loss for NeuronLoss {
    fn loss(&self, acts: &Array4<f32>) -> f32 {
        acts.slice(s![.., self.row, self.col, self.filter]).sum()
    }

    fn grad(&self, acts: &Array4<f32>) -> Array4<f32> {
        let mut grad = Array4::zeros(acts.raw_dim());
        grad.slice_mut(s![.., self.row, self.col, self.filter])
            .fill(1.0);
        grad
    }

    fn target(&self) -> Target {
        Target::Neuron
    }
}

/// DIRECTION目标：候选激活与参考通道向量的逐位置点积。
/// 参考向量可以是真实输入在某空间位置的激活，也可以是某分组的通道权重。
/// 损失天然是逐位置的曲面，用它驱动整图上升以复现该方向。
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionLoss {
    pub reference: Array1<f32>,
}

impl Loss for DirectionLoss {
    fn loss(&self, acts: &Array4<f32>) -> f32 {
        debug_assert_eq!(acts.shape()[3], self.reference.len());
        let (b, h, w, _) = acts.dim();
        let mut total = 0.0;
        for bi in 0..b {
            for y in 0..h {
                for x in 0..w {
                    total += acts.slice(s![bi, y, x, ..]).dot(&self.reference);
                }
            }
        }
        total
    }

    fn grad(&self, acts: &Array4<f32>) -> Array4<f32> {
        debug_assert_eq!(acts.shape()[3], self.reference.len());
        // 逐位置损失对激活的梯度就是参考向量在所有空间位置上的广播
        Array4::from_shape_fn(acts.raw_dim(), |(_, _, _, c)| self.reference[c])
    }

    fn target(&self) -> Target {
        Target::Direction
    }
}

/// 带标签的目标函数变体
#[enum_dispatch(Loss)]
#[derive(Debug, Clone)]
pub enum Objective {
    FilterLoss,
    NeuronLoss,
    DirectionLoss,
}

impl Objective {
    pub fn filter(index: usize) -> Self {
        FilterLoss { index }.into()
    }

    pub fn neuron(filter: usize, coord: (usize, usize)) -> Self {
        NeuronLoss {
            filter,
            row: coord.0,
            col: coord.1,
        }
        .into()
    }

    pub fn direction(reference: Array1<f32>) -> Self {
        DirectionLoss { reference }.into()
    }
}
