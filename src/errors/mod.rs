//! 本crate的错误类型定义。
//!
//! 三类失败语义：
//! 1. 配置错误（[`SettingsError`]）——在设置修改的边界就被拒绝，绝不会进入优化循环；
//! 2. 模型/计算错误（[`ModelError`]）——层名不存在、形状不匹配等，只中止当前任务；
//! 3. 资源错误（[`StoreError`]）——索引或图像文件缺失、不可读，调用方不得部分应用状态。
//!
//! 注意：协作式取消不是错误，统一用`None`/空结果表达。

use std::path::PathBuf;
use thiserror::Error;

/// 可视化设置相关错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("学习率必须为正的有限数")]
    InvalidLearningRate,
    #[error("迭代次数至少为1")]
    InvalidIterations,
    #[error("batch规模至少为1")]
    InvalidScale,
    #[error("模糊核尺寸至少为1")]
    InvalidKernelSize,
    #[error("分组数至少为1")]
    InvalidGroups,
    #[error("输入尺寸过小：解码时每边会裁掉{border}像素，宽高须大于{min}")]
    InputTooSmall { border: usize, min: usize },

    // 设置文件导入导出
    #[error("设置文件应含8个以`|`分隔的字段，实际为{0}个")]
    FieldCount(usize),
    #[error("设置文件第{index}个字段`{value}`无法解析")]
    FieldParse { index: usize, value: String },
    #[error("设置文件读写失败: {0}")]
    Io(String),
}

/// 模型反射与计算相关错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("模型中不存在名为`{0}`的层")]
    LayerNotFound(String),
    #[error("尚未选择目标层")]
    NoLayerSelected,
    #[error("尚未计算当前输入在目标层的激活")]
    MissingActivations,
    #[error("形状不匹配: 期望 {expected:?}, 实际 {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("计算错误: {0}")]
    Computation(String),
}

/// 字典持久化相关错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("文件未找到: {0}")]
    FileNotFound(PathBuf),
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("索引文件损坏: {0}")]
    BadIndex(#[from] serde_json::Error),
    #[error("索引文件内容不一致: {0}")]
    InconsistentIndex(String),
    #[error("索引中不存在层`{0}`")]
    LayerNotIndexed(String),
    #[error("图像读写错误: {0}")]
    Image(#[from] image::ImageError),
    #[error("字典只支持FILTER与NEURON目标")]
    UnsupportedTarget,
    #[error("模型计算失败: {0}")]
    Model(#[from] ModelError),
}
