//! 单元测试共用的确定性玩具模型。
//!
//! `MixExtractor`是一个线性通道混合“层”：空间维保持不变，
//! 输出通道是输入三通道的固定线性组合。前向与反向都有闭式解，
//! 便于对优化器与目标函数做可预测的断言。

use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array2, Array4};

use crate::errors::ModelError;
use crate::model::{FeatureExtractor, LayerKind, LayerSignature, Model};
use crate::settings::Settings;
use crate::task::CancelToken;

/// 线性通道混合：acts[b,y,x,c] = Σ_k w[c,k]·input[b,y,x,k]
pub struct MixExtractor {
    pub weights: Array2<f32>, // [C, 3]
}

impl MixExtractor {
    pub fn new(channels: usize) -> Self {
        // 确定性的非负权重，各通道互不相同
        let weights =
            Array2::from_shape_fn((channels, 3), |(c, k)| ((c * 3 + k) % 7 + 1) as f32 / 7.0);
        Self { weights }
    }
}

impl FeatureExtractor for MixExtractor {
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>, ModelError> {
        let (b, h, w, kin) = input.dim();
        if kin != 3 {
            return Err(ModelError::ShapeMismatch {
                expected: vec![b, h, w, 3],
                got: input.shape().to_vec(),
            });
        }
        let c = self.weights.shape()[0];
        let mut acts = Array4::zeros((b, h, w, c));
        for bi in 0..b {
            for y in 0..h {
                for x in 0..w {
                    for ci in 0..c {
                        let mut value = 0.0;
                        for k in 0..3 {
                            value += self.weights[[ci, k]] * input[[bi, y, x, k]];
                        }
                        acts[[bi, y, x, ci]] = value;
                    }
                }
            }
        }
        Ok(acts)
    }

    fn backward(
        &self,
        input: &Array4<f32>,
        grad_activation: &Array4<f32>,
    ) -> Result<Array4<f32>, ModelError> {
        let (b, h, w, _) = input.dim();
        let c = self.weights.shape()[0];
        let mut grad = Array4::zeros((b, h, w, 3));
        for bi in 0..b {
            for y in 0..h {
                for x in 0..w {
                    for k in 0..3 {
                        let mut value = 0.0;
                        for ci in 0..c {
                            value += grad_activation[[bi, y, x, ci]] * self.weights[[ci, k]];
                        }
                        grad[[bi, y, x, k]] = value;
                    }
                }
            }
        }
        Ok(grad)
    }
}

/// 前向达到指定次数后触发取消的提取器：
/// 用于确定性地验证“完成当前单元再停止”的取消粒度
pub struct CancelAfterForwards {
    inner: MixExtractor,
    token: CancelToken,
    threshold: usize,
    calls: AtomicUsize,
}

impl CancelAfterForwards {
    pub fn new(channels: usize, token: CancelToken, threshold: usize) -> Self {
        Self {
            inner: MixExtractor::new(channels),
            token,
            threshold,
            calls: AtomicUsize::new(0),
        }
    }
}

impl FeatureExtractor for CancelAfterForwards {
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>, ModelError> {
        let done = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if done >= self.threshold {
            self.token.cancel();
        }
        self.inner.forward(input)
    }

    fn backward(
        &self,
        input: &Array4<f32>,
        grad_activation: &Array4<f32>,
    ) -> Result<Array4<f32>, ModelError> {
        self.inner.backward(input, grad_activation)
    }
}

/// 三层玩具模型：卷积层、ReLU层各一个（空间维与输入一致），外加一个
/// 不参与可视化的摊平层
pub struct ToyModel {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl ToyModel {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }
}

impl Model for ToyModel {
    fn input_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn layers(&self) -> Vec<LayerSignature> {
        let (w, h, c) = (self.width, self.height, self.channels);
        vec![
            LayerSignature {
                name: "conv1".to_string(),
                kind: LayerKind::SpatialConv,
                in_shape: vec![1, h, w, 3],
                out_shape: vec![1, h, w, c],
            },
            LayerSignature {
                name: "relu1".to_string(),
                kind: LayerKind::ReluActivated,
                in_shape: vec![1, h, w, c],
                out_shape: vec![1, h, w, c],
            },
            LayerSignature {
                name: "flatten".to_string(),
                kind: LayerKind::Other,
                in_shape: vec![1, h, w, c],
                out_shape: vec![1, h * w * c],
            },
        ]
    }

    fn extractor(&self, layer_name: &str) -> Result<Box<dyn FeatureExtractor>, ModelError> {
        match layer_name {
            "conv1" | "relu1" => Ok(Box::new(MixExtractor::new(self.channels))),
            _ => Err(ModelError::LayerNotFound(layer_name.to_string())),
        }
    }
}

/// 小尺寸快速设置：输入64×64（裁边后14×14），2次迭代
pub fn tiny_settings() -> Settings {
    let mut settings = Settings::default();
    settings.set_input_size(64, 64).unwrap();
    settings.set_iterations(2).unwrap();
    settings
}

/// 每个测试独立的临时目录（进程号隔离，用前清空）
pub fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("lucid_torch_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
