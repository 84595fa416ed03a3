//! 特征可视化端到端集成测试
//!
//! 用一个闭式可微的线性混合“网络”走完整条流水线：
//! 层扫描 → 会话 → 单filter/神经元可视化 → 字典生成与导入 →
//! 层表示网格 → NMF激活分组。验证各组件在真实调用顺序下协同工作。

use std::fs;

use ndarray::{Array2, Array4};

use lucid_torch::dictionary::{Dictionary, INDEX_FILE, LayerImages};
use lucid_torch::errors::ModelError;
use lucid_torch::grid;
use lucid_torch::grouper;
use lucid_torch::model::{
    FeatureExtractor, LayerKind, LayerSignature, Model, Session,
};
use lucid_torch::task::{CancelToken, TaskContext};
use lucid_torch::viz::Target;

/// 线性通道混合网络：每个输出通道是输入RGB的固定线性组合，
/// 空间维不变，前向/反向都有闭式解
struct MixNet {
    width: usize,
    height: usize,
    weights: Array2<f32>, // [C, 3]
}

impl MixNet {
    fn new(width: usize, height: usize, channels: usize) -> Self {
        let weights =
            Array2::from_shape_fn((channels, 3), |(c, k)| ((c * 5 + k) % 9 + 1) as f32 / 9.0);
        Self {
            width,
            height,
            weights,
        }
    }

    fn channels(&self) -> usize {
        self.weights.shape()[0]
    }
}

struct MixExtractor {
    weights: Array2<f32>,
}

impl FeatureExtractor for MixExtractor {
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>, ModelError> {
        let (b, h, w, _) = input.dim();
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

impl Model for MixNet {
    fn input_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn layers(&self) -> Vec<LayerSignature> {
        let (w, h, c) = (self.width, self.height, self.channels());
        vec![
            LayerSignature {
                name: "mix_conv".to_string(),
                kind: LayerKind::SpatialConv,
                in_shape: vec![1, h, w, 3],
                out_shape: vec![1, h, w, c],
            },
            LayerSignature {
                name: "mix_relu".to_string(),
                kind: LayerKind::ReluActivated,
                in_shape: vec![1, h, w, c],
                out_shape: vec![1, h, w, c],
            },
        ]
    }

    fn extractor(&self, layer_name: &str) -> Result<Box<dyn FeatureExtractor>, ModelError> {
        match layer_name {
            "mix_conv" | "mix_relu" => Ok(Box::new(MixExtractor {
                weights: self.weights.clone(),
            })),
            _ => Err(ModelError::LayerNotFound(layer_name.to_string())),
        }
    }
}

fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("lucid_torch_it_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_full_visualization_pipeline() -> Result<(), ModelError> {
    println!("\n{}", "=".repeat(60));
    println!("=== 特征可视化流水线集成测试 ===");
    println!("{}\n", "=".repeat(60));

    // ========== 1. 模型扫描与会话 ==========
    println!("[1/5] 扫描模型、建立会话...");
    let net = MixNet::new(64, 64, 4);
    let mut session = Session::new(&net)?;
    assert_eq!(session.catalog().conv_layers.len(), 1);
    assert_eq!(session.catalog().group_layers.len(), 1);
    // 会话绑定模型输入尺寸，裁边后输出14×14
    assert_eq!(session.settings.input_width(), 64);
    assert_eq!(session.settings.cropped_width(), 14);
    session.settings.set_iterations(8).unwrap();
    session.settings.set_groups(2).unwrap();

    session.select_layer("mix_conv")?;
    let layer = session.layer()?.clone();
    println!(
        "  ✓ 层 {}：{}个filter，神经元网格{:?}",
        layer.name, layer.filter_count, layer.neuron_shape
    );

    // ========== 2. 单目标可视化 ==========
    println!("[2/5] 单filter/神经元可视化...");
    let filter_image = session.visualize_filter(0)?;
    assert_eq!(filter_image.dim(), (14, 14, 3));
    let neuron_image = session.visualize_neuron(1, 65)?;
    assert_eq!(neuron_image.dim(), (14, 14, 3));
    println!("  ✓ 输出尺寸 {:?}", filter_image.dim());

    // ========== 3. 字典生成与导入 ==========
    println!("[3/5] 生成FILTER字典并导回...");
    let dict_dir = scratch_dir("pipeline_dict");
    let extractor = session.extractor()?;
    let (ctx, _progress) = TaskContext::new(CancelToken::new());

    let mut dictionary = Dictionary::new(Target::Filter);
    let completed = dictionary
        .generate(extractor.as_ref(), &layer, &session.settings, &dict_dir, &ctx)
        .unwrap();
    assert!(completed);
    assert!(dict_dir.join(INDEX_FILE).is_file());

    let LayerImages::Filters(images) = dictionary.import(&dict_dir, &layer.name).unwrap() else {
        panic!("FILTER字典应导入为平铺图像表");
    };
    assert_eq!(images.len(), layer.filter_count);
    let images = images.clone();
    println!("  ✓ {}张字典图像落盘并导回", images.len());

    // ========== 4. 层表示网格 ==========
    println!("[4/5] 基于字典合成层表示...");
    // 用一张左右半区颜色不同的输入，制造有空间结构的激活
    let input = Array4::from_shape_fn((1, 64, 64, 3), |(_, _, x, c)| {
        if (x < 32) == (c == 0) { 1.0 } else { 0.2 }
    });
    session.update_activations(&input)?;

    // 只取4×4子网格，保持测试秒级完成
    let acts = session.activations()?;
    let acts_sub = acts
        .slice(ndarray::s![0, ..4, ..4, ..])
        .to_owned();
    let tiles = grid::filter_activation_grid(&acts_sub.view(), &images, &ctx).unwrap();
    let canvas = grid::combine(&tiles, &session.settings, &ctx, 1).unwrap();
    assert_eq!(canvas.dimensions(), (4 * 14 + 3, 4 * 14 + 3));
    println!("  ✓ 画布 {:?}", canvas.dimensions());

    // ========== 5. 激活分组 ==========
    println!("[5/5] NMF激活分组...");
    session.select_layer("mix_relu")?;
    session.update_activations(&input)?;
    let groups = session.generate_groups()?;
    assert_eq!(groups.len(), 2);
    assert_eq!(groups.channel_factors.dim(), (2, net.channels()));

    let maps = grouper::group_activation_maps(&groups, &session.settings, &ctx).unwrap();
    assert_eq!(maps.len(), 2);

    // 每组方向向量再走一遍DIRECTION目标的可视化
    let renders = grouper::group_visualizations(
        &groups.channel_factors,
        groups.len(),
        session.extractor()?.as_ref(),
        &session.settings,
    )?;
    assert!(renders.iter().all(|r| r.dim() == (14, 14, 3)));
    println!("  ✓ {}组热图与方向可视化", maps.len());

    let _ = fs::remove_dir_all(&dict_dir);
    Ok(())
}

/// 后台任务里跑字典生成，中途取消：当前filter完整结束、
/// 层目录不落盘，取消以`Ok(false)`而非错误返回
#[test]
fn test_background_generation_cancels_cleanly() {
    let dict_dir = scratch_dir("pipeline_cancel");
    let net = MixNet::new(64, 64, 16);
    let session = {
        let mut s = Session::new(&net).unwrap();
        s.settings.set_iterations(4).unwrap();
        s.select_layer("mix_conv").unwrap();
        s
    };
    let layer = session.layer().unwrap().clone();
    let settings = session.settings.clone();
    let extractor = session.extractor().unwrap();

    let dir = dict_dir.clone();
    let task = lucid_torch::task::Task::spawn(move |ctx| {
        let mut dictionary = Dictionary::new(Target::Filter);
        dictionary.generate(extractor.as_ref(), &layer, &settings, &dir, ctx)
    });

    // 等第一个filter完成后取消
    while task.latest_progress().is_none() {
        std::thread::yield_now();
    }
    task.cancel();

    let completed = task.join().unwrap().unwrap();
    assert!(!completed);
    assert!(!dict_dir.join(INDEX_FILE).exists());
    let _ = fs::remove_dir_all(&dict_dir);
}
