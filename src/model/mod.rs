//! 模型反射接口与会话上下文。
//!
//! 模型加载属于外部协作方，本模块只定义引擎消费的最小契约：
//! 按层名取得“只输出该层激活”的特征提取器，以及模型加载时扫描一次的
//! 只读层元数据。[`Session`]把“当前层/当前激活/设置”这类原本散落的
//! 共享状态收拢为显式传递的值，优化器与分组器的调用不再有隐藏耦合。

use ndarray::{Array3, Array4, s};

use crate::errors::ModelError;
use crate::grouper::{self, ActivationGroups};
use crate::settings::Settings;
use crate::viz::{self, Objective};


/// 层的能力类别：决定该层可作为哪类可视化目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// 空间卷积层，可作FILTER/NEURON目标
    SpatialConv,
    /// ReLU激活层，可作DIRECTION/分组目标
    ReluActivated,
    Other,
}

/// 模型反射暴露的原始层信息（形状均为NHWC）
#[derive(Debug, Clone)]
pub struct LayerSignature {
    pub name: String,
    pub kind: LayerKind,
    pub in_shape: Vec<usize>,
    pub out_shape: Vec<usize>,
}

/// 候选层的只读元数据：模型加载时扫描一次，生命周期与模型一致
#[derive(Debug, Clone)]
pub struct LayerDescriptor {
    pub index: usize,
    pub name: String,
    pub in_shape: Vec<usize>,
    pub out_shape: Vec<usize>,
    pub filter_count: usize,
    /// 神经元网格（行数, 列数），即该层输出的空间形状
    pub neuron_shape: (usize, usize),
    pub neuron_count: usize,
}

impl LayerDescriptor {
    fn from_signature(index: usize, sig: &LayerSignature) -> Option<Self> {
        // NHWC四维输出才有filter/神经元网格可言
        let [_, h, w, c] = *sig.out_shape.as_slice() else {
            return None;
        };
        Some(Self {
            index,
            name: sig.name.clone(),
            in_shape: sig.in_shape.clone(),
            out_shape: sig.out_shape.clone(),
            filter_count: c,
            neuron_shape: (h, w),
            neuron_count: h * w,
        })
    }

    /// 把一维神经元序号换算为网格坐标（行, 列）
    pub fn neuron_coord(&self, neuron: usize) -> (usize, usize) {
        let (_, cols) = self.neuron_shape;
        (neuron / cols, neuron % cols)
    }
}

/// 特征提取器：限定模型只输出指定层的激活，并能把关于激活的梯度
/// 拉回输入空间。两个方向都不得修改网络权重。
/// 要求`Send`，因为字典生成等长任务在后台线程上持有提取器。
pub trait FeatureExtractor: Send {
    /// 输入batch（NHWC）→ 指定层的激活（NHWC）
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>, ModelError>;

    /// 把∂loss/∂activation经链式法则拉回为∂loss/∂input
    fn backward(
        &self,
        input: &Array4<f32>,
        grad_activation: &Array4<f32>,
    ) -> Result<Array4<f32>, ModelError>;
}

/// 模型反射契约：由模型加载方实现
pub trait Model {
    /// 模型输入的(宽, 高)
    fn input_size(&self) -> (usize, usize);

    /// 按网络顺序列出所有层
    fn layers(&self) -> Vec<LayerSignature>;

    /// 取得限定输出`layer_name`层激活的特征提取器
    fn extractor(&self, layer_name: &str) -> Result<Box<dyn FeatureExtractor>, ModelError>;
}

/// 层目录：模型加载时扫描一次得到的两类候选层
#[derive(Debug, Clone, Default)]
pub struct LayerCatalog {
    pub conv_layers: Vec<LayerDescriptor>,
    pub group_layers: Vec<LayerDescriptor>,
}

impl LayerCatalog {
    /// 扫描模型的所有层，按能力类别归入卷积层或分组层
    pub fn scan(model: &dyn Model) -> Self {
        let mut catalog = Self::default();
        for (index, sig) in model.layers().iter().enumerate() {
            let Some(descriptor) = LayerDescriptor::from_signature(index, sig) else {
                continue;
            };
            match sig.kind {
                LayerKind::SpatialConv => catalog.conv_layers.push(descriptor),
                LayerKind::ReluActivated => catalog.group_layers.push(descriptor),
                LayerKind::Other => {}
            }
        }
        catalog
    }

    pub fn by_name(&self, name: &str) -> Option<&LayerDescriptor> {
        self.conv_layers
            .iter()
            .chain(self.group_layers.iter())
            .find(|layer| layer.name == name)
    }
}

/// 会话上下文：模型、设置、层目录与当前输入的激活。
/// 显式传递，替代原先跨界面共享的全局可变状态。
pub struct Session<'m> {
    model: &'m dyn Model,
    pub settings: Settings,
    catalog: LayerCatalog,
    layer: Option<String>,
    activations: Option<Array4<f32>>,
}

impl<'m> Session<'m> {
    pub fn new(model: &'m dyn Model) -> Result<Self, ModelError> {
        let (width, height) = model.input_size();
        let mut settings = Settings::default();
        settings
            .set_input_size(width, height)
            .map_err(|e| ModelError::Computation(e.to_string()))?;
        Ok(Self {
            model,
            settings,
            catalog: LayerCatalog::scan(model),
            layer: None,
            activations: None,
        })
    }

    pub fn catalog(&self) -> &LayerCatalog {
        &self.catalog
    }

    /// 选择目标层；换层后旧的激活作废
    pub fn select_layer(&mut self, name: &str) -> Result<(), ModelError> {
        if self.catalog.by_name(name).is_none() {
            return Err(ModelError::LayerNotFound(name.to_string()));
        }
        self.layer = Some(name.to_string());
        self.activations = None;
        Ok(())
    }

    pub fn layer(&self) -> Result<&LayerDescriptor, ModelError> {
        let name = self.layer.as_deref().ok_or(ModelError::NoLayerSelected)?;
        self.catalog
            .by_name(name)
            .ok_or_else(|| ModelError::LayerNotFound(name.to_string()))
    }

    pub fn extractor(&self) -> Result<Box<dyn FeatureExtractor>, ModelError> {
        let name = self.layer.as_deref().ok_or(ModelError::NoLayerSelected)?;
        self.model.extractor(name)
    }

    /// 计算当前输入在选定层的激活并缓存
    pub fn update_activations(&mut self, input: &Array4<f32>) -> Result<(), ModelError> {
        let extractor = self.extractor()?;
        self.activations = Some(extractor.forward(input)?);
        Ok(())
    }

    pub fn activations(&self) -> Result<&Array4<f32>, ModelError> {
        self.activations
            .as_ref()
            .ok_or(ModelError::MissingActivations)
    }

    pub fn visualize_filter(&self, filter: usize) -> Result<Array3<u8>, ModelError> {
        let extractor = self.extractor()?;
        viz::visualize(extractor.as_ref(), &Objective::filter(filter), &self.settings)
    }

    /// 按一维神经元序号可视化某filter内的单个神经元
    pub fn visualize_neuron(&self, filter: usize, neuron: usize) -> Result<Array3<u8>, ModelError> {
        let coord = self.layer()?.neuron_coord(neuron);
        let extractor = self.extractor()?;
        viz::visualize(
            extractor.as_ref(),
            &Objective::neuron(filter, coord),
            &self.settings,
        )
    }

    /// 对当前激活做NMF分组
    pub fn generate_groups(&self) -> Result<ActivationGroups, ModelError> {
        let acts = self.activations()?;
        Ok(grouper::group(acts, self.settings.groups()))
    }

    /// 返回空间位置(row, col)处激活最强的前`count`个filter序号，按激活降序
    pub fn top_filters(
        &self,
        row: usize,
        col: usize,
        count: usize,
    ) -> Result<Vec<usize>, ModelError> {
        let acts = self.activations()?;
        let (_, h, w, c) = acts.dim();
        if row >= h || col >= w {
            return Err(ModelError::ShapeMismatch {
                expected: vec![h, w],
                got: vec![row, col],
            });
        }
        let site = acts.slice(s![0, row, col, ..]);
        let mut order: Vec<usize> = (0..c).collect();
        order.sort_by(|&a, &b| {
            site[b]
                .partial_cmp(&site[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order.truncate(count);
        Ok(order)
    }
}
