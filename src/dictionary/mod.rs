//! 可视化字典：逐层生成、持久化与导入。
//!
//! 一个网络可能有几十层、每层上百个filter，字典因此采用
//! “生成一层→立即落盘→清空内存”的纪律，内存中任意时刻至多保留一层。
//! 磁盘布局：每层一个目录，FILTER目标下为`filter_<i>.png`，
//! NEURON目标下为`filter<i>_neuron<j>.png`；字典根目录有一个`index.json`
//! 索引，逐层增量合并，绝不截断其他层的条目。

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::model::{FeatureExtractor, LayerDescriptor};
use crate::settings::Settings;
use crate::task::TaskContext;
use crate::vision::Vision;
use crate::viz::{self, Objective, Target};


/// 索引文件名（位于字典根目录）
pub const INDEX_FILE: &str = "index.json";

/// 一层的字典条目：FILTER为按filter序号的图像表，
/// NEURON为`[filter][neuron]`的嵌套表
#[derive(Debug, Clone)]
pub enum LayerImages {
    Filters(Vec<RgbImage>),
    Neurons(Vec<Vec<RgbImage>>),
}

/// 索引中单层的记录：图像数，或(filter数, 每filter神经元数)对
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayerEntry {
    Filters(usize),
    Neurons(usize, usize),
}

/// 持久化索引：`{"target": "FILTER"|"NEURON"|"DIRECTION", "layers": {...}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct DictionaryIndex {
    pub target: Target,
    pub layers: BTreeMap<String, LayerEntry>,
}

/// 层名到可视化图像的映射
#[derive(Debug)]
pub struct Dictionary {
    target: Target,
    entries: BTreeMap<String, LayerImages>,
}

impl Dictionary {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            entries: BTreeMap::new(),
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn images(&self, layer: &str) -> Option<&LayerImages> {
        self.entries.get(layer)
    }

    /// 为指定层生成全部可视化并持久化到`dict_path`。
    /// 返回`Ok(true)`表示该层已完整落盘；被取消时返回`Ok(false)`，
    /// 此时不写任何文件、不并入索引（全有或全无）。
    pub fn generate(
        &mut self,
        extractor: &dyn FeatureExtractor,
        layer: &LayerDescriptor,
        settings: &Settings,
        dict_path: &Path,
        task: &TaskContext,
    ) -> Result<bool, StoreError> {
        let images = match self.target {
            Target::Filter => self
                .generate_filters(extractor, layer, settings, task)?
                .map(LayerImages::Filters),
            Target::Neuron => self
                .generate_neurons(extractor, layer, settings, task)?
                .map(LayerImages::Neurons),
            Target::Direction => return Err(StoreError::UnsupportedTarget),
        };
        let Some(images) = images else {
            return Ok(false);
        };

        self.entries.insert(layer.name.clone(), images);
        self.export(dict_path, &layer.name)?;
        // 落盘即清空，控制内存占用
        self.entries.remove(&layer.name);
        Ok(true)
    }

    fn generate_filters(
        &self,
        extractor: &dyn FeatureExtractor,
        layer: &LayerDescriptor,
        settings: &Settings,
        task: &TaskContext,
    ) -> Result<Option<Vec<RgbImage>>, StoreError> {
        let mut images = Vec::with_capacity(layer.filter_count);
        for filter in 0..layer.filter_count {
            if !task.is_running() {
                return Ok(None);
            }
            let array = viz::visualize(extractor, &Objective::filter(filter), settings)?;
            images.push(Vision::to_rgb(&array));
            task.progress(filter + 1);
        }
        Ok(Some(images))
    }

    fn generate_neurons(
        &self,
        extractor: &dyn FeatureExtractor,
        layer: &LayerDescriptor,
        settings: &Settings,
        task: &TaskContext,
    ) -> Result<Option<Vec<Vec<RgbImage>>>, StoreError> {
        let (rows, cols) = layer.neuron_shape;
        let mut all = Vec::with_capacity(layer.filter_count);
        for filter in 0..layer.filter_count {
            let mut neurons = Vec::with_capacity(layer.neuron_count);
            for row in 0..rows {
                for col in 0..cols {
                    if !task.is_running() {
                        return Ok(None);
                    }
                    let array = viz::visualize(
                        extractor,
                        &Objective::neuron(filter, (row, col)),
                        settings,
                    )?;
                    neurons.push(Vision::to_rgb(&array));
                }
            }
            all.push(neurons);
            task.progress(filter + 1);
        }
        Ok(Some(all))
    }

    /// 把内存中该层的条目写入磁盘并合并索引。
    /// 索引文件已存在时只覆盖本层的记录，其余层的条目保持不动。
    fn export(&self, dict_path: &Path, layer: &str) -> Result<(), StoreError> {
        let images = self
            .entries
            .get(layer)
            .ok_or_else(|| StoreError::LayerNotIndexed(layer.to_string()))?;

        let layer_dir = dict_path.join(layer);
        fs::create_dir_all(&layer_dir)?;

        let entry = match images {
            LayerImages::Filters(images) => {
                for (i, image) in images.iter().enumerate() {
                    image.save(layer_dir.join(format!("filter_{i}.png")))?;
                }
                LayerEntry::Filters(images.len())
            }
            LayerImages::Neurons(filters) => {
                for (i, neurons) in filters.iter().enumerate() {
                    for (j, image) in neurons.iter().enumerate() {
                        image.save(layer_dir.join(format!("filter{i}_neuron{j}.png")))?;
                    }
                }
                let per_filter = filters.first().map_or(0, Vec::len);
                LayerEntry::Neurons(filters.len(), per_filter)
            }
        };

        let index_path = dict_path.join(INDEX_FILE);
        let mut index = if index_path.is_file() {
            serde_json::from_str::<DictionaryIndex>(&fs::read_to_string(&index_path)?)?
        } else {
            DictionaryIndex {
                target: self.target,
                layers: BTreeMap::new(),
            }
        };
        index.layers.insert(layer.to_string(), entry);
        fs::write(&index_path, serde_json::to_string(&index)?)?;
        Ok(())
    }

    /// 从磁盘导入指定层的字典：读索引得知目标类型与图像数，
    /// 再按文件名顺序精确加载。索引或图像缺失都是可区分的资源错误。
    /// 导入成功前内存状态不变；成功后内存中只保留这一层。
    pub fn import(&mut self, dict_path: &Path, layer: &str) -> Result<&LayerImages, StoreError> {
        let index_path = dict_path.join(INDEX_FILE);
        if !index_path.is_file() {
            return Err(StoreError::FileNotFound(index_path));
        }
        let index: DictionaryIndex = serde_json::from_str(&fs::read_to_string(&index_path)?)?;
        let entry = index
            .layers
            .get(layer)
            .ok_or_else(|| StoreError::LayerNotIndexed(layer.to_string()))?;
        let layer_dir = dict_path.join(layer);

        let images = match (index.target, entry) {
            (Target::Filter, LayerEntry::Filters(count)) => {
                let mut images = Vec::with_capacity(*count);
                for i in 0..*count {
                    images.push(Vision::load_image(
                        &layer_dir.join(format!("filter_{i}.png")),
                    )?);
                }
                LayerImages::Filters(images)
            }
            (Target::Neuron, LayerEntry::Neurons(filters, neurons)) => {
                let mut all = Vec::with_capacity(*filters);
                for i in 0..*filters {
                    let mut row = Vec::with_capacity(*neurons);
                    for j in 0..*neurons {
                        row.push(Vision::load_image(
                            &layer_dir.join(format!("filter{i}_neuron{j}.png")),
                        )?);
                    }
                    all.push(row);
                }
                LayerImages::Neurons(all)
            }
            (target, entry) => {
                return Err(StoreError::InconsistentIndex(format!(
                    "目标{target:?}与层记录{entry:?}不匹配"
                )));
            }
        };

        self.target = index.target;
        self.entries.clear();
        Ok(self
            .entries
            .entry(layer.to_string())
            .or_insert(images))
    }
}
