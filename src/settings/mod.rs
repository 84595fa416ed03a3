//! 可视化设置。
//!
//! 一次可视化运行期间设置不可变；运行之间只能通过带校验的setter修改，
//! 非法数值（学习率≤0、迭代次数为0等）在这里就被拒绝，优化器内部假定输入合法。

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::errors::SettingsError;
use crate::viz::BORDER_CROP;


/// 特征可视化的全部配置项
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    learning_rate: f32,
    iterations: usize,
    scale: usize,
    input_width: usize,
    input_height: usize,
    blur_kernel_size: usize,
    blur: bool,
    decay: bool,
    rotate: bool,
    freq_penalization: bool,
    groups: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            learning_rate: 75.0,
            iterations: 20,
            scale: 1,
            input_width: 224,
            input_height: 224,
            blur_kernel_size: 2,
            blur: true,
            decay: true,
            rotate: true,
            freq_penalization: true,
            groups: 6,
        }
    }
}

impl Settings {
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn scale(&self) -> usize {
        self.scale
    }

    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn input_height(&self) -> usize {
        self.input_height
    }

    pub fn blur_kernel_size(&self) -> usize {
        self.blur_kernel_size
    }

    pub fn blur(&self) -> bool {
        self.blur
    }

    pub fn decay(&self) -> bool {
        self.decay
    }

    pub fn rotate(&self) -> bool {
        self.rotate
    }

    pub fn freq_penalization(&self) -> bool {
        self.freq_penalization
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    /// 解码裁边后的输出宽度
    pub fn cropped_width(&self) -> usize {
        self.input_width - 2 * BORDER_CROP
    }

    /// 解码裁边后的输出高度
    pub fn cropped_height(&self) -> usize {
        self.input_height - 2 * BORDER_CROP
    }
}

// 带校验的setter：配置错误在此边界被拒绝
impl Settings {
    pub fn set_learning_rate(&mut self, learning_rate: f32) -> Result<(), SettingsError> {
        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return Err(SettingsError::InvalidLearningRate);
        }
        self.learning_rate = learning_rate;
        Ok(())
    }

    pub fn set_iterations(&mut self, iterations: usize) -> Result<(), SettingsError> {
        if iterations < 1 {
            return Err(SettingsError::InvalidIterations);
        }
        self.iterations = iterations;
        Ok(())
    }

    pub fn set_scale(&mut self, scale: usize) -> Result<(), SettingsError> {
        if scale < 1 {
            return Err(SettingsError::InvalidScale);
        }
        self.scale = scale;
        Ok(())
    }

    pub fn set_blur_kernel_size(&mut self, ksize: usize) -> Result<(), SettingsError> {
        if ksize < 1 {
            return Err(SettingsError::InvalidKernelSize);
        }
        self.blur_kernel_size = ksize;
        Ok(())
    }

    pub fn set_groups(&mut self, groups: usize) -> Result<(), SettingsError> {
        if groups < 1 {
            return Err(SettingsError::InvalidGroups);
        }
        self.groups = groups;
        Ok(())
    }

    /// 绑定模型的输入尺寸（模型导入时调用一次）。
    /// 宽高必须大于2×裁边宽度，否则解码后的图像为空。
    pub fn set_input_size(&mut self, width: usize, height: usize) -> Result<(), SettingsError> {
        let min = 2 * BORDER_CROP;
        if width <= min || height <= min {
            return Err(SettingsError::InputTooSmall {
                border: BORDER_CROP,
                min,
            });
        }
        self.input_width = width;
        self.input_height = height;
        Ok(())
    }

    pub fn set_blur(&mut self, on: bool) {
        self.blur = on;
    }

    pub fn set_decay(&mut self, on: bool) {
        self.decay = on;
    }

    pub fn set_rotate(&mut self, on: bool) {
        self.rotate = on;
    }

    pub fn set_freq_penalization(&mut self, on: bool) {
        self.freq_penalization = on;
    }
}

// 导入导出：8个`|`分隔字段，顺序即兼容契约
impl Settings {
    /// 导出为单行文本：
    /// `learning_rate|iterations|scale|blur_kernel_size|blur|decay|rotate|freq_penalization`
    pub fn export(&self, path: &Path) -> Result<(), SettingsError> {
        let record = [
            self.learning_rate.to_string(),
            self.iterations.to_string(),
            self.scale.to_string(),
            self.blur_kernel_size.to_string(),
            self.blur.to_string(),
            self.decay.to_string(),
            self.rotate.to_string(),
            self.freq_penalization.to_string(),
        ]
        .join("|");
        fs::write(path, record).map_err(|e| SettingsError::Io(e.to_string()))
    }

    /// 从文件导入设置。
    /// 全部字段解析并校验通过后才会写入self；任何一步失败都保持原设置不变。
    pub fn import(&mut self, path: &Path) -> Result<(), SettingsError> {
        let text = fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
        let fields: Vec<&str> = text.trim().split('|').collect();
        if fields.len() != 8 {
            return Err(SettingsError::FieldCount(fields.len()));
        }

        let mut imported = self.clone();
        imported.set_learning_rate(parse_field(0, fields[0])?)?;
        imported.set_iterations(parse_field(1, fields[1])?)?;
        imported.set_scale(parse_field(2, fields[2])?)?;
        imported.set_blur_kernel_size(parse_field(3, fields[3])?)?;
        imported.set_blur(parse_bool(4, fields[4])?);
        imported.set_decay(parse_bool(5, fields[5])?);
        imported.set_rotate(parse_bool(6, fields[6])?);
        imported.set_freq_penalization(parse_bool(7, fields[7])?);

        *self = imported;
        Ok(())
    }
}

fn parse_field<T: FromStr>(index: usize, value: &str) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::FieldParse {
        index,
        value: value.to_string(),
    })
}

// 布尔字段大小写不敏感（兼容`True`/`False`的旧导出）
fn parse_bool(index: usize, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(SettingsError::FieldParse {
            index,
            value: value.to_string(),
        }),
    }
}
