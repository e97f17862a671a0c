//! The JSON model description format.
//!
//! ```json
//! {
//!   "modelName": "lenet",
//!   "layers": [
//!     { "type": "SpatialConvolution", "kW": 5, "kH": 5, "dW": 1, "dH": 1,
//!       "padW": 0, "padH": 0, "parameterFiles": ["conv1_w.safetensors", "conv1_b.safetensors"] },
//!     { "type": "ReLU" },
//!     { "type": "SpatialMaxPooling", "kW": 2, "kH": 2, "dW": 2, "dH": 2,
//!       "padW": 0, "padH": 0, "ceil_mode": false },
//!     { "type": "View" },
//!     { "type": "Linear", "parameterFiles": ["fc_w.safetensors", "fc_b.safetensors"] },
//!     { "type": "LogSoftMax" }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::errors::ModelError;

/// A parsed model description.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescription {
    pub model_name: String,
    pub layers: Vec<LayerConfig>,
}

impl ModelDescription {
    /// Reads and parses a description file.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ModelError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// One entry of the `layers` array. Which fields are required depends on
/// `layer_type`; unknown fields are kept in `extra`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LayerConfig {
    #[serde(rename = "type")]
    pub layer_type: String,
    #[serde(rename = "kW")]
    pub kw: Option<usize>,
    #[serde(rename = "kH")]
    pub kh: Option<usize>,
    #[serde(rename = "dW")]
    pub dw: Option<usize>,
    #[serde(rename = "dH")]
    pub dh: Option<usize>,
    #[serde(rename = "padW")]
    pub pad_w: Option<usize>,
    #[serde(rename = "padH")]
    pub pad_h: Option<usize>,
    #[serde(rename = "parameterFiles")]
    pub parameter_files: Option<Vec<String>>,
    pub p: Option<f32>,
    pub ceil_mode: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LayerConfig {
    pub fn new(layer_type: impl Into<String>) -> Self {
        Self {
            layer_type: layer_type.into(),
            ..Default::default()
        }
    }

    /// Sets `kW,kH,dW,dH,padW,padH` from square values.
    pub fn with_window(mut self, kernel: usize, stride: usize, padding: usize) -> Self {
        self.kw = Some(kernel);
        self.kh = Some(kernel);
        self.dw = Some(stride);
        self.dh = Some(stride);
        self.pad_w = Some(padding);
        self.pad_h = Some(padding);
        self
    }

    pub fn with_parameter_files(mut self, weight: &str, bias: &str) -> Self {
        self.parameter_files = Some(vec![weight.to_string(), bias.to_string()]);
        self
    }

    pub fn with_p(mut self, p: f32) -> Self {
        self.p = Some(p);
        self
    }

    pub fn with_ceil_mode(mut self, ceil_mode: bool) -> Self {
        self.ceil_mode = Some(ceil_mode);
        self
    }

    pub(crate) fn require<T: Copy>(
        &self,
        value: Option<T>,
        field: &'static str,
    ) -> Result<T, ModelError> {
        value.ok_or_else(|| ModelError::MissingField {
            layer_type: self.layer_type.clone(),
            field,
        })
    }
}
