//! Input samples for evaluation.

use std::path::{Path, PathBuf};

use safetensors::SafeTensors;

use crate::errors::ModelError;
use crate::params::view_to_f32;
use crate::tensor::HostTensor;

/// Name of the sample tensor inside a sample file.
pub const DATA_TENSOR: &str = "data";
/// Metadata key holding a sample's label.
pub const LABEL_KEY: &str = "label";

/// One labelled input, stored height × width × channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub label: String,
    pub data: HostTensor,
}

impl Sample {
    /// The sample as a (1, C, H, W) feature map.
    pub fn to_nchw(&self) -> Result<HostTensor, ModelError> {
        self.data.hwc_to_nchw()
    }
}

/// An indexed collection of samples.
pub trait DataSource {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Result<Sample, ModelError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Samples stored as safetensors files, one sample per file.
#[derive(Debug, Clone)]
pub struct SafetensorsDataSource {
    files: Vec<PathBuf>,
}

impl SafetensorsDataSource {
    /// Opens a single sample file, or every `.safetensors` file in a
    /// directory sorted by file name.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let io_err = |source: std::io::Error| ModelError::Io {
            path: path.to_path_buf(),
            source,
        };

        let files = if path.is_dir() {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(path).map_err(io_err)? {
                let file = entry.map_err(io_err)?.path();
                if file.extension().is_some_and(|ext| ext == "safetensors") {
                    files.push(file);
                }
            }
            files.sort();
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(ModelError::DataSource {
                message: format!("{} is neither a file nor a directory", path.display()),
            });
        };

        log::info!("data source {}: {} item(s)", path.display(), files.len());
        Ok(Self { files })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl DataSource for SafetensorsDataSource {
    fn len(&self) -> usize {
        self.files.len()
    }

    fn get(&self, index: usize) -> Result<Sample, ModelError> {
        let path = self.files.get(index).ok_or_else(|| ModelError::DataSource {
            message: format!(
                "item {} out of range, source has {}",
                index,
                self.files.len()
            ),
        })?;
        read_sample(path)
    }
}

fn read_sample(path: &Path) -> Result<Sample, ModelError> {
    let bytes = std::fs::read(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let bad_file = |message: String| ModelError::DataSource {
        message: format!("{}: {}", path.display(), message),
    };

    let (_, metadata) = SafeTensors::read_metadata(&bytes).map_err(|e| bad_file(e.to_string()))?;
    let tensors = SafeTensors::deserialize(&bytes).map_err(|e| bad_file(e.to_string()))?;
    let view = tensors
        .tensor(DATA_TENSOR)
        .map_err(|_| bad_file(format!("no '{}' tensor", DATA_TENSOR)))?;

    let values = view_to_f32(&view).map_err(bad_file)?;
    let data = HostTensor::new(view.shape().to_vec(), values)?;

    let label = metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get(LABEL_KEY).cloned())
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default();

    log::debug!(
        "read sample '{}' {:?} from {}",
        label,
        data.shape(),
        path.display()
    );
    Ok(Sample { label, data })
}
