//! Loading layer parameters from safetensors files.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use burn::tensor::{Tensor, TensorData, backend::Backend};
use bytemuck::{Pod, PodCastError};
use half::{bf16, f16};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use crate::errors::ModelError;

/// Tensor names preferred when a file holds more than one tensor.
const PREFERRED_NAMES: [&str; 3] = ["weight", "bias", "data"];

/// A parameter array read from disk, still in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamArray {
    pub path: PathBuf,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl ParamArray {
    /// Reads the single parameter tensor stored in `path`.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let bytes = std::fs::read(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let invalid = |message: String| ModelError::ParameterFile {
            path: path.to_path_buf(),
            message,
        };

        let tensors = SafeTensors::deserialize(&bytes).map_err(|e| invalid(e.to_string()))?;
        let view =
            select_tensor(&tensors).ok_or_else(|| invalid("file holds no tensors".into()))?;
        let values = view_to_f32(&view).map_err(invalid)?;

        Ok(Self {
            path: path.to_path_buf(),
            shape: view.shape().to_vec(),
            values,
        })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Uploads the array as a rank-`D` tensor, failing if the rank differs.
    pub fn to_device<B: Backend, const D: usize>(
        &self,
        device: &B::Device,
    ) -> Result<Tensor<B, D>, ModelError> {
        if self.rank() != D {
            return Err(ModelError::ParameterFile {
                path: self.path.clone(),
                message: format!("expected a {}-D tensor, found shape {:?}", D, self.shape),
            });
        }
        Ok(Tensor::from_data(
            TensorData::new(self.values.clone(), self.shape.clone()),
            device,
        ))
    }
}

/// Loads `path` as a rank-`D` device tensor.
pub fn load_tensor<B: Backend, const D: usize>(
    path: &Path,
    device: &B::Device,
) -> Result<Tensor<B, D>, ModelError> {
    let array = ParamArray::load(path)?;
    log::debug!("loaded {} with shape {:?}", path.display(), array.shape);
    array.to_device(device)
}

fn select_tensor<'a>(tensors: &'a SafeTensors<'a>) -> Option<TensorView<'a>> {
    let mut all = tensors.tensors();
    all.sort_by(|a, b| a.0.cmp(&b.0));
    let index = PREFERRED_NAMES
        .iter()
        .find_map(|&preferred| all.iter().position(|(name, _)| name.as_str() == preferred))
        .unwrap_or(0);
    if index < all.len() {
        Some(all.swap_remove(index).1)
    } else {
        None
    }
}

/// Reinterprets a payload as `T`, copying only when it is misaligned.
fn cast_slice<T: Pod>(data: &[u8]) -> Result<Cow<'_, [T]>, PodCastError> {
    match bytemuck::try_cast_slice(data) {
        Ok(values) => Ok(Cow::Borrowed(values)),
        Err(PodCastError::TargetAlignmentGreaterAndInputNotAligned) => {
            Ok(Cow::Owned(bytemuck::pod_collect_to_vec(data)))
        }
        Err(e) => Err(e),
    }
}

/// Decodes a tensor payload into f32 values.
pub(crate) fn view_to_f32(view: &TensorView<'_>) -> Result<Vec<f32>, String> {
    let data = view.data();
    let dtype = view.dtype();
    let bad_size = |e: PodCastError| format!("bad {:?} buffer: {:?}", dtype, e);

    let values = match dtype {
        Dtype::F32 => cast_slice::<f32>(data).map_err(bad_size)?.into_owned(),
        Dtype::F64 => cast_slice::<f64>(data)
            .map_err(bad_size)?
            .iter()
            .map(|&v| v as f32)
            .collect(),
        Dtype::F16 => cast_slice::<u16>(data)
            .map_err(bad_size)?
            .iter()
            .map(|&bits| f16::from_bits(bits).to_f32())
            .collect(),
        Dtype::BF16 => cast_slice::<u16>(data)
            .map_err(bad_size)?
            .iter()
            .map(|&bits| bf16::from_bits(bits).to_f32())
            .collect(),
        Dtype::U8 => data.iter().map(|&v| v as f32).collect(),
        other => return Err(format!("unsupported element type {:?}", other)),
    };
    Ok(values)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::path::Path;

    use safetensors::Dtype;
    use safetensors::tensor::{TensorView, serialize};

    /// Writes a safetensors file with one tensor named `name`.
    pub fn write_raw(path: &Path, name: &str, dtype: Dtype, shape: &[usize], bytes: &[u8]) {
        let view = TensorView::new(dtype, shape.to_vec(), bytes).unwrap();
        let mut map = HashMap::new();
        map.insert(name.to_string(), view);
        let serialized = serialize(&map, None).unwrap();
        std::fs::write(path, serialized).unwrap();
    }

    /// Writes a safetensors file with one f32 tensor named `name`.
    pub fn write_f32(path: &Path, name: &str, shape: &[usize], values: &[f32]) {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        write_raw(path, name, Dtype::F32, shape, &bytes);
    }
}
