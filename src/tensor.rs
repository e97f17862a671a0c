//! Feature-map shapes and host-side tensors.

use std::fmt;

use burn::tensor::{Tensor, TensorData, backend::Backend};

use crate::errors::ModelError;

/// Shape of a 4-D feature map in NCHW order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureShape {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl FeatureShape {
    pub fn new(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            batch,
            channels,
            height,
            width,
        }
    }

    /// Builds a shape from burn's `dims()` array.
    pub fn from_dims(dims: [usize; 4]) -> Self {
        Self::new(dims[0], dims[1], dims[2], dims[3])
    }

    pub fn dims(&self) -> [usize; 4] {
        [self.batch, self.channels, self.height, self.width]
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.batch * self.channels * self.height * self.width
    }

    /// Row-major (packed NCHW) strides, in elements.
    pub fn strides(&self) -> [usize; 4] {
        let w = 1;
        let h = self.width;
        let c = self.height * h;
        let n = self.channels * c;
        [n, c, h, w]
    }

    /// Returns the shape of `tensor`.
    pub fn of<B: Backend>(tensor: &Tensor<B, 4>) -> Self {
        Self::from_dims(tensor.dims())
    }
}

impl fmt::Display for FeatureShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.batch, self.channels, self.height, self.width
        )
    }
}

/// A dense f32 array living in host memory.
///
/// Used at the boundaries of the engine: samples coming from a data source
/// and results handed back from [`crate::ModelGraph::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl HostTensor {
    /// Creates a host tensor, checking that `data` fills `shape` exactly.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ModelError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ModelError::Backend {
                message: format!(
                    "host tensor of shape {:?} needs {} values, got {}",
                    shape,
                    expected,
                    data.len()
                ),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Interprets this tensor as a 4-D feature map.
    pub fn feature_shape(&self) -> Option<FeatureShape> {
        match self.shape.as_slice() {
            &[n, c, h, w] => Some(FeatureShape::new(n, c, h, w)),
            _ => None,
        }
    }

    /// Index of the largest value; ties resolve to the first occurrence.
    pub fn argmax(&self) -> Option<usize> {
        self.data
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
                Some((_, bv)) if bv >= v => best,
                _ => Some((i, v)),
            })
            .map(|(i, _)| i)
    }

    /// Rearranges a height × width × channel array into (1, C, H, W).
    pub fn hwc_to_nchw(&self) -> Result<HostTensor, ModelError> {
        let &[height, width, channels] = self.shape.as_slice() else {
            return Err(ModelError::DataSource {
                message: format!("expected an HxWxC sample, got shape {:?}", self.shape),
            });
        };

        let mut out = vec![0.0f32; self.data.len()];
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    out[(c * height + y) * width + x] = self.data[(y * width + x) * channels + c];
                }
            }
        }
        HostTensor::new(vec![1, channels, height, width], out)
    }

    /// Uploads a 4-D host tensor onto `device`.
    pub fn to_device<B: Backend>(&self, device: &B::Device) -> Result<Tensor<B, 4>, ModelError> {
        let shape = self.feature_shape().ok_or_else(|| ModelError::Backend {
            message: format!("expected a 4-D tensor, got shape {:?}", self.shape),
        })?;
        Ok(Tensor::from_data(TensorData::new(self.data.clone(), shape.dims()), device))
    }

    /// Copies a device tensor back into host memory.
    pub fn from_device<B: Backend, const D: usize>(
        tensor: Tensor<B, D>,
    ) -> Result<HostTensor, ModelError> {
        let shape = tensor.dims().to_vec();
        let data: Vec<f32> = tensor
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| ModelError::Backend {
                message: format!("failed to read tensor back: {:?}", e),
            })?;
        HostTensor::new(shape, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_feature_shape_strides_and_numel() {
        let shape = FeatureShape::new(2, 3, 4, 5);
        assert_eq!(shape.numel(), 120);
        assert_eq!(shape.strides(), [60, 20, 5, 1]);
        assert_eq!(shape.to_string(), "(2, 3, 4, 5)");
    }

    #[test]
    fn test_host_tensor_rejects_wrong_length() {
        assert!(HostTensor::new(vec![2, 2], vec![1.0; 3]).is_err());
    }

    #[test]
    fn test_hwc_to_nchw() {
        // 1x2 image, 2 channels: pixel0 = (1, 10), pixel1 = (2, 20)
        let hwc = HostTensor::new(vec![1, 2, 2], vec![1.0, 10.0, 2.0, 20.0]).unwrap();
        let nchw = hwc.hwc_to_nchw().unwrap();

        assert_eq!(nchw.shape(), &[1, 2, 1, 2]);
        assert_eq!(nchw.data(), &[1.0, 2.0, 10.0, 20.0]);
    }

    #[test]
    fn test_argmax_first_maximum_wins() {
        let t = HostTensor::new(vec![4], vec![0.5, 3.0, 3.0, -1.0]).unwrap();
        assert_eq!(t.argmax(), Some(1));
        assert_eq!(HostTensor::zeros(vec![0]).argmax(), None);
    }

    #[test]
    fn test_device_transfer() {
        let device = <TestBackend as Backend>::Device::default();
        let host = HostTensor::new(vec![1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();

        let tensor = host.to_device::<TestBackend>(&device).unwrap();
        assert_eq!(FeatureShape::of(&tensor), FeatureShape::new(1, 1, 2, 2));

        let back = HostTensor::from_device(tensor).unwrap();
        assert_eq!(back, host);
    }
}
