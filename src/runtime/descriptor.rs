//! Backend descriptors: the shape/layout metadata a layer prepares at
//! configure time and hands to the compute kernels at forward time.

use std::fmt;

use crate::tensor::FeatureShape;

/// Element type of device tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    #[default]
    Float32,
}

impl DataType {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::Float32 => 4,
        }
    }
}

/// Describes a packed NCHW feature map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDescriptor {
    pub shape: FeatureShape,
    pub strides: [usize; 4],
    pub dtype: DataType,
}

impl TensorDescriptor {
    pub fn nchw(shape: FeatureShape) -> Self {
        Self {
            shape,
            strides: shape.strides(),
            dtype: DataType::Float32,
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        self.shape.numel() * self.dtype.size_in_bytes()
    }
}

/// Describes a 4-D filter bank (maps × channels × height × width).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescriptor {
    pub maps: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub dtype: DataType,
}

impl FilterDescriptor {
    pub fn new(maps: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            maps,
            channels,
            height,
            width,
            dtype: DataType::Float32,
        }
    }
}

/// Describes a 2-D cross-correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvolutionDescriptor {
    /// `[padH, padW]`
    pub padding: [usize; 2],
    /// `[dH, dW]`
    pub stride: [usize; 2],
    pub dilation: [usize; 2],
}

impl ConvolutionDescriptor {
    pub fn new(padding: [usize; 2], stride: [usize; 2]) -> Self {
        Self {
            padding,
            stride,
            dilation: [1, 1],
        }
    }

    /// Output dims of a forward convolution, computed independently of the
    /// layer's own arithmetic. `None` if the dilated filter does not fit.
    pub fn forward_output_dims(
        &self,
        input: &TensorDescriptor,
        filter: &FilterDescriptor,
    ) -> Option<FeatureShape> {
        let axis = |size: usize, pad: usize, k: usize, stride: usize, dilation: usize| {
            let padded = size + 2 * pad;
            let span = dilation * (k - 1) + 1;
            padded.checked_sub(span).map(|room| room / stride + 1)
        };

        let height = axis(
            input.shape.height,
            self.padding[0],
            filter.height,
            self.stride[0],
            self.dilation[0],
        )?;
        let width = axis(
            input.shape.width,
            self.padding[1],
            filter.width,
            self.stride[1],
            self.dilation[1],
        )?;
        Some(FeatureShape::new(input.shape.batch, filter.maps, height, width))
    }
}

/// Pooling reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingMode {
    Max,
    /// Average including padded positions in the divisor.
    Avg,
}

impl fmt::Display for PoolingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolingMode::Max => write!(f, "MAX"),
            PoolingMode::Avg => write!(f, "AVG"),
        }
    }
}

/// Describes a 2-D pooling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolingDescriptor {
    pub mode: PoolingMode,
    /// `[kH, kW]`
    pub window: [usize; 2],
    /// `[padH, padW]`
    pub padding: [usize; 2],
    /// `[dH, dW]`
    pub stride: [usize; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convolution_output_dims() {
        let input = TensorDescriptor::nchw(FeatureShape::new(1, 3, 8, 8));
        let filter = FilterDescriptor::new(4, 3, 3, 3);

        let same = ConvolutionDescriptor::new([1, 1], [1, 1]);
        assert_eq!(
            same.forward_output_dims(&input, &filter),
            Some(FeatureShape::new(1, 4, 8, 8))
        );

        let halving = ConvolutionDescriptor::new([1, 1], [2, 2]);
        assert_eq!(
            halving.forward_output_dims(&input, &filter),
            Some(FeatureShape::new(1, 4, 4, 4))
        );
    }

    #[test]
    fn test_convolution_filter_larger_than_input() {
        let input = TensorDescriptor::nchw(FeatureShape::new(1, 1, 2, 2));
        let filter = FilterDescriptor::new(1, 1, 5, 5);
        let conv = ConvolutionDescriptor::new([0, 0], [1, 1]);
        assert_eq!(conv.forward_output_dims(&input, &filter), None);
    }

    #[test]
    fn test_tensor_descriptor_bytes() {
        let desc = TensorDescriptor::nchw(FeatureShape::new(1, 2, 3, 4));
        assert_eq!(desc.size_in_bytes(), 96);
        assert_eq!(desc.strides, [24, 12, 4, 1]);
    }
}
