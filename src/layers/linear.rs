//! Fully connected layer.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use burn::tensor::{Tensor, backend::Backend};

use super::check_input_shape;
use crate::errors::ModelError;
use crate::params::load_tensor;
use crate::runtime::ComputeContext;
use crate::tensor::FeatureShape;

const NAME: &str = "Linear";

#[derive(Debug)]
struct LinearState<B: Backend> {
    input: FeatureShape,
    output: Tensor<B, 4>,
}

/// Dense layer computing `W × x + b` over the flattened input.
///
/// The output is an `(1, out_features, 1, 1)` feature map.
#[derive(Debug)]
pub struct Linear<B: Backend> {
    ctx: Arc<ComputeContext<B>>,
    /// Shape: [out_features, in_features]
    weight: Tensor<B, 2>,
    bias: Tensor<B, 1>,
    state: Option<LinearState<B>>,
}

impl<B: Backend> Linear<B> {
    pub fn new(
        ctx: Arc<ComputeContext<B>>,
        weight: Tensor<B, 2>,
        bias: Tensor<B, 1>,
    ) -> Result<Self, ModelError> {
        let [out_features, _] = weight.dims();
        let [bias_len] = bias.dims();
        if bias_len != out_features {
            return Err(ModelError::InvalidLayerConfig {
                message: format!(
                    "{}: {} output features but {} bias values",
                    NAME, out_features, bias_len
                ),
            });
        }
        Ok(Self {
            ctx,
            weight,
            bias,
            state: None,
        })
    }

    /// Loads weight and bias from parameter files.
    pub fn from_files(
        ctx: Arc<ComputeContext<B>>,
        weight_path: &Path,
        bias_path: &Path,
    ) -> Result<Self, ModelError> {
        let weight = load_tensor::<B, 2>(weight_path, ctx.device())?;
        let bias = load_tensor::<B, 1>(bias_path, ctx.device())?;
        Self::new(ctx, weight, bias)
    }

    /// Returns the input size of this layer.
    pub fn input_size(&self) -> usize {
        self.weight.dims()[1]
    }

    /// Returns the output size of this layer.
    pub fn output_size(&self) -> usize {
        self.weight.dims()[0]
    }

    pub fn is_configured(&self) -> bool {
        self.state.is_some()
    }

    pub fn output(&self) -> Option<&Tensor<B, 4>> {
        self.state.as_ref().map(|s| &s.output)
    }

    pub fn output_shape(&self) -> Option<FeatureShape> {
        self.state.as_ref().map(|s| FeatureShape::of(&s.output))
    }

    pub fn release(&mut self) {
        self.state = None;
    }

    pub fn configure(&mut self, input: FeatureShape) -> Result<FeatureShape, ModelError> {
        self.state = None;
        log::debug!(
            "{}::configure: input shape = {}, W = {:?}, b = {:?}",
            NAME,
            input,
            self.weight.dims(),
            self.bias.dims()
        );

        if input.numel() != self.input_size() {
            return Err(ModelError::shape_mismatch(
                NAME,
                format!(
                    "input {} has {} elements but the layer expects {}",
                    input,
                    input.numel(),
                    self.input_size()
                ),
            ));
        }

        let output_shape = FeatureShape::new(1, self.output_size(), 1, 1);
        self.state = Some(LinearState {
            input,
            output: Tensor::zeros(output_shape.dims(), self.ctx.device()),
        });
        Ok(output_shape)
    }

    /// # Panics
    ///
    /// If the layer is not configured for `input`'s shape.
    pub fn fprop(&mut self, input: &Tensor<B, 4>) -> &Tensor<B, 4> {
        let Some(state) = self.state.as_mut() else {
            panic!("{}::fprop called before configure", NAME);
        };
        check_input_shape(NAME, state.input, input);

        let [out_features, in_features] = self.weight.dims();
        let column = input.clone().reshape([in_features, 1]);
        let bias = self.bias.clone().reshape([out_features, 1]);
        let result = self.weight.clone().matmul(column) + bias;

        state.output = result.reshape([1, out_features, 1, 1]);
        &state.output
    }
}

impl<B: Backend> fmt::Display for Linear<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}x{}", NAME, self.output_size(), self.input_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray;

    fn linear(ctx: &Arc<ComputeContext<TestBackend>>) -> Linear<TestBackend> {
        let device = ctx.device();
        // 2 outputs, 4 inputs
        let weight = Tensor::from_data(
            TensorData::new(vec![1.0f32, 0.0, -1.0, 2.0, 0.5, 0.5, 0.5, 0.5], [2, 4]),
            device,
        );
        let bias = Tensor::from_data(TensorData::new(vec![10.0f32, -1.0], [2]), device);
        Linear::new(ctx.clone(), weight, bias).unwrap()
    }

    #[test]
    fn test_layer_sizes() {
        let ctx = ComputeContext::<TestBackend>::new(Default::default());
        let layer = linear(&ctx);
        assert_eq!(layer.input_size(), 4);
        assert_eq!(layer.output_size(), 2);
        assert_eq!(layer.to_string(), "Linear: 2x4");
    }

    #[test]
    fn test_element_count_mismatch() {
        let ctx = ComputeContext::<TestBackend>::new(Default::default());
        let mut layer = linear(&ctx);

        let err = layer.configure(FeatureShape::new(1, 3, 1, 1)).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
        assert!(layer.output().is_none());
    }

    #[test]
    fn test_forward_adds_bias() {
        let ctx = ComputeContext::<TestBackend>::new(Default::default());
        let mut layer = linear(&ctx);
        // a 1x1x2x2 feature map flattens to the 4 inputs
        let shape = FeatureShape::new(1, 1, 2, 2);
        assert_eq!(
            layer.configure(shape).unwrap(),
            FeatureShape::new(1, 2, 1, 1)
        );

        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], shape.dims()),
            ctx.device(),
        );
        let output = layer.fprop(&input);
        assert_eq!(output.dims(), [1, 2, 1, 1]);

        let values: Vec<f32> = output.to_data().to_vec().unwrap();
        // [1 - 3 + 8 + 10, (1 + 2 + 3 + 4) * 0.5 - 1]
        assert_eq!(values, vec![16.0, 4.0]);
    }

    #[test]
    fn test_bias_length_must_match() {
        let ctx = ComputeContext::<TestBackend>::new(Default::default());
        let weight = Tensor::zeros([3, 4], ctx.device());
        let bias = Tensor::zeros([2], ctx.device());
        assert!(Linear::new(ctx.clone(), weight, bias).is_err());
    }
}
