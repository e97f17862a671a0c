//! Channel-wise softmax.

use std::fmt;
use std::sync::Arc;

use burn::tensor::activation::{log_softmax, softmax};
use burn::tensor::{Tensor, backend::Backend};

use super::check_input_shape;
use crate::errors::ModelError;
use crate::runtime::{ComputeContext, TensorDescriptor, Tracked};
use crate::tensor::FeatureShape;

/// Softmax flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftMaxMode {
    /// Plain softmax.
    Fast,
    /// Log-softmax.
    Log,
}

impl fmt::Display for SoftMaxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftMaxMode::Fast => write!(f, "FAST"),
            SoftMaxMode::Log => write!(f, "LOG"),
        }
    }
}

#[derive(Debug)]
struct SoftMaxState<B: Backend> {
    input: Tracked<TensorDescriptor>,
    output: Option<Tensor<B, 4>>,
}

/// Normalizes over the channel axis at every spatial position. In place.
#[derive(Debug)]
pub struct SoftMax<B: Backend> {
    ctx: Arc<ComputeContext<B>>,
    mode: SoftMaxMode,
    state: Option<SoftMaxState<B>>,
}

impl<B: Backend> SoftMax<B> {
    pub fn new(ctx: Arc<ComputeContext<B>>, mode: SoftMaxMode) -> Self {
        Self {
            ctx,
            mode,
            state: None,
        }
    }

    pub fn mode(&self) -> SoftMaxMode {
        self.mode
    }

    pub fn is_configured(&self) -> bool {
        self.state.is_some()
    }

    pub fn output(&self) -> Option<&Tensor<B, 4>> {
        self.state.as_ref().and_then(|s| s.output.as_ref())
    }

    pub fn output_shape(&self) -> Option<FeatureShape> {
        self.state.as_ref().map(|s| s.input.shape)
    }

    pub fn release(&mut self) {
        self.state = None;
    }

    pub fn configure(&mut self, input: FeatureShape) -> Result<FeatureShape, ModelError> {
        self.state = None;
        log::debug!("SoftMax::configure: input shape = {}", input);
        let desc = TensorDescriptor::nchw(input);
        self.state = Some(SoftMaxState {
            input: self.ctx.create_tensor_descriptor(desc),
            output: None,
        });
        Ok(input)
    }

    /// # Panics
    ///
    /// If the layer is not configured for `input`'s shape.
    pub fn fprop(&mut self, input: &Tensor<B, 4>) -> &Tensor<B, 4> {
        let Some(state) = self.state.as_mut() else {
            panic!("SoftMax::fprop called before configure");
        };
        check_input_shape("SoftMax", state.input.shape, input);

        let result = match self.mode {
            SoftMaxMode::Fast => softmax(input.clone(), 1),
            SoftMaxMode::Log => log_softmax(input.clone(), 1),
        };
        state.output.insert(result)
    }
}

impl<B: Backend> fmt::Display for SoftMax<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SoftMax: {}", self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray;

    fn closed_form_log_softmax(logits: &[f32]) -> Vec<f32> {
        let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let sum: f32 = logits.iter().map(|x| (x - max).exp()).sum();
        logits.iter().map(|x| x - max - sum.ln()).collect()
    }

    #[test]
    fn test_log_softmax_matches_closed_form() {
        let device = <TestBackend as Backend>::Device::default();
        let ctx = ComputeContext::<TestBackend>::new(device.clone());
        let logits = vec![1.0f32, 2.0, 3.0, -1.0, 0.5];
        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(logits.clone(), [1, 5, 1, 1]),
            &device,
        );

        let mut layer = SoftMax::new(ctx, SoftMaxMode::Log);
        layer.configure(FeatureShape::of(&input)).unwrap();
        let result: Vec<f32> = layer.fprop(&input).to_data().to_vec().unwrap();

        for (got, want) in result.iter().zip(closed_form_log_softmax(&logits)) {
            assert!((got - want).abs() < 1e-5, "got {} want {}", got, want);
        }
    }

    #[test]
    fn test_softmax_normalizes_each_position_over_channels() {
        let device = <TestBackend as Backend>::Device::default();
        let ctx = ComputeContext::<TestBackend>::new(device.clone());
        // 3 channels, 1x2 spatial
        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.0f32, 5.0, 1.0, 5.0, 2.0, 5.0], [1, 3, 1, 2]),
            &device,
        );

        let mut layer = SoftMax::new(ctx, SoftMaxMode::Fast);
        layer.configure(FeatureShape::of(&input)).unwrap();
        let result: Vec<f32> = layer.fprop(&input).to_data().to_vec().unwrap();

        // column 0: logits 0, 1, 2; column 1: all equal
        let col0: f32 = result[0] + result[2] + result[4];
        assert!((col0 - 1.0).abs() < 1e-5);
        for v in [result[1], result[3], result[5]] {
            assert!((v - 1.0 / 3.0).abs() < 1e-5);
        }
        assert!(result[4] > result[2] && result[2] > result[0]);
    }

    #[test]
    fn test_shape_passes_through() {
        let ctx = ComputeContext::<TestBackend>::new(Default::default());
        let mut layer = SoftMax::new(ctx, SoftMaxMode::Log);
        let shape = FeatureShape::new(1, 10, 1, 1);
        assert_eq!(layer.configure(shape).unwrap(), shape);
        assert_eq!(layer.to_string(), "SoftMax: LOG");
    }
}
