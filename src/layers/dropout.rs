//! Inference-mode dropout.

use std::fmt;

use burn::tensor::{Tensor, backend::Backend};

use super::check_input_shape;
use crate::errors::ModelError;
use crate::tensor::FeatureShape;

#[derive(Debug)]
struct DropoutState<B: Backend> {
    shape: FeatureShape,
    output: Option<Tensor<B, 4>>,
}

/// Deterministic dropout: every element is scaled by `p`.
///
/// In place, like [`super::ActivationLayer`]; holds no backend descriptors.
#[derive(Debug)]
pub struct Dropout<B: Backend> {
    p: f32,
    state: Option<DropoutState<B>>,
}

impl<B: Backend> Dropout<B> {
    pub fn new(p: f32) -> Result<Self, ModelError> {
        if !(0.0..=1.0).contains(&p) {
            return Err(ModelError::InvalidLayerConfig {
                message: format!("Dropout: p must lie in [0, 1], got {}", p),
            });
        }
        Ok(Self { p, state: None })
    }

    pub fn p(&self) -> f32 {
        self.p
    }

    pub fn is_configured(&self) -> bool {
        self.state.is_some()
    }

    pub fn output(&self) -> Option<&Tensor<B, 4>> {
        self.state.as_ref().and_then(|s| s.output.as_ref())
    }

    pub fn output_shape(&self) -> Option<FeatureShape> {
        self.state.as_ref().map(|s| s.shape)
    }

    pub fn release(&mut self) {
        self.state = None;
    }

    pub fn configure(&mut self, input: FeatureShape) -> Result<FeatureShape, ModelError> {
        self.state = Some(DropoutState {
            shape: input,
            output: None,
        });
        Ok(input)
    }

    /// # Panics
    ///
    /// If the layer is not configured for `input`'s shape.
    pub fn fprop(&mut self, input: &Tensor<B, 4>) -> &Tensor<B, 4> {
        let Some(state) = self.state.as_mut() else {
            panic!("Dropout::fprop called before configure");
        };
        check_input_shape("Dropout", state.shape, input);
        state.output.insert(input.clone().mul_scalar(self.p))
    }
}

impl<B: Backend> fmt::Display for Dropout<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dropout: p={:.6}", self.p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray;

    #[test]
    fn test_scales_by_p() {
        let device = <TestBackend as Backend>::Device::default();
        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![2.0f32, -4.0, 0.0, 1.0], [1, 1, 2, 2]),
            &device,
        );
        let mut dropout = Dropout::new(0.5).unwrap();
        assert_eq!(
            dropout.configure(FeatureShape::of(&input)).unwrap(),
            FeatureShape::new(1, 1, 2, 2)
        );

        let first: Vec<f32> = dropout.fprop(&input).to_data().to_vec().unwrap();
        assert_eq!(first, vec![1.0, -2.0, 0.0, 0.5]);

        // no randomness at inference time
        let second: Vec<f32> = dropout.fprop(&input).to_data().to_vec().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_probability() {
        assert!(Dropout::<TestBackend>::new(1.5).is_err());
        assert!(Dropout::<TestBackend>::new(-0.1).is_err());
        assert!(Dropout::<TestBackend>::new(f32::NAN).is_err());
    }

    #[test]
    #[should_panic(expected = "before configure")]
    fn test_fprop_before_configure_panics() {
        let device = <TestBackend as Backend>::Device::default();
        let mut dropout = Dropout::<TestBackend>::new(0.5).unwrap();
        dropout.fprop(&Tensor::zeros([1, 1, 1, 1], &device));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Dropout::<TestBackend>::new(0.5).unwrap().to_string(),
            "Dropout: p=0.500000"
        );
    }
}
