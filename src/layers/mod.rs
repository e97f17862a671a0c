//! Neural network layer implementations.
//!
//! Every layer follows the same two-phase protocol:
//!
//! 1. `configure(input_shape)` derives the output shape and builds the
//!    layer's shape-dependent state (descriptors, workspace, output tensor),
//!    replacing whatever a previous call built. A failed call leaves the
//!    layer unconfigured.
//! 2. `fprop(input)` runs the forward computation into the layer's own
//!    output tensor. Calling it on an unconfigured layer, or with an input
//!    of a different shape, panics.

pub mod activation;
pub mod convolution;
pub mod dropout;
pub mod linear;
pub mod pooling;
pub mod softmax;
pub mod window;

use std::fmt;

use burn::tensor::{Tensor, backend::Backend};

pub use crate::runtime::PoolingMode;
pub use activation::{Activation, ActivationLayer};
pub use convolution::Convolution;
pub use dropout::Dropout;
pub use linear::Linear;
pub use pooling::Pooling;
pub use softmax::{SoftMax, SoftMaxMode};
pub use window::Window;

use crate::errors::ModelError;
use crate::tensor::FeatureShape;

/// One stage of a model.
#[derive(Debug)]
pub enum Layer<B: Backend> {
    Convolution(Convolution<B>),
    Pooling(Pooling<B>),
    Activation(ActivationLayer<B>),
    Dropout(Dropout<B>),
    Linear(Linear<B>),
    SoftMax(SoftMax<B>),
}

macro_rules! dispatch {
    ($self:expr, $layer:ident => $body:expr) => {
        match $self {
            Layer::Convolution($layer) => $body,
            Layer::Pooling($layer) => $body,
            Layer::Activation($layer) => $body,
            Layer::Dropout($layer) => $body,
            Layer::Linear($layer) => $body,
            Layer::SoftMax($layer) => $body,
        }
    };
}

impl<B: Backend> Layer<B> {
    /// Short name of the layer kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Convolution(_) => "Convolution",
            Layer::Pooling(_) => "Pooling",
            Layer::Activation(_) => "Activation",
            Layer::Dropout(_) => "Dropout",
            Layer::Linear(_) => "Linear",
            Layer::SoftMax(_) => "SoftMax",
        }
    }

    /// Derives the output shape for `input` and rebuilds shape-dependent state.
    pub fn configure(&mut self, input: FeatureShape) -> Result<FeatureShape, ModelError> {
        dispatch!(self, layer => layer.configure(input))
    }

    /// Runs the forward computation and returns this layer's output.
    ///
    /// # Panics
    ///
    /// If the layer is not configured for `input`'s shape.
    pub fn fprop(&mut self, input: &Tensor<B, 4>) -> &Tensor<B, 4> {
        dispatch!(self, layer => layer.fprop(input))
    }

    /// The output of the last forward pass, or the zero-filled buffer
    /// allocated by `configure` for layers that are not in place.
    pub fn output(&self) -> Option<&Tensor<B, 4>> {
        dispatch!(self, layer => layer.output())
    }

    /// Output shape from the last successful configure.
    pub fn output_shape(&self) -> Option<FeatureShape> {
        dispatch!(self, layer => layer.output_shape())
    }

    pub fn is_configured(&self) -> bool {
        dispatch!(self, layer => layer.is_configured())
    }

    /// Drops all shape-dependent state.
    pub fn release(&mut self) {
        dispatch!(self, layer => layer.release())
    }

    /// Whether the output has the input's shape and is computed from a
    /// shared reference to the predecessor's output.
    pub fn is_in_place(&self) -> bool {
        matches!(
            self,
            Layer::Activation(_) | Layer::Dropout(_) | Layer::SoftMax(_)
        )
    }
}

impl<B: Backend> fmt::Display for Layer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch!(self, layer => fmt::Display::fmt(layer, f))
    }
}

impl<B: Backend> From<Convolution<B>> for Layer<B> {
    fn from(layer: Convolution<B>) -> Self {
        Layer::Convolution(layer)
    }
}

impl<B: Backend> From<Pooling<B>> for Layer<B> {
    fn from(layer: Pooling<B>) -> Self {
        Layer::Pooling(layer)
    }
}

impl<B: Backend> From<ActivationLayer<B>> for Layer<B> {
    fn from(layer: ActivationLayer<B>) -> Self {
        Layer::Activation(layer)
    }
}

impl<B: Backend> From<Dropout<B>> for Layer<B> {
    fn from(layer: Dropout<B>) -> Self {
        Layer::Dropout(layer)
    }
}

impl<B: Backend> From<Linear<B>> for Layer<B> {
    fn from(layer: Linear<B>) -> Self {
        Layer::Linear(layer)
    }
}

impl<B: Backend> From<SoftMax<B>> for Layer<B> {
    fn from(layer: SoftMax<B>) -> Self {
        Layer::SoftMax(layer)
    }
}

/// Panics unless `input` has the shape the layer was configured for.
pub(crate) fn check_input_shape<B: Backend>(
    layer: &str,
    configured: FeatureShape,
    input: &Tensor<B, 4>,
) {
    let actual = FeatureShape::of(input);
    assert!(
        actual == configured,
        "{}::fprop: input shape {} differs from configured shape {}; call configure first",
        layer,
        actual,
        configured
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ComputeContext;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_dispatch_through_enum() {
        let ctx = ComputeContext::<TestBackend>::new(Default::default());
        let window = Window::square(2, 2, 0);
        let mut layers: Vec<Layer<TestBackend>> = vec![
            Pooling::new(ctx.clone(), PoolingMode::Max, window, false)
                .unwrap()
                .into(),
            ActivationLayer::new(ctx.clone(), Activation::Relu).into(),
            Dropout::new(0.5).unwrap().into(),
            SoftMax::new(ctx.clone(), SoftMaxMode::Log).into(),
        ];

        let mut shape = FeatureShape::new(1, 3, 8, 8);
        for layer in layers.iter_mut() {
            assert!(!layer.is_configured());
            shape = layer.configure(shape).unwrap();
            assert!(layer.is_configured());
            assert_eq!(layer.output_shape(), Some(shape));
        }
        assert_eq!(shape, FeatureShape::new(1, 3, 4, 4));

        let kinds: Vec<&str> = layers.iter().map(|l| l.kind()).collect();
        assert_eq!(kinds, vec!["Pooling", "Activation", "Dropout", "SoftMax"]);
        assert!(!layers[0].is_in_place());
        assert!(layers[1..].iter().all(|l| l.is_in_place()));

        for layer in layers.iter_mut() {
            layer.release();
            assert!(!layer.is_configured());
        }
        assert_eq!(ctx.ledger().live_descriptors(), 0);
    }

    #[test]
    #[should_panic(expected = "differs from configured shape")]
    fn test_check_input_shape_panics_on_mismatch() {
        let device = <TestBackend as Backend>::Device::default();
        let input = Tensor::<TestBackend, 4>::zeros([1, 2, 3, 3], &device);
        check_input_shape("Test", FeatureShape::new(1, 2, 4, 4), &input);
    }
}
