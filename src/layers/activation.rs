//! Element-wise activation functions and the layer applying them.

use std::fmt;
use std::sync::Arc;

use burn::tensor::{Tensor, backend::Backend};

use super::check_input_shape;
use crate::errors::ModelError;
use crate::runtime::{ComputeContext, TensorDescriptor, Tracked};
use crate::tensor::FeatureShape;

/// Supported activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Rectified Linear Unit: f(x) = max(0, x)
    Relu,
    /// Hyperbolic tangent: f(x) = tanh(x)
    Tanh,
}

impl Activation {
    /// Applies the activation function to a tensor.
    pub fn apply<B: Backend, const D: usize>(&self, tensor: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => burn::tensor::activation::relu(tensor),
            Activation::Tanh => burn::tensor::activation::tanh(tensor),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::Relu => write!(f, "ReLU"),
            Activation::Tanh => write!(f, "TanH"),
        }
    }
}

#[derive(Debug)]
struct ActivationState<B: Backend> {
    inout: Tracked<TensorDescriptor>,
    output: Option<Tensor<B, 4>>,
}

/// Applies an [`Activation`] element-wise.
///
/// Works in place: the output has the input's shape and nothing is
/// allocated at configure time. The result is written to a tensor owned by
/// this layer; the predecessor's output is left untouched.
#[derive(Debug)]
pub struct ActivationLayer<B: Backend> {
    ctx: Arc<ComputeContext<B>>,
    func: Activation,
    state: Option<ActivationState<B>>,
}

impl<B: Backend> ActivationLayer<B> {
    pub fn new(ctx: Arc<ComputeContext<B>>, func: Activation) -> Self {
        Self {
            ctx,
            func,
            state: None,
        }
    }

    pub fn function(&self) -> Activation {
        self.func
    }

    pub fn is_configured(&self) -> bool {
        self.state.is_some()
    }

    pub fn output(&self) -> Option<&Tensor<B, 4>> {
        self.state.as_ref().and_then(|s| s.output.as_ref())
    }

    pub fn output_shape(&self) -> Option<FeatureShape> {
        self.state.as_ref().map(|s| s.inout.shape)
    }

    pub fn release(&mut self) {
        self.state = None;
    }

    pub fn configure(&mut self, input: FeatureShape) -> Result<FeatureShape, ModelError> {
        self.state = None;
        let desc = TensorDescriptor::nchw(input);
        self.state = Some(ActivationState {
            inout: self.ctx.create_tensor_descriptor(desc),
            output: None,
        });
        Ok(input)
    }

    /// # Panics
    ///
    /// If the layer is not configured for `input`'s shape.
    pub fn fprop(&mut self, input: &Tensor<B, 4>) -> &Tensor<B, 4> {
        let Some(state) = self.state.as_mut() else {
            panic!("Activation::fprop called before configure");
        };
        check_input_shape("Activation", state.inout.shape, input);
        state.output.insert(self.func.apply(input.clone()))
    }
}

impl<B: Backend> fmt::Display for ActivationLayer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Activation: {}", self.func)
    }
}
