//! Spatial convolution (cross-correlation) layer.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use burn::tensor::module::{conv2d, unfold4d};
use burn::tensor::ops::{ConvOptions, UnfoldOptions};
use burn::tensor::{Tensor, backend::Backend};

use super::check_input_shape;
use super::window::{Window, conv_output_size};
use crate::errors::ModelError;
use crate::params::load_tensor;
use crate::runtime::{
    ComputeContext, ConvolutionAlgorithm, ConvolutionDescriptor, FilterDescriptor,
    TensorDescriptor, Tracked, Workspace,
};
use crate::tensor::FeatureShape;

const NAME: &str = "Convolution";

/// Everything a convolution derives from its input shape.
#[derive(Debug)]
struct ConvolutionState<B: Backend> {
    input: Tracked<TensorDescriptor>,
    output_desc: Tracked<TensorDescriptor>,
    filter: Tracked<FilterDescriptor>,
    conv: Tracked<ConvolutionDescriptor>,
    algorithm: ConvolutionAlgorithm,
    workspace: Workspace,
    output: Tensor<B, 4>,
}

/// 2-D convolution with a filter bank of shape `maps × channels × kH × kW`
/// and one bias value per map.
#[derive(Debug)]
pub struct Convolution<B: Backend> {
    ctx: Arc<ComputeContext<B>>,
    window: Window,
    weight: Tensor<B, 4>,
    bias: Tensor<B, 1>,
    state: Option<ConvolutionState<B>>,
}

impl<B: Backend> Convolution<B> {
    /// Creates a convolution from device-resident parameters.
    pub fn new(
        ctx: Arc<ComputeContext<B>>,
        window: Window,
        weight: Tensor<B, 4>,
        bias: Tensor<B, 1>,
    ) -> Result<Self, ModelError> {
        window.validate(NAME)?;

        let [maps, _, kh, kw] = weight.dims();
        if [kh, kw] != window.kernel() {
            return Err(ModelError::InvalidLayerConfig {
                message: format!(
                    "{}: weights have a {}x{} kernel but the layer declares {}x{}",
                    NAME, kw, kh, window.kw, window.kh
                ),
            });
        }
        let [bias_len] = bias.dims();
        if bias_len != maps {
            return Err(ModelError::InvalidLayerConfig {
                message: format!(
                    "{}: {} filter maps but {} bias values",
                    NAME, maps, bias_len
                ),
            });
        }

        Ok(Self {
            ctx,
            window,
            weight,
            bias,
            state: None,
        })
    }

    /// Loads weight and bias from parameter files.
    pub fn from_files(
        ctx: Arc<ComputeContext<B>>,
        window: Window,
        weight_path: &Path,
        bias_path: &Path,
    ) -> Result<Self, ModelError> {
        let weight = load_tensor::<B, 4>(weight_path, ctx.device())?;
        let bias = load_tensor::<B, 1>(bias_path, ctx.device())?;
        Self::new(ctx, window, weight, bias)
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// `[maps, channels, kH, kW]`
    pub fn weight_dims(&self) -> [usize; 4] {
        self.weight.dims()
    }

    /// Algorithm chosen by the last successful configure.
    pub fn algorithm(&self) -> Option<ConvolutionAlgorithm> {
        self.state.as_ref().map(|s| s.algorithm)
    }

    /// Workspace bytes held since the last successful configure.
    pub fn workspace_size(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.workspace.bytes())
    }

    pub fn is_configured(&self) -> bool {
        self.state.is_some()
    }

    pub fn output(&self) -> Option<&Tensor<B, 4>> {
        self.state.as_ref().map(|s| &s.output)
    }

    pub fn output_shape(&self) -> Option<FeatureShape> {
        self.state.as_ref().map(|s| s.output_desc.shape)
    }

    pub fn release(&mut self) {
        self.state = None;
    }

    pub fn configure(&mut self, input: FeatureShape) -> Result<FeatureShape, ModelError> {
        self.state = None;
        log::debug!("{}::configure: input shape = {}", NAME, input);

        let [maps, channels, kh, kw] = self.weight.dims();
        if input.channels != channels {
            return Err(ModelError::shape_mismatch(
                NAME,
                format!(
                    "input has {} channels but filters expect {}",
                    input.channels, channels
                ),
            ));
        }

        let w = &self.window;
        let out_h = conv_output_size(input.height, w.kh, w.pad_h, w.dh);
        let out_w = conv_output_size(input.width, w.kw, w.pad_w, w.dw);
        let (Some(out_h), Some(out_w)) = (out_h, out_w) else {
            return Err(ModelError::shape_mismatch(
                NAME,
                format!(
                    "{}x{} kernel does not fit {}x{} input with padding {},{}",
                    w.kw, w.kh, input.width, input.height, w.pad_w, w.pad_h
                ),
            ));
        };
        let output_shape = FeatureShape::new(input.batch, maps, out_h, out_w);

        let ctx = &self.ctx;
        let in_desc = ctx.create_tensor_descriptor(TensorDescriptor::nchw(input));
        let filter = ctx.create_filter_descriptor(FilterDescriptor::new(maps, channels, kh, kw));
        let conv_desc = ConvolutionDescriptor::new(w.padding(), w.stride());
        let conv = ctx.create_convolution_descriptor(conv_desc);

        let reported = conv.forward_output_dims(&in_desc, &filter);
        if reported != Some(output_shape) {
            return Err(ModelError::shape_mismatch(
                NAME,
                format!(
                    "backend reports output {:?}, expected {}",
                    reported, output_shape
                ),
            ));
        }

        let output_desc = ctx.create_tensor_descriptor(TensorDescriptor::nchw(output_shape));
        let algorithm = ctx.convolution_forward_algorithm(&in_desc, &filter, &conv, &output_desc);
        let ws_size =
            ctx.convolution_forward_workspace_size(&in_desc, &filter, &output_desc, algorithm);
        let workspace = ctx.allocate_workspace(ws_size)?;
        log::debug!(
            "{}::configure: output shape = {}, algo = {}, workspace = {} bytes",
            NAME,
            output_shape,
            algorithm,
            ws_size
        );

        self.state = Some(ConvolutionState {
            input: in_desc,
            output_desc,
            filter,
            conv,
            algorithm,
            workspace,
            output: Tensor::zeros(output_shape.dims(), ctx.device()),
        });
        Ok(output_shape)
    }

    /// Runs the convolution on `input`.
    ///
    /// # Panics
    ///
    /// If the layer is not configured or `input` has a different shape than
    /// the one it was configured for.
    pub fn fprop(&mut self, input: &Tensor<B, 4>) -> &Tensor<B, 4> {
        let Some(state) = self.state.as_mut() else {
            panic!("{}::fprop called before configure", NAME);
        };
        check_input_shape(NAME, state.input.shape, input);

        let conv = &state.conv;
        state.output = match state.algorithm {
            ConvolutionAlgorithm::ImplicitGemm => conv2d(
                input.clone(),
                self.weight.clone(),
                Some(self.bias.clone()),
                ConvOptions::new(conv.stride, conv.padding, conv.dilation, 1),
            ),
            ConvolutionAlgorithm::Gemm => {
                let filter = &state.filter;
                let out = state.output_desc.shape;
                let rows = filter.channels * filter.height * filter.width;

                // [batch, C*kH*kW, outH*outW]
                let columns = unfold4d(
                    input.clone(),
                    [filter.height, filter.width],
                    UnfoldOptions::new(conv.stride, conv.padding, conv.dilation),
                );
                let filters = self
                    .weight
                    .clone()
                    .reshape([1, filter.maps, rows])
                    .expand([out.batch, filter.maps, rows]);
                let bias = self.bias.clone().reshape([1, filter.maps, 1]);

                (filters.matmul(columns) + bias).reshape(out.dims())
            }
        };
        &state.output
    }
}

impl<B: Backend> fmt::Display for Convolution<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}, {:?}", NAME, self.window, self.weight.dims())
    }
}
