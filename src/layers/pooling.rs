//! Spatial pooling layer.

use std::fmt;
use std::sync::Arc;

use burn::tensor::module::{avg_pool2d, max_pool2d};
use burn::tensor::{Tensor, backend::Backend};

use super::check_input_shape;
use super::window::{Window, pool_output_size};
use crate::errors::ModelError;
use crate::runtime::{ComputeContext, PoolingDescriptor, PoolingMode, TensorDescriptor, Tracked};
use crate::tensor::FeatureShape;

const NAME: &str = "Pooling";

#[derive(Debug)]
struct PoolingState<B: Backend> {
    pool: Tracked<PoolingDescriptor>,
    input: Tracked<TensorDescriptor>,
    output_desc: Tracked<TensorDescriptor>,
    output: Tensor<B, 4>,
}

/// Max or average pooling over each channel independently.
#[derive(Debug)]
pub struct Pooling<B: Backend> {
    ctx: Arc<ComputeContext<B>>,
    mode: PoolingMode,
    window: Window,
    state: Option<PoolingState<B>>,
}

impl<B: Backend> Pooling<B> {
    /// Creates a pooling layer. Only floor rounding is implemented, so
    /// `ceil_mode` must be false.
    pub fn new(
        ctx: Arc<ComputeContext<B>>,
        mode: PoolingMode,
        window: Window,
        ceil_mode: bool,
    ) -> Result<Self, ModelError> {
        if ceil_mode {
            return Err(ModelError::UnsupportedConfiguration {
                layer: NAME.to_string(),
                message: "ceiling rounding of the output size is not supported".to_string(),
            });
        }
        window.validate(NAME)?;
        if 2 * window.pad_h > window.kh || 2 * window.pad_w > window.kw {
            return Err(ModelError::InvalidLayerConfig {
                message: format!(
                    "{}: padding must be at most half the kernel size ({})",
                    NAME, window
                ),
            });
        }

        Ok(Self {
            ctx,
            mode,
            window,
            state: None,
        })
    }

    pub fn mode(&self) -> PoolingMode {
        self.mode
    }

    pub fn window(&self) -> &Window {
        &self.window
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

        let w = &self.window;
        let out_h = pool_output_size(input.height, w.kh, w.pad_h, w.dh);
        let out_w = pool_output_size(input.width, w.kw, w.pad_w, w.dw);
        let (Some(out_h), Some(out_w)) = (out_h, out_w) else {
            return Err(ModelError::shape_mismatch(
                NAME,
                format!(
                    "{}x{} window is larger than the {}x{} input",
                    w.kw, w.kh, input.width, input.height
                ),
            ));
        };
        let output_shape = FeatureShape::new(input.batch, input.channels, out_h, out_w);

        let ctx = &self.ctx;
        let in_desc = ctx.create_tensor_descriptor(TensorDescriptor::nchw(input));
        let output_desc = ctx.create_tensor_descriptor(TensorDescriptor::nchw(output_shape));
        let pool = ctx.create_pooling_descriptor(PoolingDescriptor {
            mode: self.mode,
            window: w.kernel(),
            padding: w.padding(),
            stride: w.stride(),
        });
        log::debug!(
            "{}::configure: {} -> {} ({})",
            NAME,
            input,
            output_shape,
            self.mode
        );

        self.state = Some(PoolingState {
            pool,
            input: in_desc,
            output_desc,
            output: Tensor::zeros(output_shape.dims(), ctx.device()),
        });
        Ok(output_shape)
    }

    /// Pools `input` into this layer's output.
    ///
    /// # Panics
    ///
    /// If the layer is not configured for `input`'s shape.
    pub fn fprop(&mut self, input: &Tensor<B, 4>) -> &Tensor<B, 4> {
        let Some(state) = self.state.as_mut() else {
            panic!("{}::fprop called before configure", NAME);
        };
        check_input_shape(NAME, state.input.shape, input);

        let PoolingDescriptor {
            mode,
            window,
            padding,
            stride,
        } = *state.pool;
        let x = input.clone();
        state.output = match mode {
            PoolingMode::Max => max_pool2d(x, window, stride, padding, [1, 1]),
            PoolingMode::Avg => avg_pool2d(x, window, stride, padding, true),
        };
        &state.output
    }
}

impl<B: Backend> fmt::Display for Pooling<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}): {}", NAME, self.mode, self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray;

    fn ctx() -> Arc<ComputeContext<TestBackend>> {
        ComputeContext::new(Default::default())
    }

    fn max_pool(ctx: &Arc<ComputeContext<TestBackend>>, window: Window) -> Pooling<TestBackend> {
        Pooling::new(ctx.clone(), PoolingMode::Max, window, false).unwrap()
    }

    #[test]
    fn test_ceil_mode_rejected_before_allocation() {
        let ctx = ctx();
        let window = Window::square(2, 2, 0);
        let err = Pooling::new(ctx.clone(), PoolingMode::Max, window, true).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedConfiguration { .. }));
        assert_eq!(ctx.ledger().live_descriptors(), 0);
    }

    #[test]
    fn test_output_shape_floor_rounding() {
        let ctx = ctx();
        let mut pool = max_pool(&ctx, Window::square(2, 2, 0));
        assert_eq!(
            pool.configure(FeatureShape::new(1, 5, 7, 9)).unwrap(),
            FeatureShape::new(1, 5, 3, 4)
        );

        let mut overlapping = max_pool(&ctx, Window::square(3, 2, 1));
        let input = FeatureShape::new(1, 1, 6, 6);
        let shape = overlapping.configure(input).unwrap();
        assert_eq!(shape, FeatureShape::new(1, 1, 3, 3));
    }

    #[test]
    fn test_window_larger_than_input() {
        let ctx = ctx();
        let mut pool = max_pool(&ctx, Window::new([2, 4], [1, 1], [0, 0]));

        let err = pool.configure(FeatureShape::new(1, 1, 8, 3)).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
        assert!(pool.output().is_none());
        assert_eq!(ctx.ledger().live_descriptors(), 0);
    }

    #[test]
    fn test_excessive_padding_rejected() {
        let window = Window::square(2, 1, 2);
        let err = Pooling::new(ctx(), PoolingMode::Max, window, false).unwrap_err();
        assert!(matches!(err, ModelError::InvalidLayerConfig { .. }));
    }

    #[test]
    fn test_max_and_avg_forward() {
        let ctx = ctx();
        let device = ctx.device().clone();
        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(
                vec![
                    1.0f32, 2.0, 5.0, 6.0, //
                    3.0, 4.0, 7.0, 8.0, //
                    -1.0, -2.0, 0.0, 0.0, //
                    -3.0, -4.0, 0.0, 4.0,
                ],
                [1, 1, 4, 4],
            ),
            &device,
        );
        let shape = FeatureShape::new(1, 1, 4, 4);

        let window = Window::square(2, 2, 0);
        let mut max = max_pool(&ctx, window);
        max.configure(shape).unwrap();
        let out: Vec<f32> = max.fprop(&input).clone().into_data().to_vec().unwrap();
        assert_eq!(out, vec![4.0, 8.0, -1.0, 4.0]);

        let mut avg = Pooling::new(ctx, PoolingMode::Avg, window, false).unwrap();
        avg.configure(shape).unwrap();
        let out: Vec<f32> = avg.fprop(&input).clone().into_data().to_vec().unwrap();
        assert_eq!(out, vec![2.5, 6.5, -2.5, 1.0]);
    }

    #[test]
    fn test_reconfigure_keeps_descriptor_count() {
        let ctx = ctx();
        let mut pool = max_pool(&ctx, Window::square(2, 2, 0));
        pool.configure(FeatureShape::new(1, 3, 8, 8)).unwrap();
        assert_eq!(ctx.ledger().live_descriptors(), 3);
        pool.configure(FeatureShape::new(1, 3, 16, 16)).unwrap();
        assert_eq!(ctx.ledger().live_descriptors(), 3);
        pool.release();
        assert_eq!(ctx.ledger().live_descriptors(), 0);
    }

    #[test]
    #[should_panic(expected = "shape")]
    fn test_fprop_with_wrong_shape_panics() {
        let ctx = ctx();
        let mut pool = max_pool(&ctx, Window::square(2, 2, 0));
        pool.configure(FeatureShape::new(1, 1, 4, 4)).unwrap();
        let input = Tensor::<TestBackend, 4>::zeros([1, 1, 6, 6], ctx.device());
        pool.fprop(&input);
    }

    #[test]
    fn test_display() {
        let pool = max_pool(&ctx(), Window::square(3, 2, 0));
        assert_eq!(
            pool.to_string(),
            "Pooling(MAX): size=3x3, step=2,2, pad=0,0"
        );
    }
}
