//! Sliding-window geometry shared by convolution and pooling.

use std::fmt;

use crate::errors::ModelError;

/// Kernel size, step and zero padding of a 2-D sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub kw: usize,
    pub kh: usize,
    pub dw: usize,
    pub dh: usize,
    pub pad_w: usize,
    pub pad_h: usize,
}

impl Window {
    pub fn new(kernel: [usize; 2], stride: [usize; 2], padding: [usize; 2]) -> Self {
        Self {
            kh: kernel[0],
            kw: kernel[1],
            dh: stride[0],
            dw: stride[1],
            pad_h: padding[0],
            pad_w: padding[1],
        }
    }

    /// Square window with the same kernel, stride and padding on both axes.
    pub fn square(kernel: usize, stride: usize, padding: usize) -> Self {
        Self::new([kernel, kernel], [stride, stride], [padding, padding])
    }

    /// `[kH, kW]`
    pub fn kernel(&self) -> [usize; 2] {
        [self.kh, self.kw]
    }

    /// `[dH, dW]`
    pub fn stride(&self) -> [usize; 2] {
        [self.dh, self.dw]
    }

    /// `[padH, padW]`
    pub fn padding(&self) -> [usize; 2] {
        [self.pad_h, self.pad_w]
    }

    pub(crate) fn validate(&self, layer: &str) -> Result<(), ModelError> {
        if self.kw == 0 || self.kh == 0 {
            return Err(ModelError::InvalidLayerConfig {
                message: format!(
                    "{}: kernel size must be positive, got {}x{}",
                    layer, self.kw, self.kh
                ),
            });
        }
        if self.dw == 0 || self.dh == 0 {
            return Err(ModelError::InvalidLayerConfig {
                message: format!(
                    "{}: step must be positive, got {},{}",
                    layer, self.dw, self.dh
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "size={}x{}, step={},{}, pad={},{}",
            self.kw, self.kh, self.dw, self.dh, self.pad_w, self.pad_h
        )
    }
}

/// Convolution output extent: `floor((input + 2*pad - kernel) / stride) + 1`.
///
/// `None` when the padded input is smaller than the kernel.
pub fn conv_output_size(input: usize, kernel: usize, pad: usize, stride: usize) -> Option<usize> {
    (input + 2 * pad)
        .checked_sub(kernel)
        .map(|room| room / stride + 1)
}

/// Pooling output extent: `floor((input - kernel + 2*pad) / stride) + 1`.
///
/// Floor rounding only. `None` when the unpadded input is smaller than the
/// kernel.
pub fn pool_output_size(input: usize, kernel: usize, pad: usize, stride: usize) -> Option<usize> {
    if input < kernel {
        return None;
    }
    Some((input - kernel + 2 * pad) / stride + 1)
}
