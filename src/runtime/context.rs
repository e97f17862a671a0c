//! The compute context shared by every layer of a model.

use std::fmt;
use std::sync::Arc;

use burn::tensor::backend::Backend;

use super::descriptor::{
    ConvolutionDescriptor, DataType, FilterDescriptor, PoolingDescriptor, TensorDescriptor,
};
use super::ledger::{ResourceLedger, Tracked, Workspace};
use crate::errors::ModelError;

/// How a convolution picks its forward algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvolutionPreference {
    /// Fastest algorithm regardless of workspace size.
    #[default]
    PreferFastest,
    /// Never use a workspace.
    NoWorkspace,
    /// Fastest algorithm whose workspace fits in the given number of bytes.
    WorkspaceLimit(usize),
}

/// Forward convolution algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvolutionAlgorithm {
    /// Direct convolution by the backend, no workspace.
    ImplicitGemm,
    /// Explicit im2col into a workspace followed by a single matrix product.
    Gemm,
}

impl fmt::Display for ConvolutionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvolutionAlgorithm::ImplicitGemm => write!(f, "IMPLICIT_GEMM"),
            ConvolutionAlgorithm::Gemm => write!(f, "GEMM"),
        }
    }
}

/// Configuration for a [`ComputeContext`].
#[derive(Debug, Clone, Default)]
pub struct ContextConfig {
    /// Algorithm selection policy for convolutions.
    pub convolution_preference: ConvolutionPreference,
    /// Upper bound on the total workspace bytes reserved at once.
    pub memory_limit: Option<usize>,
}

impl ContextConfig {
    /// Creates a new ContextConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the convolution algorithm preference.
    pub fn convolution_preference(mut self, preference: ConvolutionPreference) -> Self {
        self.convolution_preference = preference;
        self
    }

    /// Sets the device memory budget for workspaces.
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Builds the context on `device`.
    pub fn init<B: Backend>(self, device: B::Device) -> Arc<ComputeContext<B>> {
        Arc::new(ComputeContext {
            device,
            ledger: ResourceLedger::new(),
            config: self,
        })
    }
}

/// Backend handle shared by all layers of one model.
///
/// Holds the device tensors are placed on and the ledger every descriptor
/// and workspace is counted against.
#[derive(Debug)]
pub struct ComputeContext<B: Backend> {
    device: B::Device,
    ledger: ResourceLedger,
    config: ContextConfig,
}

impl<B: Backend> ComputeContext<B> {
    /// Context on `device` with default configuration.
    pub fn new(device: B::Device) -> Arc<Self> {
        ContextConfig::default().init(device)
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn create_tensor_descriptor(&self, desc: TensorDescriptor) -> Tracked<TensorDescriptor> {
        self.ledger.track(desc)
    }

    pub fn create_filter_descriptor(&self, desc: FilterDescriptor) -> Tracked<FilterDescriptor> {
        self.ledger.track(desc)
    }

    pub fn create_convolution_descriptor(
        &self,
        desc: ConvolutionDescriptor,
    ) -> Tracked<ConvolutionDescriptor> {
        self.ledger.track(desc)
    }

    pub fn create_pooling_descriptor(&self, desc: PoolingDescriptor) -> Tracked<PoolingDescriptor> {
        self.ledger.track(desc)
    }

    /// Picks a forward algorithm under the configured preference.
    pub fn convolution_forward_algorithm(
        &self,
        input: &TensorDescriptor,
        filter: &FilterDescriptor,
        conv: &ConvolutionDescriptor,
        output: &TensorDescriptor,
    ) -> ConvolutionAlgorithm {
        let pointwise = filter.height == 1
            && filter.width == 1
            && conv.stride == [1, 1]
            && conv.padding == [0, 0];
        if pointwise {
            return ConvolutionAlgorithm::ImplicitGemm;
        }

        match self.config.convolution_preference {
            ConvolutionPreference::PreferFastest => ConvolutionAlgorithm::Gemm,
            ConvolutionPreference::NoWorkspace => ConvolutionAlgorithm::ImplicitGemm,
            ConvolutionPreference::WorkspaceLimit(limit) => {
                let needed = self.convolution_forward_workspace_size(
                    input,
                    filter,
                    output,
                    ConvolutionAlgorithm::Gemm,
                );
                if needed <= limit {
                    ConvolutionAlgorithm::Gemm
                } else {
                    ConvolutionAlgorithm::ImplicitGemm
                }
            }
        }
    }

    /// Workspace bytes `algorithm` needs for this convolution.
    pub fn convolution_forward_workspace_size(
        &self,
        input: &TensorDescriptor,
        filter: &FilterDescriptor,
        output: &TensorDescriptor,
        algorithm: ConvolutionAlgorithm,
    ) -> usize {
        match algorithm {
            ConvolutionAlgorithm::ImplicitGemm => 0,
            ConvolutionAlgorithm::Gemm => {
                // one column of C*kH*kW values per output position
                let rows = filter.channels * filter.height * filter.width;
                let columns = output.shape.height * output.shape.width;
                input.shape.batch * rows * columns * DataType::Float32.size_in_bytes()
            }
        }
    }

    /// Reserves workspace memory, counted against the memory limit.
    pub fn allocate_workspace(&self, bytes: usize) -> Result<Workspace, ModelError> {
        self.ledger.reserve(bytes, self.config.memory_limit)
    }
}
