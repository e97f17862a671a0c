//! Backend runtime: the shared compute context, descriptors and the ledger
//! that accounts for every shape-dependent resource a layer holds.

mod context;
mod descriptor;
mod ledger;

pub use context::{ComputeContext, ContextConfig, ConvolutionAlgorithm, ConvolutionPreference};
pub use descriptor::{
    ConvolutionDescriptor, DataType, FilterDescriptor, PoolingDescriptor, PoolingMode,
    TensorDescriptor,
};
pub use ledger::{ResourceLedger, Tracked, Workspace};
