//! # convnet
//!
//! A forward-only evaluator for convolutional networks.
//!
//! A model is described by a JSON file listing its layers in order, with
//! each parameterised layer pointing at safetensors files holding its
//! weights. [`ModelGraph`] loads the description, is configured once for an
//! input shape (which sizes every layer's descriptors, workspace and output
//! buffer) and is then evaluated on inputs of that shape.
//!
//! ## Features
//!
//! - **Burn Backend**: tensors run on the Burn `NdArray` backend by default,
//!   or on WGPU with the `wgpu` cargo feature.
//! - **Layers**: convolution, max/average pooling, ReLU/TanH, dropout,
//!   fully connected and (log-)softmax.
//! - **Resource accounting**: descriptors and workspace buffers are counted
//!   by a [`ResourceLedger`] and released when a layer is reconfigured or
//!   dropped.
//!
//! ## Example
//!
//! ```
//! use convnet::prelude::*;
//! use burn::backend::NdArray;
//!
//! type Backend = NdArray;
//!
//! let ctx = ContextConfig::new().init::<Backend>(Default::default());
//! let layers: Vec<Layer<Backend>> = vec![
//!     ActivationLayer::new(ctx.clone(), Activation::Relu).into(),
//!     SoftMax::new(ctx.clone(), SoftMaxMode::Fast).into(),
//! ];
//! let mut model = ModelGraph::from_layers("tiny", layers, ctx).unwrap();
//!
//! model.configure(FeatureShape::new(1, 2, 1, 1)).unwrap();
//! let input = HostTensor::new(vec![1, 2, 1, 1], vec![-1.0, -2.0]).unwrap();
//! let output = model.evaluate_host(&input).unwrap();
//! assert_eq!(output.data(), &[0.5, 0.5]);
//! ```

pub mod data;
pub mod description;
pub mod errors;
pub mod factory;
pub mod layers;
pub mod model_graph;
pub mod params;
pub mod runtime;
pub mod tensor;

// Re-exports for convenience
pub use data::{DataSource, SafetensorsDataSource, Sample};
pub use description::{LayerConfig, ModelDescription};
pub use errors::ModelError;
pub use layers::Layer;
pub use model_graph::ModelGraph;
pub use runtime::{ComputeContext, ContextConfig, ConvolutionPreference, ResourceLedger};
pub use tensor::{FeatureShape, HostTensor};

/// Backend type for inference.
#[cfg(not(feature = "wgpu"))]
pub type InferenceBackend = burn::backend::NdArray;

/// Backend type for inference.
#[cfg(feature = "wgpu")]
pub type InferenceBackend = burn::backend::Wgpu;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::InferenceBackend;
    pub use crate::data::{DataSource, SafetensorsDataSource, Sample};
    pub use crate::errors::ModelError;
    pub use crate::layers::{
        Activation, ActivationLayer, Convolution, Dropout, Layer, Linear, Pooling, PoolingMode,
        SoftMax, SoftMaxMode, Window,
    };
    pub use crate::model_graph::ModelGraph;
    pub use crate::runtime::{ComputeContext, ContextConfig, ConvolutionPreference};
    pub use crate::tensor::{FeatureShape, HostTensor};
}
