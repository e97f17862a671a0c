//! ModelGraph - the ordered chain of layers that makes up a network.
//!
//! A graph is loaded from a JSON model description, configured for one input
//! shape, and then evaluated any number of times on inputs of that shape.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use burn::tensor::{Tensor, backend::Backend};

use crate::description::ModelDescription;
use crate::errors::ModelError;
use crate::factory::create_layer;
use crate::layers::Layer;
use crate::runtime::ComputeContext;
use crate::tensor::{FeatureShape, HostTensor};

/// Shapes recorded by the last successful [`ModelGraph::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Configured {
    input: FeatureShape,
    output: FeatureShape,
}

/// A feed-forward chain of layers sharing one compute context.
#[derive(Debug)]
pub struct ModelGraph<B: Backend> {
    name: String,
    layers: Vec<Layer<B>>,
    /// Position of each layer in the description, counting elided entries.
    positions: Vec<usize>,
    ctx: Arc<ComputeContext<B>>,
    configured: Option<Configured>,
}

impl<B: Backend> ModelGraph<B> {
    /// Loads a model description file and the parameter files it names.
    ///
    /// Parameter file names are resolved relative to the description's
    /// directory.
    pub fn load(path: impl AsRef<Path>, ctx: Arc<ComputeContext<B>>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let desc = ModelDescription::from_file(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_description(&desc, base_dir, ctx)
    }

    /// Builds the layers of an already parsed description, in file order.
    pub fn from_description(
        desc: &ModelDescription,
        base_dir: &Path,
        ctx: Arc<ComputeContext<B>>,
    ) -> Result<Self, ModelError> {
        let mut layers = Vec::with_capacity(desc.layers.len());
        let mut positions = Vec::with_capacity(desc.layers.len());
        for (index, config) in desc.layers.iter().enumerate() {
            match create_layer(config, base_dir, &ctx) {
                Ok(Some(layer)) => {
                    layers.push(layer);
                    positions.push(index);
                }
                Ok(None) => log::debug!("skipping layer {} ({})", index, config.layer_type),
                Err(err) => return Err(ModelError::at_layer(index, err)),
            }
        }
        Self::assemble(desc.model_name.clone(), layers, positions, ctx)
    }

    /// Assembles a graph from layers built by hand.
    pub fn from_layers(
        name: impl Into<String>,
        layers: Vec<Layer<B>>,
        ctx: Arc<ComputeContext<B>>,
    ) -> Result<Self, ModelError> {
        let positions = (0..layers.len()).collect();
        Self::assemble(name.into(), layers, positions, ctx)
    }

    fn assemble(
        name: String,
        layers: Vec<Layer<B>>,
        positions: Vec<usize>,
        ctx: Arc<ComputeContext<B>>,
    ) -> Result<Self, ModelError> {
        if layers.is_empty() {
            return Err(ModelError::NoLayers);
        }
        let graph = Self {
            name,
            layers,
            positions,
            ctx,
            configured: None,
        };
        log::info!("loaded model\n{}", graph);
        Ok(graph)
    }

    /// Threads `input` through every layer's configure.
    ///
    /// On failure every layer is released and the graph is left
    /// unconfigured, whatever state it was in before.
    pub fn configure(&mut self, input: FeatureShape) -> Result<FeatureShape, ModelError> {
        self.configured = None;

        let mut shape = input;
        for (layer, &index) in self.layers.iter_mut().zip(&self.positions) {
            match layer.configure(shape) {
                Ok(next) => {
                    log::debug!("layer {} ({}): {} -> {}", index, layer.kind(), shape, next);
                    shape = next;
                }
                Err(err) => {
                    self.release();
                    return Err(ModelError::at_layer(index, err));
                }
            }
        }

        self.configured = Some(Configured {
            input,
            output: shape,
        });
        log::info!(
            "configured '{}' for input {}: output {}, workspace {} bytes",
            self.name,
            input,
            shape,
            self.ctx.ledger().workspace_bytes()
        );
        Ok(shape)
    }

    /// Runs every layer's forward pass and copies the final output to host
    /// memory.
    ///
    /// # Panics
    ///
    /// If the graph is not configured, or `input` does not have the shape it
    /// was configured for.
    pub fn evaluate(&mut self, input: &Tensor<B, 4>) -> Result<HostTensor, ModelError> {
        let Some(configured) = self.configured else {
            panic!("ModelGraph::evaluate called before configure");
        };
        let actual = FeatureShape::of(input);
        assert!(
            actual == configured.input,
            "ModelGraph::evaluate: input shape {} differs from configured shape {}",
            actual,
            configured.input
        );

        let mut current = input.clone();
        for layer in self.layers.iter_mut() {
            current = layer.fprop(&current).clone();
        }
        HostTensor::from_device(current)
    }

    /// Uploads `input` to the context's device and evaluates it.
    ///
    /// # Panics
    ///
    /// Under the same conditions as [`ModelGraph::evaluate`].
    pub fn evaluate_host(&mut self, input: &HostTensor) -> Result<HostTensor, ModelError> {
        let tensor = input.to_device::<B>(self.ctx.device())?;
        self.evaluate(&tensor)
    }

    /// Drops the shape-dependent state of every layer.
    pub fn release(&mut self) {
        for layer in self.layers.iter_mut() {
            layer.release();
        }
        self.configured = None;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layers(&self) -> &[Layer<B>] {
        &self.layers
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn is_configured(&self) -> bool {
        self.configured.is_some()
    }

    /// Input shape of the last successful configure.
    pub fn input_shape(&self) -> Option<FeatureShape> {
        self.configured.map(|c| c.input)
    }

    /// Output shape of the last successful configure.
    pub fn output_shape(&self) -> Option<FeatureShape> {
        self.configured.map(|c| c.output)
    }

    pub fn context(&self) -> &Arc<ComputeContext<B>> {
        &self.ctx
    }
}

impl<B: Backend> fmt::Display for ModelGraph<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Model '{}' ({} layers)", self.name, self.layers.len())?;
        for (layer, index) in self.layers.iter().zip(&self.positions) {
            write!(f, "\n  [{}] {}", index, layer)?;
        }
        Ok(())
    }
}
