//! Turning [`LayerConfig`] records into layers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::tensor::backend::Backend;

use crate::description::LayerConfig;
use crate::errors::ModelError;
use crate::layers::{
    Activation, ActivationLayer, Convolution, Dropout, Layer, Linear, Pooling, PoolingMode,
    SoftMax, SoftMaxMode, Window,
};
use crate::runtime::ComputeContext;

/// What a layer type tag resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Convolution,
    Pooling(PoolingMode),
    Activation(Activation),
    Dropout,
    Linear,
    SoftMax(SoftMaxMode),
    /// Reshapes carry no computation here; tensors are reshaped on demand.
    Reshape,
}

impl LayerKind {
    /// Resolves a model-file type tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag {
            "SpatialConvolution" | "SpatialConvolutionMM" => LayerKind::Convolution,
            "ReLU" | "Threshold" => LayerKind::Activation(Activation::Relu),
            "Tanh" => LayerKind::Activation(Activation::Tanh),
            "SpatialMaxPooling" => LayerKind::Pooling(PoolingMode::Max),
            "SpatialAveragePooling" => LayerKind::Pooling(PoolingMode::Avg),
            "Dropout" => LayerKind::Dropout,
            "Linear" => LayerKind::Linear,
            "LogSoftMax" => LayerKind::SoftMax(SoftMaxMode::Log),
            "SoftMax" => LayerKind::SoftMax(SoftMaxMode::Fast),
            "View" | "Reshape" => LayerKind::Reshape,
            _ => return None,
        };
        Some(kind)
    }
}

/// Builds the layer described by `config`.
///
/// Returns `Ok(None)` for reshape layers, which are dropped from the graph.
/// Parameter file names are resolved against `base_dir`.
pub fn create_layer<B: Backend>(
    config: &LayerConfig,
    base_dir: &Path,
    ctx: &Arc<ComputeContext<B>>,
) -> Result<Option<Layer<B>>, ModelError> {
    let Some(kind) = LayerKind::from_tag(&config.layer_type) else {
        return Err(ModelError::UnsupportedLayerType {
            layer_type: config.layer_type.clone(),
        });
    };

    let layer = match kind {
        LayerKind::Convolution => {
            let window = window(config)?;
            let (weight, bias) = parameter_files(config, base_dir)?;
            Convolution::from_files(ctx.clone(), window, &weight, &bias)?.into()
        }
        LayerKind::Pooling(mode) => {
            let ceil_mode = config.ceil_mode.unwrap_or(false);
            Pooling::new(ctx.clone(), mode, window(config)?, ceil_mode)?.into()
        }
        LayerKind::Activation(func) => ActivationLayer::new(ctx.clone(), func).into(),
        LayerKind::Dropout => Dropout::new(config.require(config.p, "p")?)?.into(),
        LayerKind::Linear => {
            let (weight, bias) = parameter_files(config, base_dir)?;
            Linear::from_files(ctx.clone(), &weight, &bias)?.into()
        }
        LayerKind::SoftMax(mode) => SoftMax::new(ctx.clone(), mode).into(),
        LayerKind::Reshape => return Ok(None),
    };
    Ok(Some(layer))
}

fn window(config: &LayerConfig) -> Result<Window, ModelError> {
    Ok(Window {
        kw: config.require(config.kw, "kW")?,
        kh: config.require(config.kh, "kH")?,
        dw: config.require(config.dw, "dW")?,
        dh: config.require(config.dh, "dH")?,
        pad_w: config.require(config.pad_w, "padW")?,
        pad_h: config.require(config.pad_h, "padH")?,
    })
}

fn parameter_files(
    config: &LayerConfig,
    base_dir: &Path,
) -> Result<(PathBuf, PathBuf), ModelError> {
    match config.parameter_files.as_deref() {
        Some([weight, bias]) => Ok((base_dir.join(weight), base_dir.join(bias))),
        Some(other) => Err(ModelError::InvalidLayerConfig {
            message: format!(
                "{}: parameterFiles must list a weight and a bias file, got {} entries",
                config.layer_type,
                other.len()
            ),
        }),
        None => Err(ModelError::MissingField {
            layer_type: config.layer_type.clone(),
            field: "parameterFiles",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::test_support::write_f32;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn ctx() -> Arc<ComputeContext<TestBackend>> {
        ComputeContext::new(Default::default())
    }

    #[test]
    fn test_tag_resolution() {
        assert_eq!(
            LayerKind::from_tag("SpatialConvolution"),
            Some(LayerKind::Convolution)
        );
        assert_eq!(
            LayerKind::from_tag("Threshold"),
            Some(LayerKind::Activation(Activation::Relu))
        );
        assert_eq!(
            LayerKind::from_tag("LogSoftMax"),
            Some(LayerKind::SoftMax(SoftMaxMode::Log))
        );
        assert_eq!(LayerKind::from_tag("View"), Some(LayerKind::Reshape));
        assert_eq!(LayerKind::from_tag("BatchNormalization"), None);
    }

    #[test]
    fn test_unsupported_type_fails() {
        let config = LayerConfig::new("LSTM");
        let err = create_layer(&config, Path::new("."), &ctx()).unwrap_err();
        assert!(matches!(
            err,
            ModelError::UnsupportedLayerType { ref layer_type } if layer_type == "LSTM"
        ));
    }

    #[test]
    fn test_view_is_elided() {
        let layer = create_layer(&LayerConfig::new("View"), Path::new("."), &ctx()).unwrap();
        assert!(layer.is_none());
    }

    #[test]
    fn test_pooling_requires_window_fields() {
        let mut config = LayerConfig::new("SpatialMaxPooling").with_window(2, 2, 0);
        config.pad_h = None;
        let err = create_layer(&config, Path::new("."), &ctx()).unwrap_err();
        assert!(matches!(err, ModelError::MissingField { field: "padH", .. }));
    }

    #[test]
    fn test_pooling_ceil_mode_fails_construction() {
        let config = LayerConfig::new("SpatialMaxPooling")
            .with_window(2, 2, 0)
            .with_ceil_mode(true);
        let ctx = ctx();
        let err = create_layer(&config, Path::new("."), &ctx).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedConfiguration { .. }));
        assert_eq!(ctx.ledger().live_descriptors(), 0);
    }

    #[test]
    fn test_dropout_requires_p() {
        let err = create_layer(&LayerConfig::new("Dropout"), Path::new("."), &ctx()).unwrap_err();
        assert!(matches!(err, ModelError::MissingField { field: "p", .. }));

        let config = LayerConfig::new("Dropout").with_p(0.25);
        let layer = create_layer(&config, Path::new("."), &ctx()).unwrap();
        assert_eq!(layer.unwrap().to_string(), "Dropout: p=0.250000");
    }

    #[test]
    fn test_convolution_resolves_parameter_files() {
        let dir = tempfile::tempdir().unwrap();
        let weight = dir.path().join("w.safetensors");
        let bias = dir.path().join("b.safetensors");
        write_f32(&weight, "weight", &[2, 1, 3, 3], &[0.0; 18]);
        write_f32(&bias, "bias", &[2], &[0.0; 2]);

        let config = LayerConfig::new("SpatialConvolution")
            .with_window(3, 1, 1)
            .with_parameter_files("w.safetensors", "b.safetensors");
        let layer = create_layer(&config, dir.path(), &ctx()).unwrap().unwrap();
        assert_eq!(layer.kind(), "Convolution");
        assert_eq!(
            layer.to_string(),
            "Convolution: size=3x3, step=1,1, pad=1,1, [2, 1, 3, 3]"
        );
    }

    #[test]
    fn test_linear_parameter_files_validation() {
        let mut config = LayerConfig::new("Linear");
        let err = create_layer(&config, Path::new("."), &ctx()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Layer 'Linear' is missing required field 'parameterFiles'"
        );

        config.parameter_files = Some(vec!["only_weight.safetensors".to_string()]);
        let err = create_layer(&config, Path::new("."), &ctx()).unwrap_err();
        assert!(matches!(err, ModelError::InvalidLayerConfig { .. }));
    }
}
