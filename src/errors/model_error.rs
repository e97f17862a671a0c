//! Model-related error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading, configuring or evaluating a model.
///
/// Every variant is fatal for the pipeline that raised it. Contract
/// violations (evaluating an unconfigured graph) are panics, not errors.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model has no layers defined")]
    NoLayers,

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed model description {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Layer '{layer_type}' is missing required field '{field}'")]
    MissingField {
        layer_type: String,
        field: &'static str,
    },

    #[error("Invalid layer configuration: {message}")]
    InvalidLayerConfig { message: String },

    #[error("Unsupported layer type '{layer_type}'")]
    UnsupportedLayerType { layer_type: String },

    #[error("{layer}: shape mismatch: {message}")]
    ShapeMismatch { layer: String, message: String },

    #[error("{layer}: unsupported configuration: {message}")]
    UnsupportedConfiguration { layer: String, message: String },

    #[error(
        "Device memory exhausted: requested {requested} bytes with {in_use} in use (limit {limit})"
    )]
    ResourceExhaustion {
        requested: usize,
        in_use: usize,
        limit: usize,
    },

    #[error("Invalid parameter file {}: {message}", path.display())]
    ParameterFile { path: PathBuf, message: String },

    #[error("Data source error: {message}")]
    DataSource { message: String },

    #[error("Backend error: {message}")]
    Backend { message: String },

    #[error("layer {index}: {source}")]
    Layer {
        index: usize,
        #[source]
        source: Box<ModelError>,
    },
}

impl ModelError {
    pub(crate) fn at_layer(index: usize, source: ModelError) -> Self {
        ModelError::Layer {
            index,
            source: Box::new(source),
        }
    }

    pub(crate) fn shape_mismatch(layer: impl Into<String>, message: impl Into<String>) -> Self {
        ModelError::ShapeMismatch {
            layer: layer.into(),
            message: message.into(),
        }
    }

    /// Strips any `Layer` wrappers and returns the error that caused them.
    pub fn innermost(&self) -> &ModelError {
        match self {
            ModelError::Layer { source, .. } => source.innermost(),
            other => other,
        }
    }

    /// Index of the outermost layer this error is attributed to, if any.
    pub fn layer_index(&self) -> Option<usize> {
        match self {
            ModelError::Layer { index, .. } => Some(*index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_innermost_unwraps_layer_context() {
        let err = ModelError::at_layer(
            3,
            ModelError::shape_mismatch("Convolution", "input has 2 channels, filters expect 3"),
        );

        assert_eq!(err.layer_index(), Some(3));
        assert!(matches!(err.innermost(), ModelError::ShapeMismatch { .. }));
        assert_eq!(
            err.to_string(),
            "layer 3: Convolution: shape mismatch: input has 2 channels, filters expect 3"
        );
    }

    #[test]
    fn test_innermost_of_plain_error_is_itself() {
        let err = ModelError::NoLayers;
        assert!(matches!(err.innermost(), ModelError::NoLayers));
        assert_eq!(err.layer_index(), None);
    }
}
