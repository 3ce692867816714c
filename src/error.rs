use std::path::PathBuf;

use thiserror::Error;

/// Top-level errors. Anything that happens to a single region is recovered
/// inside the run and never shows up here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("oracle unavailable: {0}")]
    OracleInit(#[source] OracleError),
    #[error("layout detection failed: {0}")]
    Detection(#[source] OracleError),
    #[error("failed to create output directory under {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to save layout visualization: {0}")]
    Visualization(#[from] image::ImageError),
}

/// Errors raised by the injected detector or recognizer.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("{0}")]
    Init(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output: {0}")]
    InvalidOutput(String),
    #[error(transparent)]
    Runtime(#[from] ort::Error),
}

/// Why a single region could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionFailure {
    #[error("polygon has {0} points, need at least 4")]
    InvalidPolygon(usize),
    #[error("crop failed: {0}")]
    Crop(String),
    #[error("recognition failed: {0}")]
    Recognition(String),
}

/// Saving a cropped asset failed.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}
