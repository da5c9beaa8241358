use std::path::PathBuf;

use inferlink_core::ClientError;
use serde::{Deserialize, Serialize};

use crate::paths::PathError;

/// A single inference returned by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inference {
    /// Model that produced the inference.
    pub model_id: String,
    /// Medical record number of the patient.
    pub patient_mrn: String,
    /// Presigned URLs of the segmentation files.
    pub segmentation_presigned_urls: Vec<String>,
}

/// One entry of the inference listing as sent by the server.
#[derive(Debug, Deserialize)]
pub(crate) struct InferenceRecord {
    #[serde(default)]
    pub segmentation_presigned_urls: Vec<String>,
}

/// Errors that can occur when using the inference API.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// Configuration or request-path failure from the core layer.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The resource path could not be rendered.
    #[error("invalid resource path: {0}")]
    Path(#[from] PathError),

    /// A segmentation could not be fetched from its presigned URL.
    #[error("failed to download segmentation from {url}: {reason}")]
    SegmentationDownload { url: String, reason: String },

    /// A downloaded segmentation could not be written to disk.
    #[error("failed to write downloaded segmentation file to {path:?}: {source}")]
    WriteSegmentation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for inference API operations.
pub type Result<T> = std::result::Result<T, InferenceError>;
