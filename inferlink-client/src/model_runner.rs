//! File exchange protocol with the model-hosting process.
//!
//! The model runner exposes a single RPC taking a shared directory and a
//! study identifier. No payload travels over the RPC itself:
//!
//! 1. the caller writes `<dir>/<study_id>_input.<ext>`
//! 2. the caller issues [`InferenceProcessor::run_inference`]
//! 3. the runner writes `<dir>/<study_id>_output.<ext>` and acknowledges
//! 4. the caller reads the output file
//!
//! There is no retry, auth or state on this path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Extension used for payload files unless configured otherwise.
pub const DEFAULT_PAYLOAD_EXTENSION: &str = "pkl";

/// Path of the input payload for a study.
pub fn input_path(data_dirname: &Path, study_id: &str, extension: &str) -> PathBuf {
    data_dirname.join(format!("{}_input.{}", study_id, extension))
}

/// Path of the output payload for a study.
pub fn output_path(data_dirname: &Path, study_id: &str, extension: &str) -> PathBuf {
    data_dirname.join(format!("{}_output.{}", study_id, extension))
}

/// Arguments of the inference RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Directory shared between caller and runner.
    pub data_dirname: PathBuf,
    /// Identifier of the study; names the payload files.
    pub study_id: String,
}

impl InferenceRequest {
    pub fn new(data_dirname: impl Into<PathBuf>, study_id: impl Into<String>) -> Self {
        Self {
            data_dirname: data_dirname.into(),
            study_id: study_id.into(),
        }
    }
}

/// Errors on the model runner path.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The input payload could not be written.
    #[error("failed to write model input {path:?}: {source}")]
    WriteInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The runner reported an error for the study.
    #[error("inference failed for study {study_id}: {message}")]
    Rpc { study_id: String, message: String },

    /// The runner acknowledged but no output payload exists.
    #[error("model output {path:?} not found after inference")]
    MissingOutput { path: PathBuf },

    /// The output payload exists but could not be read.
    #[error("failed to read model output {path:?}: {source}")]
    ReadOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The model runner RPC peer.
///
/// Implementations perform inference out of band: read the input payload,
/// write the output payload, return an empty acknowledgement.
#[async_trait]
pub trait InferenceProcessor: Send + Sync {
    async fn run_inference(&self, request: &InferenceRequest) -> Result<(), RunnerError>;
}

/// Caller side of the exchange for one shared directory.
#[derive(Debug, Clone)]
pub struct StudyExchange {
    data_dirname: PathBuf,
    extension: String,
}

impl StudyExchange {
    pub fn new(data_dirname: impl Into<PathBuf>) -> Self {
        Self {
            data_dirname: data_dirname.into(),
            extension: DEFAULT_PAYLOAD_EXTENSION.to_string(),
        }
    }

    /// Use a different payload file extension.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn input_path(&self, study_id: &str) -> PathBuf {
        input_path(&self.data_dirname, study_id, &self.extension)
    }

    pub fn output_path(&self, study_id: &str) -> PathBuf {
        output_path(&self.data_dirname, study_id, &self.extension)
    }

    /// Write `input`, run inference, and return the output payload.
    pub async fn run<P>(&self, processor: &P, study_id: &str, input: &[u8]) -> Result<Vec<u8>, RunnerError>
    where
        P: InferenceProcessor + ?Sized,
    {
        let input_path = self.input_path(study_id);
        tokio::fs::write(&input_path, input)
            .await
            .map_err(|source| RunnerError::WriteInput {
                path: input_path.clone(),
                source,
            })?;

        info!("sending inference request for study {}", study_id);
        let request = InferenceRequest::new(self.data_dirname.clone(), study_id);
        processor.run_inference(&request).await?;
        info!("received inference response for study {}", study_id);

        let output_path = self.output_path(study_id);
        match tokio::fs::read(&output_path).await {
            Ok(output) => Ok(output),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RunnerError::MissingOutput { path: output_path })
            }
            Err(source) => Err(RunnerError::ReadOutput {
                path: output_path,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Reverses the input payload into the output payload.
    struct ReversingProcessor;

    #[async_trait]
    impl InferenceProcessor for ReversingProcessor {
        async fn run_inference(&self, request: &InferenceRequest) -> Result<(), RunnerError> {
            let input = input_path(&request.data_dirname, &request.study_id, DEFAULT_PAYLOAD_EXTENSION);
            let output = output_path(&request.data_dirname, &request.study_id, DEFAULT_PAYLOAD_EXTENSION);

            let mut payload = tokio::fs::read(&input).await.map_err(|_| RunnerError::Rpc {
                study_id: request.study_id.clone(),
                message: "input not found".to_string(),
            })?;
            payload.reverse();
            tokio::fs::write(&output, payload).await.unwrap();
            Ok(())
        }
    }

    /// Acknowledges without writing anything.
    struct SilentProcessor;

    #[async_trait]
    impl InferenceProcessor for SilentProcessor {
        async fn run_inference(&self, _request: &InferenceRequest) -> Result<(), RunnerError> {
            Ok(())
        }
    }

    #[test]
    fn test_payload_file_names() {
        let dir = Path::new("/data");
        assert_eq!(
            input_path(dir, "fc38b3a8", "pkl"),
            PathBuf::from("/data/fc38b3a8_input.pkl")
        );
        assert_eq!(
            output_path(dir, "fc38b3a8", "pkl"),
            PathBuf::from("/data/fc38b3a8_output.pkl")
        );

        let exchange = StudyExchange::new("/data").with_extension("json");
        assert_eq!(
            exchange.output_path("s1"),
            PathBuf::from("/data/s1_output.json")
        );
    }

    #[tokio::test]
    async fn test_exchange_writes_input_and_reads_output() {
        let dir = TempDir::new().unwrap();
        let exchange = StudyExchange::new(dir.path());

        let output = exchange.run(&ReversingProcessor, "study-1", b"abc").await.unwrap();

        assert_eq!(output, b"cba");
        assert!(exchange.input_path("study-1").exists());
    }

    #[tokio::test]
    async fn test_missing_output_is_reported() {
        let dir = TempDir::new().unwrap();
        let exchange = StudyExchange::new(dir.path());

        let result = exchange.run(&SilentProcessor, "study-2", b"abc").await;
        assert!(matches!(result, Err(RunnerError::MissingOutput { .. })));
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_reported() {
        let exchange = StudyExchange::new("/nonexistent/shared");
        let result = exchange.run(&SilentProcessor, "study-3", b"abc").await;
        assert!(matches!(result, Err(RunnerError::WriteInput { .. })));
    }
}
