//! Inferlink Client Library
//!
//! Domain API for the inference platform, built on the authenticated request
//! layer of `inferlink-core`.
//!
//! # Features
//!
//! - **Inference listing**: fetch the inferences of a model for a patient
//! - **Segmentation download**: save the files behind presigned URLs
//! - **Path templates**: render `{placeholder}` resource paths safely
//! - **Model runner exchange**: the input/output file protocol used with the
//!   model-hosting process
//!
//! Credential acquisition, retries and credential refresh are handled by the
//! shared [`Session`](inferlink_core::Session) underneath.
//!
//! # Quick Start
//!
//! ```no_run
//! use inferlink_client::InferenceClient;
//! use inferlink_core::ClientConfig;
//!
//! #[tokio::main]
//! async fn main() -> inferlink_client::Result<()> {
//!     let config = ClientConfig::builder("datashare-admin")
//!         .private_key_file("private_key.pem")
//!         .base_url("https://api.example.com/")
//!         .build()
//!         .map_err(inferlink_core::ClientError::from)?;
//!
//!     let client = InferenceClient::new(config)?;
//!     let inferences = client
//!         .get_inferences_with_segmentations("m1", "1", "/tmp/segmentations")
//!         .await?;
//!     println!("{} inferences", inferences.len());
//!     Ok(())
//! }
//! ```

mod client;
pub mod model_runner;
pub mod paths;
pub mod types;

pub use client::{destination_basename, InferenceClient};

pub use model_runner::{InferenceProcessor, InferenceRequest, RunnerError, StudyExchange};
pub use paths::{render_path, PathError, INFERENCES_PATH};
pub use types::{Inference, InferenceError, Result};
