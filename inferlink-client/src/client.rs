use std::path::{Path, PathBuf};

use inferlink_core::{ClientConfig, Session};
use tracing::{debug, info};

use crate::paths::InferencesPath;
use crate::types::{Inference, InferenceError, InferenceRecord, Result};

/// Client for the inference platform API.
///
/// Wraps a [`Session`], so every call shares the session's credential,
/// retry policy and failure counter. Cloning is cheap.
///
/// # Example
///
/// ```no_run
/// use inferlink_client::InferenceClient;
/// use inferlink_core::ClientConfig;
///
/// #[tokio::main]
/// async fn main() -> inferlink_client::Result<()> {
///     let config = ClientConfig::builder("datashare-admin")
///         .private_key_file("private_key.pem")
///         .build()
///         .map_err(inferlink_core::ClientError::from)?;
///     let client = InferenceClient::new(config)?;
///
///     for inference in client.get_inferences("m1", "1").await? {
///         println!("{:?}", inference.segmentation_presigned_urls);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct InferenceClient {
    session: Session,
}

impl InferenceClient {
    /// Create a client from a validated configuration. No network I/O.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            session: Session::new(config)?,
        })
    }

    /// Create a client on top of an existing session.
    pub fn from_session(session: Session) -> Self {
        Self { session }
    }

    /// The underlying session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Fetch the inferences of `model_id` for `patient_mrn`.
    pub async fn get_inferences(&self, model_id: &str, patient_mrn: &str) -> Result<Vec<Inference>> {
        let route = InferencesPath {
            model_id,
            patient_mrn,
        };
        let path = route.render()?;

        let records: Vec<InferenceRecord> = self.session.get_json(&path).await?;
        debug!("received {} inferences for {}", records.len(), route);

        Ok(records
            .into_iter()
            .map(|record| Inference {
                model_id: model_id.to_string(),
                patient_mrn: patient_mrn.to_string(),
                segmentation_presigned_urls: record.segmentation_presigned_urls,
            })
            .collect())
    }

    /// Fetch the inferences and download every segmentation into `destination_dir`.
    ///
    /// Files are named after the last path segment of their presigned URL.
    pub async fn get_inferences_with_segmentations(
        &self,
        model_id: &str,
        patient_mrn: &str,
        destination_dir: impl AsRef<Path>,
    ) -> Result<Vec<Inference>> {
        let inferences = self.get_inferences(model_id, patient_mrn).await?;

        for inference in &inferences {
            for url in &inference.segmentation_presigned_urls {
                self.download_segmentation(url, destination_dir.as_ref()).await?;
            }
        }

        Ok(inferences)
    }

    /// Download one presigned URL into `destination_dir`.
    ///
    /// Presigned URLs carry their own authorization; no bearer token is sent
    /// and the request is not retried.
    pub async fn download_segmentation(&self, url: &str, destination_dir: &Path) -> Result<PathBuf> {
        let basename = destination_basename(url).ok_or_else(|| InferenceError::SegmentationDownload {
            url: url.to_string(),
            reason: "URL has no file name".to_string(),
        })?;
        let destination = destination_dir.join(basename);

        let download_error = |reason: String| InferenceError::SegmentationDownload {
            url: url.to_string(),
            reason,
        };

        let response = self
            .session
            .executor()
            .http_client()
            .get(url)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(download_error(format!("status {}", status.as_u16())));
        }

        let content = response
            .bytes()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        tokio::fs::write(&destination, &content)
            .await
            .map_err(|source| InferenceError::WriteSegmentation {
                path: destination.clone(),
                source,
            })?;

        info!("downloaded segmentation to {:?}", destination);
        Ok(destination)
    }
}

/// File name for a presigned URL: the last path segment, query stripped.
pub fn destination_basename(url: &str) -> Option<&str> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_basename() {
        assert_eq!(
            destination_basename("https://bucket.s3.amazonaws.com/a/b/seg_1.nii.gz?X-Amz-Signature=abc"),
            Some("seg_1.nii.gz")
        );
        assert_eq!(
            destination_basename("https://bucket.example.com/seg.nrrd"),
            Some("seg.nrrd")
        );
        assert_eq!(destination_basename("https://bucket.example.com/dir/"), None);
        assert_eq!(destination_basename(""), None);
    }
}
