//! Card classification
//!
//! The detection model runs behind an HTTP inference endpoint. `CardClassifier`
//! is the seam the workflow depends on, so tests can swap in a fixed classifier.

use crate::error::{CollectionError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default object-detection model for trading cards
pub const DEFAULT_MODEL: &str = "Matthieu68857/pokemon-cards-detection";

/// Default hosted inference endpoint
pub const DEFAULT_CLASSIFIER_URL: &str = "https://api-inference.huggingface.co/models";

/// One classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub score: f64,
}

/// Verify the upload is a decodable still image
pub fn decode_image(bytes: &[u8]) -> Result<image::DynamicImage> {
    if bytes.is_empty() {
        return Err(CollectionError::InvalidImage("empty upload".to_string()));
    }
    image::load_from_memory(bytes).map_err(|e| CollectionError::InvalidImage(e.to_string()))
}

/// Anything that can turn image bytes into ranked detections
#[async_trait]
pub trait CardClassifier: Send + Sync {
    /// Detections in the model's own ranking; the first is the best guess.
    async fn classify(&self, image: &[u8]) -> Result<Vec<Detection>>;
}

/// Classifier backed by a hosted object-detection model
#[derive(Debug, Clone)]
pub struct InferenceClassifier {
    pub endpoint: String,
    pub model: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl InferenceClassifier {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        token: Option<String>,
        timeout: Option<Duration>,
    ) -> std::result::Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder().user_agent("card_collection/1.0");
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            token,
            client: builder.build()?,
        })
    }

    fn url(&self) -> String {
        format!("{}/{}", self.endpoint, self.model)
    }
}

#[async_trait]
impl CardClassifier for InferenceClassifier {
    async fn classify(&self, image: &[u8]) -> Result<Vec<Detection>> {
        log::debug!("Classifying {} byte image with {}", image.len(), self.model);

        let mut request = self
            .client
            .post(self.url())
            .header("Content-Type", "application/octet-stream")
            .body(image.to_vec());
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CollectionError::Classifier(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CollectionError::Classifier(format!("{}: {}", status, text)));
        }

        let detections: Vec<Detection> = response
            .json()
            .await
            .map_err(|e| CollectionError::Classifier(e.to_string()))?;

        log::debug!("Classifier returned {} detections", detections.len());
        Ok(detections)
    }
}
