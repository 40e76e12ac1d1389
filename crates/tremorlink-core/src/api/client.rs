//! Backend HTTP client

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use super::types::{
    CaseStudiesConfig, ErrorBody, FeatureSeries, FileList, ProcessRequest, ProcessingParameters,
    SaveRequest, SaveResponse,
};
use super::ApiError;
use crate::datalog::RecordedSample;
use crate::signal::SignalBundle;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the processing backend
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    /// Create a client for the backend at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("TremorLink/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Raw recordings available for processing
    pub async fn list_files(&self) -> Result<Vec<String>, ApiError> {
        let list: FileList = self.get_json("/api/list-files", &[]).await?;
        Ok(list.files)
    }

    /// Decompose a recording into a signal bundle
    pub async fn process_signal(
        &self,
        file_name: &str,
        parameters: &ProcessingParameters,
    ) -> Result<SignalBundle, ApiError> {
        info!("Processing {} with {:?}", file_name, parameters);
        let body = ProcessRequest {
            file_name,
            parameters: *parameters,
        };
        let bundle: SignalBundle = self.post_json("/api/process-signal", &body).await?;
        bundle.validate()?;
        debug!(
            "Received bundle: {} samples, {} channels",
            bundle.len(),
            bundle.channels.len()
        );
        Ok(bundle)
    }

    /// One feature of a processed file
    pub async fn file_data(&self, filename: &str, feature: &str) -> Result<FeatureSeries, ApiError> {
        self.get_json(
            "/api/file-data",
            &[("filename", filename), ("feature", feature)],
        )
        .await
    }

    /// Files previously stored by [`save_recorded_data`](Self::save_recorded_data)
    pub async fn list_processed_files(&self) -> Result<Vec<String>, ApiError> {
        let list: FileList = self.get_json("/api/list-processed-files", &[]).await?;
        Ok(list.files)
    }

    pub async fn case_studies_config(&self) -> Result<CaseStudiesConfig, ApiError> {
        self.get_json("/api/case-studies-config", &[]).await
    }

    pub async fn save_case_studies_config(&self, config: &CaseStudiesConfig) -> Result<(), ApiError> {
        let _: serde_json::Value = self.post_json("/api/case-studies-config", config).await?;
        Ok(())
    }

    /// Store a recording under `filename`
    pub async fn save_recorded_data(
        &self,
        samples: &[RecordedSample],
        filename: &str,
        parameters: &ProcessingParameters,
    ) -> Result<SaveResponse, ApiError> {
        let body = SaveRequest {
            recorded_data: samples,
            filename,
            parameters: *parameters,
        };
        let response: SaveResponse = self.post_json("/api/save-recorded-data", &body).await?;
        info!("Saved {} samples to {}", samples.len(), response.file_path);
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await?;
        decode(response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        decode(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorBody>(&body)
            .map(|e| e.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
        return Err(ApiError::Server {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
}
