use crate::error::{ClientError, Result};
use crate::model::{AudioFormat, Track};
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub entry: Option<Track>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListResponse {
    pub status: String,
    #[serde(default)]
    pub downloads: Vec<Track>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoveResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

pub trait BackendApi: Send + Sync + 'static {
    fn submit(
        &self,
        source_url: &str,
        format: AudioFormat,
    ) -> impl Future<Output = Result<SubmitResponse>> + Send;

    fn status(&self, job_id: &str) -> impl Future<Output = Result<StatusResponse>> + Send;

    fn list(&self) -> impl Future<Output = Result<ListResponse>> + Send;

    fn remove(&self, id: &str) -> impl Future<Output = Result<RemoveResponse>> + Send;

    fn audio_url(&self, id: &str, format: AudioFormat) -> String;
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url.trim())
            .map_err(|err| ClientError::Validation(format!("bad backend url {base_url}: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::Validation(format!(
                "backend url {base_url} cannot carry paths"
            )));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(%url, "backend request");
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|err| ClientError::UnexpectedResponse(format!("undecodable body: {err}")))
    }
}

impl BackendApi for HttpBackend {
    async fn submit(&self, source_url: &str, format: AudioFormat) -> Result<SubmitResponse> {
        let mut url = self.endpoint(&["download"]);
        url.query_pairs_mut()
            .append_pair("url", source_url)
            .append_pair("format", format.as_str());
        self.get_json(url).await
    }

    async fn status(&self, job_id: &str) -> Result<StatusResponse> {
        self.get_json(self.endpoint(&["status", job_id])).await
    }

    async fn list(&self) -> Result<ListResponse> {
        self.get_json(self.endpoint(&["list"])).await
    }

    async fn remove(&self, id: &str) -> Result<RemoveResponse> {
        let mut url = self.endpoint(&["remove"]);
        url.query_pairs_mut().append_pair("id", id);
        self.get_json(url).await
    }

    fn audio_url(&self, id: &str, format: AudioFormat) -> String {
        let file = format!("{id}.{}", format.as_str());
        self.endpoint(&["files", &file]).to_string()
    }
}
