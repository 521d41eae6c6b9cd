use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

// Relative to the account url, which may carry an install sub-path.
const SHARES_ENDPOINT: &str = "ocs/v2.php/apps/files_sharing/api/v1/shares";
const PREVIEW_ENDPOINT: &str = "index.php/core/preview";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

impl CloudError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CloudError::Api { status, .. } => Some(*status),
            CloudError::Request(err) => err.status(),
            CloudError::Url(_) => None,
        }
    }
}

/// Client for one account on the sync server.
#[derive(Clone)]
pub struct CloudClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl CloudClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, CloudError> {
        Self::with_timeout(base_url, token, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CloudError> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            base_url: account_base_url(base_url)?,
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Lists the shares of the items directly inside `collection`.
    ///
    /// `collection` is a remote path relative to the account root, or `/`
    /// for the root itself.
    pub async fn list_shares(&self, collection: &str) -> Result<Vec<ShareEntry>, CloudError> {
        let mut url = self.endpoint(SHARES_ENDPOINT)?;
        url.query_pairs_mut()
            .append_pair("path", collection)
            .append_pair("subfiles", "true")
            .append_pair("format", "json");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .header("OCS-APIRequest", "true")
            .send()
            .await?;
        let payload: OcsResponse = Self::handle_response(response).await?;
        Ok(payload.ocs.data)
    }

    pub async fn fetch_preview(
        &self,
        file_id: u64,
        width: u32,
        height: u32,
    ) -> Result<Preview, CloudError> {
        let mut url = self.endpoint(PREVIEW_ENDPOINT)?;
        url.query_pairs_mut()
            .append_pair("fileId", &file_id.to_string())
            .append_pair("x", &width.to_string())
            .append_pair("y", &height.to_string());
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();
        Ok(Preview {
            content_type,
            bytes,
        })
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, CloudError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CloudError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> CloudError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        CloudError::Api { status, body }
    }
}

/// Parses the account url with a trailing `/` so endpoint joins keep its path.
fn account_base_url(base_url: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ShareEntry {
    /// Remote path of the shared item, starting with `/`.
    pub path: String,
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub share_type: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Preview {
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|value| value.trim_start().starts_with("image/"))
    }
}

#[derive(Debug, Deserialize)]
struct OcsResponse {
    ocs: OcsBody,
}

#[derive(Debug, Deserialize)]
struct OcsBody {
    #[serde(default)]
    data: Vec<ShareEntry>,
}
