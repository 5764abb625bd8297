use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

use crate::model::{Article, Bookmark, CreateBookmarkRequest};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("base url cannot carry path segments: {0}")]
    CannotBeABase(Url),
}

/// Coarse bucket an [`ApiError`] falls into, decided once at the transport edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    /// No connection could be made at all.
    Unreachable,
    Transient,
    Conflict,
    NotFound,
    Auth,
    Permanent,
}

#[derive(Clone)]
pub struct BookmarkClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl BookmarkClient {
    pub fn new(token: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_settings(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_settings(
        base_url: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Same endpoint and connection pool, different credential.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn list_bookmarks(&self) -> Result<Vec<Bookmark>, ApiError> {
        let url = self.endpoint("/bookmarks")?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn create_bookmark(&self, article: &Article) -> Result<Bookmark, ApiError> {
        let url = self.endpoint("/bookmarks")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&CreateBookmarkRequest { article })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn delete_bookmark(&self, id: &str) -> Result<(), ApiError> {
        let mut url = self.endpoint("/bookmarks")?;
        url.path_segments_mut()
            .map_err(|_| ApiError::CannotBeABase(self.base_url.clone()))?
            .push(id);
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::api_error(response).await)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> ApiError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        ApiError::Api { status, body }
    }
}

impl ApiError {
    pub fn classification(&self) -> ApiErrorClass {
        match self {
            ApiError::Api { status, .. } => classify_api_status(*status),
            ApiError::Request(err) if err.is_connect() => ApiErrorClass::Unreachable,
            ApiError::Request(err) if err.is_builder() => ApiErrorClass::Permanent,
            // Timeouts, resets mid-body and undecodable payloads are worth another try.
            ApiError::Request(_) => ApiErrorClass::Transient,
            ApiError::Url(_) | ApiError::CannotBeABase(_) => ApiErrorClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            ApiErrorClass::Unreachable | ApiErrorClass::Transient
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::CONFLICT {
        ApiErrorClass::Conflict
    } else if status == StatusCode::NOT_FOUND {
        ApiErrorClass::NotFound
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}
