//! Common utilities for the provider API client
//!
//! Request plumbing shared by every endpoint: URL building, auth and tracing
//! headers, status-code mapping and pagination.

use crate::error::CloudError;
use crate::models::ListResponse;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

/// HTTP client wrapper with authentication
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .header("X-Request-Id", uuid::Uuid::new_v4().to_string())
    }

    /// Map a non-success response onto the error taxonomy
    async fn check(response: Response, method: &str, path: &str) -> Result<Response, CloudError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => {
                CloudError::NotFound(format!("{} {} - {}", method, path, body))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                CloudError::Authentication(format!("{} {}: {} - {}", method, path, status, body))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                CloudError::Throttled(format!("{} {} - {}", method, path, body))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                CloudError::InvalidRequest(format!("{} {} - {}", method, path, body))
            }
            _ => CloudError::Api(format!("{} {} failed: {} - {}", method, path, status, body)),
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, CloudError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            CloudError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CloudError> {
        let url = self.build_url(path);
        debug!("GET {}", url);
        let response = self.authorized(self.client.get(&url)).send().await?;
        Self::decode(Self::check(response, "GET", path).await?).await
    }

    /// Make a POST request and decode the response body
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, CloudError> {
        let response = self.send_json(reqwest::Method::POST, path, body).await?;
        Self::decode(response).await
    }

    /// Make a POST request whose response carries nothing of interest
    pub async fn post_empty(&self, path: &str, body: &serde_json::Value) -> Result<(), CloudError> {
        self.send_json(reqwest::Method::POST, path, body).await?;
        Ok(())
    }

    /// Make a PATCH request
    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, CloudError> {
        let response = self.send_json(reqwest::Method::PATCH, path, body).await?;
        Self::decode(response).await
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<Response, CloudError> {
        let url = self.build_url(path);
        debug!("{} {} with body: {}", method, url, body);
        let response = self
            .authorized(self.client.request(method.clone(), &url))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        Self::check(response, method.as_str(), path).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), CloudError> {
        let url = self.build_url(path);
        debug!("DELETE {}", url);
        let response = self.authorized(self.client.delete(&url)).send().await?;
        Self::check(response, "DELETE", path).await?;
        Ok(())
    }

    /// Fetch all pages of a list endpoint
    pub async fn fetch_all_pages<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, CloudError> {
        let mut all_items = Vec::new();
        let separator = if path.contains('?') { '&' } else { '?' };
        let mut next_path = path.to_string();

        loop {
            debug!("Fetching page: {}", next_path);
            let page: ListResponse<T> = self.get(&next_path).await?;
            all_items.extend(page.items);

            match page.next_token {
                Some(token) => {
                    next_path = format!(
                        "{}{}nextToken={}",
                        path,
                        separator,
                        urlencoding::encode(&token)
                    );
                }
                None => break,
            }
        }

        Ok(all_items)
    }

    /// Build query string from filters
    pub fn build_query_string(&self, filters: &[(&str, &str)]) -> String {
        filters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Append filters to a path
    pub fn with_query(&self, path: &str, filters: &[(&str, &str)]) -> String {
        if filters.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, self.build_query_string(filters))
        }
    }
}
