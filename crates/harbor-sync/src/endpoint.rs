//! # Remote Endpoint
//!
//! The network seam used by the connectivity probe. `HttpEndpoint` talks to
//! the fleet operations API; tests substitute their own implementation.
//!
//! ## Wire Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ping     GET  {base_url}{health_path}   any HTTP response = reachable  │
//! │                                                                         │
//! │  deliver  POST   {base_url}/{module}     kind = create                 │
//! │           PUT    {base_url}/{module}     kind = update                 │
//! │           DELETE {base_url}/{module}     kind = delete                 │
//! │           body: entry.data as JSON, 2xx = delivered                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::debug;
use url::Url;

use harbor_core::CacheEntry;

use crate::config::{EndpointSettings, HubConfiguration};
use crate::error::{HubError, HubResult};

/// Remote side of the sync core.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// Succeeds if the remote answered at all.
    async fn ping(&self) -> HubResult<()>;

    /// Delivers one buffered mutation. Succeeds only on confirmed receipt.
    async fn deliver(&self, entry: &CacheEntry) -> HubResult<()>;
}

// =============================================================================
// HTTP Endpoint
// =============================================================================

/// `RemoteEndpoint` over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    client: Client,
    base_url: Url,
    health_url: String,
}

impl HttpEndpoint {
    /// Creates an endpoint; `timeout` bounds every request.
    pub fn new(settings: &EndpointSettings, timeout: Duration) -> HubResult<Self> {
        let base_url = Url::parse(&settings.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(HubError::InvalidUrl(format!(
                "{} cannot carry a module path",
                settings.base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HubError::Internal(format!("HTTP client: {}", e)))?;

        let health_url = format!(
            "{}{}",
            settings.base_url.trim_end_matches('/'),
            settings.health_path
        );

        Ok(HttpEndpoint {
            client,
            base_url,
            health_url,
        })
    }

    /// Creates an endpoint from the hub configuration.
    pub fn from_config(config: &HubConfiguration) -> HubResult<Self> {
        Self::new(&config.endpoint, config.connection_timeout())
    }

    /// Delivery URL for a module. The tag is appended as a single
    /// percent-encoded path segment.
    pub fn module_url(&self, module: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(module);
        }
        url
    }
}

#[async_trait]
impl RemoteEndpoint for HttpEndpoint {
    async fn ping(&self) -> HubResult<()> {
        self.client
            .get(&self.health_url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HubError::ConnectivityFailure(format!("probe timed out: {}", e))
                } else {
                    HubError::ConnectivityFailure(e.to_string())
                }
            })?;

        Ok(())
    }

    async fn deliver(&self, entry: &CacheEntry) -> HubResult<()> {
        let method = Method::from_bytes(entry.kind.http_method().as_bytes())
            .map_err(|e| HubError::Internal(e.to_string()))?;
        let url = self.module_url(&entry.module);

        let response = self
            .client
            .request(method, url.clone())
            .json(&entry.data)
            .send()
            .await
            .map_err(|e| HubError::DeliveryFailure {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HubError::DeliveryFailure {
                status: Some(status.as_u16()),
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        debug!(id = %entry.id, url = %url, status = status.as_u16(), "Entry delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_are_joined_without_double_slash() {
        let settings = EndpointSettings {
            base_url: "https://ops.example.com/api/".to_string(),
            health_path: "/health".to_string(),
        };
        let endpoint = HttpEndpoint::new(&settings, Duration::from_secs(1)).unwrap();

        assert_eq!(endpoint.module_url("mmi").as_str(), "https://ops.example.com/api/mmi");
        assert_eq!(endpoint.health_url, "https://ops.example.com/api/health");
    }

    #[test]
    fn test_module_tag_is_one_encoded_segment() {
        let settings = EndpointSettings {
            base_url: "https://ops.example.com/api".to_string(),
            health_path: "/health".to_string(),
        };
        let endpoint = HttpEndpoint::new(&settings, Duration::from_secs(1)).unwrap();

        assert_eq!(
            endpoint.module_url("crew roster").as_str(),
            "https://ops.example.com/api/crew%20roster"
        );
        assert_eq!(
            endpoint.module_url("fleet/certs").as_str(),
            "https://ops.example.com/api/fleet%2Fcerts"
        );
    }

    #[test]
    fn test_rejects_base_url_without_path() {
        let settings = EndpointSettings {
            base_url: "mailto:ops@example.com".to_string(),
            health_path: "/health".to_string(),
        };
        assert!(matches!(
            HttpEndpoint::new(&settings, Duration::from_secs(1)),
            Err(HubError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let settings = EndpointSettings {
            base_url: "::not a url".to_string(),
            health_path: "/health".to_string(),
        };
        assert!(matches!(
            HttpEndpoint::new(&settings, Duration::from_secs(1)),
            Err(HubError::InvalidUrl(_))
        ));
    }
}
