//! Health probes.
//!
//! A probe answers one question: did the endpoint respond successfully?
//! Timing, timeouts, and status classification belong to the monitor.

use async_trait::async_trait;
use pulse_core::EndpointId;
use reqwest::Url;
use tracing::debug;

use crate::errors::ProbeError;

/// A monitored endpoint and the URL its health check lives at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Logical identifier.
    pub id: EndpointId,
    /// Health-check URL.
    pub url: Url,
}

impl Endpoint {
    /// Endpoint at an absolute URL.
    pub fn new(id: impl Into<EndpointId>, url: &str) -> Result<Self, ProbeError> {
        let url = Url::parse(url).map_err(|e| ProbeError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self { id: id.into(), url })
    }
}

/// Checks a single endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    /// `Ok(())` when the endpoint answered successfully.
    async fn check(&self, endpoint: &Endpoint) -> Result<(), ProbeError>;
}

/// HTTP GET probe; any 2xx status is healthy.
#[derive(Clone, Debug, Default)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Probe using an existing client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn check(&self, endpoint: &Endpoint) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(endpoint.url.clone())
            .send()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let status = response.status();
        debug!(endpoint = %endpoint.id, status = status.as_u16(), "health probe answered");
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status {
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn endpoint_parses_url() {
        let endpoint = Endpoint::new("api", "http://localhost:8000/health").unwrap();
        assert_eq!(endpoint.id.as_str(), "api");
        assert_eq!(endpoint.url.path(), "/health");
    }

    #[test]
    fn endpoint_rejects_relative_url() {
        assert_matches!(
            Endpoint::new("api", "/health"),
            Err(ProbeError::InvalidUrl { url, .. }) if url == "/health"
        );
    }
}
