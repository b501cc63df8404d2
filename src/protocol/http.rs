// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single-request HTTP primitive for stateless devices.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

// ============================================================================
// HttpConfig
// ============================================================================

/// Configuration for one-shot HTTP requests.
///
/// HTTP devices are stateless: every request builds its own client, so no
/// connection or session is reused between calls.
///
/// # Examples
///
/// ```
/// use device_lifecycle::protocol::HttpConfig;
/// use std::time::Duration;
///
/// let config = HttpConfig::new().with_timeout(Duration::from_secs(5));
/// assert_eq!(config.timeout(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    timeout: Duration,
}

impl HttpConfig {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a configuration with the default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn client(&self) -> Result<Client, ProtocolError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(ProtocolError::Http)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Performs a single HTTP request.
///
/// # Errors
///
/// Returns [`ProtocolError::Timeout`] if the request exceeds the configured
/// timeout, [`ProtocolError::Status`] for any non-success status, and
/// [`ProtocolError::Http`] for other transport failures.
pub async fn request(
    config: &HttpConfig,
    method: Method,
    url: &str,
) -> Result<Response, ProtocolError> {
    request_with(config, method, url, |builder| builder).await
}

/// Performs a single HTTP request, letting the caller add headers or a body.
///
/// # Errors
///
/// Same as [`request`].
///
/// # Examples
///
/// ```no_run
/// use device_lifecycle::protocol::{HttpConfig, Method, request_with};
///
/// # async fn example() -> Result<(), device_lifecycle::ProtocolError> {
/// let response = request_with(
///     &HttpConfig::default(),
///     Method::POST,
///     "http://192.168.1.20/api/power",
///     |builder| builder.json(&serde_json::json!({"on": true})),
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn request_with<F>(
    config: &HttpConfig,
    method: Method,
    url: &str,
    configure: F,
) -> Result<Response, ProtocolError>
where
    F: FnOnce(RequestBuilder) -> RequestBuilder,
{
    let client = config.client()?;

    tracing::debug!(method = %method, url = %url, "Sending HTTP request");

    let response = configure(client.request(method, url))
        .send()
        .await
        .map_err(|err| map_transport_error(err, config.timeout))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProtocolError::Status {
            code: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
        });
    }

    tracing::debug!(status = status.as_u16(), "Received HTTP response");

    Ok(response)
}

fn map_transport_error(err: reqwest::Error, timeout: Duration) -> ProtocolError {
    if err.is_timeout() {
        ProtocolError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
    } else {
        ProtocolError::Http(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_config_default_values() {
        let config = HttpConfig::new();
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config, HttpConfig::default());
    }

    #[test]
    fn http_config_with_timeout() {
        let config = HttpConfig::new().with_timeout(Duration::from_millis(250));
        assert_eq!(config.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn http_config_builds_client() {
        assert!(HttpConfig::new().client().is_ok());
    }

    #[tokio::test]
    async fn invalid_url_is_transport_error() {
        let result = request(&HttpConfig::new(), Method::GET, "not a url").await;
        assert!(matches!(result, Err(ProtocolError::Http(_))));
    }
}
