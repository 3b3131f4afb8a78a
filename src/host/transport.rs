//! Transport layer for scheduler calls
//!
//! - [`RpcTransport`]: one remote method call, request to response
//! - [`XmlRpcTransport`]: XML-RPC over HTTP with basic authentication
//!
//! The in-memory scheduler used by tests lives in [`crate::mock`].

use std::time::Duration;

use lava_protocol::{decode_response, encode_call, MethodResponse, ProtocolError, Value};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

use crate::config::SchedulerSettings;

/// Transport for scheduler method calls
pub trait RpcTransport: Send + Sync {
    /// Call `method` and return its result or fault
    fn call(&self, method: &str, params: &[Value]) -> Result<MethodResponse, TransportError>;
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("malformed response: {0}")]
    Protocol(#[from] ProtocolError),
}

/// XML-RPC over HTTP
pub struct XmlRpcTransport {
    client: Client,
    url: String,
    user: String,
    token: String,
}

impl XmlRpcTransport {
    pub fn new(settings: &SchedulerSettings) -> Result<Self, TransportError> {
        let url = settings.rpc_url();
        let client = Client::builder()
            .connect_timeout(settings.timeouts.connect_timeout())
            // Result downloads for long jobs can be large
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| TransportError::Connection {
                url: url.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            url,
            user: settings.user.clone(),
            token: settings.token.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RpcTransport for XmlRpcTransport {
    fn call(&self, method: &str, params: &[Value]) -> Result<MethodResponse, TransportError> {
        tracing::trace!(method = %method, url = %self.url, "rpc call");
        let body = encode_call(method, params);

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.token))
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let text = response.text().map_err(|e| self.request_error(e))?;
        Ok(decode_response(&text)?)
    }
}

impl XmlRpcTransport {
    fn request_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                url: self.url.clone(),
            }
        } else {
            // reqwest errors carry the URL; strip it to keep credentials out
            TransportError::Connection {
                url: self.url.clone(),
                message: err.without_url().to_string(),
            }
        }
    }
}

impl std::fmt::Debug for XmlRpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlRpcTransport")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeout::TimeoutConfig;

    fn settings(port: u16) -> SchedulerSettings {
        SchedulerSettings {
            host: "127.0.0.1".to_string(),
            port,
            user: "ci".to_string(),
            token: "s3cret".to_string(),
            publisher_port: 5500,
            timeouts: TimeoutConfig::from_config(None, Some(1)),
        }
    }

    #[test]
    fn test_url_has_no_credentials() {
        let transport = XmlRpcTransport::new(&settings(8080)).unwrap();
        assert_eq!(transport.url(), "http://127.0.0.1:8080/RPC2");
        assert!(!format!("{:?}", transport).contains("s3cret"));
    }

    #[test]
    fn test_refused_connection() {
        let transport = XmlRpcTransport::new(&settings(1)).unwrap();
        let err = transport.call("system.version", &[]).unwrap_err();
        assert!(matches!(err, TransportError::Connection { .. } | TransportError::Timeout { .. }));
        assert!(!err.to_string().contains("s3cret"));
    }
}
