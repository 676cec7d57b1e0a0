//! Directory service lookup for devices addressed by name or MAC.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AppError, Result};

/// Body returned by `GET <directory>/api/v1/resolve?id=<identifier>`.
#[derive(Debug, Deserialize)]
struct ResolveReply {
    status: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

/// A resolved device endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub address: String,
    /// Replaces the configured primary port when present.
    pub port: Option<u16>,
}

impl Resolved {
    /// Parse a directory reply body; anything but a well-formed success is an error.
    pub fn from_json(body: &str) -> Result<Self> {
        let reply: ResolveReply =
            serde_json::from_str(body).map_err(|e| AppError::parse(format!("directory reply: {e}")))?;

        if !reply.status.eq_ignore_ascii_case("ok") {
            return Err(AppError::parse(format!("directory status {}", reply.status)));
        }
        let address = reply
            .address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| AppError::parse("directory reply has no address"))?;

        Ok(Self {
            address,
            port: reply.port.filter(|p| *p != 0),
        })
    }
}

/// HTTP client for the device directory.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    client: Client,
    base_url: String,
}

impl DirectoryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn resolve(&self, identifier: &str) -> Result<Resolved> {
        let url = format!("{base}/api/v1/resolve", base = self.base_url);
        debug!("Resolving {identifier} via {url}");

        let response = self.client.get(&url).query(&[("id", identifier)]).send().await?;
        if !response.status().is_success() {
            return Err(AppError::parse(format!("directory returned HTTP {}", response.status())));
        }
        let body = response.text().await?;
        Resolved::from_json(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_success() {
        let resolved = Resolved::from_json(r#"{"status":"ok","address":"203.0.113.7","port":8100}"#).unwrap();
        assert_eq!(resolved.address, "203.0.113.7");
        assert_eq!(resolved.port, Some(8100));

        let resolved = Resolved::from_json(r#"{"status":"OK","address":"nvr.example.net"}"#).unwrap();
        assert_eq!(resolved.port, None);
    }

    #[test]
    fn test_parse_rejects_failures() {
        assert!(Resolved::from_json(r#"{"status":"not_found"}"#).is_err());
        assert!(Resolved::from_json(r#"{"status":"ok","address":"  "}"#).is_err());
        assert!(Resolved::from_json("<html>").is_err());
    }

    #[tokio::test]
    async fn test_resolve_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 2048];
            let n = stream.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            let body = r#"{"status":"ok","address":"10.1.2.3","port":9000}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            request
        });

        let client = DirectoryClient::new(&format!("http://127.0.0.1:{port}/"), Duration::from_secs(5)).unwrap();
        let resolved = client.resolve("00:11:22:33:44:55").await.unwrap();

        assert_eq!(resolved, Resolved {
            address: "10.1.2.3".to_string(),
            port: Some(9000),
        });
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/v1/resolve?id=00%3A11%3A22%3A33%3A44%3A55 "));
    }
}
