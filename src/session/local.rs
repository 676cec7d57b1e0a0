//! Query the locally running recorder service over its IPC socket.
//!
//! The exchange uses the device framing: `SOM name FSP EOM` is answered
//! with `SOM name FSP value EOM`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::wire::{EOM, FSP, SOM};

const GET_TCP_PORT: &str = "GET_TCP_PORT";
const GET_DIR_ADDR: &str = "GET_DIR_ADDR";

#[derive(Debug, Clone)]
pub struct LocalChannel {
    path: PathBuf,
    timeout: Duration,
}

impl LocalChannel {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// TCP port the local service currently listens on.
    pub async fn tcp_port(&self) -> Result<u16> {
        let value = self.query(GET_TCP_PORT).await?;
        match value.trim().parse::<u16>() {
            Ok(port) if port != 0 => Ok(port),
            _ => Err(AppError::parse(format!("local channel port {value:?}"))),
        }
    }

    /// Directory service URL configured on the local service.
    pub async fn directory_address(&self) -> Result<String> {
        let value = self.query(GET_DIR_ADDR).await?;
        let value = value.trim();
        if value.is_empty() {
            return Err(AppError::parse("local channel returned no directory address"));
        }
        Ok(value.to_string())
    }

    #[cfg(unix)]
    async fn query(&self, name: &str) -> Result<String> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::UnixStream;
        use tokio::time::timeout;

        let exchange = async {
            let mut stream = UnixStream::connect(&self.path).await?;
            stream.write_all(&frame(name)).await?;

            let mut buf = Vec::new();
            let mut chunk = [0u8; 256];
            loop {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if buf.contains(&EOM) {
                    break;
                }
            }
            Ok::<_, AppError>(buf)
        };

        let buf = timeout(self.timeout, exchange)
            .await
            .map_err(|_| AppError::DeviceTimeout(format!("local channel {}", self.path.display())))??;
        parse_answer(name, &buf)
    }

    #[cfg(not(unix))]
    async fn query(&self, _name: &str) -> Result<String> {
        Err(AppError::config("local channel requires Unix domain sockets"))
    }
}

fn frame(name: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(name.len() + 3);
    frame.push(SOM);
    frame.extend_from_slice(name.as_bytes());
    frame.push(FSP);
    frame.push(EOM);
    frame
}

fn parse_answer(name: &str, buf: &[u8]) -> Result<String> {
    let end = buf
        .iter()
        .position(|&b| b == EOM)
        .ok_or_else(|| AppError::parse("local channel answer has no end marker"))?;
    let body = match buf.first() {
        Some(&SOM) => &buf[1..end],
        _ => return Err(AppError::parse("local channel answer has no start marker")),
    };

    let mut parts = body.splitn(2, |&b| b == FSP);
    let answered = parts.next().unwrap_or_default();
    if answered != name.as_bytes() {
        return Err(AppError::parse(format!(
            "local channel answered {} to {name}",
            String::from_utf8_lossy(answered)
        )));
    }
    let value = parts.next().unwrap_or_default();
    let value = value.strip_suffix(&[FSP]).unwrap_or(value);
    Ok(String::from_utf8_lossy(value).into_owned())
}
