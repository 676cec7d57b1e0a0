//! In-process fake recorder for network tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::request::ServerInfo;
use crate::wire::{CodecError, RequestFrame, decode_request};

/// What the fake does with one request.
pub(crate) enum Reaction {
    /// Send the bytes and close.
    Reply(Vec<u8>),
    /// Send the bytes and keep the socket open.
    ReplyAndHold(Vec<u8>),
    /// Send the bytes in two halves with a pause between them.
    Split(Vec<u8>, Duration),
    /// Never answer.
    Silent,
}

type Handler = dyn Fn(&RequestFrame) -> Reaction + Send + Sync;

pub(crate) struct FakeRecorder {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RequestFrame>>>,
    task: JoinHandle<()>,
}

impl FakeRecorder {
    pub(crate) async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RequestFrame) -> Reaction + Send + Sync + 'static,
    {
        Self::start_on(0, handler).await
    }

    /// Listen on a given loopback port, or any free one for `0`.
    pub(crate) async fn start_on<F>(port: u16, handler: F) -> Self
    where
        F: Fn(&RequestFrame) -> Reaction + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let task = {
            let connections = Arc::clone(&connections);
            let requests = Arc::clone(&requests);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let handler = Arc::clone(&handler);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(serve(stream, handler, requests));
                }
            })
        };

        Self {
            addr,
            connections,
            requests,
            task,
        }
    }

    pub(crate) fn server(&self) -> ServerInfo {
        ServerInfo::new("127.0.0.1", self.addr.port())
    }

    pub(crate) fn port(&self) -> u16 {
        self.addr.port()
    }

    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<RequestFrame> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeRecorder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, handler: Arc<Handler>, requests: Arc<Mutex<Vec<RequestFrame>>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let request = loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        match decode_request(&buf) {
            Ok(request) => break request,
            Err(CodecError::Incomplete) => continue,
            Err(_) => return,
        }
    };
    requests.lock().unwrap().push(request.clone());

    match handler(&request) {
        Reaction::Reply(bytes) => {
            let _ = stream.write_all(&bytes).await;
            let _ = stream.shutdown().await;
        }
        Reaction::ReplyAndHold(bytes) => {
            let _ = stream.write_all(&bytes).await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Reaction::Split(bytes, pause) => {
            let (head, tail) = bytes.split_at(bytes.len() / 2);
            let _ = stream.write_all(head).await;
            tokio::time::sleep(pause).await;
            let _ = stream.write_all(tail).await;
            let _ = stream.shutdown().await;
        }
        Reaction::Silent => tokio::time::sleep(Duration::from_secs(30)).await,
    }
}

/// A loopback port with nothing listening on it.
pub(crate) async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
