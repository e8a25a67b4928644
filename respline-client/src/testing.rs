//! Scripted in-process RESP server for tests.

use crate::connection::{Connection, ConnectionConfig};
use parking_lot::Mutex;
use respline_protocol::{Decoder, Reply};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

/// What the server does with one request.
pub(crate) enum Respond {
    Raw(Vec<u8>),
    Delayed(Duration, Vec<u8>),
    /// Never answer.
    Nothing,
    /// Drop the connection without answering.
    Close,
}

impl Respond {
    pub fn reply(reply: Reply) -> Self {
        Respond::Raw(reply.encode().to_vec())
    }

    pub fn raw(bytes: &[u8]) -> Self {
        Respond::Raw(bytes.to_vec())
    }

    pub fn after(delay: Duration, bytes: &[u8]) -> Self {
        Respond::Delayed(delay, bytes.to_vec())
    }
}

/// `INFO server` output announcing `version`.
pub(crate) fn info_reply(version: &str) -> Respond {
    Respond::reply(Reply::bulk(format!(
        "# Server\r\nredis_version:{}\r\nredis_mode:standalone\r\n",
        version
    )))
}

type Handler = Box<dyn FnMut(&[String]) -> Respond + Send>;

/// Answers each request with whatever the handler returns, strictly in order.
#[derive(Clone)]
pub(crate) struct FakeServer {
    handler: Arc<Mutex<Handler>>,
    chunk: Option<usize>,
    accepted: Arc<AtomicUsize>,
}

impl FakeServer {
    pub fn new<F>(handler: F) -> Self
    where
        F: FnMut(&[String]) -> Respond + Send + 'static,
    {
        Self {
            handler: Arc::new(Mutex::new(Box::new(handler))),
            chunk: None,
            accepted: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Writes replies in pieces of at most `size` bytes.
    pub fn chunked(mut self, size: usize) -> Self {
        self.chunk = Some(size.max(1));
        self
    }

    /// Connects a client over an in-memory pipe.
    pub fn connect(&self, config: ConnectionConfig) -> Arc<Connection> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.accepted.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(self.clone().serve(server));
        Connection::from_stream(client, config)
    }

    /// Serves loopback TCP connections; returns a config pointing at them.
    pub async fn listen(&self) -> ConnectionConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = self.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                server.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(server.clone().serve(stream));
            }
        });
        ConnectionConfig::new("127.0.0.1", port).with_request_timeout(Duration::from_secs(5))
    }

    /// Number of connections served so far.
    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    async fn serve<S>(self, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut decoder = Decoder::new();
        let mut buf = vec![0u8; 4096];

        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            decoder.extend(&buf[..n]);

            loop {
                let args = match decoder.decode_reply() {
                    Ok(Some(request)) => request_args(request),
                    Ok(None) => break,
                    Err(_) => return,
                };
                let respond = (&mut *self.handler.lock())(&args);
                let bytes = match respond {
                    Respond::Raw(bytes) => bytes,
                    Respond::Delayed(delay, bytes) => {
                        tokio::time::sleep(delay).await;
                        bytes
                    }
                    Respond::Nothing => continue,
                    Respond::Close => return,
                };
                if self.write(&mut stream, &bytes).await.is_err() {
                    return;
                }
            }
        }
    }

    async fn write<S>(&self, stream: &mut S, bytes: &[u8]) -> std::io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        match self.chunk {
            Some(size) => {
                for piece in bytes.chunks(size) {
                    stream.write_all(piece).await?;
                    stream.flush().await?;
                    tokio::task::yield_now().await;
                }
            }
            None => stream.write_all(bytes).await?,
        }
        stream.flush().await
    }
}

/// Flattens a request frame into its string arguments.
fn request_args(request: Reply) -> Vec<String> {
    request
        .into_array()
        .unwrap_or_default()
        .into_iter()
        .map(|arg| arg.into_string().unwrap_or_default())
        .collect()
}
