//! Scriptable in-process PepTalk server for tests.
//!
//! Every request line is handed to a reply function together with its id;
//! the function decides what goes back on the wire.

use crate::connection::ConnectionConfig;
use peptalk_protocol::LineFramer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the mock server does with one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Write these lines (terminators are added).
    Lines(Vec<String>),
    /// Never answer.
    Silent,
    /// Drop the connection.
    Close,
}

impl MockReply {
    pub fn line(line: impl Into<String>) -> Self {
        MockReply::Lines(vec![line.into()])
    }

    /// `ok` with an escaped body.
    pub fn ok(id: u64, body: &str) -> Self {
        if body.is_empty() {
            MockReply::line(format!("{} ok", id))
        } else {
            MockReply::line(format!("{} ok {}", id, peptalk_protocol::escape(body)))
        }
    }

    pub fn error(id: u64, kind: &str, description: &str) -> Self {
        MockReply::line(format!(
            "{} error {} {}",
            id,
            kind,
            peptalk_protocol::escape(description)
        ))
    }

    /// Accepts the protocol handshake and answers everything else with `ok`.
    pub fn default_for(id: u64, text: &str) -> Self {
        if text.starts_with("protocol") {
            MockReply::line(format!("{} protocol peptalk noevents", id))
        } else {
            MockReply::ok(id, "")
        }
    }
}

type Handler = dyn Fn(u64, &str) -> MockReply + Send + Sync;

/// A running mock server. Stops when dropped.
pub struct MockServer {
    addr: SocketAddr,
    received: Arc<parking_lot::Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Binds an ephemeral local port and starts serving.
    pub async fn start<F>(handler: F) -> std::io::Result<Self>
    where
        F: Fn(u64, &str) -> MockReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let log = received.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, handler.clone(), log.clone()));
            }
        });

        Ok(Self {
            addr,
            received,
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Client configuration pointing at this server.
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.addr.ip().to_string())
            .with_port(self.addr.port())
            .with_request_timeout(Duration::from_secs(2))
    }

    /// Request texts received so far (without ids), across all connections.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    handler: Arc<Handler>,
    received: Arc<parking_lot::Mutex<Vec<String>>>,
) {
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let lines = match framer.feed(&buf[..n]) {
            Ok(lines) => lines,
            Err(_) => return,
        };

        for line in lines {
            let Some((id, text)) = line.split_once(' ') else {
                continue;
            };
            let Ok(id) = id.parse::<u64>() else {
                continue;
            };
            received.lock().push(text.to_string());

            match handler(id, text) {
                MockReply::Lines(replies) => {
                    let mut out = String::new();
                    for reply in replies {
                        out.push_str(&reply);
                        out.push_str("\r\n");
                    }
                    if socket.write_all(out.as_bytes()).await.is_err() {
                        return;
                    }
                }
                MockReply::Silent => {}
                MockReply::Close => return,
            }
        }
    }
}
