//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use async_trait::async_trait;
use lib_netaccess::{Event, Subscriber};

/// A minimal HTTP/1.1 server answering from a script.
///
/// Each connection gets the next scripted `(status, body)`; the last entry
/// repeats once the script is used up. Every response closes the connection.
pub struct MockServer {
    pub addr: std::net::SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    pub async fn start(script: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (hits_srv, requests_srv) = (Arc::clone(&hits), Arc::clone(&requests));
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let n = hits_srv.fetch_add(1, Ordering::SeqCst);
                let (status, body) = script[n.min(script.len() - 1)];
                let requests = Arc::clone(&requests_srv);
                tokio::spawn(async move {
                    if let Some(head) = respond(socket, status, body).await {
                        requests.lock().unwrap().push(head);
                    }
                });
            }
        });

        Self { addr, hits, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Request heads received so far (request line and headers).
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn respond(mut socket: TcpStream, status: u16, body: &str) -> Option<String> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 2048];
    let head_end = loop {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        raw.extend_from_slice(&buf[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&raw[..head_end]).into_owned();

    let content_length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut received = raw.len() - head_end;
    while received < content_length {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            break;
        }
        received += n;
    }

    let response = format!(
        "HTTP/1.1 {} Mock\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await.ok()?;
    socket.shutdown().await.ok();
    Some(head)
}

/// A local address nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/", addr)
}

/// Forwards every delivered event into a channel.
pub struct ChannelSubscriber(pub mpsc::UnboundedSender<Event>);

impl ChannelSubscriber {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self(tx)), rx)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
        self.0.send(event.clone())?;
        Ok(())
    }
}
