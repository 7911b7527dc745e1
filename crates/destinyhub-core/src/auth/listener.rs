//! Local HTTP endpoint that captures the OAuth redirect.
//!
//! One listener is opened per login attempt, serves exactly one authorization
//! callback and is then closed. A stale browser tab hitting the old port later
//! finds nothing listening.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;

const LOOPBACK_HOST: &str = "127.0.0.1";

const CALLBACK_PATH: &str = "/callback";

/// Upper bound on the request head we are willing to buffer.
const MAX_REQUEST_BYTES: usize = 8192;

/// How long a single connection may take to send its request head.
const CONNECTION_READ_TIMEOUT: Duration = Duration::from_secs(10);

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Destiny Hub</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<h1>Authentication complete</h1>
<p>You can close this window and return to Destiny Hub.</p>
<script>window.close();</script>
</body>
</html>"#;

const DENIED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Destiny Hub</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<h1>Authentication cancelled</h1>
<p>Bungie.net did not grant access. Return to Destiny Hub to try again.</p>
</body>
</html>"#;

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("No authorization redirect arrived in time")]
    Timeout,

    #[error("Authorization denied: {0}")]
    Denied(String),

    #[error("Listener I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Query parameters of the authorization redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCallback {
    pub code: String,
    pub state: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Callback {
    Code(AuthorizationCallback),
    Denied(String),
}

/// Factory for per-attempt listeners.
#[derive(Debug, Clone, Default)]
pub struct LoopbackListener {
    ports: Option<(u16, u16)>,
    redirect_uri: Option<String>,
}

impl LoopbackListener {
    /// `ports` is an inclusive range tried in order; `None` lets the OS choose.
    pub fn new(ports: Option<(u16, u16)>) -> Self {
        Self {
            ports,
            redirect_uri: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            ports: config.callback_ports,
            redirect_uri: config.redirect_uri.clone(),
        }
    }

    /// Advertise `uri` instead of the listener's own address.
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    pub async fn start(&self) -> io::Result<ListenerHandle> {
        let listener = match self.ports {
            None => TcpListener::bind((LOOPBACK_HOST, 0)).await?,
            Some((start, end)) => Self::bind_in_range(start, end).await?,
        };
        let port = listener.local_addr()?.port();
        let redirect_uri = self
            .redirect_uri
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}{}", LOOPBACK_HOST, port, CALLBACK_PATH));

        info!(port, "OAuth callback listener started");
        Ok(ListenerHandle {
            listener: Some(listener),
            port,
            redirect_uri,
        })
    }

    async fn bind_in_range(start: u16, end: u16) -> io::Result<TcpListener> {
        for port in start..=end {
            match TcpListener::bind((LOOPBACK_HOST, port)).await {
                Ok(listener) => return Ok(listener),
                Err(e) => debug!(port, error = %e, "Callback port unavailable"),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("No available ports in range {}-{}", start, end),
        ))
    }
}

/// A bound listener. The port is released on `stop`, after the first
/// callback, or when the handle is dropped.
#[derive(Debug)]
pub struct ListenerHandle {
    listener: Option<TcpListener>,
    port: u16,
    redirect_uri: String,
}

impl ListenerHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Suspend until a redirect carrying `code` arrives, or `timeout` elapses.
    ///
    /// The listener is closed before this returns, whatever the outcome.
    pub async fn wait_for_code(
        &mut self,
        timeout: Duration,
    ) -> Result<AuthorizationCallback, ListenerError> {
        let listener = self.listener.as_ref().ok_or_else(|| {
            ListenerError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "callback listener already stopped",
            ))
        })?;

        let outcome = tokio::time::timeout(timeout, accept_callback(listener)).await;
        self.stop();

        match outcome {
            Ok(Ok(Callback::Code(callback))) => Ok(callback),
            Ok(Ok(Callback::Denied(reason))) => Err(ListenerError::Denied(reason)),
            Ok(Err(e)) => Err(ListenerError::Io(e)),
            Err(_) => {
                warn!(port = self.port, "Timed out waiting for OAuth callback");
                Err(ListenerError::Timeout)
            }
        }
    }

    pub fn stop(&mut self) {
        if self.listener.take().is_some() {
            debug!(port = self.port, "OAuth callback listener stopped");
        }
    }
}

async fn accept_callback(listener: &TcpListener) -> io::Result<Callback> {
    // Connections are read concurrently so an idle one (browser preconnect)
    // cannot hold up the real redirect. Dropping the set aborts the rest.
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                connections.spawn(read_callback(stream, peer));
            }
            Some(joined) = connections.join_next() => {
                let Ok(Some((mut stream, callback))) = joined else { continue };
                match callback {
                    Callback::Code(_) => {
                        write_page(&mut stream, "200 OK", SUCCESS_PAGE).await;
                        info!("Authorization code received");
                    }
                    Callback::Denied(_) => {
                        write_page(&mut stream, "400 Bad Request", DENIED_PAGE).await;
                    }
                }
                return Ok(callback);
            }
        }
    }
}

/// Read one connection's request. Returns the stream, still unanswered, when
/// it carries an authorization callback.
async fn read_callback(
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Option<(TcpStream, Callback)> {
    let target =
        match tokio::time::timeout(CONNECTION_READ_TIMEOUT, read_request_target(&mut stream)).await {
            Ok(Ok(Some(target))) => target,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                debug!(%peer, error = %e, "Dropped unreadable callback connection");
                return None;
            }
            Err(_) => {
                debug!(%peer, "Closed idle callback connection");
                return None;
            }
        };

    match parse_callback(&target) {
        Some(callback) => Some((stream, callback)),
        None => {
            debug!(%target, "Ignoring request without authorization code");
            write_page(&mut stream, "404 Not Found", "").await;
            None
        }
    }
}

/// Read the request head and return the request-target of the request line.
async fn read_request_target(stream: &mut TcpStream) -> io::Result<Option<String>> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buffer);
    let request_line = match head.lines().next() {
        Some(line) => line,
        None => return Ok(None),
    };
    let mut parts = request_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Ok(Some(target.to_string())),
        _ => Ok(None),
    }
}

fn parse_callback(target: &str) -> Option<Callback> {
    if !target.starts_with('/') {
        return None;
    }
    let url = Url::parse(&format!("http://{}{}", LOOPBACK_HOST, target)).ok()?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (Some(code), _) if !code.is_empty() => {
            Some(Callback::Code(AuthorizationCallback { code, state }))
        }
        (_, Some(error)) => Some(Callback::Denied(error_description.unwrap_or(error))),
        _ => None,
    }
}

async fn write_page(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = %e, "Failed to answer callback request");
    }
    let _ = stream.shutdown().await;
}
