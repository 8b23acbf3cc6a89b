use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;

use super::client;
use crate::command::ConsoleCommand;

/// Handles shared between the [`super::WebSystem`] and the accept thread.
#[derive(Clone)]
pub struct FeedShared {
    pub inbound_tx: Sender<ConsoleCommand>,
    pub clients: Arc<Mutex<Vec<Sender<String>>>>,
    pub latest_state: Arc<Mutex<String>>,
    pub shutdown: Arc<AtomicBool>,
}

impl FeedShared {
    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    fn state_json(&self) -> String {
        self.latest_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Bind `port` and serve HUD connections until `shared.shutdown` is set.
pub fn spawn_accept_loop(port: u16, shared: FeedShared) -> anyhow::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    // Polled so the shutdown flag is noticed
    listener.set_nonblocking(true)?;
    log::info!("HUD feed listening on ws://0.0.0.0:{port}");

    let handle = thread::Builder::new()
        .name("cockpit-web-accept".into())
        .spawn(move || {
            let mut next_client = 0usize;
            while !shared.stopping() {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        log::debug!("HUD connection from {peer}");
                        let _ = stream.set_nonblocking(false);
                        if accept_client(stream, &shared, next_client) {
                            next_client += 1;
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(50));
                    }
                    Err(e) => {
                        if !shared.stopping() {
                            log::error!("HUD accept error: {e}");
                        }
                        break;
                    }
                }
            }
            log::info!("HUD accept thread shutting down");
        })?;

    Ok(handle)
}

/// Answer plain HTTP inline or upgrade to a WebSocket client thread.
/// Returns `true` when a client thread was started.
fn accept_client(mut stream: TcpStream, shared: &FeedShared, client_id: usize) -> bool {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut head = vec![0u8; 4096];
    let n = match stream.read(&mut head) {
        Ok(n) if n > 0 => n,
        _ => return false,
    };
    head.truncate(n);

    let request = String::from_utf8_lossy(&head).into_owned();
    let state = shared.state_json();
    if !is_websocket_upgrade(&request) {
        let (status, body) = route(request_path(&request), &state);
        write_response(&mut stream, status, &body);
        return false;
    }

    // Short timeout so the client loop can interleave reads and writes
    let _ = stream.set_read_timeout(Some(Duration::from_millis(50)));
    let ws = match tungstenite::accept(Prefixed::new(head, stream)) {
        Ok(ws) => ws,
        Err(e) => {
            log::debug!("WebSocket handshake failed: {e}");
            return false;
        }
    };

    let (outbound_tx, outbound_rx) = crossbeam_channel::bounded(256);
    shared
        .clients
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(outbound_tx);

    let inbound_tx = shared.inbound_tx.clone();
    let shutdown = shared.shutdown.clone();
    let spawned = thread::Builder::new()
        .name(format!("cockpit-web-client-{client_id}"))
        .spawn(move || client::run_client(ws, inbound_tx, outbound_rx, state, shutdown, client_id));
    match spawned {
        Ok(_) => true,
        Err(e) => {
            log::warn!("Failed to spawn HUD client thread: {e}");
            false
        }
    }
}

fn is_websocket_upgrade(request: &str) -> bool {
    request.lines().any(|line| {
        let Some((name, value)) = line.split_once(':') else {
            return false;
        };
        name.trim().eq_ignore_ascii_case("upgrade") && value.trim().eq_ignore_ascii_case("websocket")
    })
}

fn request_path(request: &str) -> &str {
    request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
}

fn route(path: &str, state: &str) -> (&'static str, String) {
    match path {
        "/health" => ("200 OK", r#"{"status":"ok"}"#.to_string()),
        "/state" if !state.is_empty() => ("200 OK", state.to_string()),
        "/state" => ("503 Service Unavailable", r#"{"error":"no state yet"}"#.to_string()),
        _ => ("404 Not Found", r#"{"error":"not found"}"#.to_string()),
    }
}

fn write_response(stream: &mut TcpStream, status: &str, body: &str) {
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
        body.len()
    );
    if let Err(e) = stream
        .write_all(head.as_bytes())
        .and_then(|()| stream.write_all(body.as_bytes()))
        .and_then(|()| stream.flush())
    {
        log::debug!("HUD HTTP response failed: {e}");
    }
}

/// A stream whose first reads return bytes already consumed while sniffing
/// the request, so the handshake sees the full upgrade request.
struct Prefixed {
    head: Cursor<Vec<u8>>,
    stream: TcpStream,
}

impl Prefixed {
    fn new(head: Vec<u8>, stream: TcpStream) -> Self {
        Self {
            head: Cursor::new(head),
            stream,
        }
    }
}

impl Read for Prefixed {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.head.read(buf)? {
            0 => self.stream.read(buf),
            n => Ok(n),
        }
    }
}

impl Write for Prefixed {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}
