//! Hand-rolled raw-TCP mock HTTP server for client tests, grounded on the
//! teacher's `start_mock_upload_server` in `device-sync::client` — a real
//! listener on loopback, not `wiremock`, so we don't add a mocking crate
//! the teacher's stack never uses.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct MockOutcome {
    pub status: u16,
    pub body: String,
}

pub fn json_response(status: u16, body: &str) -> MockOutcome {
    MockOutcome {
        status,
        body: body.to_string(),
    }
}

fn header_end_offset(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

async fn read_request(stream: &mut tokio::net::TcpStream) {
    let mut buffer = Vec::new();
    loop {
        let mut chunk = [0u8; 2048];
        let Ok(read) = stream.read(&mut chunk).await else {
            return;
        };
        if read == 0 {
            return;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(header_end) = header_end_offset(&buffer) {
            let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|line| line.split_once(':').filter(|(k, _)| k.eq_ignore_ascii_case("content-length")))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let mut body_read = buffer.len().saturating_sub(header_end + 4);
            while body_read < content_length {
                let mut chunk = [0u8; 2048];
                let Ok(read) = stream.read(&mut chunk).await else {
                    break;
                };
                if read == 0 {
                    break;
                }
                body_read += read;
            }
            return;
        }
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Error",
    }
}

async fn write_response(stream: &mut tokio::net::TcpStream, outcome: &MockOutcome) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        outcome.status,
        status_text(outcome.status),
        outcome.body.len(),
        outcome.body,
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

/// Serves `outcomes` in order, one per accepted connection; any request
/// past the end of the queue gets a 500 so an unexpected extra call fails
/// loudly rather than hanging.
pub async fn start_mock_server(outcomes: Vec<MockOutcome>) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let scripted = Arc::new(Mutex::new(VecDeque::from(outcomes)));

    let handle = tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(value) => value,
                Err(_) => break,
            };
            let scripted = Arc::clone(&scripted);
            tokio::spawn(async move {
                read_request(&mut stream).await;
                let outcome = scripted.lock().await.pop_front().unwrap_or(MockOutcome {
                    status: 500,
                    body: r#"{"error":{"type":"UNEXPECTED_REQUEST"}}"#.to_string(),
                });
                let _ = write_response(&mut stream, &outcome).await;
            });
        }
    });

    (format!("http://{addr}"), handle)
}
