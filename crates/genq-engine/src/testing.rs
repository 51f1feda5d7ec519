use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::backend::ImageBackend;
use crate::error::GenerationError;

pub(crate) const STUB_IMAGE_BYTES: &[u8] = b"\x89PNG-stub";

#[derive(Debug, Clone)]
pub(crate) enum StubReply {
    Image,
    TextOnly,
    Status(u16, String),
}

/// Scripted backend. Records the model and payload of every call.
pub(crate) struct StubBackend {
    reply: StubReply,
    has_key: bool,
    pub(crate) calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl StubBackend {
    pub(crate) fn new(reply: StubReply) -> Self {
        Self {
            reply,
            has_key: true,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn without_key(mut self) -> Self {
        self.has_key = false;
        self
    }
}

impl ImageBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn ensure_credentials(&self) -> Result<()> {
        if !self.has_key {
            return Err(GenerationError::CredentialMissing.into());
        }
        Ok(())
    }

    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
        self.calls
            .lock()
            .map_err(|_| anyhow::anyhow!("stub call log poisoned"))?
            .push((model.to_string(), payload.clone()));
        match &self.reply {
            StubReply::Image => Ok(json!({
                "candidates": [{"content": {"parts": [
                    {"text": "generated"},
                    {"inlineData": {"mimeType": "image/png", "data": BASE64.encode(STUB_IMAGE_BYTES)}}
                ]}}]
            })),
            StubReply::TextOnly => Ok(json!({
                "candidates": [{"content": {"parts": [{"text": "no can do"}]}}]
            })),
            StubReply::Status(status, body) => Err(GenerationError::ExternalApi {
                status: *status,
                body: body.clone(),
            }
            .into()),
        }
    }
}

/// Answers one connection per scripted `(status line, body)` pair, in order,
/// and hands back the raw request texts. Returns the base URL (`/v1beta`
/// path prefix included) and the server thread.
pub(crate) fn serve(
    replies: Vec<(&'static str, String)>,
) -> Result<(String, thread::JoinHandle<Vec<String>>)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let handle = thread::spawn(move || {
        let mut requests = Vec::with_capacity(replies.len());
        for (status_line, body) in replies {
            let (mut stream, _) = listener.accept().expect("accept");
            requests.push(read_http_request(&mut stream));
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).expect("write");
            stream.flush().expect("flush");
        }
        requests
    });
    Ok((format!("http://{addr}/v1beta"), handle))
}

pub(crate) fn serve_once(
    status_line: &'static str,
    body: String,
) -> Result<(String, thread::JoinHandle<Vec<String>>)> {
    serve(vec![(status_line, body)])
}

fn read_http_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let read = stream.read(&mut chunk).expect("read");
        if read == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..read]);
        let Some(header_end) = buf.windows(4).position(|window| window == b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= header_end + 4 + content_length {
            break;
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}
