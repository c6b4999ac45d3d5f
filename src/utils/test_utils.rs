use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::api::ChatRequest;
use crate::core::app::ChatApp;
use crate::core::chat_stream::{ChatBackend, FragmentStream, TransportError};
use crate::core::config::{Prompts, SamplingConfig};
use crate::core::history::HistoryArchive;

/// What the fake server does for one chat request.
#[derive(Debug, Clone)]
pub enum Script {
    Fragments(Vec<String>),
    FailMidStream {
        fragments: Vec<String>,
        error: TransportError,
    },
    Refuse(TransportError),
}

impl Script {
    pub fn fragments(items: &[&str]) -> Self {
        Script::Fragments(items.iter().map(|s| s.to_string()).collect())
    }
}

#[derive(Default)]
struct FakeState {
    scripts: VecDeque<Script>,
    requests: Vec<ChatRequest>,
    unloaded: Vec<String>,
    fail_unload: bool,
}

/// In-memory [`ChatBackend`] replaying scripted replies in order.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new(scripts: Vec<Script>) -> Self {
        let backend = Self::default();
        backend.lock().scripts = scripts.into();
        backend
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.lock().requests.clone()
    }

    pub fn unloaded(&self) -> Vec<String> {
        self.lock().unloaded.clone()
    }

    pub fn fail_unload(&self) {
        self.lock().fail_unload = true;
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn chat(&self, request: ChatRequest) -> Result<FragmentStream, TransportError> {
        let script = {
            let mut state = self.lock();
            state.requests.push(request);
            state.scripts.pop_front()
        };

        match script {
            Some(Script::Fragments(items)) => Ok(Box::pin(stream::iter(
                items.into_iter().map(Ok::<String, TransportError>),
            ))),
            Some(Script::FailMidStream { fragments, error }) => {
                let items = fragments
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(error)));
                Ok(Box::pin(stream::iter(items)))
            }
            Some(Script::Refuse(error)) => Err(error),
            None => Err(TransportError::Request("no scripted reply".to_string())),
        }
    }

    async fn unload(&self, model: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.unloaded.push(model.to_string());
        if state.fail_unload {
            Err(TransportError::Request("server gone".to_string()))
        } else {
            Ok(())
        }
    }
}

/// App with prompts `S`/`G`, default sampling, and an archive inside
/// `temp_dir`.
pub fn create_test_app(temp_dir: &TempDir, backend: FakeBackend) -> ChatApp {
    let prompts = Prompts {
        system_prompt: "S".to_string(),
        greeting: "G".to_string(),
    };
    ChatApp::from_parts(
        "test-model",
        &prompts,
        SamplingConfig::default(),
        HistoryArchive::new(temp_dir.path().join("history")),
        Arc::new(backend),
    )
}

/// Reads one HTTP/1.1 request (head plus `Content-Length` body) and returns
/// the body.
pub async fn read_http_request(socket: &mut TcpStream) -> String {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return String::new();
        }
        request.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&request).to_string();
        let Some(header_end) = text.find("\r\n\r\n") else {
            continue;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        let body_start = header_end + 4;
        if request.len() >= body_start + content_length {
            return String::from_utf8_lossy(&request[body_start..]).to_string();
        }
    }
}

/// Answers one request with `line` as the first chunk of an NDJSON body and
/// never finishes the body. The receiver gets the result of the next read on
/// the server side: `Ok(0)` means the client closed the connection.
pub async fn serve_unfinished_reply(
    line: &'static str,
) -> (String, oneshot::Receiver<io::Result<usize>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_http_request(&mut socket).await;

        let head = "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nTransfer-Encoding: chunked\r\n\r\n";
        let chunk = format!("{:x}\r\n{line}\r\n", line.len());
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(chunk.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();

        let mut buf = [0u8; 256];
        let outcome = match tokio::time::timeout(Duration::from_secs(10), socket.read(&mut buf)).await {
            Ok(read) => read,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "client kept the connection open")),
        };
        let _ = tx.send(outcome);
    });

    (format!("http://{addr}"), rx)
}

/// True when the server side saw the client hang up.
pub fn connection_closed(outcome: &io::Result<usize>) -> bool {
    match outcome {
        Ok(0) => true,
        Ok(_) => false,
        Err(err) => matches!(
            err.kind(),
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
        ),
    }
}
