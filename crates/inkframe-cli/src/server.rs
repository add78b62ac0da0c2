use std::io::{self, ErrorKind};
use std::net::{TcpListener, TcpStream};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use inkframe_contracts::events::ProgressEvent;
use inkframe_engine::{build_client, ComicConfig, ComicPipeline, RunOutcome, StoryPrompt};
use reqwest::Url;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::{accept_hdr, Message as WsMessage, WebSocket};

const STORY_PROMPT_PARAM: &str = "storyPrompt";
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Binds `addr` and serves one comic run per WebSocket connection.
pub fn serve(addr: &str, config: ComicConfig) -> Result<()> {
    let listener = TcpListener::bind(addr).with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, transport = config.transport.provider_name(), "listening");
    serve_listener(listener, Arc::new(config))
}

pub(crate) fn serve_listener(listener: TcpListener, config: Arc<ComicConfig>) -> Result<()> {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(error = %err, "failed to accept connection");
                continue;
            }
        };
        let config = Arc::clone(&config);
        thread::spawn(move || {
            let peer = stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            if let Err(err) = handle_connection(stream, &config) {
                tracing::warn!(peer = %peer, error = %err, "connection ended with error");
            }
        });
    }
    Ok(())
}

/// Handshake, run, forward, close. An unusable prompt is refused with a 400
/// before any stage runs.
fn handle_connection(stream: TcpStream, config: &ComicConfig) -> Result<()> {
    let mut story: Option<StoryPrompt> = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match story_from_request(request) {
            Ok(prompt) => {
                story = Some(prompt);
                Ok(response)
            }
            Err(message) => Err(bad_request(message)),
        }
    };
    let mut ws = accept_hdr(stream, callback)
        .map_err(|err| anyhow!("websocket handshake failed: {err}"))?;
    let Some(story) = story else {
        bail!("handshake accepted without a story prompt");
    };

    let client = match build_client(config) {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(error = %err, "generation client unavailable");
            send_event(&mut ws, &ProgressEvent::failed(err.to_string()))?;
            close_socket(&mut ws);
            return Ok(());
        }
    };

    let (tx, rx) = mpsc::channel::<ProgressEvent>();
    let worker_config = config.clone();
    let worker = thread::spawn(move || {
        let mut tx = tx;
        ComicPipeline::new(&*client, &worker_config).run(&story, &mut tx)
    });

    let mut connected = true;
    for event in rx {
        if !connected {
            continue;
        }
        if let Err(err) = send_event(&mut ws, &event) {
            tracing::info!(error = %err, "client went away; run continues without a listener");
            connected = false;
        }
    }

    let outcome = worker
        .join()
        .map_err(|_| anyhow!("pipeline worker panicked"))?;
    match outcome {
        RunOutcome::Completed(layout) => {
            tracing::info!(grid = %layout.grid, pages = layout.pages.len(), "streamed comic run")
        }
        RunOutcome::Failed(message) => {
            tracing::info!(error = %message, "streamed failed comic run")
        }
    }
    if connected {
        close_socket(&mut ws);
    }
    Ok(())
}

fn story_from_request(request: &Request) -> Result<StoryPrompt, String> {
    let target = request
        .uri()
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or("/");
    let url = Url::parse(&format!("http://inkframe.local{target}"))
        .map_err(|err| format!("invalid request target: {err}"))?;
    let raw = url
        .query_pairs()
        .find(|(key, _)| key == STORY_PROMPT_PARAM)
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default();
    StoryPrompt::new(raw).map_err(|err| err.to_string())
}

fn bad_request(message: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

fn send_event(ws: &mut WebSocket<TcpStream>, event: &ProgressEvent) -> Result<()> {
    let raw = serde_json::to_string(event).context("failed to serialize progress event")?;
    ws.send(WsMessage::Text(raw.into()))
        .context("failed to send progress event")
}

/// Sends a close frame and waits briefly for the peer to acknowledge it.
fn close_socket(ws: &mut WebSocket<TcpStream>) {
    let _ = ws.get_ref().set_read_timeout(Some(CLOSE_DRAIN_TIMEOUT));
    if let Err(err) = ws.close(None) {
        if !is_disconnect(&err) {
            tracing::debug!(error = %err, "websocket close failed");
        }
        return;
    }
    loop {
        match ws.read() {
            Ok(_) => continue,
            Err(err) => {
                if !is_disconnect(&err) {
                    tracing::debug!(error = %err, "websocket close handshake incomplete");
                }
                break;
            }
        }
    }
}

fn is_disconnect(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => true,
        tungstenite::Error::Io(io_err) => is_disconnect_kind(io_err.kind()),
        _ => false,
    }
}

fn is_disconnect_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}
