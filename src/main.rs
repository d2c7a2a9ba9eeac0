//! camwatch - live MJPEG stream and on-demand snapshots from one camera

use std::io::{self, Write};
use std::net::TcpStream as StdTcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use camwatch::stream::mjpeg;
use camwatch::{
    capture, CameraError, CameraSession, Config, FrameAnnotator, ImageStore, LiveStreamSession,
    MemoryImageStore, SnapshotController,
};
use color_eyre::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Longest request line plus headers buffered per connection
const MAX_REQUEST_HEAD: u64 = 8 * 1024;

struct App {
    session: Arc<CameraSession>,
    annotator: Arc<FrameAnnotator>,
    snapshots: SnapshotController,
    frame_timeout: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camwatch=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("camwatch launching...");

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    // Hardware or simulator, decided once
    let device = capture::probe(&config);
    let session = Arc::new(CameraSession::new(device, config.stream.warmup()));
    let store: Arc<dyn ImageStore> = Arc::new(MemoryImageStore::new());

    let app = Arc::new(App {
        session: Arc::clone(&session),
        annotator: Arc::new(FrameAnnotator::new(config.annotate.clone())),
        snapshots: SnapshotController::new(
            Arc::clone(&session),
            store,
            config.snapshot.output_dir.clone(),
        ),
        frame_timeout: config.stream.frame_timeout(),
    });

    let listener = TcpListener::bind(&config.server.listen).await?;
    info!("Listening on {}", listener.local_addr()?);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        continue;
                    }
                };
                let app = Arc::clone(&app);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(app, socket).await {
                        debug!("Connection from {} ended: {}", peer, e);
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("camwatch shutting down");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || session.preempt()).await?;
    Ok(())
}

async fn handle_connection(app: Arc<App>, socket: TcpStream) -> io::Result<()> {
    let mut reader = BufReader::new(socket);
    let head = read_request_head(&mut reader).await?;

    let mut socket = reader.into_inner();
    let Some((method, path)) = head else {
        warn!("Request head over {} bytes, refusing", MAX_REQUEST_HEAD);
        let response = text_response("431 Request Header Fields Too Large", "Request too large\n");
        return socket.write_all(response.as_bytes()).await;
    };
    debug!("{} {}", method, path);

    match (method.as_str(), path.as_str()) {
        ("GET", "/stream.mjpg") => {
            let socket = socket.into_std()?;
            socket.set_nonblocking(false)?;
            tokio::task::spawn_blocking(move || serve_stream(&app, socket))
                .await
                .map_err(io::Error::other)?
        }
        ("GET" | "POST", "/snapshot") => {
            let capture_app = Arc::clone(&app);
            let captured = tokio::task::spawn_blocking(move || capture_app.snapshots.capture())
                .await
                .map_err(io::Error::other)?;
            let response = match captured {
                Ok(handle) => text_response(
                    "200 OK",
                    &format!("{} {}\n", handle.record, handle.location.display()),
                ),
                Err(e) => {
                    error!("Snapshot request failed: {}", e);
                    text_response("503 Service Unavailable", "Failed taking picture\n")
                }
            };
            socket.write_all(response.as_bytes()).await
        }
        _ => {
            socket
                .write_all(text_response("404 Not Found", "Not found\n").as_bytes())
                .await
        }
    }
}

/// Method and path of the request, or `None` when the request line and
/// headers together exceed [`MAX_REQUEST_HEAD`].
async fn read_request_head<R>(reader: R) -> io::Result<Option<(String, String)>>
where
    R: AsyncBufRead + Unpin,
{
    let mut reader = reader.take(MAX_REQUEST_HEAD);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await? == 0 || header.trim().is_empty() {
            break;
        }
    }
    if reader.limit() == 0 {
        return Ok(None);
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    Ok(Some((method, path)))
}

/// Runs on a blocking thread for as long as the viewer stays connected.
fn serve_stream(app: &App, mut socket: StdTcpStream) -> io::Result<()> {
    let peer = socket.peer_addr()?;
    let mut live = match LiveStreamSession::open(
        Arc::clone(&app.session),
        Arc::clone(&app.annotator),
        app.frame_timeout,
    ) {
        Ok(live) => live,
        Err(e @ CameraError::DeviceUnavailable(_)) => {
            warn!("Refusing stream for {}: {}", peer, e);
            let response = text_response("503 Service Unavailable", "Camera unavailable\n");
            return socket.write_all(response.as_bytes());
        }
        Err(e) => return Err(io::Error::other(e)),
    };

    info!("Streaming to {}", peer);
    write!(
        socket,
        "HTTP/1.1 200 OK\r\nAge: 0\r\nCache-Control: no-cache, private\r\nPragma: no-cache\r\nContent-Type: {}\r\n\r\n",
        mjpeg::content_type()
    )?;
    let result = live.stream_to(&mut socket);
    info!("Stream to {} closed after {} frames", peer, live.frames_sent());
    result
}

fn text_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    )
}
