use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;
use tracing::{debug, error, info, trace, warn};

use crate::ai::ClipScorer;
use crate::camera::CameraProvider;
use crate::config::{load_config, Config};
use crate::errors::{HatCheckError, HatCheckResult};
use crate::feedback::StatusBoard;
use crate::frame::StreamProvider;
use crate::ipc::{ControlMessage, Reply, StatusReport};
use crate::lifecycle::Controller;
use crate::scores::Vocabulary;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    pub camera: Option<u32>,
    pub autostart: bool,
}

/// Runs the screening service on a single-threaded runtime until Ctrl-C.
pub fn run_daemon(opts: DaemonOptions) -> HatCheckResult<()> {
    let mut cfg = load_config();
    if let Some(index) = opts.camera {
        cfg.camera_index = index;
    }
    debug!(camera = cfg.camera_index, vocabulary = ?cfg.vocabulary, "loaded configuration");
    run_local(serve(cfg, opts.autostart))?
}

/// Drives `fut` on a current-thread runtime inside a `LocalSet`.
///
/// Blocking work still in flight when `fut` completes (a model download,
/// an abandoned inference) is left behind instead of delaying exit.
pub fn run_local<F: Future>(fut: F) -> io::Result<F::Output> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let output = LocalSet::new().block_on(&rt, fut);
    rt.shutdown_background();
    Ok(output)
}

/// A parsed control message waiting for the daemon's answer.
pub struct Request {
    pub message: ControlMessage,
    reply: oneshot::Sender<Reply>,
}

impl Request {
    pub fn respond(self, reply: Reply) {
        if self.reply.send(reply).is_err() {
            debug!("control client went away before the reply");
        }
    }
}

/// Accepts control connections and reads each one on its own local task,
/// so a slow or silent client never holds up the others.
pub struct ControlServer {
    listener: UnixListener,
    tx: mpsc::Sender<Request>,
    rx: mpsc::Receiver<Request>,
    read_timeout: Duration,
}

impl ControlServer {
    pub fn bind(path: &Path) -> io::Result<Self> {
        if std::fs::remove_file(path).is_ok() {
            trace!(path = %path.display(), "removed stale socket");
        }
        let listener = UnixListener::bind(path)?;
        debug!(path = %path.display(), "socket bound");
        let (tx, rx) = mpsc::channel(16);
        Ok(Self {
            listener,
            tx,
            rx,
            read_timeout: READ_TIMEOUT,
        })
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Waits for the next complete request. Cancel-safe.
    ///
    /// Must be polled from within a `LocalSet`.
    pub async fn next_request(&mut self) -> Request {
        loop {
            tokio::select! {
                Some(request) = self.rx.recv() => return request,
                conn = self.listener.accept() => match conn {
                    Ok((stream, _)) => {
                        debug!("connection accepted");
                        let tx = self.tx.clone();
                        let read_timeout = self.read_timeout;
                        tokio::task::spawn_local(async move {
                            if let Err(e) = serve_connection(stream, tx, read_timeout).await {
                                warn!("control connection failed: {e}");
                            }
                        });
                    }
                    Err(e) => error!("failed to accept connection: {e}"),
                },
            }
        }
    }
}

async fn serve_connection(
    mut stream: UnixStream,
    requests: mpsc::Sender<Request>,
    read_timeout: Duration,
) -> HatCheckResult<()> {
    let mut buf = Vec::new();
    tokio::time::timeout(read_timeout, stream.read_to_end(&mut buf))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "control request timed out"))??;
    let message: ControlMessage = serde_json::from_slice(&buf)?;
    debug!(?message, "received message");

    let (reply_tx, reply_rx) = oneshot::channel();
    let request = Request {
        message,
        reply: reply_tx,
    };
    let reply = match requests.send(request).await {
        Ok(()) => reply_rx
            .await
            .unwrap_or_else(|_| Reply::Error("daemon is shutting down".into())),
        Err(_) => Reply::Error("daemon is shutting down".into()),
    };

    stream.write_all(&serde_json::to_vec(&reply)?).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Applies one control message to the controller.
pub async fn handle_request<P: StreamProvider>(
    message: &ControlMessage,
    controller: &mut Controller<P>,
    board: &StatusBoard,
) -> Reply {
    let result = match message {
        ControlMessage::Start => controller.start().await,
        ControlMessage::Stop => controller.stop(),
        ControlMessage::Status => {
            return Reply::Status(StatusReport {
                state: controller.state(),
                feedback: board.current(),
            })
        }
    };
    match result {
        Ok(()) => Reply::Ack,
        Err(e) => Reply::Error(e.to_string()),
    }
}

async fn serve(cfg: Config, autostart: bool) -> HatCheckResult<()> {
    info!("daemon started");
    let board = Arc::new(StatusBoard::new());
    let vocabulary = Vocabulary::new(cfg.vocabulary.clone())?;
    let mut controller = Controller::new(
        CameraProvider::new(cfg.camera_index),
        board.clone(),
        vocabulary,
        cfg.loop_settings(),
    );

    let sock_path = crate::ipc::socket_path();
    let mut server = ControlServer::bind(&sock_path)?;

    controller.begin_loading()?;
    let model_cfg = cfg.model.clone();
    let mut loading = tokio::task::spawn_blocking(move || ClipScorer::load(&model_cfg));
    let mut loaded = false;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut loading, if !loaded => {
                loaded = true;
                let result = result
                    .map_err(|e| HatCheckError::ModelLoad(format!("join: {e}")))
                    .and_then(|r| r);
                if controller.finish_loading(result).is_ok() && autostart {
                    tokio::select! {
                        started = controller.start() => if let Err(e) = started {
                            error!("autostart failed: {e}");
                        },
                        _ = &mut shutdown => break,
                    }
                }
            }
            request = server.next_request() => {
                // A start may wait for the previous loop to finish its cycle.
                tokio::select! {
                    reply = handle_request(&request.message, &mut controller, &board) => request.respond(reply),
                    _ = &mut shutdown => break,
                }
            }
            _ = &mut shutdown => break,
        }
    }

    info!("shutdown requested");
    controller.shutdown().await;
    cleanup_socket(&sock_path);
    Ok(())
}

fn cleanup_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => trace!(path = %path.display(), "socket removed"),
        Err(e) => debug!(path = %path.display(), "failed to remove socket: {e}"),
    }
}
