mod common;

use common::{hat_wins, vocabulary, FakeProvider, ScriptedScorer};
use hat_check::daemon::{handle_request, ControlServer};
use hat_check::ipc::{ControlMessage, Reply, StatusReport};
use hat_check::{Controller, Feedback, HatCheckError, LoopSettings, LoopState, StatusBoard};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::task::LocalSet;

fn controller(board: Arc<StatusBoard>) -> Controller<FakeProvider> {
    let settings = LoopSettings {
        tick_delay: Duration::from_millis(1),
        scoring_timeout: None,
    };
    Controller::new(FakeProvider::default(), board, vocabulary(), settings)
}

async fn ready(board: Arc<StatusBoard>) -> Controller<FakeProvider> {
    let mut ctl = controller(board);
    ctl.initialize(async { Ok(ScriptedScorer::new(hat_wins())) })
        .await
        .unwrap();
    ctl
}

async fn request(path: &Path, message: &ControlMessage) -> Reply {
    let mut stream = UnixStream::connect(path).await.unwrap();
    stream
        .write_all(&serde_json::to_vec(message).unwrap())
        .await
        .unwrap();
    stream.shutdown().await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    serde_json::from_slice(&buf).unwrap()
}

#[tokio::test]
async fn messages_drive_the_controller() {
    LocalSet::new()
        .run_until(async {
            let board = Arc::new(StatusBoard::new());
            let mut ctl = ready(board.clone()).await;

            let reply = handle_request(&ControlMessage::Status, &mut ctl, &board).await;
            assert_eq!(
                reply,
                Reply::Status(StatusReport {
                    state: LoopState::Ready,
                    feedback: Feedback::Idle,
                })
            );

            let reply = handle_request(&ControlMessage::Start, &mut ctl, &board).await;
            assert_eq!(reply, Reply::Ack);
            assert_eq!(ctl.state(), LoopState::Running);

            let reply = handle_request(&ControlMessage::Start, &mut ctl, &board).await;
            assert!(matches!(reply, Reply::Error(reason) if reason.contains("running")));

            tokio::time::sleep(Duration::from_millis(20)).await;
            let reply = handle_request(&ControlMessage::Stop, &mut ctl, &board).await;
            assert_eq!(reply, Reply::Ack);
            ctl.shutdown().await;

            let reply = handle_request(&ControlMessage::Status, &mut ctl, &board).await;
            assert_eq!(
                reply,
                Reply::Status(StatusReport {
                    state: LoopState::Stopped,
                    feedback: Feedback::Idle,
                })
            );
        })
        .await;
}

#[tokio::test]
async fn start_after_failed_load_is_refused() {
    LocalSet::new()
        .run_until(async {
            let board = Arc::new(StatusBoard::new());
            let mut ctl = controller(board.clone());
            ctl.initialize(async {
                Err::<ScriptedScorer, _>(HatCheckError::ModelLoad("no weights".into()))
            })
            .await
            .unwrap_err();

            let reply = handle_request(&ControlMessage::Start, &mut ctl, &board).await;
            assert!(matches!(reply, Reply::Error(reason) if reason.contains("failed")));
            assert_eq!(ctl.state(), LoopState::Failed);
        })
        .await;
}

#[tokio::test]
async fn silent_client_does_not_block_others() {
    LocalSet::new()
        .run_until(async {
            let dir = tempdir().unwrap();
            let path = dir.path().join("ctl.sock");
            let mut server = ControlServer::bind(&path).unwrap();
            let board = Arc::new(StatusBoard::new());
            let mut ctl = ready(board.clone()).await;

            // Connected, never writes, never closes.
            let _silent = UnixStream::connect(&path).await.unwrap();

            let serving = async {
                let req = server.next_request().await;
                let reply = handle_request(&req.message, &mut ctl, &board).await;
                req.respond(reply);
            };
            let (reply, ()) = tokio::time::timeout(
                Duration::from_secs(2),
                async { tokio::join!(request(&path, &ControlMessage::Status), serving) },
            )
            .await
            .unwrap();
            assert!(matches!(
                reply,
                Reply::Status(StatusReport { state: LoopState::Ready, .. })
            ));
        })
        .await;
}

#[tokio::test]
async fn idle_connection_is_closed_after_read_timeout() {
    LocalSet::new()
        .run_until(async {
            let dir = tempdir().unwrap();
            let path = dir.path().join("ctl.sock");
            let mut server = ControlServer::bind(&path)
                .unwrap()
                .with_read_timeout(Duration::from_millis(50));

            let mut silent = UnixStream::connect(&path).await.unwrap();
            let accept = async {
                tokio::time::timeout(Duration::from_millis(500), server.next_request())
                    .await
                    .is_err()
            };
            let closed = async {
                let mut buf = Vec::new();
                silent.read_to_end(&mut buf).await.unwrap();
                buf
            };
            let (no_request, buf) = tokio::join!(accept, closed);
            assert!(no_request);
            assert!(buf.is_empty());
        })
        .await;
}

#[tokio::test]
async fn malformed_request_gets_no_reply() {
    LocalSet::new()
        .run_until(async {
            let dir = tempdir().unwrap();
            let path = dir.path().join("ctl.sock");
            let mut server = ControlServer::bind(&path).unwrap();

            let client = async {
                let mut stream = UnixStream::connect(&path).await.unwrap();
                stream.write_all(b"{\"nope\"").await.unwrap();
                stream.shutdown().await.unwrap();
                let mut buf = Vec::new();
                stream.read_to_end(&mut buf).await.unwrap();
                buf
            };
            let accept = async {
                tokio::time::timeout(Duration::from_millis(200), server.next_request())
                    .await
                    .is_err()
            };
            let (buf, no_request) = tokio::join!(client, accept);
            assert!(buf.is_empty());
            assert!(no_request);
        })
        .await;
}
