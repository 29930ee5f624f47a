use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::{env, io};

use crate::feedback::Feedback;
use crate::lifecycle::LoopState;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Start,
    Stop,
    Status,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub state: LoopState,
    pub feedback: Feedback,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Status(StatusReport),
    Error(String),
}

pub fn socket_path() -> PathBuf {
    if let Some(path) = env::var_os("HATCHECK_SOCKET") {
        return PathBuf::from(path);
    }
    env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir)
        .join("hat-check.sock")
}

pub fn send_command(msg: &ControlMessage) -> io::Result<Reply> {
    let mut stream = UnixStream::connect(socket_path())?;
    serde_json::to_writer(&mut stream, msg)?;
    stream.flush()?;
    let _ = stream.shutdown(Shutdown::Write);

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;
    Ok(serde_json::from_slice(&buf)?)
}
