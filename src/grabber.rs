use image::RgbImage;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::errors::{HatCheckError, HatCheckResult};
use crate::frame::FrameSource;

const RETRY_DELAY: Duration = Duration::from_millis(100);

/// A device whose reads block until the next frame arrives.
pub trait BlockingSource {
    fn resolution(&self) -> (u32, u32);

    fn grab(&mut self) -> HatCheckResult<RgbImage>;
}

#[derive(Default)]
struct Shared {
    latest: Mutex<Option<RgbImage>>,
    width: AtomicU32,
    height: AtomicU32,
    running: AtomicBool,
}

impl Shared {
    fn slot(&self) -> std::sync::MutexGuard<'_, Option<RgbImage>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reads a [`BlockingSource`] on its own thread and keeps the newest frame.
///
/// As a [`FrameSource`] it never blocks: it is ready once a frame has been
/// grabbed since the last read.
pub struct ThreadedStream {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl ThreadedStream {
    /// Opens the source on the grabber thread and waits for the outcome.
    pub fn spawn<S, F>(open: F) -> HatCheckResult<Self>
    where
        S: BlockingSource + 'static,
        F: FnOnce() -> HatCheckResult<S> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            ..Shared::default()
        });
        let (opened_tx, opened_rx) = mpsc::channel();
        let worker = shared.clone();
        let thread = thread::Builder::new()
            .name("frame-grabber".into())
            .spawn(move || {
                let source = match open() {
                    Ok(s) => {
                        let _ = opened_tx.send(Ok(()));
                        s
                    }
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };
                grab_frames(source, &worker);
            })?;

        let stream = Self {
            shared,
            thread: Some(thread),
        };
        match opened_rx.recv() {
            Ok(Ok(())) => Ok(stream),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(HatCheckError::StreamUnavailable(
                "frame grabber exited while opening".into(),
            )),
        }
    }
}

fn grab_frames<S: BlockingSource>(mut source: S, shared: &Shared) {
    debug!("frame grabber started");
    while shared.running.load(Ordering::Acquire) {
        match source.grab() {
            Ok(pixels) => {
                let (width, height) = source.resolution();
                shared.width.store(width, Ordering::Release);
                shared.height.store(height, Ordering::Release);
                *shared.slot() = Some(pixels);
                trace!(width, height, "frame grabbed");
            }
            Err(e) => {
                warn!("failed to grab frame: {e}");
                thread::sleep(RETRY_DELAY);
            }
        }
    }
    debug!("frame grabber stopped");
}

impl FrameSource for ThreadedStream {
    fn is_frame_ready(&mut self) -> bool {
        self.shared.slot().is_some()
    }

    fn dimensions(&self) -> (u32, u32) {
        (
            self.shared.width.load(Ordering::Acquire),
            self.shared.height.load(Ordering::Acquire),
        )
    }

    fn read_frame(&mut self) -> HatCheckResult<RgbImage> {
        self.shared
            .slot()
            .take()
            .ok_or_else(|| HatCheckError::Capture("no frame buffered".into()))
    }
}

impl Drop for ThreadedStream {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("frame grabber panicked");
            }
        }
    }
}
