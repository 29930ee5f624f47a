use image::RgbImage;
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType},
    Camera,
};
use tracing::{debug, warn};

use crate::errors::{HatCheckError, HatCheckResult};
use crate::frame::StreamProvider;
use crate::grabber::{BlockingSource, ThreadedStream};

const PREFERRED_RESOLUTIONS: [(u32, u32); 2] = [(1280, 720), (640, 480)];
const PREFERRED_FORMATS: [FrameFormat; 3] =
    [FrameFormat::RAWRGB, FrameFormat::MJPEG, FrameFormat::YUYV];

/// Opens the webcam at a fixed device index.
pub struct CameraProvider {
    index: u32,
}

impl CameraProvider {
    pub fn new(index: u32) -> Self {
        Self { index }
    }
}

fn open_camera(index: u32) -> HatCheckResult<Camera> {
    for (w, h) in PREFERRED_RESOLUTIONS {
        for fmt in PREFERRED_FORMATS {
            let req = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
                CameraFormat::new_from(w, h, fmt, 30),
            ));
            if let Ok(cam) = Camera::new(CameraIndex::Index(index), req) {
                return Ok(cam);
            }
        }
    }
    let fallback = RequestedFormat::new::<RgbFormat>(RequestedFormatType::None);
    Camera::new(CameraIndex::Index(index), fallback)
        .map_err(|e| HatCheckError::StreamUnavailable(format!("camera {index}: {e}")))
}

impl StreamProvider for CameraProvider {
    type Handle = ThreadedStream;

    /// The camera lives on the grabber thread for as long as the stream does.
    fn acquire(&mut self) -> HatCheckResult<ThreadedStream> {
        let index = self.index;
        ThreadedStream::spawn(move || {
            let mut cam = open_camera(index)?;
            cam.open_stream().map_err(|e| {
                HatCheckError::StreamUnavailable(format!("failed to open stream: {e}"))
            })?;
            debug!(index, format = ?cam.camera_format(), "camera stream opened");
            Ok(CameraGrabber { cam })
        })
    }
}

struct CameraGrabber {
    cam: Camera,
}

impl BlockingSource for CameraGrabber {
    fn resolution(&self) -> (u32, u32) {
        let res = self.cam.resolution();
        (res.width(), res.height())
    }

    fn grab(&mut self) -> HatCheckResult<RgbImage> {
        let frame = self
            .cam
            .frame()
            .map_err(|e| HatCheckError::Capture(format!("failed to capture frame: {e}")))?;
        frame
            .decode_image::<RgbFormat>()
            .map_err(|e| HatCheckError::Capture(format!("failed to decode frame: {e}")))
    }
}

impl Drop for CameraGrabber {
    fn drop(&mut self) {
        if let Err(e) = self.cam.stop_stream() {
            warn!("failed to stop camera stream: {e}");
        } else {
            debug!("camera stream closed");
        }
    }
}
