use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::Path;
use tracing::{trace, warn};

use crate::errors::HatCheckResult;

/// A live video stream that frames can be pulled from.
pub trait FrameSource {
    /// Whether enough data is buffered to read a full frame.
    fn is_frame_ready(&mut self) -> bool;

    /// Current native `(width, height)` of the stream.
    fn dimensions(&self) -> (u32, u32);

    fn read_frame(&mut self) -> HatCheckResult<RgbImage>;
}

/// Hands out live streams. Acquisition fails with
/// [`HatCheckError::StreamUnavailable`](crate::errors::HatCheckError::StreamUnavailable)
/// when access is denied or no device exists.
pub trait StreamProvider {
    type Handle: FrameSource + 'static;

    fn acquire(&mut self) -> HatCheckResult<Self::Handle>;
}

/// A still image encoded as PNG, ready to hand to a scorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    png: Vec<u8>,
}

impl Frame {
    pub fn from_rgb(image: &RgbImage) -> HatCheckResult<Self> {
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(Self {
            width: image.width(),
            height: image.height(),
            png,
        })
    }

    /// Loads any image file the `image` crate understands.
    pub fn from_file(path: &Path) -> HatCheckResult<Self> {
        let image = image::open(path)?;
        Self::from_rgb(&image.into_rgb8())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn png(&self) -> &[u8] {
        &self.png
    }

    pub fn decode(&self) -> HatCheckResult<DynamicImage> {
        Ok(image::load_from_memory_with_format(&self.png, ImageFormat::Png)?)
    }
}

#[derive(Debug)]
pub enum Capture {
    Frame(Frame),
    NotReady,
}

/// Copies the current frame of `source` into a [`Frame`] sized to the
/// stream's dimensions as measured right now.
///
/// Read and encode failures are logged and reported as [`Capture::NotReady`].
pub fn capture<S: FrameSource + ?Sized>(source: &mut S) -> Capture {
    if !source.is_frame_ready() {
        trace!("stream not ready");
        return Capture::NotReady;
    }

    let (width, height) = source.dimensions();
    let pixels = match source.read_frame() {
        Ok(i) => i,
        Err(e) => {
            warn!("failed to read frame: {e}");
            return Capture::NotReady;
        }
    };

    let pixels = if pixels.dimensions() != (width, height) && width > 0 && height > 0 {
        trace!(
            from = ?pixels.dimensions(),
            to = ?(width, height),
            "resizing frame to stream dimensions"
        );
        DynamicImage::ImageRgb8(pixels)
            .resize_exact(width, height, FilterType::Triangle)
            .into_rgb8()
    } else {
        pixels
    };

    match Frame::from_rgb(&pixels) {
        Ok(frame) => Capture::Frame(frame),
        Err(e) => {
            warn!("failed to encode frame: {e}");
            Capture::NotReady
        }
    }
}
