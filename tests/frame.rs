use hat_check::{capture, Capture, Frame, FrameSource, HatCheckError, HatCheckResult};
use image::{Rgb, RgbImage};
use std::io::Write;
use tempfile::Builder;

/// Stream that reports one size but delivers frames of another.
struct ResizingStream {
    reported: (u32, u32),
    delivered: (u32, u32),
    fail: bool,
}

impl FrameSource for ResizingStream {
    fn is_frame_ready(&mut self) -> bool {
        true
    }

    fn dimensions(&self) -> (u32, u32) {
        self.reported
    }

    fn read_frame(&mut self) -> HatCheckResult<RgbImage> {
        if self.fail {
            return Err(HatCheckError::Capture("device unplugged".into()));
        }
        Ok(RgbImage::from_pixel(self.delivered.0, self.delivered.1, Rgb([1, 2, 3])))
    }
}

#[test]
fn frame_matches_current_stream_dimensions() {
    let mut stream = ResizingStream {
        reported: (32, 24),
        delivered: (64, 48),
        fail: false,
    };
    let Capture::Frame(frame) = capture(&mut stream) else {
        panic!("expected a frame");
    };
    assert_eq!((frame.width(), frame.height()), (32, 24));

    stream.reported = (16, 16);
    let Capture::Frame(frame) = capture(&mut stream) else {
        panic!("expected a frame");
    };
    let decoded = frame.decode().unwrap();
    assert_eq!((decoded.width(), decoded.height()), (16, 16));
}

#[test]
fn read_error_is_reported_as_not_ready() {
    let mut stream = ResizingStream {
        reported: (4, 4),
        delivered: (4, 4),
        fail: true,
    };
    assert!(matches!(capture(&mut stream), Capture::NotReady));
}

#[test]
fn frame_is_png_encoded() {
    let img = RgbImage::from_pixel(5, 3, Rgb([200, 100, 0]));
    let frame = Frame::from_rgb(&img).unwrap();
    assert_eq!(&frame.png()[..8], b"\x89PNG\r\n\x1a\n");
    assert_eq!(frame.decode().unwrap().into_rgb8(), img);
}

#[test]
fn frame_loads_from_file() {
    let img = RgbImage::from_pixel(7, 9, Rgb([0, 0, 255]));
    let mut file = Builder::new().suffix(".png").tempfile().unwrap();
    file.write_all(Frame::from_rgb(&img).unwrap().png()).unwrap();
    let frame = Frame::from_file(file.path()).unwrap();
    assert_eq!((frame.width(), frame.height()), (7, 9));
}
