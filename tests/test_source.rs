// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod common;

use common::{MockDevice, Scripted};
use edgefirst_m2m::{
    buffer::SlotState,
    codec::{rgb888_to_rgb565x, Frame, PixelFormat, Rgb888, YUYV},
    lut::ConversionLut,
    source::{CaptureSource, FrameSource, IoMethod, SyntheticSource},
    v4l2::{
        Direction, Readiness, V4L2_CAP_READWRITE, V4L2_CAP_STREAMING, V4L2_CAP_VIDEO_CAPTURE,
        V4L2_FIELD_INTERLACED,
    },
    Error,
};
use std::sync::{Arc, OnceLock};

const WIDTH: u32 = 8;
const HEIGHT: u32 = 4;
const GRAY: [u8; 4] = [128, 128, 128, 128];

fn lut() -> Arc<ConversionLut> {
    static LUT: OnceLock<Arc<ConversionLut>> = OnceLock::new();
    LUT.get_or_init(|| Arc::new(ConversionLut::build())).clone()
}

fn camera(caps: u32) -> MockDevice {
    let device = MockDevice::new(
        V4L2_CAP_VIDEO_CAPTURE | caps,
        PixelFormat::Yuv422.frame_size(WIDTH, HEIGHT),
    );
    device.handle().borrow_mut().fill = GRAY.to_vec();
    device
}

fn frame() -> Frame {
    Frame::new(WIDTH, HEIGHT, PixelFormat::Rgb565x)
}

fn assert_gray(frame: &Frame) {
    let gray = rgb888_to_rgb565x(Rgb888::new(128, 128, 128)).to_ne_bytes();
    assert_eq!(gray, [0x84, 0x10]);
    for pixel in frame.as_slice().chunks_exact(2) {
        assert_eq!(pixel, gray);
    }
}

#[test]
fn test_synthetic_card() {
    let source = SyntheticSource::with_seed(320, 240, 7);
    let card = source.card();
    assert_eq!(card.format(), PixelFormat::Rgb888);

    let stride = card.stride();
    let pixel = |x: usize, y: usize| &card.as_slice()[y * stride + x * 3..][..3];
    assert_eq!(pixel(0, 0), [0, 0, 0]);
    assert_eq!(pixel(5, 9), [0, 9, 5]);
    assert_eq!(pixel(300, 200), [0, 200, 44]);
}

#[test]
fn test_synthetic_frames_decay() -> Result<(), Box<dyn std::error::Error>> {
    let mut source = SyntheticSource::with_seed(64, 32, 1);
    let mut first = Frame::new(64, 32, PixelFormat::Rgb565x);
    let mut second = first.clone();

    source.next_frame(&mut first)?;
    source.next_frame(&mut second)?;
    assert_eq!(source.frames(), 2);
    assert_ne!(first, second);

    let mut again = SyntheticSource::with_seed(64, 32, 1);
    let mut replay = Frame::new(64, 32, PixelFormat::Rgb565x);
    again.next_frame(&mut replay)?;
    assert_eq!(first, replay);
    Ok(())
}

#[test]
fn test_synthetic_rejects_other_sizes() {
    let mut source = SyntheticSource::with_seed(64, 32, 1);
    let mut frame = Frame::new(32, 32, PixelFormat::Rgb565x);
    assert!(matches!(source.next_frame(&mut frame), Err(Error::Config(_))));
}

#[test]
fn test_capture_mmap() -> Result<(), Box<dyn std::error::Error>> {
    let device = camera(V4L2_CAP_STREAMING);
    let mut source = CaptureSource::new(device.clone(), "mock", IoMethod::Mmap, WIDTH, HEIGHT, lut())?;

    assert_eq!(source.pool().len(), 4);
    assert_eq!(source.format().bytesperline, WIDTH * 2);
    {
        let handle = device.handle();
        let state = handle.borrow();
        let (direction, format) = state.formats[0];
        assert_eq!(direction, Direction::Capture);
        assert_eq!(format.fourcc, YUYV);
        assert_eq!(format.field, V4L2_FIELD_INTERLACED);
    }

    source.start()?;
    assert_eq!(source.pool().queued(), 4);

    let mut frame = frame();
    for _ in 0..6 {
        source.next_frame(&mut frame)?;
        assert_gray(&frame);
    }
    // Every buffer went back to the driver.
    assert!(source
        .pool()
        .slots()
        .all(|slot| slot.state() == SlotState::Queued));

    source.stop()?;
    assert_eq!(device.handle().borrow().stream_offs, vec![Direction::Capture]);
    assert!(!source.pool().is_mapped());
    Ok(())
}

#[test]
fn test_capture_read() -> Result<(), Box<dyn std::error::Error>> {
    let device = camera(V4L2_CAP_READWRITE);
    let size = PixelFormat::Yuv422.frame_size(WIDTH, HEIGHT);
    device.handle().borrow_mut().read_data = GRAY.iter().copied().cycle().take(size).collect();

    let mut source = CaptureSource::new(device.clone(), "mock", IoMethod::Read, WIDTH, HEIGHT, lut())?;
    source.start()?;
    assert!(source.pool().is_empty());

    let mut frame = frame();
    source.next_frame(&mut frame)?;
    assert_gray(&frame);
    Ok(())
}

#[test]
fn test_capture_read_retries_until_timeout() -> Result<(), Box<dyn std::error::Error>> {
    let device = camera(V4L2_CAP_READWRITE);
    device
        .handle()
        .borrow_mut()
        .readiness
        .extend([Readiness::Ready, Readiness::Interrupted, Readiness::TimedOut]);

    let mut source = CaptureSource::new(device, "mock", IoMethod::Read, WIDTH, HEIGHT, lut())?;
    let err = source.next_frame(&mut frame()).unwrap_err();
    assert!(matches!(err, Error::Timeout { ref device, .. } if device == "mock"));
    Ok(())
}

#[test]
fn test_capture_adopts_driver_size() -> Result<(), Box<dyn std::error::Error>> {
    let device = camera(V4L2_CAP_STREAMING);
    device.handle().borrow_mut().adjust_size = Some((WIDTH / 2, HEIGHT / 2));

    let source = CaptureSource::new(device, "mock", IoMethod::Mmap, WIDTH, HEIGHT, lut())?;
    assert_eq!((source.width(), source.height()), (WIDTH / 2, HEIGHT / 2));
    assert_eq!(source.format().sizeimage, WIDTH * HEIGHT / 2);
    Ok(())
}

#[test]
fn test_capture_needs_two_buffers() {
    let device = camera(V4L2_CAP_STREAMING);
    device.handle().borrow_mut().grant_limit = Some(1);

    let err = CaptureSource::new(device, "mock", IoMethod::Mmap, WIDTH, HEIGHT, lut())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::InsufficientBuffers {
            granted: 1,
            required: 2,
            ..
        }
    ));
}

#[test]
fn test_capture_requires_io_method() {
    let device = camera(V4L2_CAP_READWRITE);
    let err = CaptureSource::new(device, "mock", IoMethod::Mmap, WIDTH, HEIGHT, lut())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::Unsupported {
            feature: "streaming i/o",
            ..
        }
    ));

    let device = MockDevice::new(V4L2_CAP_STREAMING, 64);
    let err = CaptureSource::new(device, "mock", IoMethod::Mmap, WIDTH, HEIGHT, lut())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::Unsupported {
            feature: "video capture",
            ..
        }
    ));
}

#[test]
fn test_capture_io_error_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let device = camera(V4L2_CAP_STREAMING);
    let mut source = CaptureSource::new(device.clone(), "mock", IoMethod::Mmap, WIDTH, HEIGHT, lut())?;
    source.start()?;
    device
        .handle()
        .borrow_mut()
        .script
        .push_back((Direction::Capture, Scripted::Errno(libc::EIO)));

    let err = source.next_frame(&mut frame()).unwrap_err();
    assert!(matches!(
        err,
        Error::Dequeue {
            direction: Direction::Capture,
            ..
        }
    ));
    Ok(())
}
