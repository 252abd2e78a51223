// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Tests against real V4L2 nodes. The mem2mem node defaults to `/dev/video1`
//! and the camera to `/dev/video0`, override with `M2M_DEVICE` and
//! `INPUT_DEVICE`.

use edgefirst_m2m::{
    codec::{Frame, PixelFormat},
    engine::{StreamConfig, StreamingEngine},
    lut::ConversionLut,
    render::{CompositeSink, NullSink},
    source::{CaptureSource, FrameSource, IoMethod, SyntheticSource},
    v4l2::{V4l2Device, VideoDevice},
};
use serial_test::serial;
use std::{error::Error, sync::atomic::AtomicBool, sync::Arc, time::Instant};

fn m2m_device() -> String {
    std::env::var("M2M_DEVICE").unwrap_or_else(|_| "/dev/video1".into())
}

fn input_device() -> String {
    std::env::var("INPUT_DEVICE").unwrap_or_else(|_| "/dev/video0".into())
}

#[test]
fn test_open_rejects_regular_file() {
    let err = V4l2Device::open("Cargo.toml").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    assert!(V4l2Device::open("/dev/does-not-exist").is_err());
}

#[test]
#[serial]
#[ignore = "mem2mem test is disabled by default (run with --include-ignored to enable)"]
fn test_capabilities() -> Result<(), Box<dyn Error>> {
    let mut device = V4l2Device::open(m2m_device())?;
    let caps = device.capabilities()?;
    println!("{} ({}) caps 0x{:08x}", caps.card, caps.driver, caps.effective());
    assert!(caps.is_mem2mem());
    Ok(())
}

#[test]
#[serial]
#[ignore = "mem2mem test is disabled by default (run with --include-ignored to enable)"]
fn test_stream() -> Result<(), Box<dyn Error>> {
    for translen in [1, 4] {
        let config = StreamConfig {
            translen,
            num_frames: 40,
            ..StreamConfig::default()
        };
        let device = V4l2Device::open(m2m_device())?;
        let source = SyntheticSource::with_seed(config.width, config.height, 0);
        let sink = CompositeSink::new(config.width, config.height);

        let now = Instant::now();
        let engine = StreamingEngine::new(device, config, source, sink)?;
        let stats = engine.run(&AtomicBool::new(false))?;
        println!("translen {}: {} in {:?}", translen, stats, now.elapsed());
        assert_eq!(stats.iterations, 40);
    }
    Ok(())
}

#[test]
#[serial]
#[ignore = "camera test is disabled by default (run with --include-ignored to enable)"]
fn test_capture() -> Result<(), Box<dyn Error>> {
    let lut = Arc::new(ConversionLut::build());
    let camera = V4l2Device::open(input_device())?;
    let mut source = CaptureSource::new(camera, input_device(), IoMethod::Mmap, 640, 240, lut)?;
    let mut frame = Frame::new(source.width(), source.height(), PixelFormat::Rgb565x);

    source.start()?;
    for _ in 0..10 {
        source.next_frame(&mut frame)?;
    }

    let config = StreamConfig {
        width: source.width(),
        height: source.height(),
        num_frames: 20,
        ..StreamConfig::default()
    };
    let device = V4l2Device::open(m2m_device())?;
    let engine = StreamingEngine::new(device, config, source, NullSink)?;
    engine.run(&AtomicBool::new(false))?;
    Ok(())
}
