// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::{Args, SourceSetting};
use clap::Parser;
use edgefirst_m2m::{
    engine::{StreamConfig, StreamingEngine},
    lut::ConversionLut,
    render::CompositeSink,
    source::{CaptureSource, FrameSource, SyntheticSource},
    v4l2::V4l2Device,
    Error,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, Layer, Registry};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args)?;
    info!("EdgeFirst mem2mem tester");

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))?;
    }

    if let Err(e) = run(&args, &stop) {
        error!("{} ({:?})", e, e.class());
        return Err(e.into());
    }
    Ok(())
}

fn init_tracing(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let stdout_log = tracing_subscriber::fmt::layer().with_filter(level);

    let journald = match tracing_journald::layer() {
        Ok(journald) => Some(journald.with_filter(level)),
        Err(_) => None,
    };

    let tracy = if args.tracy {
        tracy_client::Client::start();
        Some(tracing_tracy::TracyLayer::default().with_filter(level))
    } else {
        None
    };

    let subscriber = Registry::default()
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

fn run(args: &Args, stop: &AtomicBool) -> Result<(), Error> {
    let mut config = StreamConfig::from(args);

    match args.source {
        SourceSetting::Synthetic => {
            let source = SyntheticSource::new(config.width, config.height);
            stream(args, config, source, stop)
        }
        SourceSetting::Capture => {
            let start = Instant::now();
            let lut = Arc::new(ConversionLut::build());
            info!("conversion table ready in {:?}", start.elapsed());

            let camera = V4l2Device::open(&args.input_device)
                .map_err(|e| Error::device("open", e))?;
            let source = CaptureSource::new(
                camera,
                args.input_device.display().to_string(),
                args.io.into(),
                config.width,
                config.height,
                lut,
            )?;
            config.width = source.width();
            config.height = source.height();
            stream(args, config, source, stop)
        }
    }
}

fn stream<S: FrameSource>(
    args: &Args,
    config: StreamConfig,
    source: S,
    stop: &AtomicBool,
) -> Result<(), Error> {
    let device = V4l2Device::open(&args.m2m_device).map_err(|e| Error::device("open", e))?;
    info!("mem2mem device {}", device.path().display());

    let mut sink = CompositeSink::new(config.width, config.height);
    if let Some(path) = &args.snapshot {
        sink = sink.with_snapshot(path, args.snapshot_interval);
    }

    let engine = StreamingEngine::new(device, config, source, sink)?;
    engine.run(stop)?;
    Ok(())
}
