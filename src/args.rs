// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_m2m::{engine::StreamConfig, source::IoMethod};
use std::path::PathBuf;

/// Where the frames sent through the mem2mem device come from.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum SourceSetting {
    /// Generated gradient test card, no camera required
    Synthetic,
    /// YUYV frames from a V4L2 capture device
    Capture,
}

/// Capture device I/O method.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum IoSetting {
    /// read() into an application buffer
    Read,
    /// Memory mapped driver buffers
    Mmap,
}

impl From<IoSetting> for IoMethod {
    fn from(value: IoSetting) -> Self {
        match value {
            IoSetting::Read => IoMethod::Read,
            IoSetting::Mmap => IoMethod::Mmap,
        }
    }
}

/// Command-line arguments for the EdgeFirst mem2mem tester.
///
/// Arguments can be specified on the command line or through environment
/// variables.
///
/// # Example
///
/// ```bash
/// # Four buffers per transaction, 33 ms simulated processing
/// edgefirst-m2m --m2m-device /dev/video1 -t 4 -T 33
///
/// # Live camera input
/// export SOURCE=capture
/// export INPUT_DEVICE=/dev/video0
/// edgefirst-m2m
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// mem2mem device path
    #[arg(short = 'o', long, env = "M2M_DEVICE", default_value = "/dev/video1")]
    pub m2m_device: PathBuf,

    /// Frame source
    #[arg(long, env = "SOURCE", default_value = "synthetic", value_enum)]
    pub source: SourceSetting,

    /// Capture device path, used with `--source capture`
    #[arg(short = 'd', long, env = "INPUT_DEVICE", default_value = "/dev/video0")]
    pub input_device: PathBuf,

    /// Capture device I/O method
    #[arg(long, env = "CAPTURE_IO", default_value = "mmap", value_enum)]
    pub io: IoSetting,

    /// Frame width in pixels
    #[arg(short = 'x', long, env = "WIDTH", default_value = "640")]
    pub width: u32,

    /// Frame height in pixels
    #[arg(short = 'y', long, env = "HEIGHT", default_value = "240")]
    pub height: u32,

    /// Buffers per transaction
    #[arg(short = 't', long, env = "TRANSLEN", default_value = "1")]
    pub translen: u32,

    /// Simulated processing time per transaction in milliseconds
    #[arg(short = 'T', long = "time", env = "TRANSTIME", default_value = "1")]
    pub transtime: u32,

    /// Loop iterations to run before exiting
    #[arg(short = 'n', long, env = "NUM_FRAMES", default_value = "1000")]
    pub num_frames: u32,

    /// Buffers requested on each queue
    #[arg(long, env = "NUM_BUFFERS", default_value = "4")]
    pub num_buffers: u32,

    /// Ask the device to flip horizontally
    #[arg(short = 'f', long, env = "HFLIP")]
    pub hflip: bool,

    /// Ask the device to flip vertically
    #[arg(short = 'v', long, env = "VFLIP")]
    pub vflip: bool,

    /// Write the composite view to this JPEG file periodically
    #[arg(long, env = "SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Frames between snapshots
    #[arg(long, env = "SNAPSHOT_INTERVAL", default_value = "30")]
    pub snapshot_interval: u64,

    /// Enable verbose debug logging
    #[arg(long)]
    pub verbose: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl From<&Args> for StreamConfig {
    fn from(args: &Args) -> Self {
        StreamConfig {
            width: args.width,
            height: args.height,
            translen: args.translen,
            transtime_ms: args.transtime,
            num_frames: args.num_frames,
            num_buffers: args.num_buffers,
            hflip: args.hflip,
            vflip: args.vflip,
            ..StreamConfig::default()
        }
    }
}
