// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst mem2mem Device Tester
//!
//! This library drives a V4L2 memory-to-memory device through a complete
//! streaming session and checks that every processed buffer comes back in
//! the order and shape the buffer-queue protocol promises.
//!
//! ## Features
//!
//! - **Streaming Engine**: Split frames into multi-buffer transactions, keep
//!   the OUTPUT and CAPTURE queues full and reassemble the processed chunks.
//! - **Buffer Pools**: Memory mapped driver buffers with per-slot state so a
//!   driver returning an unknown or unqueued index is detected.
//! - **Frame Sources**: A synthetic test card, or a V4L2 camera with
//!   table-driven YCbCr to RGB conversion.
//! - **Rendering**: A stacked pre/post composite with optional JPEG snapshots
//!   using turbojpeg.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_m2m::{
//!     engine::{StreamConfig, StreamingEngine},
//!     render::CompositeSink,
//!     source::SyntheticSource,
//!     v4l2::V4l2Device,
//! };
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StreamConfig {
//!     translen: 4,
//!     ..StreamConfig::default()
//! };
//! let device = V4l2Device::open("/dev/video1")?;
//! let source = SyntheticSource::new(config.width, config.height);
//! let sink = CompositeSink::new(config.width, config.height);
//!
//! let engine = StreamingEngine::new(device, config, source, sink)?;
//! let stats = engine.run(&AtomicBool::new(false))?;
//! println!("{}", stats);
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Requirements
//!
//! - **Linux**: V4L2 with a mem2mem driver such as `vim2m` or the
//!   `mem2mem_testdev` test driver
//!
//! ## Safety
//!
//! `unsafe` is limited to the ioctl and mmap calls in [`v4l2`]; everything
//! above the [`v4l2::VideoDevice`] trait is safe code.

pub mod buffer;
pub mod codec;
pub mod engine;
pub mod error;
pub mod lut;
pub mod render;
pub mod source;
pub mod transaction;
pub mod v4l2;

pub use error::{Error, ErrorClass, Result};
