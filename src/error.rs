// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error types for the mem2mem pipeline.
//!
//! Every fatal condition of the pipeline is an [`Error`] variant. Transient
//! streaming conditions (driver not ready, dropped frame) are not errors, they
//! are reported through [`crate::buffer::Dequeue`].

use crate::v4l2::Direction;
use std::{io, time::Duration};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Broad category of a fatal error, used by callers to decide how to report
/// a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Device open, capability, format, buffer request or mapping failure.
    Setup,
    /// The driver did not honor the buffer-queue contract.
    Protocol,
    /// A dequeued buffer could not be handed back to the driver.
    Requeue,
    /// Any other failure while streaming.
    Streaming,
}

#[derive(Debug, Error)]
pub enum Error {
    /// A device call failed, `op` names the failing operation.
    #[error("{op} failed: {source}")]
    Device {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{device} does not support {feature}")]
    Unsupported {
        device: String,
        feature: &'static str,
    },

    #[error("driver granted no {0} buffers")]
    NoBuffers(Direction),

    #[error("insufficient buffer memory: {granted} {direction} buffers granted, {required} required")]
    InsufficientBuffers {
        direction: Direction,
        granted: u32,
        required: u32,
    },

    #[error("{direction} buffer {index} holds {length} bytes but {needed} are required")]
    BufferTooSmall {
        direction: Direction,
        index: u32,
        length: usize,
        needed: usize,
    },

    #[error("driver returned {direction} buffer index {index} outside pool of {count}")]
    IndexOutOfRange {
        direction: Direction,
        index: u32,
        count: u32,
    },

    #[error("driver returned {direction} buffer {index} which was not queued")]
    UnexpectedState { direction: Direction, index: u32 },

    #[error("frame of {frame_bytes} bytes cannot be split into {translen} transaction chunks")]
    InvalidTransaction { frame_bytes: usize, translen: u32 },

    /// Dequeue failed with something other than "not ready" or an I/O error.
    #[error("dequeue of {direction} buffer failed: {source}")]
    Dequeue {
        direction: Direction,
        #[source]
        source: io::Error,
    },

    #[error("re-queue of {direction} buffer {index} failed: {source}")]
    Requeue {
        direction: Direction,
        index: u32,
        #[source]
        source: io::Error,
    },

    #[error("no frame from {device} after {timeout:?}")]
    Timeout { device: String, timeout: Duration },

    #[error("invalid stream state: {0}")]
    InvalidState(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("jpeg encode failed: {0}")]
    Jpeg(#[from] turbojpeg::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Wraps an `io::Error` from the device layer with the name of the call.
    pub fn device(op: &'static str, source: io::Error) -> Self {
        Error::Device { op, source }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Device { .. }
            | Error::Unsupported { .. }
            | Error::NoBuffers(_)
            | Error::InsufficientBuffers { .. }
            | Error::BufferTooSmall { .. }
            | Error::InvalidTransaction { .. }
            | Error::Config(_) => ErrorClass::Setup,
            Error::IndexOutOfRange { .. } | Error::UnexpectedState { .. } => ErrorClass::Protocol,
            Error::Requeue { .. } => ErrorClass::Requeue,
            Error::Dequeue { .. }
            | Error::Timeout { .. }
            | Error::InvalidState(_)
            | Error::Jpeg(_)
            | Error::Io(_) => ErrorClass::Streaming,
        }
    }

    pub fn is_protocol_violation(&self) -> bool {
        self.class() == ErrorClass::Protocol
    }
}
