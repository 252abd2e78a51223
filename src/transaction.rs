// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Multi-buffer transactions.
//!
//! The mem2mem test driver can be told to process one logical frame as
//! `translen` consecutive buffers. Each buffer then carries one equal-sized
//! chunk of the frame and the application has to reassemble the chunks in
//! order on the capture side.

use crate::error::{Error, Result};

/// Bytes per chunk when `frame_bytes` is split into `translen` pieces.
/// Truncates; [`Transaction::new`] rejects combinations that do not divide.
pub const fn chunk_size(frame_bytes: usize, translen: u32) -> usize {
    frame_bytes / translen as usize
}

/// Byte offset of chunk `chunk_index` within the logical frame.
pub const fn offset_for(chunk_index: u32, chunk_size: usize) -> usize {
    chunk_index as usize * chunk_size
}

/// Moves the cursor to the next chunk. Returns the new cursor and whether the
/// transaction just completed, in which case the cursor wrapped to 0.
pub const fn advance(cursor: u32, translen: u32) -> (u32, bool) {
    let next = cursor + 1;
    if next >= translen {
        (0, true)
    } else {
        (next, false)
    }
}

/// Chunk layout and progress of the running transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transaction {
    translen: u32,
    frame_bytes: usize,
    chunk_size: usize,
    cursor: u32,
}

impl Transaction {
    /// Validates the split of a `frame_bytes` frame into `translen` chunks.
    ///
    /// Every chunk must be the same size and hold whole 16-bit pixels.
    pub fn new(frame_bytes: usize, translen: u32) -> Result<Self> {
        let invalid = Error::InvalidTransaction {
            frame_bytes,
            translen,
        };
        if translen == 0 || frame_bytes == 0 || frame_bytes % translen as usize != 0 {
            return Err(invalid);
        }
        let chunk_size = chunk_size(frame_bytes, translen);
        if chunk_size % 2 != 0 {
            return Err(invalid);
        }

        Ok(Self {
            translen,
            frame_bytes,
            chunk_size,
            cursor: 0,
        })
    }

    pub fn translen(&self) -> u32 {
        self.translen
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Chunk the next capture buffer belongs to.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Byte range of `chunk_index` within the logical frame.
    pub fn chunk_range(&self, chunk_index: u32) -> std::ops::Range<usize> {
        let start = offset_for(chunk_index % self.translen, self.chunk_size);
        start..start + self.chunk_size
    }

    /// Advances the cursor, returns true when a whole frame completed.
    pub fn advance(&mut self) -> bool {
        let (cursor, completed) = advance(self.cursor, self.translen);
        self.cursor = cursor;
        completed
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}
