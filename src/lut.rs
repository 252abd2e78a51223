// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! YCbCr to RGB888 lookup table.
//!
//! The table covers every `(Y, Cb, Cr)` triple, 2^24 entries of packed
//! `0x00RRGGBB` (64 MiB). It is built once before streaming starts and only
//! read afterwards, so it is shared between owners with an `Arc`.

use crate::codec::Rgb888;
use std::fmt;
use tracing::debug;

pub struct ConversionLut {
    table: Box<[u32]>,
}

#[inline]
const fn lut_index(y: u8, cb: u8, cr: u8) -> usize {
    (y as usize) << 16 | (cb as usize) << 8 | cr as usize
}

fn clamp_channel(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Full-range BT.601 YCbCr to RGB, computed without the table.
pub fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> Rgb888 {
    let y = f64::from(y);
    let cb = f64::from(cb) - 128.0;
    let cr = f64::from(cr) - 128.0;

    Rgb888::new(
        clamp_channel(y + 1.40200 * cr),
        clamp_channel(y - 0.34414 * cb - 0.71414 * cr),
        clamp_channel(y + 1.77200 * cb),
    )
}

impl ConversionLut {
    pub const ENTRIES: usize = 256 * 256 * 256;

    /// Computes every entry of the table.
    pub fn build() -> Self {
        let mut table = Vec::with_capacity(Self::ENTRIES);
        for y in 0..=u8::MAX {
            for cb in 0..=u8::MAX {
                for cr in 0..=u8::MAX {
                    table.push(ycbcr_to_rgb(y, cb, cr).packed());
                }
            }
        }
        debug!("YCbCr lookup table built with {} entries", table.len());
        Self {
            table: table.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn lookup(&self, y: u8, cb: u8, cr: u8) -> Rgb888 {
        Rgb888::from_packed(self.table[lut_index(y, cb, cr)])
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl fmt::Debug for ConversionLut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionLut")
            .field("entries", &self.table.len())
            .finish()
    }
}
