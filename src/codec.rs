// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pixel formats and the bit-level conversions between them.
//!
//! Display buffers hold big-endian 16-bit pixels produced by
//! [`rgb888_to_rgb565x`]. The mem2mem device works on a private variant of
//! `V4L2_PIX_FMT_RGB565X` in which the three high and three low green bits
//! trade places, so moving a buffer between the display and the device is a
//! single [`rgb565x_swap_to_display`] per pixel in either direction.
//!
//! All functions in this module are pure and allocation free.

use crate::lut::ConversionLut;
use std::fmt;

/// Four character code identifying a V4L2 pixel format.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl From<FourCC> for u32 {
    fn from(value: FourCC) -> Self {
        u32::from_le_bytes(value.0)
    }
}

impl From<u32> for FourCC {
    fn from(value: u32) -> Self {
        FourCC(value.to_le_bytes())
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}

/// RGB 24-bit pixel format (8 bits per channel, no alpha)
pub const RGB3: FourCC = FourCC(*b"RGB3");

/// RGB565 big-endian 16-bit pixel format (`V4L2_PIX_FMT_RGB565X`)
pub const RGB565X: FourCC = FourCC(*b"RGBR");

/// YUYV 4:2:2 YUV packed format (common camera output format)
pub const YUYV: FourCC = FourCC(*b"YUYV");

/// Pixel layouts handled by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 3 bytes per pixel stored R, G, B. Generator domain.
    Rgb888,
    /// 2 bytes per pixel, device-native and display layout.
    Rgb565x,
    /// 4 bytes per pixel pair stored Y0, Cb, Y1, Cr.
    Yuv422,
}

impl PixelFormat {
    pub const fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Rgb888 => RGB3,
            PixelFormat::Rgb565x => RGB565X,
            PixelFormat::Yuv422 => YUYV,
        }
    }

    pub const fn row_stride(self, width: u32) -> usize {
        match self {
            PixelFormat::Rgb888 => 3 * width as usize,
            PixelFormat::Rgb565x => 2 * width as usize,
            PixelFormat::Yuv422 => 2 * width as usize,
        }
    }

    pub const fn frame_size(self, width: u32, height: u32) -> usize {
        self.row_stride(width) * height as usize
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.fourcc())
    }
}

/// A CPU-side image buffer of fixed dimensions and format.
///
/// The dimensions of every frame in a streaming session are fixed when the
/// session is created; a new size means a new session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Frame {
    /// Allocates a zeroed frame.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            data: vec![0; format.frame_size(width, height)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn stride(&self) -> usize {
        self.format.row_stride(self.width)
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.format)
    }
}

/// A 24-bit color, packed as `0x00RRGGBB` when stored in the lookup table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rgb888 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb888 {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn from_packed(value: u32) -> Self {
        Self {
            r: (value >> 16) as u8,
            g: (value >> 8) as u8,
            b: value as u8,
        }
    }

    pub const fn packed(self) -> u32 {
        (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }
}

/// Quantizes a color to the 16-bit display layout.
///
/// The logical value carries blue in bits 15..11, green in 10..5 and red in
/// 4..0. The returned `u16` is that value stored big-endian, i.e. its native
/// in-memory bytes are the same on every host.
#[inline]
pub const fn rgb888_to_rgb565x(pixel: Rgb888) -> u16 {
    let value = ((pixel.b as u16 >> 3) << 11) | ((pixel.g as u16 >> 2) << 5) | (pixel.r as u16 >> 3);
    u16::from_ne_bytes(value.to_be_bytes())
}

/// Expands a value produced by [`rgb888_to_rgb565x`] back to 24 bits.
///
/// The dropped low bits are zero, so each channel is at most 7 (red, blue)
/// or 3 (green) below the original.
#[inline]
pub const fn rgb565x_to_rgb888(value: u16) -> Rgb888 {
    let value = u16::from_be_bytes(value.to_ne_bytes());
    Rgb888 {
        r: ((value & 0x1F) as u8) << 3,
        g: (((value >> 5) & 0x3F) as u8) << 2,
        b: (((value >> 11) & 0x1F) as u8) << 3,
    }
}

/// Swaps bits 15..13 with bits 2..0.
///
/// The device stores the most significant green bits in the first byte while
/// the display expects them last. Applying the swap twice is the identity.
#[inline]
pub const fn rgb565x_swap_to_display(value: u16) -> u16 {
    ((value & 0xE000) >> 13) | ((value & 0x0007) << 13) | (value & 0x1FF8)
}

/// Applies [`rgb565x_swap_to_display`] to every pixel of `src`, writing to
/// `dst`. Works in both directions between device and display buffers.
pub fn swap_green_buffer(dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    for (out, pix) in dst.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
        let value = u16::from_ne_bytes([pix[0], pix[1]]);
        out.copy_from_slice(&rgb565x_swap_to_display(value).to_ne_bytes());
    }
}

/// Converts one YUV422 pixel pair through the lookup table.
#[inline]
pub fn yuv422_pair_to_rgb565x(lut: &ConversionLut, y0: u8, cb: u8, y1: u8, cr: u8) -> (u16, u16) {
    (
        rgb888_to_rgb565x(lut.lookup(y0, cb, cr)),
        rgb888_to_rgb565x(lut.lookup(y1, cb, cr)),
    )
}

/// Encodes a packed R, G, B buffer into RGB565X.
pub fn rgb888_to_rgb565x_frame(src: &[u8], dst: &mut [u8]) {
    for (rgb, out) in src.chunks_exact(3).zip(dst.chunks_exact_mut(2)) {
        let value = rgb888_to_rgb565x(Rgb888::new(rgb[0], rgb[1], rgb[2]));
        out.copy_from_slice(&value.to_ne_bytes());
    }
}

/// Decodes an RGB565X buffer into packed R, G, B.
pub fn rgb565x_to_rgb888_frame(src: &[u8], dst: &mut [u8]) {
    for (pix, out) in src.chunks_exact(2).zip(dst.chunks_exact_mut(3)) {
        let rgb = rgb565x_to_rgb888(u16::from_ne_bytes([pix[0], pix[1]]));
        out.copy_from_slice(&[rgb.r, rgb.g, rgb.b]);
    }
}

/// Converts a YUYV image with rows `src_stride` bytes apart into a tightly
/// packed RGB565X image of the same dimensions.
///
/// Rows missing from a short `src` are left untouched in `dst`.
pub fn yuyv_to_rgb565x_frame(
    lut: &ConversionLut,
    src: &[u8],
    src_stride: usize,
    width: u32,
    height: u32,
    dst: &mut [u8],
) {
    let row_bytes = PixelFormat::Rgb565x.row_stride(width);
    for (row, out_row) in dst
        .chunks_exact_mut(row_bytes)
        .take(height as usize)
        .enumerate()
    {
        let start = row * src_stride;
        let Some(in_row) = src.get(start..start + row_bytes) else {
            break;
        };
        for (yuyv, out) in in_row.chunks_exact(4).zip(out_row.chunks_exact_mut(4)) {
            let (p0, p1) = yuv422_pair_to_rgb565x(lut, yuyv[0], yuyv[1], yuyv[2], yuyv[3]);
            out[..2].copy_from_slice(&p0.to_ne_bytes());
            out[2..].copy_from_slice(&p1.to_ne_bytes());
        }
    }
}
