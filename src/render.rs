// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Presentation of the pre and post transform frames.

use crate::{
    codec::{rgb565x_to_rgb888_frame, Frame, PixelFormat},
    error::{Error, Result},
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use turbojpeg::{Image, OwnedBuf};

/// Rows between the pre and post halves of the composite.
pub const SEPARATOR: u32 = 10;

/// Consumes each pair of frames after a capture buffer was reassembled.
pub trait RenderSink {
    fn render(&mut self, pre: &Frame, post: &Frame) -> Result<()>;
}

impl<T: RenderSink + ?Sized> RenderSink for Box<T> {
    fn render(&mut self, pre: &Frame, post: &Frame) -> Result<()> {
        (**self).render(pre, post)
    }
}

/// Discards every frame.
#[derive(Debug, Default)]
pub struct NullSink;

impl RenderSink for NullSink {
    fn render(&mut self, _pre: &Frame, _post: &Frame) -> Result<()> {
        Ok(())
    }
}

struct Snapshot {
    path: PathBuf,
    interval: u64,
}

/// Stacks the source frame above the transformed frame on one surface of
/// `width` x `2 * height + SEPARATOR` pixels.
///
/// The separator band stays black. With a snapshot path configured the
/// surface is written as a JPEG every `interval` presented frames.
pub struct CompositeSink {
    surface: Frame,
    height: u32,
    presented: u64,
    snapshot: Option<Snapshot>,
}

impl CompositeSink {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: Frame::new(width, 2 * height + SEPARATOR, PixelFormat::Rgb565x),
            height,
            presented: 0,
            snapshot: None,
        }
    }

    /// Writes the surface to `path` every `interval` frames, 0 disables.
    pub fn with_snapshot<P: AsRef<Path>>(mut self, path: P, interval: u64) -> Self {
        self.snapshot = (interval > 0).then(|| Snapshot {
            path: path.as_ref().to_path_buf(),
            interval,
        });
        self
    }

    pub fn surface(&self) -> &Frame {
        &self.surface
    }

    /// Number of frames rendered so far.
    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Byte offset of the post half within the surface.
    pub fn post_offset(&self) -> usize {
        (self.height + SEPARATOR) as usize * self.surface.stride()
    }

    fn blit(&mut self, frame: &Frame, offset: usize) -> Result<()> {
        if frame.width() != self.surface.width()
            || frame.height() != self.height
            || frame.format() != PixelFormat::Rgb565x
        {
            return Err(Error::Config(format!(
                "cannot present a {} frame on a {} surface",
                frame,
                self.surface
            )));
        }
        let len = frame.size();
        self.surface.as_mut_slice()[offset..offset + len].copy_from_slice(frame.as_slice());
        Ok(())
    }

    /// Encodes the current surface as a JPEG file.
    #[instrument(skip_all)]
    pub fn write_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let (width, height) = (self.surface.width(), self.surface.height());
        let mut rgb = vec![0; PixelFormat::Rgb888.frame_size(width, height)];
        rgb565x_to_rgb888_frame(self.surface.as_slice(), &mut rgb);
        let jpeg = encode_jpeg(&rgb, width, height)?;
        std::fs::write(path.as_ref(), &jpeg[..])?;
        debug!("wrote {} byte snapshot to {}", jpeg.len(), path.as_ref().display());
        Ok(())
    }
}

impl RenderSink for CompositeSink {
    fn render(&mut self, pre: &Frame, post: &Frame) -> Result<()> {
        self.blit(pre, 0)?;
        self.blit(post, self.post_offset())?;
        self.presented += 1;

        if let Some(snapshot) = &self.snapshot {
            if self.presented % snapshot.interval == 0 {
                self.write_snapshot(&snapshot.path)?;
                if self.presented == snapshot.interval {
                    info!("writing snapshots to {}", snapshot.path.display());
                }
            }
        }
        Ok(())
    }
}

/// Compresses a packed R, G, B image.
pub fn encode_jpeg(rgb: &[u8], width: u32, height: u32) -> Result<OwnedBuf> {
    let needed = PixelFormat::Rgb888.frame_size(width, height);
    if rgb.len() < needed {
        return Err(Error::Config(format!(
            "{}x{} image needs {} bytes, got {}",
            width,
            height,
            needed,
            rgb.len()
        )));
    }
    let image = Image {
        pixels: rgb,
        width: width as usize,
        pitch: width as usize * 3,
        height: height as usize,
        format: turbojpeg::PixelFormat::RGB,
    };
    Ok(turbojpeg::compress(image, 90, turbojpeg::Subsamp::Sub2x2)?)
}
