// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Frame producers feeding the OUTPUT queue.
//!
//! A [`FrameSource`] writes complete RGB565X frames in display layout. Two
//! sources exist: a synthetic pattern that needs no hardware and a V4L2
//! capture device delivering YUYV which is converted through the
//! [`ConversionLut`].

use crate::{
    buffer::{BufferPool, Dequeue},
    codec::{rgb888_to_rgb565x_frame, yuyv_to_rgb565x_frame, Frame, PixelFormat, YUYV},
    error::{Error, Result},
    lut::ConversionLut,
    v4l2::{
        sanitize_format, Direction, PixFormat, Readiness, VideoDevice, V4L2_CAP_READWRITE,
        V4L2_CAP_STREAMING, V4L2_CAP_VIDEO_CAPTURE, V4L2_FIELD_INTERLACED,
    },
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{io, sync::Arc, time::Duration};
use tracing::{debug, info, instrument, warn};

/// Supplies the frames sent through the mem2mem device.
pub trait FrameSource {
    /// Called once before the first frame is requested.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Writes the next frame into `frame`. Blocks until one is available.
    fn next_frame(&mut self, frame: &mut Frame) -> Result<()>;

    /// Called once at teardown, also after a failed run.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn next_frame(&mut self, frame: &mut Frame) -> Result<()> {
        (**self).next_frame(frame)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }
}

fn check_dimensions(frame: &Frame, width: u32, height: u32) -> Result<()> {
    if frame.width() != width || frame.height() != height || frame.format() != PixelFormat::Rgb565x
    {
        return Err(Error::Config(format!(
            "source produces {}x{} {} frames, got a {} frame",
            width,
            height,
            PixelFormat::Rgb565x,
            frame
        )));
    }
    Ok(())
}

/// Gradient test card that slowly decays into noise.
///
/// Blue ramps along each row and green down the columns. Before every frame
/// a random subset of bytes is darkened a little, so consecutive frames
/// differ and a stuck pipeline is visible.
pub struct SyntheticSource {
    card: Frame,
    rng: StdRng,
    frames: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_rng(width, height, StdRng::from_entropy())
    }

    /// Deterministic source for tests and benchmarks.
    pub fn with_seed(width: u32, height: u32, seed: u64) -> Self {
        Self::with_rng(width, height, StdRng::seed_from_u64(seed))
    }

    fn with_rng(width: u32, height: u32, rng: StdRng) -> Self {
        let mut card = Frame::new(width, height, PixelFormat::Rgb888);
        let stride = card.stride();
        for (y, row) in card.as_mut_slice().chunks_exact_mut(stride).enumerate() {
            for (x, pixel) in row.chunks_exact_mut(3).enumerate() {
                pixel[0] = 0;
                pixel[1] = y as u8;
                pixel[2] = x as u8;
            }
        }

        Self {
            card,
            rng,
            frames: 0,
        }
    }

    /// Current test card in R, G, B.
    pub fn card(&self) -> &Frame {
        &self.card
    }

    /// Frames produced so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn decay(&mut self) {
        let data = self.card.as_mut_slice();
        let mut i = 0;
        while i < data.len() {
            data[i] = data[i].wrapping_sub(self.rng.gen_range(0..8));
            i += 1 + self.rng.gen_range(0..3);
        }
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self, frame: &mut Frame) -> Result<()> {
        check_dimensions(frame, self.card.width(), self.card.height())?;
        self.decay();
        rgb888_to_rgb565x_frame(self.card.as_slice(), frame.as_mut_slice());
        self.frames += 1;
        Ok(())
    }
}

/// How frames are pulled from a capture device.
///
/// User pointer I/O is not supported, buffers are either read into or
/// mapped from the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoMethod {
    /// `read()` into a single application buffer.
    Read,
    /// Driver allocated buffers mapped into the process.
    Mmap,
}

/// YUYV camera input converted to RGB565X.
pub struct CaptureSource<D: VideoDevice> {
    device: D,
    name: String,
    io: IoMethod,
    format: PixFormat,
    lut: Arc<ConversionLut>,
    pool: BufferPool<D::Mapping>,
    read_buffer: Vec<u8>,
    timeout: Duration,
    streaming: bool,
}

impl<D: VideoDevice> CaptureSource<D> {
    /// Buffers requested for MMAP I/O.
    pub const BUFFER_COUNT: u32 = 4;
    /// Fewer MMAP buffers than this cannot keep the camera streaming.
    pub const MIN_BUFFERS: u32 = 2;
    /// Waiting longer than this for a frame is fatal.
    pub const TIMEOUT: Duration = Duration::from_secs(2);

    /// Negotiates YUYV capture at the requested size.
    ///
    /// The driver may pick a different size; the negotiated one is available
    /// from [`CaptureSource::width`] and [`CaptureSource::height`].
    pub fn new(
        mut device: D,
        name: impl Into<String>,
        io: IoMethod,
        width: u32,
        height: u32,
        lut: Arc<ConversionLut>,
    ) -> Result<Self> {
        let name = name.into();
        let caps = device
            .capabilities()
            .map_err(|e| Error::device("VIDIOC_QUERYCAP", e))?;
        if !caps.has(V4L2_CAP_VIDEO_CAPTURE) {
            return Err(Error::Unsupported {
                device: name,
                feature: "video capture",
            });
        }
        match io {
            IoMethod::Read if !caps.has(V4L2_CAP_READWRITE) => {
                return Err(Error::Unsupported {
                    device: name,
                    feature: "read i/o",
                })
            }
            IoMethod::Mmap if !caps.has(V4L2_CAP_STREAMING) => {
                return Err(Error::Unsupported {
                    device: name,
                    feature: "streaming i/o",
                })
            }
            _ => {}
        }

        if let Err(e) = device.reset_crop(Direction::Capture) {
            debug!("{}: crop not reset: {}", name, e);
        }

        let requested = PixFormat::new(width, height, YUYV, V4L2_FIELD_INTERLACED);
        let format = device
            .set_format(Direction::Capture, &requested)
            .map_err(|e| Error::device("VIDIOC_S_FMT", e))?;
        let format = sanitize_format(format, 2);
        if format.width != width || format.height != height {
            warn!(
                "User requested {}x{} but camera set {}x{}",
                width, height, format.width, format.height
            );
        }
        info!(
            "{}: {} {}x{} stride {} size {}",
            name, caps.card, format.width, format.height, format.bytesperline, format.sizeimage
        );

        let mut pool = BufferPool::new(Direction::Capture);
        let mut read_buffer = Vec::new();
        match io {
            IoMethod::Read => read_buffer = vec![0; format.sizeimage as usize],
            IoMethod::Mmap => {
                let granted = pool.request(&mut device, Self::BUFFER_COUNT)?;
                if granted < Self::MIN_BUFFERS {
                    return Err(Error::InsufficientBuffers {
                        direction: Direction::Capture,
                        granted,
                        required: Self::MIN_BUFFERS,
                    });
                }
                pool.map_all(&mut device)?;
            }
        }

        Ok(Self {
            device,
            name,
            io,
            format,
            lut,
            pool,
            read_buffer,
            timeout: Self::TIMEOUT,
            streaming: false,
        })
    }

    /// Overrides [`CaptureSource::TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn width(&self) -> u32 {
        self.format.width
    }

    pub fn height(&self) -> u32 {
        self.format.height
    }

    /// Format accepted by the driver.
    pub fn format(&self) -> &PixFormat {
        &self.format
    }

    pub fn io(&self) -> IoMethod {
        self.io
    }

    pub fn pool(&self) -> &BufferPool<D::Mapping> {
        &self.pool
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Tries to fetch one frame. `Ok(false)` means nothing was ready.
    fn read_frame(&mut self, frame: &mut Frame) -> Result<bool> {
        let stride = self.format.bytesperline as usize;
        let (width, height) = (self.format.width, self.format.height);

        match self.io {
            IoMethod::Read => match self.device.read_frame(&mut self.read_buffer) {
                Ok(len) => {
                    yuyv_to_rgb565x_frame(
                        &self.lut,
                        &self.read_buffer[..len],
                        stride,
                        width,
                        height,
                        frame.as_mut_slice(),
                    );
                    Ok(true)
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
                Err(e) => Err(Error::device("read", e)),
            },
            IoMethod::Mmap => match self.pool.dequeue(&mut self.device)? {
                Dequeue::NotReady => Ok(false),
                Dequeue::Dropped => Err(Error::Dequeue {
                    direction: Direction::Capture,
                    source: io::Error::from_raw_os_error(libc::EIO),
                }),
                Dequeue::Ready(index) => {
                    let slot = self.pool.slot(index)?;
                    yuyv_to_rgb565x_frame(
                        &self.lut,
                        slot.as_slice(),
                        stride,
                        width,
                        height,
                        frame.as_mut_slice(),
                    );
                    self.pool.release(index)?;
                    self.pool.requeue(&mut self.device, index)?;
                    Ok(true)
                }
            },
        }
    }
}

impl<D: VideoDevice> FrameSource for CaptureSource<D> {
    fn start(&mut self) -> Result<()> {
        if self.io == IoMethod::Mmap && !self.streaming {
            for index in 0..self.pool.len() as u32 {
                self.pool.queue(&mut self.device, index)?;
            }
            self.device
                .stream_on(Direction::Capture)
                .map_err(|e| Error::device("VIDIOC_STREAMON", e))?;
            self.streaming = true;
            debug!("{}: streaming", self.name);
        }
        Ok(())
    }

    #[instrument(skip_all)]
    fn next_frame(&mut self, frame: &mut Frame) -> Result<()> {
        check_dimensions(frame, self.format.width, self.format.height)?;
        loop {
            match self
                .device
                .wait_readable(Some(self.timeout))
                .map_err(|e| Error::device("select", e))?
            {
                Readiness::Interrupted => continue,
                Readiness::TimedOut => {
                    return Err(Error::Timeout {
                        device: self.name.clone(),
                        timeout: self.timeout,
                    })
                }
                Readiness::Ready => {}
            }

            if self.read_frame(frame)? {
                return Ok(());
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        let result = if self.streaming {
            self.streaming = false;
            self.device
                .stream_off(Direction::Capture)
                .map_err(|e| Error::device("VIDIOC_STREAMOFF", e))
        } else {
            Ok(())
        };
        self.pool.unmap_all();
        result
    }
}
