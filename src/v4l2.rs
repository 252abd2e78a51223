// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Minimal V4L2 device layer.
//!
//! Only the calls the mem2mem tester and the capture source need are bound:
//! capability query, controls, single-planar formats, cropping reset, MMAP
//! buffer management, streaming and `read()` I/O. The pipeline talks to the
//! device through the [`VideoDevice`] trait so it can be driven by a scripted
//! device in tests.

use crate::codec::FourCC;
use std::{
    ffi::c_void,
    fmt,
    fs::{File, OpenOptions},
    io::{self, Read},
    os::{
        fd::{AsRawFd, RawFd},
        unix::fs::{FileTypeExt, OpenOptionsExt},
    },
    path::{Path, PathBuf},
    ptr::null_mut,
    slice::{from_raw_parts, from_raw_parts_mut},
    time::Duration,
};
use tracing::{debug, warn};

pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const V4L2_BUF_TYPE_VIDEO_OUTPUT: u32 = 2;

pub const V4L2_MEMORY_MMAP: u32 = 1;

pub const V4L2_FIELD_ANY: u32 = 0;
pub const V4L2_FIELD_INTERLACED: u32 = 4;

pub const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
pub const V4L2_CAP_VIDEO_OUTPUT: u32 = 0x0000_0002;
pub const V4L2_CAP_VIDEO_M2M: u32 = 0x0000_8000;
pub const V4L2_CAP_READWRITE: u32 = 0x0100_0000;
pub const V4L2_CAP_STREAMING: u32 = 0x0400_0000;
pub const V4L2_CAP_DEVICE_CAPS: u32 = 0x8000_0000;

pub const V4L2_CID_BASE: u32 = 0x0098_0900;
pub const V4L2_CID_HFLIP: u32 = V4L2_CID_BASE + 20;
pub const V4L2_CID_VFLIP: u32 = V4L2_CID_BASE + 21;
pub const V4L2_CID_PRIVATE_BASE: u32 = 0x0800_0000;

/// Transaction time budget in milliseconds (test driver private control).
pub const V4L2_CID_TRANS_TIME_MSEC: u32 = V4L2_CID_PRIVATE_BASE;
/// Number of buffers making up one transaction (test driver private control).
pub const V4L2_CID_TRANS_NUM_BUFS: u32 = V4L2_CID_PRIVATE_BASE + 1;

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_pix_format {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_format_fmt {
    pub pix: v4l2_pix_format,
    pub raw_data: [u8; 200],
    // The kernel union holds pointers, keep its 8 byte alignment.
    _align: [u64; 25],
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format_fmt,
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_buffer_m {
    pub offset: u32,
    pub userptr: libc::c_ulong,
    pub planes: *mut c_void,
    pub fd: i32,
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: libc::timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer_m,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: i32,
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_control {
    pub id: u32,
    pub value: i32,
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_fract {
    pub numerator: u32,
    pub denominator: u32,
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_cropcap {
    pub type_: u32,
    pub bounds: v4l2_rect,
    pub defrect: v4l2_rect,
    pub pixelaspect: v4l2_fract,
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_crop {
    pub type_: u32,
    pub c: v4l2_rect,
}

mod ioctl {
    use super::*;

    nix::ioctl_read!(vidioc_querycap, b'V', 0, v4l2_capability);
    nix::ioctl_readwrite!(vidioc_s_fmt, b'V', 5, v4l2_format);
    nix::ioctl_readwrite!(vidioc_reqbufs, b'V', 8, v4l2_requestbuffers);
    nix::ioctl_readwrite!(vidioc_querybuf, b'V', 9, v4l2_buffer);
    nix::ioctl_readwrite!(vidioc_qbuf, b'V', 15, v4l2_buffer);
    nix::ioctl_readwrite!(vidioc_dqbuf, b'V', 17, v4l2_buffer);
    nix::ioctl_write_ptr!(vidioc_streamon, b'V', 18, libc::c_int);
    nix::ioctl_write_ptr!(vidioc_streamoff, b'V', 19, libc::c_int);
    nix::ioctl_readwrite!(vidioc_s_ctrl, b'V', 28, v4l2_control);
    nix::ioctl_readwrite!(vidioc_cropcap, b'V', 58, v4l2_cropcap);
    nix::ioctl_write_ptr!(vidioc_s_crop, b'V', 60, v4l2_crop);
}

/// Buffer queue direction of a V4L2 device.
///
/// For a mem2mem device the application writes frames into OUTPUT buffers
/// and reads the transformed result from CAPTURE buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Output,
    Capture,
}

impl Direction {
    /// Position of the direction in per-direction arrays.
    pub const fn index(self) -> usize {
        match self {
            Direction::Output => 0,
            Direction::Capture => 1,
        }
    }

    pub const fn buf_type(self) -> u32 {
        match self {
            Direction::Output => V4L2_BUF_TYPE_VIDEO_OUTPUT,
            Direction::Capture => V4L2_BUF_TYPE_VIDEO_CAPTURE,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Output => write!(f, "output"),
            Direction::Capture => write!(f, "capture"),
        }
    }
}

/// Result of `VIDIOC_QUERYCAP`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub driver: String,
    pub card: String,
    pub capabilities: u32,
    pub device_caps: u32,
}

impl Capabilities {
    /// Capabilities of the opened node, preferring the per-node
    /// `device_caps` when the driver provides them.
    pub fn effective(&self) -> u32 {
        if self.capabilities & V4L2_CAP_DEVICE_CAPS != 0 {
            self.device_caps
        } else {
            self.capabilities
        }
    }

    pub fn has(&self, cap: u32) -> bool {
        self.effective() & cap != 0
    }

    /// True when the node exposes both queues of a memory-to-memory device.
    pub fn is_mem2mem(&self) -> bool {
        self.has(V4L2_CAP_VIDEO_M2M)
            || (self.has(V4L2_CAP_VIDEO_CAPTURE) && self.has(V4L2_CAP_VIDEO_OUTPUT))
    }
}

/// Single-planar pixel format negotiated with `VIDIOC_S_FMT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
}

impl PixFormat {
    pub fn new(width: u32, height: u32, fourcc: FourCC, field: u32) -> Self {
        Self {
            width,
            height,
            fourcc,
            field,
            bytesperline: 0,
            sizeimage: 0,
        }
    }
}

/// Location of an MMAP buffer as reported by `VIDIOC_QUERYBUF`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferInfo {
    pub direction: Direction,
    pub index: u32,
    pub offset: u32,
    pub length: usize,
}

/// Outcome of waiting for the device to become readable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
    Interrupted,
}

/// The device control interface used by the pipeline.
///
/// Every call is synchronous and reports failures as `io::Error` carrying the
/// driver's errno, so callers can tell `EAGAIN` and `EIO` apart from fatal
/// failures.
pub trait VideoDevice {
    /// Memory region backing one mapped buffer.
    type Mapping: AsRef<[u8]> + AsMut<[u8]>;

    fn capabilities(&mut self) -> io::Result<Capabilities>;

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()>;

    /// Sets the format of one queue and returns what the driver accepted.
    fn set_format(&mut self, direction: Direction, format: &PixFormat) -> io::Result<PixFormat>;

    /// Resets cropping to the driver's default rectangle.
    fn reset_crop(&mut self, direction: Direction) -> io::Result<()>;

    /// Requests `count` MMAP buffers and returns how many were granted.
    fn request_buffers(&mut self, direction: Direction, count: u32) -> io::Result<u32>;

    fn query_buffer(&mut self, direction: Direction, index: u32) -> io::Result<BufferInfo>;

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<Self::Mapping>;

    fn queue_buffer(&mut self, direction: Direction, index: u32) -> io::Result<()>;

    /// Dequeues a finished buffer and returns its index.
    fn dequeue_buffer(&mut self, direction: Direction) -> io::Result<u32>;

    fn stream_on(&mut self, direction: Direction) -> io::Result<()>;

    fn stream_off(&mut self, direction: Direction) -> io::Result<()>;

    /// `read()` I/O, returns the number of bytes read.
    fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Blocks until the device is readable. `None` waits forever.
    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<Readiness>;
}

/// Memory mapped V4L2 buffer, unmapped when dropped.
pub struct MmapRegion {
    mmap: *mut u8,
    len: usize,
}

impl MmapRegion {
    fn new(fd: RawFd, offset: u32, len: usize) -> io::Result<Self> {
        // SAFETY: a fresh shared mapping of a driver buffer, the kernel picks
        // the address. `offset` and `len` come from VIDIOC_QUERYBUF.
        let mmap = unsafe {
            libc::mmap(
                null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )
        };
        if mmap == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            mmap: mmap.cast::<u8>(),
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for MmapRegion {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: the mapping is `len` bytes and lives until `self` drops.
        unsafe { from_raw_parts(self.mmap, self.len) }
    }
}

impl AsMut<[u8]> for MmapRegion {
    fn as_mut(&mut self) -> &mut [u8] {
        // SAFETY: the mapping is `len` bytes and lives until `self` drops,
        // `&mut self` rules out other views of it.
        unsafe { from_raw_parts_mut(self.mmap, self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: `mmap` and `len` are exactly what mmap returned, and no
        // slice of the mapping outlives `self`.
        if unsafe { libc::munmap(self.mmap.cast::<c_void>(), self.len) } != 0 {
            warn!("munmap failed: {}", io::Error::last_os_error());
        }
    }
}

impl fmt::Debug for MmapRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MmapRegion({:p}, {} bytes)", self.mmap, self.len)
    }
}

fn c_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn empty_buffer(direction: Direction, index: u32) -> v4l2_buffer {
    // SAFETY: v4l2_buffer is plain old data, all zero is a valid value.
    let mut buf: v4l2_buffer = unsafe { std::mem::zeroed() };
    buf.type_ = direction.buf_type();
    buf.memory = V4L2_MEMORY_MMAP;
    buf.index = index;
    buf
}

/// A V4L2 character device opened non-blocking for reading and writing.
#[derive(Debug)]
pub struct V4l2Device {
    file: File,
    path: PathBuf,
}

impl V4l2Device {
    /// Opens `path`, which must be a character device.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|e| {
            io::Error::new(e.kind(), format!("cannot identify '{}': {e}", path.display()))
        })?;
        if !metadata.file_type().is_char_device() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is no device", path.display()),
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| {
                io::Error::new(e.kind(), format!("cannot open '{}': {e}", path.display()))
            })?;
        debug!("opened {}", path.display());

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Retries an ioctl interrupted by a signal.
fn xioctl<F>(mut call: F) -> io::Result<libc::c_int>
where
    F: FnMut() -> nix::Result<libc::c_int>,
{
    loop {
        match call() {
            Err(nix::errno::Errno::EINTR) => continue,
            res => return res.map_err(io::Error::from),
        }
    }
}

impl VideoDevice for V4l2Device {
    type Mapping = MmapRegion;

    fn capabilities(&mut self) -> io::Result<Capabilities> {
        // SAFETY: v4l2_capability is plain old data.
        let mut cap: v4l2_capability = unsafe { std::mem::zeroed() };
        xioctl(|| unsafe { ioctl::vidioc_querycap(self.fd(), &mut cap) })?;
        Ok(Capabilities {
            driver: c_string(&cap.driver),
            card: c_string(&cap.card),
            capabilities: cap.capabilities,
            device_caps: cap.device_caps,
        })
    }

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()> {
        let mut ctrl = v4l2_control { id, value };
        xioctl(|| unsafe { ioctl::vidioc_s_ctrl(self.fd(), &mut ctrl) })?;
        Ok(())
    }

    fn set_format(&mut self, direction: Direction, format: &PixFormat) -> io::Result<PixFormat> {
        // SAFETY: v4l2_format is plain old data.
        let mut fmt: v4l2_format = unsafe { std::mem::zeroed() };
        fmt.type_ = direction.buf_type();
        fmt.fmt.pix = v4l2_pix_format {
            width: format.width,
            height: format.height,
            pixelformat: format.fourcc.into(),
            field: format.field,
            bytesperline: format.bytesperline,
            sizeimage: format.sizeimage,
            ..Default::default()
        };
        xioctl(|| unsafe { ioctl::vidioc_s_fmt(self.fd(), &mut fmt) })?;

        // SAFETY: the driver filled the pix member for a single-planar type.
        let pix = unsafe { fmt.fmt.pix };
        Ok(PixFormat {
            width: pix.width,
            height: pix.height,
            fourcc: FourCC::from(pix.pixelformat),
            field: pix.field,
            bytesperline: pix.bytesperline,
            sizeimage: pix.sizeimage,
        })
    }

    fn reset_crop(&mut self, direction: Direction) -> io::Result<()> {
        let mut cropcap = v4l2_cropcap {
            type_: direction.buf_type(),
            ..Default::default()
        };
        xioctl(|| unsafe { ioctl::vidioc_cropcap(self.fd(), &mut cropcap) })?;

        let crop = v4l2_crop {
            type_: direction.buf_type(),
            c: cropcap.defrect,
        };
        xioctl(|| unsafe { ioctl::vidioc_s_crop(self.fd(), &crop) })?;
        Ok(())
    }

    fn request_buffers(&mut self, direction: Direction, count: u32) -> io::Result<u32> {
        let mut req = v4l2_requestbuffers {
            count,
            type_: direction.buf_type(),
            memory: V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        xioctl(|| unsafe { ioctl::vidioc_reqbufs(self.fd(), &mut req) })?;
        Ok(req.count)
    }

    fn query_buffer(&mut self, direction: Direction, index: u32) -> io::Result<BufferInfo> {
        let mut buf = empty_buffer(direction, index);
        xioctl(|| unsafe { ioctl::vidioc_querybuf(self.fd(), &mut buf) })?;
        // SAFETY: MMAP buffers report their offset in the union.
        let offset = unsafe { buf.m.offset };
        debug!("QUERYBUF {direction} {index} returned offset: {offset:#x}");
        Ok(BufferInfo {
            direction,
            index,
            offset,
            length: buf.length as usize,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<MmapRegion> {
        MmapRegion::new(self.fd(), info.offset, info.length)
    }

    fn queue_buffer(&mut self, direction: Direction, index: u32) -> io::Result<()> {
        let mut buf = empty_buffer(direction, index);
        xioctl(|| unsafe { ioctl::vidioc_qbuf(self.fd(), &mut buf) })?;
        Ok(())
    }

    fn dequeue_buffer(&mut self, direction: Direction) -> io::Result<u32> {
        let mut buf = empty_buffer(direction, 0);
        xioctl(|| unsafe { ioctl::vidioc_dqbuf(self.fd(), &mut buf) })?;
        Ok(buf.index)
    }

    fn stream_on(&mut self, direction: Direction) -> io::Result<()> {
        let type_ = direction.buf_type() as libc::c_int;
        xioctl(|| unsafe { ioctl::vidioc_streamon(self.fd(), &type_) })?;
        Ok(())
    }

    fn stream_off(&mut self, direction: Direction) -> io::Result<()> {
        let type_ = direction.buf_type() as libc::c_int;
        xioctl(|| unsafe { ioctl::vidioc_streamoff(self.fd(), &type_) })?;
        Ok(())
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<Readiness> {
        let mut pollfd = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };

        // SAFETY: one valid pollfd on the stack.
        match unsafe { libc::poll(&mut pollfd, 1, timeout_ms) } {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    Ok(Readiness::Interrupted)
                } else {
                    Err(err)
                }
            }
            0 => Ok(Readiness::TimedOut),
            _ => Ok(Readiness::Ready),
        }
    }
}

/// Fills in `bytesperline` and `sizeimage` for drivers that leave them short.
pub fn sanitize_format(mut format: PixFormat, bytes_per_pixel: u32) -> PixFormat {
    let min = format.width * bytes_per_pixel;
    if format.bytesperline < min {
        format.bytesperline = min;
    }
    let min = format.bytesperline * format.height;
    if format.sizeimage < min {
        format.sizeimage = min;
    }
    format
}
