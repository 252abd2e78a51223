// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Scripted in-memory stand-in for a V4L2 device.
//!
//! Queues are FIFO: a buffer comes back from `dequeue_buffer` in the order it
//! was queued, unless a scripted result for that direction is pending.

#![allow(dead_code)]

use edgefirst_m2m::{
    codec::{Frame, PixelFormat},
    render::RenderSink,
    source::FrameSource,
    v4l2::{BufferInfo, Capabilities, Direction, PixFormat, Readiness, VideoDevice},
};
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    io,
    rc::Rc,
    time::Duration,
};

/// Scripted result of the next dequeue on one direction.
#[derive(Clone, Copy, Debug)]
pub enum Scripted {
    Errno(i32),
    Index(u32),
}

#[derive(Debug, Default)]
pub struct MockState {
    pub caps: u32,
    /// Upper bound on buffers granted per `request_buffers`.
    pub grant_limit: Option<u32>,
    pub buffer_len: usize,
    /// Pattern repeated over every capture buffer. Empty fills capture
    /// buffer `i` with the byte `0x10 + i`.
    pub fill: Vec<u8>,
    /// Size the driver picks instead of the requested one.
    pub adjust_size: Option<(u32, u32)>,
    pub controls: Vec<(u32, i32)>,
    pub formats: Vec<(Direction, PixFormat)>,
    pub granted: [u32; 2],
    pub queues: [VecDeque<u32>; 2],
    pub queued: Vec<(Direction, u32)>,
    pub dequeued: Vec<(Direction, u32)>,
    pub script: VecDeque<(Direction, Scripted)>,
    pub readiness: VecDeque<Readiness>,
    pub streaming: [bool; 2],
    pub stream_ons: Vec<Direction>,
    pub stream_offs: Vec<Direction>,
    /// STREAMON of this direction fails with `EINVAL`.
    pub fail_stream_on: Option<Direction>,
    /// QBUF of this buffer fails once its queue is streaming.
    pub fail_requeue: Option<(Direction, u32)>,
    /// Bytes returned by `read_frame`, empty means `EAGAIN`.
    pub read_data: Vec<u8>,
}

fn slot(direction: Direction) -> usize {
    match direction {
        Direction::Output => 0,
        Direction::Capture => 1,
    }
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

#[derive(Clone, Debug)]
pub struct MockDevice {
    state: Rc<RefCell<MockState>>,
}

impl MockDevice {
    pub fn new(caps: u32, buffer_len: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                caps,
                buffer_len,
                ..MockState::default()
            })),
        }
    }

    /// Shared view of the device state, also valid after the device was
    /// moved into an engine.
    pub fn handle(&self) -> Rc<RefCell<MockState>> {
        self.state.clone()
    }
}

impl VideoDevice for MockDevice {
    type Mapping = Vec<u8>;

    fn capabilities(&mut self) -> io::Result<Capabilities> {
        Ok(Capabilities {
            driver: "mock".into(),
            card: "mock device".into(),
            capabilities: self.state.borrow().caps,
            device_caps: 0,
        })
    }

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()> {
        self.state.borrow_mut().controls.push((id, value));
        Ok(())
    }

    fn set_format(&mut self, direction: Direction, format: &PixFormat) -> io::Result<PixFormat> {
        let mut state = self.state.borrow_mut();
        state.formats.push((direction, *format));
        let mut accepted = *format;
        if let Some((width, height)) = state.adjust_size {
            accepted.width = width;
            accepted.height = height;
        }
        Ok(accepted)
    }

    fn reset_crop(&mut self, _direction: Direction) -> io::Result<()> {
        Err(errno(libc::EINVAL))
    }

    fn request_buffers(&mut self, direction: Direction, count: u32) -> io::Result<u32> {
        let mut state = self.state.borrow_mut();
        let granted = state.grant_limit.map_or(count, |limit| count.min(limit));
        state.granted[slot(direction)] = granted;
        Ok(granted)
    }

    fn query_buffer(&mut self, direction: Direction, index: u32) -> io::Result<BufferInfo> {
        let state = self.state.borrow();
        if index >= state.granted[slot(direction)] {
            return Err(errno(libc::EINVAL));
        }
        Ok(BufferInfo {
            direction,
            index,
            offset: index * 0x1000,
            length: state.buffer_len,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<Vec<u8>> {
        let state = self.state.borrow();
        let mut buffer = vec![0; info.length];
        if info.direction == Direction::Capture {
            if state.fill.is_empty() {
                buffer.fill(0x10 + info.index as u8);
            } else {
                for (byte, value) in buffer.iter_mut().zip(state.fill.iter().cycle()) {
                    *byte = *value;
                }
            }
        }
        Ok(buffer)
    }

    fn queue_buffer(&mut self, direction: Direction, index: u32) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.streaming[slot(direction)] && state.fail_requeue == Some((direction, index)) {
            return Err(errno(libc::EINVAL));
        }
        state.queues[slot(direction)].push_back(index);
        state.queued.push((direction, index));
        Ok(())
    }

    fn dequeue_buffer(&mut self, direction: Direction) -> io::Result<u32> {
        let mut state = self.state.borrow_mut();
        if matches!(state.script.front(), Some((d, _)) if *d == direction) {
            if let Some((_, scripted)) = state.script.pop_front() {
                return match scripted {
                    Scripted::Errno(code) => Err(errno(code)),
                    Scripted::Index(index) => {
                        state.dequeued.push((direction, index));
                        Ok(index)
                    }
                };
            }
        }
        if !state.streaming[slot(direction)] {
            return Err(errno(libc::EINVAL));
        }
        match state.queues[slot(direction)].pop_front() {
            Some(index) => {
                state.dequeued.push((direction, index));
                Ok(index)
            }
            None => Err(errno(libc::EAGAIN)),
        }
    }

    fn stream_on(&mut self, direction: Direction) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_stream_on == Some(direction) {
            return Err(errno(libc::EINVAL));
        }
        state.streaming[slot(direction)] = true;
        state.stream_ons.push(direction);
        Ok(())
    }

    fn stream_off(&mut self, direction: Direction) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.streaming[slot(direction)] = false;
        state.queues[slot(direction)].clear();
        state.stream_offs.push(direction);
        Ok(())
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.state.borrow();
        if state.read_data.is_empty() {
            return Err(errno(libc::EAGAIN));
        }
        let len = state.read_data.len().min(buf.len());
        buf[..len].copy_from_slice(&state.read_data[..len]);
        Ok(len)
    }

    fn wait_readable(&mut self, _timeout: Option<Duration>) -> io::Result<Readiness> {
        Ok(self
            .state
            .borrow_mut()
            .readiness
            .pop_front()
            .unwrap_or(Readiness::Ready))
    }
}

/// Fills every frame with one byte value, 1 for the first frame, 2 for the
/// second and so on.
#[derive(Debug, Default)]
pub struct CountingSource {
    pub frames: u32,
    pub started: bool,
    pub stopped: bool,
}

impl FrameSource for CountingSource {
    fn start(&mut self) -> edgefirst_m2m::Result<()> {
        self.started = true;
        Ok(())
    }

    fn next_frame(&mut self, frame: &mut Frame) -> edgefirst_m2m::Result<()> {
        self.frames += 1;
        frame.as_mut_slice().fill(self.frames as u8);
        Ok(())
    }

    fn stop(&mut self) -> edgefirst_m2m::Result<()> {
        self.stopped = true;
        Ok(())
    }
}

/// Counts renders and keeps a copy of the last post frame.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    pub renders: Rc<Cell<u64>>,
    pub last_post: Rc<RefCell<Option<Frame>>>,
}

impl RenderSink for RecordingSink {
    fn render(&mut self, pre: &Frame, post: &Frame) -> edgefirst_m2m::Result<()> {
        assert_eq!(pre.format(), PixelFormat::Rgb565x);
        self.renders.set(self.renders.get() + 1);
        *self.last_post.borrow_mut() = Some(post.clone());
        Ok(())
    }
}
