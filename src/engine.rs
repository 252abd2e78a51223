// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The mem2mem streaming loop.
//!
//! Frames from a [`FrameSource`] are split into transaction chunks and queued
//! on the OUTPUT side of the device. Every processed buffer dequeued from the
//! CAPTURE side is written back into the matching chunk of the post frame and
//! both frames are handed to a [`RenderSink`].
//!
//! ```text
//! Idle -> BuffersRequested -> BuffersMapped -> Streaming -> Draining -> Stopped
//! ```
//!
//! Setup failures before `Streaming` are fatal. Once streaming, an `EAGAIN`
//! or `EIO` on either queue skips the iteration and the loop continues.

use crate::{
    buffer::{BufferPool, Dequeue},
    codec::{swap_green_buffer, Frame, PixelFormat, RGB565X},
    error::{Error, Result},
    render::RenderSink,
    source::FrameSource,
    transaction::Transaction,
    v4l2::{
        Direction, PixFormat, Readiness, VideoDevice, V4L2_CAP_VIDEO_CAPTURE, V4L2_CID_HFLIP,
        V4L2_CID_TRANS_NUM_BUFS, V4L2_CID_TRANS_TIME_MSEC, V4L2_CID_VFLIP, V4L2_FIELD_ANY,
    },
};
use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

/// Parameters of one streaming session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    /// Buffers per transaction.
    pub translen: u32,
    /// Simulated processing time per transaction in milliseconds.
    pub transtime_ms: u32,
    /// Loop iterations before the session ends.
    pub num_frames: u32,
    /// Buffers requested per queue.
    pub num_buffers: u32,
    pub hflip: bool,
    pub vflip: bool,
    /// Longest wait for the device between iterations, `None` waits forever.
    pub wait_timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 240,
            translen: 1,
            transtime_ms: 1,
            num_frames: 1000,
            num_buffers: 4,
            hflip: false,
            vflip: false,
            wait_timeout: None,
        }
    }
}

impl StreamConfig {
    /// Bytes of one RGB565X frame.
    pub fn frame_bytes(&self) -> usize {
        PixelFormat::Rgb565x.frame_size(self.width, self.height)
    }

    /// Checks the configuration and returns the transaction layout it implies.
    pub fn validate(&self) -> Result<Transaction> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "invalid frame size {}x{}",
                self.width, self.height
            )));
        }
        if self.num_buffers == 0 {
            return Err(Error::Config("at least one buffer per queue is required".into()));
        }
        if i32::try_from(self.translen).is_err() || i32::try_from(self.transtime_ms).is_err() {
            return Err(Error::Config("transaction parameters out of range".into()));
        }
        Transaction::new(self.frame_bytes(), self.translen)
    }
}

/// Lifecycle of a [`StreamingSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Device opened, nothing negotiated.
    Idle,
    /// Controls and formats applied, buffers may be requested.
    BuffersRequested,
    /// Both pools granted and mapped.
    BuffersMapped,
    Streaming,
    /// Last iteration running or teardown in progress.
    Draining,
    Stopped,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of one loop iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The queue had no finished buffer, nothing was consumed.
    NotReady(Direction),
    /// The driver reported an I/O error on the queue, nothing was consumed.
    Dropped(Direction),
    /// A capture buffer was reassembled and rendered.
    Completed {
        output: u32,
        capture: u32,
        /// Chunk of the frame the capture buffer carried.
        chunk: u32,
        /// The chunk closed a transaction and a new source frame was pulled.
        frame_completed: bool,
    },
}

/// Counters reported at the end of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub iterations: u64,
    pub completed: u64,
    /// Transactions completed.
    pub frames: u64,
    pub not_ready: u64,
    pub dropped: u64,
}

impl fmt::Display for StreamStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} iterations, {} buffers, {} frames, {} not ready, {} dropped",
            self.iterations, self.completed, self.frames, self.not_ready, self.dropped
        )
    }
}

/// Device, buffer pools and transaction progress of one session.
///
/// Everything the loop mutates lives here; there is no global state.
pub struct StreamingSession<D: VideoDevice> {
    device: D,
    output: BufferPool<D::Mapping>,
    capture: BufferPool<D::Mapping>,
    transaction: Transaction,
    state: StreamState,
    /// Queues turned on with STREAMON, indexed by `Direction::index`.
    streaming: [bool; 2],
}

impl<D: VideoDevice> StreamingSession<D> {
    fn new(device: D, transaction: Transaction) -> Self {
        Self {
            device,
            output: BufferPool::new(Direction::Output),
            capture: BufferPool::new(Direction::Capture),
            transaction,
            state: StreamState::Idle,
            streaming: [false; 2],
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn output_pool(&self) -> &BufferPool<D::Mapping> {
        &self.output
    }

    pub fn capture_pool(&self) -> &BufferPool<D::Mapping> {
        &self.capture
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether STREAMON succeeded on `direction` and it has not been
    /// stopped since.
    pub fn is_streaming(&self, direction: Direction) -> bool {
        self.streaming[direction.index()]
    }

    fn pool_mut(&mut self, direction: Direction) -> (&mut BufferPool<D::Mapping>, &mut D) {
        match direction {
            Direction::Output => (&mut self.output, &mut self.device),
            Direction::Capture => (&mut self.capture, &mut self.device),
        }
    }
}

/// Writes `src` into an OUTPUT slot in the device's green layout.
fn fill_output<M>(pool: &mut BufferPool<M>, index: u32, src: &[u8]) -> Result<()>
where
    M: AsRef<[u8]> + AsMut<[u8]>,
{
    let direction = pool.direction();
    let slot = pool.slot_mut(index)?;
    let length = slot.length();
    let Some(dst) = slot.as_mut_slice().get_mut(..src.len()) else {
        return Err(Error::BufferTooSmall {
            direction,
            index,
            length,
            needed: src.len(),
        });
    };
    swap_green_buffer(dst, src);
    Ok(())
}

/// Drives a mem2mem device through a full streaming session.
pub struct StreamingEngine<D: VideoDevice, S, R> {
    session: StreamingSession<D>,
    config: StreamConfig,
    source: S,
    sink: R,
    pre: Frame,
    post: Frame,
    stats: StreamStats,
}

impl<D, S, R> StreamingEngine<D, S, R>
where
    D: VideoDevice,
    S: FrameSource,
    R: RenderSink,
{
    pub fn new(device: D, config: StreamConfig, source: S, sink: R) -> Result<Self> {
        let transaction = config.validate()?;
        let pre = Frame::new(config.width, config.height, PixelFormat::Rgb565x);
        let post = Frame::new(config.width, config.height, PixelFormat::Rgb565x);

        Ok(Self {
            session: StreamingSession::new(device, transaction),
            config,
            source,
            sink,
            pre,
            post,
            stats: StreamStats::default(),
        })
    }

    pub fn session(&self) -> &StreamingSession<D> {
        &self.session
    }

    pub fn state(&self) -> StreamState {
        self.session.state
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &R {
        &self.sink
    }

    /// Source frame the OUTPUT chunks are cut from.
    pub fn pre_frame(&self) -> &Frame {
        &self.pre
    }

    /// Frame reassembled from CAPTURE buffers.
    pub fn post_frame(&self) -> &Frame {
        &self.post
    }

    fn expect_state(&self, expected: StreamState, op: &'static str) -> Result<()> {
        if self.session.state != expected {
            warn!("{} called in state {}", op, self.session.state);
            return Err(Error::InvalidState(op));
        }
        Ok(())
    }

    /// Applies controls and formats. `Idle -> BuffersRequested`.
    pub fn configure(&mut self) -> Result<()> {
        self.expect_state(StreamState::Idle, "configure")?;
        let config = &self.config;
        let device = &mut self.session.device;

        let caps = device
            .capabilities()
            .map_err(|e| Error::device("VIDIOC_QUERYCAP", e))?;
        if !caps.is_mem2mem() {
            let feature = if caps.has(V4L2_CAP_VIDEO_CAPTURE) {
                "video output"
            } else {
                "video capture"
            };
            return Err(Error::Unsupported {
                device: caps.card,
                feature,
            });
        }
        debug!(
            "{} ({}) caps 0x{:08x}",
            caps.card,
            caps.driver,
            caps.effective()
        );

        if config.hflip {
            if let Err(e) = device.set_control(V4L2_CID_HFLIP, 1) {
                warn!("Setting HFLIP failed: {}", e);
            }
        }
        if config.vflip {
            if let Err(e) = device.set_control(V4L2_CID_VFLIP, 1) {
                warn!("Setting VFLIP failed: {}", e);
            }
        }
        device
            .set_control(V4L2_CID_TRANS_TIME_MSEC, config.transtime_ms as i32)
            .map_err(|e| Error::device("VIDIOC_S_CTRL", e))?;
        device
            .set_control(V4L2_CID_TRANS_NUM_BUFS, config.translen as i32)
            .map_err(|e| Error::device("VIDIOC_S_CTRL", e))?;

        for direction in [Direction::Capture, Direction::Output] {
            let requested = PixFormat::new(config.width, config.height, RGB565X, V4L2_FIELD_ANY);
            let format = device
                .set_format(direction, &requested)
                .map_err(|e| Error::device("VIDIOC_S_FMT", e))?;
            if format.width != config.width || format.height != config.height {
                warn!(
                    "User requested {}x{} but {} queue set {}x{}",
                    config.width, config.height, direction, format.width, format.height
                );
            }
            if format.fourcc != RGB565X {
                warn!("{} queue reports format {}", direction, format.fourcc);
            }
        }

        self.session.state = StreamState::BuffersRequested;
        Ok(())
    }

    /// Requests and maps both pools. `BuffersRequested -> BuffersMapped`.
    pub fn allocate(&mut self) -> Result<()> {
        self.expect_state(StreamState::BuffersRequested, "allocate")?;
        let count = self.config.num_buffers;
        let chunk_size = self.session.transaction.chunk_size();

        for direction in [Direction::Output, Direction::Capture] {
            let (pool, device) = self.session.pool_mut(direction);
            pool.request(device, count)?;
            pool.map_all(device)?;
            if let Some(slot) = pool.slots().find(|s| s.as_slice().len() < chunk_size) {
                return Err(Error::BufferTooSmall {
                    direction,
                    index: slot.index(),
                    length: slot.length(),
                    needed: chunk_size,
                });
            }
        }

        self.session.state = StreamState::BuffersMapped;
        Ok(())
    }

    /// Prefills and queues every buffer, then starts both queues.
    /// `BuffersMapped -> Streaming`.
    pub fn start(&mut self) -> Result<()> {
        self.expect_state(StreamState::BuffersMapped, "start")?;
        self.source.start()?;
        self.source.next_frame(&mut self.pre)?;

        let session = &mut self.session;
        for index in 0..session.output.len() as u32 {
            let range = session.transaction.chunk_range(index);
            fill_output(&mut session.output, index, &self.pre.as_slice()[range])?;
            session.output.queue(&mut session.device, index)?;
        }
        for index in 0..session.capture.len() as u32 {
            session.capture.queue(&mut session.device, index)?;
        }

        for direction in [Direction::Output, Direction::Capture] {
            session
                .device
                .stream_on(direction)
                .map_err(|e| Error::device("VIDIOC_STREAMON", e))?;
            session.streaming[direction.index()] = true;
        }
        session.state = StreamState::Streaming;
        info!(
            "streaming {}x{} with {} output and {} capture buffers, {} per transaction",
            self.config.width,
            self.config.height,
            session.output.len(),
            session.capture.len(),
            session.transaction.translen()
        );
        Ok(())
    }

    /// Runs every setup step still outstanding.
    pub fn prepare(&mut self) -> Result<()> {
        if self.session.state == StreamState::Idle {
            self.configure()?;
        }
        if self.session.state == StreamState::BuffersRequested {
            self.allocate()?;
        }
        if self.session.state == StreamState::BuffersMapped {
            self.start()?;
        }
        Ok(())
    }

    /// One pass of the streaming loop.
    ///
    /// With `last` set no buffer is handed back to the driver and the
    /// session moves to `Draining`.
    #[instrument(skip(self))]
    pub fn step(&mut self, last: bool) -> Result<StepOutcome> {
        match self.session.state {
            StreamState::Streaming | StreamState::Draining => {}
            state => {
                warn!("step called in state {}", state);
                return Err(Error::InvalidState("step"));
            }
        }
        if last {
            self.session.state = StreamState::Draining;
        }
        self.stats.iterations += 1;
        let session = &mut self.session;

        let output = match session.output.dequeue(&mut session.device)? {
            Dequeue::Ready(index) => index,
            Dequeue::NotReady => {
                self.stats.not_ready += 1;
                return Ok(StepOutcome::NotReady(Direction::Output));
            }
            Dequeue::Dropped => {
                self.stats.dropped += 1;
                return Ok(StepOutcome::Dropped(Direction::Output));
            }
        };
        session.output.release(output)?;
        if !last {
            let range = session.transaction.chunk_range(session.transaction.cursor());
            fill_output(&mut session.output, output, &self.pre.as_slice()[range])?;
            session.output.requeue(&mut session.device, output)?;
        }

        let capture = match session.capture.dequeue(&mut session.device)? {
            Dequeue::Ready(index) => index,
            Dequeue::NotReady => {
                self.stats.not_ready += 1;
                return Ok(StepOutcome::NotReady(Direction::Capture));
            }
            Dequeue::Dropped => {
                self.stats.dropped += 1;
                return Ok(StepOutcome::Dropped(Direction::Capture));
            }
        };

        let chunk = session.transaction.cursor();
        debug!("Current buffer in the transaction: {}", chunk);
        let range = session.transaction.chunk_range(chunk);
        let frame_completed = session.transaction.advance();
        if frame_completed {
            self.stats.frames += 1;
            self.source.next_frame(&mut self.pre)?;
        }

        let slot = session.capture.slot(capture)?;
        let Some(src) = slot.as_slice().get(..range.len()) else {
            return Err(Error::BufferTooSmall {
                direction: Direction::Capture,
                index: capture,
                length: slot.length(),
                needed: range.len(),
            });
        };
        swap_green_buffer(&mut self.post.as_mut_slice()[range], src);
        session.capture.release(capture)?;

        self.sink.render(&self.pre, &self.post)?;
        if let Some(client) = tracy_client::Client::running() {
            client.frame_mark();
        }

        if !last {
            session.capture.requeue(&mut session.device, capture)?;
        }
        self.stats.completed += 1;

        Ok(StepOutcome::Completed {
            output,
            capture,
            chunk,
            frame_completed,
        })
    }

    /// Stops both queues and releases every buffer. Safe to call in any
    /// state and more than once.
    pub fn stop(&mut self) -> Result<()> {
        let state = self.session.state;
        if state == StreamState::Stopped {
            return Ok(());
        }
        let mut result = Ok(());

        if matches!(state, StreamState::Streaming | StreamState::Draining) {
            self.session.state = StreamState::Draining;
        }
        // A failed start can leave only OUTPUT streaming.
        for direction in [Direction::Output, Direction::Capture] {
            if !self.session.is_streaming(direction) {
                continue;
            }
            self.session.streaming[direction.index()] = false;
            if let Err(e) = self.session.device.stream_off(direction) {
                warn!("{} STREAMOFF failed: {}", direction, e);
                if result.is_ok() {
                    result = Err(Error::device("VIDIOC_STREAMOFF", e));
                }
            }
        }
        self.session.output.unmap_all();
        self.session.capture.unmap_all();
        if let Err(e) = self.source.stop() {
            warn!("stopping source failed: {}", e);
            if result.is_ok() {
                result = Err(e);
            }
        }

        self.session.state = StreamState::Stopped;
        debug!("session stopped: {}", self.stats);
        result
    }

    fn stream(&mut self, stop: &AtomicBool) -> Result<()> {
        self.prepare()?;

        let mut frames_left = self.config.num_frames;
        while frames_left > 0 {
            let stopping = stop.load(Ordering::Relaxed);
            if stopping {
                info!("stop requested, finishing the current iteration");
            }
            let last = stopping || frames_left == 1;

            let readiness = self
                .session
                .device
                .wait_readable(self.config.wait_timeout)
                .map_err(|e| Error::device("select", e))?;
            match readiness {
                Readiness::Ready => {}
                Readiness::Interrupted => continue,
                Readiness::TimedOut => {
                    return Err(Error::Timeout {
                        device: "mem2mem device".into(),
                        timeout: self.config.wait_timeout.unwrap_or_default(),
                    })
                }
            }

            self.step(last)?;
            frames_left -= 1;
            debug!("FRAMES LEFT: {}", frames_left);
            if stopping {
                break;
            }
        }
        Ok(())
    }

    /// Runs the whole session: setup, `num_frames` iterations and teardown.
    ///
    /// Setting `stop` ends the run after one final iteration. Teardown runs
    /// whether or not the loop failed.
    pub fn run(mut self, stop: &AtomicBool) -> Result<StreamStats> {
        let result = self.stream(stop);
        let teardown = self.stop();
        result?;
        teardown?;
        info!("{}", self.stats);
        Ok(self.stats)
    }
}
