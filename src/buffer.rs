// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Memory mapped buffer pools.
//!
//! A [`BufferPool`] owns every buffer of one queue direction. The driver picks
//! which index comes back on each dequeue; the pool checks that the index is
//! one it handed out and tracks the state of every slot so a misbehaving
//! driver is reported instead of silently corrupting a frame.

use crate::{
    error::{Error, Result},
    v4l2::{Direction, VideoDevice},
};
use std::io;
use tracing::{debug, info};

/// Ownership state of a buffer slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Owned by the application, contents may be rewritten.
    Free,
    /// Handed to the driver.
    Queued,
    /// Returned by the driver, payload not consumed yet.
    Ready,
}

/// Outcome of a dequeue attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dequeue {
    /// The driver returned the buffer with this index.
    Ready(u32),
    /// No buffer is finished yet (`EAGAIN`), try again on the next wake-up.
    NotReady,
    /// The driver reported an I/O error (`EIO`), the frame is lost.
    Dropped,
}

#[derive(Debug)]
pub struct BufferSlot<M> {
    index: u32,
    offset: u32,
    length: usize,
    mapping: Option<M>,
    state: SlotState,
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> BufferSlot<M> {
    fn new(index: u32) -> Self {
        Self {
            index,
            offset: 0,
            length: 0,
            mapping: None,
            state: SlotState::Free,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Mapping offset reported by the driver.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Length in bytes reported by the driver.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Mapped memory of the slot, empty when unmapped.
    pub fn as_slice(&self) -> &[u8] {
        match self.mapping.as_ref() {
            Some(m) => m.as_ref(),
            None => &[],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.mapping.as_mut() {
            Some(m) => m.as_mut(),
            None => &mut [],
        }
    }
}

/// All buffers of one queue direction.
#[derive(Debug)]
pub struct BufferPool<M> {
    direction: Direction,
    slots: Vec<BufferSlot<M>>,
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> BufferPool<M> {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            slots: Vec::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Number of slots granted by the driver.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_mapped(&self) -> bool {
        !self.slots.is_empty() && self.slots.iter().all(BufferSlot::is_mapped)
    }

    pub fn slots(&self) -> impl Iterator<Item = &BufferSlot<M>> {
        self.slots.iter()
    }

    /// Number of slots currently owned by the driver.
    pub fn queued(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Queued)
            .count()
    }

    /// Asks the driver for `count` buffers and sizes the pool to whatever it
    /// grants.
    pub fn request<D>(&mut self, device: &mut D, count: u32) -> Result<u32>
    where
        D: VideoDevice<Mapping = M>,
    {
        let granted = device
            .request_buffers(self.direction, count)
            .map_err(|e| Error::device("VIDIOC_REQBUFS", e))?;
        if granted == 0 {
            return Err(Error::NoBuffers(self.direction));
        }
        if granted < count {
            info!(
                "driver granted {} of {} requested {} buffers",
                granted, count, self.direction
            );
        }
        debug!("Got {} {} buffers", granted, self.direction);

        self.slots = (0..granted).map(BufferSlot::new).collect();
        Ok(granted)
    }

    /// Queries and maps every slot. Any failure is fatal for the pool.
    pub fn map_all<D>(&mut self, device: &mut D) -> Result<()>
    where
        D: VideoDevice<Mapping = M>,
    {
        for slot in self.slots.iter_mut() {
            let info = device
                .query_buffer(self.direction, slot.index)
                .map_err(|e| Error::device("VIDIOC_QUERYBUF", e))?;
            let mapping = device
                .map_buffer(&info)
                .map_err(|e| Error::device("mmap", e))?;
            slot.offset = info.offset;
            slot.length = info.length;
            slot.mapping = Some(mapping);
        }
        Ok(())
    }

    /// Drops every mapping. Safe to call more than once.
    pub fn unmap_all(&mut self) {
        let mut released = 0;
        for slot in self.slots.iter_mut() {
            if slot.mapping.take().is_some() {
                released += 1;
            }
            slot.state = SlotState::Free;
        }
        if released > 0 {
            debug!("unmapped {} {} buffers", released, self.direction);
        }
    }

    pub fn slot(&self, index: u32) -> Result<&BufferSlot<M>> {
        let count = self.slots.len() as u32;
        self.slots
            .get(index as usize)
            .ok_or(Error::IndexOutOfRange {
                direction: self.direction,
                index,
                count,
            })
    }

    pub fn slot_mut(&mut self, index: u32) -> Result<&mut BufferSlot<M>> {
        let count = self.slots.len() as u32;
        let direction = self.direction;
        self.slots
            .get_mut(index as usize)
            .ok_or(Error::IndexOutOfRange {
                direction,
                index,
                count,
            })
    }

    /// Marks a dequeued slot as consumed so it may be queued again.
    pub fn release(&mut self, index: u32) -> Result<()> {
        let slot = self.slot_mut(index)?;
        if slot.state == SlotState::Queued {
            return Err(Error::InvalidState("released a buffer owned by the driver"));
        }
        slot.state = SlotState::Free;
        Ok(())
    }

    fn try_queue<D>(&mut self, device: &mut D, index: u32) -> Result<io::Result<()>>
    where
        D: VideoDevice<Mapping = M>,
    {
        let direction = self.direction;
        let slot = self.slot_mut(index)?;
        if slot.state != SlotState::Free {
            return Err(Error::InvalidState("queued a buffer that is not free"));
        }
        if let Err(e) = device.queue_buffer(direction, index) {
            return Ok(Err(e));
        }
        slot.state = SlotState::Queued;
        Ok(Ok(()))
    }

    /// Hands a free slot to the driver during setup.
    pub fn queue<D>(&mut self, device: &mut D, index: u32) -> Result<()>
    where
        D: VideoDevice<Mapping = M>,
    {
        self.try_queue(device, index)?
            .map_err(|e| Error::device("VIDIOC_QBUF", e))
    }

    /// Hands a consumed slot back to the driver while streaming.
    pub fn requeue<D>(&mut self, device: &mut D, index: u32) -> Result<()>
    where
        D: VideoDevice<Mapping = M>,
    {
        let direction = self.direction;
        self.try_queue(device, index)?
            .map_err(|source| Error::Requeue {
                direction,
                index,
                source,
            })
    }

    /// Takes the next finished buffer from the driver.
    ///
    /// `EAGAIN` and `EIO` are reported as [`Dequeue::NotReady`] and
    /// [`Dequeue::Dropped`]; an index the pool never handed out is a protocol
    /// violation.
    pub fn dequeue<D>(&mut self, device: &mut D) -> Result<Dequeue>
    where
        D: VideoDevice<Mapping = M>,
    {
        let index = match device.dequeue_buffer(self.direction) {
            Ok(index) => index,
            Err(e) if is_not_ready(&e) => {
                debug!("{} dequeue: not ready", self.direction);
                return Ok(Dequeue::NotReady);
            }
            Err(e) if e.raw_os_error() == Some(libc::EIO) => {
                debug!("{} dequeue: I/O error, frame dropped", self.direction);
                return Ok(Dequeue::Dropped);
            }
            Err(source) => {
                return Err(Error::Dequeue {
                    direction: self.direction,
                    source,
                })
            }
        };

        let direction = self.direction;
        let slot = self.slot_mut(index)?;
        if slot.state != SlotState::Queued {
            return Err(Error::UnexpectedState { direction, index });
        }
        slot.state = SlotState::Ready;
        debug!("Dequeued {} buffer, index: {}", direction, index);
        Ok(Dequeue::Ready(index))
    }
}

fn is_not_ready(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EAGAIN) || err.kind() == io::ErrorKind::WouldBlock
}
