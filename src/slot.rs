/*!
    transaction slots and the allocation of their indices.

    Every frame in flight on a link is identified by a small index written in its first datagram. The same index addresses the slot receiving the answer on each port of the link, so on a redundant link index `i` always designates the same transaction on both ports.
*/

use crate::{
    frame::{FrameBuffer, Route},
    error::{EthercatError, EthercatResult},
    };


/// number of transaction slots of a link
pub const SLOTS: usize = 16;

/// state of a transaction slot
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SlotState {
    /// free for allocation
    Empty,
    /// reserved by a caller, frame being prepared
    Allocated,
    /// frame sent, waiting for its answer
    PendingTx,
    /// answer received while polling for an other transaction, not yet picked up
    Received,
    /// answer picked up
    Complete,
}
impl SlotState {
    /// a busy slot cannot be handed out by the allocator
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Allocated | Self::PendingTx | Self::Received)
    }
}

/**
    index of a transaction slot

    Indices can only be obtained from a link's allocator, so a caller cannot make up an index already owned by an other transaction.
*/
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Index(u8);
impl Index {
    pub(crate) fn new(value: usize) -> Self {
        debug_assert!(value < SLOTS);
        Self(value as u8)
    }
    /// value written in frames for this transaction
    pub fn value(self) -> u8  {self.0}
    pub(crate) fn slot(self) -> usize  {usize::from(self.0)}
}

/// receive side of a transaction slot, one per port
#[derive(Debug)]
pub struct Slot {
    pub state: SlotState,
    /// received ethercat frame, without its ethernet header
    pub data: FrameBuffer,
    /// route of the received frame
    pub route: Route,
}
impl Default for Slot {
    fn default() -> Self {
        Self {
            state: SlotState::Empty,
            data: FrameBuffer::new(),
            route: Route::Missing,
        }
    }
}

/**
    ring of busy flags with one rotating cursor

    The search starts just after the last index handed out and probes linearly, wrapping around the end of the ring.
*/
#[derive(Debug)]
pub struct Ring<const N: usize> {
    last: usize,
}
impl<const N: usize> Ring<N> {
    pub const fn new() -> Self {
        // first allocation gives index 1
        Self {last: 0}
    }
    /// find a free position, `busy` tells if a position is taken. On success the cursor moves to the position found
    pub fn find_free(&mut self, mut busy: impl FnMut(usize) -> bool) -> EthercatResult<usize> {
        let found = (1 ..= N)
            .map(|offset| (self.last + offset) % N)
            .find(|&position| ! busy(position))
            .ok_or(EthercatError::Master("no free transaction slot"))?;
        self.last = found;
        Ok(found)
    }
    /// position of the last successful allocation
    #[cfg(test)]
    pub fn last(&self) -> usize  {self.last}
}
impl<const N: usize> Default for Ring<N> {
    fn default() -> Self  {Self::new()}
}
