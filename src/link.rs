/*!
	low level ethercat frame transactions on one or two network ports.

	A [Link] owns the sockets of its ports and a fixed pool of transaction slots. Callers reserve a slot index, write their frame in it, exchange it with the segment (see [Link::confirm]), read the answer back, and release the slot.

	Many tasks can exchange frames concurrently through the same link: answers may come back in any order, each read from a socket is dispatched to the slot whose index is written in the frame.
*/

use std::sync::{Mutex, MutexGuard};
use core::time::Duration;

use crate::{
    socket::EthercatSocket,
    frame::{self, FrameBuffer, PduCommand, Route, SourceTag, ETHERNET_HEADER, MAX_FRAME},
    slot::{Index, Ring, Slot, SlotState, SLOTS},
    error::{EthercatError, EthercatResult},
    };


/// tunable delays of a link
#[derive(Copy, Clone, Debug)]
pub struct LinkConfig {
    /// maximum time waiting for the answer to one sending of a frame
    pub return_timeout: Duration,
    /// maximum time waiting for the answer to the frame resent on the secondary port when the ring is broken
    pub repair_timeout: Duration,
    /// sleep duration between two polls of the sockets
    pub poll_interval: Duration,
}
impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            return_timeout: Duration::from_micros(2000),
            repair_timeout: Duration::from_micros(1000),
            poll_interval: Duration::from_micros(100),
        }
    }
}

/// whether a link uses a second port to survive a cable break
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Redundancy {
    /// one port, one cable towards the segment
    Single,
    /// two ports wired to both ends of the segment, forming a ring
    Redundant,
}

/// selects one of the ports of a link
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Side {
    Primary,
    Secondary,
}
impl Side {
    /// source tag of frames sent from this side
    pub fn tag(self) -> SourceTag {
        match self {
            Self::Primary => SourceTag::Primary,
            Self::Secondary => SourceTag::Secondary,
        }
    }
}

/// one network port with its receive slots
pub(crate) struct Port {
    tag: SourceTag,
    socket: Box<dyn EthercatSocket + Send + Sync>,
    slots: Box<[Mutex<Slot>]>,
    // receive lock, it also holds the buffer of the frame being read
    receive: Mutex<Box<[u8; MAX_FRAME]>>,
}
impl Port {
    fn new(tag: SourceTag, socket: Box<dyn EthercatSocket + Send + Sync>) -> Self {
        Self {
            tag,
            socket,
            slots: (0 .. SLOTS).map(|_| Mutex::new(Slot::default())).collect(),
            receive: Mutex::new(Box::new([0; MAX_FRAME])),
        }
    }
    pub(crate) fn slot(&self, index: Index) -> MutexGuard<'_, Slot> {
        lock(&self.slots[index.slot()])
    }
}

/**
    ethercat frame transactions over one port, or two redundant ports.

    This struct knows nothing about the devices on the segment, it only exchanges frames prepared by the caller and reports the working counter of the answers.

    State is locked using [std::sync::Mutex] with narrow critical sections, none of them is held during a wait:

    - the allocation lock guards the choice of a free index
    - the transmit lock serializes the sending of the secondary pass-through frames
    - each port's receive lock serializes the socket reads and the dispatch of what is read
    - every slot has its own lock

    In redundant mode, slots of both ports are kept in the same state for a given index, except during the reconciliation of the answers.
*/
pub struct Link {
    pub(crate) config: LinkConfig,
    pub(crate) primary: Port,
    pub(crate) secondary: Option<Port>,
    // allocation lock
    allocator: Mutex<Ring<SLOTS>>,
    // frames to send, shared by both ports
    outgoing: Box<[Mutex<FrameBuffer>]>,
    // transmit lock, holding the frame sent on the secondary port alongside any primary frame
    passthrough: Mutex<FrameBuffer>,
}

impl Link {
    /// link with only one port
    pub fn new<S: EthercatSocket + 'static + Send + Sync>(socket: S, config: LinkConfig) -> Self {
        Self::build(Box::new(socket), None, config)
    }
    /// link with two ports wired in a ring
    pub fn redundant<P, S>(primary: P, secondary: S, config: LinkConfig) -> Self
    where
        P: EthercatSocket + 'static + Send + Sync,
        S: EthercatSocket + 'static + Send + Sync,
    {
        Self::build(Box::new(primary), Some(Box::new(secondary)), config)
    }
    /// open raw ethernet sockets on the given interfaces, the link is redundant if a secondary interface is given
    #[cfg(target_os = "linux")]
    pub fn open(interface: &str, secondary: Option<&str>, config: LinkConfig) -> EthercatResult<Self> {
        use crate::socket::EthernetSocket;

        let primary = Box::new(EthernetSocket::new(interface)?);
        let secondary = match secondary {
            Some(interface) => Some(Box::new(EthernetSocket::new(interface)?) as Box<dyn EthercatSocket + Send + Sync>),
            None => None,
        };
        Ok(Self::build(primary, secondary, config))
    }
    fn build(
            primary: Box<dyn EthercatSocket + Send + Sync>,
            secondary: Option<Box<dyn EthercatSocket + Send + Sync>>,
            config: LinkConfig,
            ) -> Self {
        let empty = || {
            let mut frame = FrameBuffer::new();
            // ethernet header is fixed, so it is set once for all
            frame::setup_datagram(&mut frame, PduCommand::NOP, 0, 0, 0, &[])
                .map(|_| frame)
                .unwrap_or_default()
        };
        Self {
            config,
            primary: Port::new(SourceTag::Primary, primary),
            secondary: secondary.map(|socket| Port::new(SourceTag::Secondary, socket)),
            allocator: Mutex::new(Ring::new()),
            outgoing: (0 .. SLOTS).map(|_| Mutex::new(empty())).collect(),
            passthrough: Mutex::new(FrameBuffer::new()),
        }
    }

    pub fn config(&self) -> &LinkConfig  {&self.config}

    pub fn redundancy(&self) -> Redundancy {
        match self.secondary {
            Some(_) => Redundancy::Redundant,
            None => Redundancy::Single,
        }
    }

    pub(crate) fn port(&self, side: Side) -> EthercatResult<&Port> {
        match side {
            Side::Primary => Ok(&self.primary),
            Side::Secondary => self.secondary.as_ref()
                .ok_or(EthercatError::Master("link has no secondary port")),
        }
    }

    /**
        reserve a free transaction index

        The search starts after the last index reserved. Fails if every slot is busy, in which case the caller shall retry once other transactions are released.
    */
    pub fn acquire(&self) -> EthercatResult<Index> {
        let mut allocator = lock(&self.allocator);
        let found = allocator.find_free(|slot| lock(&self.primary.slots[slot]).state.is_busy())?;
        let index = Index::new(found);
        self.set_state(index, SlotState::Allocated);
        Ok(index)
    }

    /// set the state of a slot, on both ports in redundant mode
    pub fn set_state(&self, index: Index, state: SlotState) {
        self.primary.slot(index).state = state;
        if let Some(secondary) = &self.secondary {
            secondary.slot(index).state = state;
        }
    }

    /// give back a slot to the allocator
    pub fn release(&self, index: Index) {
        self.set_state(index, SlotState::Empty)
    }

    /// current state of a slot on the given port
    pub fn state(&self, index: Index, side: Side) -> EthercatResult<SlotState> {
        Ok(self.port(side)?.slot(index).state)
    }

    /// route of the last frame received for this slot on the given port
    pub fn route(&self, index: Index, side: Side) -> EthercatResult<Route> {
        Ok(self.port(side)?.slot(index).route)
    }

    /**
        set the ethercat frame to send for this slot, starting from its ethercat header.

        The caller is responsible for writing the slot index in the frame's first datagram, [Self::setup_datagram] does it.
    */
    pub fn write(&self, index: Index, ethercat: &[u8]) -> EthercatResult {
        self.check_size(ETHERNET_HEADER + ethercat.len())?;
        let mut frame = lock(&self.outgoing[index.slot()]);
        frame.truncate(ETHERNET_HEADER);
        frame.extend_from_slice(ethercat)
            .map_err(|_| EthercatError::Protocol("frame too big for a slot"))
    }

    /**
        prepare the frame of this slot with a single datagram

        Returns the offset of the datagram data in the received frame, see [Self::read_datagram]
    */
    pub fn setup_datagram(
            &self,
            index: Index,
            command: PduCommand,
            slave_address: u16,
            memory_address: u16,
            data: &[u8],
            ) -> EthercatResult<usize> {
        let mut frame = lock(&self.outgoing[index.slot()]);
        let offset = frame::setup_datagram(&mut frame, command, index.value(), slave_address, memory_address, data)?;
        self.check_size(frame.len())?;
        Ok(offset)
    }

    /**
        add a datagram to the frame of this slot, prepared with [Self::setup_datagram]

        Returns the offset of the datagram data in the received frame, see [Self::read_datagram]
    */
    pub fn add_datagram(
            &self,
            index: Index,
            command: PduCommand,
            slave_address: u16,
            memory_address: u16,
            data: &[u8],
            ) -> EthercatResult<usize> {
        let mut frame = lock(&self.outgoing[index.slot()]);
        let mut extended = frame.clone();
        let offset = frame::add_datagram(&mut extended, command, index.value(), slave_address, memory_address, data)?;
        self.check_size(extended.len())?;
        *frame = extended;
        Ok(offset)
    }

    /// ethercat frame received for this slot, without its ethernet header
    pub fn read(&self, index: Index) -> FrameBuffer {
        self.primary.slot(index).data.clone()
    }

    /// copy datagram data returned in this slot's frame, at an offset given when preparing the frame
    pub fn read_datagram(&self, index: Index, offset: usize, data: &mut [u8]) -> EthercatResult {
        frame::read_datagram(&self.primary.slot(index).data, offset, data)
    }

    fn check_size(&self, size: usize) -> EthercatResult {
        let max = self.secondary.iter()
            .map(|port| port.socket.max_frame())
            .fold(self.primary.socket.max_frame(), usize::min);
        if size > max
            {return Err(EthercatError::Protocol("frame too big for the link sockets"))}
        Ok(())
    }

    /**
        send the frame of this slot on one port

        The slot is marked as waiting for its answer. On failure the slot goes back to empty and the error is returned, this function never retries.
    */
    pub fn transmit(&self, index: Index, side: Side) -> EthercatResult<usize> {
        let port = self.port(side)?;
        port.slot(index).state = SlotState::PendingTx;
        let sent = {
            let mut frame = lock(&self.outgoing[index.slot()]);
            frame::stamp(&mut frame, port.tag);
            port.socket.send(&frame)
        };
        sent.map_err(|error| {
            log::warn!("cannot send frame {} on {:?} port: {}", index.value(), side, error);
            port.slot(index).state = SlotState::Empty;
            EthercatError::from(error)
        })
    }

    /**
        send the frame of this slot on the primary port, and in redundant mode a pass-through frame with the same index on the secondary port.

        The pass-through frame goes around the ring the other way. Depending on how both frames come back, the answers are reconciled by [Self::wait]
    */
    pub fn transmit_redundant(&self, index: Index) -> EthercatResult<usize> {
        let sent = self.transmit(index, Side::Primary);
        if let Some(secondary) = &self.secondary {
            let mut passthrough = lock(&self.passthrough);
            if passthrough.is_empty() {
                *passthrough = frame::passthrough(index.value())?;
            }
            passthrough[ETHERNET_HEADER + frame::ETHERCAT_HEADER + 1] = index.value();
            secondary.slot(index).state = SlotState::PendingTx;
            if let Err(error) = secondary.socket.send(&passthrough) {
                log::warn!("cannot send pass-through frame {} on secondary port: {}", index.value(), error);
                secondary.slot(index).state = SlotState::Empty;
            }
        }
        sent
    }

    /**
        non-blocking reception of the answer to a slot on one port

        If an answer for this slot was already dispatched by an other poll, it is picked up. Otherwise exactly one frame is read from the socket, if any is pending:

        - if it answers this slot, it is stored and its working counter is returned
        - if it answers an other slot waiting for it, it is stored there for later pickup
        - anything else is dropped

        Returns `None` until the answer is there.
    */
    pub fn receive(&self, index: Index, side: Side) -> EthercatResult<Option<u16>> {
        let port = self.port(side)?;
        {
            let mut slot = port.slot(index);
            if slot.state == SlotState::Received {
                slot.state = SlotState::Complete;
                return Ok(frame::working_count(&slot.data));
            }
        }

        let mut buffer = lock(&port.receive);
        let size = match port.socket.receive(&mut buffer[..]) {
            Ok(size) => size,
            Err(error) => {
                log::debug!("cannot receive on {:?} port: {}", side, error);
                0
            },
        };
        if size == 0
            {return Ok(None)}
        let Some((ethernet, ethercat)) = frame::ethercat_payload(&buffer[.. size])
            else {
                log::trace!("dropping non-ethercat frame on {:?} port", side);
                return Ok(None)
            };
        let (Some(found), Some(wkc), Some(len)) = (
                frame::frame_index(ethercat),
                frame::working_count(ethercat),
                frame::declared_len(ethercat),
                )
            else {
                log::trace!("dropping malformed frame on {:?} port", side);
                return Ok(None)
            };
        let content = &ethercat[.. frame::ETHERCAT_HEADER + len];
        let route = Route::from_word(ethernet.source_word());

        if found == index.value() {
            let mut slot = port.slot(index);
            store(&mut slot, content, route);
            slot.state = SlotState::Complete;
            Ok(Some(wkc))
        }
        else if usize::from(found) < SLOTS {
            let other = Index::new(usize::from(found));
            let mut slot = port.slot(other);
            if slot.state == SlotState::PendingTx {
                log::trace!("stashing frame {} received on {:?} port", found, side);
                store(&mut slot, content, route);
                slot.state = SlotState::Received;
            }
            else {
                log::trace!("dropping frame {} nobody waits for on {:?} port", found, side);
            }
            Ok(None)
        }
        else {
            log::trace!("dropping frame with unknown index {} on {:?} port", found, side);
            Ok(None)
        }
    }

    /// mark the slot allocated again on the ports where a failed sending emptied it, the transaction still owns its index
    pub(crate) fn reclaim(&self, index: Index) {
        for port in core::iter::once(&self.primary).chain(self.secondary.as_ref()) {
            let mut slot = port.slot(index);
            if slot.state == SlotState::Empty {
                slot.state = SlotState::Allocated;
            }
        }
    }

    /// copy the frame received by the secondary port to the primary slot
    pub(crate) fn adopt_secondary(&self, index: Index) {
        if let Some(secondary) = &self.secondary {
            let data = secondary.slot(index).data.clone();
            self.primary.slot(index).data = data;
        }
    }

    /// replace the frame to send by the frame received on the primary port, keeping the ethernet header
    pub(crate) fn forward_primary(&self, index: Index) -> EthercatResult {
        let data = self.primary.slot(index).data.clone();
        let mut frame = lock(&self.outgoing[index.slot()]);
        frame.truncate(ETHERNET_HEADER);
        frame.extend_from_slice(&data)
            .map_err(|_| EthercatError::Protocol("frame too big for a slot"))
    }
}

fn store(slot: &mut Slot, content: &[u8], route: Route) {
    slot.data.clear();
    // content comes from a buffer of the same capacity
    let _ = slot.data.extend_from_slice(content);
    slot.route = route;
}

/// lock a mutex, ignoring poisoning since the protected data stays consistent between statements
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
