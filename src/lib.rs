/*!
    Raw ethercat frame transactions over one ethernet port, or two ports wired in a redundant ring.

    This crate is the low level input/output of an ethercat master: it sends frames prepared by upper layers and matches the answers coming back from the segment, many transactions being in flight at the same time over the same sockets.

    - [Link] owns the sockets and the transaction slots
    - [frame] defines the wire format and helpers to build datagrams
    - [socket] defines the socket abstraction a link uses
*/

mod data;
mod error;
mod timer;
mod slot;
mod link;
mod exchange;
pub mod frame;
pub mod socket;

pub use crate::data::{PduData, PackingError, PackingResult, Cursor, Storage};
pub use crate::error::{EthercatError, EthercatResult};
pub use crate::timer::Deadline;
pub use crate::slot::{Index, SlotState, SLOTS};
pub use crate::link::{Link, LinkConfig, Redundancy, Side};
pub use crate::frame::{PduCommand, SourceTag, Route};
pub use crate::socket::*;
