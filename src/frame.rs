/*!
	wire format of the ethercat frames exchanged on a link.

	An ethercat frame on ethernet is made of

	- an ethernet header: broadcast destination, a source address tagging the port the frame was sent from, and the ethercat ethertype
	- an ethercat header: declared length of the rest of the frame (11 bits) and a frame type
	- any number of datagrams, each with a [PduHeader], its data, and a working counter trailer

	The declared length excludes the ethercat header itself, so the working counter of the last datagram always sits at offset `declared length` from the start of the ethercat header. This is the working counter reported by exchanges.
*/

use bilge::prelude::*;
use packed_struct::prelude::{PackedStruct, PackedStructSlice};

use crate::{
    data::{PduData, PackingError, PackingResult, Cursor},
    error::{EthercatError, EthercatResult},
    };


/// ethertype reserved for ethercat
pub const ETHERCAT_TYPE: u16 = 0x88a4;
/// maximum size of an ethernet frame handled by the links, this is the size of each slot buffer
pub const MAX_FRAME: usize = 1518;
/// minimum size of an ethernet frame (without checksum), shorter frames are padded with zeros
pub const MIN_FRAME: usize = 60;
/// size of the ethernet header prepending every ethercat frame
pub const ETHERNET_HEADER: usize = 14;
/// size of the ethercat header
pub const ETHERCAT_HEADER: usize = 2;
/// size of a datagram header
pub const PDU_HEADER: usize = 10;
/// size of the working counter trailing each datagram
pub const PDU_FOOTER: usize = 2;
/// the declared length is coded on 11 bits
const LEN_MASK: u16 = 0x07ff;

/// buffer holding one ethernet frame
pub type FrameBuffer = heapless::Vec<u8, MAX_FRAME>;


/**
    source address tags used to know which way a frame travelled around the ring

    Ethercat devices do not care about mac addresses, so the master uses the source address to mark which of its ports a frame left from. Frames coming back keep that mark, which tells whether they went through the whole ring or bounced back at a cable break.
*/
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SourceTag {
    Primary,
    Secondary,
}
impl SourceTag {
    /// full source mac address for this tag
    pub const fn address(self) -> [u8; 6] {
        match self {
            Self::Primary => [0x01; 6],
            Self::Secondary => [0x04; 6],
        }
    }
    /// the second 16-bit word of the source address is enough to identify the tag
    pub const fn word(self) -> u16 {
        match self {
            Self::Primary => 0x0101,
            Self::Secondary => 0x0404,
        }
    }
    pub fn from_word(word: u16) -> Option<Self> {
        [Self::Primary, Self::Secondary].into_iter().find(|tag| tag.word() == word)
    }
}

/// route followed by the frame received for a transaction on one port
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Route {
    /// nothing was received
    Missing,
    /// a frame with a known source tag was received
    Tagged(SourceTag),
    /// a frame was received but its source address is not one of ours
    Foreign,
}
impl Route {
    pub fn from_word(word: u16) -> Self {
        SourceTag::from_word(word).map_or(Self::Foreign, Self::Tagged)
    }
}


/// ethernet II header
#[derive(PackedStruct, Clone, Debug, Eq, PartialEq)]
#[packed_struct(size_bytes="14", bit_numbering = "msb0", endian = "msb")]
pub struct EthernetHeader {
    #[packed_field(bytes="0:5")]  pub dst: [u8;6],
    #[packed_field(bytes="6:11")]  pub src: [u8;6],
    // vlan is said to be optional and this is not present in most ethercat frames, so will not be used here
    #[packed_field(bytes="12:13")]  pub ty: u16,
}
impl EthernetHeader {
    /// broadcast ethercat header sent from the given port
    pub fn new(tag: SourceTag) -> Self {
        Self {
            dst: [0xff; 6],
            src: tag.address(),
            ty: ETHERCAT_TYPE,
        }
    }
    /// second word of the source address, used for route identification
    pub fn source_word(&self) -> u16 {
        u16::from_be_bytes([self.src[2], self.src[3]])
    }
}


/// ethercat frame header (common to ethernet or UDP mediums) as described in ETG 1000.4 table 11
// we cannot use the packed_field macro here because the bit fiddling is weird in this header
// so here it is by hand
#[bitsize(16)]
#[derive(TryFromBits, DebugBits, Copy, Clone)]
pub struct EthercatHeader {
    /// length of the ethercat frame (minus 2 bytes, which is the header)
    pub len: u11,
    reserved: u1,
    /// frame type
    pub ty: EthercatType,
}
impl PduData for EthercatHeader {
    type Packed = [u8; ETHERCAT_HEADER];

    fn pack(&self, dst: &mut [u8]) -> PackingResult<()> {
        u16::from(*self).pack(dst)
    }
    fn unpack(src: &[u8]) -> PackingResult<Self> {
        Self::try_from(u16::unpack(src)?)
            .map_err(|_| PackingError::InvalidValue("unknown ethercat frame type"))
    }
}

/// type of ethercat frame
#[bitsize(4)]
#[derive(TryFromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum EthercatType {
    /// process data unit, use to exchange with physical and logical memory in realtime or not
    ///
    /// See ETG.1000.4
    PDU = 0x1,

    NetworkVariable = 0x4,

    /// mailbox gateway communication, between the master and non-slave devices
    ///
    /// See ETG.8200
    Mailbox = 0x5,
}


/// flags word of a datagram header
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone)]
pub struct PduFlags {
    /// data length following the header, excluding the footer
    pub len: u11,
    reserved: u3,
    pub circulating: bool,
    /// true if there is an other PDU in the same frame
    pub next: bool,
}

/// header of a datagram, ETG 1000.4 table 12
#[derive(Copy, Clone, Debug)]
pub struct PduHeader {
    /// PDU command, specifying whether logical or physical memory is accesses, addressing type, and what read/write operation
    pub command: PduCommand,
    /// transaction index, this is how answers are matched with their slot
    pub index: u8,
    /// slave address, its meaning depend on the command
    pub slave_address: u16,
    /// memory address of the data to access, which memory is accessed depend on the command
    pub memory_address: u16,
    pub flags: PduFlags,
    pub interrupt: u16,
}
impl PduData for PduHeader {
    type Packed = [u8; PDU_HEADER];

    fn pack(&self, dst: &mut [u8]) -> PackingResult<()> {
        let mut cursor = Cursor::new(dst);
        cursor.pack(&u8::from(self.command))?;
        cursor.pack(&self.index)?;
        cursor.pack(&self.slave_address)?;
        cursor.pack(&self.memory_address)?;
        cursor.pack(&u16::from(self.flags))?;
        cursor.pack(&self.interrupt)
    }
    fn unpack(src: &[u8]) -> PackingResult<Self> {
        let mut cursor = Cursor::new(src);
        Ok(Self {
            command: PduCommand::from(cursor.unpack::<u8>()?),
            index: cursor.unpack()?,
            slave_address: cursor.unpack()?,
            memory_address: cursor.unpack()?,
            flags: PduFlags::from(cursor.unpack::<u16>()?),
            interrupt: cursor.unpack()?,
        })
    }
}

/// the possible PDU commands
#[bitsize(8)]
#[derive(FromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum PduCommand {
    /// no operation
    #[fallback]
    NOP = 0x0,

    /// broadcast read
    BRD = 0x07,
    /// broadcast write
    BWR = 0x08,
    /// broadcast read & write
    BRW = 0x09,

    /// auto-incremented slave read
    APRD = 0x01,
    /// auto-incremented slave write
    APWR = 0x02,
    /// auto-incremented slave read & write
    APRW = 0x03,

    /// fixed slave read
    FPRD = 0x04,
    /// fixed slave write
    FPWR = 0x05,
    /// fixed slave read & write
    FPRW = 0x06,

    /// logical memory read
    LRD = 0x0A,
    /// logical memory write
    LWR = 0x0B,
    /// logical memory read & write
    LRW = 0x0C,

    /// auto-incremented slave read multiple write
    ARMW = 0x0D,
    /// fixed slave read multiple write
    FRMW = 0x0E,
}


/// declared length of an ethercat frame (starting at the ethercat header), checked against the frame size
pub fn declared_len(ethercat: &[u8]) -> Option<usize> {
    let raw = u16::unpack(ethercat).ok()?;
    let len = usize::from(raw & LEN_MASK);
    // the working counter must fit in what was captured
    if len < PDU_HEADER || ethercat.len() < len + PDU_FOOTER
        {return None}
    Some(len)
}

/// transaction index of the first datagram in an ethercat frame
pub fn frame_index(ethercat: &[u8]) -> Option<u8> {
    ethercat.get(ETHERCAT_HEADER + 1).copied()
}

/// working counter of the last datagram in an ethercat frame
pub fn working_count(ethercat: &[u8]) -> Option<u16> {
    let len = declared_len(ethercat)?;
    u16::unpack(&ethercat[len ..]).ok()
}

/// ethercat part of an ethernet frame, or `None` if this is not an ethercat frame
pub fn ethercat_payload(frame: &[u8]) -> Option<(EthernetHeader, &[u8])> {
    if frame.len() < ETHERNET_HEADER
        {return None}
    let header = EthernetHeader::unpack_from_slice(&frame[.. ETHERNET_HEADER]).ok()?;
    if header.ty != ETHERCAT_TYPE
        {return None}
    Some((header, &frame[ETHERNET_HEADER ..]))
}

/// overwrite the source address of an ethernet frame
pub fn stamp(frame: &mut [u8], tag: SourceTag) {
    frame[6 .. 12].copy_from_slice(&tag.address());
}


/**
    write a frame containing a single datagram into the given buffer, with a zero working counter.

    The ethernet header is set for the primary port, links stamp the right source before sending. Returns the offset of the datagram data in the ethercat frame, useful to retrieve the answer with [read_datagram]
*/
pub fn setup_datagram(
        frame: &mut FrameBuffer,
        command: PduCommand,
        index: u8,
        slave_address: u16,
        memory_address: u16,
        data: &[u8],
        ) -> EthercatResult<usize> {
    let size = ETHERNET_HEADER + ETHERCAT_HEADER + PDU_HEADER + data.len() + PDU_FOOTER;
    let declared = size - ETHERNET_HEADER - ETHERCAT_HEADER;
    if declared > usize::from(LEN_MASK)
        {return Err(EthercatError::Protocol("datagram too big for an ethercat frame"))}
    frame.clear();
    frame.resize(size, 0)
        .map_err(|_| EthercatError::Protocol("datagram too big for an ethernet frame"))?;

    frame[.. ETHERNET_HEADER].copy_from_slice(&EthernetHeader::new(SourceTag::Primary).pack()?);
    let mut cursor = Cursor::new(&mut frame[ETHERNET_HEADER ..]);
    cursor.pack(&EthercatHeader::new(u11::new(declared as u16), EthercatType::PDU))?;
    cursor.pack(&PduHeader {
        command,
        index,
        slave_address,
        memory_address,
        flags: PduFlags::new(u11::new(data.len() as u16), false, false),
        interrupt: 0,
        })?;
    let offset = cursor.position();
    cursor.write(data)?;
    cursor.pack(&0u16)?;
    Ok(offset)
}

/**
    append a datagram to a frame already prepared by [setup_datagram].

    The previous last datagram is flagged to announce this one, and the frame declared length is updated. Returns the offset of the new datagram data in the ethercat frame.
*/
pub fn add_datagram(
        frame: &mut FrameBuffer,
        command: PduCommand,
        index: u8,
        slave_address: u16,
        memory_address: u16,
        data: &[u8],
        ) -> EthercatResult<usize> {
    let ethercat = frame.get(ETHERNET_HEADER ..)
        .ok_or(EthercatError::Protocol("frame has no ethercat header"))?;
    let declared = declared_len(ethercat)
        .ok_or(EthercatError::Protocol("frame has no valid datagram"))?;
    let end = ETHERCAT_HEADER + declared;

    // find the last datagram
    let mut last = ETHERCAT_HEADER;
    loop {
        let header = PduHeader::unpack(&ethercat[last ..])?;
        if ! header.flags.next() {break}
        last += PDU_HEADER + usize::from(header.flags.len().value()) + PDU_FOOTER;
        if last >= end
            {return Err(EthercatError::Protocol("datagram chain overflows the frame"))}
    }

    let declared = declared + PDU_HEADER + data.len() + PDU_FOOTER;
    if declared > usize::from(LEN_MASK)
        {return Err(EthercatError::Protocol("datagram too big for an ethercat frame"))}
    let start = ETHERNET_HEADER + end;
    frame.resize(start + PDU_HEADER + data.len() + PDU_FOOTER, 0)
        .map_err(|_| EthercatError::Protocol("datagram too big for an ethernet frame"))?;

    let ethercat = &mut frame[ETHERNET_HEADER ..];
    let mut header = PduHeader::unpack(&ethercat[last ..])?;
    header.flags.set_next(true);
    header.pack(&mut ethercat[last ..])?;
    EthercatHeader::new(u11::new(declared as u16), EthercatType::PDU).pack(ethercat)?;

    let mut cursor = Cursor::new(&mut ethercat[end ..]);
    cursor.pack(&PduHeader {
        command,
        index,
        slave_address,
        memory_address,
        flags: PduFlags::new(u11::new(data.len() as u16), false, false),
        interrupt: 0,
        })?;
    cursor.write(data)?;
    cursor.pack(&0u16)?;
    Ok(end + PDU_HEADER)
}

/// copy datagram data at `offset` in a received ethercat frame to `data`
pub fn read_datagram(ethercat: &[u8], offset: usize, data: &mut [u8]) -> EthercatResult {
    let src = ethercat.get(offset .. offset + data.len())
        .ok_or(EthercatError::Protocol("datagram data out of the received frame"))?;
    data.copy_from_slice(src);
    Ok(())
}

/// dummy frame sent on the secondary port, it only carries the transaction index around the ring
pub fn passthrough(index: u8) -> EthercatResult<FrameBuffer> {
    let mut frame = FrameBuffer::new();
    setup_datagram(&mut frame, PduCommand::BRD, index, 0, 0, &[0; 2])?;
    stamp(&mut frame, SourceTag::Secondary);
    Ok(frame)
}



#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ethercat_header() {
        let header = EthercatHeader::new(u11::new(0x28), EthercatType::PDU);
        let mut buf = [0u8; 2];
        header.pack(&mut buf).unwrap();
        assert_eq!(buf, 0b0001_0000_0010_1000u16.to_le_bytes());

        let header = EthercatHeader::unpack(&[0x3c, 0x10]).unwrap();
        assert_eq!(header.len().value(), 0x3c);
        assert_eq!(header.ty(), EthercatType::PDU);
    }

    #[test]
    fn single_datagram() {
        let mut frame = FrameBuffer::new();
        let offset = setup_datagram(&mut frame, PduCommand::FPRD, 5, 0x1001, 0x0130, &[1, 2, 3, 4]).unwrap();
        assert_eq!(frame.len(), ETHERNET_HEADER + ETHERCAT_HEADER + PDU_HEADER + 4 + PDU_FOOTER);
        assert_eq!(&frame[.. 6], &[0xff; 6]);
        assert_eq!(&frame[6 .. 12], &SourceTag::Primary.address());
        assert_eq!(&frame[12 .. 14], &[0x88, 0xa4]);

        let (ethernet, ethercat) = ethercat_payload(&frame).unwrap();
        assert_eq!(ethernet.source_word(), SourceTag::Primary.word());
        assert_eq!(frame_index(ethercat), Some(5));
        assert_eq!(declared_len(ethercat), Some(PDU_HEADER + 4 + PDU_FOOTER));
        assert_eq!(working_count(ethercat), Some(0));

        let header = PduHeader::unpack(&ethercat[ETHERCAT_HEADER ..]).unwrap();
        assert_eq!(header.command, PduCommand::FPRD);
        assert_eq!(header.slave_address, 0x1001);
        assert_eq!(header.memory_address, 0x0130);
        assert_eq!(header.flags.len().value(), 4);
        assert!(! header.flags.next());

        let mut data = [0; 4];
        read_datagram(ethercat, offset, &mut data).unwrap();
        assert_eq!(data, [1, 2, 3, 4]);
    }

    #[test]
    fn chained_datagrams() {
        let mut frame = FrameBuffer::new();
        let first = setup_datagram(&mut frame, PduCommand::BRD, 2, 0, 0x0130, &[0; 2]).unwrap();
        let second = add_datagram(&mut frame, PduCommand::LRW, 2, 0, 0, &[7; 6]).unwrap();
        let third = add_datagram(&mut frame, PduCommand::BWR, 2, 0, 0x0120, &[9; 2]).unwrap();
        assert_eq!(first, ETHERCAT_HEADER + PDU_HEADER);
        assert_eq!(second, first + 2 + PDU_FOOTER + PDU_HEADER);
        assert_eq!(third, second + 6 + PDU_FOOTER + PDU_HEADER);

        let ethercat = &frame[ETHERNET_HEADER ..];
        // the working counter of the last datagram is at the declared length
        let declared = declared_len(ethercat).unwrap();
        assert_eq!(declared + ETHERCAT_HEADER, ethercat.len());
        assert_eq!(declared, third + 2);

        let header = PduHeader::unpack(&ethercat[ETHERCAT_HEADER ..]).unwrap();
        assert!(header.flags.next());
        let header = PduHeader::unpack(&ethercat[second - PDU_HEADER ..]).unwrap();
        assert!(header.flags.next());
        assert_eq!(header.command, PduCommand::LRW);
        let header = PduHeader::unpack(&ethercat[third - PDU_HEADER ..]).unwrap();
        assert!(! header.flags.next());

        let mut data = [0; 6];
        read_datagram(ethercat, second, &mut data).unwrap();
        assert_eq!(data, [7; 6]);
    }

    #[test]
    fn truncated_frames() {
        let mut frame = FrameBuffer::new();
        setup_datagram(&mut frame, PduCommand::BRD, 1, 0, 0, &[0; 2]).unwrap();
        let ethercat = &frame[ETHERNET_HEADER ..];
        // cut in the working counter
        assert_eq!(working_count(&ethercat[.. ethercat.len() - 1]), None);
        assert_eq!(frame_index(&ethercat[.. 3]), None);
        assert!(ethercat_payload(&frame[.. 10]).is_none());

        let mut foreign = frame.clone();
        foreign[12 .. 14].copy_from_slice(&[0x08, 0x00]);
        assert!(ethercat_payload(&foreign).is_none());
    }

    #[test]
    fn passthrough_frame() {
        let frame = passthrough(9).unwrap();
        let (ethernet, ethercat) = ethercat_payload(&frame).unwrap();
        assert_eq!(Route::from_word(ethernet.source_word()), Route::Tagged(SourceTag::Secondary));
        assert_eq!(frame_index(ethercat), Some(9));
        assert_eq!(Route::from_word(0x1234), Route::Foreign);
    }
}
