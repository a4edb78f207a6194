//! Traits and impls used to read/write data to/from the wire.

/**
	trait for data types than can be packed/unpacked to/from an ethercat frame

	ethercat is little endian, so are all the implementations in this crate
*/
pub trait PduData: Sized {
    type Packed: Storage;

    fn pack(&self, dst: &mut [u8]) -> PackingResult<()>;
    fn unpack(src: &[u8]) -> PackingResult<Self>;
}

/** Enum to identify and raise adapted error raised by this package
*/
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PackingError {
    BadSize(usize, &'static str),
    InvalidValue(&'static str),
}

pub type PackingResult<T> = Result<T, PackingError>;


/// this trait is an equivalent to `packed_struct::ByteArray` but since rust doesn't actually support using generic consts in const expressions, we do not have choice
pub trait Storage: AsRef<[u8]> + AsMut<[u8]> {
    const LEN: usize;
}
impl<const N: usize> Storage for [u8; N] {
    const LEN: usize = N;
}

/// macro implementing [PduData] for numeric types
macro_rules! num_pdudata {
	($t: ty) => { impl crate::data::PduData for $t {
            type Packed = [u8; core::mem::size_of::<$t>()];

            fn pack(&self, dst: &mut [u8]) -> crate::data::PackingResult<()> {
                if dst.len() < core::mem::size_of::<$t>()
                    {return Err(crate::data::PackingError::BadSize(dst.len(), "not enough space for integer"))}
				dst[.. core::mem::size_of::<$t>()].copy_from_slice(&self.to_le_bytes());
				Ok(())
			}
			fn unpack(src: &[u8]) -> crate::data::PackingResult<Self> {
                if src.len() < core::mem::size_of::<$t>()
                    {return Err(crate::data::PackingError::BadSize(src.len(), "not enough bytes for integer"))}
                let mut bytes = [0; core::mem::size_of::<$t>()];
                bytes.copy_from_slice(&src[.. core::mem::size_of::<$t>()]);
				Ok(Self::from_le_bytes(bytes))
			}
		}};
}

num_pdudata!(u8);
num_pdudata!(u16);



/** helper to read/write sequencial data from/to a byte slice

    It is close to what [std::io::Cursor] is doing, but it is meant to work with [PduData]

    Every read or write is bounds checked, so a truncated frame shows up as a [PackingError] rather than a panic.
*/
pub struct Cursor<T> {
    position: usize,
    data: T,
}
impl<T> Cursor<T> {
    /// create a new cursor starting at position zero in the given slice
    pub fn new(data: T) -> Self   {Self{position: 0, data}}
    /// current position in the read/write slice
    ///
    /// bytes before this position are considered read or written, and bytes after are coming for use in next read/write calls
    pub fn position(&self) -> usize   {self.position}
}
impl<T: AsRef<[u8]>> Cursor<T> {
    fn advance(&mut self, size: usize) -> PackingResult<core::ops::Range<usize>> {
        let start = self.position;
        let end = start + size;
        if end > self.data.as_ref().len()
            {return Err(PackingError::BadSize(self.data.as_ref().len(), "cursor reached the end of data"))}
        self.position = end;
        Ok(start .. end)
    }
    /// read the next coming bytes with a [PduData] value, and increment the position
    pub fn unpack<P: PduData>(&mut self) -> PackingResult<P> {
        let range = self.advance(<P::Packed as Storage>::LEN)?;
        P::unpack(&self.data.as_ref()[range])
    }
}
impl<T: AsRef<[u8]> + AsMut<[u8]>> Cursor<T> {
    /// write the next coming bytes with a [PduData] value, and increment the position
    pub fn pack<P: PduData>(&mut self, value: &P) -> PackingResult<()> {
        let range = self.advance(<P::Packed as Storage>::LEN)?;
        value.pack(&mut self.data.as_mut()[range])
    }
    /// write the next coming bytes with the given slice, and increment the position
    pub fn write(&mut self, value: &[u8]) -> PackingResult<()> {
        let range = self.advance(value.len())?;
        self.data.as_mut()[range].copy_from_slice(value);
        Ok(())
    }
}
