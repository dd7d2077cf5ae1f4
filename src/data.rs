//! Traits and impls used to read/write data to/from process data buffers and dictionary objects.

use core::{
	marker::PhantomData,
	fmt,
	};

/**
	trait for data types than can be packed/unpacked to/from a byte buffer, in little endian

	This is the representation used on the wire for both dictionary objects (SDO) and process data (PDO)
*/
pub trait PduData: Sized {
    type Packed: Storage;

    fn pack(&self, dst: &mut [u8]) -> PackingResult<()>;
    fn unpack(src: &[u8]) -> PackingResult<Self>;
}

/// error raised when a value cannot be packed or unpacked
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PackingError {
    /// the buffer has not the expected size, the size of the given buffer is reported
    BadSize(usize, &'static str),
    /// the bytes do not represent a valid value of the destination type
    InvalidValue(&'static str),
}
impl fmt::Display for PackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSize(size, text) => write!(f, "bad size ({} bytes): {}", size, text),
            Self::InvalidValue(text) => write!(f, "invalid value: {}", text),
        }
    }
}
impl std::error::Error for PackingError {}

pub type PackingResult<T> = Result<T, PackingError>;


/// fixed size byte array holding a packed value, generic consts cannot yet size an array from a trait's associated const
pub trait Storage: AsRef<[u8]> + AsMut<[u8]> {
    const LEN: usize;
    fn zeroed() -> Self;
}
impl<const N: usize> Storage for [u8; N] {
    const LEN: usize = N;
    fn zeroed() -> Self {[0; N]}
}

impl<const N: usize> PduData for [u8; N] {
	type Packed = Self;

	fn pack(&self, dst: &mut [u8]) -> PackingResult<()> {
        if dst.len() < N
            {return Err(PackingError::BadSize(dst.len(), "not enough bytes for slice"))}
        dst[.. N].copy_from_slice(self);
        Ok(())
    }
	fn unpack(src: &[u8]) -> PackingResult<Self>  {
        src.get(.. N)
            .and_then(|src| Self::try_from(src).ok())
            .ok_or(PackingError::BadSize(src.len(), "not enough bytes for desired slice"))
	}
}

/// macro implementing [PduData] for a given struct generated with `bilge`, through its backing integer
macro_rules! bilge_pdudata {
    ($t: ty, $id: ty) => { impl $crate::data::PduData for $t {
        type Packed = [u8; core::mem::size_of::<$id>()];

        fn pack(&self, dst: &mut [u8]) -> $crate::data::PackingResult<()> {
            <$id as $crate::data::PduData>::pack(&<$id>::from(*self), dst)
        }
        fn unpack(src: &[u8]) -> $crate::data::PackingResult<Self> {
            Ok(Self::from(<$id as $crate::data::PduData>::unpack(src)?))
        }
    }};
}
pub(crate) use bilge_pdudata;

/// macro implementing [PduData] for numeric types
macro_rules! num_pdudata {
	($t: ty) => { impl crate::data::PduData for $t {
            type Packed = [u8; core::mem::size_of::<$t>()];

            fn pack(&self, dst: &mut [u8]) -> crate::data::PackingResult<()> {
                let size = dst.len();
                let dst = dst.get_mut(.. Self::Packed::LEN)
                    .ok_or(crate::data::PackingError::BadSize(size, "not enough bytes for integer"))?;
				dst.copy_from_slice(&self.to_le_bytes());
				Ok(())
			}
			fn unpack(src: &[u8]) -> crate::data::PackingResult<Self> {
				Ok(Self::from_le_bytes(src.get(.. Self::Packed::LEN)
					.and_then(|src| src.try_into().ok())
					.ok_or(crate::data::PackingError::BadSize(src.len(), "not enough bytes for integer"))?
					))
			}
		}};
}

num_pdudata!(u8);
num_pdudata!(u16);
num_pdudata!(u32);
num_pdudata!(u64);
num_pdudata!(i8);
num_pdudata!(i16);
num_pdudata!(i32);
num_pdudata!(i64);



/**
	locate some data in a buffer by its byte position and length, which must be extracted to type `T` to be processed in rust

	It acts like a getter/setter of a value in a byte sequence. One can think of it as an offset to a data location because it does not actually point the data but only its offset in the byte sequence, it also contains its length to dynamically check memory bounds.
*/
#[derive(Default, Eq, Hash)]
pub struct Field<T: PduData> {
    /// this is only here to mark that T is actually used
	extracted: PhantomData<T>,
	/// start byte index of the object
	pub byte: usize,
	/// byte length of the object
	pub len: usize,
}
impl<T: PduData> Field<T>
{
	/// build a Field from its byte offset and byte length
	pub const fn new(byte: usize, len: usize) -> Self {
		Self{extracted: PhantomData, byte, len}
	}
	/// byte offset just after the field
	pub const fn end(&self) -> usize {self.byte + self.len}

	/// extract the value pointed by the field in the given byte array, failing if the array is too short
	pub fn try_get(&self, data: &[u8]) -> PackingResult<T> {
		let src = data.get(self.byte .. self.end())
			.ok_or(PackingError::BadSize(data.len(), "buffer too short for field"))?;
		T::unpack(src)
	}
	/// dump the given value to the place pointed by the field in the byte array, failing if the array is too short
	pub fn try_set(&self, data: &mut [u8], value: T) -> PackingResult<()> {
		let size = data.len();
		let dst = data.get_mut(self.byte .. self.end())
			.ok_or(PackingError::BadSize(size, "buffer too short for field"))?;
		value.pack(dst)
	}
}
impl<T: PduData> fmt::Debug for Field<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Field{{0x{:x}, {}}}", self.byte, self.len)
	}
}
// [Clone] and [Copy] must be implemented manually to allow copying a field pointing to a type which does not implement this operation
impl<T: PduData> Clone for Field<T> {
    fn clone(&self) -> Self   {Self::new(self.byte, self.len)}
}
impl<T: PduData> Copy for Field<T> {}
impl<T: PduData> PartialEq for Field<T> {
    fn eq(&self, other: &Self) -> bool {
        self.byte == other.byte && self.len == other.len
    }
}
