// External data representation (RFC 1832): every item is a multiple of four bytes, big-endian

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
	#[error("buffer underflow: needed {needed} bytes but only {available} remain")]
	BufferUnderflow { needed: usize, available: usize },

	#[error("buffer overflow: encoding would exceed {max} bytes")]
	BufferOverflow { max: usize },

	#[error("invalid boolean value {0}")]
	InvalidBoolean(i32),

	#[error("invalid enum value {0}")]
	InvalidEnum(i32),

	#[error("length {len} exceeds limit of {max}")]
	LengthExceeded { len: usize, max: usize },

	#[error("non-utf8 characters in string")]
	NonUtf8String(#[from] std::string::FromUtf8Error),

	#[error("{0} bytes of trailing data left after decoding")]
	TrailingData(usize),
}

pub type Result<T> = std::result::Result<T, Error>;

// Number of zero bytes needed to bring n up to a multiple of four
pub fn padding(n:usize) -> usize { (4 - (n % 4)) % 4 }

pub struct Packer {
	buff: Vec<u8>,
	max_size: Option<usize>,
}

pub struct Unpacker {
	buff: Vec<u8>,
	pos: usize,
}

impl Default for Packer {
	fn default() -> Self { Self::new() }
}

impl Packer {

	pub fn new() -> Self { Packer{ buff: Vec::new(), max_size: None } }

	// A packer that refuses to grow past max_size bytes, e.g. to respect a datagram limit
	pub fn with_max_size(max_size:usize) -> Self {
		Packer{ buff: Vec::with_capacity(max_size), max_size: Some(max_size) }
	}

	pub fn reset(&mut self) { self.buff.clear(); }

	pub fn as_bytes(&self) -> &[u8] { &self.buff }
	pub fn len(&self) -> usize { self.buff.len() }
	pub fn is_empty(&self) -> bool { self.buff.is_empty() }

	fn reserve(&self, n:usize) -> Result<()> {
		match self.max_size {
			Some(max) if self.buff.len() + n > max => Err(Error::BufferOverflow{ max }),
			_ => Ok(()),
		}
	}

	// Packing methods that can only add multiples of four bytes, so if we started off with the correct
	// padding, we'll end up with the correct padding
	pub fn pack_u32(&mut self, x:u32) -> Result<()> {
		self.reserve(4)?;
		let mut word = [0u8; 4];
		BigEndian::write_u32(&mut word, x);
		self.buff.extend_from_slice(&word);
		Ok(())
	}

	pub fn pack_i32(&mut self, x:i32) -> Result<()> { self.pack_u32(x as u32) }

	pub fn pack_bool(&mut self, b:bool) -> Result<()> {
		if b { self.pack_i32(1) }
		else { self.pack_i32(0) }
	}

	pub fn pack_enum(&mut self, x:i32) -> Result<()> { self.pack_i32(x) }

	// Packing methods that require padding at the end
	pub fn pack_opaque(&mut self, data:&[u8]) -> Result<()> {
		let pad = padding(data.len());
		self.reserve(data.len() + pad)?;
		self.buff.extend_from_slice(data);
		self.buff.extend(std::iter::repeat(0).take(pad));
		Ok(())
	}

	pub fn pack_variable_len_opaque(&mut self, data:&[u8]) -> Result<()> {
		self.reserve(4 + data.len() + padding(data.len()))?;
		self.pack_u32(data.len() as u32)?;
		self.pack_opaque(data)
	}

	pub fn pack_string(&mut self, s:&str) -> Result<()> { self.pack_variable_len_opaque(s.as_bytes()) }

	pub fn pack_int_vector(&mut self, v:&[i32]) -> Result<()> {
		self.reserve(4 * (v.len() + 1))?;
		self.pack_u32(v.len() as u32)?;
		for x in v { self.pack_i32(*x)?; }
		Ok(())
	}

}

impl Default for Unpacker {
	fn default() -> Self { Self::new() }
}

impl Unpacker {

	pub fn new() -> Self { Unpacker{ buff: Vec::new(), pos: 0 } }

	pub fn from_bytes(data:&[u8]) -> Self {
		let mut ans = Self::new();
		ans.reset(data);
		ans
	}

	pub fn reset(&mut self, data:&[u8]) {
		self.buff.clear();
		self.buff.extend_from_slice(data);
		self.pos = 0;
	}

	// Take ownership of an already assembled message, e.g. a TCP record
	pub fn load(&mut self, data:Vec<u8>) {
		self.buff = data;
		self.pos = 0;
	}

	pub fn remaining(&self) -> usize { self.buff.len() - self.pos }
	pub fn all_data_consumed(&self) -> bool { self.remaining() == 0 }

	pub fn get_remaining_bytes(&mut self) -> Vec<u8> {
		let ans = self.buff[self.pos..].to_vec();
		self.pos = self.buff.len();
		ans
	}

	// Discard whatever is left of the current message
	pub fn skip_remaining(&mut self) { self.pos = self.buff.len(); }

	fn take(&mut self, n:usize) -> Result<&[u8]> {
		if self.remaining() < n {
			return Err(Error::BufferUnderflow{ needed: n, available: self.remaining() });
		}
		let start = self.pos;
		self.pos += n;
		Ok(&self.buff[start..start + n])
	}

	pub fn peek_u32(&self) -> Result<u32> {
		if self.remaining() < 4 {
			return Err(Error::BufferUnderflow{ needed: 4, available: self.remaining() });
		}
		Ok(BigEndian::read_u32(&self.buff[self.pos..]))
	}

	pub fn unpack_u32(&mut self) -> Result<u32> { Ok(BigEndian::read_u32(self.take(4)?)) }
	pub fn unpack_i32(&mut self) -> Result<i32> { Ok(BigEndian::read_i32(self.take(4)?)) }

	// An enum is just an i32 with a restricted set of values.  We can't check that this value is in the restricted set at this
	// level because it depends on the application, so for our purposes here, an enum is the same as an i32
	pub fn unpack_enum(&mut self) -> Result<i32> { self.unpack_i32() }

	pub fn unpack_bool(&mut self) -> Result<bool> {
		match self.unpack_i32()? {
			0 => Ok(false),
			1 => Ok(true),
			x => Err(Error::InvalidBoolean(x)),
		}
	}

	pub fn unpack_opaque(&mut self, n:usize) -> Result<Vec<u8>> {
		let pad = padding(n);
		if self.remaining() < n + pad {
			return Err(Error::BufferUnderflow{ needed: n + pad, available: self.remaining() });
		}
		let ans = self.take(n)?.to_vec();
		self.take(pad)?;
		Ok(ans)
	}

	pub fn unpack_variable_len_opaque(&mut self) -> Result<Vec<u8>> {
		let n = self.unpack_u32()? as usize;
		self.unpack_opaque(n)
	}

	pub fn unpack_variable_len_opaque_max(&mut self, max:usize) -> Result<Vec<u8>> {
		let n = self.unpack_u32()? as usize;
		if n > max { return Err(Error::LengthExceeded{ len: n, max }); }
		self.unpack_opaque(n)
	}

	pub fn unpack_string(&mut self) -> Result<String> {
		Ok(String::from_utf8(self.unpack_variable_len_opaque()?)?)
	}

	pub fn unpack_string_max(&mut self, max:usize) -> Result<String> {
		Ok(String::from_utf8(self.unpack_variable_len_opaque_max(max)?)?)
	}

	pub fn unpack_int_vector(&mut self) -> Result<Vec<i32>> {
		let n = self.unpack_u32()? as usize;
		if n.saturating_mul(4) > self.remaining() {
			return Err(Error::BufferUnderflow{ needed: n.saturating_mul(4), available: self.remaining() });
		}
		(0..n).map(|_| self.unpack_i32()).collect()
	}

	pub fn unpack_int_vector_max(&mut self, max:usize) -> Result<Vec<i32>> {
		let n = self.peek_u32()? as usize;
		if n > max { return Err(Error::LengthExceeded{ len: n, max }); }
		self.unpack_int_vector()
	}

}

// Something that can write itself into an XDR stream, e.g. the parameters of a call
pub trait XdrEncode {
	fn pack(&self, packer:&mut Packer) -> Result<()>;
}

// Something that can be filled in from an XDR stream, e.g. the result of a call
pub trait XdrDecode {
	fn unpack(&mut self, unpacker:&mut Unpacker) -> Result<()>;
}

impl XdrEncode for () {
	fn pack(&self, _:&mut Packer) -> Result<()> { Ok(()) }
}

impl XdrDecode for () {
	fn unpack(&mut self, _:&mut Unpacker) -> Result<()> { Ok(()) }
}

impl XdrEncode for u32 {
	fn pack(&self, packer:&mut Packer) -> Result<()> { packer.pack_u32(*self) }
}

impl XdrDecode for u32 {
	fn unpack(&mut self, unpacker:&mut Unpacker) -> Result<()> {
		*self = unpacker.unpack_u32()?;
		Ok(())
	}
}

impl XdrEncode for i32 {
	fn pack(&self, packer:&mut Packer) -> Result<()> { packer.pack_i32(*self) }
}

impl XdrDecode for i32 {
	fn unpack(&mut self, unpacker:&mut Unpacker) -> Result<()> {
		*self = unpacker.unpack_i32()?;
		Ok(())
	}
}

impl XdrEncode for bool {
	fn pack(&self, packer:&mut Packer) -> Result<()> { packer.pack_bool(*self) }
}

impl XdrDecode for bool {
	fn unpack(&mut self, unpacker:&mut Unpacker) -> Result<()> {
		*self = unpacker.unpack_bool()?;
		Ok(())
	}
}

impl XdrEncode for String {
	fn pack(&self, packer:&mut Packer) -> Result<()> { packer.pack_string(self) }
}

impl XdrEncode for str {
	fn pack(&self, packer:&mut Packer) -> Result<()> { packer.pack_string(self) }
}

impl XdrDecode for String {
	fn unpack(&mut self, unpacker:&mut Unpacker) -> Result<()> {
		*self = unpacker.unpack_string()?;
		Ok(())
	}
}

// Vec<u8> is variable length opaque data
impl XdrEncode for Vec<u8> {
	fn pack(&self, packer:&mut Packer) -> Result<()> { packer.pack_variable_len_opaque(self) }
}

impl XdrDecode for Vec<u8> {
	fn unpack(&mut self, unpacker:&mut Unpacker) -> Result<()> {
		*self = unpacker.unpack_variable_len_opaque()?;
		Ok(())
	}
}

impl XdrEncode for Vec<i32> {
	fn pack(&self, packer:&mut Packer) -> Result<()> { packer.pack_int_vector(self) }
}

impl XdrDecode for Vec<i32> {
	fn unpack(&mut self, unpacker:&mut Unpacker) -> Result<()> {
		*self = unpacker.unpack_int_vector()?;
		Ok(())
	}
}
