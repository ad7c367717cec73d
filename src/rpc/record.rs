// Record marking (RFC 1831 section 10): on a byte stream each message is sent as one or more
// fragments, each preceded by a big-endian u32 whose top bit flags the last fragment of the record

use std::io::{self, Read, Write, Error, ErrorKind};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub const LAST_FRAGMENT:u32 = 0x8000_0000;
pub const FRAGMENT_LEN_MASK:u32 = 0x7fff_ffff;

pub const DEFAULT_MAX_FRAGMENT_SIZE:usize = 8192;
pub const DEFAULT_MAX_RECORD_SIZE:usize = 1 << 20;

pub fn write_record<W: Write>(writer:&mut W, data:&[u8], max_fragment_size:usize) -> io::Result<()> {
	let max_fragment_size = max_fragment_size.max(4).min(FRAGMENT_LEN_MASK as usize);

	// Build the framed record first so that it goes out in as few writes as possible
	let mut send_bytes:Vec<u8> = Vec::with_capacity(data.len() + 4 * (data.len() / max_fragment_size + 1));
	let mut chunks = data.chunks(max_fragment_size).peekable();
	if chunks.peek().is_none() {
		send_bytes.write_u32::<BigEndian>(LAST_FRAGMENT)?;
	}
	while let Some(chunk) = chunks.next() {
		let mut header = chunk.len() as u32;
		if chunks.peek().is_none() { header |= LAST_FRAGMENT; }
		send_bytes.write_u32::<BigEndian>(header)?;
		send_bytes.extend_from_slice(chunk);
	}

	writer.write_all(&send_bytes)
}

// Returns (last, length) for the next fragment
pub fn read_fragment_header<R: Read>(reader:&mut R) -> io::Result<(bool, usize)> {
	let x:u32 = reader.read_u32::<BigEndian>()?;
	Ok(((x & LAST_FRAGMENT) != 0, (x & FRAGMENT_LEN_MASK) as usize))
}

// Collect a whole record given the header of its first fragment, which the caller has already read
pub fn read_record<R: Read>(reader:&mut R, first:(bool, usize), max_record_size:usize) -> io::Result<Vec<u8>> {
	let mut record:Vec<u8> = vec![];
	let (mut last, mut n) = first;

	loop {
		if record.len() + n > max_record_size {
			return Err(Error::new(ErrorKind::InvalidData,
				format!("record of at least {} bytes exceeds the limit of {}", record.len() + n, max_record_size)));
		}

		let start = record.len();
		record.resize(start + n, 0);
		reader.read_exact(&mut record[start..])?;

		if last { return Ok(record); }

		let next = read_fragment_header(reader)?;
		last = next.0;
		n = next.1;
	}
}
