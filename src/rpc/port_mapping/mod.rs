
pub const PMAP_PROG:u32 = 100000;
pub const PMAP_VERS:u32 = 2;
pub const PMAP_PORT:u16 = 111;

pub const PMAPPROC_NULL:u32    = 0;     // (void) -> void
pub const PMAPPROC_SET:u32     = 1;     // (mapping) -> bool
pub const PMAPPROC_UNSET:u32   = 2;     // (mapping) -> bool
pub const PMAPPROC_GETPORT:u32 = 3;     // (mapping) -> unsigned int
pub const PMAPPROC_DUMP:u32    = 4;     // (void) -> pmaplist
pub const PMAPPROC_CALLIT:u32  = 5;     // (call_args) -> call_result

use std::io;
use std::net::SocketAddr;

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::config::ClientConfig;
use crate::xdr::{self, Packer, Unpacker, XdrEncode, XdrDecode};
use super::{IPPROTO_TCP, IPPROTO_UDP};
use super::{Result, RpcError};
use super::client::Client;
use super::tcp_clients::TcpClient;
use super::udp_clients::UdpClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
	TCP,
	UDP,
}

impl Protocol {
	pub fn to_u32(&self) -> u32 { match self {
		Protocol::TCP => IPPROTO_TCP,
		Protocol::UDP => IPPROTO_UDP,
	}}

	pub fn from_u32(x:u32) -> Option<Self> { match x {
		IPPROTO_TCP => Some(Protocol::TCP),
		IPPROTO_UDP => Some(Protocol::UDP),
		_ => None,
	}}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
	pub program: u32,
	pub version: u32,
	pub protocol: Protocol,
	pub port: u32,				// XDR carries it as an unsigned int even though only 16 bits are used
}

impl Mapping {
	pub fn new(program:u32, version:u32, protocol:Protocol, port:u16) -> Self {
		Self{ program, version, protocol, port: port as u32 }
	}
}

impl XdrEncode for Mapping {
	fn pack(&self, packer:&mut Packer) -> xdr::Result<()> {
		packer.pack_u32(self.program)?;
		packer.pack_u32(self.version)?;
		packer.pack_u32(self.protocol.to_u32())?;
		packer.pack_u32(self.port)
	}
}

impl XdrDecode for Mapping {
	fn unpack(&mut self, unpacker:&mut Unpacker) -> xdr::Result<()> {
		self.program = unpacker.unpack_u32()?;
		self.version = unpacker.unpack_u32()?;
		let protocol = unpacker.unpack_u32()?;
		self.protocol = Protocol::from_u32(protocol).ok_or(xdr::Error::InvalidEnum(protocol as i32))?;
		self.port = unpacker.unpack_u32()?;
		Ok(())
	}
}

// pmaplist: a linked list on the wire, each entry preceded by a "more follows" boolean
#[derive(Debug, Default)]
struct MappingList(Vec<Mapping>);

impl XdrDecode for MappingList {
	fn unpack(&mut self, unpacker:&mut Unpacker) -> xdr::Result<()> {
		self.0.clear();
		while unpacker.unpack_bool()? {
			let mut m = Mapping::new(0, 0, Protocol::TCP, 0);
			m.unpack(unpacker)?;
			self.0.push(m);
		}
		Ok(())
	}
}

// Arguments of an indirect call: the inner call's parameters travel as opaque bytes
struct CallArgs<'a> {
	program: u32,
	version: u32,
	procedure: u32,
	args: &'a dyn XdrEncode,
}

impl XdrEncode for CallArgs<'_> {
	fn pack(&self, packer:&mut Packer) -> xdr::Result<()> {
		let mut inner = Packer::new();
		self.args.pack(&mut inner)?;

		packer.pack_u32(self.program)?;
		packer.pack_u32(self.version)?;
		packer.pack_u32(self.procedure)?;
		packer.pack_variable_len_opaque(inner.as_bytes())
	}
}

#[derive(Default)]
struct CallResult {
	port: u32,
	result: Vec<u8>,
}

impl XdrDecode for CallResult {
	fn unpack(&mut self, unpacker:&mut Unpacker) -> xdr::Result<()> {
		self.port = unpacker.unpack_u32()?;
		self.result = unpacker.unpack_variable_len_opaque()?;
		Ok(())
	}
}

// Talks to a port mapper over whichever client transport it was given
pub struct PortMapperClient {
	client: Box<dyn Client>,
}

impl PortMapperClient {

	pub fn new_tcp(host:&str) -> io::Result<Self> {
		Ok(Self::with_client(Box::new(TcpClient::connect((host, PMAP_PORT), PMAP_PROG, PMAP_VERS)?)))
	}

	pub fn new_udp(host:&str) -> io::Result<Self> {
		Ok(Self::with_client(Box::new(UdpClient::connect((host, PMAP_PORT), PMAP_PROG, PMAP_VERS)?)))
	}

	// A port mapper at a non-standard address, e.g. the one configured for a server
	pub fn at(addr:SocketAddr, protocol:Protocol, config:&ClientConfig) -> io::Result<Self> {
		let client:Box<dyn Client> = match protocol {
			Protocol::TCP => Box::new(TcpClient::with_config(addr, PMAP_PROG, PMAP_VERS, config)?),
			Protocol::UDP => Box::new(UdpClient::with_config(addr, PMAP_PROG, PMAP_VERS, config)?),
		};
		Ok(Self::with_client(client))
	}

	pub fn with_client(client:Box<dyn Client>) -> Self { Self{ client } }

	pub fn client(&mut self) -> &mut dyn Client { &mut *self.client }

	pub fn ping(&mut self) -> Result<()> {
		self.client.call_default(PMAPPROC_NULL, &(), &mut ())
	}

	pub fn set_port(&mut self, m:&Mapping) -> Result<bool> {
		let mut ans = false;
		self.client.call_default(PMAPPROC_SET, m, &mut ans)?;
		debug!("SET {:?} -> {}", m, ans);
		Ok(ans)
	}

	pub fn unset_port(&mut self, m:&Mapping) -> Result<bool> {
		let mut ans = false;
		self.client.call_default(PMAPPROC_UNSET, m, &mut ans)?;
		debug!("UNSET {:?} -> {}", m, ans);
		Ok(ans)
	}

	pub fn get_port(&mut self, program:u32, version:u32, protocol:Protocol) -> Result<u16> {
		let m = Mapping::new(program, version, protocol, 0);
		let mut port:u32 = 0;
		self.client.call_default(PMAPPROC_GETPORT, &m, &mut port)?;

		match port {
			0 => Err(RpcError::ProgramNotRegistered{ program, version }),
			p if p > u16::MAX as u32 => Err(RpcError::MalformedReply("port number out of range")),
			p => Ok(p as u16),
		}
	}

	pub fn list_servers(&mut self) -> Result<Vec<Mapping>> {
		let mut list = MappingList::default();
		self.client.call_default(PMAPPROC_DUMP, &(), &mut list)?;
		Ok(list.0)
	}

	// Have the port mapper forward a call to a local program.  Returns the port the program is served on.
	pub fn call_it(&mut self, program:u32, version:u32, procedure:u32, args:&dyn XdrEncode, result:&mut dyn XdrDecode) -> Result<u16> {
		let call_args = CallArgs{ program, version, procedure, args };
		let mut call_result = CallResult::default();
		self.client.call_default(PMAPPROC_CALLIT, &call_args, &mut call_result)?;

		let mut unpacker = Unpacker::from_bytes(&call_result.result);
		result.unpack(&mut unpacker).map_err(RpcError::CannotDecodeResult)?;
		Ok(call_result.port as u16)
	}

	pub fn close(&mut self) -> Result<()> { self.client.close() }

}
