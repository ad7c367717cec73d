//! Server side: transports that receive calls, hand them to a [`Dispatcher`] and send the replies
//!
//! A dispatcher sees each call through a [`CallHandler`].  It decodes the parameters with
//! `retrieve_call` and answers with `reply` or one of the named failure replies.  If it returns an
//! error without having started a reply, the transport answers with an AuthError or SystemError
//! reply on its behalf.

pub mod call_handler;
pub mod tcp_servers;
pub mod udp_servers;
pub mod stub;

use std::io::{self, ErrorKind};
use std::net::SocketAddr;

use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ServerConfig};
use crate::xdr::{Packer, Unpacker};
use super::{Result, RpcError};
use super::message::{CallMessage, ReplyMessage, RejectStatus};
use super::port_mapping::{Mapping, PortMapperClient, Protocol};

pub use call_handler::{CallHandler, ReplySink};
pub use tcp_servers::TcpServerTransport;
pub use udp_servers::UdpServerTransport;
pub use stub::{RpcServer, ShutdownSignal};

// Time allowed for each port mapper call made while (un)registering
const PORTMAPPER_TIMEOUT_MS:u64 = 3_000;
const PORTMAPPER_RETRANSMISSION_TIMEOUT_MS:u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramInfo {
	pub program: u32,
	pub version: u32,
}

impl ProgramInfo {
	pub fn new(program:u32, version:u32) -> Self { Self{ program, version } }

	// Lowest and highest version of `program` among `infos`, as reported in a version mismatch reply
	pub fn version_range(infos:&[ProgramInfo], program:u32) -> Option<(u32, u32)> {
		let versions = infos.iter().filter(|i| i.program == program).map(|i| i.version);
		let low = versions.clone().min()?;
		let high = versions.max()?;
		Some((low, high))
	}
}

pub trait Dispatcher: Send + Sync {
	fn dispatch(&self, call:&mut CallHandler<'_>, program:u32, version:u32, procedure:u32) -> Result<()>;
}

impl<F> Dispatcher for F where F: Fn(&mut CallHandler<'_>, u32, u32, u32) -> Result<()> + Send + Sync {
	fn dispatch(&self, call:&mut CallHandler<'_>, program:u32, version:u32, procedure:u32) -> Result<()> {
		self(call, program, version, procedure)
	}
}

pub trait ServerTransport: Send + Sync {

	fn program_infos(&self) -> &[ProgramInfo];
	fn protocol(&self) -> Protocol;
	fn local_addr(&self) -> SocketAddr;
	fn config(&self) -> &ServerConfig;

	fn port(&self) -> u16 { self.local_addr().port() }

	// Start serving on a thread of its own; returns immediately
	fn listen(&self) -> Result<()>;

	// Stop serving and release the socket.  Blocked receives are woken up.
	fn close(&self);

	// Advertise every (program, version) this transport serves.  Failing for any of them is fatal.
	fn register(&self) -> Result<()> {
		let protocol = self.protocol();
		let port = self.port();
		let mut pmap:Option<PortMapperClient> = None;

		for info in self.program_infos() {
			let failed = RpcError::CannotRegisterTransport{ program: info.program, version: info.version };
			if pmap.is_none() {
				pmap = Some(portmapper_client(self.config()).map_err(|e| {
					warn!("cannot reach port mapper at {}: {}", self.config().portmapper, e);
					RpcError::CannotRegisterTransport{ program: info.program, version: info.version }
				})?);
			}
			let client = match pmap.as_mut() { Some(c) => c, None => return Err(failed) };

			match client.set_port(&Mapping::new(info.program, info.version, protocol, port)) {
				Ok(true) => info!("registered program {} version {} on {:?} port {}", info.program, info.version, protocol, port),
				Ok(false) => {
					warn!("port mapper refused program {} version {} on {:?} port {}", info.program, info.version, protocol, port);
					return Err(failed);
				},
				Err(e) => {
					warn!("registering program {} version {}: {}", info.program, info.version, e);
					return Err(failed);
				},
			}
		}
		Ok(())
	}

	// Withdraw every advertisement.  Failures are ignored; there may be nothing to withdraw.
	fn unregister(&self) {
		let mut pmap = match portmapper_client(self.config()) {
			Ok(pmap) => pmap,
			Err(e) => {
				debug!("not unregistering, port mapper unreachable: {}", e);
				return;
			},
		};
		for info in self.program_infos() {
			if let Err(e) = pmap.unset_port(&Mapping::new(info.program, info.version, self.protocol(), 0)) {
				debug!("unregistering program {} version {}: {}", info.program, info.version, e);
			}
		}
	}

}

fn portmapper_client(config:&ServerConfig) -> io::Result<PortMapperClient> {
	let client_config = ClientConfig{
		timeout_ms: PORTMAPPER_TIMEOUT_MS,
		retransmission_timeout_ms: PORTMAPPER_RETRANSMISSION_TIMEOUT_MS,
		..ClientConfig::default()
	};
	PortMapperClient::at(config.portmapper, Protocol::UDP, &client_config)
}

// Socket errors that concern one peer or one attempt, not the socket itself
pub(crate) fn is_transient_socket_error(e:&io::Error) -> bool {
	matches!(e.kind(),
		ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused | ErrorKind::ConnectionAborted |
		ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut |
		ErrorKind::PermissionDenied | ErrorKind::AddrNotAvailable)
}

// Decode, dispatch and answer the call in `unpacker`.  Err means a reply could not be completed and
// the connection, if there is one, can't be trusted anymore.  Sinks that can restart a reply get an
// error reply instead of a half-encoded one.
pub(crate) fn serve_call(dispatcher:&dyn Dispatcher, peer:SocketAddr, unpacker:&mut Unpacker,
	packer:&mut Packer, sink:&mut dyn ReplySink) -> Result<()>
{
	let xid = unpacker.peek_u32().ok();

	let (call, auth) = match CallMessage::decode(unpacker) {
		Ok(x) => x,
		Err(RpcError::Authentication(status)) => {
			unpacker.skip_remaining();
			// The header got as far as the credential, so the xid is known
			let xid = match xid { Some(xid) => xid, None => return Ok(()) };
			debug!("rejecting call {} from {}: {}", xid, peer, status);
			packer.reset();
			ReplyMessage::denied(xid, RejectStatus::AuthError(status)).encode(packer, None)?;
			return sink.send_reply(packer.as_bytes()).map_err(RpcError::CannotSend);
		},
		Err(e) => {
			unpacker.skip_remaining();
			warn!("dropping malformed call from {}: {}", peer, e);
			return Ok(());
		},
	};

	let mut handler = CallHandler::new(peer, call, auth, unpacker, packer, sink);
	let outcome = dispatcher.dispatch(&mut handler, call.program, call.version, call.procedure);
	handler.end_decoding();

	match outcome {
		Ok(()) => {
			if !handler.has_replied() {
				debug!("no reply sent for call {} to program {} procedure {}", call.xid, call.program, call.procedure);
			}
			Ok(())
		},
		Err(e) => {
			if handler.has_replied() || (handler.is_encoding() && !handler.abandon_encoding()) {
				return Err(e);
			}
			debug!("call {} from {} failed: {}", call.xid, peer, e);
			match e {
				RpcError::Authentication(status) => handler.reply_auth_error(status),
				_ => handler.reply_system_error(),
			}
		},
	}
}
