
use std::io::{self, Error, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket, ToSocketAddrs};
use std::time::{Duration, Instant};

use serde::{Serialize, Deserialize};
use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::xdr::{Packer, Unpacker, XdrEncode, XdrDecode};
use super::{Result, RpcError};
use super::auth::{ClientAuth, AuthNone};
use super::client::{self, Client};
use super::message::{CallMessage, ReplyMessage};

// How the wait between resends develops while no reply arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetransmissionMode {
	Fixed,
	Exponential,
}

impl RetransmissionMode {
	pub fn next(&self, resend_timeout:Duration) -> Duration { match self {
		RetransmissionMode::Fixed       => resend_timeout,
		RetransmissionMode::Exponential => resend_timeout.checked_mul(2).unwrap_or(resend_timeout),
	}}
}

fn unspecified_for(addr:&SocketAddr) -> SocketAddr {
	match addr.ip() {
		IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
		IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
	}
}

fn send_datagram(socket:&UdpSocket, data:&[u8], to:SocketAddr) -> Result<()> {
	match socket.send_to(data, to) {
		Ok(n) if n == data.len() => Ok(()),
		Ok(_)  => Err(RpcError::CannotSend(Error::new(ErrorKind::Other, "Unable to send all bytes"))),
		Err(e) => Err(RpcError::CannotSend(e)),
	}
}

// Encode header and parameters of one call into `packer`
fn pack_call(packer:&mut Packer, call:&CallMessage, auth:&dyn ClientAuth, params:&dyn XdrEncode) -> Result<()> {
	packer.reset();
	call.encode(packer, auth)?;
	params.pack(packer).map_err(RpcError::CannotEncodeArgs)
}

// Calls go out as single datagrams and are resent until a matching reply shows up or the
// overall timeout expires.
pub struct UdpClient {
	socket: Option<UdpSocket>,
	pub server: SocketAddr,
	pub prog: u32,
	pub vers: u32,
	pub lastxid: u32,
	auth: Box<dyn ClientAuth>,
	timeout: Duration,
	retransmission_timeout: Duration,
	retransmission_mode: RetransmissionMode,
	packer: Packer,
	unpacker: Unpacker,
	recv_buff: Vec<u8>,
}

impl UdpClient {

	pub fn connect<A: ToSocketAddrs>(addr: A, prog: u32, vers: u32) -> io::Result<Self> {
		Self::with_config(addr, prog, vers, &ClientConfig::default())
	}

	pub fn with_config<A: ToSocketAddrs>(addr: A, prog: u32, vers: u32, config:&ClientConfig) -> io::Result<Self> {
		let server:SocketAddr = addr.to_socket_addrs()?.next()
			.ok_or_else(|| Error::new(ErrorKind::Other, "Address did not resolve"))?;
		let socket = UdpSocket::bind(unspecified_for(&server))?;
		debug!("UDP client for program {} version {} talking to {} from {:?}", prog, vers, server, socket.local_addr().ok());

		Ok(Self{
			socket: Some(socket),
			server,
			prog,
			vers,
			lastxid: client::initial_xid(),
			auth: Box::new(AuthNone),
			timeout: config.timeout(),
			retransmission_timeout: config.retransmission_timeout(),
			retransmission_mode: config.retransmission_mode,
			packer: Packer::with_max_size(config.buffer_size),
			unpacker: Unpacker::new(),
			recv_buff: vec![0; config.buffer_size],
		})
	}

	pub fn local_addr(&self) -> Result<SocketAddr> {
		self.socket.as_ref().ok_or(RpcError::Closed)?.local_addr().map_err(RpcError::CannotReceive)
	}

	pub fn set_retransmission_timeout(&mut self, timeout:Duration) { self.retransmission_timeout = timeout; }
	pub fn retransmission_timeout(&self) -> Duration { self.retransmission_timeout }

	pub fn set_retransmission_mode(&mut self, mode:RetransmissionMode) { self.retransmission_mode = mode; }
	pub fn retransmission_mode(&self) -> RetransmissionMode { self.retransmission_mode }

	// Wait until `until` for the reply to `xid`.  Datagrams from other hosts or with other ids are
	// dropped without ending the wait.  Ok(None) means this attempt timed out.
	fn wait_for_reply(&mut self, xid:u32, until:Instant) -> Result<Option<ReplyMessage>> {
		let socket = self.socket.as_ref().ok_or(RpcError::Closed)?;

		loop {
			let remaining = until.saturating_duration_since(Instant::now());
			if remaining == Duration::from_secs(0) { return Ok(None); }
			socket.set_read_timeout(Some(remaining)).map_err(RpcError::CannotReceive)?;

			let (n, from) = match socket.recv_from(&mut self.recv_buff) {
				Ok(x) => x,
				Err(e) => match RpcError::receive(e) {
					RpcError::Timeout => return Ok(None),
					e => return Err(e),
				},
			};

			if from != self.server {
				trace!("ignoring datagram from {} while waiting for {}", from, self.server);
				continue;
			}

			self.unpacker.reset(&self.recv_buff[0..n]);
			match self.unpacker.peek_u32() {
				Ok(reply_xid) if reply_xid == xid => { },
				Ok(reply_xid) => {
					trace!("ignoring reply with xid {} while waiting for {}", reply_xid, xid);
					continue;
				},
				Err(_) => continue,
			}

			return match ReplyMessage::decode(&mut self.unpacker, &mut *self.auth) {
				Ok(reply) => Ok(Some(reply)),
				Err(e) => {
					self.unpacker.skip_remaining();
					Err(e)
				},
			};
		}
	}

	// Send the packed call until a reply arrives or the overall timeout runs out
	fn transmit(&mut self, xid:u32) -> Result<ReplyMessage> {
		let deadline = Instant::now() + self.timeout;
		let mut resend_timeout = self.retransmission_timeout.max(Duration::from_millis(1));

		loop {
			send_datagram(self.socket.as_ref().ok_or(RpcError::Closed)?, self.packer.as_bytes(), self.server)?;

			let attempt_until = (Instant::now() + resend_timeout).min(deadline);
			if let Some(reply) = self.wait_for_reply(xid, attempt_until)? {
				return Ok(reply);
			}

			if Instant::now() >= deadline {
				warn!("no reply to xid {} from {} within {:?}", xid, self.server, self.timeout);
				return Err(RpcError::Timeout);
			}

			resend_timeout = self.retransmission_mode.next(resend_timeout);
			debug!("resending xid {} to {}, next wait {:?}", xid, self.server, resend_timeout);
		}
	}

}

impl Client for UdpClient {

	fn call(&mut self, procedure:u32, version:u32, params:&dyn XdrEncode, result:&mut dyn XdrDecode) -> Result<()> {
		let mut refreshes_left = 1;

		loop {
			// The datagram is built once and reused for every resend; only a refresh rebuilds it
			let xid = client::next_xid(&mut self.lastxid);
			let call = CallMessage::new(xid, self.prog, version, procedure);
			pack_call(&mut self.packer, &call, &*self.auth, params)?;

			let reply = self.transmit(xid)?;

			if !reply.successfully_accepted() {
				self.unpacker.skip_remaining();
				if reply.is_auth_error() && refreshes_left > 0 && self.auth.can_refresh() && self.auth.refresh() {
					refreshes_left -= 1;
					debug!("credential rejected for xid {}, retrying with a refreshed one", xid);
					continue;
				}
				return Err(reply.new_error().unwrap_or(RpcError::SystemError));
			}

			let decoded = result.unpack(&mut self.unpacker).map_err(RpcError::CannotDecodeResult);
			self.unpacker.skip_remaining();
			return decoded;
		}
	}

	fn set_auth(&mut self, auth:Box<dyn ClientAuth>) { self.auth = auth; }

	fn set_timeout(&mut self, timeout:Duration) { self.timeout = timeout; }
	fn timeout(&self) -> Duration { self.timeout }

	fn program(&self) -> u32 { self.prog }
	fn version(&self) -> u32 { self.vers }

	fn close(&mut self) -> Result<()> {
		self.socket = None;
		Ok(())
	}

}

// One reply to a broadcast call
pub struct BroadcastEvent<'a, P, R> {
	pub source: SocketAddr,
	pub procedure: u32,
	pub params: &'a P,
	pub reply: R,
}

pub struct BroadcastUdpClient {
	pub socket: UdpSocket,
	pub target: SocketAddr,
	pub prog: u32,
	pub vers: u32,
	pub lastxid: u32,
	auth: Box<dyn ClientAuth>,
	timeout: Duration,
	packer: Packer,
	unpacker: Unpacker,
	recv_buff: Vec<u8>,
}

impl BroadcastUdpClient {

	// https://stackoverflow.com/questions/61045602/how-do-you-broadcast-a-udp-datagram-and-receive-the-responses-in-rust?noredirect=1#comment107997707_61045602

	pub fn bind(port:u16, prog: u32, vers: u32) -> io::Result<Self> {
		Self::with_target(SocketAddr::from(([255, 255, 255, 255], port)), prog, vers, &ClientConfig::default())
	}

	// Any destination works, e.g. a subnet broadcast address or a single host
	pub fn with_target(target:SocketAddr, prog: u32, vers: u32, config:&ClientConfig) -> io::Result<Self> {
		let socket:UdpSocket = UdpSocket::bind(unspecified_for(&target))?;
		socket.set_broadcast(true)?;

		Ok(Self{
			socket,
			target,
			prog,
			vers,
			lastxid: client::initial_xid(),
			auth: Box::new(AuthNone),
			timeout: config.timeout(),
			packer: Packer::with_max_size(config.buffer_size),
			unpacker: Unpacker::new(),
			recv_buff: vec![0; config.buffer_size],
		})
	}

	pub fn set_auth(&mut self, auth:Box<dyn ClientAuth>) { self.auth = auth; }
	pub fn set_timeout(&mut self, timeout:Duration) { self.timeout = timeout; }

	// Send the call once, then hand every successfully accepted reply that arrives before the
	// timeout to `listener`.  Rejected or undecodable replies are skipped.  Returns the number of
	// replies delivered.
	pub fn broadcast_call<P, R, F>(&mut self, procedure:u32, params:&P, mut listener:F) -> Result<usize>
		where P: XdrEncode, R: XdrDecode + Default, F: FnMut(BroadcastEvent<'_, P, R>)
	{
		let xid = client::next_xid(&mut self.lastxid);
		let call = CallMessage::new(xid, self.prog, self.vers, procedure);
		pack_call(&mut self.packer, &call, &*self.auth, params)?;
		send_datagram(&self.socket, self.packer.as_bytes(), self.target)?;

		let deadline = Instant::now() + self.timeout;
		let mut delivered = 0;

		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining == Duration::from_secs(0) { return Ok(delivered); }
			self.socket.set_read_timeout(Some(remaining)).map_err(RpcError::CannotReceive)?;

			let (n, source) = match self.socket.recv_from(&mut self.recv_buff) {
				Ok(x) => x,
				Err(e) => match RpcError::receive(e) {
					RpcError::Timeout => return Ok(delivered),
					e => return Err(e),
				},
			};

			self.unpacker.reset(&self.recv_buff[0..n]);

			// Only keep messages with the correct xid
			if self.unpacker.peek_u32().ok() != Some(xid) { continue; }

			let reply = match ReplyMessage::decode(&mut self.unpacker, &mut *self.auth) {
				Ok(reply) if reply.successfully_accepted() => reply,
				Ok(reply) => {
					trace!("skipping {:?} from {}", reply.status, source);
					continue;
				},
				Err(e) => {
					trace!("skipping undecodable reply from {}: {}", source, e);
					continue;
				},
			};

			let mut result = R::default();
			if let Err(e) = result.unpack(&mut self.unpacker) {
				trace!("skipping reply {} from {} with bad result: {}", reply.xid, source, e);
				continue;
			}

			delivered += 1;
			listener(BroadcastEvent{ source, procedure, params, reply: result });
		}
	}

}
