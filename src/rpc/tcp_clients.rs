
use std::io::{self, BufWriter, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::xdr::{Packer, Unpacker, XdrEncode, XdrDecode};
use super::{Result, RpcError};
use super::auth::{ClientAuth, AuthNone};
use super::client::{self, Client};
use super::message::{CallMessage, ReplyMessage};
use super::record;

// std refuses a zero read timeout, and for us zero means "don't wait at all" anyway
pub(crate) fn read_timeout(d:Duration) -> Option<Duration> {
	if d == Duration::from_secs(0) { None } else { Some(d) }
}

fn read_whole_record(stream:&mut TcpStream, transmission_timeout:Duration, max_record_size:usize) -> io::Result<Vec<u8>> {
	stream.set_read_timeout(read_timeout(transmission_timeout))?;
	let first = record::read_fragment_header(stream)?;
	record::read_record(stream, first, max_record_size)
}

// One connection, one call at a time.  Replies carrying a stale message id are skipped.
pub struct TcpClient {
	stream: Option<TcpStream>,
	writer: Option<BufWriter<TcpStream>>,
	pub prog: u32,
	pub vers: u32,
	pub lastxid: u32,
	auth: Box<dyn ClientAuth>,
	timeout: Duration,
	transmission_timeout: Duration,
	max_fragment_size: usize,
	max_record_size: usize,
	packer: Packer,
	unpacker: Unpacker,
}

impl TcpClient {

	pub fn connect<A: ToSocketAddrs>(addr: A, prog: u32, vers: u32) -> io::Result<Self> {
		Self::with_config(addr, prog, vers, &ClientConfig::default())
	}

	pub fn with_config<A: ToSocketAddrs>(addr: A, prog: u32, vers: u32, config:&ClientConfig) -> io::Result<Self> {
		Self::from_stream(TcpStream::connect(addr)?, prog, vers, config)
	}

	pub fn from_stream(stream: TcpStream, prog: u32, vers: u32, config:&ClientConfig) -> io::Result<Self> {
		stream.set_nodelay(true)?;
		let writer = BufWriter::new(stream.try_clone()?);
		debug!("TCP client for program {} version {} connected to {:?}", prog, vers, stream.peer_addr().ok());

		Ok(Self{
			stream: Some(stream),
			writer: Some(writer),
			prog,
			vers,
			lastxid: client::initial_xid(),
			auth: Box::new(AuthNone),
			timeout: config.timeout(),
			transmission_timeout: config.transmission_timeout(),
			max_fragment_size: config.max_fragment_size,
			max_record_size: config.max_record_size,
			packer: Packer::new(),
			unpacker: Unpacker::new(),
		})
	}

	pub fn peer_addr(&self) -> Result<SocketAddr> {
		self.stream.as_ref().ok_or(RpcError::Closed)?.peer_addr().map_err(RpcError::CannotReceive)
	}

	pub fn set_transmission_timeout(&mut self, timeout:Duration) { self.transmission_timeout = timeout; }

	// Encode one call and hand it to the send buffer, pushing it onto the wire only if asked to
	fn send_call(&mut self, xid:u32, procedure:u32, version:u32, params:&dyn XdrEncode, flush:bool) -> Result<()> {
		let writer = self.writer.as_mut().ok_or(RpcError::Closed)?;

		self.packer.reset();
		CallMessage::new(xid, self.prog, version, procedure).encode(&mut self.packer, &*self.auth)?;
		params.pack(&mut self.packer).map_err(RpcError::CannotEncodeArgs)?;

		record::write_record(writer, self.packer.as_bytes(), self.max_fragment_size).map_err(RpcError::CannotSend)?;
		if flush {
			writer.flush().map_err(RpcError::CannotSend)?;
		}
		Ok(())
	}

	// Read records until one answers `xid`; its header is decoded and the unpacker is left at the result.
	// A record that fails partway drops the connection, the stream can't be resynchronized after it.
	fn receive_reply(&mut self, xid:u32) -> Result<ReplyMessage> {
		let deadline = Instant::now() + self.timeout;

		loop {
			let stream = self.stream.as_mut().ok_or(RpcError::Closed)?;

			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining == Duration::from_secs(0) { return Err(RpcError::Timeout); }

			// Waiting for the first byte consumes nothing, so running out of time here is harmless
			stream.set_read_timeout(Some(remaining)).map_err(RpcError::CannotReceive)?;
			match stream.peek(&mut [0u8; 1]) {
				Ok(0) => {
					self.disconnect();
					return Err(RpcError::CannotReceive(io::Error::new(ErrorKind::UnexpectedEof, "server hung up")));
				},
				Ok(_) => {},
				Err(e) if e.kind() == ErrorKind::Interrupted => continue,
				Err(e) => return Err(RpcError::receive(e)),
			}

			// Once a reply started arriving the rest of it gets the transmission timeout
			let received = read_whole_record(stream, self.transmission_timeout, self.max_record_size);
			let data = match received {
				Ok(data) => data,
				Err(e) => {
					debug!("reply for xid {} broken off: {}", xid, e);
					self.disconnect();
					return Err(RpcError::receive(e));
				},
			};
			self.unpacker.load(data);

			let reply_xid = match self.unpacker.peek_u32() {
				Ok(x) => x,
				Err(_) => {
					trace!("discarding a record too short to carry an xid");
					self.unpacker.skip_remaining();
					continue;
				},
			};
			if reply_xid != xid {
				trace!("discarding reply with xid {} while waiting for {}", reply_xid, xid);
				self.unpacker.skip_remaining();
				continue;
			}

			return match ReplyMessage::decode(&mut self.unpacker, &mut *self.auth) {
				Ok(reply) => Ok(reply),
				Err(e) => {
					self.unpacker.skip_remaining();
					Err(e)
				},
			};
		}
	}

	fn disconnect(&mut self) {
		self.writer = None;
		if let Some(stream) = self.stream.take() {
			let _ = stream.shutdown(Shutdown::Both);
		}
	}

	// Send a call without waiting for its reply.  Only the last call of a batch may expect a reply;
	// pass flush=false to accumulate several calls into one write.
	pub fn batch_call(&mut self, procedure:u32, params:&dyn XdrEncode, flush:bool) -> Result<()> {
		let xid = client::next_xid(&mut self.lastxid);
		let version = self.vers;
		self.send_call(xid, procedure, version, params, flush)
	}

	pub fn flush(&mut self) -> Result<()> {
		self.writer.as_mut().ok_or(RpcError::Closed)?.flush().map_err(RpcError::CannotSend)
	}

}

impl Client for TcpClient {

	fn call(&mut self, procedure:u32, version:u32, params:&dyn XdrEncode, result:&mut dyn XdrDecode) -> Result<()> {
		let mut refreshes_left = 1;

		loop {
			let xid = client::next_xid(&mut self.lastxid);

			// A zero timeout means the caller is batching: buffer the call and don't wait for anything
			let batching = self.timeout == Duration::from_secs(0);
			self.send_call(xid, procedure, version, params, !batching)?;
			if batching { return Ok(()); }

			let reply = self.receive_reply(xid)?;

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
		if let Some(mut writer) = self.writer.take() {
			let _ = writer.flush();
		}
		self.disconnect();
		Ok(())
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::TcpListener;
	use std::thread;
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use crate::rpc::auth::{AuthStatus, ServerAuth};
	use crate::rpc::message::{AcceptStatus, RejectStatus};

	// Answers each of `calls` calls on one connection with the records `answer` builds, then hangs up
	fn one_shot_server<F>(calls:usize, answer:F) -> SocketAddr
		where F: Fn(&CallMessage, &mut Unpacker) -> Vec<Packer> + Send + 'static
	{
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		thread::spawn(move || {
			let (mut stream, _) = listener.accept().unwrap();
			for _ in 0..calls {
				let first = record::read_fragment_header(&mut stream).unwrap();
				let data = record::read_record(&mut stream, first, 1 << 16).unwrap();
				let mut unpacker = Unpacker::from_bytes(&data);
				let (call, _) = CallMessage::decode(&mut unpacker).unwrap();
				for packer in answer(&call, &mut unpacker) {
					record::write_record(&mut stream, packer.as_bytes(), 1024).unwrap();
				}
			}
			// Keep the connection open for a while so that silence isn't mistaken for a hang up
			thread::sleep(Duration::from_millis(500));
		});
		addr
	}

	fn reply_u32(xid:u32, x:u32) -> Packer {
		let mut packer = Packer::new();
		ReplyMessage::success(xid).encode(&mut packer, Some(&ServerAuth::None)).unwrap();
		packer.pack_u32(x).unwrap();
		packer
	}

	#[test]
	fn test_stale_replies_are_skipped() {
		let addr = one_shot_server(1, |call, unpacker| {
			let x = unpacker.unpack_u32().unwrap();
			// A late reply to some earlier call arrives first
			vec![reply_u32(call.xid.wrapping_sub(1), 0), reply_u32(call.xid, x + 1)]
		});

		let mut client = TcpClient::connect(addr, 1, 1).unwrap();
		let mut answer = 0u32;
		client.call(1, 1, &41u32, &mut answer).unwrap();
		assert_eq!(answer, 42);
	}

	#[test]
	fn test_rejection_becomes_typed_error() {
		let addr = one_shot_server(1, |call, _| {
			let mut packer = Packer::new();
			ReplyMessage::accepted(call.xid, AcceptStatus::ProcedureUnavailable).encode(&mut packer, None).unwrap();
			vec![packer]
		});

		let mut client = TcpClient::connect(addr, 1, 1).unwrap();
		assert!(matches!(client.call(9, 1, &(), &mut ()), Err(RpcError::ProcedureUnavailable)));
	}

	#[test]
	fn test_batched_calls_share_one_reply() {
		let addr = one_shot_server(3, |call, unpacker| {
			let x = unpacker.unpack_u32().unwrap();
			// Only the last call of the batch gets answered
			if x == 3 { vec![reply_u32(call.xid, 300)] } else { vec![] }
		});

		let mut client = TcpClient::connect(addr, 1, 1).unwrap();
		client.batch_call(1, &1u32, false).unwrap();
		client.batch_call(1, &2u32, false).unwrap();

		let mut answer = 0u32;
		client.call(1, 1, &3u32, &mut answer).unwrap();
		assert_eq!(answer, 300);
	}

	#[test]
	fn test_no_reply_times_out() {
		let addr = one_shot_server(1, |_, _| vec![]);
		let mut client = TcpClient::connect(addr, 1, 1).unwrap();
		client.set_timeout(Duration::from_millis(100));
		assert!(matches!(client.call(1, 1, &(), &mut ()), Err(RpcError::Timeout)));
	}

	#[test]
	fn test_calls_after_close_fail() {
		let addr = one_shot_server(0, |_, _| vec![]);
		let mut client = TcpClient::connect(addr, 1, 1).unwrap();
		client.close().unwrap();
		client.close().unwrap();
		assert!(matches!(client.call(0, 1, &(), &mut ()), Err(RpcError::Closed)));
	}

	// Reads one call off the stream and returns its xid
	fn read_call(stream:&mut TcpStream) -> io::Result<u32> {
		let first = record::read_fragment_header(stream)?;
		let data = record::read_record(stream, first, 1 << 16)?;
		let (call, _) = CallMessage::decode(&mut Unpacker::from_bytes(&data))
			.map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
		Ok(call.xid)
	}

	#[test]
	fn test_reply_broken_off_drops_connection() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		thread::spawn(move || {
			let (mut stream, _) = listener.accept().unwrap();
			let xid = read_call(&mut stream).unwrap();
			let mut framed = vec![];
			record::write_record(&mut framed, reply_u32(xid, 1).as_bytes(), 1024).unwrap();

			// The header and part of the body, then a stall longer than the transmission timeout
			stream.write_all(&framed[0..10]).unwrap();
			thread::sleep(Duration::from_millis(400));
			let _ = stream.write_all(&framed[10..]);

			// A well-formed answer to a second call must not be read against the leftovers
			if let Ok(xid) = read_call(&mut stream) {
				let _ = record::write_record(&mut stream, reply_u32(xid, 2).as_bytes(), 1024);
			}
		});

		let mut client = TcpClient::connect(addr, 1, 1).unwrap();
		client.set_timeout(Duration::from_secs(2));
		client.set_transmission_timeout(Duration::from_millis(100));

		let mut x = 0u32;
		assert!(matches!(client.call(1, 1, &(), &mut x), Err(RpcError::Timeout)));
		assert!(matches!(client.call(1, 1, &(), &mut x), Err(RpcError::Closed)));
		assert_eq!(x, 0);
	}

	#[test]
	fn test_runt_record_is_discarded() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		thread::spawn(move || {
			let (mut stream, _) = listener.accept().unwrap();
			let xid = read_call(&mut stream).unwrap();
			record::write_record(&mut stream, &[1, 2], 1024).unwrap();
			record::write_record(&mut stream, reply_u32(xid, 5).as_bytes(), 1024).unwrap();
			thread::sleep(Duration::from_millis(500));
		});

		let mut client = TcpClient::connect(addr, 1, 1).unwrap();
		let mut x = 0u32;
		client.call(1, 1, &(), &mut x).unwrap();
		assert_eq!(x, 5);
	}

	// Claims it can't refresh, and counts the refreshes it is asked for anyway
	struct Unrefreshable(Arc<AtomicUsize>);

	impl ClientAuth for Unrefreshable {
		fn encode_credential_and_verifier(&self, packer:&mut Packer) -> Result<()> { AuthNone.encode_credential_and_verifier(packer) }
		fn decode_verifier(&mut self, unpacker:&mut Unpacker) -> Result<()> { AuthNone.decode_verifier(unpacker) }
		fn can_refresh(&self) -> bool { false }
		fn refresh(&mut self) -> bool {
			self.0.fetch_add(1, Ordering::SeqCst);
			true
		}
	}

	#[test]
	fn test_no_refresh_without_can_refresh() {
		let addr = one_shot_server(2, |call, _| {
			let mut packer = Packer::new();
			ReplyMessage::denied(call.xid, RejectStatus::AuthError(AuthStatus::RejectedCredential)).encode(&mut packer, None).unwrap();
			vec![packer]
		});

		let refreshes = Arc::new(AtomicUsize::new(0));
		let mut client = TcpClient::connect(addr, 1, 1).unwrap();
		client.set_auth(Box::new(Unrefreshable(Arc::clone(&refreshes))));
		assert!(matches!(client.call(1, 1, &(), &mut ()), Err(RpcError::Authentication(AuthStatus::RejectedCredential))));
		assert_eq!(refreshes.load(Ordering::SeqCst), 0);
	}
}
