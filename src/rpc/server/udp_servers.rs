
use std::io;
use std::net::{SocketAddr, UdpSocket, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace};

use crate::config::ServerConfig;
use crate::xdr::{Packer, Unpacker};
use crate::rpc::{Result, RpcError};
use crate::rpc::port_mapping::Protocol;
use super::{Dispatcher, ProgramInfo, ReplySink, ServerTransport, is_transient_socket_error, serve_call};
use super::tcp_servers::loopback_for;

struct DatagramSink<'a> {
	socket: &'a UdpSocket,
	peer: SocketAddr,
}

impl ReplySink for DatagramSink<'_> {
	fn send_reply(&mut self, data:&[u8]) -> io::Result<()> {
		self.socket.send_to(data, self.peer).map(|_| ())
	}

	// A datagram only leaves once the reply is complete
	fn can_restart_reply(&self) -> bool { true }
}

struct Shared {
	socket: UdpSocket,
	local_addr: SocketAddr,
	infos: Vec<ProgramInfo>,
	dispatcher: Arc<dyn Dispatcher>,
	config: ServerConfig,
	closed: AtomicBool,
}

// One socket, one thread, one call at a time
pub struct UdpServerTransport {
	shared: Arc<Shared>,
	thread: Mutex<Option<JoinHandle<()>>>,
}

impl UdpServerTransport {

	pub fn bind<A: ToSocketAddrs>(addr:A, infos:Vec<ProgramInfo>, dispatcher:Arc<dyn Dispatcher>, config:ServerConfig) -> io::Result<Self> {
		let socket = UdpSocket::bind(addr)?;
		let local_addr = socket.local_addr()?;
		debug!("UDP transport for {:?} bound to {}", infos, local_addr);

		let shared = Arc::new(Shared{ socket, local_addr, infos, dispatcher, config, closed: AtomicBool::new(false) });
		Ok(Self{ shared, thread: Mutex::new(None) })
	}

}

impl Shared {

	fn receive_loop(&self) {
		let mut recv_buff = vec![0u8; self.config.buffer_size];
		let mut unpacker = Unpacker::new();
		let mut packer = Packer::with_max_size(self.config.buffer_size);

		loop {
			let received = self.socket.recv_from(&mut recv_buff);
			if self.closed.load(Ordering::SeqCst) { break; }

			let (n, peer) = match received {
				Ok(x) => x,
				Err(e) if is_transient_socket_error(&e) => {
					// e.g. an ICMP port unreachable left over from an earlier reply
					debug!("receive on {} failed: {}", self.local_addr, e);
					continue;
				},
				Err(e) => {
					error!("receive on {} failed, stopping: {}", self.local_addr, e);
					break;
				},
			};

			trace!("{} byte datagram from {}", n, peer);
			unpacker.reset(&recv_buff[0..n]);
			let mut sink = DatagramSink{ socket: &self.socket, peer };

			// Nothing to close here, a failed reply only costs this one call
			match serve_call(&*self.dispatcher, peer, &mut unpacker, &mut packer, &mut sink) {
				Ok(()) => {},
				Err(RpcError::CannotSend(e)) if !is_transient_socket_error(&e) => {
					error!("replying to {} failed, stopping: {}", peer, e);
					break;
				},
				Err(e) => error!("call from {} abandoned: {}", peer, e),
			}
		}
		debug!("UDP transport on {} stopped", self.local_addr);
	}

}

impl ServerTransport for UdpServerTransport {

	fn program_infos(&self) -> &[ProgramInfo] { &self.shared.infos }
	fn protocol(&self) -> Protocol { Protocol::UDP }
	fn local_addr(&self) -> SocketAddr { self.shared.local_addr }
	fn config(&self) -> &ServerConfig { &self.shared.config }

	fn listen(&self) -> Result<()> {
		let mut running = self.thread.lock();
		if running.is_some() { return Ok(()); }
		if self.shared.closed.load(Ordering::SeqCst) { return Err(RpcError::Closed); }

		let shared = Arc::clone(&self.shared);
		let handle = thread::Builder::new()
			.name(format!("oncrpc-udp-{}", self.shared.local_addr.port()))
			.spawn(move || shared.receive_loop())
			.map_err(RpcError::CannotReceive)?;
		*running = Some(handle);

		info!("serving {:?} over UDP on {}", self.shared.infos, self.shared.local_addr);
		Ok(())
	}

	fn close(&self) {
		if self.shared.closed.swap(true, Ordering::SeqCst) { return; }

		// An empty datagram wakes the receive loop, which then sees the flag
		let wake = loopback_for(self.shared.local_addr);
		if let Err(e) = self.shared.socket.send_to(&[], wake) {
			debug!("waking UDP transport on {}: {}", self.shared.local_addr, e);
		}

		if let Some(handle) = self.thread.lock().take() {
			let _ = handle.join();
		}
		debug!("UDP transport on {} closed", self.shared.local_addr);
	}

}

impl Drop for UdpServerTransport {
	fn drop(&mut self) { self.close(); }
}
