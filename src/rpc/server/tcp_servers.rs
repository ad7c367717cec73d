
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::xdr::{Packer, Unpacker};
use crate::rpc::{Result, RpcError};
use crate::rpc::port_mapping::Protocol;
use crate::rpc::record;
use crate::rpc::tcp_clients::read_timeout;
use super::{Dispatcher, ProgramInfo, ReplySink, ServerTransport, is_transient_socket_error, serve_call};

const ACCEPT_BACKOFF:Duration = Duration::from_millis(100);

// Where to connect to reach a socket bound to `addr`, even if it is bound to the wildcard address
pub(crate) fn loopback_for(addr:SocketAddr) -> SocketAddr {
	match addr.ip() {
		IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port()),
		IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port()),
		_ => addr,
	}
}

struct RecordSink {
	stream: TcpStream,
	max_fragment_size: usize,
}

impl ReplySink for RecordSink {
	fn send_reply(&mut self, data:&[u8]) -> io::Result<()> {
		record::write_record(&mut self.stream, data, self.max_fragment_size)
	}
}

struct Shared {
	listener: TcpListener,
	local_addr: SocketAddr,
	infos: Vec<ProgramInfo>,
	dispatcher: Arc<dyn Dispatcher>,
	config: ServerConfig,
	closed: AtomicBool,
	next_id: AtomicU64,
	connections: Mutex<HashMap<u64, TcpStream>>,
}

// Listens for connections and serves each one on a thread of its own.  Open connections are tracked
// so that closing the listener closes them too.
pub struct TcpServerTransport {
	shared: Arc<Shared>,
	thread: Mutex<Option<JoinHandle<()>>>,
}

impl TcpServerTransport {

	pub fn bind<A: ToSocketAddrs>(addr:A, infos:Vec<ProgramInfo>, dispatcher:Arc<dyn Dispatcher>, config:ServerConfig) -> io::Result<Self> {
		let listener = TcpListener::bind(addr)?;
		let local_addr = listener.local_addr()?;
		debug!("TCP transport for {:?} bound to {}", infos, local_addr);

		let shared = Arc::new(Shared{
			listener,
			local_addr,
			infos,
			dispatcher,
			config,
			closed: AtomicBool::new(false),
			next_id: AtomicU64::new(0),
			connections: Mutex::new(HashMap::new()),
		});
		Ok(Self{ shared, thread: Mutex::new(None) })
	}

	pub fn connection_count(&self) -> usize { self.shared.connections.lock().len() }

}

impl Shared {

	fn accept_loop(self: &Arc<Self>) {
		for incoming in self.listener.incoming() {
			if self.closed.load(Ordering::SeqCst) { break; }

			let stream = match incoming {
				Ok(stream) => stream,
				Err(e) if is_transient_socket_error(&e) => {
					debug!("accept on {} failed: {}", self.local_addr, e);
					continue;
				},
				Err(e) => {
					// Typically out of file descriptors; give connections in flight a chance to finish
					warn!("accept on {} failed, pausing: {}", self.local_addr, e);
					thread::sleep(ACCEPT_BACKOFF);
					continue;
				},
			};

			if let Err(e) = self.start_connection(stream) {
				warn!("cannot serve new connection on {}: {}", self.local_addr, e);
			}
		}
		debug!("TCP listener on {} stopped", self.local_addr);
	}

	fn start_connection(self: &Arc<Self>, stream:TcpStream) -> io::Result<()> {
		let peer = stream.peer_addr()?;
		stream.set_nodelay(true)?;
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);

		{
			// Checked under the registry lock so that close() can't miss a connection
			let mut connections = self.connections.lock();
			if self.closed.load(Ordering::SeqCst) {
				let _ = stream.shutdown(Shutdown::Both);
				return Ok(());
			}
			connections.insert(id, stream.try_clone()?);
		}

		trace!("connection {} from {}", id, peer);
		let shared = Arc::clone(self);
		let spawned = thread::Builder::new()
			.name(format!("oncrpc-tcp-{}", id))
			.spawn(move || {
				shared.serve_connection(stream, peer);
				shared.connections.lock().remove(&id);
				trace!("connection {} from {} done", id, peer);
			});

		if let Err(e) = spawned {
			if let Some(stream) = self.connections.lock().remove(&id) {
				let _ = stream.shutdown(Shutdown::Both);
			}
			return Err(e);
		}
		Ok(())
	}

	fn serve_connection(&self, mut stream:TcpStream, peer:SocketAddr) {
		let mut sink = match stream.try_clone() {
			Ok(s) => RecordSink{ stream: s, max_fragment_size: self.config.max_fragment_size },
			Err(e) => {
				warn!("cannot serve {}: {}", peer, e);
				return;
			},
		};
		let mut unpacker = Unpacker::new();
		let mut packer = Packer::new();

		while !self.closed.load(Ordering::SeqCst) {
			// No timeout while idle; once a request starts arriving it has to arrive in full
			if stream.set_read_timeout(None).is_err() { break; }
			let first = match record::read_fragment_header(&mut stream) {
				Ok(first) => first,
				Err(e) => {
					if e.kind() == ErrorKind::UnexpectedEof { trace!("{} hung up", peer); }
					else { debug!("reading from {}: {}", peer, e); }
					break;
				},
			};

			if stream.set_read_timeout(read_timeout(self.config.transmission_timeout())).is_err() { break; }
			match record::read_record(&mut stream, first, self.config.max_record_size) {
				Ok(data) => unpacker.load(data),
				Err(e) => {
					debug!("reading from {}: {}", peer, e);
					break;
				},
			}

			if let Err(e) = serve_call(&*self.dispatcher, peer, &mut unpacker, &mut packer, &mut sink) {
				error!("closing connection from {}: {}", peer, e);
				break;
			}
		}

		let _ = stream.shutdown(Shutdown::Both);
	}

}

impl ServerTransport for TcpServerTransport {

	fn program_infos(&self) -> &[ProgramInfo] { &self.shared.infos }
	fn protocol(&self) -> Protocol { Protocol::TCP }
	fn local_addr(&self) -> SocketAddr { self.shared.local_addr }
	fn config(&self) -> &ServerConfig { &self.shared.config }

	fn listen(&self) -> Result<()> {
		let mut running = self.thread.lock();
		if running.is_some() { return Ok(()); }
		if self.shared.closed.load(Ordering::SeqCst) { return Err(RpcError::Closed); }

		let shared = Arc::clone(&self.shared);
		let handle = thread::Builder::new()
			.name(format!("oncrpc-tcp-listen-{}", self.shared.local_addr.port()))
			.spawn(move || shared.accept_loop())
			.map_err(RpcError::CannotReceive)?;
		*running = Some(handle);

		info!("serving {:?} over TCP on {}", self.shared.infos, self.shared.local_addr);
		Ok(())
	}

	fn close(&self) {
		if self.shared.closed.swap(true, Ordering::SeqCst) { return; }

		// Wake the accept loop; it sees the flag and stops
		if let Err(e) = TcpStream::connect(loopback_for(self.shared.local_addr)) {
			debug!("waking TCP listener on {}: {}", self.shared.local_addr, e);
		}

		for (_, stream) in self.shared.connections.lock().drain() {
			let _ = stream.shutdown(Shutdown::Both);
		}

		if let Some(handle) = self.thread.lock().take() {
			let _ = handle.join();
		}
		debug!("TCP transport on {} closed", self.shared.local_addr);
	}

}

impl Drop for TcpServerTransport {
	fn drop(&mut self) { self.close(); }
}
