// Runs a set of transports for as long as the process wants to serve

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::rpc::Result;
use super::{Dispatcher, ProgramInfo, ServerTransport, TcpServerTransport, UdpServerTransport};

// Set once, from any thread; waiters wake up when it is
#[derive(Default)]
pub struct ShutdownSignal {
	triggered: Mutex<bool>,
	cond: Condvar,
}

impl ShutdownSignal {

	pub fn new() -> Self { Self::default() }

	pub fn trigger(&self) {
		*self.triggered.lock() = true;
		self.cond.notify_all();
	}

	pub fn is_triggered(&self) -> bool { *self.triggered.lock() }

	pub fn wait(&self) {
		let mut triggered = self.triggered.lock();
		while !*triggered {
			self.cond.wait(&mut triggered);
		}
	}

	// Returns whether the signal was triggered within `timeout`
	pub fn wait_timeout(&self, timeout:Duration) -> bool {
		let mut triggered = self.triggered.lock();
		if !*triggered {
			self.cond.wait_for(&mut triggered, timeout);
		}
		*triggered
	}

}

pub struct RpcServer {
	transports: Vec<Box<dyn ServerTransport>>,
	config: ServerConfig,
	shutdown: Arc<ShutdownSignal>,
}

impl RpcServer {

	pub fn new(config:ServerConfig) -> Self {
		Self{ transports: vec![], config, shutdown: Arc::new(ShutdownSignal::new()) }
	}

	pub fn add_transport(&mut self, transport:Box<dyn ServerTransport>) { self.transports.push(transport); }

	// Serve `infos` over TCP on `port`; 0 picks a free port
	pub fn bind_tcp(&mut self, port:u16, infos:Vec<ProgramInfo>, dispatcher:Arc<dyn Dispatcher>) -> io::Result<SocketAddr> {
		let transport = TcpServerTransport::bind(("0.0.0.0", port), infos, dispatcher, self.config.clone())?;
		let addr = transport.local_addr();
		self.add_transport(Box::new(transport));
		Ok(addr)
	}

	pub fn bind_udp(&mut self, port:u16, infos:Vec<ProgramInfo>, dispatcher:Arc<dyn Dispatcher>) -> io::Result<SocketAddr> {
		let transport = UdpServerTransport::bind(("0.0.0.0", port), infos, dispatcher, self.config.clone())?;
		let addr = transport.local_addr();
		self.add_transport(Box::new(transport));
		Ok(addr)
	}

	pub fn transports(&self) -> &[Box<dyn ServerTransport>] { &self.transports }

	// For stopping the server from a thread that doesn't own it, e.g. a signal handler
	pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> { Arc::clone(&self.shutdown) }

	// Register, serve until stop() is called, then unregister and close everything.  Blocks.
	pub fn run(&self) -> Result<()> {
		let registering = self.config.register_with_portmapper;

		if registering {
			self.unregister_all();
			for transport in self.transports.iter() {
				if let Err(e) = transport.register() {
					warn!("registration failed, shutting down: {}", e);
					self.unregister_all();
					self.close_all();
					return Err(e);
				}
			}
		}

		for transport in self.transports.iter() {
			if let Err(e) = transport.listen() {
				self.close_all();
				if registering { self.unregister_all(); }
				return Err(e);
			}
		}

		info!("server running with {} transports", self.transports.len());
		self.shutdown.wait();
		info!("server shutting down");

		if registering { self.unregister_all(); }
		self.close_all();
		Ok(())
	}

	pub fn stop(&self) { self.shutdown.trigger(); }

	fn unregister_all(&self) {
		for transport in self.transports.iter() { transport.unregister(); }
	}

	fn close_all(&self) {
		for transport in self.transports.iter() { transport.close(); }
	}

}
