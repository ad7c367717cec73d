// What every client transport offers, regardless of how its bytes travel

use std::time::Duration;

use parking_lot::Mutex;

use crate::xdr::{XdrEncode, XdrDecode};
use super::Result;
use super::auth::ClientAuth;

pub trait Client: Send {

	// Call `procedure` of version `version` of the client's program.  `params` is encoded after the
	// call header and, if the reply was successfully accepted, `result` is decoded from it.
	fn call(&mut self, procedure:u32, version:u32, params:&dyn XdrEncode, result:&mut dyn XdrDecode) -> Result<()>;

	// Same, for the version the client was created for
	fn call_default(&mut self, procedure:u32, params:&dyn XdrEncode, result:&mut dyn XdrDecode) -> Result<()> {
		let version = self.version();
		self.call(procedure, version, params, result)
	}

	fn set_auth(&mut self, auth:Box<dyn ClientAuth>);

	fn set_timeout(&mut self, timeout:Duration);
	fn timeout(&self) -> Duration;

	fn program(&self) -> u32;
	fn version(&self) -> u32;

	// Release the socket.  Calling it twice is harmless; calls after it fail with RpcError::Closed
	fn close(&mut self) -> Result<()>;

}

// Message ids start at a random value so that a restarted client doesn't reuse recent ids
pub(crate) fn initial_xid() -> u32 { rand::random::<u32>() }

pub(crate) fn next_xid(lastxid:&mut u32) -> u32 {
	*lastxid = lastxid.wrapping_add(1);
	*lastxid
}

// A client that can be shared between threads.  Calls are serialized: a second caller waits until
// the first one's send and receive are both done.
pub struct SharedClient<C: Client> {
	inner: Mutex<C>,
}

impl<C: Client> SharedClient<C> {

	pub fn new(client:C) -> Self { Self{ inner: Mutex::new(client) } }

	pub fn call(&self, procedure:u32, version:u32, params:&dyn XdrEncode, result:&mut dyn XdrDecode) -> Result<()> {
		self.inner.lock().call(procedure, version, params, result)
	}

	pub fn call_default(&self, procedure:u32, params:&dyn XdrEncode, result:&mut dyn XdrDecode) -> Result<()> {
		self.inner.lock().call_default(procedure, params, result)
	}

	pub fn set_auth(&self, auth:Box<dyn ClientAuth>) { self.inner.lock().set_auth(auth) }
	pub fn set_timeout(&self, timeout:Duration) { self.inner.lock().set_timeout(timeout) }

	// Direct access for anything the trait doesn't cover, e.g. TCP batching
	pub fn with<T, F: FnOnce(&mut C) -> T>(&self, f:F) -> T { f(&mut self.inner.lock()) }

	pub fn close(&self) -> Result<()> { self.inner.lock().close() }

	pub fn into_inner(self) -> C { self.inner.into_inner() }

}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::thread;
	use crate::rpc::RpcError;

	// Records how many callers were inside `call` at once
	struct Tracker { inside: Arc<std::sync::atomic::AtomicUsize>, max_seen: usize, calls: u32 }

	impl Client for Tracker {
		fn call(&mut self, _:u32, _:u32, _:&dyn XdrEncode, _:&mut dyn XdrDecode) -> Result<()> {
			use std::sync::atomic::Ordering;
			let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
			self.max_seen = self.max_seen.max(now);
			thread::sleep(Duration::from_millis(2));
			self.calls += 1;
			self.inside.fetch_sub(1, Ordering::SeqCst);
			Ok(())
		}
		fn set_auth(&mut self, _:Box<dyn ClientAuth>) {}
		fn set_timeout(&mut self, _:Duration) {}
		fn timeout(&self) -> Duration { Duration::from_secs(1) }
		fn program(&self) -> u32 { 1 }
		fn version(&self) -> u32 { 1 }
		fn close(&mut self) -> Result<()> { Err(RpcError::Closed) }
	}

	#[test]
	fn test_shared_client_serializes_calls() {
		let tracker = Tracker{ inside: Arc::new(Default::default()), max_seen: 0, calls: 0 };
		let shared = Arc::new(SharedClient::new(tracker));

		let handles:Vec<_> = (0..4).map(|_| {
			let shared = Arc::clone(&shared);
			thread::spawn(move || for _ in 0..5 { shared.call_default(0, &(), &mut ()).unwrap(); })
		}).collect();
		for h in handles { h.join().unwrap(); }

		let tracker = Arc::try_unwrap(shared).ok().unwrap().into_inner();
		assert_eq!(tracker.calls, 20);
		assert_eq!(tracker.max_seen, 1);
	}

	#[test]
	fn test_xid_wraps() {
		let mut lastxid = u32::MAX;
		assert_eq!(next_xid(&mut lastxid), 0);
		assert_eq!(next_xid(&mut lastxid), 1);
	}
}
