mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use oncrpc::rpc::{self, CallHandler, Client, RpcError, TcpClient, UdpClient};
use oncrpc::rpc::auth::{AuthStatus, AuthUnix, ServerAuth};

use common::*;

#[derive(Default)]
struct Counts {
	unix: AtomicUsize,
	short: AtomicUsize,
}

// Issues a shorthand token to every Unix credential it accepts.  Shorthand tokens are never
// recognized, as if the server had restarted.  After `accept_unix` Unix credentials it rejects
// those too.
fn forgetful(counts:Arc<Counts>, accept_unix:usize) -> impl Fn(&mut CallHandler<'_>, u32, u32, u32) -> rpc::Result<()> + Send + Sync {
	move |call:&mut CallHandler<'_>, _:u32, _:u32, _:u32| -> rpc::Result<()> {
		let uid = match call.auth() {
			ServerAuth::Unix{ credential, .. } => {
				if counts.unix.fetch_add(1, Ordering::SeqCst) >= accept_unix {
					return Err(RpcError::Authentication(AuthStatus::RejectedCredential));
				}
				credential.uid
			},
			ServerAuth::Short{ .. } => {
				counts.short.fetch_add(1, Ordering::SeqCst);
				return Err(RpcError::Authentication(AuthStatus::RejectedCredential));
			},
			ServerAuth::None => return Err(RpcError::Authentication(AuthStatus::TooWeak)),
		};

		call.retrieve_call(&mut ())?;
		call.set_shorthand_verifier(b"tok1")?;
		call.reply(&(uid as u32))
	}
}

#[test]
fn test_stale_shorthand_is_refreshed_once() {
	let counts = Arc::new(Counts::default());
	let (_server, addr) = tcp_server(Arc::new(forgetful(Arc::clone(&counts), usize::MAX)));

	let mut client = TcpClient::connect(addr, ECHO_PROG, 1).unwrap();
	client.set_auth(Box::new(AuthUnix::new("tester", 1234, 100, &[100, 200])));

	let mut uid = 0u32;
	client.call_default(0, &(), &mut uid).unwrap();
	assert_eq!(uid, 1234);
	assert_eq!(counts.unix.load(Ordering::SeqCst), 1);

	// The cached token is rejected, the full credential goes out again and is accepted
	uid = 0;
	client.call_default(0, &(), &mut uid).unwrap();
	assert_eq!(uid, 1234);
	assert_eq!(counts.short.load(Ordering::SeqCst), 1);
	assert_eq!(counts.unix.load(Ordering::SeqCst), 2);
}

#[test]
fn test_refresh_is_not_repeated() {
	let counts = Arc::new(Counts::default());
	let (_server, addr) = udp_server(Arc::new(forgetful(Arc::clone(&counts), 1)));

	let mut client = UdpClient::connect(addr, ECHO_PROG, 1).unwrap();
	client.set_timeout(std::time::Duration::from_secs(2));
	client.set_auth(Box::new(AuthUnix::new("tester", 1, 1, &[])));

	let mut uid = 0u32;
	client.call_default(0, &(), &mut uid).unwrap();

	// Shorthand rejected, refreshed Unix credential rejected too: the error surfaces after one retry
	let err = client.call_default(0, &(), &mut uid).unwrap_err();
	assert!(matches!(err, RpcError::Authentication(AuthStatus::RejectedCredential)));
	assert_eq!(counts.short.load(Ordering::SeqCst), 1);
	assert_eq!(counts.unix.load(Ordering::SeqCst), 2);
}

#[test]
fn test_null_credential_is_not_retried() {
	let counts = Arc::new(Counts::default());
	let (_server, addr) = tcp_server(Arc::new(forgetful(Arc::clone(&counts), usize::MAX)));

	let mut client = TcpClient::connect(addr, ECHO_PROG, 1).unwrap();
	let err = client.call_default(0, &(), &mut ()).unwrap_err();
	assert!(matches!(err, RpcError::Authentication(AuthStatus::TooWeak)));
	assert_eq!(counts.unix.load(Ordering::SeqCst) + counts.short.load(Ordering::SeqCst), 0);
}
