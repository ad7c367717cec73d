mod common;

use std::io::Read;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use oncrpc::rpc::{Client, RpcError, SharedClient, TcpClient, UdpClient};
use oncrpc::rpc::{CallMessage, ReplyMessage};
use oncrpc::rpc::auth::AuthNone;
use oncrpc::rpc::record;
use oncrpc::xdr::{Packer, Unpacker};

use common::*;

const HELLO:&str = "Hello, Remote Tea!";

#[test]
fn test_echo_over_tcp() {
	let (_server, addr) = tcp_server(Arc::new(echo));
	let mut client = TcpClient::connect(addr, ECHO_PROG, 1).unwrap();

	client.call_default(ECHOPROC_NULL, &(), &mut ()).unwrap();

	let mut answer = String::new();
	client.call_default(ECHOPROC_ECHO, &HELLO.to_owned(), &mut answer).unwrap();
	assert_eq!(answer.as_bytes(), HELLO.as_bytes());
}

#[test]
fn test_echo_over_udp() {
	let (_server, addr) = udp_server(Arc::new(echo));
	let mut client = UdpClient::connect(addr, ECHO_PROG, 1).unwrap();
	client.set_timeout(Duration::from_secs(2));

	let mut answer = String::new();
	client.call_default(ECHOPROC_ECHO, &HELLO.to_owned(), &mut answer).unwrap();
	assert_eq!(answer, HELLO);
}

#[test]
fn test_version_mismatch() {
	let (_server, addr) = tcp_server(Arc::new(echo));
	let mut client = TcpClient::connect(addr, ECHO_PROG, 1).unwrap();

	match client.call(ECHOPROC_NULL, 99, &(), &mut ()) {
		Err(RpcError::ProgramVersionMismatch{ low, high }) => assert_eq!((low, high), (1, 2)),
		other => panic!("expected a version mismatch, got {:?}", other),
	}

	// Version 2 is served
	client.call(ECHOPROC_NULL, 2, &(), &mut ()).unwrap();
}

#[test]
fn test_unknown_program_and_procedure() {
	let (_server, addr) = tcp_server(Arc::new(echo));

	let mut client = TcpClient::connect(addr, 7, 1).unwrap();
	assert!(matches!(client.call_default(0, &(), &mut ()), Err(RpcError::ProgramUnavailable)));

	let mut client = TcpClient::connect(addr, ECHO_PROG, 1).unwrap();
	let err = client.call_default(42, &(), &mut ()).unwrap_err();
	assert!(matches!(err, RpcError::ProcedureUnavailable));
	assert!(err.is_permanent());
}

#[test]
fn test_malformed_header_keeps_connection() {
	let (_server, addr) = tcp_server(Arc::new(echo));
	let mut stream = TcpStream::connect(addr).unwrap();
	stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

	// RPC version 3 is nobody's business; the request is dropped without a reply
	let mut bad = Packer::new();
	for &w in &[1u32, 0, 3, ECHO_PROG, 1, ECHOPROC_NULL, 0, 0, 0, 0] { bad.pack_u32(w).unwrap(); }
	record::write_record(&mut stream, bad.as_bytes(), 1024).unwrap();

	let mut good = Packer::new();
	CallMessage::new(2, ECHO_PROG, 1, ECHOPROC_ECHO).encode(&mut good, &AuthNone).unwrap();
	good.pack_string(HELLO).unwrap();
	record::write_record(&mut stream, good.as_bytes(), 1024).unwrap();

	let first = record::read_fragment_header(&mut stream).unwrap();
	let data = record::read_record(&mut stream, first, 1 << 16).unwrap();
	let mut unpacker = Unpacker::from_bytes(&data);
	let reply = ReplyMessage::decode(&mut unpacker, &mut AuthNone).unwrap();
	assert_eq!(reply, ReplyMessage::success(2));
	assert_eq!(unpacker.unpack_string().unwrap(), HELLO);

	// Nothing else is coming: the bad request got no reply of its own
	stream.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
	let mut rest = [0u8; 4];
	assert!(stream.read(&mut rest).is_err());
}

#[test]
fn test_shared_client_from_many_threads() {
	let (_server, addr) = tcp_server(Arc::new(echo));
	let client = Arc::new(SharedClient::new(TcpClient::connect(addr, ECHO_PROG, 1).unwrap()));

	let handles:Vec<_> = (0..4).map(|i| {
		let client = Arc::clone(&client);
		thread::spawn(move || {
			for j in 0..10 {
				let msg = format!("thread {} call {}", i, j);
				let mut answer = String::new();
				client.call_default(ECHOPROC_ECHO, &msg, &mut answer).unwrap();
				assert_eq!(answer, msg);
			}
		})
	}).collect();

	for h in handles { h.join().unwrap(); }
}

#[test]
fn test_fragmented_records() {
	let (_server, addr) = tcp_server(Arc::new(echo));
	let config = oncrpc::config::ClientConfig{ max_fragment_size: 16, ..Default::default() };
	let mut client = TcpClient::with_config(addr, ECHO_PROG, 1, &config).unwrap();

	let long:String = std::iter::repeat("0123456789").take(100).collect();
	let mut answer = String::new();
	client.call_default(ECHOPROC_ECHO, &long, &mut answer).unwrap();
	assert_eq!(answer, long);
}
