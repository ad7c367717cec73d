#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use oncrpc::config::ServerConfig;
use oncrpc::rpc::{self, CallHandler, Dispatcher, ProgramInfo, ServerTransport, TcpServerTransport, UdpServerTransport};

pub const ECHO_PROG:u32 = 0x20049678;
pub const ECHOPROC_NULL:u32 = 0;
pub const ECHOPROC_ECHO:u32 = 1;

pub fn echo_infos() -> Vec<ProgramInfo> {
	vec![ProgramInfo::new(ECHO_PROG, 1), ProgramInfo::new(ECHO_PROG, 2)]
}

// Echo program, versions 1 and 2
pub fn echo(call:&mut CallHandler<'_>, program:u32, version:u32, procedure:u32) -> rpc::Result<()> {
	let infos = echo_infos();
	match ProgramInfo::version_range(&infos, program) {
		None => return call.reply_program_not_available(),
		Some((low, high)) if version < low || version > high => return call.reply_program_version_mismatch(low, high),
		Some(_) => { },
	}

	match procedure {
		ECHOPROC_NULL => {
			call.retrieve_call(&mut ())?;
			call.reply(&())
		},
		ECHOPROC_ECHO => {
			let mut s = String::new();
			call.retrieve_call(&mut s)?;
			call.reply(&s)
		},
		_ => call.reply_procedure_not_available(),
	}
}

pub fn config() -> ServerConfig {
	ServerConfig{ register_with_portmapper: false, ..ServerConfig::default() }
}

pub fn tcp_server(dispatcher:Arc<dyn Dispatcher>) -> (TcpServerTransport, SocketAddr) {
	let t = TcpServerTransport::bind("127.0.0.1:0", echo_infos(), dispatcher, config()).unwrap();
	t.listen().unwrap();
	let addr = t.local_addr();
	(t, addr)
}

pub fn udp_server(dispatcher:Arc<dyn Dispatcher>) -> (UdpServerTransport, SocketAddr) {
	let t = UdpServerTransport::bind("127.0.0.1:0", echo_infos(), dispatcher, config()).unwrap();
	t.listen().unwrap();
	let addr = t.local_addr();
	(t, addr)
}
