// Echo service over TCP and UDP.  Usage: echo_server [port] [config.json]
// Type "quit" on stdin to shut it down cleanly.

use std::env;
use std::io::{self, BufRead, Error, ErrorKind};
use std::sync::Arc;
use std::thread;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use oncrpc::config::{Config, ServerConfig};
use oncrpc::rpc::{self, CallHandler, ProgramInfo, RpcServer};

const ECHO_PROG:u32 = 0x20049678;
const ECHO_VERS:u32 = 1;

const ECHOPROC_NULL:u32 = 0;
const ECHOPROC_ECHO:u32 = 1;

fn dispatch(call:&mut CallHandler<'_>, program:u32, version:u32, procedure:u32) -> rpc::Result<()> {
	if program != ECHO_PROG { return call.reply_program_not_available(); }
	if version != ECHO_VERS { return call.reply_program_version_mismatch(ECHO_VERS, ECHO_VERS); }

	match procedure {
		ECHOPROC_NULL => {
			call.retrieve_call(&mut ())?;
			call.reply(&())
		},
		ECHOPROC_ECHO => {
			let mut s = String::new();
			call.retrieve_call(&mut s)?;
			info!("echoing {:?} to {}", s, call.peer());
			call.reply(&s)
		},
		_ => call.reply_procedure_not_available(),
	}
}

pub fn main() -> io::Result<()> {

	let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
	tracing::subscriber::set_global_default(subscriber).map_err(|e| Error::new(ErrorKind::Other, e))?;

	let args:Vec<String> = env::args().skip(1).collect();
	let port:u16 = match args.get(0) {
		Some(p) => p.parse().map_err(|e| Error::new(ErrorKind::InvalidInput, e))?,
		None => 0,
	};
	let config:ServerConfig = match args.get(1) {
		Some(path) => Config::from_file(path).map_err(|e| Error::new(ErrorKind::InvalidInput, e))?.server,
		None => ServerConfig::default(),
	};

	let infos = vec![ProgramInfo::new(ECHO_PROG, ECHO_VERS)];
	let mut server = RpcServer::new(config);
	let tcp = server.bind_tcp(port, infos.clone(), Arc::new(dispatch))?;
	let udp = server.bind_udp(tcp.port(), infos, Arc::new(dispatch))?;
	info!("echo service on TCP {} and UDP {}", tcp, udp);

	let shutdown = server.shutdown_signal();
	thread::spawn(move || {
		let stdin = io::stdin();
		for line in stdin.lock().lines() {
			match line {
				Ok(ref l) if l.trim() == "quit" => {
					shutdown.trigger();
					return;
				},
				Ok(_) => continue,
				// No terminal; serve until killed
				Err(_) => return,
			}
		}
	});

	server.run().map_err(|e| Error::new(ErrorKind::Other, e))
}
