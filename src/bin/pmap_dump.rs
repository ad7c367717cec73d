// List what a host's port mapper has registered, like `rpcinfo -p`

use std::env;
use std::io::{self, Error, ErrorKind};

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use oncrpc::rpc::PortMapperClient;

pub fn main() -> io::Result<()> {

	let subscriber = FmtSubscriber::builder().with_max_level(Level::WARN).finish();
	tracing::subscriber::set_global_default(subscriber).map_err(|e| Error::new(ErrorKind::Other, e))?;

	let args:Vec<String> = env::args().skip(1).collect();
	let json = args.iter().any(|a| a == "--json");
	let host:&str = args.iter().find(|a| !a.starts_with("--")).map(|s| s.as_str()).unwrap_or("127.0.0.1");

	let mut pmap = PortMapperClient::new_udp(host)?;
	let mappings = pmap.list_servers().map_err(|e| Error::new(ErrorKind::Other, e))?;

	if json {
		println!("{}", serde_json::to_string_pretty(&mappings)?);
	} else {
		println!("{:>10} {:>5} {:>6} {:>6}", "program", "vers", "proto", "port");
		for m in mappings.iter() {
			println!("{:>10} {:>5} {:>6} {:>6}", m.program, m.version, format!("{:?}", m.protocol).to_lowercase(), m.port);
		}
	}

	Ok(())
}
