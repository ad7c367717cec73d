
// External data representation, a protocol for serializing data to be sent over the network
pub mod xdr;

// Remote procedure call (RFC 1831) built on top of XDR: clients and servers over TCP and UDP, authentication, and the port mapper
pub mod rpc;

// Client and server settings, loadable from JSON
pub mod config;
