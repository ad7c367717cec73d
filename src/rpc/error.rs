// Error types for ONC/RPC

use std::io;

use thiserror::Error;

use crate::xdr;
use super::auth::AuthStatus;

// Everything a call, a server transport or a registration can fail with
#[derive(Debug, Error)]
pub enum RpcError {
	#[error("RPC protocol version mismatch: peer supports {low}..={high}")]
	RpcVersionMismatch { low: u32, high: u32 },

	#[error("wrong message type {0}")]
	WrongMessageType(i32),

	#[error("malformed reply: {0}")]
	MalformedReply(&'static str),

	#[error("cannot encode RPC arguments: {0}")]
	CannotEncodeArgs(#[source] xdr::Error),

	#[error("cannot decode RPC result: {0}")]
	CannotDecodeResult(#[source] xdr::Error),

	#[error("cannot decode RPC arguments: {0}")]
	CannotDecodeArgs(#[source] xdr::Error),

	#[error("cannot send RPC message: {0}")]
	CannotSend(#[source] io::Error),

	#[error("cannot receive RPC message: {0}")]
	CannotReceive(#[source] io::Error),

	#[error("timed out waiting for reply")]
	Timeout,

	#[error("authentication failed: {0}")]
	Authentication(AuthStatus),

	#[error("program unavailable")]
	ProgramUnavailable,

	#[error("program version mismatch: server supports {low}..={high}")]
	ProgramVersionMismatch { low: u32, high: u32 },

	#[error("procedure unavailable")]
	ProcedureUnavailable,

	#[error("server could not decode arguments")]
	GarbageArgs,

	#[error("remote system error")]
	SystemError,

	#[error("cannot register program {program} version {version} with the port mapper")]
	CannotRegisterTransport { program: u32, version: u32 },

	#[error("program {program} version {version} is not registered with the port mapper")]
	ProgramNotRegistered { program: u32, version: u32 },

	#[error("malformed RPC message: {0}")]
	Xdr(#[from] xdr::Error),

	#[error("transport closed")]
	Closed,

	#[error("a reply has already been sent for this call")]
	ReplyAlreadySent,
}

impl RpcError {
	// Socket level failure: the connection or datagram socket itself is suspect
	pub fn is_io(&self) -> bool {
		matches!(self, RpcError::CannotSend(_) | RpcError::CannotReceive(_) | RpcError::Closed)
	}

	// A retry of the same call may succeed
	pub fn is_transient(&self) -> bool {
		matches!(self, RpcError::Timeout | RpcError::CannotReceive(_) | RpcError::CannotSend(_))
	}

	// Retrying the same call against the same server will not help
	pub fn is_permanent(&self) -> bool {
		matches!(
			self,
			RpcError::ProgramUnavailable
				| RpcError::ProcedureUnavailable
				| RpcError::ProgramVersionMismatch { .. }
				| RpcError::RpcVersionMismatch { .. }
				| RpcError::ProgramNotRegistered { .. }
		)
	}

	// Map a socket read failure, distinguishing an expired read timeout
	pub(crate) fn receive(e:io::Error) -> Self {
		match e.kind() {
			io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => RpcError::Timeout,
			_ => RpcError::CannotReceive(e),
		}
	}
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_classification() {
		assert!(RpcError::Timeout.is_transient());
		assert!(!RpcError::Timeout.is_permanent());
		assert!(RpcError::ProcedureUnavailable.is_permanent());
		assert!(RpcError::ProgramVersionMismatch { low: 1, high: 2 }.is_permanent());
		assert!(!RpcError::Authentication(AuthStatus::BadCredential).is_transient());
		assert!(RpcError::CannotSend(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).is_io());
	}

	#[test]
	fn test_read_timeout_maps_to_timeout() {
		let e = RpcError::receive(io::Error::new(io::ErrorKind::WouldBlock, "timed out"));
		assert!(matches!(e, RpcError::Timeout));

		let e = RpcError::receive(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
		assert!(matches!(e, RpcError::CannotReceive(_)));
	}
}
