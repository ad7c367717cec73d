// Call and reply message headers.  The wire layout lives in xdr_pack / xdr_unpack; these are the values.

use crate::xdr::{Packer, Unpacker};
use super::{Result, RpcError};
use super::{xdr_pack, xdr_unpack};
use super::auth::{AuthStatus, ClientAuth, ServerAuth};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallMessage {
	pub xid: u32,
	pub program: u32,
	pub version: u32,
	pub procedure: u32,
}

impl CallMessage {

	pub fn new(xid:u32, program:u32, version:u32, procedure:u32) -> Self {
		Self{ xid, program, version, procedure }
	}

	pub fn encode(&self, packer:&mut Packer, auth:&dyn ClientAuth) -> Result<()> {
		xdr_pack::pack_callheader(packer, self, auth)
	}

	pub fn decode(unpacker:&mut Unpacker) -> Result<(Self, ServerAuth)> {
		xdr_unpack::unpack_callheader(unpacker)
	}

}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptStatus {
	Success,
	ProgramUnavailable,
	ProgramMismatch { low: u32, high: u32 },
	ProcedureUnavailable,
	GarbageArgs,
	SystemError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectStatus {
	RpcMismatch { low: u32, high: u32 },
	AuthError(AuthStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
	Accepted(AcceptStatus),
	Denied(RejectStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyMessage {
	pub xid: u32,
	pub status: ReplyStatus,
}

impl ReplyMessage {

	pub fn accepted(xid:u32, status:AcceptStatus) -> Self { Self{ xid, status: ReplyStatus::Accepted(status) } }
	pub fn denied(xid:u32, status:RejectStatus) -> Self { Self{ xid, status: ReplyStatus::Denied(status) } }
	pub fn success(xid:u32) -> Self { Self::accepted(xid, AcceptStatus::Success) }

	pub fn successfully_accepted(&self) -> bool {
		self.status == ReplyStatus::Accepted(AcceptStatus::Success)
	}

	pub fn is_auth_error(&self) -> bool {
		matches!(self.status, ReplyStatus::Denied(RejectStatus::AuthError(_)))
	}

	// The error a caller sees for a reply that wasn't successfully accepted
	pub fn new_error(&self) -> Option<RpcError> { match self.status {
		ReplyStatus::Accepted(AcceptStatus::Success)                  => None,
		ReplyStatus::Accepted(AcceptStatus::ProgramUnavailable)       => Some(RpcError::ProgramUnavailable),
		ReplyStatus::Accepted(AcceptStatus::ProgramMismatch{low, high}) => Some(RpcError::ProgramVersionMismatch{ low, high }),
		ReplyStatus::Accepted(AcceptStatus::ProcedureUnavailable)     => Some(RpcError::ProcedureUnavailable),
		ReplyStatus::Accepted(AcceptStatus::GarbageArgs)              => Some(RpcError::GarbageArgs),
		ReplyStatus::Accepted(AcceptStatus::SystemError)              => Some(RpcError::SystemError),
		ReplyStatus::Denied(RejectStatus::RpcMismatch{low, high})     => Some(RpcError::RpcVersionMismatch{ low, high }),
		ReplyStatus::Denied(RejectStatus::AuthError(status))          => Some(RpcError::Authentication(status)),
	}}

	// Accepted replies carry the verifier of `auth`; denied ones carry none
	pub fn encode(&self, packer:&mut Packer, auth:Option<&ServerAuth>) -> Result<()> {
		xdr_pack::pack_replyheader(packer, self, auth)
	}

	pub fn decode(unpacker:&mut Unpacker, auth:&mut dyn ClientAuth) -> Result<Self> {
		xdr_unpack::unpack_replyheader(unpacker, auth)
	}

}
