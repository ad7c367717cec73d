// Everything a dispatcher gets to see of one incoming call, and the only way it can answer it

use std::io;
use std::net::SocketAddr;

use tracing::trace;

use crate::xdr::{Packer, Unpacker, XdrEncode, XdrDecode};
use crate::rpc::{Result, RpcError};
use crate::rpc::auth::{AuthStatus, ServerAuth};
use crate::rpc::message::{CallMessage, ReplyMessage, AcceptStatus, RejectStatus};

// Where a finished reply goes: a record on a TCP connection or a datagram back to the sender
pub trait ReplySink {
	fn send_reply(&mut self, data:&[u8]) -> io::Result<()>;

	// Whether a reply that failed while being encoded may be replaced by an error reply
	fn can_restart_reply(&self) -> bool { false }
}

pub struct CallHandler<'a> {
	peer: SocketAddr,
	call: CallMessage,
	auth: ServerAuth,
	unpacker: &'a mut Unpacker,
	packer: &'a mut Packer,
	sink: &'a mut dyn ReplySink,
	decoding: bool,
	encoding: bool,
	replied: bool,
}

impl<'a> CallHandler<'a> {

	pub(crate) fn new(peer:SocketAddr, call:CallMessage, auth:ServerAuth, unpacker:&'a mut Unpacker,
		packer:&'a mut Packer, sink:&'a mut dyn ReplySink) -> Self
	{
		Self{ peer, call, auth, unpacker, packer, sink, decoding: true, encoding: false, replied: false }
	}

	pub fn peer(&self) -> SocketAddr { self.peer }
	pub fn call_message(&self) -> &CallMessage { &self.call }
	pub fn auth(&self) -> &ServerAuth { &self.auth }

	// Hand the client a shorthand token along with the next accepted reply
	pub fn set_shorthand_verifier(&mut self, token:&[u8]) -> Result<()> {
		self.auth.set_shorthand_verifier(token)
	}

	pub fn is_decoding(&self) -> bool { self.decoding }
	pub fn is_encoding(&self) -> bool { self.encoding }
	pub fn has_replied(&self) -> bool { self.replied }

	// Decode the call's parameters and release the request
	pub fn retrieve_call(&mut self, args:&mut dyn XdrDecode) -> Result<()> {
		let decoded = args.unpack(&mut *self.unpacker).map_err(RpcError::CannotDecodeArgs);
		self.end_decoding();
		decoded
	}

	// Raw access to the request for hand-written decoding; finish with end_decoding
	pub fn decoder(&mut self) -> &mut Unpacker { &mut *self.unpacker }

	pub fn end_decoding(&mut self) {
		if self.decoding {
			let left = self.unpacker.remaining();
			if left > 0 { trace!("discarding {} undecoded bytes of xid {}", left, self.call.xid); }
			self.unpacker.skip_remaining();
			self.decoding = false;
		}
	}

	// Start a reply with the given status; the payload, if any, goes into the returned packer
	pub fn begin_encoding(&mut self, reply:ReplyMessage) -> Result<&mut Packer> {
		if self.replied || self.encoding { return Err(RpcError::ReplyAlreadySent); }
		self.end_decoding();

		self.packer.reset();
		self.encoding = true;
		reply.encode(&mut *self.packer, Some(&self.auth))?;
		Ok(&mut *self.packer)
	}

	pub fn encoder(&mut self) -> &mut Packer { &mut *self.packer }

	// Throw away a reply that was begun but never sent; false if the sink doesn't allow it
	pub(crate) fn abandon_encoding(&mut self) -> bool {
		if self.replied || !self.sink.can_restart_reply() { return false; }
		self.packer.reset();
		self.encoding = false;
		true
	}

	pub fn end_encoding(&mut self) -> Result<()> {
		if !self.encoding { return Err(RpcError::ReplyAlreadySent); }
		self.replied = true;
		self.encoding = false;
		self.sink.send_reply(self.packer.as_bytes()).map_err(RpcError::CannotSend)
	}

	pub fn reply(&mut self, result:&dyn XdrEncode) -> Result<()> {
		let xid = self.call.xid;
		let packer = self.begin_encoding(ReplyMessage::success(xid))?;
		result.pack(packer)?;
		self.end_encoding()
	}

	fn reply_status(&mut self, reply:ReplyMessage) -> Result<()> {
		self.begin_encoding(reply)?;
		self.end_encoding()
	}

	pub fn reply_procedure_not_available(&mut self) -> Result<()> {
		self.reply_status(ReplyMessage::accepted(self.call.xid, AcceptStatus::ProcedureUnavailable))
	}

	pub fn reply_program_not_available(&mut self) -> Result<()> {
		self.reply_status(ReplyMessage::accepted(self.call.xid, AcceptStatus::ProgramUnavailable))
	}

	pub fn reply_program_version_mismatch(&mut self, low:u32, high:u32) -> Result<()> {
		self.reply_status(ReplyMessage::accepted(self.call.xid, AcceptStatus::ProgramMismatch{ low, high }))
	}

	pub fn reply_unable_to_decode_arguments(&mut self) -> Result<()> {
		self.reply_status(ReplyMessage::accepted(self.call.xid, AcceptStatus::GarbageArgs))
	}

	pub fn reply_system_error(&mut self) -> Result<()> {
		self.reply_status(ReplyMessage::accepted(self.call.xid, AcceptStatus::SystemError))
	}

	pub fn reply_auth_error(&mut self, status:AuthStatus) -> Result<()> {
		self.reply_status(ReplyMessage::denied(self.call.xid, RejectStatus::AuthError(status)))
	}

}
