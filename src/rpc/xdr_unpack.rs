
use crate::xdr::Unpacker;
use crate::rpc::{CALL, RPCVERSION, REPLY, MSG_ACCEPTED, MSG_DENIED, RPC_MISMATCH, AUTH_ERROR};
use crate::rpc::{SUCCESS, PROG_UNAVAIL, PROG_MISMATCH, PROC_UNAVAIL, GARBAGE_ARGS, SYSTEM_ERR};
use crate::rpc::{Result, RpcError};
use crate::rpc::auth::{AuthStatus, ClientAuth, ServerAuth};
use crate::rpc::message::{CallMessage, ReplyMessage, AcceptStatus, RejectStatus};

// Everything in a call header up to (not including) the credential
pub fn unpack_callheader_fields(unpacker:&mut Unpacker) -> Result<CallMessage> {
	let xid:u32 = unpacker.unpack_u32()?;

	let mtype:i32 = unpacker.unpack_enum()?;
	if mtype != CALL { return Err(RpcError::WrongMessageType(mtype)); }

	let rpcvers:u32 = unpacker.unpack_u32()?;
	if rpcvers != RPCVERSION { return Err(RpcError::RpcVersionMismatch{ low: RPCVERSION, high: RPCVERSION }); }

	let program:u32   = unpacker.unpack_u32()?;
	let version:u32   = unpacker.unpack_u32()?;
	let procedure:u32 = unpacker.unpack_u32()?;

	Ok(CallMessage{ xid, program, version, procedure })
}

pub fn unpack_callheader(unpacker:&mut Unpacker) -> Result<(CallMessage, ServerAuth)> {
	let call = unpack_callheader_fields(unpacker)?;
	let auth = ServerAuth::decode_credential_and_verifier(unpacker)?;
	Ok((call, auth))
}

pub fn unpack_replyheader(unpacker:&mut Unpacker, auth:&mut dyn ClientAuth) -> Result<ReplyMessage> {
	let xid:u32 = unpacker.unpack_u32()?;

	let mtype:i32 = unpacker.unpack_enum()?;
	if mtype != REPLY { return Err(RpcError::WrongMessageType(mtype)); }

	match unpacker.unpack_enum()? {
		MSG_DENIED => {
			let status = match unpacker.unpack_enum()? {
				RPC_MISMATCH => {
					let low:u32  = unpacker.unpack_u32()?;
					let high:u32 = unpacker.unpack_u32()?;
					RejectStatus::RpcMismatch{ low, high }
				},
				AUTH_ERROR => RejectStatus::AuthError(AuthStatus::from_u32(unpacker.unpack_u32()?)),
				_ => return Err(RpcError::MalformedReply("reject status is neither RPC_MISMATCH nor AUTH_ERROR")),
			};
			Ok(ReplyMessage::denied(xid, status))
		},
		MSG_ACCEPTED => {
			auth.decode_verifier(unpacker)?;

			let status = match unpacker.unpack_enum()? {
				SUCCESS       => AcceptStatus::Success,
				PROG_UNAVAIL  => AcceptStatus::ProgramUnavailable,
				PROG_MISMATCH => {
					let low:u32  = unpacker.unpack_u32()?;
					let high:u32 = unpacker.unpack_u32()?;
					AcceptStatus::ProgramMismatch{ low, high }
				},
				PROC_UNAVAIL  => AcceptStatus::ProcedureUnavailable,
				GARBAGE_ARGS  => AcceptStatus::GarbageArgs,
				SYSTEM_ERR    => AcceptStatus::SystemError,
				_ => return Err(RpcError::MalformedReply("unknown accept status")),
			};
			Ok(ReplyMessage::accepted(xid, status))
		},
		_ => Err(RpcError::MalformedReply("neither MSG_DENIED nor MSG_ACCEPTED")),
	}
}
