
use crate::xdr::Packer;
use crate::rpc::{CALL, RPCVERSION, REPLY, MSG_ACCEPTED, MSG_DENIED, RPC_MISMATCH, AUTH_ERROR};
use crate::rpc::{SUCCESS, PROG_UNAVAIL, PROG_MISMATCH, PROC_UNAVAIL, GARBAGE_ARGS, SYSTEM_ERR};
use crate::rpc::Result;
use crate::rpc::auth::{ClientAuth, ServerAuth, AUTH_NONE};
use crate::rpc::message::{CallMessage, ReplyMessage, ReplyStatus, AcceptStatus, RejectStatus};

pub fn pack_callheader(packer:&mut Packer, call:&CallMessage, auth:&dyn ClientAuth) -> Result<()> {
	packer.pack_u32(call.xid)?;
	packer.pack_enum(CALL)?;
	packer.pack_u32(RPCVERSION)?;
	packer.pack_u32(call.program)?;
	packer.pack_u32(call.version)?;
	packer.pack_u32(call.procedure)?;
	auth.encode_credential_and_verifier(packer)
}

fn pack_accept_status(packer:&mut Packer, status:&AcceptStatus) -> Result<()> {
	match status {
		AcceptStatus::Success              => packer.pack_enum(SUCCESS)?,
		AcceptStatus::ProgramUnavailable   => packer.pack_enum(PROG_UNAVAIL)?,
		AcceptStatus::ProgramMismatch { low, high } => {
			packer.pack_enum(PROG_MISMATCH)?;
			packer.pack_u32(*low)?;
			packer.pack_u32(*high)?;
		},
		AcceptStatus::ProcedureUnavailable => packer.pack_enum(PROC_UNAVAIL)?,
		AcceptStatus::GarbageArgs          => packer.pack_enum(GARBAGE_ARGS)?,
		AcceptStatus::SystemError          => packer.pack_enum(SYSTEM_ERR)?,
	}
	Ok(())
}

pub fn pack_replyheader(packer:&mut Packer, reply:&ReplyMessage, auth:Option<&ServerAuth>) -> Result<()> {
	packer.pack_u32(reply.xid)?;
	packer.pack_enum(REPLY)?;

	match &reply.status {
		ReplyStatus::Accepted(status) => {
			packer.pack_enum(MSG_ACCEPTED)?;
			match auth {
				Some(auth) => auth.encode_verifier(packer)?,
				None => {
					packer.pack_enum(AUTH_NONE)?;
					packer.pack_u32(0)?;
				},
			}
			pack_accept_status(packer, status)
		},
		ReplyStatus::Denied(RejectStatus::RpcMismatch { low, high }) => {
			packer.pack_enum(MSG_DENIED)?;
			packer.pack_enum(RPC_MISMATCH)?;
			packer.pack_u32(*low)?;
			packer.pack_u32(*high)?;
			Ok(())
		},
		ReplyStatus::Denied(RejectStatus::AuthError(status)) => {
			packer.pack_enum(MSG_DENIED)?;
			packer.pack_enum(AUTH_ERROR)?;
			packer.pack_u32(status.to_u32())?;
			Ok(())
		},
	}
}
