// Client side of authentication: writes the credential of a call and checks the verifier of its reply

use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use tracing::debug;

use crate::xdr::{Packer, Unpacker};
use crate::rpc::{Result, RpcError};
use super::{AuthStatus, AUTH_NONE, AUTH_UNIX, AUTH_SHORT, MAX_AUTH_BYTES, MAX_GIDS, MAX_MACHINE_NAME, unix_credential_len};

lazy_static! {
	// Machine name put into Unix credentials unless the caller supplies one
	pub static ref LOCAL_MACHINE_NAME: String = env::var("HOSTNAME")
		.or_else(|_| env::var("COMPUTERNAME"))
		.ok()
		.filter(|name| !name.is_empty() && name.len() <= MAX_MACHINE_NAME)
		.unwrap_or_else(|| "localhost".to_owned());
}

pub trait ClientAuth: Send {

	// Write credential and verifier right after the procedure number of a call header
	fn encode_credential_and_verifier(&self, packer:&mut Packer) -> Result<()>;

	// Read and check the verifier of an accepted reply
	fn decode_verifier(&mut self, unpacker:&mut Unpacker) -> Result<()>;

	// Whether a rejected credential could be replaced by a fresh one
	fn can_refresh(&self) -> bool;

	// Drop whatever made the last credential stale; returns false if there was nothing to refresh
	fn refresh(&mut self) -> bool;

}

#[derive(Debug, Default, Clone)]
pub struct AuthNone;

impl ClientAuth for AuthNone {

	fn encode_credential_and_verifier(&self, packer:&mut Packer) -> Result<()> {
		packer.pack_enum(AUTH_NONE)?;
		packer.pack_u32(0)?;
		packer.pack_enum(AUTH_NONE)?;
		packer.pack_u32(0)?;
		Ok(())
	}

	fn decode_verifier(&mut self, unpacker:&mut Unpacker) -> Result<()> {
		let flavor = unpacker.unpack_enum()?;
		let len = unpacker.unpack_u32()?;
		if flavor != AUTH_NONE || len != 0 {
			return Err(RpcError::Authentication(AuthStatus::Failed));
		}
		Ok(())
	}

	fn can_refresh(&self) -> bool { false }
	fn refresh(&mut self) -> bool { false }

}

fn unix_time() -> u32 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0)
}

// AUTH_UNIX (a.k.a. AUTH_SYS).  If the server hands out a shorthand verifier, it is cached
// and sent in place of the full credential until the server rejects it.
#[derive(Debug, Clone)]
pub struct AuthUnix {
	pub stamp: u32,
	pub machine_name: String,
	pub uid: i32,
	pub gid: i32,
	pub gids: Vec<i32>,
	shorthand: Option<Vec<u8>>,
}

impl AuthUnix {

	pub fn new(machine_name:&str, uid:i32, gid:i32, gids:&[i32]) -> Self {
		Self{ stamp: unix_time(), machine_name: machine_name.to_owned(), uid, gid, gids: gids.to_vec(), shorthand: None }
	}

	// Credential for this host
	pub fn local(uid:i32, gid:i32, gids:&[i32]) -> Self { Self::new(&LOCAL_MACHINE_NAME, uid, gid, gids) }

	pub fn shorthand(&self) -> Option<&[u8]> { self.shorthand.as_deref() }

	fn body_len(&self) -> usize { unix_credential_len(&self.machine_name, self.gids.len()) }

}

impl ClientAuth for AuthUnix {

	fn encode_credential_and_verifier(&self, packer:&mut Packer) -> Result<()> {
		match &self.shorthand {
			Some(token) => {
				packer.pack_enum(AUTH_SHORT)?;
				packer.pack_variable_len_opaque(token)?;
			},
			None => {
				let len = self.body_len();
				if len > MAX_AUTH_BYTES || self.machine_name.len() > MAX_MACHINE_NAME || self.gids.len() > MAX_GIDS {
					return Err(RpcError::Authentication(AuthStatus::Failed));
				}
				packer.pack_enum(AUTH_UNIX)?;
				packer.pack_u32(len as u32)?;
				packer.pack_u32(self.stamp)?;
				packer.pack_string(&self.machine_name)?;
				packer.pack_i32(self.uid)?;
				packer.pack_i32(self.gid)?;
				packer.pack_int_vector(&self.gids)?;
			},
		}

		// Unix credentials always go out with a null verifier
		packer.pack_enum(AUTH_NONE)?;
		packer.pack_u32(0)?;
		Ok(())
	}

	fn decode_verifier(&mut self, unpacker:&mut Unpacker) -> Result<()> {
		match unpacker.unpack_enum()? {
			AUTH_NONE => {
				if unpacker.unpack_u32()? != 0 {
					return Err(RpcError::Authentication(AuthStatus::BadVerifier));
				}
				Ok(())
			},
			AUTH_SHORT => {
				let token = unpacker.unpack_variable_len_opaque_max(MAX_AUTH_BYTES)
					.map_err(|_| RpcError::Authentication(AuthStatus::BadVerifier))?;
				debug!("caching {} byte shorthand credential", token.len());
				self.shorthand = Some(token);
				Ok(())
			},
			_ => Err(RpcError::Authentication(AuthStatus::InvalidResponse)),
		}
	}

	fn can_refresh(&self) -> bool { self.shorthand.is_some() }

	fn refresh(&mut self) -> bool {
		if self.shorthand.take().is_some() {
			self.stamp = unix_time();
			true
		} else {
			false
		}
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	fn encoded(auth:&dyn ClientAuth) -> Unpacker {
		let mut packer = Packer::new();
		auth.encode_credential_and_verifier(&mut packer).unwrap();
		Unpacker::from_bytes(packer.as_bytes())
	}

	#[test]
	fn test_unix_credential_layout() {
		let mut auth = AuthUnix::new("host", 1000, 100, &[4, 24]);
		auth.stamp = 77;

		let mut u = encoded(&auth);
		assert_eq!(u.unpack_enum().unwrap(), AUTH_UNIX);
		assert_eq!(u.unpack_u32().unwrap() as usize, unix_credential_len("host", 2));
		assert_eq!(u.unpack_u32().unwrap(), 77);
		assert_eq!(u.unpack_string().unwrap(), "host");
		assert_eq!(u.unpack_i32().unwrap(), 1000);
		assert_eq!(u.unpack_i32().unwrap(), 100);
		assert_eq!(u.unpack_int_vector().unwrap(), vec![4, 24]);
		assert_eq!(u.unpack_enum().unwrap(), AUTH_NONE);
		assert_eq!(u.unpack_u32().unwrap(), 0);
		assert!(u.all_data_consumed());
	}

	#[test]
	fn test_oversized_credential_fails() {
		let long_name = "x".repeat(MAX_MACHINE_NAME + 1);
		let auth = AuthUnix::new(&long_name, 0, 0, &[]);
		let mut packer = Packer::new();
		assert!(matches!(auth.encode_credential_and_verifier(&mut packer),
			Err(RpcError::Authentication(AuthStatus::Failed))));

		let auth = AuthUnix::new("host", 0, 0, &[0; MAX_GIDS + 1]);
		assert!(matches!(auth.encode_credential_and_verifier(&mut packer),
			Err(RpcError::Authentication(AuthStatus::Failed))));
	}

	#[test]
	fn test_shorthand_substitution_and_refresh() {
		let mut auth = AuthUnix::new("host", 1, 1, &[]);
		assert!(!auth.can_refresh());

		// Server answers with a shorthand verifier
		let mut reply = Packer::new();
		reply.pack_enum(AUTH_SHORT).unwrap();
		reply.pack_variable_len_opaque(b"token").unwrap();
		auth.decode_verifier(&mut Unpacker::from_bytes(reply.as_bytes())).unwrap();
		assert!(auth.can_refresh());

		// Next call carries the shorthand instead of the Unix fields
		let mut u = encoded(&auth);
		assert_eq!(u.unpack_enum().unwrap(), AUTH_SHORT);
		assert_eq!(u.unpack_variable_len_opaque().unwrap(), b"token".to_vec());

		// Refreshing drops it exactly once
		assert!(auth.refresh());
		assert!(!auth.refresh());
		let mut u = encoded(&auth);
		assert_eq!(u.unpack_enum().unwrap(), AUTH_UNIX);
	}

	#[test]
	fn test_unexpected_verifier_flavor() {
		let mut reply = Packer::new();
		reply.pack_enum(super::super::AUTH_DES).unwrap();
		reply.pack_u32(0).unwrap();

		let mut auth = AuthUnix::new("host", 1, 1, &[]);
		assert!(matches!(auth.decode_verifier(&mut Unpacker::from_bytes(reply.as_bytes())),
			Err(RpcError::Authentication(AuthStatus::InvalidResponse))));

		let mut none = AuthNone;
		assert!(matches!(none.decode_verifier(&mut Unpacker::from_bytes(reply.as_bytes())),
			Err(RpcError::Authentication(AuthStatus::Failed))));
	}
}
