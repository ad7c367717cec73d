// Server side of authentication: reads the credential of a call and writes the verifier of its reply

use crate::xdr::{self, Packer, Unpacker};
use crate::rpc::{Result, RpcError};
use super::{AuthStatus, AUTH_NONE, AUTH_UNIX, AUTH_SHORT, MAX_AUTH_BYTES, MAX_GIDS, MAX_MACHINE_NAME, unix_credential_len};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixCredential {
	pub stamp: u32,
	pub machine_name: String,
	pub uid: i32,
	pub gid: i32,
	pub gids: Vec<i32>,
}

// A fresh value is decoded for every call; the variant follows the credential flavor on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAuth {
	None,
	Unix { credential: UnixCredential, shorthand_verifier: Option<Vec<u8>> },
	// Resolving the token back to a Unix credential is left to the application
	Short { token: Vec<u8>, shorthand_verifier: Option<Vec<u8>> },
}

fn bad_cred<T>(_:xdr::Error) -> Result<T> { Err(RpcError::Authentication(AuthStatus::BadCredential)) }

// Both Unix flavors insist on a null verifier
fn unpack_null_verifier(unpacker:&mut Unpacker) -> Result<()> {
	if unpacker.unpack_enum()? != AUTH_NONE || unpacker.unpack_u32()? != 0 {
		return Err(RpcError::Authentication(AuthStatus::BadVerifier));
	}
	Ok(())
}

impl ServerAuth {

	pub fn flavor(&self) -> i32 { match self {
		ServerAuth::None        => AUTH_NONE,
		ServerAuth::Unix { .. } => AUTH_UNIX,
		ServerAuth::Short { .. } => AUTH_SHORT,
	}}

	// Read a credential and verifier pair.  Unknown or unsupported flavors are rejected.
	pub fn decode_credential_and_verifier(unpacker:&mut Unpacker) -> Result<Self> {
		match unpacker.unpack_enum()? {
			AUTH_NONE => {
				let cred = unpacker.unpack_variable_len_opaque_max(MAX_AUTH_BYTES).or_else(bad_cred)?;
				if !cred.is_empty() {
					return Err(RpcError::Authentication(AuthStatus::BadCredential));
				}
				let verf_flavor = unpacker.unpack_enum()?;
				let verf = unpacker.unpack_variable_len_opaque_max(MAX_AUTH_BYTES).or_else(bad_cred)?;
				if verf_flavor != AUTH_NONE || !verf.is_empty() {
					return Err(RpcError::Authentication(AuthStatus::BadVerifier));
				}
				Ok(ServerAuth::None)
			},
			AUTH_UNIX => {
				let declared = unpacker.unpack_u32()? as usize;
				if declared > MAX_AUTH_BYTES {
					return Err(RpcError::Authentication(AuthStatus::BadCredential));
				}
				let stamp = unpacker.unpack_u32()?;
				let machine_name = unpacker.unpack_string_max(MAX_MACHINE_NAME).or_else(bad_cred)?;
				let uid = unpacker.unpack_i32()?;
				let gid = unpacker.unpack_i32()?;
				let gids = unpacker.unpack_int_vector_max(MAX_GIDS).or_else(bad_cred)?;

				// The declared opaque length has to agree with what the fields actually took up
				let actual = unix_credential_len(&machine_name, gids.len());
				if declared < actual {
					return Err(RpcError::Xdr(xdr::Error::BufferUnderflow{ needed: actual, available: declared }));
				} else if declared > actual {
					return Err(RpcError::Authentication(AuthStatus::BadCredential));
				}

				unpack_null_verifier(unpacker)?;
				let credential = UnixCredential{ stamp, machine_name, uid, gid, gids };
				Ok(ServerAuth::Unix{ credential, shorthand_verifier: None })
			},
			AUTH_SHORT => {
				let token = unpacker.unpack_variable_len_opaque_max(MAX_AUTH_BYTES).or_else(bad_cred)?;
				unpack_null_verifier(unpacker)?;
				Ok(ServerAuth::Short{ token, shorthand_verifier: None })
			},
			_ => Err(RpcError::Authentication(AuthStatus::RejectedCredential)),
		}
	}

	// Write the verifier of an accepted reply
	pub fn encode_verifier(&self, packer:&mut Packer) -> Result<()> {
		let shorthand = match self {
			ServerAuth::None => None,
			ServerAuth::Unix { shorthand_verifier, .. } | ServerAuth::Short { shorthand_verifier, .. } => shorthand_verifier.as_ref(),
		};

		match shorthand {
			Some(token) => {
				packer.pack_enum(AUTH_SHORT)?;
				packer.pack_variable_len_opaque(token)?;
			},
			None => {
				packer.pack_enum(AUTH_NONE)?;
				packer.pack_u32(0)?;
			},
		}
		Ok(())
	}

	// Hand the client a token to use instead of its full Unix credential on later calls
	pub fn set_shorthand_verifier(&mut self, token:&[u8]) -> Result<()> {
		if token.len() > MAX_AUTH_BYTES {
			return Err(RpcError::Authentication(AuthStatus::Failed));
		}
		match self {
			ServerAuth::None => Err(RpcError::Authentication(AuthStatus::TooWeak)),
			ServerAuth::Unix { shorthand_verifier, .. } | ServerAuth::Short { shorthand_verifier, .. } => {
				*shorthand_verifier = Some(token.to_vec());
				Ok(())
			},
		}
	}

	pub fn unix_credential(&self) -> Option<&UnixCredential> { match self {
		ServerAuth::Unix { credential, .. } => Some(credential),
		_ => None,
	}}

	pub fn shorthand_token(&self) -> Option<&[u8]> { match self {
		ServerAuth::Short { token, .. } => Some(token),
		_ => None,
	}}

}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::rpc::auth::{ClientAuth, AuthNone, AuthUnix};

	#[test]
	fn test_decodes_what_client_encodes() {
		let client = AuthUnix::new("box", 500, 20, &[1, 2, 3]);
		let mut packer = Packer::new();
		client.encode_credential_and_verifier(&mut packer).unwrap();

		let mut unpacker = Unpacker::from_bytes(packer.as_bytes());
		let auth = ServerAuth::decode_credential_and_verifier(&mut unpacker).unwrap();
		assert!(unpacker.all_data_consumed());

		let cred = auth.unix_credential().unwrap();
		assert_eq!(cred.machine_name, "box");
		assert_eq!(cred.uid, 500);
		assert_eq!(cred.gid, 20);
		assert_eq!(cred.gids, vec![1, 2, 3]);

		let mut packer = Packer::new();
		AuthNone.encode_credential_and_verifier(&mut packer).unwrap();
		let auth = ServerAuth::decode_credential_and_verifier(&mut Unpacker::from_bytes(packer.as_bytes())).unwrap();
		assert_eq!(auth, ServerAuth::None);
	}

	fn unix_with_declared_len(declared:u32) -> Unpacker {
		let mut packer = Packer::new();
		packer.pack_enum(AUTH_UNIX).unwrap();
		packer.pack_u32(declared).unwrap();
		packer.pack_u32(0).unwrap();
		packer.pack_string("box").unwrap();
		packer.pack_i32(0).unwrap();
		packer.pack_i32(0).unwrap();
		packer.pack_int_vector(&[]).unwrap();
		packer.pack_enum(AUTH_NONE).unwrap();
		packer.pack_u32(0).unwrap();
		Unpacker::from_bytes(packer.as_bytes())
	}

	#[test]
	fn test_declared_length_must_match() {
		let actual = unix_credential_len("box", 0) as u32;
		assert!(ServerAuth::decode_credential_and_verifier(&mut unix_with_declared_len(actual)).is_ok());

		assert!(matches!(ServerAuth::decode_credential_and_verifier(&mut unix_with_declared_len(actual - 4)),
			Err(RpcError::Xdr(xdr::Error::BufferUnderflow{ .. }))));
		assert!(matches!(ServerAuth::decode_credential_and_verifier(&mut unix_with_declared_len(actual + 4)),
			Err(RpcError::Authentication(AuthStatus::BadCredential))));
		assert!(matches!(ServerAuth::decode_credential_and_verifier(&mut unix_with_declared_len(401)),
			Err(RpcError::Authentication(AuthStatus::BadCredential))));
	}

	#[test]
	fn test_short_credential() {
		let mut packer = Packer::new();
		packer.pack_enum(AUTH_SHORT).unwrap();
		packer.pack_variable_len_opaque(b"opaque").unwrap();
		packer.pack_enum(AUTH_NONE).unwrap();
		packer.pack_u32(0).unwrap();
		let auth = ServerAuth::decode_credential_and_verifier(&mut Unpacker::from_bytes(packer.as_bytes())).unwrap();
		assert_eq!(auth.shorthand_token(), Some(&b"opaque"[..]));

		let mut packer = Packer::new();
		packer.pack_enum(AUTH_SHORT).unwrap();
		packer.pack_variable_len_opaque(&[0; MAX_AUTH_BYTES + 1]).unwrap();
		assert!(matches!(ServerAuth::decode_credential_and_verifier(&mut Unpacker::from_bytes(packer.as_bytes())),
			Err(RpcError::Authentication(AuthStatus::BadCredential))));
	}

	#[test]
	fn test_unsupported_flavor_rejected() {
		let mut packer = Packer::new();
		packer.pack_enum(super::super::AUTH_DES).unwrap();
		packer.pack_u32(0).unwrap();
		assert!(matches!(ServerAuth::decode_credential_and_verifier(&mut Unpacker::from_bytes(packer.as_bytes())),
			Err(RpcError::Authentication(AuthStatus::RejectedCredential))));
	}

	#[test]
	fn test_shorthand_verifier_round_trip() {
		let mut server = ServerAuth::Unix{
			credential: UnixCredential{ stamp: 0, machine_name: "box".to_owned(), uid: 1, gid: 1, gids: vec![] },
			shorthand_verifier: None,
		};
		server.set_shorthand_verifier(b"abc").unwrap();

		let mut packer = Packer::new();
		server.encode_verifier(&mut packer).unwrap();

		let mut client = AuthUnix::new("box", 1, 1, &[]);
		client.decode_verifier(&mut Unpacker::from_bytes(packer.as_bytes())).unwrap();
		assert_eq!(client.shorthand(), Some(&b"abc"[..]));

		assert!(ServerAuth::None.set_shorthand_verifier(b"abc").is_err());
	}
}
