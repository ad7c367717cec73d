// Authentication flavors that can travel in the credential and verifier slots of a message

use std::fmt;

pub const AUTH_NONE:i32  = 0;
pub const AUTH_UNIX:i32  = 1;
pub const AUTH_SHORT:i32 = 2;
pub const AUTH_DES:i32   = 3;      // declared by RFC 1831, not supported here

// Limits on the opaque bodies of credentials and verifiers
pub const MAX_AUTH_BYTES:usize   = 400;
pub const MAX_MACHINE_NAME:usize = 255;
pub const MAX_GIDS:usize         = 16;

pub mod client;
pub mod server;

pub use client::{ClientAuth, AuthNone, AuthUnix};
pub use server::{ServerAuth, UnixCredential};

/// Why the server refused to authenticate a call (`auth_stat` in RFC 1831)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
	Ok,
	BadCredential,
	RejectedCredential,
	BadVerifier,
	RejectedVerifier,
	TooWeak,
	InvalidResponse,
	Failed,
	Other(u32),
}

impl AuthStatus {

	pub fn from_u32(x:u32) -> Self { match x {
		0 => AuthStatus::Ok,
		1 => AuthStatus::BadCredential,
		2 => AuthStatus::RejectedCredential,
		3 => AuthStatus::BadVerifier,
		4 => AuthStatus::RejectedVerifier,
		5 => AuthStatus::TooWeak,
		6 => AuthStatus::InvalidResponse,
		7 => AuthStatus::Failed,
		x => AuthStatus::Other(x),
	}}

	pub fn to_u32(&self) -> u32 { match self {
		AuthStatus::Ok                 => 0,
		AuthStatus::BadCredential      => 1,
		AuthStatus::RejectedCredential => 2,
		AuthStatus::BadVerifier        => 3,
		AuthStatus::RejectedVerifier   => 4,
		AuthStatus::TooWeak            => 5,
		AuthStatus::InvalidResponse    => 6,
		AuthStatus::Failed             => 7,
		AuthStatus::Other(x)           => *x,
	}}

}

impl fmt::Display for AuthStatus {
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AuthStatus::Ok                 => write!(f, "ok"),
			AuthStatus::BadCredential      => write!(f, "bad credential (seal broken)"),
			AuthStatus::RejectedCredential => write!(f, "client must begin new session"),
			AuthStatus::BadVerifier        => write!(f, "bad verifier (seal broken)"),
			AuthStatus::RejectedVerifier   => write!(f, "verifier expired or replayed"),
			AuthStatus::TooWeak            => write!(f, "rejected for security reasons"),
			AuthStatus::InvalidResponse    => write!(f, "bogus response verifier"),
			AuthStatus::Failed             => write!(f, "reason unknown"),
			AuthStatus::Other(x)           => write!(f, "unknown status {}", x),
		}
	}
}

// Length of the opaque body of a Unix credential with these fields
pub fn unix_credential_len(machine_name:&str, gids:usize) -> usize {
	4 + ((machine_name.len() + 7) & !3) + 4 + 4 + 4 + gids * 4
}
