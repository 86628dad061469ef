//! DUKPT (Derived Unique Key Per Transaction) key management.
//!
//! Implements the TDES scheme of ANSI X9.24-1:2009 and the AES scheme of
//! ANSI X9.24-3:2017. A long-lived base derivative key (BDK) and a
//! per-transaction key serial number (KSN) yield a fresh transaction key
//! for every payment, so compromising one transaction key exposes no past
//! or future key.
//!
//! The [`tdes`] and [`aes`] modules hold the two derivation engines and
//! the PIN, MAC and data operations layered on the derived keys. [`ksn`]
//! carries the counter state machine that hosts advance between
//! transactions. Everything is a pure function over its arguments; the
//! crate keeps no state.

pub mod aes;
pub mod encryption;
pub mod ksn;
pub mod pinblock;
pub mod tdes;
mod utils;

use thiserror::Error;

/// Tag naming the TDES algorithm family in caller-facing interfaces.
pub const ALGORITHM_DES: &str = "des";
/// Tag naming the AES algorithm family in caller-facing interfaces.
pub const ALGORITHM_AES: &str = "aes";
/// Tag selecting AES-CMAC message authentication.
pub const MAC_TYPE_CMAC: &str = "cmac";
/// Tag selecting HMAC-SHA-256 message authentication.
pub const MAC_TYPE_HMAC: &str = "hmac";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("invalid key serial number length: {0} bytes")]
    InvalidKsnLength(usize),

    #[error("invalid transaction counter")]
    InvalidCounter,

    #[error("transaction counter exhausted")]
    CounterExhausted,

    #[error("unsupported key type {0:?}")]
    UnsupportedKeyType(String),

    #[error("key length does not match the declared key type")]
    KeyTypeMismatch,

    #[error("unsupported pin block format {0:?}")]
    UnsupportedPinFormat(String),

    #[error("pin block formatter rejected input: {0}")]
    FormatterFailure(&'static str),

    #[error("invalid block length: {0} bytes")]
    InvalidBlockLength(usize),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Direction of the message a working key protects. Request and response
/// traffic use distinct key variants (TDES) or derivation usages (AES).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Request,
    Response,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Request => "request",
            Action::Response => "response",
        }
    }
}
