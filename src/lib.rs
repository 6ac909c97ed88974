//! LDAPv3 bind codec.
//!
//! BER encoding and decoding of BindRequest/BindResponse PDUs inside the
//! LDAPMessage envelope, plus a small tokio client and server that exchange
//! them.

pub mod asn1;
pub mod bind;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod ldap;
pub mod server;
pub mod tokiou;

pub use bind::{Authentication, BindRequest, SaslCredentials};
pub use error::{Error, Result};
