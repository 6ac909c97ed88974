//! LDAPv3 BindRequest (RFC 4511 section 4.2).
//!
//! ```text
//! BindRequest ::= [APPLICATION 0] SEQUENCE {
//!      version                 INTEGER (1 .. 127),
//!      name                    LDAPDN,
//!      authentication          AuthenticationChoice }
//! ```
//!
//! Encoding is two-phase: `compute_length` sizes the PDU and caches the body
//! length, `encode` then writes exactly that many bytes. Any setter drops
//! the cached length, so a stale length can never reach the wire.

use std::fmt;
use std::io::Cursor;

use crate::asn1::{self, Encoder};
use crate::error::{Error, Result};

pub const TAG_BIND_REQUEST: u8 = 0x60;
pub const TAG_AUTH_SIMPLE: u8 = 0x80;
pub const TAG_AUTH_SASL: u8 = 0x83;
// Constructed form of [3], sent by RFC-strict peers.
const TAG_AUTH_SASL_CONSTRUCTED: u8 = 0xa3;

pub const LDAP_VERSION3: u8 = 3;

// version INTEGER: tag, length and its single content octet
const VERSION_TLV_LEN: usize = 1 + 1 + 1;

fn check_version(version: u8) -> Result<()> {
    if !(1..=127).contains(&version) {
        return Err(Error::InvalidVersion(version));
    }
    Ok(())
}

fn expect_consumed(cursor: &Cursor<&[u8]>, what: &str) -> Result<()> {
    if cursor.position() as usize != cursor.get_ref().len() {
        return Err(Error::malformed(format!("trailing bytes after {}", what)));
    }
    Ok(())
}

#[derive(Clone, PartialEq, Eq)]
pub struct SaslCredentials {
    pub mechanism: String,
    pub credentials: Option<Vec<u8>>,
}

impl SaslCredentials {
    fn content_len(&self) -> usize {
        let mut len = asn1::tlv_len(self.mechanism.len());
        if let Some(credentials) = &self.credentials {
            len += asn1::tlv_len(credentials.len());
        }
        len
    }
}

impl fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("mechanism", &self.mechanism)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|c| format!("<{} bytes>", c.len())),
            )
            .finish()
    }
}

/// The AuthenticationChoice of a bind.
#[derive(Clone, PartialEq, Eq)]
pub enum Authentication {
    /// `simple [0] OCTET STRING`
    Simple { password: Vec<u8> },
    /// `sasl [3] SaslCredentials`
    Sasl(SaslCredentials),
}

impl Authentication {
    pub fn simple(password: impl Into<Vec<u8>>) -> Self {
        Authentication::Simple {
            password: password.into(),
        }
    }

    pub fn sasl(mechanism: impl Into<String>, credentials: Option<Vec<u8>>) -> Self {
        Authentication::Sasl(SaslCredentials {
            mechanism: mechanism.into(),
            credentials,
        })
    }

    pub fn tag(&self) -> u8 {
        match self {
            Authentication::Simple { .. } => TAG_AUTH_SIMPLE,
            Authentication::Sasl(_) => TAG_AUTH_SASL,
        }
    }

    /// Encoded size of the choice, tag and length included.
    pub fn compute_length(&self) -> usize {
        match self {
            Authentication::Simple { password } => asn1::tlv_len(password.len()),
            Authentication::Sasl(sasl) => asn1::tlv_len(sasl.content_len()),
        }
    }

    pub fn encode(&self, e: &mut Encoder) -> Result<()> {
        e.ensure(self.compute_length())?;
        match self {
            Authentication::Simple { password } => {
                e.write_octet_string_with_tag(self.tag(), password)
            }
            Authentication::Sasl(sasl) => {
                e.write_header(self.tag(), sasl.content_len())?;
                e.write_octet_string(sasl.mechanism.as_bytes())?;
                // absent credentials emit nothing, not an empty string
                if let Some(credentials) = &sasl.credentials {
                    e.write_octet_string(credentials)?;
                }
                Ok(())
            }
        }
    }

    fn decode(tag: u8, cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        match tag {
            TAG_AUTH_SIMPLE => Ok(Authentication::Simple {
                password: asn1::read_value(cursor)?,
            }),
            TAG_AUTH_SASL | TAG_AUTH_SASL_CONSTRUCTED => {
                let content = asn1::read_value(cursor)?;
                let mut inner = Cursor::new(content.as_slice());
                let mechanism = asn1::read_string(&mut inner)?;
                let credentials = if (inner.position() as usize) < content.len() {
                    Some(asn1::read_octet_string(&mut inner)?)
                } else {
                    None
                };
                expect_consumed(&inner, "sasl credentials")?;
                Ok(Authentication::Sasl(SaslCredentials {
                    mechanism,
                    credentials,
                }))
            }
            found => Err(Error::malformed(format!(
                "unknown authentication choice {:#04x}",
                found
            ))),
        }
    }
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authentication::Simple { password } => f
                .debug_struct("Simple")
                .field("password", &format_args!("<{} bytes>", password.len()))
                .finish(),
            Authentication::Sasl(sasl) => fmt::Debug::fmt(sasl, f),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BindRequest {
    version: u8,
    name: Option<String>,
    authentication: Option<Authentication>,
    body_length: Option<usize>,
}

impl Default for BindRequest {
    fn default() -> Self {
        Self {
            version: LDAP_VERSION3,
            name: None,
            authentication: None,
            body_length: None,
        }
    }
}

impl PartialEq for BindRequest {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.name == other.name
            && self.authentication == other.authentication
    }
}

impl Eq for BindRequest {}

impl BindRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn simple(name: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        let mut req = Self::new();
        req.set_name(name);
        req.set_authentication(Authentication::simple(password));
        req
    }

    pub fn sasl(
        name: impl Into<String>,
        mechanism: impl Into<String>,
        credentials: Option<Vec<u8>>,
    ) -> Self {
        let mut req = Self::new();
        req.set_name(name);
        req.set_authentication(Authentication::sasl(mechanism, credentials));
        req
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn authentication(&self) -> Option<&Authentication> {
        self.authentication.as_ref()
    }

    pub fn set_version(&mut self, version: u8) -> Result<()> {
        check_version(version)?;
        self.version = version;
        self.body_length = None;
        Ok(())
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
        self.body_length = None;
    }

    pub fn set_authentication(&mut self, authentication: Authentication) {
        self.authentication = Some(authentication);
        self.body_length = None;
    }

    /// Sizes the PDU and caches the body length for `encode`.
    ///
    /// Returns the total encoded size, the `0x60` tag and its length field
    /// included.
    pub fn compute_length(&mut self) -> Result<usize> {
        check_version(self.version)?;
        let name = self.name.as_ref().ok_or(Error::UninitializedField("name"))?;
        let authentication = self
            .authentication
            .as_ref()
            .ok_or(Error::UninitializedField("authentication"))?;

        let body = VERSION_TLV_LEN + asn1::tlv_len(name.len()) + authentication.compute_length();
        self.body_length = Some(body);
        Ok(asn1::tlv_len(body))
    }

    /// Total size from the last `compute_length`, if still valid.
    pub fn encoded_len(&self) -> Option<usize> {
        self.body_length.map(asn1::tlv_len)
    }

    /// Writes the PDU. Nothing is written unless the whole PDU fits.
    pub fn encode(&self, e: &mut Encoder) -> Result<()> {
        let name = self.name.as_ref().ok_or(Error::UninitializedField("name"))?;
        let authentication = self
            .authentication
            .as_ref()
            .ok_or(Error::UninitializedField("authentication"))?;
        let body = self.body_length.ok_or(Error::LengthNotComputed)?;
        let total = asn1::tlv_len(body);
        e.ensure(total)?;

        let start = e.len();
        e.write_header(TAG_BIND_REQUEST, body)?;
        e.write_small_int(self.version)?;
        e.write_octet_string(name.as_bytes())?;
        authentication.encode(e)?;

        let written = e.len() - start;
        if written != total {
            return Err(Error::LengthMismatch {
                computed: total,
                written,
            });
        }
        Ok(())
    }

    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let total = self.compute_length()?;
        let mut e = Encoder::with_limit(total);
        self.encode(&mut e)?;
        Ok(e.into_vec())
    }

    pub fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        asn1::expect_tag(cursor, TAG_BIND_REQUEST)?;
        let content = asn1::read_value(cursor)?;
        let mut inner = Cursor::new(content.as_slice());

        let version = asn1::read_uint(&mut inner)?;
        let version = u8::try_from(version)
            .ok()
            .filter(|v| check_version(*v).is_ok())
            .ok_or_else(|| Error::malformed(format!("protocol version {}", version)))?;
        let name = asn1::read_string(&mut inner)?;
        let tag = asn1::read_tag(&mut inner)?;
        let authentication = Authentication::decode(tag, &mut inner)?;
        expect_consumed(&inner, "bind request")?;

        Ok(Self {
            version,
            name: Some(name),
            authentication: Some(authentication),
            body_length: None,
        })
    }
}
