use std::io::Cursor;

use crate::asn1::{self, Encoder, TAG_SEQUENCE};
use crate::bind::{BindRequest, TAG_BIND_REQUEST};
use crate::error::{Error, Result};
use crate::ldap::{
    Message, MessageParams, MsgBindResponse, MAX_MESSAGE_ID, TAG_BIND_RESPONSE,
    TAG_SERVER_SASL_CREDS, TAG_UNBIND_REQUEST,
};

const TAG_REFERRAL: u8 = 0xa3;
const TAG_CONTROLS: u8 = 0xa0;

fn check_message_id(id: u32) -> Result<()> {
    if id > MAX_MESSAGE_ID {
        return Err(Error::malformed(format!("message id {} out of range", id)));
    }
    Ok(())
}

fn bind_response_content_len(r: &MsgBindResponse) -> usize {
    let mut len = asn1::tlv_len(asn1::int_len(r.result.code()))
        + asn1::tlv_len(r.matched_dn.len())
        + asn1::tlv_len(r.diagnostic_message.len());
    if let Some(creds) = &r.server_sasl_creds {
        len += asn1::tlv_len(creds.len());
    }
    len
}

fn write_bind_response(e: &mut Encoder, r: &MsgBindResponse) -> Result<()> {
    e.write_header(TAG_BIND_RESPONSE, bind_response_content_len(r))?;
    e.write_enum(r.result.code())?;
    e.write_octet_string(r.matched_dn.as_bytes())?;
    e.write_octet_string(r.diagnostic_message.as_bytes())?;
    if let Some(creds) = &r.server_sasl_creds {
        e.write_octet_string_with_tag(TAG_SERVER_SASL_CREDS, creds)?;
    }
    Ok(())
}

/// Encodes `msg` as a complete LDAPMessage.
///
/// Takes `&mut` because a bind request caches its computed length.
pub fn encode_message(msg: &mut Message) -> Result<Vec<u8>> {
    check_message_id(msg.id)?;
    let op_len = match &mut msg.params {
        MessageParams::Bind(b) => b.compute_length()?,
        MessageParams::BindResponse(r) => asn1::tlv_len(bind_response_content_len(r)),
        MessageParams::Unbind => asn1::tlv_len(0),
    };
    let content = asn1::tlv_len(asn1::int_len(msg.id)) + op_len;
    let total = asn1::tlv_len(content);

    let mut e = Encoder::with_limit(total);
    e.write_header(TAG_SEQUENCE, content)?;
    e.write_int(msg.id)?;
    match &msg.params {
        MessageParams::Bind(b) => b.encode(&mut e)?,
        MessageParams::BindResponse(r) => write_bind_response(&mut e, r)?,
        MessageParams::Unbind => e.write_header(TAG_UNBIND_REQUEST, 0)?,
    }
    if e.len() != total {
        return Err(Error::LengthMismatch {
            computed: total,
            written: e.len(),
        });
    }
    Ok(e.into_vec())
}

// (header length, content length) of the LDAPMessage starting at `data`
fn frame_header(data: &[u8]) -> Result<(usize, usize)> {
    let tag = *data.first().ok_or(Error::Incomplete)?;
    if tag != TAG_SEQUENCE {
        return Err(Error::UnexpectedTag {
            expected: TAG_SEQUENCE,
            found: tag,
        });
    }
    let (content, len_octets) = asn1::parse_length(&data[1..])?;
    Ok((1 + len_octets, content))
}

/// Size of the LDAPMessage starting at `data`, known once its header is in.
pub fn frame_len(data: &[u8]) -> Result<usize> {
    let (header, content) = frame_header(data)?;
    content
        .checked_add(header)
        .ok_or_else(|| Error::malformed("message length overflows"))
}

fn parse_bind_response(cursor: &mut Cursor<&[u8]>) -> Result<MsgBindResponse> {
    let content = asn1::read_value(cursor)?;
    let mut inner = Cursor::new(content.as_slice());
    let result = asn1::read_enum(&mut inner)?.into();
    let matched_dn = asn1::read_string(&mut inner)?;
    let diagnostic_message = asn1::read_string(&mut inner)?;
    let mut server_sasl_creds = None;
    while (inner.position() as usize) < content.len() {
        match asn1::read_tag(&mut inner)? {
            TAG_SERVER_SASL_CREDS => server_sasl_creds = Some(asn1::read_value(&mut inner)?),
            TAG_REFERRAL => {
                asn1::read_value(&mut inner)?;
            }
            found => {
                return Err(Error::malformed(format!(
                    "unexpected element {:#04x} in bind response",
                    found
                )))
            }
        }
    }
    Ok(MsgBindResponse {
        result,
        matched_dn,
        diagnostic_message,
        server_sasl_creds,
    })
}

fn parse_envelope(content: &[u8]) -> Result<Message> {
    let mut cursor = Cursor::new(content);
    let id = asn1::read_uint(&mut cursor)?;
    check_message_id(id)?;

    let op_start = cursor.position();
    let params = match asn1::read_tag(&mut cursor)? {
        TAG_BIND_REQUEST => {
            cursor.set_position(op_start);
            MessageParams::Bind(BindRequest::decode(&mut cursor)?)
        }
        TAG_BIND_RESPONSE => MessageParams::BindResponse(parse_bind_response(&mut cursor)?),
        TAG_UNBIND_REQUEST => {
            if !asn1::read_value(&mut cursor)?.is_empty() {
                return Err(Error::malformed("unbind request with content"));
            }
            MessageParams::Unbind
        }
        found => {
            return Err(Error::malformed(format!(
                "unsupported protocol op {:#04x}",
                found
            )))
        }
    };

    // controls are not interpreted
    if (cursor.position() as usize) < content.len() {
        asn1::expect_tag(&mut cursor, TAG_CONTROLS)?;
        asn1::read_value(&mut cursor)?;
    }
    if cursor.position() as usize != content.len() {
        return Err(Error::malformed("trailing bytes after message"));
    }
    Ok(Message { id, params })
}

/// Parses one LDAPMessage from the start of `data`.
///
/// Returns the message and the number of bytes it occupied, or
/// `Error::Incomplete` while the frame is still partial.
pub fn parse_message(data: &[u8]) -> Result<(Message, usize)> {
    let (header, _) = frame_header(data)?;
    let frame = frame_len(data)?;
    if data.len() < frame {
        return Err(Error::Incomplete);
    }
    let message = parse_envelope(&data[header..frame]).map_err(|e| {
        if e.is_incomplete() {
            Error::malformed("truncated element inside message")
        } else {
            e
        }
    })?;
    Ok((message, frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::Authentication;
    use crate::ldap::ResultCode;

    #[test]
    fn bind_test() {
        let data = hex::decode("3013020101600e0201030402787880056865736c6f").unwrap();
        let (m, used) = parse_message(&data).unwrap();
        assert_eq!(used, 21);
        assert_eq!(m.id, 1);
        if let MessageParams::Bind(b) = m.params {
            assert_eq!(b.name(), Some("xx"));
            assert_eq!(b.authentication(), Some(&Authentication::simple("heslo")));
            assert_eq!(b.version(), 3);
        } else {
            unreachable!();
        }
    }

    #[test]
    fn encode_bind_message() {
        let dn = "uid=akarasulu,dc=example,dc=com";
        let mut msg = Message {
            id: 1,
            params: MessageParams::Bind(BindRequest::simple(dn, "password")),
        };
        let bytes = encode_message(&mut msg).unwrap();
        assert_eq!(bytes.len(), 53);
        assert_eq!(&bytes[..7], &[0x30, 0x33, 0x02, 0x01, 0x01, 0x60, 0x2e]);

        let (parsed, used) = parse_message(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(parsed, msg);
    }

    #[test]
    fn partial_frames_are_incomplete() {
        let data = hex::decode("3013020101600e0201030402787880056865736c6f").unwrap();
        for cut in 0..data.len() {
            assert!(parse_message(&data[..cut]).unwrap_err().is_incomplete(), "cut {}", cut);
        }
    }

    #[test]
    fn two_messages_in_one_buffer() {
        let unbind: &[u8] = &[0x30, 0x05, 0x02, 0x01, 0x03, 0x42, 0x00];
        let mut data = unbind.to_vec();
        data.extend_from_slice(unbind);
        let (m, used) = parse_message(&data).unwrap();
        assert_eq!(used, 7);
        assert_eq!(m, Message { id: 3, params: MessageParams::Unbind });
        let (m, used) = parse_message(&data[used..]).unwrap();
        assert_eq!(used, 7);
        assert_eq!(m.id, 3);
    }

    #[test]
    fn long_form_envelope() {
        let mut msg = Message {
            id: 70000,
            params: MessageParams::Bind(BindRequest::simple("cn=".repeat(100), "pw")),
        };
        let bytes = encode_message(&mut msg).unwrap();
        assert_eq!(bytes[1], 0x82);
        assert_eq!(frame_len(&bytes).unwrap(), bytes.len());
        assert_eq!(parse_message(&bytes).unwrap().0, msg);
    }

    #[test]
    fn bind_response_success() {
        let data = hex::decode("300c02010161070a010004000400").unwrap();
        let (m, used) = parse_message(&data).unwrap();
        assert_eq!(used, 14);
        assert_eq!(
            m.params,
            MessageParams::BindResponse(MsgBindResponse::new(ResultCode::Success))
        );
    }

    #[test]
    fn bind_response_with_sasl_creds() {
        let mut response = MsgBindResponse::new(ResultCode::SaslBindInProgress);
        response.server_sasl_creds = Some(vec![0xab, 0xcd]);
        let mut msg = Message {
            id: 2,
            params: MessageParams::BindResponse(response),
        };
        let bytes = encode_message(&mut msg).unwrap();
        assert_eq!(
            hex::encode(&bytes),
            "3010020102610b0a010e040004008702abcd"
        );
        assert_eq!(parse_message(&bytes).unwrap().0, msg);
    }

    #[test]
    fn controls_are_skipped() {
        // unbind followed by an empty controls sequence
        let data = [0x30, 0x07, 0x02, 0x01, 0x05, 0x42, 0x00, 0xa0, 0x00];
        let (m, _) = parse_message(&data).unwrap();
        assert_eq!(m.params, MessageParams::Unbind);
    }

    #[test]
    fn rejects_unknown_operations() {
        let search = hex::decode("3029020102632404000a01020a0100020100020100010100a00f8703617861a30804027373040273733000").unwrap();
        assert!(matches!(parse_message(&search), Err(Error::Malformed(_))));
        assert!(matches!(
            parse_message(&[0x31, 0x00]),
            Err(Error::UnexpectedTag { expected: 0x30, found: 0x31 })
        ));
    }

    #[test]
    fn message_id_range() {
        let mut msg = Message {
            id: MAX_MESSAGE_ID + 1,
            params: MessageParams::Unbind,
        };
        assert!(encode_message(&mut msg).is_err());
        msg.id = MAX_MESSAGE_ID;
        let bytes = encode_message(&mut msg).unwrap();
        assert_eq!(&bytes[2..8], &[0x02, 0x04, 0x7f, 0xff, 0xff, 0xff]);
    }
}
