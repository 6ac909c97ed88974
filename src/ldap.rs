use crate::bind::BindRequest;

pub const TAG_BIND_RESPONSE: u8 = 0x61;
pub const TAG_UNBIND_REQUEST: u8 = 0x42;
pub const TAG_SERVER_SASL_CREDS: u8 = 0x87;

pub const MAX_MESSAGE_ID: u32 = i32::MAX as u32;

/// LDAP resultCode values a bind can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    OperationsError,
    ProtocolError,
    AuthMethodNotSupported,
    StrongerAuthRequired,
    SaslBindInProgress,
    InappropriateAuthentication,
    InvalidCredentials,
    InsufficientAccessRights,
    Busy,
    Unavailable,
    UnwillingToPerform,
    Other,
    Unknown(u32),
}

impl ResultCode {
    pub fn code(self) -> u32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::OperationsError => 1,
            ResultCode::ProtocolError => 2,
            ResultCode::AuthMethodNotSupported => 7,
            ResultCode::StrongerAuthRequired => 8,
            ResultCode::SaslBindInProgress => 14,
            ResultCode::InappropriateAuthentication => 48,
            ResultCode::InvalidCredentials => 49,
            ResultCode::InsufficientAccessRights => 50,
            ResultCode::Busy => 51,
            ResultCode::Unavailable => 52,
            ResultCode::UnwillingToPerform => 53,
            ResultCode::Other => 80,
            ResultCode::Unknown(c) => c,
        }
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

impl From<u32> for ResultCode {
    fn from(code: u32) -> Self {
        match code {
            0 => ResultCode::Success,
            1 => ResultCode::OperationsError,
            2 => ResultCode::ProtocolError,
            7 => ResultCode::AuthMethodNotSupported,
            8 => ResultCode::StrongerAuthRequired,
            14 => ResultCode::SaslBindInProgress,
            48 => ResultCode::InappropriateAuthentication,
            49 => ResultCode::InvalidCredentials,
            50 => ResultCode::InsufficientAccessRights,
            51 => ResultCode::Busy,
            52 => ResultCode::Unavailable,
            53 => ResultCode::UnwillingToPerform,
            80 => ResultCode::Other,
            c => ResultCode::Unknown(c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgBindResponse {
    pub result: ResultCode,
    pub matched_dn: String,
    pub diagnostic_message: String,
    pub server_sasl_creds: Option<Vec<u8>>,
}

impl MsgBindResponse {
    pub fn new(result: ResultCode) -> Self {
        Self {
            result,
            matched_dn: String::new(),
            diagnostic_message: String::new(),
            server_sasl_creds: None,
        }
    }

    pub fn with_diagnostic(mut self, msg: impl Into<String>) -> Self {
        self.diagnostic_message = msg.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageParams {
    Bind(BindRequest),
    BindResponse(MsgBindResponse),
    Unbind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u32,
    pub params: MessageParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_round_trip() {
        for code in [0u32, 1, 2, 7, 8, 14, 48, 49, 50, 51, 52, 53, 80, 4096] {
            assert_eq!(ResultCode::from(code).code(), code);
        }
        assert_eq!(ResultCode::from(49), ResultCode::InvalidCredentials);
        assert_eq!(ResultCode::from(4096), ResultCode::Unknown(4096));
    }
}
