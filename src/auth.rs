//! Authentication methods and their VelocyStream payloads.

use std::fmt;

use crate::vpack;

/// VelocyStream message type for authentication messages.
const AUTH_MESSAGE_TYPE: u64 = 1000;

/// Credentials presented during connection initialization.
///
/// The authentication exchange is a single VelocyStream message sent after
/// the protocol handshake and before any user request.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthenticationMethod {
    /// User name and password, sent with `"plain"` encryption.
    Basic {
        /// User name.
        user: String,
        /// Password.
        password: String,
    },
    /// A JSON Web Token obtained out of band.
    Jwt {
        /// The token.
        token: String,
    },
}

impl AuthenticationMethod {
    /// Basic user/password credentials.
    pub fn basic(user: impl Into<String>, password: impl Into<String>) -> Self {
        AuthenticationMethod::Basic {
            user: user.into(),
            password: password.into(),
        }
    }

    /// JWT credentials.
    pub fn jwt(token: impl Into<String>) -> Self {
        AuthenticationMethod::Jwt {
            token: token.into(),
        }
    }

    /// The VelocyPack authentication message payload.
    pub(crate) fn vst_payload(&self) -> Vec<u8> {
        match self {
            AuthenticationMethod::Basic { user, password } => vpack::array(&[
                vpack::uint(1),
                vpack::uint(AUTH_MESSAGE_TYPE),
                vpack::string("plain"),
                vpack::string(user),
                vpack::string(password),
            ]),
            AuthenticationMethod::Jwt { token } => vpack::array(&[
                vpack::uint(1),
                vpack::uint(AUTH_MESSAGE_TYPE),
                vpack::string("jwt"),
                vpack::string(token),
            ]),
        }
    }
}

// Credentials must not leak into logs.
impl fmt::Debug for AuthenticationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticationMethod::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            AuthenticationMethod::Jwt { .. } => f
                .debug_struct("Jwt")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}
