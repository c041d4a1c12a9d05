//! Response value type.

use std::collections::BTreeMap;

use crate::error::{DriverError, DriverResult};
use crate::vpack::Slice;

/// Message type of a response head.
const MESSAGE_TYPE_RESPONSE: u64 = 2;

/// An immutable response: HTTP-style code, meta headers and an opaque body.
///
/// Responses are delivered for every server answer, including non-2xx codes;
/// interpreting the code is the caller's business. The caller owns the body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    version: u64,
    response_code: u16,
    meta: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl Response {
    /// Protocol version from the response head.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// HTTP-style response code.
    pub fn response_code(&self) -> u16 {
        self.response_code
    }

    /// Meta headers.
    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }

    /// Response body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Take ownership of the body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Parse a message payload: the VelocyPack head
    /// `[version, type, responseCode]` or `[version, type, responseCode,
    /// meta]`, followed by the body bytes.
    pub(crate) fn from_payload(payload: Vec<u8>) -> DriverResult<Self> {
        let head = Slice::new(&payload)?;
        let head_size = head.byte_size()?;
        let items = head.array_items()?;
        if items.len() < 3 || items.len() > 4 {
            return Err(DriverError::protocol(format!(
                "response head has {} elements, expected 3 or 4",
                items.len()
            )));
        }
        let version = items[0].as_u64()?;
        let message_type = items[1].as_u64()?;
        if message_type != MESSAGE_TYPE_RESPONSE {
            return Err(DriverError::protocol(format!(
                "unexpected message type {message_type} in response head"
            )));
        }
        let code = items[2].as_u64()?;
        let response_code = u16::try_from(code)
            .map_err(|_| DriverError::protocol(format!("response code {code} out of range")))?;
        let meta = match items.get(3) {
            Some(slice) => slice.as_string_map()?,
            None => BTreeMap::new(),
        };
        let body = payload[head_size..].to_vec();
        Ok(Response {
            version,
            response_code,
            meta,
            body,
        })
    }
}
