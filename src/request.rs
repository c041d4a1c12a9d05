//! Request value type.

use std::collections::BTreeMap;

use crate::vpack;

/// Protocol version carried in every message head.
pub(crate) const PROTOCOL_VERSION: u64 = 1;

/// Message type of a request head.
const MESSAGE_TYPE_REQUEST: u64 = 1;

/// HTTP-style method of a request, with its wire code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestType {
    /// DELETE
    Delete,
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// HEAD
    Head,
    /// PATCH
    Patch,
    /// OPTIONS
    Options,
}

impl RequestType {
    /// The integer code used in the request head.
    pub fn code(self) -> u64 {
        match self {
            RequestType::Delete => 0,
            RequestType::Get => 1,
            RequestType::Post => 2,
            RequestType::Put => 3,
            RequestType::Head => 4,
            RequestType::Patch => 5,
            RequestType::Options => 6,
        }
    }
}

/// An immutable request: method, database, path, parameters and an opaque
/// body.
///
/// Built via [`Request::builder`]; not modifiable after construction. The
/// body is consumed by the framing layer when the request is sent.
#[derive(Clone, Debug)]
pub struct Request {
    database: String,
    request_type: RequestType,
    path: String,
    query_params: BTreeMap<String, String>,
    header_params: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl Request {
    /// Start building a request.
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Target database.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Request method.
    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// Request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameters.
    pub fn query_params(&self) -> &BTreeMap<String, String> {
        &self.query_params
    }

    /// Header parameters.
    pub fn header_params(&self) -> &BTreeMap<String, String> {
        &self.header_params
    }

    /// Request body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Encode the message payload: the VelocyPack head
    /// `[version, type, database, method, path, query, headers]` followed by
    /// the body bytes. Consumes the request, releasing the body buffer into
    /// the payload.
    pub(crate) fn into_payload(self) -> Vec<u8> {
        let head = vpack::array(&[
            vpack::uint(PROTOCOL_VERSION),
            vpack::uint(MESSAGE_TYPE_REQUEST),
            vpack::string(&self.database),
            vpack::uint(self.request_type.code()),
            vpack::string(&self.path),
            vpack::object(&self.query_params),
            vpack::object(&self.header_params),
        ]);
        let mut payload = head;
        payload.extend_from_slice(&self.body);
        payload
    }
}

/// Builder for [`Request`].
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    database: String,
    request_type: RequestType,
    path: String,
    query_params: BTreeMap<String, String>,
    header_params: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self {
            database: "_system".to_owned(),
            request_type: RequestType::Get,
            path: "/".to_owned(),
            query_params: BTreeMap::new(),
            header_params: BTreeMap::new(),
            body: Vec::new(),
        }
    }
}

impl RequestBuilder {
    /// Set the target database. Defaults to `_system`.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the request method. Defaults to GET.
    pub fn request_type(mut self, request_type: RequestType) -> Self {
        self.request_type = request_type;
        self
    }

    /// Set the request path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Add a query parameter.
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    /// Add a header parameter.
    pub fn header_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header_params.insert(key.into(), value.into());
        self
    }

    /// Set the request body. Ownership moves into the request and, when the
    /// request is sent, into the framing layer.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Build the request.
    pub fn build(self) -> Request {
        Request {
            database: self.database,
            request_type: self.request_type,
            path: self.path,
            query_params: self.query_params,
            header_params: self.header_params,
            body: self.body,
        }
    }
}
