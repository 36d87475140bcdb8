//! Message encoding: the protobuf/JSON codec seam.

use bytes::Bytes;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::code::Code;
use crate::error::RpcError;

/// Message encoding negotiated with the server.
///
/// The wire name appears in the request content type
/// (`application/proto`, `application/connect+json`,
/// `application/grpc-web+proto`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Binary protobuf encoding.
    #[default]
    Proto,
    /// JSON encoding.
    Json,
}

impl Encoding {
    /// The codec name used in content types and GET query parameters.
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Proto => "proto",
            Encoding::Json => "json",
        }
    }

    /// Encode a message.
    pub fn encode<M>(&self, message: &M) -> Result<Bytes, RpcError>
    where
        M: Message + Serialize,
    {
        match self {
            Encoding::Proto => Ok(Bytes::from(message.encode_to_vec())),
            Encoding::Json => serde_json::to_vec(message).map(Bytes::from).map_err(|e| {
                RpcError::new(Code::Internal, "JSON encoding failed").with_source(e)
            }),
        }
    }

    /// Decode a message.
    pub fn decode<M>(&self, bytes: &[u8]) -> Result<M, RpcError>
    where
        M: Message + DeserializeOwned + Default,
    {
        match self {
            Encoding::Proto => M::decode(bytes).map_err(|e| {
                RpcError::new(Code::Internal, "protobuf decoding failed").with_source(e)
            }),
            Encoding::Json => serde_json::from_slice(bytes).map_err(|e| {
                RpcError::new(Code::Internal, "JSON decoding failed").with_source(e)
            }),
        }
    }
}
