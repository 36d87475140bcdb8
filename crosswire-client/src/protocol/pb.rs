//! Protobuf mirrors of `google.rpc.Status` and `google.protobuf.Any`,
//! used for the `grpc-status-details-bin` trailer payload.

/// The `google.rpc.Status` message carried in `grpc-status-details-bin`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<Any>,
}

/// The `google.protobuf.Any` message: a type URL plus encoded bytes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Any {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}
