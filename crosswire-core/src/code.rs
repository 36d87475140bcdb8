//! RPC status codes shared by the Connect, gRPC, and gRPC-Web protocols.

use serde::Serialize;

/// RPC status codes, matching the gRPC status code numbering.
///
/// The numeric values are a stable wire contract: gRPC and gRPC-Web carry
/// them as integers in `grpc-status`, while Connect carries the snake_case
/// names from [`Code::as_str`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    Ok = 0,
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Get the Connect protocol name of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::Canceled => "canceled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::DeadlineExceeded => "deadline_exceeded",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::PermissionDenied => "permission_denied",
            Code::ResourceExhausted => "resource_exhausted",
            Code::FailedPrecondition => "failed_precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out_of_range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data_loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }

    /// Parse a code from its Connect protocol name.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Code::Ok),
            "canceled" | "cancelled" => Some(Code::Canceled),
            "unknown" => Some(Code::Unknown),
            "invalid_argument" => Some(Code::InvalidArgument),
            "deadline_exceeded" => Some(Code::DeadlineExceeded),
            "not_found" => Some(Code::NotFound),
            "already_exists" => Some(Code::AlreadyExists),
            "permission_denied" => Some(Code::PermissionDenied),
            "resource_exhausted" => Some(Code::ResourceExhausted),
            "failed_precondition" => Some(Code::FailedPrecondition),
            "aborted" => Some(Code::Aborted),
            "out_of_range" => Some(Code::OutOfRange),
            "unimplemented" => Some(Code::Unimplemented),
            "internal" => Some(Code::Internal),
            "unavailable" => Some(Code::Unavailable),
            "data_loss" => Some(Code::DataLoss),
            "unauthenticated" => Some(Code::Unauthenticated),
            _ => None,
        }
    }

    /// Parse a code from its integer wire value (`grpc-status`).
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Code::Ok),
            1 => Some(Code::Canceled),
            2 => Some(Code::Unknown),
            3 => Some(Code::InvalidArgument),
            4 => Some(Code::DeadlineExceeded),
            5 => Some(Code::NotFound),
            6 => Some(Code::AlreadyExists),
            7 => Some(Code::PermissionDenied),
            8 => Some(Code::ResourceExhausted),
            9 => Some(Code::FailedPrecondition),
            10 => Some(Code::Aborted),
            11 => Some(Code::OutOfRange),
            12 => Some(Code::Unimplemented),
            13 => Some(Code::Internal),
            14 => Some(Code::Unavailable),
            15 => Some(Code::DataLoss),
            16 => Some(Code::Unauthenticated),
            _ => None,
        }
    }

    /// Map an HTTP status to a code for Connect unary responses whose body
    /// is not a valid Connect error object.
    pub fn from_connect_http_status(status: u16) -> Self {
        match status {
            200 => Code::Ok,
            400 => Code::InvalidArgument,
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            404 => Code::NotFound,
            408 => Code::DeadlineExceeded,
            409 => Code::AlreadyExists,
            412 => Code::FailedPrecondition,
            416 => Code::OutOfRange,
            429 => Code::ResourceExhausted,
            499 => Code::Canceled,
            500 => Code::Internal,
            501 => Code::Unimplemented,
            502..=504 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }

    /// Map an HTTP status to a code for gRPC and gRPC-Web responses that
    /// carry no `grpc-status`.
    pub fn from_grpc_http_status(status: u16) -> Self {
        match status {
            400 => Code::Internal,
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            404 => Code::Unimplemented,
            429 => Code::Unavailable,
            502..=504 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }

    /// Whether this code represents success.
    pub fn is_ok(&self) -> bool {
        matches!(self, Code::Ok)
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
