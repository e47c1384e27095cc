mod codec;
mod signature;
mod value;

use std::string::FromUtf8Error;

use thiserror::Error;

pub use codec::{ArgDecoder, ArgEncoder};
pub use signature::{parse_signature, ArgSpec, ArgType, PrimitiveType, Signature};
pub use value::{ArgValue, ArgumentValues};

/// Version of the JSON trace format understood by the loader.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("empty signature")]
    Empty,
    #[error("unbalanced parentheses in signature {0:?}")]
    Unbalanced(String),
    #[error("invalid event name {0:?}")]
    InvalidName(String),
    #[error("malformed argument {0:?}")]
    MalformedArgument(String),
    #[error("unknown argument type {0:?}")]
    UnknownType(String),
    #[error("invalid ordinal in argument {0:?}")]
    InvalidOrdinal(String),
    #[error("duplicate argument {0:?}")]
    DuplicateArgument(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("non-ascii byte in ascii string")]
    InvalidAscii,
    #[error("invalid utf8 string: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("expected {expected} values, got {actual}")]
    ValueCount { expected: usize, actual: usize },
    #[error("argument {slot} is not a {expected}")]
    TypeMismatch { slot: usize, expected: &'static str },
    #[error("argument {slot} is too long for its length prefix")]
    TooLong { slot: usize },
}
