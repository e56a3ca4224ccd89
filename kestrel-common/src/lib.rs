//! # Kestrel Common
//!
//! Shared wire-protocol definitions for the Kestrel server and client: the
//! length-prefixed request framing and the typed value serialization.

pub mod frame;
pub mod value;

pub use frame::{decode_args, encode_request, take_frame, write_frame, FrameError, MAX_ARGS, MAX_MSG};
pub use value::{parse_value, ErrCode, OutBuf, Value};
