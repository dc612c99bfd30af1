//! The text protocol spoken on the init socket.

pub mod frame;
pub mod reply;

pub use frame::{encode_request, EncodeError, FrameError, Framer, TimedRead};
pub use reply::{parse_reply, write_outcome, Outcome, Reply};
