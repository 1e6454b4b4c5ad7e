//! CLI command implementations.

pub mod decode_frame;
pub mod fetch;
pub mod watch;
