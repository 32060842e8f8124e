//! Wire protocol for the HassLife cloud bridge.
//!
//! Every message travels as one frame: a fixed 32-byte header whose first
//! four bytes carry the little-endian body length, followed by a UTF-8 JSON
//! body. See [`frame`] for the codec.

pub mod constants;
pub mod envelope;
pub mod frame;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::Message;
pub use frame::{FrameError, decode, encode, read_frame, write_frame};
pub use types::{EntitySnapshot, EntityState};
