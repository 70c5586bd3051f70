//! Wire protocol: message types, framing, and the codec between them

pub mod codec;
pub mod frame;
pub mod messages;

pub use codec::{decode, encode};
pub use frame::{FrameCodec, MAX_FRAME_SIZE};
pub use messages::{ClientMessage, ErrorReason, ServerMessage};
