//! Observer Channel (spec §4.6): pub/sub over run IDs, streaming status,
//! log, iteration, and result frames to external consumers.

pub mod bridge;
pub mod channel;
pub mod frame;

pub use bridge::spawn_bridge;
pub use channel::ObserverChannel;
pub use frame::{Frame, FrameType};
