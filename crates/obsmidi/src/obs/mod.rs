//! obs-websocket v5 client, event pump and initial discovery.

pub mod client;
pub mod events;
pub mod init;
pub mod protocol;

pub use client::ObsClient;
pub use events::{FrameHandler, ObsEventPump};
pub use init::InitialQuery;
pub use protocol::Frame;
