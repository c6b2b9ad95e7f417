//! I/O bridge between the parent's standard streams and the child.
//!
//! Submodules:
//! - `channel`: private directory and FIFO creation.
//! - `copier`: one forwarding task per stream direction.

pub mod channel;
pub mod copier;

pub use channel::{create_private_dir, open_duplex_channel, ChannelSet, Stream};
pub use copier::{debug_log_path, Bridge, BridgeEvent, BridgeReport, Flow};
