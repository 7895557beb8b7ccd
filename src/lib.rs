pub mod buffer;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod keys;
pub mod peer;
pub mod pipeline;
pub mod queue;
pub mod routing;
pub mod timers;
pub mod tun;
pub mod work;

pub use device::Device;
pub use error::{CoreError, Result};
pub use peer::{Peer, PeerBuilder};
