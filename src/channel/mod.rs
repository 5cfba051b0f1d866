//! Channel Module - realtime WebSocket channels
//!
//! - one persistent link per topic, replaced on retarget
//! - `type`-tagged JSON frame dispatch
//! - fixed-delay reconnect after unexpected closes
//!

mod client;
#[cfg(test)]
pub(crate) mod memory;
mod router;
mod transport;

pub use client::{ChannelClient, ChannelError, ChannelEvent, ReconnectPolicy};
pub use router::{Dispatch, Router};
pub use transport::{Connector, Link, LinkCommand, LinkEvent, WsConnector};
