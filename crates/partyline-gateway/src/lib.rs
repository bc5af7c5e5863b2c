pub mod hub;
mod worker;

pub use hub::{ChannelHub, HubError};
