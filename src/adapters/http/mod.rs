//! HTTP adapters for outbound transport ports.

pub mod agent_channel;

pub use agent_channel::HttpAgentChannel;
