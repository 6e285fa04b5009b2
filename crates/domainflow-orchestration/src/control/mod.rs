//! Per-(campaign, phase) control bus: commands, acks, and the channel map.

pub mod command;
pub mod manager;

pub use command::{ControlAckReceiver, ControlAckSender, ControlCommand, ControlSignal};
pub use manager::{ControlChannelManager, ControlChannels, ControlReceiver};
