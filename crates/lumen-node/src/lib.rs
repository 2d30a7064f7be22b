//! Library half of the `lumen-node` binary: configuration and node wiring.

pub mod config;
pub mod node;

pub use config::NodeConfig;
pub use node::{bootstrap, unix_now, Node};
