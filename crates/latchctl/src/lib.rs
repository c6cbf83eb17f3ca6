//! latchctl library - registry and device clients, terminal output

pub mod client;
pub mod output;
