//! Typed access to SunSpec-style Modbus holding registers.
//!
//! [`client::RegisterClient`] ties a [`connection::Transport`] to a [`registry::Registry`] and
//! converts raw register words to and from [`value::Value`]s using the rules in [`marshal`].

pub mod client;
pub mod commands;
pub mod connection;
pub mod marshal;
pub mod modbus;
pub mod output;
pub mod registry;
pub mod value;
