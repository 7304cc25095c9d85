//! hostguard core library: post-apply command runner and the local HTTP control API,
//! shared by the CLI.

pub mod agent;
pub mod command;
pub mod config;
pub mod events;
pub mod gateway;
pub mod init;
pub mod sanitize;
pub mod store;
