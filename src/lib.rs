#[macro_use]
extern crate tracing;

pub mod cmd;
pub mod config;
pub mod errors;
pub mod mysql;
pub mod purge;
pub mod server;
pub mod utilities;
