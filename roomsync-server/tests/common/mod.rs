//! Shared test utilities.

pub mod server;
pub mod ws;

pub use server::TestServer;
