//! Client/server surface: statement execution, the wire format, the TCP
//! server and the client.

#![forbid(unsafe_code)]

mod client;
mod executor;
mod tcp;
mod transport;

pub use client::{run_shell, Client};
pub use executor::Executor;
pub use tcp::{serve_session, Server, DEFAULT_ADDR, DEFAULT_MAX_CONNECTIONS};
pub use transport::{Package, Transport, MAX_PAYLOAD};
