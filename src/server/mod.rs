//! JSON-RPC 2.0 over a Unix domain socket

pub mod handler;
pub mod server;
pub mod session;

pub use {
    handler::RequestHandler,
    server::UnixSocketServer,
    session::{SessionReader, UnixSocketSession},
};
