//! Mock StoneBeam backend.
//!
//! Serves the four live-update endpoints so the client can be run end to
//! end. Each transport can be switched off or made to misbehave, and the
//! server records what clients send it.

mod server;

pub use server::{Backend, Endpoint, Options, SocketMode, router, serve, spawn};
