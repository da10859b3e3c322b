//! Game service library
//!
//! Token and session admission for the id-100 photo game: a printed bag
//! carries a QR code with an upload token, players scan it, take the bag
//! under their name and upload photos until the quota runs out.
//!
//! The binary in `main.rs` wires configuration, PostgreSQL, object storage
//! and the listener around [`routes::create_router`].

pub mod clock;
pub mod config;
pub mod csrf;
pub mod error;
pub mod gate;
pub mod middleware;
pub mod models;
pub mod mutators;
pub mod qr;
pub mod quota;
pub mod repositories;
pub mod routes;
pub mod session;
pub mod state;
pub mod storage;
pub mod validation;
pub mod views;
