//! # respline-client
//!
//! Async client for Redis-compatible servers.
//!
//! This crate provides:
//! - Pipelined TCP connection with strict FIFO reply correlation
//! - Server capability probing (version and geo support) with client-side gating
//! - Typed geo commands (GEOADD, GEOHASH, GEOPOS, GEODIST, GEORADIUS, GEORADIUSBYMEMBER)
//! - Optional reconnection with bounded attempts

pub mod capability;
pub mod client;
pub mod connection;
pub mod error;
pub mod geo;

#[cfg(test)]
mod testing;

pub use capability::{GeoProbe, ServerCapabilities, ServerVersion};
pub use client::Client;
pub use connection::{Connection, ConnectionConfig, ConnectionState, ReconnectPolicy};
pub use error::ClientError;
pub use geo::{GeoCoord, GeoPoint, GeoRadiusEntry, GeoRadiusOptions, GeoUnit, SortOrder};
pub use respline_protocol::{Command, Reply};
