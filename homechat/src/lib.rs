//! `HomeChat`: optimistic, at-most-once messaging core for a home-services
//! marketplace.
//!
//! - [`chat`]: message store, send controller, status reducer, selector,
//!   render layer and the async session driver
//! - [`backend`]: collaborator boundary and an in-memory implementation
//! - [`config`]: layered CLI / TOML / default configuration

pub mod backend;
pub mod chat;
pub mod config;
