//! Core library for the Silmaril peer-to-peer model distribution daemon.
//!
//! The daemon wires these modules together through [`supervisor::Supervisor`];
//! embedding callers (a CLI, a service wrapper) construct a [`config::SilmarilConfig`]
//! and drive the supervisor directly.

pub mod catalog;
pub mod config;
pub mod dht;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod publish;
pub mod registry;
pub mod session;
pub mod signing;
pub mod state;
pub mod supervisor;
pub mod torrent_file;
pub mod transfer;
