//! Cherry Servers API integration.
//!
//! This module contains the HTTP client, the wire types returned by the
//! API, and the read-only inventory listing built on top of the client.

mod client;
mod inventory;
pub mod types;

pub use client::{Ack, CherryClient};
pub use inventory::{Inventory, ServerFilter};
pub use types::{FloatingIp, ObservedResource, Project, ResourceRef, Server, SshKey, Tags, Volume};
