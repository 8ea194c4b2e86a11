//! Viewer tracking module.
//!
//! A viewer is one connected remote endpoint. The hub only ever holds the
//! sending half of a viewer's outbound queue; the connection that accepted
//! the viewer owns the socket and drains the queue into it.

pub mod registry;

pub use registry::{DeliveryError, RegistryError, Viewer, ViewerId, ViewerRegistry};
