//! Store topology and connection acquisition.
//!
//! # Responsibility
//! - Describe which physical store plays which role.
//! - Hand out scoped connections to those stores.
//!
//! # Invariants
//! - Exactly one authoritative store, one backup store, one store per house.

pub mod connector;
pub mod registry;
