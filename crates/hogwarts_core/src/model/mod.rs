//! Domain model shared by every store.
//!
//! # Responsibility
//! - Define the student record and its partition key.
//! - Keep validation next to the data so repository writes can enforce it.

pub mod student;
