//! Domain types for the two stores.
//!
//! `item` holds the sandbox side (the mutable planning tree); `authority`
//! holds the governance side (the system of record).

pub mod authority;
pub mod item;
