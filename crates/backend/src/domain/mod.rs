//! Domain types - core business entities
//!
//! These types are independent of the HTTP layer and of how learned words are
//! persisted.

pub mod config;
pub mod scheme;
