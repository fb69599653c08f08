//! Fixtures for testing code that talks to InterMine services, without a network.
pub mod fixtures;
