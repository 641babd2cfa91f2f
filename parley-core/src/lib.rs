//! Turn-taking and bounded-memory engine for multi-speaker sessions
//!
//! An [`bus::EventBus`] carries every event of a session, a
//! [`floor::FloorArbitrator`] decides who may speak next, and a
//! [`memory::MemoryStore`] keeps a capped digest of what was said.

pub mod balance;
pub mod bus;
pub mod config;
pub mod error;
pub mod floor;
pub mod logging;
pub mod memory;
pub mod utils;

pub use error::{Error, Result};
