//! HTTP request handlers.

pub mod capabilities;
pub mod objects;

pub use capabilities::*;
pub use objects::*;
