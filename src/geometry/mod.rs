//! Geometric value types stored in item properties.

pub mod real3;

pub use real3::Real3;
