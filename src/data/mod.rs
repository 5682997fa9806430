//! Data module: storage backends for per-item values.
#![warn(missing_docs)]

pub mod storage;

pub use storage::{Storage, VecStorage};
