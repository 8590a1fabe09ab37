//! Types shared between the vmforge library and its binaries.

pub mod errors;

pub use errors::{VmforgeError, VmforgeResult};
