//! Generic set-associative cache: tag store, replacement policy, I/O
//! queues, and the controller that wires them to a next-level hop.

pub mod array;
pub mod controller;
pub mod iobus;
pub mod policy;

pub use array::{CacheArray, CacheEntry};
pub use controller::{CacheController, ControllerConfig, ControllerStats, MshrEntry};
pub use iobus::IOBus;
pub use policy::ReplacementPolicy;
