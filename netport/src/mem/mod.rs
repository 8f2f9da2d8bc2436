pub mod arena;
pub mod frame;

pub use arena::{BufferPool, Census, PoolError};
pub use frame::{BufferTag, FrameBuf, Owner, OwnershipViolation};
