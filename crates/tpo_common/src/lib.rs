//! Shared foundational types used across the tpo build orchestrator.
//!
//! This crate provides content hashing, the immutable platform descriptor that
//! identifies a build target, and the cooperative cancellation token shared by
//! the executor and the batch aggregator.

#![warn(missing_docs)]

pub mod cancel;
pub mod fsutil;
pub mod hash;
pub mod platform;

pub use cancel::CancelToken;
pub use hash::{ContentHash, ContentHasher};
pub use platform::{PlatformDescriptor, TargetKind};
