//! # ETNA Core
//!
//! Foundational types shared by every layer of the Vivante submission stack.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        etna-core                            │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Types     │  │   Flags     │  │     Error           │  │
//! │  │ (GemHandle, │  │ (BoFlags,   │  │   Handling          │  │
//! │  │  PipeId)    │  │  PrepOp)    │  │   (Error, Errno)    │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! │  ┌─────────────────────────┐  ┌──────────────────────────┐  │
//! │  │   Sync (Fence)          │  │   Time (Deadline)        │  │
//! │  └─────────────────────────┘  └──────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod error;
pub mod flags;
pub mod sync;
pub mod time;
pub mod types;

// Re-exports for convenience
pub use error::{Errno, Error, KernelResult, Result};
pub use flags::{BoFlags, PrepOp, RelocFlags, SubmitBoFlags};
pub use sync::Fence;
pub use time::{Deadline, DEFAULT_TIMEOUT_MS};
pub use types::*;
