//! # ETNA Command Streams
//!
//! Pipes and the command streams authored against them.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    Command Submission Pipeline                    │
//! │                                                                   │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────────┐     │
//! │  │  CmdStream   │    │   Submit     │    │  KernelGateway   │     │
//! │  │ (words, bos, │───▶│   request    │───▶│  (DRM / sim)     │     │
//! │  │   relocs)    │    │              │    │                  │     │
//! │  └──────────────┘    └──────────────┘    └────────┬─────────┘     │
//! │         │                                         │ fence         │
//! │  ┌──────▼───────┐                        ┌────────▼─────────┐     │
//! │  │    Pipe      │◀───────── wait ────────│   GPU core       │     │
//! │  │ (core, specs)│                        │ (3D / 2D / VG)   │     │
//! │  └──────────────┘                        └──────────────────┘     │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Submission Flow
//!
//! 1. Caller reserves room and emits words and relocations
//! 2. Flush hands words, buffer table and relocations to the kernel
//! 3. The kernel patches addresses and queues the stream
//! 4. The returned fence is waited on through the pipe

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod pipe;
pub mod stream;

// Re-exports
pub use pipe::{GpuSpecs, Pipe};
pub use stream::{Buffering, CmdStream, Reloc, ResetCallback, StreamConfig, StreamStats};
