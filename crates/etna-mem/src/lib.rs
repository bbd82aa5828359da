//! # ETNA Buffer Objects
//!
//! Device registry and buffer-object lifetime tracking.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      DeviceRegistry                             │
//! │           (connection id → Weak<Device>, one lock)              │
//! │                              │                                  │
//! │  ┌───────────────────────────┴───────────────────────────────┐  │
//! │  │                         Device                            │  │
//! │  │   handle table: GemHandle → Weak<BufferObject>            │  │
//! │  │   name table:   FlinkName → Weak<BufferObject>            │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │           │                                     │               │
//! │  ┌────────┴────────┐                   ┌────────┴───────────┐   │
//! │  │  BufferObject   │  ...              │   BufferObject     │   │
//! │  │ (Arc, mapping,  │                   │ (imported by name  │   │
//! │  │  dma-buf, name) │                   │  or descriptor)    │   │
//! │  └─────────────────┘                   └────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Strong references only ever point down: buffers keep their device alive,
//! tables point back up weakly.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bo;
pub mod device;

// Re-exports
pub use bo::{BufferObject, CpuAccess};
pub use device::{Device, DeviceRegistry};
