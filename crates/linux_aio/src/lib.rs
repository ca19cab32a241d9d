// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Submission, completion and cancellation of Linux kernel AIO operations.
//!
//! The kernel AIO interface (`io_setup(2)`, `io_submit(2)`, `io_getevents(2)`, `io_cancel(2)`,
//! `io_destroy(2)`) lets a single thread keep many file operations in flight without blocking a
//! thread per operation. This crate wraps it in three types:
//!
//! * [`AioContext`] owns one kernel queue. Blocks are submitted to it and completions are reaped
//!   from it.
//! * [`Block`] is one request: a kernel descriptor laid out exactly as the kernel expects it, the
//!   buffers it points to and the file it targets. A block can be [converted][Block::convert] into
//!   a block of another [`OperationKind`], reusing its descriptor.
//! * [`Completion`] is the result of one block, resolved back to the block that was submitted.
//!
//! The kernel reads descriptors and reads or writes buffers while an operation is in flight. The
//! context keeps every submitted block alive until its completion is reaped, and a block rejects
//! modification while it is in flight, so none of that memory can be freed or changed underneath
//! the kernel.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use linux_aio::{AioContext, Block};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = std::fs::File::options()
//!     .read(true)
//!     .write(true)
//!     .create(true)
//!     .truncate(true)
//!     .open("data.bin")?;
//! let file = Arc::new(file);
//!
//! let context = AioContext::open(8)?;
//!
//! let write = Block::builder(Arc::clone(&file)).write("hello")?;
//! context.submit([&write])?;
//! context.get_events(1, 8, None)?;
//!
//! let read = Block::builder(file).read(vec![0; 16])?;
//! context.submit([&read])?;
//!
//! for completion in context.get_events(1, 8, None)? {
//!     assert_eq!(completion.stripped_buffer().as_deref(), Some(&b"hello"[..]));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Logging
//!
//! Context lifecycle, conversions and partial submissions are reported through [`tracing`] at
//! `DEBUG` and `TRACE` level. A failure to close a context on drop is reported at `WARN` level and
//! a completion the kernel reports for an unknown block at `ERROR` level.

#![cfg(target_os = "linux")]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod bindings;
mod block;
mod completion;
mod constants;
mod context;
mod error;
mod flags;
mod kind;
pub mod layout;
mod priority;
mod thread_safe;

#[cfg(test)]
mod testing;

pub use block::*;
pub use completion::*;
pub use context::*;
pub use error::*;
pub use flags::*;
pub use kind::*;
pub use layout::RawContext;
pub use priority::*;
