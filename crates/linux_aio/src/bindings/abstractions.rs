// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::mem::MaybeUninit;
use std::time::Duration;

use crate::Errno;
use crate::layout::{RawContext, RawIocb, RawIoEvent};

/// Result of a system call: the value it produced or the `errno` it failed with.
pub type SysResult<T> = Result<T, Errno>;

/// Bindings for the kernel AIO system calls and the kernel settings we report on.
///
/// All kernel calls must go through this trait, enabling them to be mocked.
#[cfg_attr(test, mockall::automock)]
pub trait Bindings: Debug + Send + Sync + 'static {
    fn io_setup(&self, capacity: u32) -> SysResult<RawContext>;

    fn io_destroy(&self, context: RawContext) -> SysResult<()>;

    /// Returns the number of descriptors the kernel accepted, which may be fewer than given.
    ///
    /// # Safety
    ///
    /// Every pointer must reference a valid descriptor whose memory, and any buffer the descriptor
    /// points to, stays valid and untouched until its completion is reaped or its cancellation
    /// reports a result.
    unsafe fn io_submit(&self, context: RawContext, iocbs: &[*mut RawIocb]) -> SysResult<usize>;

    /// Waits for at least `min_count` completions, filling at most `events.len()` entries.
    /// Returns the number of entries filled. `None` waits without a time limit.
    fn io_getevents(
        &self,
        context: RawContext,
        min_count: usize,
        events: &mut [MaybeUninit<RawIoEvent>],
        timeout: Option<Duration>,
    ) -> SysResult<usize>;

    /// # Safety
    ///
    /// The pointer must reference a descriptor previously submitted to `context`.
    unsafe fn io_cancel(
        &self,
        context: RawContext,
        iocb: *mut RawIocb,
        result: &mut RawIoEvent,
    ) -> SysResult<()>;

    /// The system-wide limit on events across all contexts, if it can be determined.
    fn aio_max_nr(&self) -> Option<u64>;
}
