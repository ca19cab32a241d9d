// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::Bytes;

use crate::{Block, Buffer, Errno, OperationKind, PollEvents};

/// The result of one finished [`Block`], as reaped by
/// [`AioContext::get_events()`][crate::AioContext::get_events] or returned by a successful
/// [`AioContext::cancel()`][crate::AioContext::cancel].
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Clone, Debug)]
pub struct Completion {
    block: Block,
    buffer: Option<Buffer>,
    result: i64,
    result2: i64,
}

impl Completion {
    pub(crate) const fn new(block: Block, buffer: Option<Buffer>, result: i64, result2: i64) -> Self {
        Self {
            block,
            buffer,
            result,
            result2,
        }
    }

    /// The block that finished. It is no longer in flight and may be modified or resubmitted.
    #[must_use]
    pub const fn block(&self) -> &Block {
        &self.block
    }

    /// The block's buffer(s) as the kernel left them. `None` for kinds that transfer no data.
    ///
    /// For reads, only the first [`result()`][Self::result] bytes were filled by the kernel.
    #[must_use]
    pub const fn buffer(&self) -> Option<&Buffer> {
        self.buffer.as_ref()
    }

    /// The buffer of a non-vectored block without its trailing zero bytes.
    ///
    /// Handy for reads into a zero-filled buffer larger than the data.
    #[must_use]
    pub fn stripped_buffer(&self) -> Option<Bytes> {
        let bytes = self.buffer.as_ref()?.as_single()?;
        let end = bytes.iter().rposition(|&byte| byte != 0).map_or(0, |last| last + 1);

        Some(bytes.slice(..end))
    }

    /// The primary result: the number of bytes transferred, zero for a sync, the ready events of
    /// a poll, or a negated `errno` if the operation failed.
    #[must_use]
    pub const fn result(&self) -> i64 {
        self.result
    }

    /// The secondary result. Zero for most operations.
    #[must_use]
    pub const fn result2(&self) -> i64 {
        self.result2
    }

    /// The `errno` the operation failed with, if the primary result reports a failure.
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        if self.result >= 0 {
            return None;
        }

        i32::try_from(self.result.checked_neg()?)
            .ok()
            .map(Errno::from_raw)
    }

    /// The events a poll block found ready. `None` for other kinds and for failed polls.
    #[must_use]
    pub fn ready_events(&self) -> Option<PollEvents> {
        if self.block.kind() != OperationKind::Poll {
            return None;
        }

        u32::try_from(self.result)
            .ok()
            .map(PollEvents::from_bits_retain)
    }

    /// The number of bytes transferred, if the operation succeeded.
    #[must_use]
    pub fn transferred(&self) -> Option<u64> {
        u64::try_from(self.result).ok()
    }
}
