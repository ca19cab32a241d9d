// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::os::fd::{AsRawFd, BorrowedFd, RawFd};

use crate::block::{Block, Buffers, SharedFile};
use crate::layout::RawIocb;
use crate::{
    BlockFlags, Error, IoPriority, OperationKind, PollEvents, PriorityClass, Result, RwFlags, Step,
};

/// Collects the settings of a new [`Block`]. Finish with one of the methods named after the
/// operation to perform, such as [`read()`][Self::read] or [`sync()`][Self::sync].
///
/// Settings that do not apply to the chosen operation are ignored: sync and poll blocks have no
/// offset, length or read/write flags.
#[derive(derive_more::Debug)]
#[must_use]
pub struct BlockBuilder {
    #[debug(ignore)]
    file: SharedFile,
    offset: i64,
    length: Option<u64>,
    rw_flags: RwFlags,
    priority: IoPriority,
    result_fd: Option<RawFd>,
}

impl BlockBuilder {
    pub(crate) fn new(file: SharedFile) -> Self {
        Self {
            file,
            offset: 0,
            length: None,
            rw_flags: RwFlags::empty(),
            priority: IoPriority::default(),
            result_fd: None,
        }
    }

    /// The file offset to read from or write to. Defaults to zero.
    pub const fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// The number of bytes to transfer. Defaults to the size of the buffer and must not exceed it.
    /// Only meaningful for reads and writes.
    pub const fn length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Per-request flags of a data transfer.
    pub const fn rw_flags(mut self, rw_flags: RwFlags) -> Self {
        self.rw_flags = rw_flags;
        self
    }

    /// An explicit I/O priority. Unless both class and value are zero, this also sets
    /// [`BlockFlags::IO_PRIORITY`].
    pub const fn priority(mut self, class: PriorityClass, value: u16) -> Self {
        self.priority = IoPriority::new(class, value);
        self
    }

    /// An eventfd to signal on completion, which also sets [`BlockFlags::RESULT_FD`].
    ///
    /// The descriptor must still be open when the block is submitted.
    pub fn result_fd(mut self, fd: BorrowedFd<'_>) -> Self {
        self.result_fd = Some(fd.as_raw_fd());
        self
    }

    /// A block that reads into `buffer`.
    ///
    /// # Errors
    ///
    /// Fails if a length larger than the buffer was requested.
    pub fn read(self, buffer: impl Into<Vec<u8>>) -> Result<Block> {
        self.single(OperationKind::Read, buffer.into())
    }

    /// A block that writes `buffer`. Text is written as its UTF-8 bytes.
    ///
    /// # Errors
    ///
    /// Fails if a length larger than the buffer was requested.
    pub fn write(self, buffer: impl Into<Vec<u8>>) -> Result<Block> {
        self.single(OperationKind::Write, buffer.into())
    }

    /// A block that reads into each region in turn.
    ///
    /// # Errors
    ///
    /// Fails if a length was requested, since the length of a vectored block is its region count.
    pub fn read_vectored<I>(self, regions: I) -> Result<Block>
    where
        I: IntoIterator,
        I::Item: Into<Vec<u8>>,
    {
        self.vectored(OperationKind::ReadVectored, regions)
    }

    /// A block that writes each region in turn.
    ///
    /// # Errors
    ///
    /// Fails if a length was requested, since the length of a vectored block is its region count.
    pub fn write_vectored<I>(self, regions: I) -> Result<Block>
    where
        I: IntoIterator,
        I::Item: Into<Vec<u8>>,
    {
        self.vectored(OperationKind::WriteVectored, regions)
    }

    /// A block that flushes data and metadata of the file to storage.
    pub fn sync(self) -> Block {
        self.control(OperationKind::Sync, 0)
    }

    /// A block that flushes the data of the file to storage, with only the metadata needed to
    /// read it back.
    pub fn data_sync(self) -> Block {
        self.control(OperationKind::DataSync, 0)
    }

    /// A block that completes once the file is ready for any of `events`.
    ///
    /// `None` waits for [`PollEvents::DEFAULT_INTEREST`].
    pub fn poll(self, events: Option<PollEvents>) -> Block {
        let events = events.unwrap_or(PollEvents::DEFAULT_INTEREST);

        self.control(OperationKind::Poll, u64::from(events.bits()))
    }

    fn single(self, kind: OperationKind, data: Vec<u8>) -> Result<Block> {
        let capacity = data.len() as u64;
        let length = self.length.unwrap_or(capacity);

        if length > capacity {
            return Err(Error::invalid_argument(
                Step::Prepare,
                format!("The length ({length}) exceeds the size of the buffer ({capacity})."),
            ));
        }

        let mut buffers = Buffers::Single(data);
        let mut raw = self.common();
        raw.buf = buffers.address();
        raw.nbytes = length;
        raw.offset = self.offset;
        raw.set_rw_flags(self.rw_flags.bits());

        Ok(Block::assemble(kind, self.file, raw, buffers))
    }

    fn vectored<I>(self, kind: OperationKind, regions: I) -> Result<Block>
    where
        I: IntoIterator,
        I::Item: Into<Vec<u8>>,
    {
        if let Some(length) = self.length {
            return Err(Error::invalid_argument(
                Step::Prepare,
                format!(
                    "A {kind} block cannot have a length ({length}); its length is the number of regions."
                ),
            ));
        }

        let mut buffers = Buffers::vectored(regions.into_iter().map(Into::into).collect());
        let mut raw = self.common();
        raw.buf = buffers.address();
        raw.nbytes = buffers.nbytes();
        raw.offset = self.offset;
        raw.set_rw_flags(self.rw_flags.bits());

        Ok(Block::assemble(kind, self.file, raw, buffers))
    }

    fn control(self, kind: OperationKind, buf: u64) -> Block {
        let mut raw = self.common();
        raw.buf = buf;

        Block::assemble(kind, self.file, raw, Buffers::None)
    }

    // The fields shared by every kind: priority and result fd, with their flags.
    fn common(&self) -> RawIocb {
        let mut flags = BlockFlags::empty();
        let mut raw = RawIocb::default();

        if !self.priority.is_unset() {
            flags |= BlockFlags::IO_PRIORITY;
            raw.reqprio = self.priority.to_raw();
        }

        if let Some(fd) = self.result_fd {
            flags |= BlockFlags::RESULT_FD;
            raw.resfd = fd.cast_unsigned();
        }

        raw.flags = flags.bits();
        raw
    }
}
