// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod buffer;
mod builder;

use std::hash::{Hash, Hasher};
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use buffer::Buffers;
use derive_more::Display;
use tracing::{Level, event};

pub use buffer::Buffer;
pub use builder::BlockBuilder;

use crate::constants::ERR_POISONED_LOCK;
use crate::layout::RawIocb;
use crate::{
    BlockFlags, Error, IoPriority, OperationKind, PollEvents, PriorityClass, Result, RwFlags, Step,
};

/// A file that blocks can target. Shared between a block and every block converted from it.
pub type SharedFile = Arc<dyn AsFd + Send + Sync>;

// Zero is never handed out, so a zeroed descriptor can never resolve to a block.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Block`], stored in the descriptor as the tag the kernel returns
/// with the completion.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("{_0}")]
pub struct BlockId(u64);

impl BlockId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The value the kernel sees in `aio_data`.
    #[must_use]
    pub const fn to_raw(self) -> u64 {
        self.0
    }
}

/// One I/O request: a kernel descriptor at a stable address, the buffers it points to and the file
/// it targets.
///
/// Create blocks with [`Block::builder()`], submit them with
/// [`AioContext::submit()`][crate::AioContext::submit] and pick up their results with
/// [`AioContext::get_events()`][crate::AioContext::get_events].
///
/// A block is a shared handle: clones refer to the same request. While a block is in flight, the
/// kernel owns its descriptor and buffers and every attempt to modify, convert or resubmit it fails
/// with [`Error::DescriptorInFlight`]. Once its completion has been reaped, the block may be
/// modified and submitted again.
///
/// [`convert()`][Self::convert] moves the request into a new block of another kind. The original
/// becomes stale and fails every later operation with [`Error::StaleDescriptor`].
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Clone, derive_more::Debug)]
#[debug("Block({}, {})", inner.id, inner.kind)]
pub struct Block {
    inner: Arc<BlockInner>,
}

#[derive(derive_more::Debug)]
struct BlockInner {
    id: BlockId,
    kind: OperationKind,
    state: Mutex<BlockState>,
}

#[derive(derive_more::Debug)]
struct BlockState {
    // Boxed so that the kernel can hold on to its address while the block moves around.
    raw: Box<RawIocb>,
    buffers: Buffers,
    #[debug(ignore)]
    file: SharedFile,
    phase: Phase,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Idle,
    InFlight,
    Converted,
}

impl Block {
    /// Starts building a block that targets `file`.
    ///
    /// Pass an `Arc` to share one file between many blocks.
    pub fn builder<F>(file: F) -> BlockBuilder
    where
        F: AsFd + Send + Sync + 'static,
    {
        BlockBuilder::new(Arc::new(file))
    }

    fn assemble(kind: OperationKind, file: SharedFile, mut raw: RawIocb, buffers: Buffers) -> Self {
        let id = BlockId::next();

        raw.data = id.to_raw();
        raw.opcode = kind.to_raw();
        raw.fildes = fd_of(&file);

        event!(Level::TRACE, message = "new block", id = %id, kind = %kind, fd = raw.fildes);

        Self {
            inner: Arc::new(BlockInner {
                id,
                kind,
                state: Mutex::new(BlockState {
                    raw: Box::new(raw),
                    buffers,
                    file,
                    phase: Phase::Idle,
                }),
            }),
        }
    }

    /// The identity the kernel reports back with the completion of this block.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.inner.id
    }

    /// The operation this block performs. Fixed for the lifetime of the block; use
    /// [`convert()`][Self::convert] to perform another operation.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.inner.kind
    }

    /// Whether the block was converted into another block and can no longer be used.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.lock().phase == Phase::Converted
    }

    /// Whether the block has been submitted and its completion has not yet been reaped.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.lock().phase == Phase::InFlight
    }

    /// The file the block targets.
    #[must_use]
    pub fn file(&self) -> SharedFile {
        Arc::clone(&self.lock().file)
    }

    /// The file descriptor the block targets.
    #[must_use]
    pub fn fd(&self) -> RawFd {
        self.lock().raw.fildes.cast_signed()
    }

    /// The file offset of a data transfer.
    #[must_use]
    pub fn offset(&self) -> i64 {
        self.lock().raw.offset
    }

    /// The number of bytes to transfer, or for vectored blocks the number of regions.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.lock().raw.nbytes
    }

    /// The per-request flags of a data transfer.
    #[must_use]
    pub fn rw_flags(&self) -> RwFlags {
        RwFlags::from_bits_retain(self.lock().raw.rw_flags())
    }

    /// The descriptor flags.
    #[must_use]
    pub fn flags(&self) -> BlockFlags {
        BlockFlags::from_bits_retain(self.lock().raw.flags)
    }

    /// The eventfd signaled on completion, if [`BlockFlags::RESULT_FD`] is set.
    #[must_use]
    pub fn result_fd(&self) -> Option<RawFd> {
        let state = self.lock();

        BlockFlags::from_bits_retain(state.raw.flags)
            .contains(BlockFlags::RESULT_FD)
            .then_some(state.raw.resfd.cast_signed())
    }

    /// The I/O priority, which the kernel only honors if [`BlockFlags::IO_PRIORITY`] is set.
    #[must_use]
    pub fn priority(&self) -> IoPriority {
        IoPriority::from_raw(self.lock().raw.reqprio)
    }

    /// Shorthand for `priority().class()`.
    #[must_use]
    pub fn priority_class(&self) -> PriorityClass {
        self.priority().class()
    }

    /// Shorthand for `priority().value()`.
    #[must_use]
    pub fn priority_value(&self) -> u16 {
        self.priority().value()
    }

    /// The events a poll block waits for. `None` for every other kind.
    #[must_use]
    pub fn poll_events(&self) -> Option<PollEvents> {
        if self.kind() != OperationKind::Poll {
            return None;
        }

        // The mask lives in the low bits of aio_buf.
        #[expect(clippy::cast_possible_truncation, reason = "poll masks are 16-bit")]
        let mask = self.lock().raw.buf as u32;

        Some(PollEvents::from_bits_retain(mask))
    }

    /// A copy of the block's buffer(s). `None` for kinds that transfer no data.
    ///
    /// # Errors
    ///
    /// Fails while the block is in flight, since the kernel may be writing into the buffers, and
    /// once the block has been converted, since the buffers moved to the new block.
    pub fn buffer(&self) -> Result<Option<Buffer>> {
        let state = self.lock();
        state.ensure_idle()?;

        Ok(state.buffers.snapshot())
    }

    /// Points the block at another file.
    ///
    /// # Errors
    ///
    /// Fails if the block is in flight or stale.
    pub fn set_file<F>(&self, file: F) -> Result<()>
    where
        F: AsFd + Send + Sync + 'static,
    {
        let file: SharedFile = Arc::new(file);

        self.modify(|state| {
            state.raw.fildes = fd_of(&file);
            state.file = file;
            Ok(())
        })
    }

    /// Sets the file offset of a data transfer.
    ///
    /// # Errors
    ///
    /// Fails for sync and poll blocks, which have no offset, and if the block is in flight or stale.
    pub fn set_offset(&self, offset: i64) -> Result<()> {
        self.modify(|state| {
            self.require(self.kind().transfers_data(), "offset")?;
            state.raw.offset = offset;
            Ok(())
        })
    }

    /// Sets the number of bytes to transfer, up to the size of the buffer.
    ///
    /// # Errors
    ///
    /// Fails if the length exceeds the buffer, for kinds other than read and write, and if the block
    /// is in flight or stale.
    pub fn set_length(&self, length: u64) -> Result<()> {
        self.modify(|state| {
            self.require(
                matches!(self.kind(), OperationKind::Read | OperationKind::Write),
                "length",
            )?;

            let capacity = state.buffers.nbytes();
            if length > capacity {
                return Err(Error::invalid_argument(
                    Step::Prepare,
                    format!("The length ({length}) exceeds the size of the buffer ({capacity})."),
                ));
            }

            state.raw.nbytes = length;
            Ok(())
        })
    }

    /// Replaces the buffer of a read or write block. The length becomes the size of the new buffer.
    ///
    /// # Errors
    ///
    /// Fails for kinds other than read and write, and if the block is in flight or stale.
    pub fn set_buffer(&self, buffer: impl Into<Vec<u8>>) -> Result<()> {
        self.modify(|state| {
            self.require(
                matches!(self.kind(), OperationKind::Read | OperationKind::Write),
                "single buffer",
            )?;

            state.replace_buffers(Buffers::Single(buffer.into()));
            Ok(())
        })
    }

    /// Replaces the regions of a vectored block. The length becomes the number of regions.
    ///
    /// # Errors
    ///
    /// Fails for non-vectored kinds, and if the block is in flight or stale.
    pub fn set_buffers<I>(&self, regions: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Vec<u8>>,
    {
        self.modify(|state| {
            self.require(self.kind().is_vectored(), "sequence of buffers")?;

            state.replace_buffers(Buffers::vectored(
                regions.into_iter().map(Into::into).collect(),
            ));
            Ok(())
        })
    }

    /// Sets the per-request flags of a data transfer.
    ///
    /// # Errors
    ///
    /// Fails for sync and poll blocks, and if the block is in flight or stale.
    pub fn set_rw_flags(&self, rw_flags: RwFlags) -> Result<()> {
        self.modify(|state| {
            self.require(self.kind().transfers_data(), "read/write flags")?;
            state.raw.set_rw_flags(rw_flags.bits());
            Ok(())
        })
    }

    /// Replaces the descriptor flags as a whole.
    ///
    /// # Errors
    ///
    /// Fails if the block is in flight or stale.
    pub fn set_flags(&self, flags: BlockFlags) -> Result<()> {
        self.modify(|state| {
            state.raw.flags = flags.bits();
            Ok(())
        })
    }

    /// Sets the eventfd to signal on completion, which also sets [`BlockFlags::RESULT_FD`].
    /// `None` clears both.
    ///
    /// The descriptor must still be open when the block is submitted.
    ///
    /// # Errors
    ///
    /// Fails if the block is in flight or stale.
    pub fn set_result_fd(&self, fd: Option<BorrowedFd<'_>>) -> Result<()> {
        self.modify(|state| {
            state.set_result_fd(fd.map(|fd| fd.as_raw_fd()));
            Ok(())
        })
    }

    /// Sets the priority class and keeps the priority value. Also sets
    /// [`BlockFlags::IO_PRIORITY`].
    ///
    /// # Errors
    ///
    /// Fails if the block is in flight or stale.
    pub fn set_priority_class(&self, class: PriorityClass) -> Result<()> {
        self.modify(|state| {
            let priority = IoPriority::from_raw(state.raw.reqprio).with_class(class);
            state.set_priority(priority);
            Ok(())
        })
    }

    /// Sets the priority value and keeps the priority class. Also sets
    /// [`BlockFlags::IO_PRIORITY`].
    ///
    /// # Errors
    ///
    /// Fails if the block is in flight or stale.
    pub fn set_priority_value(&self, value: u16) -> Result<()> {
        self.modify(|state| {
            let priority = IoPriority::from_raw(state.raw.reqprio).with_value(value);
            state.set_priority(priority);
            Ok(())
        })
    }

    /// Sets class and value at once. Also sets [`BlockFlags::IO_PRIORITY`].
    ///
    /// # Errors
    ///
    /// Fails if the block is in flight or stale.
    pub fn set_priority(&self, priority: IoPriority) -> Result<()> {
        self.modify(|state| {
            state.set_priority(priority);
            Ok(())
        })
    }

    /// Sets the events a poll block waits for.
    ///
    /// # Errors
    ///
    /// Fails for kinds other than poll, and if the block is in flight or stale.
    pub fn set_poll_events(&self, events: PollEvents) -> Result<()> {
        self.modify(|state| {
            self.require(self.kind() == OperationKind::Poll, "poll events")?;
            state.raw.buf = u64::from(events.bits());
            Ok(())
        })
    }

    /// Moves this request into a new block that performs `target` instead.
    ///
    /// The new block keeps the file and, between read and write or between vectored read and
    /// vectored write, also the buffers, the offset and the length. Any other conversion resets
    /// them. Converting into or out of sync or poll also resets the descriptor flags, the
    /// read/write flags, the priority and the result fd. A new poll block waits for no events
    /// until [`set_poll_events()`][Self::set_poll_events] is called.
    ///
    /// Converting into the current kind returns this same block. Otherwise this block becomes
    /// stale.
    ///
    /// # Errors
    ///
    /// Fails if this block is stale or in flight.
    pub fn convert(&self, target: OperationKind) -> Result<Self> {
        let mut state = self.lock();

        if state.phase == Phase::Converted {
            return Err(Error::StaleDescriptor);
        }

        let source = self.kind();
        if source == target {
            return Ok(self.clone());
        }

        if state.phase == Phase::InFlight {
            return Err(Error::DescriptorInFlight);
        }

        let conversion = source.conversion_to(target);
        let mut raw = *state.raw;

        let buffers = if conversion.keeps_buffer {
            mem::take(&mut state.buffers)
        } else {
            raw.reset_buffer();
            Buffers::None
        };

        if conversion.clears_flags {
            raw.flags = 0;
            raw.set_rw_flags(0);
            raw.reqprio = 0;
            raw.resfd = 0;
        }

        state.phase = Phase::Converted;
        let file = Arc::clone(&state.file);
        drop(state);

        let converted = Self::assemble(target, file, raw, buffers);

        event!(
            Level::DEBUG,
            message = "converted block",
            from = %self.id(),
            from_kind = %source,
            to = %converted.id(),
            to_kind = %target,
            keeps_buffer = conversion.keeps_buffer,
        );

        Ok(converted)
    }

    /// Hands the descriptor to the kernel. Until `end_flight()`, the returned pointer and the
    /// buffers it references stay valid and untouched.
    pub(crate) fn begin_flight(&self) -> Result<*mut RawIocb> {
        let mut state = self.lock();
        state.ensure_idle()?;
        state.phase = Phase::InFlight;

        Ok(ptr::from_mut(state.raw.as_mut()))
    }

    /// Takes the descriptor back after the kernel declined it or let go of it.
    pub(crate) fn end_flight(&self) {
        let mut state = self.lock();

        if state.phase == Phase::InFlight {
            state.phase = Phase::Idle;
        }
    }

    /// Takes the descriptor back after its completion was reaped and returns a copy of the
    /// buffers as the kernel left them.
    pub(crate) fn complete_flight(&self) -> Option<Buffer> {
        let mut state = self.lock();

        if state.phase == Phase::InFlight {
            state.phase = Phase::Idle;
        }

        state.buffers.snapshot()
    }

    /// The descriptor address the kernel knows this block by, if it is in flight.
    pub(crate) fn in_flight_pointer(&self) -> Option<*mut RawIocb> {
        let mut state = self.lock();

        (state.phase == Phase::InFlight).then(|| ptr::from_mut(state.raw.as_mut()))
    }

    fn modify<R>(&self, f: impl FnOnce(&mut BlockState) -> Result<R>) -> Result<R> {
        let mut state = self.lock();
        state.ensure_idle()?;

        f(&mut state)
    }

    fn require(&self, supported: bool, what: &str) -> Result<()> {
        if supported {
            Ok(())
        } else {
            Err(Error::invalid_argument(
                Step::Prepare,
                format!("A {} block has no {what}.", self.kind()),
            ))
        }
    }

    fn lock(&self) -> MutexGuard<'_, BlockState> {
        self.inner.state.lock().expect(ERR_POISONED_LOCK)
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Block {}

impl Hash for Block {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl BlockState {
    fn ensure_idle(&self) -> Result<()> {
        match self.phase {
            Phase::Idle => Ok(()),
            Phase::InFlight => Err(Error::DescriptorInFlight),
            Phase::Converted => Err(Error::StaleDescriptor),
        }
    }

    fn replace_buffers(&mut self, mut buffers: Buffers) {
        self.raw.buf = buffers.address();
        self.raw.nbytes = buffers.nbytes();
        self.buffers = buffers;
    }

    fn set_result_fd(&mut self, fd: Option<RawFd>) {
        let mut flags = BlockFlags::from_bits_retain(self.raw.flags);
        flags.set(BlockFlags::RESULT_FD, fd.is_some());

        self.raw.flags = flags.bits();
        self.raw.resfd = fd.map_or(0, i32::cast_unsigned);
    }

    fn set_priority(&mut self, priority: IoPriority) {
        self.raw.flags |= BlockFlags::IO_PRIORITY.bits();
        self.raw.reqprio = priority.to_raw();
    }
}

fn fd_of(file: &SharedFile) -> u32 {
    file.as_fd().as_raw_fd().cast_unsigned()
}
