// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::mem::MaybeUninit;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::time::Duration;

use tracing::{Level, event};

use crate::bindings::{Bindings, BindingsFacade};
use crate::constants::{CLOSED_CONTEXT, ERR_POISONED_LOCK};
use crate::layout::{RawContext, RawIoEvent};
use crate::{Block, BlockId, Completion, Errno, Error, Result, Step};

type InFlightMap = HashMap<BlockId, Block>;

/// One kernel AIO context: a queue that accepts [`Block`]s and hands back their [`Completion`]s.
///
/// Open a context with [`open()`][Self::open], [`submit()`][Self::submit] blocks to it, reap their
/// completions with [`get_events()`][Self::get_events] and optionally
/// [`cancel()`][Self::cancel] blocks that have not finished yet. Closing the context, explicitly or
/// by dropping it, waits for every request the kernel is still working on.
///
/// # Thread safety
///
/// This type is thread-safe. Submitting, reaping and canceling may happen concurrently from any
/// number of threads. [`close()`][Self::close] waits until no other call is using the context.
#[derive(Debug)]
pub struct AioContext {
    /// The kernel token, or `CLOSED_CONTEXT`. Every call that passes the token to the kernel holds
    /// a read lock for the duration of the call; closing takes the write lock, so the token is
    /// never destroyed underneath a concurrent call.
    token: RwLock<RawContext>,

    capacity: u32,

    /// Blocks submitted to this context whose completion has not been reaped, keyed by the tag
    /// the kernel returns with each completion. Holding the blocks here keeps their descriptors
    /// and buffers alive for as long as the kernel may use them.
    in_flight: Mutex<InFlightMap>,

    bindings: BindingsFacade,
}

impl AioContext {
    /// Opens a context that can hold `capacity` requests in flight at the same time.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] if `capacity` is zero or exceeds what the kernel can address.
    /// * [`Error::ResourceLimitExceeded`] if `capacity` exceeds the number of events still
    ///   available system-wide (see `/proc/sys/fs/aio-max-nr`).
    /// * [`Error::OutOfKernelMemory`] if the kernel cannot allocate the context.
    /// * [`Error::Unsupported`] if the kernel does not implement AIO.
    pub fn open(capacity: u32) -> Result<Self> {
        Self::with_bindings(BindingsFacade::real(), capacity)
    }

    pub(crate) fn with_bindings(bindings: BindingsFacade, capacity: u32) -> Result<Self> {
        let token = bindings
            .io_setup(capacity)
            .map_err(|errno| Error::from_setup(errno, capacity, bindings.aio_max_nr()))?;

        event!(Level::DEBUG, message = "opened context", context = token, capacity);

        Ok(Self {
            token: RwLock::new(token),
            capacity,
            in_flight: Mutex::new(HashMap::new()),
            bindings,
        })
    }

    /// The capacity the context was opened with.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Whether the context has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.token() == CLOSED_CONTEXT
    }

    /// The number of submitted blocks whose completion has not been reaped yet.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight().len()
    }

    /// Closes the context. Closing a closed context does nothing.
    ///
    /// Waits until every request that the kernel could not cancel has completed. Completions not
    /// reaped by then are discarded and their blocks may be used again.
    ///
    /// # Errors
    ///
    /// Fails if the kernel rejects the token, which indicates a defect, or if the kernel does not
    /// implement AIO. The context stays open in that case.
    pub fn close(&self) -> Result<()> {
        let mut token = self.token.write().expect(ERR_POISONED_LOCK);

        if *token == CLOSED_CONTEXT {
            return Ok(());
        }

        let context = *token;
        self.bindings
            .io_destroy(context)
            .map_err(|errno| Error::from_destroy(errno, context))?;

        *token = CLOSED_CONTEXT;

        // The kernel has let go of every descriptor by now.
        let discarded: Vec<Block> = self.in_flight().drain().map(|(_, block)| block).collect();
        for block in &discarded {
            block.end_flight();
        }

        event!(
            Level::DEBUG,
            message = "closed context",
            context,
            discarded_completions = discarded.len()
        );

        Ok(())
    }

    /// Submits `blocks` in order and returns how many the kernel accepted.
    ///
    /// The kernel may accept only a leading part of the batch, e.g. when the context is full. Blocks
    /// it did not accept are not in flight and may be submitted again. Submitting no blocks returns
    /// zero without calling the kernel.
    ///
    /// # Errors
    ///
    /// Nothing is submitted if any of these fails:
    ///
    /// * [`Error::StaleDescriptor`] if a block was converted into another block.
    /// * [`Error::DescriptorInFlight`] if a block is already in flight (or listed twice).
    /// * [`Error::InvalidHandle`] if the context is closed.
    /// * The kernel rejects the first block: [`Error::ResourceLimitExceeded`] if the context is
    ///   full, [`Error::BadFileDescriptor`] or [`Error::InvalidArgument`] if the first block is
    ///   unusable, [`Error::Unsupported`] if the kernel does not implement AIO.
    pub fn submit<'a, I>(&self, blocks: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Block>,
    {
        let token = self.token();
        let context = *token;
        if context == CLOSED_CONTEXT {
            return Err(Error::closed(Step::Submit));
        }

        let blocks: Vec<&Block> = blocks.into_iter().collect();
        if blocks.is_empty() {
            return Ok(0);
        }

        let mut iocbs = Vec::with_capacity(blocks.len());
        for block in &blocks {
            match block.begin_flight() {
                Ok(iocb) => iocbs.push(iocb),
                Err(error) => {
                    for taken in &blocks[..iocbs.len()] {
                        taken.end_flight();
                    }

                    return Err(error);
                }
            }
        }

        // Registered before the kernel sees them, as a concurrent reaper may pick up a completion
        // before io_submit even returns.
        {
            let mut in_flight = self.in_flight();
            for block in &blocks {
                in_flight.insert(block.id(), (*block).clone());
            }
        }

        // SAFETY: Every descriptor was taken out of circulation by begin_flight() and is kept
        // alive by the in-flight map until its completion is reaped or the context is closed.
        // Its buffers are owned by the same block and are not touched while it is in flight.
        let outcome = unsafe { self.bindings.io_submit(context, &iocbs) };

        match outcome {
            Ok(submitted) => {
                let submitted = submitted.min(blocks.len());

                if submitted < blocks.len() {
                    event!(
                        Level::DEBUG,
                        message = "partial submission",
                        context,
                        submitted,
                        requested = blocks.len()
                    );

                    self.retire(&blocks[submitted..]);
                }

                event!(Level::TRACE, message = "submitted", context, submitted);

                Ok(submitted)
            }
            Err(errno) => {
                self.retire(&blocks);

                Err(Error::from_submit(errno, context, blocks[0].fd()))
            }
        }
    }

    /// Waits for completions and returns between `min_count` and `max_count` of them.
    ///
    /// Waits without a time limit if `timeout` is `None` or zero. Returns fewer than `min_count`
    /// completions when the timeout expires first. With a `min_count` of zero, returns whatever
    /// is ready without waiting.
    ///
    /// Every returned completion resolves to the block that was submitted, which is no longer in
    /// flight.
    ///
    /// # Errors
    ///
    /// * [`Error::Interrupted`] if a signal arrived before any completion did. Retry the call.
    /// * [`Error::InvalidArgument`] if `min_count` exceeds `max_count` or the capacity, or if
    ///   there is no memory for `min_count` completions.
    /// * [`Error::InvalidHandle`] if the context is closed.
    pub fn get_events(
        &self,
        min_count: usize,
        max_count: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<Completion>> {
        let token = self.token();
        let context = *token;
        if context == CLOSED_CONTEXT {
            return Err(Error::closed(Step::GetEvents));
        }

        let timeout = timeout.filter(|timeout| !timeout.is_zero());

        // Every completion the kernel can deliver belongs to a block in the in-flight map, so
        // room for more than that (or than min_count, which the kernel validates) is never used.
        let length = max_count.min(min_count.max(self.in_flight_count()).max(1));
        let mut events = Vec::new();
        events.try_reserve_exact(length).map_err(|error| {
            Error::invalid_argument(
                Step::GetEvents,
                format!("Cannot allocate room for {length} completions: {error}"),
            )
        })?;
        events.resize(length, MaybeUninit::<RawIoEvent>::uninit());

        let reaped = self
            .bindings
            .io_getevents(context, min_count, &mut events, timeout)
            .map_err(|errno| Error::from_get_events(errno, context, min_count, max_count))?;

        if reaped > length {
            return Err(Error::ContractViolation(format!(
                "io_getevents reported {reaped} completions for a buffer of {length}"
            )));
        }

        if reaped < min_count {
            event!(
                Level::DEBUG,
                message = "timed out with fewer completions than requested",
                context,
                reaped,
                min_count
            );
        }

        let mut completions = Vec::with_capacity(reaped);

        for event in &events[..reaped] {
            // SAFETY: The kernel initialized the first `reaped` entries.
            let event = unsafe { event.assume_init_ref() };

            match self.resolve(event) {
                Some(completion) => completions.push(completion),
                None => event!(
                    Level::ERROR,
                    message = "completion does not belong to any block in flight",
                    context,
                    tag = event.data,
                    result = event.res
                ),
            }
        }

        event!(Level::TRACE, message = "reaped", context, count = completions.len());

        Ok(completions)
    }

    /// Asks the kernel to cancel `block`.
    ///
    /// Returns the completion of the block if the kernel canceled it right away. Returns `None` if
    /// the kernel accepted the request and will deliver the completion, with a result of
    /// `-ECANCELED` or the real result, through [`get_events()`][Self::get_events].
    ///
    /// # Errors
    ///
    /// * [`Error::StaleDescriptor`] if the block was converted into another block.
    /// * [`Error::NotCanceled`] if the block is not in flight on this context, or the kernel could
    ///   not cancel it, e.g. because it has completed already. A completion may still arrive
    ///   through [`get_events()`][Self::get_events].
    /// * [`Error::InvalidHandle`] if the context is closed.
    pub fn cancel(&self, block: &Block) -> Result<Option<Completion>> {
        let token = self.token();
        let context = *token;
        if context == CLOSED_CONTEXT {
            return Err(Error::closed(Step::Cancel));
        }

        if block.is_stale() {
            return Err(Error::StaleDescriptor);
        }

        let tracked = self.in_flight().contains_key(&block.id());
        let Some(iocb) = block.in_flight_pointer().filter(|_| tracked) else {
            return Err(Error::not_in_flight(context));
        };

        let mut record = RawIoEvent::default();

        // SAFETY: The descriptor belongs to a block this context submitted. The caller's reference
        // keeps its memory alive even if the completion is reaped concurrently.
        let outcome = unsafe { self.bindings.io_cancel(context, iocb, &mut record) };

        match outcome {
            Ok(()) => {
                if record.data != block.id().to_raw() {
                    return Err(Error::ContractViolation(format!(
                        "io_cancel returned the completion of tag {} while canceling block {}",
                        record.data,
                        block.id()
                    )));
                }

                event!(Level::DEBUG, message = "canceled", context, block = %block.id());

                self.resolve(&record).map(Some).ok_or_else(|| {
                    Error::ContractViolation(format!(
                        "block {} was canceled but is no longer in flight",
                        block.id()
                    ))
                })
            }
            Err(Errno::EINPROGRESS) => {
                event!(Level::DEBUG, message = "cancellation in progress", context, block = %block.id());

                Ok(None)
            }
            Err(errno) => Err(Error::from_cancel(errno, context)),
        }
    }

    fn resolve(&self, event: &RawIoEvent) -> Option<Completion> {
        let block = self.in_flight().remove(&BlockId::from_raw(event.data))?;
        let buffer = block.complete_flight();

        Some(Completion::new(block, buffer, event.res, event.res2))
    }

    fn retire(&self, blocks: &[&Block]) {
        let mut in_flight = self.in_flight();

        for block in blocks {
            in_flight.remove(&block.id());
            block.end_flight();
        }
    }

    fn token(&self) -> RwLockReadGuard<'_, RawContext> {
        self.token.read().expect(ERR_POISONED_LOCK)
    }

    fn in_flight(&self) -> MutexGuard<'_, InFlightMap> {
        self.in_flight.lock().expect(ERR_POISONED_LOCK)
    }
}

impl Drop for AioContext {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            event!(Level::WARN, message = "failed to close context on drop", error = %error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::bindings::MockBindings;
    use crate::testing::{LogCapture, MOCK_CONTEXT, dev_null, mock_bindings, open_mock_context};
    use crate::{Buffer, OperationKind};

    fn read_block() -> Block {
        Block::builder(dev_null()).read(vec![0; 8]).unwrap()
    }

    fn event_for(block: &Block, res: i64) -> RawIoEvent {
        RawIoEvent {
            data: block.id().to_raw(),
            res,
            ..RawIoEvent::default()
        }
    }

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(AioContext: Send, Sync);
    }

    #[test]
    fn open_reports_system_limit() {
        let mut bindings = MockBindings::new();
        bindings
            .expect_io_setup()
            .returning(|_| Err(Errno::EAGAIN));
        bindings.expect_aio_max_nr().returning(|| Some(65_536));
        bindings.expect_io_destroy().never();

        let error = AioContext::with_bindings(BindingsFacade::from_mock(bindings), 70_000).unwrap_err();

        assert!(matches!(error, Error::ResourceLimitExceeded(_)));
        assert!(error.to_string().contains("70000"));
        assert!(error.to_string().contains("65536"));
    }

    #[test]
    fn open_zero_capacity_is_invalid_argument() {
        let mut bindings = MockBindings::new();
        bindings
            .expect_io_setup()
            .withf(|capacity| *capacity == 0)
            .returning(|_| Err(Errno::EINVAL));
        bindings.expect_aio_max_nr().returning(|| None);

        let error = AioContext::with_bindings(BindingsFacade::from_mock(bindings), 0).unwrap_err();

        assert!(matches!(error, Error::InvalidArgument(_)));
    }

    #[test]
    fn close_is_idempotent() {
        let context = open_mock_context(mock_bindings());
        assert!(!context.is_closed());
        assert_eq!(context.capacity(), 16);

        context.close().unwrap();
        assert!(context.is_closed());

        context.close().unwrap();
        assert!(context.is_closed());
    }

    #[test]
    fn drop_closes_context() {
        // mock_bindings() expects exactly one io_destroy.
        drop(open_mock_context(mock_bindings()));
    }

    #[test]
    fn failed_close_keeps_context_open() {
        let mut bindings = MockBindings::new();
        bindings.expect_io_setup().returning(|_| Ok(MOCK_CONTEXT));
        bindings
            .expect_io_destroy()
            .times(2)
            .returning(|_| Err(Errno::EINVAL));

        let (logs, _guard) = LogCapture::start();
        let context = open_mock_context(bindings);

        let error = context.close().unwrap_err();
        assert!(matches!(error, Error::InvalidHandle(_)));
        assert!(!context.is_closed());

        drop(context);
        logs.assert_contains("failed to close context on drop");
    }

    #[test]
    fn empty_submission_skips_kernel() {
        let mut bindings = mock_bindings();
        bindings.expect_io_submit().never();
        let context = open_mock_context(bindings);

        assert_eq!(context.submit(Vec::<&Block>::new()).unwrap(), 0);
    }

    #[test]
    fn closed_context_rejects_calls() {
        let mut bindings = mock_bindings();
        bindings.expect_io_submit().never();
        bindings.expect_io_getevents().never();
        bindings.expect_io_cancel().never();
        let context = open_mock_context(bindings);
        context.close().unwrap();

        let block = read_block();

        assert!(matches!(context.submit([&block]), Err(Error::InvalidHandle(_))));
        assert!(matches!(
            context.get_events(0, 1, None),
            Err(Error::InvalidHandle(_))
        ));
        assert!(matches!(context.cancel(&block), Err(Error::InvalidHandle(_))));
        assert!(!block.is_in_flight());
    }

    #[test]
    fn submit_passes_descriptors_in_order() {
        let first = read_block();
        let second = Block::builder(dev_null()).sync();
        let expected = [first.id().to_raw(), second.id().to_raw()];

        let mut bindings = mock_bindings();
        bindings
            .expect_io_submit()
            .times(1)
            .returning(move |context, iocbs| {
                assert_eq!(context, MOCK_CONTEXT);

                // SAFETY: The descriptors are in flight and owned by the context under test.
                let tags: Vec<u64> = iocbs.iter().map(|iocb| unsafe { (**iocb).data }).collect();
                assert_eq!(tags, expected);

                Ok(iocbs.len())
            });
        let context = open_mock_context(bindings);

        assert_eq!(context.submit([&first, &second]).unwrap(), 2);
        assert!(first.is_in_flight());
        assert!(second.is_in_flight());
        assert_eq!(context.in_flight_count(), 2);
    }

    #[test]
    fn stale_block_is_rejected_before_kernel() {
        let mut bindings = mock_bindings();
        bindings.expect_io_submit().never();
        let context = open_mock_context(bindings);

        let fresh = read_block();
        let original = read_block();
        let _sync = original.convert(OperationKind::Sync).unwrap();

        let error = context.submit([&fresh, &original]).unwrap_err();

        assert!(matches!(error, Error::StaleDescriptor));
        assert!(!fresh.is_in_flight());
        assert_eq!(context.in_flight_count(), 0);
    }

    #[test]
    fn block_listed_twice_is_rejected() {
        let mut bindings = mock_bindings();
        bindings.expect_io_submit().never();
        let context = open_mock_context(bindings);
        let block = read_block();

        let error = context.submit([&block, &block]).unwrap_err();

        assert!(matches!(error, Error::DescriptorInFlight));
        assert!(!block.is_in_flight());
    }

    #[test]
    fn partial_submission_retires_the_rest() {
        let mut bindings = mock_bindings();
        bindings.expect_io_submit().returning(|_, _| Ok(1));
        let context = open_mock_context(bindings);
        let (logs, _guard) = LogCapture::start();

        let first = read_block();
        let second = read_block();

        assert_eq!(context.submit([&first, &second]).unwrap(), 1);

        assert!(first.is_in_flight());
        assert!(!second.is_in_flight());
        assert_eq!(context.in_flight_count(), 1);
        logs.assert_contains("partial submission");
    }

    #[test]
    fn failed_submission_names_first_descriptor() {
        let mut bindings = mock_bindings();
        bindings
            .expect_io_submit()
            .returning(|_, _| Err(Errno::EBADF));
        let context = open_mock_context(bindings);
        let block = read_block();

        let error = context.submit([&block]).unwrap_err();

        assert!(matches!(error, Error::BadFileDescriptor(_)));
        assert!(error.to_string().contains(&block.fd().to_string()));
        assert!(!block.is_in_flight());
        assert_eq!(context.in_flight_count(), 0);
    }

    #[test]
    fn get_events_resolves_tags_to_blocks() {
        let block = Block::builder(dev_null()).write("data").unwrap();
        let event = event_for(&block, 4);

        let mut bindings = mock_bindings();
        bindings.expect_io_submit().returning(|_, iocbs| Ok(iocbs.len()));
        bindings
            .expect_io_getevents()
            .withf(|_, min_count, events, timeout| {
                *min_count == 1 && events.len() == 1 && timeout.is_none()
            })
            .returning(move |_, _, events, _| {
                events[0].write(event);
                Ok(1)
            });
        let context = open_mock_context(bindings);

        context.submit([&block]).unwrap();
        let completions = context.get_events(1, 8, None).unwrap();

        assert_eq!(completions.len(), 1);
        let completion = &completions[0];
        assert_eq!(completion.block(), &block);
        assert_eq!(completion.result(), 4);
        assert_eq!(completion.result2(), 0);
        assert_eq!(
            completion.buffer(),
            Some(&Buffer::Single(bytes::Bytes::from_static(b"data")))
        );
        assert!(!block.is_in_flight());
        assert_eq!(context.in_flight_count(), 0);
    }

    #[test]
    fn sync_completion_has_no_buffer() {
        let block = Block::builder(dev_null()).sync();
        let event = event_for(&block, 0);

        let mut bindings = mock_bindings();
        bindings.expect_io_submit().returning(|_, iocbs| Ok(iocbs.len()));
        bindings.expect_io_getevents().returning(move |_, _, events, _| {
            events[0].write(event);
            Ok(1)
        });
        let context = open_mock_context(bindings);

        context.submit([&block]).unwrap();
        let completions = context.get_events(1, 1, None).unwrap();

        assert_eq!(completions[0].buffer(), None);
        assert_eq!(completions[0].stripped_buffer(), None);
    }

    #[test]
    fn zero_timeout_waits_indefinitely() {
        let mut bindings = mock_bindings();
        bindings
            .expect_io_getevents()
            .withf(|_, _, _, timeout| timeout.is_none())
            .times(1)
            .returning(|_, _, _, _| Ok(0));
        bindings
            .expect_io_getevents()
            .withf(|_, _, _, timeout| *timeout == Some(Duration::from_millis(5)))
            .times(1)
            .returning(|_, _, _, _| Ok(0));
        let context = open_mock_context(bindings);

        assert!(context.get_events(0, 4, Some(Duration::ZERO)).unwrap().is_empty());
        assert!(
            context
                .get_events(0, 4, Some(Duration::from_millis(5)))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn interrupted_wait_is_retryable() {
        let mut bindings = mock_bindings();
        bindings
            .expect_io_getevents()
            .returning(|_, _, _, _| Err(Errno::EINTR));
        let context = open_mock_context(bindings);

        let error = context.get_events(1, 1, None).unwrap_err();

        assert!(error.is_interrupted());
    }

    #[test]
    fn unknown_tag_is_logged_and_skipped() {
        let block = read_block();
        let known = event_for(&block, 8);
        let unknown = RawIoEvent {
            data: u64::MAX,
            ..RawIoEvent::default()
        };

        let mut bindings = mock_bindings();
        bindings.expect_io_submit().returning(|_, iocbs| Ok(iocbs.len()));
        bindings.expect_io_getevents().returning(move |_, _, events, _| {
            events[0].write(unknown);
            events[1].write(known);
            Ok(2)
        });
        let context = open_mock_context(bindings);
        let (logs, _guard) = LogCapture::start();

        context.submit([&block]).unwrap();
        let completions = context.get_events(1, 2, None).unwrap();

        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].block(), &block);
        logs.assert_contains("does not belong to any block in flight");
    }

    #[test]
    fn huge_max_count_is_bounded_by_blocks_in_flight() {
        let mut bindings = mock_bindings();
        bindings
            .expect_io_getevents()
            .withf(|_, min_count, events, _| *min_count == 0 && events.len() == 1)
            .times(1)
            .returning(|_, _, _, _| Ok(0));
        let context = open_mock_context(bindings);

        let completions = context.get_events(0, usize::MAX / 8, None).unwrap();

        assert!(completions.is_empty());
    }

    #[test]
    fn event_buffer_covers_min_count() {
        let mut bindings = mock_bindings();
        bindings
            .expect_io_getevents()
            .withf(|_, min_count, events, _| *min_count == 3 && events.len() == 3)
            .times(1)
            .returning(|_, _, _, _| Ok(0));
        bindings
            .expect_io_getevents()
            .withf(|_, min_count, events, _| *min_count == 5 && events.len() == 2)
            .times(1)
            .returning(|_, _, _, _| Err(Errno::EINVAL));
        let context = open_mock_context(bindings);

        assert!(context.get_events(3, 100, None).unwrap().is_empty());

        let error = context.get_events(5, 2, None).unwrap_err();
        assert!(matches!(error, Error::InvalidArgument(_)));
    }

    #[test]
    fn unallocatable_min_count_is_invalid_argument() {
        let context = open_mock_context(mock_bindings());

        let error = context.get_events(usize::MAX / 2, usize::MAX, None).unwrap_err();

        let Error::InvalidArgument(failure) = &error else {
            panic!("unexpected error variant: {error:?}");
        };
        assert_eq!(failure.step(), Step::GetEvents);
    }

    #[test]
    fn overfilled_event_buffer_is_contract_violation() {
        let mut bindings = mock_bindings();
        bindings
            .expect_io_getevents()
            .returning(|_, _, _, _| Ok(3));
        let context = open_mock_context(bindings);

        let error = context.get_events(0, 2, None).unwrap_err();

        assert!(matches!(error, Error::ContractViolation(_)));
    }

    #[test]
    fn cancel_idle_block_skips_kernel() {
        let mut bindings = mock_bindings();
        bindings.expect_io_cancel().never();
        let context = open_mock_context(bindings);

        let error = context.cancel(&read_block()).unwrap_err();

        assert!(matches!(error, Error::NotCanceled(_)));
    }

    #[test]
    fn cancel_stale_block() {
        let mut bindings = mock_bindings();
        bindings.expect_io_cancel().never();
        let context = open_mock_context(bindings);

        let original = read_block();
        let _write = original.convert(OperationKind::Write).unwrap();

        assert!(matches!(
            context.cancel(&original),
            Err(Error::StaleDescriptor)
        ));
    }

    #[test]
    fn cancel_returns_immediate_completion() {
        let block = read_block();
        let canceled = event_for(&block, -i64::from(libc::ECANCELED));

        let mut bindings = mock_bindings();
        bindings.expect_io_submit().returning(|_, iocbs| Ok(iocbs.len()));
        bindings
            .expect_io_cancel()
            .times(1)
            .returning(move |_, _, result| {
                *result = canceled;
                Ok(())
            });
        let context = open_mock_context(bindings);

        context.submit([&block]).unwrap();
        let completion = context.cancel(&block).unwrap().unwrap();

        assert_eq!(completion.block(), &block);
        assert_eq!(completion.errno(), Some(Errno::from_raw(libc::ECANCELED)));
        assert!(!block.is_in_flight());
        assert_eq!(context.in_flight_count(), 0);
    }

    #[test]
    fn cancel_in_progress_keeps_block_in_flight() {
        let block = read_block();

        let mut bindings = mock_bindings();
        bindings.expect_io_submit().returning(|_, iocbs| Ok(iocbs.len()));
        bindings
            .expect_io_cancel()
            .returning(|_, _, _| Err(Errno::EINPROGRESS));
        let context = open_mock_context(bindings);

        context.submit([&block]).unwrap();

        assert!(context.cancel(&block).unwrap().is_none());
        assert!(block.is_in_flight());
        assert_eq!(context.in_flight_count(), 1);
    }

    #[test]
    fn cancel_refused_by_kernel_is_not_canceled() {
        let block = read_block();

        let mut bindings = mock_bindings();
        bindings.expect_io_submit().returning(|_, iocbs| Ok(iocbs.len()));
        bindings
            .expect_io_cancel()
            .returning(|_, _, _| Err(Errno::EAGAIN));
        let context = open_mock_context(bindings);

        context.submit([&block]).unwrap();
        let error = context.cancel(&block).unwrap_err();

        assert!(matches!(error, Error::NotCanceled(_)));
        assert!(block.is_in_flight());
    }

    #[test]
    fn cancel_on_other_context_is_not_canceled() {
        let block = read_block();

        let mut owner_bindings = mock_bindings();
        owner_bindings
            .expect_io_submit()
            .returning(|_, iocbs| Ok(iocbs.len()));
        let owner = open_mock_context(owner_bindings);

        let mut other_bindings = mock_bindings();
        other_bindings.expect_io_cancel().never();
        let other = open_mock_context(other_bindings);

        owner.submit([&block]).unwrap();

        assert!(matches!(other.cancel(&block), Err(Error::NotCanceled(_))));
    }

    #[test]
    fn close_releases_unreaped_blocks() {
        let block = read_block();

        let mut bindings = mock_bindings();
        bindings.expect_io_submit().returning(|_, iocbs| Ok(iocbs.len()));
        let context = open_mock_context(bindings);

        context.submit([&block]).unwrap();
        context.close().unwrap();

        assert!(!block.is_in_flight());
        assert_eq!(context.in_flight_count(), 0);
        block.set_offset(16).unwrap();
    }

    #[test]
    fn resubmit_after_completion() {
        let block = read_block();
        let event = event_for(&block, 8);

        let mut bindings = mock_bindings();
        let mut sequence = mockall::Sequence::new();
        bindings
            .expect_io_submit()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, iocbs| Ok(iocbs.len()));
        bindings
            .expect_io_getevents()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(move |_, _, events, _| {
                events[0].write(event);
                Ok(1)
            });
        bindings
            .expect_io_submit()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, iocbs| Ok(iocbs.len()));
        let context = open_mock_context(bindings);

        context.submit([&block]).unwrap();
        assert!(matches!(
            context.submit([&block]),
            Err(Error::DescriptorInFlight)
        ));

        context.get_events(1, 1, None).unwrap();
        assert_eq!(context.submit([&block]).unwrap(), 1);
    }

    #[test]
    fn concurrent_submitters_share_context() {
        let mut bindings = mock_bindings();
        bindings.expect_io_submit().returning(|_, iocbs| Ok(iocbs.len()));
        let context = Arc::new(open_mock_context(bindings));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let context = Arc::clone(&context);
                std::thread::spawn(move || {
                    let block = read_block();
                    context.submit([&block]).unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }

        assert_eq!(context.in_flight_count(), 4);
    }
}
