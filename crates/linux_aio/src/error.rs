// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::io;

use derive_more::Display;
use thiserror::Error;

use crate::RawContext;
use crate::constants::AIO_MAX_NR_PATH;

const NOT_IMPLEMENTED: &str = "AIO is not implemented on this kernel or architecture.";
const NOT_AIO_RELATED: &str = "This error is not an AIO related error.";

/// Any error that may arise when operating on an [`AioContext`][crate::AioContext] or a
/// [`Block`][crate::Block].
///
/// Every variant that originates from the kernel carries a [`Failure`] that records which step
/// failed, the `errno` the kernel reported and an explanation of what it means for that step.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A capacity or queue depth limit was exceeded, either the system-wide event limit when
    /// opening a context or the per-context limit when submitting.
    #[error("resource limit exceeded: {0}")]
    ResourceLimitExceeded(Failure),

    /// A capacity, count or block was rejected, either by the kernel or by validation that
    /// happens before the kernel is called (e.g. a length larger than the buffer).
    #[error("invalid argument: {0}")]
    InvalidArgument(Failure),

    /// The kernel does not have enough memory to satisfy the request.
    #[error("out of kernel memory: {0}")]
    OutOfKernelMemory(Failure),

    /// Kernel AIO is not available on this kernel or architecture.
    #[error("unsupported: {0}")]
    Unsupported(Failure),

    /// The context token is not valid, e.g. because the context is already closed.
    ///
    /// Not expected when the context lifecycle rules are followed; seeing this is a defect.
    #[error("invalid context: {0}")]
    InvalidHandle(Failure),

    /// The file descriptor of a submitted block is not valid.
    #[error("bad file descriptor: {0}")]
    BadFileDescriptor(Failure),

    /// The kernel could not access a structure we passed to it. This is a defect in this crate,
    /// not something a caller can trigger through the public API.
    #[error("invalid pointer: {0}")]
    InvalidPointer(Failure),

    /// Waiting for completions was interrupted by a signal before any completion was reaped.
    /// The call may be retried.
    #[error("interrupted: {0}")]
    Interrupted(Failure),

    /// A cancellation request did not take effect. The block may still complete later.
    #[error("not canceled: {0}")]
    NotCanceled(Failure),

    /// The kernel reported an `errno` that has no meaning for the step that failed.
    #[error("unrecognized error: {0}")]
    Unrecognized(Failure),

    /// The block was converted into a block of another operation kind and must not be used again.
    #[error("the block was converted into another operation kind and can no longer be used")]
    StaleDescriptor,

    /// The block is owned by the kernel until its completion is reaped, so it cannot be
    /// modified, converted or submitted again.
    #[error("the block is in flight and cannot be used until its completion is reaped")]
    DescriptorInFlight,

    /// The kernel returned data that does not match what we submitted (e.g. a completion tag
    /// that does not belong to any in-flight block).
    #[error("contract violation: {0}")]
    ContractViolation(String),
}

/// A specialized `Result` for use with kernel AIO operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The `errno` behind this error, if it originates from the kernel or from argument validation.
    #[must_use]
    pub const fn errno(&self) -> Option<Errno> {
        match self.failure() {
            Some(failure) => Some(failure.errno),
            None => None,
        }
    }

    /// The context of a kernel-originated error, if any.
    #[must_use]
    pub const fn failure(&self) -> Option<&Failure> {
        match self {
            Self::ResourceLimitExceeded(failure)
            | Self::InvalidArgument(failure)
            | Self::OutOfKernelMemory(failure)
            | Self::Unsupported(failure)
            | Self::InvalidHandle(failure)
            | Self::BadFileDescriptor(failure)
            | Self::InvalidPointer(failure)
            | Self::Interrupted(failure)
            | Self::NotCanceled(failure)
            | Self::Unrecognized(failure) => Some(failure),
            Self::StaleDescriptor | Self::DescriptorInFlight | Self::ContractViolation(_) => None,
        }
    }

    /// Whether the call was interrupted by a signal and may simply be retried.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    pub(crate) fn invalid_argument(step: Step, explanation: impl Into<String>) -> Self {
        Self::InvalidArgument(Failure::new(step, Errno::EINVAL, explanation))
    }

    pub(crate) fn closed(step: Step) -> Self {
        Self::InvalidHandle(Failure::new(
            step,
            Errno::EINVAL,
            "The context is closed. Open a new context to continue submitting blocks.",
        ))
    }

    pub(crate) fn not_in_flight(context: RawContext) -> Self {
        Self::NotCanceled(Failure::new(
            Step::Cancel,
            Errno::EAGAIN,
            format!("The block is not in flight on context {context:#x}; its completion has already been reaped or it was never submitted."),
        ))
    }

    pub(crate) fn from_setup(errno: Errno, capacity: u32, limit: Option<u64>) -> Self {
        let limit = limit.map_or_else(|| "unknown".to_string(), |limit| limit.to_string());
        let failure = |explanation: String| Failure::new(Step::Setup, errno, explanation);

        match errno {
            Errno::EAGAIN => Self::ResourceLimitExceeded(failure(format!(
                "The requested capacity ({capacity}) exceeds the limit of available events, as defined in {AIO_MAX_NR_PATH} (limit: {limit})."
            ))),
            Errno::EFAULT => Self::InvalidPointer(failure(
                "An invalid pointer was passed for the context token.".to_string(),
            )),
            Errno::EINVAL => Self::InvalidArgument(failure(format!(
                "The requested capacity ({capacity}) exceeds internal limits. The capacity must be greater than 0."
            ))),
            Errno::ENOMEM => Self::OutOfKernelMemory(failure(
                "Insufficient kernel resources are available.".to_string(),
            )),
            Errno::ENOSYS => Self::Unsupported(failure(NOT_IMPLEMENTED.to_string())),
            _ => Self::Unrecognized(failure(NOT_AIO_RELATED.to_string())),
        }
    }

    pub(crate) fn from_destroy(errno: Errno, context: RawContext) -> Self {
        let failure = |explanation: String| Failure::new(Step::Destroy, errno, explanation);

        match errno {
            Errno::EFAULT => Self::InvalidPointer(failure(format!(
                "The context pointed to is invalid ({context:#x})."
            ))),
            Errno::EINVAL => Self::InvalidHandle(failure(format!(
                "The context token is invalid ({context:#x})."
            ))),
            Errno::ENOSYS => Self::Unsupported(failure(NOT_IMPLEMENTED.to_string())),
            _ => Self::Unrecognized(failure(NOT_AIO_RELATED.to_string())),
        }
    }

    pub(crate) fn from_submit(errno: Errno, context: RawContext, first_fd: i32) -> Self {
        let failure = |explanation: String| Failure::new(Step::Submit, errno, explanation);

        match errno {
            Errno::EAGAIN => Self::ResourceLimitExceeded(failure(
                "Insufficient resources are available to queue any blocks.".to_string(),
            )),
            Errno::EBADF => Self::BadFileDescriptor(failure(format!(
                "The file descriptor ({first_fd}) of the first block is invalid."
            ))),
            Errno::EFAULT => Self::InvalidPointer(failure(
                "One of the data structures points to invalid data.".to_string(),
            )),
            Errno::EINVAL => Self::InvalidArgument(failure(format!(
                "The context ({context:#x}) is invalid, the first block is not properly initialized, or its operation is invalid for file descriptor {first_fd}."
            ))),
            Errno::ENOSYS => Self::Unsupported(failure(NOT_IMPLEMENTED.to_string())),
            _ => Self::Unrecognized(failure(NOT_AIO_RELATED.to_string())),
        }
    }

    pub(crate) fn from_get_events(
        errno: Errno,
        context: RawContext,
        min_count: usize,
        max_count: usize,
    ) -> Self {
        let failure = |explanation: String| Failure::new(Step::GetEvents, errno, explanation);

        match errno {
            Errno::EFAULT => Self::InvalidPointer(failure(
                "The completion buffer or the timeout is invalid.".to_string(),
            )),
            Errno::EINTR => Self::Interrupted(failure(
                "Interrupted by a signal handler before any completion was reaped; see signal(7)."
                    .to_string(),
            )),
            Errno::EINVAL => Self::InvalidArgument(failure(format!(
                "min_count ({min_count}) or max_count ({max_count}) is out of range, or the context ({context:#x}) is invalid."
            ))),
            Errno::ENOSYS => Self::Unsupported(failure(NOT_IMPLEMENTED.to_string())),
            _ => Self::Unrecognized(failure(NOT_AIO_RELATED.to_string())),
        }
    }

    pub(crate) fn from_cancel(errno: Errno, context: RawContext) -> Self {
        let failure = |explanation: String| Failure::new(Step::Cancel, errno, explanation);

        match errno {
            Errno::EAGAIN => Self::NotCanceled(failure(
                "The block was not canceled. It may still complete.".to_string(),
            )),
            Errno::EFAULT => Self::InvalidPointer(failure(
                "One of the data structures points to invalid data.".to_string(),
            )),
            // Kernels that only track cancelable requests answer EINVAL for everything else,
            // which includes requests that have already completed.
            Errno::EINVAL => Self::NotCanceled(failure(format!(
                "The kernel does not track the block on context {context:#x}; it has most likely completed already."
            ))),
            Errno::ENOSYS => Self::Unsupported(failure(NOT_IMPLEMENTED.to_string())),
            _ => Self::Unrecognized(failure(NOT_AIO_RELATED.to_string())),
        }
    }
}

/// Represents the AIO error as a standard I/O error, preserving the `errno` derived kind.
impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        match value.errno() {
            Some(errno) => Self::new(io::Error::from_raw_os_error(errno.raw()).kind(), value),
            None => Self::other(value),
        }
    }
}

/// The step during which a [`Failure`] occurred.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Step {
    /// Opening a context (`io_setup`).
    #[display("io_setup")]
    Setup,

    /// Closing a context (`io_destroy`).
    #[display("io_destroy")]
    Destroy,

    /// Submitting blocks (`io_submit`).
    #[display("io_submit")]
    Submit,

    /// Reaping completions (`io_getevents`).
    #[display("io_getevents")]
    GetEvents,

    /// Canceling a block (`io_cancel`).
    #[display("io_cancel")]
    Cancel,

    /// Preparing or modifying a block, before anything reaches the kernel.
    #[display("block preparation")]
    Prepare,
}

/// Describes why a step failed: the `errno` and an explanation specific to the step.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("{step} failed with {}: {explanation}", .errno.summary())]
pub struct Failure {
    step: Step,
    errno: Errno,
    explanation: String,
}

impl Failure {
    pub(crate) fn new(step: Step, errno: Errno, explanation: impl Into<String>) -> Self {
        Self {
            step,
            errno,
            explanation: explanation.into(),
        }
    }

    /// The step that failed.
    #[must_use]
    pub const fn step(&self) -> Step {
        self.step
    }

    /// The `errno` reported for the failure.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        self.errno
    }

    /// The operating system's description of the `errno`, e.g. `"EAGAIN, Resource temporarily unavailable."`.
    #[must_use]
    pub fn system_message(&self) -> String {
        format!("{}.", self.errno.summary())
    }

    /// What the `errno` means for the step that failed, including the relevant numbers.
    #[must_use]
    pub fn explanation(&self) -> &str {
        &self.explanation
    }
}

/// An `errno` value as reported by the kernel.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Errno(i32);

impl Errno {
    /// Resource temporarily unavailable.
    pub const EAGAIN: Self = Self(libc::EAGAIN);
    /// Bad file descriptor.
    pub const EBADF: Self = Self(libc::EBADF);
    /// Bad address.
    pub const EFAULT: Self = Self(libc::EFAULT);
    /// Operation now in progress.
    pub const EINPROGRESS: Self = Self(libc::EINPROGRESS);
    /// Interrupted system call.
    pub const EINTR: Self = Self(libc::EINTR);
    /// Invalid argument.
    pub const EINVAL: Self = Self(libc::EINVAL);
    /// Cannot allocate memory.
    pub const ENOMEM: Self = Self(libc::ENOMEM);
    /// Function not implemented.
    pub const ENOSYS: Self = Self(libc::ENOSYS);

    /// Wraps a raw `errno` value.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The raw `errno` value.
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// The `errno` left behind by the last failed system call on this thread.
    #[must_use]
    pub fn last() -> Self {
        Self(io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
    }

    /// The symbolic name for the `errno` values that kernel AIO reports.
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::EAGAIN => "EAGAIN",
            Self::EBADF => "EBADF",
            Self::EFAULT => "EFAULT",
            Self::EINPROGRESS => "EINPROGRESS",
            Self::EINTR => "EINTR",
            Self::EINVAL => "EINVAL",
            Self::ENOMEM => "ENOMEM",
            Self::ENOSYS => "ENOSYS",
            _ => return None,
        })
    }

    /// The operating system's message for the `errno`, without the "(os error N)" suffix.
    #[must_use]
    pub fn message(self) -> String {
        let message = io::Error::from_raw_os_error(self.0).to_string();
        let suffix = format!(" (os error {})", self.0);

        match message.strip_suffix(&suffix) {
            Some(stripped) => stripped.to_string(),
            None => message,
        }
    }

    fn summary(self) -> String {
        match self.name() {
            Some(name) => format!("{name}, {}", self.message()),
            None => format!("errno {}, {}", self.0, self.message()),
        }
    }
}

impl fmt::Debug for Errno {
    #[cfg_attr(test, mutants::skip)] // There is no API contract this needs to satisfy.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "Errno({})", self.0),
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
