// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// If a lock is poisoned then a block may have been left half-way between the idle and in-flight
// states, so we can no longer tell whether the kernel still holds pointers into its memory.
pub const ERR_POISONED_LOCK: &str = "poisoned lock - cannot continue execution because the kernel may still reference memory guarded by this lock";

/// System-wide limit on the number of events that all AIO contexts together may reserve.
///
/// Only read to explain `EAGAIN` results from `io_setup`; the limit is never enforced by us.
pub const AIO_MAX_NR_PATH: &str = "/proc/sys/fs/aio-max-nr";

/// Bit position of the priority class within the 16-bit request priority (`linux/ioprio.h`).
pub const IOPRIO_CLASS_SHIFT: u32 = 13;

/// Mask selecting the priority value (the bits below the class).
pub const IOPRIO_VALUE_MASK: u16 = (1 << IOPRIO_CLASS_SHIFT) - 1;

/// The kernel never hands out a zero context token, so we use it to mark a closed context.
pub const CLOSED_CONTEXT: crate::RawContext = 0;
