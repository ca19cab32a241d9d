// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::mem::MaybeUninit;
use std::ptr;
use std::time::Duration;

use crate::Errno;
use crate::bindings::{Bindings, SysResult};
use crate::constants::AIO_MAX_NR_PATH;
use crate::layout::{RawContext, RawIocb, RawIoEvent, RawTimespec};

/// Bindings that call into the kernel the build is targeting.
///
/// You would only use different bindings in unit tests that need to use mock bindings.
/// Even then, whenever possible, tests should use real bindings for maximum realism.
#[derive(Debug, Default)]
pub struct BuildTargetBindings;

impl Bindings for BuildTargetBindings {
    #[cfg_attr(test, mutants::skip)] // Real kernel behavior is not meaningful to mutate, we try mutations via mock bindings.
    fn io_setup(&self, capacity: u32) -> SysResult<RawContext> {
        // The kernel requires the token to be zero on input.
        let mut context: RawContext = 0;

        // SAFETY: The token pointer is valid for writes for the duration of the call.
        let result = unsafe {
            libc::syscall(
                libc::SYS_io_setup,
                capacity,
                &raw mut context,
            )
        };

        check(result).map(|_| context)
    }

    #[cfg_attr(test, mutants::skip)] // Real kernel behavior is not meaningful to mutate, we try mutations via mock bindings.
    fn io_destroy(&self, context: RawContext) -> SysResult<()> {
        // SAFETY: No memory is passed. An invalid token is reported as EINVAL.
        let result = unsafe { libc::syscall(libc::SYS_io_destroy, context) };

        check(result).map(|_| ())
    }

    #[cfg_attr(test, mutants::skip)] // Real kernel behavior is not meaningful to mutate, we try mutations via mock bindings.
    unsafe fn io_submit(&self, context: RawContext, iocbs: &[*mut RawIocb]) -> SysResult<usize> {
        let count = to_long(iocbs.len());

        // SAFETY: The pointer array is valid for the duration of the call. The kernel only reads
        // it, so casting away constness is fine. Descriptor validity is guaranteed by the caller.
        let result = unsafe {
            libc::syscall(
                libc::SYS_io_submit,
                context,
                count,
                iocbs.as_ptr().cast_mut(),
            )
        };

        check(result)
    }

    #[cfg_attr(test, mutants::skip)] // Real kernel behavior is not meaningful to mutate, we try mutations via mock bindings.
    fn io_getevents(
        &self,
        context: RawContext,
        min_count: usize,
        events: &mut [MaybeUninit<RawIoEvent>],
        timeout: Option<Duration>,
    ) -> SysResult<usize> {
        let timeout = timeout.map(RawTimespec::from_duration);
        let timeout_ptr = timeout
            .as_ref()
            .map_or(ptr::null(), ptr::from_ref);

        // SAFETY: The event buffer is valid for writes of `events.len()` entries and the timeout,
        // if any, lives until the end of this function.
        let result = unsafe {
            libc::syscall(
                libc::SYS_io_getevents,
                context,
                to_long(min_count),
                to_long(events.len()),
                events.as_mut_ptr(),
                timeout_ptr,
            )
        };

        check(result)
    }

    #[cfg_attr(test, mutants::skip)] // Real kernel behavior is not meaningful to mutate, we try mutations via mock bindings.
    unsafe fn io_cancel(
        &self,
        context: RawContext,
        iocb: *mut RawIocb,
        result: &mut RawIoEvent,
    ) -> SysResult<()> {
        // SAFETY: The result record is valid for writes. Descriptor validity is guaranteed by
        // the caller.
        let outcome =
            unsafe { libc::syscall(libc::SYS_io_cancel, context, iocb, ptr::from_mut(result)) };

        check(outcome).map(|_| ())
    }

    #[cfg_attr(test, mutants::skip)] // Real kernel behavior is not meaningful to mutate, we try mutations via mock bindings.
    fn aio_max_nr(&self) -> Option<u64> {
        std::fs::read_to_string(AIO_MAX_NR_PATH)
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

// The raw system call reports failure as -1 with the reason in errno.
fn check(result: libc::c_long) -> SysResult<usize> {
    match usize::try_from(result) {
        Ok(value) => Ok(value),
        Err(_) => Err(Errno::last()),
    }
}

fn to_long(value: usize) -> libc::c_long {
    // Counts beyond `c_long::MAX` cannot be backed by real memory, so saturating is never observed.
    libc::c_long::try_from(value).unwrap_or(libc::c_long::MAX)
}
