// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::mem::MaybeUninit;
#[cfg(test)]
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
use crate::bindings::MockBindings;
use crate::bindings::{Bindings, BuildTargetBindings, SysResult};
use crate::layout::{RawContext, RawIocb, RawIoEvent};

// Hides the difference between mock and real bindings behind a common facade.
#[derive(Clone, Debug)]
pub enum BindingsFacade {
    Real(&'static BuildTargetBindings),

    #[cfg(test)]
    Mock(Arc<MockBindings>),
}

impl BindingsFacade {
    #[cfg_attr(test, mutants::skip)] // Low-impact layer, waste of time to mutate.
    pub const fn real() -> Self {
        Self::Real(&BuildTargetBindings)
    }

    #[cfg(test)]
    #[cfg_attr(test, mutants::skip)] // Low-impact layer, waste of time to mutate.
    pub fn from_mock(bindings: MockBindings) -> Self {
        Self::Mock(Arc::new(bindings))
    }
}

impl Bindings for BindingsFacade {
    #[cfg_attr(test, mutants::skip)] // Low-impact layer, waste of time to mutate.
    fn io_setup(&self, capacity: u32) -> SysResult<RawContext> {
        match self {
            Self::Real(real) => real.io_setup(capacity),
            #[cfg(test)]
            Self::Mock(mock) => mock.io_setup(capacity),
        }
    }

    #[cfg_attr(test, mutants::skip)] // Low-impact layer, waste of time to mutate.
    fn io_destroy(&self, context: RawContext) -> SysResult<()> {
        match self {
            Self::Real(real) => real.io_destroy(context),
            #[cfg(test)]
            Self::Mock(mock) => mock.io_destroy(context),
        }
    }

    #[cfg_attr(test, mutants::skip)] // Low-impact layer, waste of time to mutate.
    unsafe fn io_submit(&self, context: RawContext, iocbs: &[*mut RawIocb]) -> SysResult<usize> {
        match self {
            Self::Real(real) => {
                // SAFETY: Forwarding safety requirements.
                unsafe { real.io_submit(context, iocbs) }
            }
            #[cfg(test)]
            Self::Mock(mock) => {
                // SAFETY: Forwarding safety requirements.
                unsafe { mock.io_submit(context, iocbs) }
            }
        }
    }

    #[cfg_attr(test, mutants::skip)] // Low-impact layer, waste of time to mutate.
    fn io_getevents(
        &self,
        context: RawContext,
        min_count: usize,
        events: &mut [MaybeUninit<RawIoEvent>],
        timeout: Option<Duration>,
    ) -> SysResult<usize> {
        match self {
            Self::Real(real) => real.io_getevents(context, min_count, events, timeout),
            #[cfg(test)]
            Self::Mock(mock) => mock.io_getevents(context, min_count, events, timeout),
        }
    }

    #[cfg_attr(test, mutants::skip)] // Low-impact layer, waste of time to mutate.
    unsafe fn io_cancel(
        &self,
        context: RawContext,
        iocb: *mut RawIocb,
        result: &mut RawIoEvent,
    ) -> SysResult<()> {
        match self {
            Self::Real(real) => {
                // SAFETY: Forwarding safety requirements.
                unsafe { real.io_cancel(context, iocb, result) }
            }
            #[cfg(test)]
            Self::Mock(mock) => {
                // SAFETY: Forwarding safety requirements.
                unsafe { mock.io_cancel(context, iocb, result) }
            }
        }
    }

    #[cfg_attr(test, mutants::skip)] // Low-impact layer, waste of time to mutate.
    fn aio_max_nr(&self) -> Option<u64> {
        match self {
            Self::Real(real) => real.aio_max_nr(),
            #[cfg(test)]
            Self::Mock(mock) => mock.aio_max_nr(),
        }
    }
}
