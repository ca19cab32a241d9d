// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ops::{Deref, DerefMut};

/// Marks a value that contains raw pointers as safe to move and share between threads.
///
/// Kernel records such as `iovec` point into buffers owned elsewhere. Whether sending them is
/// sound depends on who owns those buffers, which the compiler cannot see, so the owner vouches
/// for it when wrapping.
#[derive(Debug)]
#[repr(transparent)]
pub(crate) struct ThreadSafe<T> {
    inner: T,
}

impl<T> ThreadSafe<T> {
    /// # Safety
    ///
    /// The caller must guarantee that any memory the value points to stays valid for as long as
    /// the wrapper exists and is only accessed in ways that are safe from any thread.
    pub(crate) const unsafe fn new(inner: T) -> Self {
        Self { inner }
    }
}

// SAFETY: Guaranteed by the caller of `new()`.
unsafe impl<T> Send for ThreadSafe<T> {}
// SAFETY: Guaranteed by the caller of `new()`.
unsafe impl<T> Sync for ThreadSafe<T> {}

impl<T> Deref for ThreadSafe<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> DerefMut for ThreadSafe<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
