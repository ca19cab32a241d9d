// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::Bytes;

use crate::thread_safe::ThreadSafe;

/// A copy of the data buffer(s) of a block, taken when no kernel operation was using them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Buffer {
    /// The buffer of a read or a write.
    Single(Bytes),

    /// The buffers of a vectored read or write, in submission order.
    Vectored(Vec<Bytes>),
}

impl Buffer {
    /// The total number of bytes across all regions.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(bytes) => bytes.len(),
            Self::Vectored(regions) => regions.iter().map(Bytes::len).sum(),
        }
    }

    /// Whether there are no bytes in any region.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single buffer of a non-vectored block.
    #[must_use]
    pub const fn as_single(&self) -> Option<&Bytes> {
        match self {
            Self::Single(bytes) => Some(bytes),
            Self::Vectored(_) => None,
        }
    }

    /// The regions of a vectored block.
    #[must_use]
    pub fn as_vectored(&self) -> Option<&[Bytes]> {
        match self {
            Self::Single(_) => None,
            Self::Vectored(regions) => Some(regions),
        }
    }

    /// All regions joined into one sequence of bytes.
    #[must_use]
    pub fn to_contiguous(&self) -> Bytes {
        match self {
            Self::Single(bytes) => bytes.clone(),
            Self::Vectored(regions) => regions.concat().into(),
        }
    }
}

/// The memory the kernel reads from or writes into while a block is in flight.
///
/// Each region is a separate heap allocation that is never resized while owned here, so moving a
/// `Buffers` around (including into a converted block) keeps every address the kernel was given.
#[derive(derive_more::Debug, Default)]
pub(crate) enum Buffers {
    #[default]
    None,

    Single(Vec<u8>),

    Vectored {
        regions: Vec<Vec<u8>>,
        // One entry per region, pointing at its heap allocation.
        #[debug(ignore)]
        io_vectors: Box<[ThreadSafe<libc::iovec>]>,
    },
}

impl Buffers {
    pub(crate) fn vectored(mut regions: Vec<Vec<u8>>) -> Self {
        let io_vectors = regions
            .iter_mut()
            .map(|region| {
                let io_vector = libc::iovec {
                    iov_base: region.as_mut_ptr().cast(),
                    iov_len: region.len(),
                };

                // SAFETY: The region is owned by the same `Buffers` value as the iovec and is
                // neither resized nor dropped before it.
                unsafe { ThreadSafe::new(io_vector) }
            })
            .collect();

        Self::Vectored {
            regions,
            io_vectors,
        }
    }

    /// The value for `aio_buf`: the data address, the address of the `iovec` array, or zero.
    pub(crate) fn address(&mut self) -> u64 {
        let address = match self {
            Self::None => 0,
            Self::Single(data) => data.as_mut_ptr().expose_provenance(),
            Self::Vectored { io_vectors, .. } => io_vectors.as_mut_ptr().expose_provenance(),
        };

        address as u64
    }

    /// The value for `aio_nbytes` unless a shorter length was requested: the byte count of a
    /// single buffer or the number of regions of a vectored one.
    pub(crate) fn nbytes(&self) -> u64 {
        let count = match self {
            Self::None => 0,
            Self::Single(data) => data.len(),
            Self::Vectored { regions, .. } => regions.len(),
        };

        count as u64
    }

    pub(crate) fn snapshot(&self) -> Option<Buffer> {
        match self {
            Self::None => None,
            Self::Single(data) => Some(Buffer::Single(Bytes::copy_from_slice(data))),
            Self::Vectored { regions, .. } => Some(Buffer::Vectored(
                regions
                    .iter()
                    .map(|region| Bytes::copy_from_slice(region))
                    .collect(),
            )),
        }
    }
}
