// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Binary records exchanged with the kernel, laid out exactly as in `linux/aio_abi.h`.

use derive_more::Display;

/// The kernel's `aio_context_t`: an opaque token naming one context.
pub type RawContext = libc::c_ulong;

/// Byte order of a target platform.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum ByteOrder {
    /// Least significant byte first.
    #[display("little")]
    Little,

    /// Most significant byte first.
    #[display("big")]
    Big,
}

impl ByteOrder {
    /// The byte order of the build target.
    pub const NATIVE: Self = if cfg!(target_endian = "little") {
        Self::Little
    } else {
        Self::Big
    };
}

/// Placement of the kernel-private key and the read/write flags within the 64-bit word that
/// follows `aio_data`.
///
/// The kernel declares the two 32-bit fields in byte-order dependent order so that the key always
/// occupies the same half of the word as a native `long` would. Nothing in the kernel validates
/// this, so a wrong arrangement silently corrupts every request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PaddingArrangement {
    key_slot: usize,
    rw_flags_slot: usize,
}

impl PaddingArrangement {
    const KEY_FIRST: Self = Self {
        key_slot: 0,
        rw_flags_slot: 1,
    };

    const RW_FLAGS_FIRST: Self = Self {
        key_slot: 1,
        rw_flags_slot: 0,
    };

    /// The arrangement applied to every block created on the build target.
    pub const NATIVE: Self = match Self::for_platform(size_of::<libc::c_ulong>(), ByteOrder::NATIVE)
    {
        Some(arrangement) => arrangement,
        None => panic!("kernel AIO descriptors are only defined for 32-bit and 64-bit targets"),
    };

    /// Looks up the arrangement for a platform with the given native word size (in bytes) and
    /// byte order. Returns `None` for word sizes the kernel ABI does not define.
    #[must_use]
    pub const fn for_platform(word_size: usize, byte_order: ByteOrder) -> Option<Self> {
        match (word_size, byte_order) {
            (4, ByteOrder::Little) | (8, ByteOrder::Little) => Some(Self::KEY_FIRST),
            (4, ByteOrder::Big) | (8, ByteOrder::Big) => Some(Self::RW_FLAGS_FIRST),
            _ => None,
        }
    }

    /// Byte offset of `aio_key` within the descriptor.
    #[must_use]
    pub const fn key_offset(self) -> usize {
        PADDED_WORD_OFFSET + self.key_slot * size_of::<u32>()
    }

    /// Byte offset of `aio_rw_flags` within the descriptor.
    #[must_use]
    pub const fn rw_flags_offset(self) -> usize {
        PADDED_WORD_OFFSET + self.rw_flags_slot * size_of::<u32>()
    }
}

const PADDED_WORD_OFFSET: usize = size_of::<u64>();

/// The kernel's `struct iocb`: one I/O request as the kernel reads it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct RawIocb {
    /// Returned unchanged in the completion record; we store the block tag here.
    pub data: u64,
    // aio_key and aio_rw_flags, ordered per `PaddingArrangement::NATIVE`.
    padded: [u32; 2],
    /// One of the `IOCB_CMD_*` values.
    pub opcode: u16,
    /// Encoded I/O priority, honored only if `IOCB_FLAG_IOPRIO` is set.
    pub reqprio: i16,
    /// The file descriptor the operation targets.
    pub fildes: u32,
    /// Buffer address, `iovec` array address, or the event mask of a poll.
    pub buf: u64,
    /// Buffer length in bytes, or the number of `iovec` entries.
    pub nbytes: u64,
    /// File offset in bytes.
    pub offset: i64,
    /// Must be zero.
    pub reserved2: u64,
    /// `IOCB_FLAG_*` bits.
    pub flags: u32,
    /// Eventfd signaled on completion, honored only if `IOCB_FLAG_RESFD` is set.
    pub resfd: u32,
}

impl RawIocb {
    /// The kernel-private key. Written by the kernel during submission.
    #[must_use]
    pub const fn key(&self) -> u32 {
        self.padded[PaddingArrangement::NATIVE.key_slot]
    }

    /// The `RWF_*` bits of a read or write.
    #[must_use]
    pub const fn rw_flags(&self) -> u32 {
        self.padded[PaddingArrangement::NATIVE.rw_flags_slot]
    }

    /// Replaces the `RWF_*` bits.
    pub const fn set_rw_flags(&mut self, rw_flags: u32) {
        self.padded[PaddingArrangement::NATIVE.rw_flags_slot] = rw_flags;
    }

    /// Clears the buffer address, length and offset.
    pub const fn reset_buffer(&mut self) {
        self.buf = 0;
        self.nbytes = 0;
        self.offset = 0;
    }
}

/// The kernel's `struct io_event`: one completion record.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct RawIoEvent {
    /// The `data` field of the completed descriptor.
    pub data: u64,
    /// The user-space address of the completed descriptor. Not used by us.
    pub obj: u64,
    /// Bytes transferred, a poll mask, or a negated `errno`.
    pub res: i64,
    /// Secondary result, zero for most operations.
    pub res2: i64,
}

/// The timeout structure `io_getevents` expects: a pair of native `long`s.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct RawTimespec {
    /// Whole seconds.
    pub tv_sec: libc::c_long,
    /// Nanoseconds past the whole seconds.
    pub tv_nsec: libc::c_long,
}

impl RawTimespec {
    /// Converts a duration, saturating the seconds at the largest value a `long` holds.
    #[must_use]
    pub fn from_duration(duration: std::time::Duration) -> Self {
        Self {
            tv_sec: duration
                .as_secs()
                .try_into()
                .unwrap_or(libc::c_long::MAX),
            // Always below one billion, so fits into a 32-bit long.
            tv_nsec: duration.subsec_nanos().try_into().unwrap_or_default(),
        }
    }
}
