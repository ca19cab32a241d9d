// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bitflags::bitflags;

bitflags! {
    /// Per-request flags of a read or write (`RWF_*`), stored in `aio_rw_flags`.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct RwFlags: u32 {
        /// High priority request, poll if possible.
        const HIGH_PRIORITY = 0x0000_0001;
        /// Per-request `O_DSYNC`.
        const DATA_SYNC = 0x0000_0002;
        /// Per-request `O_SYNC`.
        const SYNC = 0x0000_0004;
        /// Fail with `EAGAIN` instead of blocking.
        const NO_WAIT = 0x0000_0008;
        /// Per-request `O_APPEND`.
        const APPEND = 0x0000_0010;

        // The kernel defines more bits than we name here.
        const _ = !0;
    }
}

bitflags! {
    /// Flags of the descriptor itself (`IOCB_FLAG_*`), stored in `aio_flags`.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct BlockFlags: u32 {
        /// `aio_resfd` names an eventfd to signal on completion.
        const RESULT_FD = 0x0000_0001;
        /// `aio_reqprio` carries an I/O priority.
        const IO_PRIORITY = 0x0000_0002;

        const _ = !0;
    }
}

bitflags! {
    /// Events a poll block waits for, and the events a completed poll reports.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct PollEvents: u32 {
        /// There is data to read.
        const INPUT = 0x0001;
        /// There is urgent data to read.
        const PRIORITY = 0x0002;
        /// Writing will not block.
        const OUTPUT = 0x0004;
        /// Error condition. Always reported, need not be requested.
        const ERROR = 0x0008;
        /// Hang up. Always reported, need not be requested.
        const HANG_UP = 0x0010;
        /// The file descriptor is not open.
        const INVALID = 0x0020;

        const _ = !0;
    }
}

impl PollEvents {
    /// The events a poll block waits for unless told otherwise.
    pub const DEFAULT_INTEREST: Self = Self::INPUT.union(Self::PRIORITY).union(Self::OUTPUT);
}
