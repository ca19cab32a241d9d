// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use derive_more::Display;

/// The operation a [`Block`][crate::Block] asks the kernel to perform (`IOCB_CMD_*`).
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[repr(u16)]
pub enum OperationKind {
    /// Read into a single buffer (`IOCB_CMD_PREAD`).
    #[display("read")]
    Read = 0,

    /// Write from a single buffer (`IOCB_CMD_PWRITE`).
    #[display("write")]
    Write = 1,

    /// Flush data and metadata to storage (`IOCB_CMD_FSYNC`).
    #[display("sync")]
    Sync = 2,

    /// Flush data to storage, and only the metadata needed to read it back (`IOCB_CMD_FDSYNC`).
    #[display("data sync")]
    DataSync = 3,

    /// Wait for readiness of the file descriptor (`IOCB_CMD_POLL`).
    #[display("poll")]
    Poll = 5,

    /// Read into a sequence of buffers (`IOCB_CMD_PREADV`).
    #[display("vectored read")]
    ReadVectored = 7,

    /// Write from a sequence of buffers (`IOCB_CMD_PWRITEV`).
    #[display("vectored write")]
    WriteVectored = 8,
}

impl OperationKind {
    /// Every kind, in opcode order.
    pub const ALL: [Self; 7] = [
        Self::Read,
        Self::Write,
        Self::Sync,
        Self::DataSync,
        Self::Poll,
        Self::ReadVectored,
        Self::WriteVectored,
    ];

    /// Interprets a raw opcode. Returns `None` for opcodes we do not support.
    #[must_use]
    pub const fn from_raw(opcode: u16) -> Option<Self> {
        Some(match opcode {
            0 => Self::Read,
            1 => Self::Write,
            2 => Self::Sync,
            3 => Self::DataSync,
            5 => Self::Poll,
            7 => Self::ReadVectored,
            8 => Self::WriteVectored,
            _ => return None,
        })
    }

    /// The raw opcode.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        self as u16
    }

    /// Whether the kind transfers data through a sequence of buffers.
    #[must_use]
    pub const fn is_vectored(self) -> bool {
        matches!(self, Self::ReadVectored | Self::WriteVectored)
    }

    /// Whether the kind transfers data at all. Only these kinds have a buffer, a length, an offset
    /// and read/write flags.
    #[must_use]
    pub const fn transfers_data(self) -> bool {
        matches!(
            self,
            Self::Read | Self::Write | Self::ReadVectored | Self::WriteVectored
        )
    }

    /// Describes what survives when a block of this kind is converted into `target`.
    #[must_use]
    pub const fn conversion_to(self, target: Self) -> Conversion {
        let keeps_buffer = matches!(
            (self, target),
            (Self::Read | Self::Write, Self::Read | Self::Write)
                | (
                    Self::ReadVectored | Self::WriteVectored,
                    Self::ReadVectored | Self::WriteVectored
                )
        );

        Conversion {
            keeps_buffer,
            clears_flags: !self.transfers_data() || !target.transfers_data(),
        }
    }
}

/// What a conversion between two operation kinds preserves.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Conversion {
    /// Buffer, length and offset carry over. Otherwise they are reset to zero.
    pub keeps_buffer: bool,

    /// Descriptor flags and read/write flags are reset to zero.
    pub clears_flags: bool,
}
