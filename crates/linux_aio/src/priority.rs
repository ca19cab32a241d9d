// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use derive_more::Display;

use crate::constants::{IOPRIO_CLASS_SHIFT, IOPRIO_VALUE_MASK};

/// Scheduling class of an I/O request. See `ioprio_set(2)`.
#[derive(Clone, Copy, Debug, Default, Display, Eq, Hash, PartialEq)]
#[repr(u16)]
pub enum PriorityClass {
    /// No class was set; the kernel derives one from the CPU priority of the submitter.
    #[default]
    #[display("none")]
    None = 0,

    /// Real-time: always served first. Requires `CAP_SYS_ADMIN`.
    #[display("real-time")]
    RealTime = 1,

    /// Best-effort: the default class for most processes.
    #[display("best-effort")]
    BestEffort = 2,

    /// Idle: served only when nobody else needs the disk.
    #[display("idle")]
    Idle = 3,
}

impl PriorityClass {
    const fn from_raw(raw: u16) -> Self {
        match raw {
            1 => Self::RealTime,
            2 => Self::BestEffort,
            3 => Self::Idle,
            _ => Self::None,
        }
    }
}

/// An encoded I/O priority as stored in `aio_reqprio`: the class in the upper bits and the level
/// within the class in the lower 13 bits.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct IoPriority(u16);

impl IoPriority {
    /// Encodes a class and a level. Level bits outside the 13-bit field are discarded.
    #[must_use]
    pub const fn new(class: PriorityClass, value: u16) -> Self {
        Self(((class as u16) << IOPRIO_CLASS_SHIFT) | (value & IOPRIO_VALUE_MASK))
    }

    /// Interprets a raw `aio_reqprio` value.
    #[must_use]
    #[expect(clippy::cast_sign_loss, reason = "reinterpreting the kernel's bit pattern")]
    pub const fn from_raw(raw: i16) -> Self {
        Self(raw as u16)
    }

    /// The value to store in `aio_reqprio`.
    #[must_use]
    #[expect(clippy::cast_possible_wrap, reason = "reinterpreting as the kernel's bit pattern")]
    pub const fn to_raw(self) -> i16 {
        self.0 as i16
    }

    /// The scheduling class.
    #[must_use]
    pub const fn class(self) -> PriorityClass {
        PriorityClass::from_raw(self.0 >> IOPRIO_CLASS_SHIFT)
    }

    /// The level within the class; lower is more important.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0 & IOPRIO_VALUE_MASK
    }

    /// The same priority with another class and the level unchanged.
    #[must_use]
    pub const fn with_class(self, class: PriorityClass) -> Self {
        Self::new(class, self.value())
    }

    /// The same priority with another level and the class unchanged.
    #[must_use]
    pub const fn with_value(self, value: u16) -> Self {
        Self::new(self.class(), value)
    }

    /// Whether neither a class nor a level is set.
    #[must_use]
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }
}
