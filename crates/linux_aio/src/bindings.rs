// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod abstractions;
mod facade;
mod real;

pub use abstractions::*;
pub use facade::*;
pub use real::*;
