// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Helpers for unit tests.

use std::fs::File;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;

use crate::AioContext;
use crate::bindings::{BindingsFacade, MockBindings};

pub(crate) const MOCK_CONTEXT: crate::RawContext = 0x7f00_0000_1000;

/// A file that accepts every operation, for blocks that never reach a real kernel.
pub(crate) fn dev_null() -> File {
    File::options()
        .read(true)
        .write(true)
        .open("/dev/null")
        .expect("/dev/null is always present on Linux")
}

/// Mock bindings that open [`MOCK_CONTEXT`] and expect it to be destroyed exactly once.
pub(crate) fn mock_bindings() -> MockBindings {
    let mut bindings = MockBindings::new();

    bindings
        .expect_io_setup()
        .times(1)
        .returning(|_| Ok(MOCK_CONTEXT));
    bindings
        .expect_io_destroy()
        .withf(|context| *context == MOCK_CONTEXT)
        .times(1)
        .returning(|_| Ok(()));

    bindings
}

pub(crate) fn open_mock_context(bindings: MockBindings) -> AioContext {
    AioContext::with_bindings(BindingsFacade::from_mock(bindings), 16)
        .expect("mock io_setup succeeds")
}

/// Captures the log output of the current thread.
#[derive(Clone, Debug, Default)]
pub(crate) struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Starts capturing until the returned guard is dropped.
    #[must_use]
    pub(crate) fn start() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(capture.clone()));

        (capture, tracing::subscriber::set_default(subscriber))
    }

    pub(crate) fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).to_string()
    }

    pub(crate) fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(
            output.contains(expected),
            "log output does not contain '{expected}', got:\n{output}"
        );
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

pub(crate) struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
