// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Context lifecycle, reaping and cancellation against a real kernel.

#![cfg(target_os = "linux")]
#![cfg(not(miri))] // Miri cannot talk to real OS.

use std::error::Error;
use std::io::Write;
use std::time::{Duration, Instant};

use linux_aio::{AioContext, Block, PollEvents};

const AIO_MAX_NR_PATH: &str = "/proc/sys/fs/aio-max-nr";

fn open_context(capacity: u32) -> Option<AioContext> {
    match AioContext::open(capacity) {
        Ok(context) => Some(context),
        Err(linux_aio::Error::Unsupported(_)) => {
            eprintln!("kernel AIO is not available; skipping");
            None
        }
        Err(error) => panic!("cannot open context: {error}"),
    }
}

#[test]
fn close_is_idempotent() {
    let Some(context) = open_context(4) else {
        return;
    };

    assert!(!context.is_closed());
    assert_eq!(context.capacity(), 4);

    context.close().unwrap();
    assert!(context.is_closed());

    context.close().unwrap();
    assert!(context.is_closed());
}

#[test]
fn zero_capacity_is_invalid_argument() {
    if open_context(1).is_none() {
        return;
    }

    let error = AioContext::open(0).unwrap_err();

    assert!(matches!(error, linux_aio::Error::InvalidArgument(_)), "{error}");
}

#[test]
fn capacity_above_system_limit_is_resource_limit_exceeded() {
    if open_context(1).is_none() {
        return;
    }

    let limit: u64 = std::fs::read_to_string(AIO_MAX_NR_PATH)
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    // Far larger requests trip the kernel's overflow guard, which reports EINVAL instead.
    let Ok(capacity) = u32::try_from(limit + 1) else {
        return;
    };
    if capacity > 1_000_000 {
        return;
    }

    let error = AioContext::open(capacity).unwrap_err();

    assert!(
        matches!(error, linux_aio::Error::ResourceLimitExceeded(_)),
        "{error}"
    );
    assert!(error.to_string().contains(&limit.to_string()), "{error}");
}

#[test]
fn get_events_on_empty_queue_returns_immediately() {
    let Some(context) = open_context(4) else {
        return;
    };
    let started = Instant::now();

    let completions = context.get_events(0, 4, None).unwrap();

    assert!(completions.is_empty());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn get_events_times_out() {
    let Some(context) = open_context(4) else {
        return;
    };

    let completions = context
        .get_events(1, 4, Some(Duration::from_millis(20)))
        .unwrap();

    assert!(completions.is_empty());
}

#[test]
fn cancel_completed_block_is_not_canceled() -> Result<(), Box<dyn Error>> {
    let Some(context) = open_context(4) else {
        return Ok(());
    };

    let write = Block::builder(tempfile::tempfile()?).write("done")?;
    context.submit([&write])?;

    // A buffered write finishes before io_submit returns, so the kernel no longer tracks it.
    let error = context.cancel(&write).unwrap_err();
    assert!(matches!(error, linux_aio::Error::NotCanceled(_)), "{error}");

    let completions = context.get_events(1, 4, Some(Duration::from_secs(10)))?;
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].block(), &write);
    assert_eq!(completions[0].result(), 4);

    // Once reaped, the block is not in flight at all.
    let error = context.cancel(&write).unwrap_err();
    assert!(matches!(error, linux_aio::Error::NotCanceled(_)), "{error}");

    Ok(())
}

#[test]
fn cancel_pending_poll() -> Result<(), Box<dyn Error>> {
    let Some(context) = open_context(4) else {
        return Ok(());
    };
    let (reader, mut writer) = std::io::pipe()?;

    // Nothing is ever written, so the poll stays pending until canceled.
    let poll = Block::builder(reader).poll(Some(PollEvents::INPUT));
    context.submit([&poll])?;
    assert!(poll.is_in_flight());

    match context.cancel(&poll)? {
        Some(completion) => assert_eq!(completion.block(), &poll),
        None => {
            let completions = context.get_events(1, 4, Some(Duration::from_secs(10)))?;
            assert_eq!(completions.len(), 1);
            assert_eq!(completions[0].block(), &poll);
        }
    }

    assert!(!poll.is_in_flight());
    writer.write_all(b"late")?;

    Ok(())
}

#[test]
fn close_waits_for_and_releases_blocks() -> Result<(), Box<dyn Error>> {
    let Some(context) = open_context(4) else {
        return Ok(());
    };

    let write = Block::builder(tempfile::tempfile()?).write("unreaped")?;
    context.submit([&write])?;
    assert_eq!(context.in_flight_count(), 1);

    context.close()?;

    assert!(!write.is_in_flight());
    assert_eq!(context.in_flight_count(), 0);
    write.set_offset(8)?;

    Ok(())
}
