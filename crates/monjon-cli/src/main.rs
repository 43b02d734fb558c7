// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2026 The Monjon Authors

//! Entry point for the `monjon` reference front-end.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod banner;
mod completion;
mod error;
mod front_end;
mod repl;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use monjon_core::{Dispatcher, MioMultiplexer};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
            .context("failed to install SIGINT handler")?;
    }

    let multiplexer = MioMultiplexer::new(interrupted).context("failed to initialize socket multiplexer")?;
    let mut dispatcher = Dispatcher::new(Box::new(multiplexer));
    dispatcher.set_listener(Box::new(front_end::ReplListener));

    let mut repl = repl::Repl::new(dispatcher)?;
    repl.run()
}
