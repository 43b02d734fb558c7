// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2026 The Monjon Authors

//! Errors raised while parsing and executing a REPL command line.

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command '{0}'; type 'help' for a list")]
    UnknownCommand(String),

    #[error("'{command}' expects {expected}")]
    BadArguments { command: &'static str, expected: &'static str },

    #[error("'{0}' is not a valid source name")]
    BadSourceName(String),

    #[error("'{0}' is not a valid breakpoint name")]
    BadBreakpointName(String),

    #[error("'{0}' is not a valid watchpoint name")]
    BadWatchpointName(String),

    #[error("unknown event kind '{0}': expecting accept, client_recv, server_recv or close")]
    BadEventKind(String),

    #[error("no such source: {0}")]
    NoSuchSource(u64),

    #[error(transparent)]
    Dispatch(#[from] monjon_core::error::DispatchError),

    #[error(transparent)]
    Listener(#[from] monjon_core::error::ListenerError),
}
