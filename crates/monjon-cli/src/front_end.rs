// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2026 The Monjon Authors

//! The REPL's implementation of [`monjon_core::Listener`].
//!
//! Mirrors the Python original's behaviour of printing directly to stdout
//! when the dispatcher notifies the front-end — `cli.py` has no separate
//! notification layer either, it just `print()`s from the callback site.

use monjon_core::{Breakpoint, Event, Watchpoint};

pub struct ReplListener;

impl monjon_core::Listener for ReplListener {
    fn on_break(&mut self, breakpoint: &Breakpoint, event: &Event) {
        println!(
            "=> break: b[{}] on s[{}] ({})",
            breakpoint.name, breakpoint.source, event.kind
        );
        if let Some(packet) = &event.payload {
            println!("   e.packet = {} bytes", packet.bytes.len());
        }
        if let Some(diag) = &event.context.condition_error {
            println!("   (condition evaluation failed: {diag})");
        }
    }

    fn on_set_breakpoint(&mut self, breakpoint: &Breakpoint) {
        println!(
            "=> b[{}] = breakpoint(s[{}], {}, {:?})",
            breakpoint.name, breakpoint.source, breakpoint.kind, breakpoint.condition
        );
    }

    fn on_clear_breakpoint(&mut self, breakpoint: &Breakpoint) {
        println!("=> cleared b[{}]", breakpoint.name);
    }

    fn on_watch(&mut self, watchpoint: &Watchpoint, value: Option<&str>, _event: &Event) {
        match value {
            Some(v) => println!("=> watch: w[{}] {} = {}", watchpoint.name, watchpoint.property, v),
            None => println!("=> watch: w[{}] {} matched", watchpoint.name, watchpoint.property),
        }
    }
}
