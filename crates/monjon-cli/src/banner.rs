// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2026 The Monjon Authors

//! Startup banner, licence text and the command help table.
//!
//! Out of scope for the core per the specification's non-goals ("help
//! text, banners, licence display"); carried here because the reference
//! front-end needs somewhere real to source them, mirroring the Python
//! original's `BLURB` constant and `CLI.help`/`CLI.licence` methods.

pub const BLURB: &str = "\
monjon 0.1.0

This program comes with ABSOLUTELY NO WARRANTY. This is free software,
and you are welcome to redistribute it under certain conditions. For
more details, type 'help licence'.

Type 'help' for general assistance with usage.";

pub const LICENCE: &str = "\
Monjon is free software: you can redistribute it and/or modify it under
the terms of the GNU General Public License as published by the Free
Software Foundation, either version 3 of the License, or (at your
option) any later version.

Monjon is distributed in the hope that it will be useful, but WITHOUT
ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License
for more details.";

/// One entry per REPL command: the name completion/dispatch use, and the
/// one-line text `help <name>` prints.
pub const COMMANDS: &[(&str, &str)] = &[
    ("listen", "listen <localPort> <remoteHost> [remotePort] [protocol] -- start forwarding connections"),
    ("breakpoint", "breakpoint <source> <event> [condition] -- suspend when <event> fires on <source>"),
    ("clear", "clear <breakpointName> -- remove a breakpoint"),
    ("watch", "watch <source> <property> [condition] -- observe a property without suspending"),
    ("unwatch", "unwatch <watchpointName> -- remove a watchpoint"),
    ("run", "run -- execute until a breakpoint fires or the operator interrupts"),
    ("step", "step -- execute exactly one event, then return control"),
    ("stop", "stop -- clear the run flag; takes effect at the next step boundary"),
    ("sources", "sources -- list registered listeners and sessions"),
    ("breakpoints", "breakpoints -- list active breakpoints"),
    ("watchpoints", "watchpoints -- list active watchpoints"),
    ("event", "event -- show the event currently held at a break"),
    ("history", "history -- print previously-executed commands"),
    ("help", "help [command] -- online help"),
    ("licence", "licence -- show licence text"),
    ("exit", "exit -- leave monjon"),
];

pub fn help_text(command: Option<&str>) -> String {
    match command {
        None => {
            let mut out = String::from("Commands:\n");
            for (name, text) in COMMANDS {
                out.push_str(&format!("  {name:<12} {text}\n"));
            }
            out
        }
        Some("licence") | Some("license") => LICENCE.to_string(),
        Some(name) => COMMANDS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, text)| text.to_string())
            .unwrap_or_else(|| format!("No help available for '{name}'")),
    }
}
