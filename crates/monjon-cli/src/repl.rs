// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2026 The Monjon Authors

//! The REPL command loop.
//!
//! Tokenized verbs replace the Python original's `exec()` against a shared
//! global namespace (explicitly out of scope, see the crate root docs);
//! everything else — prompt, history file, tab-completion, banner — mirrors
//! `cli.py`'s `CLI.main`.

use std::path::PathBuf;

use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use tracing::warn;

use monjon_core::breakpoint::DEFAULT_CONDITION;
use monjon_core::error::{ConfigurationError, DispatchError};
use monjon_core::id::{BreakpointName, SourceName, WatchpointName};
use monjon_core::{Dispatcher, EventKind, Source};

use crate::banner;
use crate::completion::CommandCompleter;
use crate::error::CommandError;

const PROMPT: &str = "(monjon) ";

pub struct Repl {
    dispatcher: Dispatcher,
    editor: Editor<CommandCompleter, DefaultHistory>,
    history_path: Option<PathBuf>,
    /// Lines entered this session, for the `history` command. Kept
    /// separately from rustyline's own history store since that one is
    /// opaque once loaded from disk (prior runs' lines included).
    transcript: Vec<String>,
}

#[derive(Debug)]
enum Outcome {
    Continue,
    Exit,
}

impl Repl {
    pub fn new(dispatcher: Dispatcher) -> anyhow::Result<Self> {
        let mut editor = Editor::<CommandCompleter, DefaultHistory>::new()?;
        editor.set_helper(Some(CommandCompleter));

        let history_path = dirs::home_dir().map(|home| home.join(".monjon").join("history"));
        if let Some(path) = &history_path {
            if path.exists() {
                if let Err(e) = editor.load_history(path) {
                    warn!(error = %e, "failed to load history file");
                }
            }
        }

        Ok(Self { dispatcher, editor, history_path, transcript: Vec::new() })
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        println!("{}", banner::BLURB);

        loop {
            match self.editor.readline(PROMPT) {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());
                    self.transcript.push(line.clone());
                    match self.execute(&line) {
                        Ok(Outcome::Continue) => {}
                        Ok(Outcome::Exit) => break,
                        Err(e) => println!("{e}"),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("Use 'exit' to leave monjon.");
                }
                Err(ReadlineError::Eof) => {
                    println!("Use 'exit' to leave monjon.");
                }
                Err(e) => {
                    warn!(error = %e, "readline failed");
                    break;
                }
            }
        }

        self.save_history();
        Ok(())
    }

    fn save_history(&mut self) {
        let Some(path) = &self.history_path else { return };
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        if let Err(e) = self.editor.save_history(path) {
            warn!(error = %e, "failed to save history file");
        }
    }

    fn execute(&mut self, line: &str) -> Result<Outcome, CommandError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = tokens.first() else { return Ok(Outcome::Continue) };
        let args = &tokens[1..];

        match cmd {
            "listen" => {
                self.cmd_listen(args)?;
                Ok(Outcome::Continue)
            }
            "breakpoint" => {
                self.cmd_breakpoint(args)?;
                Ok(Outcome::Continue)
            }
            "clear" => {
                self.cmd_clear(args)?;
                Ok(Outcome::Continue)
            }
            "watch" => {
                self.cmd_watch(args)?;
                Ok(Outcome::Continue)
            }
            "unwatch" => {
                self.cmd_unwatch(args)?;
                Ok(Outcome::Continue)
            }
            "run" => {
                self.dispatcher.run();
                Ok(Outcome::Continue)
            }
            "step" => {
                self.dispatcher.step();
                Ok(Outcome::Continue)
            }
            "stop" => {
                self.dispatcher.stop();
                Ok(Outcome::Continue)
            }
            "sources" => {
                self.cmd_sources(args);
                Ok(Outcome::Continue)
            }
            "breakpoints" => {
                self.cmd_breakpoints();
                Ok(Outcome::Continue)
            }
            "watchpoints" => {
                self.cmd_watchpoints();
                Ok(Outcome::Continue)
            }
            "event" => {
                self.cmd_event();
                Ok(Outcome::Continue)
            }
            "history" => {
                for (i, entry) in self.transcript.iter().enumerate() {
                    println!("{i}: {entry}");
                }
                Ok(Outcome::Continue)
            }
            "help" => {
                println!("{}", banner::help_text(args.first().copied()));
                Ok(Outcome::Continue)
            }
            "licence" | "license" => {
                println!("{}", banner::LICENCE);
                Ok(Outcome::Continue)
            }
            "exit" => Ok(Outcome::Exit),
            "" => Ok(Outcome::Continue),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }

    fn cmd_listen(&mut self, args: &[&str]) -> Result<(), CommandError> {
        if args.len() < 2 {
            return Err(CommandError::BadArguments {
                command: "listen",
                expected: "<localPort> <remoteHost|-> [remotePort] [protocol]",
            });
        }

        let local_port: u16 = args[0].parse().map_err(|_| CommandError::BadArguments {
            command: "listen",
            expected: "a numeric local port",
        })?;
        let remote_host = if args[1] == "-" { None } else { Some(args[1].to_string()) };
        let remote_port: u16 = match args.get(2) {
            Some(token) => token.parse().map_err(|_| CommandError::BadArguments {
                command: "listen",
                expected: "a numeric remote port",
            })?,
            None => 0,
        };
        let protocol = args.get(3).copied().unwrap_or("tcp");

        let name = self.dispatcher.alloc_name();
        let assigned = match protocol {
            "tcp" => {
                let listener = monjon_core::tcp::TcpListener::bind(name, local_port, remote_host, remote_port)?;
                let description = listener.describe();
                let assigned = self.dispatcher.register_source(Source::TcpListener(listener))?;
                (assigned, description)
            }
            "udp" => {
                let host = remote_host.ok_or(CommandError::BadArguments {
                    command: "listen",
                    expected: "a remote host when protocol is udp",
                })?;
                let listener = monjon_core::udp::UdpListener::stub(name, local_port, host, remote_port);
                let description = listener.describe();
                let assigned = self.dispatcher.register_source(Source::Udp(listener))?;
                (assigned, description)
            }
            other => {
                return Err(DispatchError::Configuration(ConfigurationError::UnknownProtocol(other.to_string())).into())
            }
        };

        println!("=> s[{}] = {}", assigned.0, assigned.1);
        Ok(())
    }

    fn cmd_breakpoint(&mut self, args: &[&str]) -> Result<(), CommandError> {
        let Some(&first) = args.first() else {
            return Err(CommandError::BadArguments { command: "breakpoint", expected: "<source> <event> [condition]" });
        };

        if let Ok(id) = first.parse::<u64>() {
            let event_token = args.get(1).ok_or(CommandError::BadArguments {
                command: "breakpoint",
                expected: "<source> <event> [condition]",
            })?;
            let kind = EventKind::from_token(event_token).ok_or_else(|| CommandError::BadEventKind((*event_token).to_string()))?;
            let condition = condition_from(&args[2..]);

            let source = SourceName(id);
            if self.dispatcher.get_source(source).is_none() {
                return Err(CommandError::NoSuchSource(id));
            }
            let bp = self.dispatcher.set_breakpoint(source, kind, condition);
            println!("=> b[{}]", bp.name);
        } else {
            let kind = EventKind::from_token(first).ok_or_else(|| CommandError::BadEventKind(first.to_string()))?;
            let condition = condition_from(&args[1..]);
            let sources: Vec<SourceName> = self.dispatcher.get_sources().map(|s| s.name()).collect();
            for source in sources {
                let bp = self.dispatcher.set_breakpoint(source, kind, condition.clone());
                println!("=> b[{}] on s[{}]", bp.name, source);
            }
        }
        Ok(())
    }

    fn cmd_clear(&mut self, args: &[&str]) -> Result<(), CommandError> {
        let raw = args.first().ok_or(CommandError::BadArguments { command: "clear", expected: "<breakpointName>" })?;
        let id: u64 = raw.parse().map_err(|_| CommandError::BadBreakpointName((*raw).to_string()))?;
        match self.dispatcher.clear_breakpoint(BreakpointName(id)) {
            Some(_) => {}
            None => println!("no such breakpoint: b[{id}]"),
        }
        Ok(())
    }

    fn cmd_watch(&mut self, args: &[&str]) -> Result<(), CommandError> {
        if args.len() < 2 {
            return Err(CommandError::BadArguments { command: "watch", expected: "<source> <property> [condition]" });
        }
        let id: u64 = args[0].parse().map_err(|_| CommandError::BadSourceName(args[0].to_string()))?;
        let source = SourceName(id);
        if self.dispatcher.get_source(source).is_none() {
            return Err(CommandError::NoSuchSource(id));
        }
        let property = args[1].to_string();
        let condition = condition_from(&args[2..]);
        let wp = self.dispatcher.set_watchpoint(source, property, condition);
        println!("=> w[{}]", wp.name);
        Ok(())
    }

    fn cmd_unwatch(&mut self, args: &[&str]) -> Result<(), CommandError> {
        let raw = args.first().ok_or(CommandError::BadArguments { command: "unwatch", expected: "<watchpointName>" })?;
        let id: u64 = raw.parse().map_err(|_| CommandError::BadWatchpointName((*raw).to_string()))?;
        match self.dispatcher.clear_watchpoint(WatchpointName(id)) {
            Some(_) => {}
            None => println!("no such watchpoint: w[{id}]"),
        }
        Ok(())
    }

    fn cmd_sources(&self, args: &[&str]) {
        if args.first() == Some(&"json") {
            let rows: Vec<serde_json::Value> = self
                .dispatcher
                .get_sources()
                .map(|s| serde_json::json!({"name": s.name().0, "kind": format!("{:?}", s.kind()), "description": s.describe()}))
                .collect();
            match serde_json::to_string_pretty(&rows) {
                Ok(text) => println!("{text}"),
                Err(e) => warn!(error = %e, "failed to serialize sources table"),
            }
            return;
        }

        for source in self.dispatcher.get_sources() {
            println!("s[{}] = {}", source.name(), source.describe());
        }
    }

    fn cmd_breakpoints(&self) {
        for bp in self.dispatcher.get_breakpoints() {
            println!("b[{}] = breakpoint(s[{}], {}, {:?})", bp.name, bp.source, bp.kind, bp.condition);
        }
    }

    fn cmd_watchpoints(&self) {
        for wp in self.dispatcher.get_watchpoints() {
            println!("w[{}] = watch(s[{}], {:?}, {:?})", wp.name, wp.source, wp.property, wp.condition);
        }
    }

    fn cmd_event(&self) {
        match self.dispatcher.stashed_event() {
            Some(event) => {
                print!("e = {} on s[{}]", event.kind, event.source);
                match &event.payload {
                    Some(packet) => println!(", {} bytes", packet.bytes.len()),
                    None => println!(),
                }
            }
            None => println!("no event currently held"),
        }
    }
}

fn condition_from(tokens: &[&str]) -> String {
    if tokens.is_empty() {
        DEFAULT_CONDITION.to_string()
    } else {
        tokens.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use monjon_core::MioMultiplexer;

    use super::*;

    fn harness() -> Repl {
        let multiplexer = MioMultiplexer::new(Arc::new(AtomicBool::new(false))).expect("poll is always constructible");
        let dispatcher = Dispatcher::new(Box::new(multiplexer));
        let mut repl = Repl::new(dispatcher).expect("editor is always constructible");
        repl.history_path = None;
        repl
    }

    #[test]
    fn empty_line_is_a_no_op() {
        let mut repl = harness();
        assert!(matches!(repl.execute(""), Ok(Outcome::Continue)));
    }

    #[test]
    fn unknown_command_is_reported() {
        let mut repl = harness();
        let err = repl.execute("frobnicate").expect_err("not a real command");
        assert!(matches!(err, CommandError::UnknownCommand(cmd) if cmd == "frobnicate"));
    }

    #[test]
    fn exit_yields_exit_outcome() {
        let mut repl = harness();
        assert!(matches!(repl.execute("exit"), Ok(Outcome::Exit)));
    }

    #[test]
    fn listen_registers_a_source_visible_to_sources_command() {
        let mut repl = harness();
        repl.execute("listen 0 example.com 80").expect("valid listen invocation");
        assert_eq!(repl.dispatcher.get_sources().count(), 1);
    }

    #[test]
    fn listen_rejects_non_numeric_port() {
        let mut repl = harness();
        let err = repl.execute("listen notaport example.com").expect_err("bad port");
        assert!(matches!(err, CommandError::BadArguments { command: "listen", .. }));
    }

    #[test]
    fn breakpoint_on_unknown_source_is_rejected() {
        let mut repl = harness();
        let err = repl.execute("breakpoint 99 accept").expect_err("no source 99");
        assert!(matches!(err, CommandError::NoSuchSource(99)));
    }

    #[test]
    fn breakpoint_with_unknown_event_kind_is_rejected() {
        let mut repl = harness();
        repl.execute("listen 0 example.com 80").expect("valid listen invocation");
        let err = repl.execute("breakpoint 0 not_a_kind").expect_err("bad event kind");
        assert!(matches!(err, CommandError::BadEventKind(kind) if kind == "not_a_kind"));
    }

    #[test]
    fn save_history_writes_the_transcript_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut repl = harness();
        repl.history_path = Some(dir.path().join("history"));
        repl.transcript.push("sources".to_string());
        repl.save_history();
        assert!(dir.path().join("history").exists());
    }
}
