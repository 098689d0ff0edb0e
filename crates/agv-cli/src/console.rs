//! Operator console on stdin.
//!
//! Plain lines are serial traffic and go to the wired link.  Lines starting
//! with `/` are console commands:
//!   /help    – show this list
//!   /status  – print the network snapshot
//!   /forget  – clear the saved network and restart into setup mode
//!   /quit    – stop the controller

use std::io::{self, BufRead};
use std::sync::mpsc::Sender;
use std::thread;

use colored::Colorize;
use tracing::{debug, warn};

use crate::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Status,
    Forget,
    Quit,
}

/// What one stdin line turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Serial(Vec<u8>),
    Command(ConsoleCommand),
    Unknown(String),
    Blank,
}

pub fn parse_line(line: &str) -> Input {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.trim().is_empty() {
        return Input::Blank;
    }
    let Some(cmd) = trimmed.trim().strip_prefix('/') else {
        let mut bytes = trimmed.as_bytes().to_vec();
        bytes.push(b'\n');
        return Input::Serial(bytes);
    };
    match cmd.to_ascii_lowercase().as_str() {
        "help" | "?" => Input::Command(ConsoleCommand::Help),
        "status" => Input::Command(ConsoleCommand::Status),
        "forget" => Input::Command(ConsoleCommand::Forget),
        "quit" | "exit" => Input::Command(ConsoleCommand::Quit),
        other => Input::Unknown(other.to_string()),
    }
}

/// Read stdin on a detached thread until EOF, forwarding to the supervisor.
pub fn spawn_reader(signals: Sender<Signal>) -> io::Result<()> {
    thread::Builder::new()
        .name("agvlink-console".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "stdin read error");
                        break;
                    }
                };
                let signal = match parse_line(&line) {
                    Input::Serial(bytes) => Signal::Serial(bytes),
                    Input::Command(cmd) => Signal::Console(cmd),
                    Input::Unknown(other) => {
                        println!(
                            "{} '/{}'. Type {} for available commands.",
                            "Unknown command:".red(),
                            other.yellow(),
                            "/help".bold()
                        );
                        continue;
                    }
                    Input::Blank => continue,
                };
                if signals.send(signal).is_err() {
                    return;
                }
            }
            debug!("stdin closed");
        })?;
    Ok(())
}

pub fn print_help() {
    println!();
    println!("  {}", "Console commands".bold());
    println!("    {}  show this list", "/help  ".cyan());
    println!("    {}  print the network snapshot", "/status".cyan());
    println!("    {}  forget the saved network and restart", "/forget".cyan());
    println!("    {}  stop the controller", "/quit  ".cyan());
    println!();
    println!("  Any other line is sent over the serial link, e.g. {}.", "STOP".bold());
    println!();
}
