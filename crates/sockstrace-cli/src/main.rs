//! sockstrace - run a program and log every outbound connection it makes

mod sockaddr;

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitCode, ExitStatus};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sockstrace::notify::{read_child_bytes, read_child_string};
use sockstrace::{Engine, Listener, Registry, Request, Ruleset, ShutdownMode, Verdict};

use crate::sockaddr::Destination;

#[derive(Parser)]
#[command(name = "sockstrace")]
#[command(author, version, about = "Trace the network connections a program makes")]
struct Cli {
    /// Fail every connect with EPERM instead of letting it through
    #[arg(long)]
    deny: bool,

    /// Also log calls to this syscall (repeatable)
    #[arg(long = "trace", value_name = "SYSCALL")]
    trace: Vec<String>,

    /// Program to run
    program: String,

    /// Arguments passed to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sockstrace=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut registry = Registry::new();
    let deny = cli.deny;
    registry.register("connect", move |listener: &Listener, req: &Request| {
        handle_connect(listener, req, deny)
    })?;
    for name in cli.trace.iter().filter(|n| n.as_str() != "connect") {
        registry
            .register(name, handle_trace)
            .with_context(|| format!("--trace {name}"))?;
    }

    let mut engine = Engine::start(Ruleset::from_registry(&registry), registry)
        .context("failed to start syscall interception")?;

    if let Some(errors) = engine.errors() {
        thread::Builder::new()
            .name("sockstrace-errors".into())
            .spawn(move || {
                for error in errors {
                    if error.is_fatal() {
                        tracing::error!(%error, "syscall monitoring failed");
                        std::process::exit(1);
                    }
                }
            })
            .context("failed to spawn error watcher")?;
    }

    tracing::info!(program = %cli.program, "executing program");
    let status = Command::new(&cli.program).args(&cli.args).status();

    let stopped = engine.shutdown(ShutdownMode::Drain(Duration::from_secs(1)));
    let status = status.with_context(|| format!("failed to execute {}", cli.program))?;
    stopped.context("syscall monitoring failed")?;

    Ok(ExitCode::from(exit_code(status)))
}

fn handle_connect(listener: &Listener, req: &Request, deny: bool) -> Verdict {
    let destination = read_destination(req);

    // The caller may have rewritten the buffer or gone away while we read it.
    if let Err(errno) = listener.id_valid(req.id) {
        tracing::debug!(pid = req.pid, %errno, "connect gone before inspection");
    } else {
        match destination {
            Ok(dest) => tracing::info!(pid = req.pid, %dest, denied = deny, "connect"),
            Err(error) => {
                tracing::info!(pid = req.pid, %error, denied = deny, "connect (address unreadable)");
            }
        }
    }

    if deny {
        Verdict::deny(libc::EPERM)
    } else {
        Verdict::allow()
    }
}

fn read_destination(req: &Request) -> io::Result<Destination> {
    let len = (req.args[2] as usize).min(sockaddr::MAX_LEN);
    let bytes = read_child_bytes(req.pid, req.args[1], len)?;
    Destination::parse(&bytes)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "truncated sockaddr"))
}

fn handle_trace(listener: &Listener, req: &Request) -> Verdict {
    let syscall = req.syscall_name();
    let Some(index) = path_arg(syscall) else {
        tracing::info!(pid = req.pid, syscall, args = ?&req.args[..3], "syscall");
        return Verdict::allow();
    };

    let path = read_child_string(req.pid, req.args[index]);
    if let Err(errno) = listener.id_valid(req.id) {
        tracing::debug!(pid = req.pid, syscall, %errno, "call gone before inspection");
    } else {
        match path {
            Ok(path) => tracing::info!(pid = req.pid, syscall, %path, "syscall"),
            Err(error) => tracing::info!(pid = req.pid, syscall, %error, "syscall (path unreadable)"),
        }
    }
    Verdict::allow()
}

/// Which argument of a traced syscall holds a path.
fn path_arg(syscall: &str) -> Option<usize> {
    match syscall {
        "open" | "creat" | "stat" | "lstat" | "access" | "execve" | "unlink" | "mkdir"
        | "rmdir" | "readlink" | "chdir" | "truncate" => Some(0),
        "openat" | "openat2" | "newfstatat" | "statx" | "faccessat" | "faccessat2"
        | "readlinkat" | "unlinkat" | "mkdirat" | "mknodat" | "execveat" => Some(1),
        _ => None,
    }
}

/// Shell-style exit code: the child's own code, or 128 + signal.
fn exit_code(status: ExitStatus) -> u8 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code as u8,
        (None, Some(signal)) => 128u8.wrapping_add(signal as u8),
        (None, None) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_program_and_args() {
        let cli = Cli::parse_from(["sockstrace", "--deny", "curl", "-s", "example.com"]);
        assert!(cli.deny);
        assert_eq!(cli.program, "curl");
        assert_eq!(cli.args, ["-s", "example.com"]);
        assert!(cli.trace.is_empty());
    }

    #[test]
    fn repeated_trace() {
        let cli = Cli::parse_from([
            "sockstrace",
            "--trace",
            "sendto",
            "--trace",
            "bind",
            "nc",
        ]);
        assert!(!cli.deny);
        assert_eq!(cli.trace, ["sendto", "bind"]);
        assert!(cli.args.is_empty());
    }

    #[test]
    fn program_is_required() {
        assert!(Cli::try_parse_from(["sockstrace"]).is_err());
    }

    #[test]
    fn path_arguments() {
        assert_eq!(path_arg("openat"), Some(1));
        assert_eq!(path_arg("execve"), Some(0));
        assert_eq!(path_arg("unlinkat"), Some(1));
        assert_eq!(path_arg("sendto"), None);
        assert_eq!(path_arg("connect"), None);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(libc::SIGKILL)), 137);
    }
}
