//! Scoped process-execution capability.
//!
//! Commands are admitted by base name against the capability's allowlist;
//! strict mode additionally blocks a fixed set of file-operation commands so
//! that file access is forced through the filesystem capability. Spawned
//! children get piped stdio, both streams are drained by dedicated threads
//! (joined before return), and a deadline overrun kills the child.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use std::process::Child;
use std::process::ChildStderr;
use std::process::ChildStdout;
use std::process::Command;
use std::process::Stdio;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use crate::capability::CapabilityState;
use crate::capability::RevocationGuard;
use crate::capability::SandboxContext;
use crate::error::Result;
use crate::error::SafeExecErr;
use crate::error::SecurityErr;

// Caps for each captured stream: 10KiB or 256 lines, whichever trips first.
const MAX_STREAM_OUTPUT: usize = 10 * 1024;
const MAX_STREAM_OUTPUT_LINES: usize = 256;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Poll interval while waiting for the child below its deadline.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Commands blocked under strict mode regardless of the allowlist: reading,
/// listing, writing, copy/move, delete, directory, permission, archive,
/// link and disk tools.
#[rustfmt::skip]
const STRICT_MODE_FILE_COMMANDS: &[&str] = &[
    // reading
    "cat", "head", "tail", "less", "more", "tac", "nl",
    // listing
    "ls", "dir", "find", "locate", "tree", "file", "stat",
    // writing
    "touch", "tee", "truncate",
    // copy/move
    "cp", "mv", "rsync", "scp",
    // delete
    "rm", "rmdir", "unlink", "shred",
    // directory
    "mkdir", "cd", "pwd",
    // permission
    "chmod", "chown", "chgrp",
    // archive
    "tar", "zip", "unzip", "gzip", "gunzip", "bzip2",
    // link
    "ln", "readlink",
    // disk
    "dd", "df", "du",
];

/// Exit code, captured stdout and captured stderr of one completed child.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Clone)]
pub struct ProcessPermission {
    allowed_commands: HashSet<String>,
    strict: bool,
    ctx: Arc<SandboxContext>,
    state: Arc<CapabilityState>,
}

impl std::fmt::Debug for ProcessPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessPermission")
            .field("allowed_commands", &self.allowed_commands)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

/// Grant a process capability for the duration of `f`; revoked on every
/// exit path. The strict flag is taken from the sandbox configuration, not
/// from the caller.
pub fn request_exec_permission<R>(
    ctx: &Arc<SandboxContext>,
    commands: impl IntoIterator<Item = String>,
    f: impl FnOnce(&ProcessPermission) -> Result<R>,
) -> Result<R> {
    ctx.check_effects_allowed()?;
    let permission = ProcessPermission::new(commands.into_iter().collect(), ctx.clone());
    let _guard = RevocationGuard::new(permission.capability_state());
    f(&permission)
}

impl ProcessPermission {
    pub(crate) fn new(allowed_commands: HashSet<String>, ctx: Arc<SandboxContext>) -> Self {
        Self {
            allowed_commands,
            strict: ctx.strict_mode,
            ctx,
            state: CapabilityState::new(),
        }
    }

    pub(crate) fn capability_state(&self) -> Arc<CapabilityState> {
        self.state.clone()
    }

    /// Launch `command` with `args`, draining stdout/stderr concurrently.
    /// Fails without starting a process when the command is not allowlisted
    /// or is strict-mode blocked; kills the child on deadline overrun.
    pub fn exec(
        &self,
        command: &str,
        args: &[String],
        working_dir: Option<&Path>,
        timeout_ms: u64,
    ) -> Result<ProcessResult> {
        self.ctx.check_effects_allowed()?;
        self.state.check_live()?;
        let base = base_name(command);
        if !self.allowed_commands.contains(&base) {
            return Err(SecurityErr::CommandNotAllowed {
                command: base,
            }
            .into());
        }
        if self.strict && STRICT_MODE_FILE_COMMANDS.contains(&base.as_str()) {
            return Err(SecurityErr::StrictModeCommand { command: base }.into());
        }

        let mut cmd = Command::new(command);
        cmd.args(args);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        // No stdin pipe: some tools try to read from it and hang forever.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let stdout_handle = spawn_stdout_drain(&mut child)?;
        let stderr_handle = spawn_stderr_drain(&mut child)?;

        let exit_code = match wait_with_deadline(&mut child, timeout_ms)? {
            Some(status) => status,
            None => {
                child.kill()?;
                child.wait()?;
                // Join the drains so no thread outlives the call, then
                // report the overrun.
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(SafeExecErr::Timeout {
                    command: base,
                    timeout_ms,
                });
            }
        };

        let stdout = join_drain(stdout_handle)?;
        let stderr = join_drain(stderr_handle)?;

        Ok(ProcessResult {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    /// Convenience wrapper: run with the default timeout and return stdout.
    pub fn exec_output(&self, command: &str, args: &[String]) -> Result<String> {
        Ok(self.exec(command, args, None, DEFAULT_TIMEOUT_MS)?.stdout)
    }
}

/// Allowlists hold base names, never paths.
fn base_name(command: &str) -> String {
    Path::new(command)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| command.to_string())
}

fn spawn_stdout_drain(child: &mut Child) -> Result<thread::JoinHandle<Vec<u8>>> {
    let stdout: ChildStdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout pipe was unexpectedly not available"))?;
    Ok(thread::spawn(move || read_capped(stdout)))
}

fn spawn_stderr_drain(child: &mut Child) -> Result<thread::JoinHandle<Vec<u8>>> {
    let stderr: ChildStderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr pipe was unexpectedly not available"))?;
    Ok(thread::spawn(move || read_capped(stderr)))
}

fn join_drain(handle: thread::JoinHandle<Vec<u8>>) -> Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| std::io::Error::other("output drain thread panicked").into())
}

/// Wait for the child, polling up to the deadline. `None` means the
/// deadline passed with the child still running.
fn wait_with_deadline(child: &mut Child, timeout_ms: u64) -> Result<Option<i32>> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status.code().unwrap_or(-1)));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

/// Read a stream to EOF, keeping at most the byte/line caps. Reading
/// continues past the caps to avoid back-pressuring the child.
fn read_capped<R: Read>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 * 1024);
    let mut tmp = [0u8; 8192];
    let mut remaining_bytes = MAX_STREAM_OUTPUT;
    let mut remaining_lines = MAX_STREAM_OUTPUT_LINES;

    loop {
        let n = match reader.read(&mut tmp) {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        if remaining_bytes > 0 && remaining_lines > 0 {
            let mut copy_len = 0;
            for &b in &tmp[..n] {
                if remaining_bytes == 0 || remaining_lines == 0 {
                    break;
                }
                copy_len += 1;
                remaining_bytes -= 1;
                if b == b'\n' {
                    remaining_lines -= 1;
                }
            }
            buf.extend_from_slice(&tmp[..copy_len]);
        }
    }
    buf
}
