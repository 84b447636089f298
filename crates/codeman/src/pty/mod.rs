// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY plumbing for the multiplexer attach process: forkpty spawn plus
//! non-blocking async I/O on the master side.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};

use anyhow::Context;
use bytes::Bytes;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};
use serde::{Deserialize, Serialize};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

/// Exit status of the attach child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// Input delivered to the PTY child.
#[derive(Debug)]
pub enum PtyInput {
    /// Raw bytes written straight to the master fd (client keystrokes).
    /// Programmatic input never comes this way; it goes through the
    /// multiplexer's send-keys path instead.
    Write(Bytes),
    Resize { cols: u16, rows: u16 },
}

/// Master side of the attach child's PTY, newtyped so it can register with
/// `AsyncFd`.
#[derive(Debug)]
struct AttachFd(OwnedFd);

impl AsRawFd for AttachFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

/// One spawned attach process on a fresh PTY.
pub struct PtyProcess {
    master: AsyncFd<AttachFd>,
    child_pid: Pid,
}

impl PtyProcess {
    /// Spawn `argv` (normally the multiplexer attach command) on a new PTY
    /// with the given window size and extra environment variables.
    // forkpty requires unsafe: the post-fork child is partially initialized
    #[allow(unsafe_code)]
    pub fn spawn(
        argv: &[String],
        cols: u16,
        rows: u16,
        env: &[(String, String)],
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!argv.is_empty(), "empty attach command");

        let winsize = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. We immediately exec.
        let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

        match result {
            ForkptyResult::Child => {
                std::env::set_var("TERM", "xterm-256color");
                std::env::set_var("CODEMAN", "1");
                for (k, v) in env {
                    std::env::set_var(k, v);
                }

                let c_args: Vec<CString> = argv
                    .iter()
                    .map(|s| CString::new(s.as_bytes()))
                    .collect::<Result<_, _>>()
                    .context("invalid command argument")?;

                execvp(&c_args[0], &c_args).context("execvp failed")?;
                unreachable!();
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(&master)?;
                let master =
                    AsyncFd::new(AttachFd(master)).context("AsyncFd registration failed")?;
                Ok(Self { master, child_pid: child })
            }
        }
    }

    pub fn child_pid(&self) -> u32 {
        self.child_pid.as_raw() as u32
    }

    /// Pump PTY output into `output_tx` and input from `input_rx` until the
    /// child exits or both channels close.
    pub async fn run(
        self,
        output_tx: mpsc::Sender<Bytes>,
        mut input_rx: mpsc::Receiver<PtyInput>,
    ) -> anyhow::Result<ExitStatus> {
        let pid = self.child_pid;
        let mut buf = vec![0u8; 8192];

        loop {
            tokio::select! {
                result = self.read_chunk(&mut buf) => {
                    match result {
                        Ok(0) => break,
                        Ok(n) => {
                            let data = Bytes::copy_from_slice(&buf[..n]);
                            if output_tx.send(data).await.is_err() {
                                break;
                            }
                        }
                        // EIO: the slave side closed (child exited).
                        Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                        Err(e) => return Err(e.into()),
                    }
                }
                input = input_rx.recv() => {
                    match input {
                        Some(PtyInput::Write(data)) => {
                            self.write_all(&data).await?;
                        }
                        Some(PtyInput::Resize { cols, rows }) => {
                            self.resize(cols, rows)?;
                        }
                        None => break,
                    }
                }
            }
        }

        // Reap on a blocking thread to avoid stalling the runtime.
        let status =
            tokio::task::spawn_blocking(move || wait_for_exit(pid)).await.context("join wait")??;
        Ok(status)
    }

    /// Read the next chunk of attach output, retrying on spurious
    /// readiness.
    async fn read_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.master.readable().await?;
            match guard.try_io(|fd| nix::unistd::read(fd, buf).map_err(errno_to_io)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write client keystrokes to the attach child, handling short writes.
    async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut remaining = data;
        while !remaining.is_empty() {
            let mut guard = self.master.writable().await?;
            match guard.try_io(|fd| nix::unistd::write(fd, remaining).map_err(errno_to_io)) {
                Ok(Ok(n)) => remaining = &remaining[n..],
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    // TIOCSWINSZ ioctl requires unsafe for the libc::ioctl call
    #[allow(unsafe_code)]
    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let ws = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
        // SAFETY: TIOCSWINSZ is a well-defined ioctl setting the window size
        // on the PTY master fd; the Winsize struct is fully initialized.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            anyhow::bail!("TIOCSWINSZ ioctl failed: {}", std::io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Escalating shutdown ladder for a PTY child: SIGTERM, a short grace
/// period, then SIGKILL to the pid and its process group.
pub async fn shutdown_child(pid: u32) {
    if pid == 0 {
        return;
    }
    let pid = Pid::from_raw(pid as i32);
    let _ = kill(pid, Signal::SIGTERM);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let _ = kill(pid, Signal::SIGKILL);
    let _ = kill(Pid::from_raw(-pid.as_raw()), Signal::SIGKILL);
    let _ = waitpid(pid, Some(WaitPidFlag::WNOHANG));
}

/// Put the PTY master into non-blocking mode for `AsyncFd`.
fn set_nonblocking(fd: &impl std::os::fd::AsFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(errno_to_io)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(errno_to_io)?;
    Ok(())
}

fn errno_to_io(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// Block until the child exits and convert to our [`ExitStatus`].
fn wait_for_exit(pid: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus { code: Some(code), signal: None });
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(sig as i32) });
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(nix::errno::Errno::ECHILD) => {
                return Ok(ExitStatus { code: None, signal: None });
            }
            Err(e) => anyhow::bail!("waitpid failed: {e}"),
        }
    }
}

#[cfg(test)]
#[path = "pty_tests.rs"]
mod tests;
