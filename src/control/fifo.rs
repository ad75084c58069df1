//! Named-pipe helper: create, open, and do line-oriented I/O over a POSIX
//! FIFO. Used by the handshake/heartbeat worker for both directions of the
//! two-pipe control channel.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::FromRawFd;

use anyhow::{Context, Result};
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd::{mkfifo, unlink};

pub struct Fifo {
    path: String,
}

impl Fifo {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Creates the FIFO at `path`, unlinking any stale one first when
    /// `recreate` is set.
    pub fn create(&self, recreate: bool) -> Result<()> {
        if recreate {
            let _ = unlink(self.path.as_str());
        }
        match mkfifo(self.path.as_str(), Mode::from_bits_truncate(0o660)) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::EEXIST) if !recreate => Ok(()),
            Err(e) => Err(e).with_context(|| format!("mkfifo({}) failed", self.path)),
        }
    }

    pub fn remove(&self) {
        let _ = unlink(self.path.as_str());
    }

    pub fn open_for_reading(&self, blocking: bool) -> Result<File> {
        let mut flags = OFlag::O_RDONLY;
        if !blocking {
            flags |= OFlag::O_NONBLOCK;
        }
        let fd = nix::fcntl::open(self.path.as_str(), flags, Mode::empty())
            .with_context(|| format!("open({}, read) failed", self.path))?;
        Ok(unsafe { File::from_raw_fd(fd) })
    }

    pub fn open_for_writing(&self, blocking: bool) -> Result<File> {
        let mut flags = OFlag::O_WRONLY;
        if !blocking {
            flags |= OFlag::O_NONBLOCK;
        }
        let fd = nix::fcntl::open(self.path.as_str(), flags, Mode::empty())
            .with_context(|| format!("open({}, write) failed", self.path))?;
        Ok(unsafe { File::from_raw_fd(fd) })
    }
}

/// Reads a single `\n`-terminated line (newline stripped) from a
/// non-blocking fd, one byte at a time, until `max_len` is reached, the
/// pipe is closed, or `deadline` elapses. Returns `None` on timeout or EOF
/// with nothing read.
pub fn read_line_with_timeout(file: &mut File, max_len: usize, timeout: std::time::Duration) -> Option<String> {
    let deadline = std::time::Instant::now() + timeout;
    let mut out = String::new();
    let mut byte = [0u8; 1];
    loop {
        if std::time::Instant::now() >= deadline {
            return None;
        }
        match file.read(&mut byte) {
            Ok(0) => {
                std::thread::sleep(std::time::Duration::from_millis(10));
                continue;
            }
            Ok(_) => {
                if byte[0] == b'\n' {
                    break;
                }
                out.push(byte[0] as char);
                if out.len() >= max_len {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(std::time::Duration::from_millis(10));
                continue;
            }
            Err(_) => return if out.is_empty() { None } else { Some(out) },
        }
    }
    Some(out)
}

/// Writes `line`, appending a trailing newline if missing.
pub fn write_line(file: &mut File, line: &str) -> Result<()> {
    let mut payload = line.to_string();
    if !payload.ends_with('\n') {
        payload.push('\n');
    }
    file.write_all(payload.as_bytes()).context("write_line failed")
}
