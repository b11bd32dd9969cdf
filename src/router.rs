//! Stream Router (component F): stdout/stderr autocapture.
//!
//! Python's `vigilant_sdk` does this by monkey-patching `sys.stdout.write`;
//! Rust has no equivalent hook on `std::io::Stdout`. The idiomatic
//! substitute is OS-level fd redirection: `dup` the original fd aside,
//! `dup2` a pipe's write end over it, and read lines off the pipe on a
//! dedicated OS thread (this is blocking I/O, so it does not belong on the
//! async runtime).

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::thread::JoinHandle;

use crate::types::LogLevel;

type LineSink = dyn Fn(LogLevel, String) + Send + Sync;

struct CaptureState {
    stdout: RedirectedStream,
    stderr: RedirectedStream,
}

struct RedirectedStream {
    target_fd: RawFd,
    saved_fd: RawFd,
    reader: JoinHandle<()>,
}

/// Captures process-wide stdout/stderr writes and turns each line into a
/// log record, forwarding (optionally) to the original stream so output
/// still reaches the terminal.
pub struct AutocaptureRouter {
    state: parking_lot::Mutex<Option<CaptureState>>,
    passthrough: bool,
    sink: std::sync::Arc<LineSink>,
}

impl AutocaptureRouter {
    pub fn new(passthrough: bool, sink: impl Fn(LogLevel, String) + Send + Sync + 'static) -> Self {
        Self {
            state: parking_lot::Mutex::new(None),
            passthrough,
            sink: std::sync::Arc::new(sink),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Idempotent: a second call while already enabled is a no-op.
    pub fn enable(&self) -> std::io::Result<()> {
        let mut guard = self.state.lock();
        if guard.is_some() {
            return Ok(());
        }

        let stdout = redirect(libc::STDOUT_FILENO, LogLevel::Info, self.passthrough, self.sink.clone())?;
        let stderr = match redirect(libc::STDERR_FILENO, LogLevel::Error, self.passthrough, self.sink.clone()) {
            Ok(stderr) => stderr,
            Err(e) => {
                restore(stdout);
                return Err(e);
            }
        };

        *guard = Some(CaptureState { stdout, stderr });
        Ok(())
    }

    /// Idempotent: a second call while already disabled is a no-op.
    pub fn disable(&self) {
        let state = self.state.lock().take();
        if let Some(state) = state {
            restore(state.stdout);
            restore(state.stderr);
        }
    }
}

impl Drop for AutocaptureRouter {
    fn drop(&mut self) {
        self.disable();
    }
}

fn redirect(
    target_fd: RawFd,
    level: LogLevel,
    passthrough: bool,
    sink: std::sync::Arc<LineSink>,
) -> std::io::Result<RedirectedStream> {
    let mut fds = [0 as RawFd; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);

    let saved_fd = unsafe { libc::dup(target_fd) };
    if saved_fd < 0 {
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
        return Err(std::io::Error::last_os_error());
    }

    if unsafe { libc::dup2(write_fd, target_fd) } < 0 {
        let err = std::io::Error::last_os_error();
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
            libc::close(saved_fd);
        }
        return Err(err);
    }
    // target_fd now points at the pipe's write end; our own extra copy of
    // it is redundant.
    unsafe { libc::close(write_fd) };

    let passthrough_fd = if passthrough { Some(saved_fd) } else { None };
    let reader = std::thread::spawn(move || pump_lines(read_fd, level, passthrough_fd, sink));

    Ok(RedirectedStream {
        target_fd,
        saved_fd,
        reader,
    })
}

fn pump_lines(
    read_fd: RawFd,
    level: LogLevel,
    passthrough_fd: Option<RawFd>,
    sink: std::sync::Arc<LineSink>,
) {
    let file = unsafe { File::from_raw_fd(read_fd) };
    let reader = BufReader::new(file);
    let mut passthrough_file = passthrough_fd.map(|fd| unsafe { File::from_raw_fd(fd) });

    for line in reader.lines() {
        let Ok(line) = line else { break };
        if let Some(f) = passthrough_file.as_mut() {
            let _ = writeln!(f, "{line}");
        }
        if !line.is_empty() {
            sink(level, line);
        }
    }
    // Prevent the passthrough `File` from closing the saved fd; the
    // caller owns its lifetime via `RedirectedStream::saved_fd`.
    if let Some(f) = passthrough_file {
        std::mem::forget(f);
    }
}

/// A duplicate of a stream's fd, captured before autocapture (if enabled)
/// redirects the original. Facade-level passthrough formatting writes
/// through this handle so it still reaches the real terminal without
/// looping back through autocapture as a second, re-formatted log line.
pub struct PassthroughWriter {
    fd: RawFd,
}

impl PassthroughWriter {
    pub fn dup(target_fd: RawFd) -> std::io::Result<Self> {
        let fd = unsafe { libc::dup(target_fd) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    pub fn write_line(&self, line: &str) {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        unsafe {
            libc::write(self.fd, bytes.as_ptr() as *const libc::c_void, bytes.len());
        }
    }
}

impl Drop for PassthroughWriter {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

fn restore(stream: RedirectedStream) {
    unsafe {
        libc::dup2(stream.saved_fd, stream.target_fd);
        libc::close(stream.saved_fd);
    }
    // Closing target_fd's write end (by restoring the original) makes the
    // pipe's read end hit EOF, so the reader thread's `for line in
    // reader.lines()` loop exits on its own.
    let _ = stream.reader.join();
}
