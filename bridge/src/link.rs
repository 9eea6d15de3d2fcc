//! # Serial Link & Command Transactions
//!
//! [`Link`] owns the serial port, the clock and the line reader. It offers
//! the one request/response primitive every higher-level interaction with
//! the module is built from:
//!
//! ```text
//! execute("AT+CWMODE?\r\n", "+CWMODE:1", 2000)
//!    │
//!    ├─► write command verbatim
//!    └─► read lines until one contains the expected text ─► Ok(())
//!                         or the deadline passes         ─► Err(Timeout)
//! ```
//!
//! Before a command is written, complete lines still waiting from earlier
//! traffic are discarded so a stale `OK` cannot acknowledge it. Once the
//! expected line is seen, the rest of that reply is read up to its final
//! status line, leaving the port clean for the next command.
//!
//! There is no retry in here. Callers decide whether to re-issue, escalate
//! or give up.

use embedded_io::{Read, ReadReady, Write};

use crate::at::INBOUND_MARKER;
use crate::line::{contains, trim_line, Line, LineReader};
use crate::traits::{Clock, LinkError, LinkResult};
use crate::SERIAL_INPUT_CAPACITY;

/// Serial port, clock and line assembly for one module
pub struct Link<T, C> {
    port: T,
    clock: C,
    reader: LineReader<SERIAL_INPUT_CAPACITY>,
    line: Line,
    poll_interval_ms: u32,
    dropped_requests: u32,
}

impl<T, C> Link<T, C>
where
    T: Read + Write + ReadReady,
    C: Clock,
{
    /// Wrap a port and clock; `poll_interval_ms` is the pause between
    /// empty polls inside timed waits
    pub fn new(port: T, clock: C, poll_interval_ms: u32) -> Self {
        Self {
            port,
            clock,
            reader: LineReader::new(),
            line: Line::new(),
            poll_interval_ms,
            dropped_requests: 0,
        }
    }

    /// Write raw bytes to the module
    pub fn write_all(&mut self, bytes: &[u8]) -> LinkResult<()> {
        self.port.write_all(bytes).map_err(LinkError::io)
    }

    /// Write a single byte to the module
    pub fn write_byte(&mut self, byte: u8) -> LinkResult<()> {
        self.write_all(&[byte])
    }

    /// Flush anything the port is holding back
    pub fn flush(&mut self) -> LinkResult<()> {
        self.port.flush().map_err(LinkError::io)
    }

    /// Non-blocking poll for one complete line
    ///
    /// On `Ok(true)` the line is available through [`Link::line`].
    pub fn try_read_line(&mut self) -> LinkResult<bool> {
        let found = self.reader.try_read_line(&mut self.port, &mut self.line)?;
        if found {
            log::debug!("<<< {}", printable(&self.line));
        }
        Ok(found)
    }

    /// Poll for a line until one arrives or `timeout_ms` elapses
    pub fn read_line_with_timeout(&mut self, timeout_ms: u32) -> LinkResult<()> {
        let result = self.wait_line(timeout_ms);
        if result == Err(LinkError::Timeout) {
            log::warn!("link: no line within {} ms", timeout_ms);
        }
        result
    }

    /// Send `command` and wait for a line containing `expected`
    ///
    /// On success the reply has been consumed through its final status line
    /// (or until the deadline, if the module never sends one).
    pub fn execute(&mut self, command: &[u8], expected: &[u8], timeout_ms: u32) -> LinkResult<()> {
        self.discard_pending()?;
        log::debug!(">>> {}", printable(command));
        self.write_all(command)?;

        let start = self.clock.now_ms();
        loop {
            let elapsed = self.clock.elapsed_since(start);
            if elapsed >= u64::from(timeout_ms) {
                log::debug!(
                    "link: no '{}' after {} ms",
                    printable(expected),
                    timeout_ms
                );
                return Err(LinkError::Timeout);
            }
            let remaining = u64::from(timeout_ms) - elapsed;
            match self.wait_line(remaining as u32) {
                Ok(()) if contains(&self.line, expected) => {
                    if !is_final(&self.line) {
                        self.finish_reply(start, timeout_ms)?;
                    }
                    return Ok(());
                }
                Ok(()) => continue,
                Err(LinkError::Timeout) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Send `command` and hand every reply line to `on_line`
    ///
    /// Stops at a bare `OK` (returns `Ok(true)`), a bare `ERROR` or `FAIL`
    /// (returns `Ok(false)`), or the deadline. Lines pending from earlier
    /// traffic are discarded first.
    pub fn collect_response<F>(
        &mut self,
        command: &[u8],
        timeout_ms: u32,
        mut on_line: F,
    ) -> LinkResult<bool>
    where
        F: FnMut(&[u8]),
    {
        self.discard_pending()?;
        log::debug!(">>> {}", printable(command));
        self.write_all(command)?;

        let start = self.clock.now_ms();
        loop {
            let elapsed = self.clock.elapsed_since(start);
            if elapsed >= u64::from(timeout_ms) {
                log::warn!("link: response to '{}' incomplete", printable(command));
                return Err(LinkError::Timeout);
            }
            match self.wait_line((u64::from(timeout_ms) - elapsed) as u32) {
                Ok(()) => match trim_line(&self.line) {
                    b"OK" => return Ok(true),
                    b"ERROR" | b"FAIL" => return Ok(false),
                    b"" => {}
                    text => on_line(text),
                },
                Err(LinkError::Timeout) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Consume every complete line already received
    ///
    /// A partial line stays staged. Returns the number of lines dropped.
    /// Dropped request notifications are logged and counted in
    /// [`Link::dropped_requests`].
    pub fn discard_pending(&mut self) -> LinkResult<usize> {
        let mut discarded = 0;
        while self.try_read_line()? {
            if contains(&self.line, INBOUND_MARKER) {
                self.dropped_requests = self.dropped_requests.saturating_add(1);
                log::warn!("link: request dropped while busy: {}", printable(&self.line));
            }
            discarded += 1;
        }
        Ok(discarded)
    }

    /// Request notifications discarded while waiting on a command
    pub fn dropped_requests(&self) -> u32 {
        self.dropped_requests
    }

    /// Most recently completed line, terminator included
    pub fn line(&self) -> &[u8] {
        &self.line
    }

    /// Block for `ms` milliseconds
    pub fn delay_ms(&mut self, ms: u32) {
        self.clock.delay_ms(ms);
    }

    /// Current time from the link clock
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Access the port (used by tests and simulators)
    pub fn port_mut(&mut self) -> &mut T {
        &mut self.port
    }

    /// Access the clock
    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Read the rest of a matched reply up to its final status line
    fn finish_reply(&mut self, start: u64, timeout_ms: u32) -> LinkResult<()> {
        loop {
            let elapsed = self.clock.elapsed_since(start);
            if elapsed >= u64::from(timeout_ms) {
                log::debug!("link: reply ended without a status line");
                return Ok(());
            }
            match self.wait_line((u64::from(timeout_ms) - elapsed) as u32) {
                Ok(()) if is_final(&self.line) => return Ok(()),
                Ok(()) | Err(LinkError::Timeout) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn wait_line(&mut self, timeout_ms: u32) -> LinkResult<()> {
        let start = self.clock.now_ms();
        loop {
            if self.try_read_line()? {
                return Ok(());
            }
            if self.clock.elapsed_since(start) >= u64::from(timeout_ms) {
                return Err(LinkError::Timeout);
            }
            self.clock.delay_ms(self.poll_interval_ms);
        }
    }
}

/// Status line that ends a command reply
fn is_final(line: &[u8]) -> bool {
    matches!(
        trim_line(line),
        b"OK" | b"ERROR" | b"FAIL" | b"SEND OK" | b"SEND FAIL"
    )
}

/// Lossy text view of serial traffic for log output
pub(crate) fn printable(bytes: &[u8]) -> &str {
    let trimmed = trim_line(bytes);
    match core::str::from_utf8(trimmed) {
        Ok(text) => text,
        Err(e) => core::str::from_utf8(&trimmed[..e.valid_up_to()]).unwrap_or(""),
    }
}
