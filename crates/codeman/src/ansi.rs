// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming ANSI stripper backed by the `vte` parser.
//!
//! Removes CSI / OSC / DEC escape sequences and control bytes from raw
//! terminal output, yielding the printable text plus line boundaries. The
//! parser carries its state (partial escape sequences, split UTF-8 code
//! points) across chunk boundaries, so one stripper instance must be owned
//! by exactly one stream and never shared across sessions.
pub struct AnsiStripper {
    parser: vte::Parser,
}

impl Default for AnsiStripper {
    fn default() -> Self {
        Self::new()
    }
}

impl AnsiStripper {
    pub fn new() -> Self {
        Self { parser: vte::Parser::new() }
    }

    /// Feed raw bytes, returning the stripped text for this chunk.
    ///
    /// `\r` and `\n` both map to `'\n'` so carriage-return redraws (spinner
    /// frames) terminate the current logical line instead of growing it.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        let mut sink = TextSink { out: String::with_capacity(bytes.len()) };
        self.parser.advance(&mut sink, bytes);
        sink.out
    }
}

struct TextSink {
    out: String,
}

impl vte::Perform for TextSink {
    fn print(&mut self, c: char) {
        self.out.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | b'\r' => self.out.push('\n'),
            b'\t' => self.out.push('\t'),
            _ => {}
        }
    }

    fn hook(&mut self, _: &vte::Params, _: &[u8], _: bool, _: char) {}
    fn put(&mut self, _: u8) {}
    fn unhook(&mut self) {}
    fn osc_dispatch(&mut self, _: &[&[u8]], _: bool) {}
    fn csi_dispatch(&mut self, _: &vte::Params, _: &[u8], _: bool, _: char) {}
    fn esc_dispatch(&mut self, _: &[u8], _: bool, _: u8) {}
}

/// One-shot strip for buffers that are already complete.
pub fn strip(bytes: &[u8]) -> String {
    AnsiStripper::new().push(bytes)
}

#[cfg(test)]
#[path = "ansi_tests.rs"]
mod tests;
