//! Execution tracing and data memory dumps, available in `trace` builds.

use std::io::{self, Write};

use crate::engine::Engine;

impl<C> Engine<C> {
    /// Routes per-step trace lines (`pc opcode`) to the given sink.
    pub fn set_trace(&mut self, sink: Box<dyn Write>) {
        self.trace_sink = Some(sink);
    }

    /// Stops tracing.
    pub fn clear_trace(&mut self) {
        self.trace_sink = None;
    }

    /// Writes a data memory dump: heap statistics, the working stack, and
    /// the call depth.
    pub fn dump(&self, out: &mut dyn Write) -> io::Result<()> {
        let stats = self.heap_stats();
        writeln!(out, "pc: 0x{:08X}", self.program_counter())?;
        writeln!(
            out,
            "entries: {} live, {} free of {} (low water {})",
            stats.live_entries, stats.free_entries, stats.capacity, stats.low_free_count
        )?;
        for (name, count) in &stats.entries_by_type {
            writeln!(out, "  {name}: {count}")?;
        }
        writeln!(out, "stack depth: {}", self.stack.len())?;
        for (depth, entry) in self.stack.iter().rev().enumerate() {
            writeln!(out, "  [{depth}] {:?}", self.data_type(*entry))?;
        }
        writeln!(out, "frames: {}", self.frames.len())?;
        Ok(())
    }
}
