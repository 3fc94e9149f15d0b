//! Output sinks: where intensity writes end up.
//!
//! The production sink speaks the pi-blaster text protocol: one
//! `"<gpio>=<level>\n"` line per channel, written to a device file.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::level::{Channel, ColorTriple, Intensity};
use crate::lock;

/// Destination for channel intensity writes.
///
/// Every call must reach the device immediately; the engine relies on each
/// ramp step being externally observable.
pub trait OutputSink: Send {
    /// Write a single channel.
    fn write_channel(&mut self, channel: Channel, level: Intensity) -> io::Result<()>;

    /// Write all three channels.
    fn write_levels(&mut self, levels: ColorTriple) -> io::Result<()> {
        for channel in Channel::ALL {
            self.write_channel(channel, channel.get(levels))?;
        }
        Ok(())
    }
}

/// GPIO numbers (not header pin numbers) driving each color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinMap {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            red: 23,
            green: 24,
            blue: 25,
        }
    }
}

impl PinMap {
    #[must_use]
    pub fn pin(&self, channel: Channel) -> u8 {
        match channel {
            Channel::Red => self.red,
            Channel::Green => self.green,
            Channel::Blue => self.blue,
        }
    }
}

/// Text sink for the pi-blaster daemon's device file.
pub struct PiBlasterSink<W> {
    writer: W,
    pins: PinMap,
}

impl<W: Write + Send> PiBlasterSink<W> {
    pub fn new(writer: W, pins: PinMap) -> Self {
        Self { writer, pins }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn line(&self, channel: Channel, level: Intensity) -> String {
        format!("{}={level}\n", self.pins.pin(channel))
    }
}

impl<W: Write + Send> OutputSink for PiBlasterSink<W> {
    fn write_channel(&mut self, channel: Channel, level: Intensity) -> io::Result<()> {
        let line = self.line(channel, level);
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()
    }

    fn write_levels(&mut self, levels: ColorTriple) -> io::Result<()> {
        // One write so the daemon sees the three channels together
        let text: String = Channel::ALL
            .iter()
            .map(|&channel| self.line(channel, channel.get(levels)))
            .collect();
        self.writer.write_all(text.as_bytes())?;
        self.writer.flush()
    }
}

/// A single write observed by a [`RecordingSink`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SinkWrite {
    Channel(Channel, Intensity),
    Levels(ColorTriple),
}

/// Sink that remembers every write. Clones share the same history.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    writes: Arc<Mutex<Vec<SinkWrite>>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all writes so far, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<SinkWrite> {
        lock(&self.writes).clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.writes).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.writes).is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<SinkWrite> {
        lock(&self.writes).last().copied()
    }

    pub fn clear(&self) {
        lock(&self.writes).clear();
    }
}

impl OutputSink for RecordingSink {
    fn write_channel(&mut self, channel: Channel, level: Intensity) -> io::Result<()> {
        lock(&self.writes).push(SinkWrite::Channel(channel, level));
        Ok(())
    }

    fn write_levels(&mut self, levels: ColorTriple) -> io::Result<()> {
        lock(&self.writes).push(SinkWrite::Levels(levels));
        Ok(())
    }
}
