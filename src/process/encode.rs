//! Physical stream encoding.
//!
//! An [`Encoder`] owns a byte sink and one [`StreamWriter`] per logical
//! stream. Packets go in with their granule position; pages come out
//! serialised and written to the sink as they fill. Header packets
//! (granule position 0) are flushed into pages of their own, which is what
//! codec mapping specs expect of the identification/comment headers.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{bail, Result};

use crate::process::mux::StreamWriter;
use crate::utils::errors::EncodeError;

/// Multiplexing encoder over a byte sink.
///
/// # Example
///
/// ```rust
/// use oggio::process::encode::Encoder;
///
/// let mut encoder = Encoder::new(Vec::new());
/// encoder.write_packet(0x10, b"ident header", 0, false)?;
/// encoder.write_packet(0x10, b"first audio frame", 960, false)?;
/// encoder.write_packet(0x10, b"last audio frame", 1920, true)?;
///
/// let bytes = encoder.finish()?;
/// assert!(bytes.starts_with(b"OggS"));
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Encoder<W: Write> {
    sink: W,
    streams: BTreeMap<u32, StreamWriter>,
}

impl<W: Write> Encoder<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            streams: BTreeMap::new(),
        }
    }

    /// Feeds one packet to the stream `serial`, creating it on first use.
    ///
    /// A packet with granule position 0 is treated as a header and flushed
    /// into its own page immediately; data packets leave page emission to
    /// the size thresholds. Pass `last = true` on the stream's final
    /// packet.
    pub fn write_packet(
        &mut self,
        serial: u32,
        data: &[u8],
        granule_position: i64,
        last: bool,
    ) -> Result<()> {
        let writer = self
            .streams
            .entry(serial)
            .or_insert_with(|| StreamWriter::new(serial));
        writer.packetin(data, granule_position, last)?;

        if granule_position == 0 {
            while let Some(page) = writer.flush() {
                self.sink.write_all(page.as_bytes())?;
            }
        } else {
            while let Some(page) = writer.pageout() {
                self.sink.write_all(page.as_bytes())?;
            }
        }

        Ok(())
    }

    /// Flushes everything still pending for `serial` to the sink.
    pub fn finish_stream(&mut self, serial: u32) -> Result<()> {
        let Some(writer) = self.streams.get_mut(&serial) else {
            bail!(EncodeError::UnknownStream(serial));
        };
        while let Some(page) = writer.flush() {
            self.sink.write_all(page.as_bytes())?;
        }
        Ok(())
    }

    /// Writes one complete logical stream and drains it.
    ///
    /// The final packet is marked `last`, so the stream ends with an EOS
    /// page. Calling this for several serials in turn produces chained
    /// links, one logical stream per link, with no interleaving.
    pub fn write_stream<B: AsRef<[u8]>>(&mut self, serial: u32, packets: &[(B, i64)]) -> Result<()> {
        let Some(last_index) = packets.len().checked_sub(1) else {
            return Ok(());
        };
        for (i, (data, granule_position)) in packets.iter().enumerate() {
            self.write_packet(serial, data.as_ref(), *granule_position, i == last_index)?;
        }
        self.finish_stream(serial)
    }

    /// Writes several logical streams as consecutive chained links, in the
    /// order given.
    pub fn write_streams<B: AsRef<[u8]>>(
        &mut self,
        streams: &[(u32, Vec<(B, i64)>)],
    ) -> Result<()> {
        for (serial, packets) in streams {
            self.write_stream(*serial, packets)?;
        }
        Ok(())
    }

    /// Drains every stream, flushes the sink and returns it.
    pub fn finish(mut self) -> Result<W> {
        let serials: Vec<u32> = self.streams.keys().copied().collect();
        for serial in serials {
            self.finish_stream(serial)?;
        }
        self.sink.flush()?;
        Ok(self.sink)
    }

    /// Returns the sink without flushing pending stream state.
    pub fn into_inner(self) -> W {
        self.sink
    }
}
