//! The codec-visible data unit.

use crate::structs::page::GRANULE_NONE;

/// One packet reassembled from lacing segments, possibly across pages.
///
/// Packets are what codecs consume; the framing layer neither inspects nor
/// interprets their payload. Granule positions are codec-defined counters
/// (PCM samples, video frames); by convention header packets carry 0 and a
/// packet that does not complete a page carries [`GRANULE_NONE`].
///
/// # Example
///
/// ```rust
/// use oggio::structs::packet::Packet;
///
/// fn describe(packet: &Packet) -> String {
///     let position = if packet.has_granule() {
///         packet.granule_position.to_string()
///     } else {
///         "?".into()
///     };
///     format!("#{} at {position}, {} bytes", packet.packetno, packet.len())
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    /// Granule position of the page this packet completed, [`GRANULE_NONE`]
    /// when the packet ends mid-page.
    pub granule_position: i64,
    /// Per-stream packet counter, starting at 0.
    pub packetno: u64,
    /// Set on the first packet of a logical stream.
    pub bos: bool,
    /// Set on the last packet of a logical stream.
    pub eos: bool,
}

impl Packet {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether a granule position is attached.
    pub fn has_granule(&self) -> bool {
        self.granule_position != GRANULE_NONE
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
