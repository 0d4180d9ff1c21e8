//! Per-stream packet reassembly (decode side).
//!
//! A [`StreamReader`] consumes the pages of exactly one logical stream, in
//! physical order, and reassembles lacing segments into packets. Packets
//! spanning page boundaries are glued together across calls; pages lost to
//! corruption surface as a sequence gap, which costs at most the packet in
//! progress and is otherwise silent (escalate with
//! [`set_fail_level`](StreamReader::set_fail_level)).

use std::collections::VecDeque;

use anyhow::{bail, Result};
use log::debug;
use log::Level::Warn;

use crate::log_or_err;
use crate::structs::packet::Packet;
use crate::structs::page::{PageRef, GRANULE_NONE};
use crate::utils::errors::StreamError;

/// Reassembles the packets of one logical stream from its pages.
///
/// # Example
///
/// ```rust
/// use oggio::process::demux::StreamReader;
/// use oggio::process::mux::StreamWriter;
///
/// let mut writer = StreamWriter::new(5);
/// writer.packetin(b"data", 0, true)?;
/// let page = writer.flush().expect("a pending page");
///
/// let mut reader = StreamReader::new(5);
/// reader.pagein(page.view())?;
///
/// let packet = reader.packetout().expect("a completed packet");
/// assert_eq!(packet.data, b"data");
/// assert!(packet.bos && packet.eos);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct StreamReader {
    serial: u32,
    /// Segments of the packet currently in progress, one entry per lacing
    /// segment so gluing stays linear in the packet size.
    segments: Vec<Vec<u8>>,
    pending_len: usize,
    /// The previous page ended with a 255 lacing byte: the next page must
    /// carry the continued flag.
    expecting_continuation: bool,
    /// Consuming the tail of a packet whose head was never seen (seek
    /// landing or lost page); segments are dropped until it terminates.
    discarding: bool,
    next_sequence: Option<u32>,
    packetno: u64,
    saw_packet: bool,
    packets: VecDeque<Packet>,
    fail_level: log::Level,
}

impl StreamReader {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            segments: Vec::new(),
            pending_len: 0,
            expecting_continuation: false,
            discarding: false,
            next_sequence: None,
            packetno: 0,
            saw_packet: false,
            packets: VecDeque::new(),
            fail_level: log::Level::Error,
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Sets the failure level for reassembly anomalies.
    ///
    /// - `log::Level::Error`: log gaps and continue (default)
    /// - `log::Level::Warn`: fail on any gap or lost continuation
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
    }

    /// Number of completed packets waiting in [`packetout`](Self::packetout).
    pub fn queued_packets(&self) -> usize {
        self.packets.len()
    }

    /// Folds one page of this stream into the reassembly state.
    ///
    /// The page must carry this reader's serial; pages must arrive in
    /// physical order. A sequence number gap abandons the packet in
    /// progress and restarts at the new page.
    pub fn pagein(&mut self, page: PageRef<'_>) -> Result<()> {
        if page.serial() != self.serial {
            bail!(StreamError::SerialMismatch {
                expected: self.serial,
                got: page.serial(),
            });
        }

        let sequence = page.sequence_number();
        if let Some(expected) = self.next_sequence {
            if sequence != expected {
                log_or_err!(
                    self,
                    Warn,
                    StreamError::PageSequenceGap {
                        serial: self.serial,
                        expected,
                        got: sequence,
                    },
                );
                self.drop_partial();
            }
        }
        self.next_sequence = Some(sequence.wrapping_add(1));

        if page.is_bos() && (self.expecting_continuation || !self.segments.is_empty()) {
            log_or_err!(
                self,
                Warn,
                StreamError::DanglingPacket {
                    serial: self.serial,
                    pending: self.pending_len,
                },
            );
            self.drop_partial();
        }

        match (page.is_continued(), self.expecting_continuation) {
            (true, true) => {}
            (true, false) if self.discarding => {}
            (true, false) => {
                debug!(
                    "dropping continued packet tail on page {sequence} of stream {:#010X}",
                    self.serial
                );
                self.discarding = true;
            }
            (false, true) => {
                log_or_err!(
                    self,
                    Warn,
                    StreamError::LostContinuation {
                        serial: self.serial,
                        sequence,
                    },
                );
                self.drop_partial();
            }
            (false, false) => self.discarding = false,
        }

        let body = page.body();
        let lacing = page.segment_table();
        let last_complete = lacing.iter().rposition(|&l| l < 255);

        let mut offset = 0usize;
        for (i, &l) in lacing.iter().enumerate() {
            let segment = &body[offset..offset + l as usize];
            offset += l as usize;

            if self.discarding {
                if l < 255 {
                    self.discarding = false;
                }
                continue;
            }

            self.segments.push(segment.to_vec());
            self.pending_len += segment.len();

            if l < 255 {
                let data = if self.segments.len() == 1 {
                    self.segments.pop().unwrap()
                } else {
                    let mut data = Vec::with_capacity(self.pending_len);
                    for part in self.segments.drain(..) {
                        data.extend_from_slice(&part);
                    }
                    data
                };
                self.pending_len = 0;

                let ends_page = last_complete == Some(i);
                self.packets.push_back(Packet {
                    data,
                    granule_position: if ends_page {
                        page.granule_position()
                    } else {
                        GRANULE_NONE
                    },
                    packetno: self.packetno,
                    bos: page.is_bos() && !self.saw_packet,
                    eos: page.is_eos() && ends_page,
                });
                self.packetno += 1;
                self.saw_packet = true;
            }
        }

        if let Some(&last) = lacing.last() {
            self.expecting_continuation = !self.discarding && last == 255;
        }

        if page.is_eos() && (self.expecting_continuation || !self.segments.is_empty()) {
            log_or_err!(
                self,
                Warn,
                StreamError::DanglingPacket {
                    serial: self.serial,
                    pending: self.pending_len,
                },
            );
            self.drop_partial();
        }

        Ok(())
    }

    /// Returns the next completed packet, if any.
    pub fn packetout(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    /// Clears all reassembly state; used after a seek.
    pub fn reset(&mut self) {
        self.drop_partial();
        self.next_sequence = None;
        self.packetno = 0;
        self.saw_packet = false;
        self.packets.clear();
    }

    fn drop_partial(&mut self) {
        self.segments.clear();
        self.pending_len = 0;
        self.expecting_continuation = false;
        self.discarding = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::page::{Page, FLAG_BOS, FLAG_CONTINUED, FLAG_EOS};

    const SERIAL: u32 = 0x0DDF00D;

    fn feed(reader: &mut StreamReader, page: &Page) {
        reader.pagein(page.view()).unwrap();
    }

    #[test]
    fn two_packets_on_one_page() {
        let mut body = vec![1u8; 10];
        body.extend_from_slice(&[2u8; 20]);
        let page = Page::build(FLAG_BOS, 160, SERIAL, 0, &[10, 20], &body);

        let mut reader = StreamReader::new(SERIAL);
        feed(&mut reader, &page);

        let first = reader.packetout().unwrap();
        assert_eq!(first.data, vec![1u8; 10]);
        assert_eq!(first.packetno, 0);
        assert!(first.bos);
        assert!(!first.eos);
        assert_eq!(first.granule_position, GRANULE_NONE);

        let second = reader.packetout().unwrap();
        assert_eq!(second.data, vec![2u8; 20]);
        assert_eq!(second.packetno, 1);
        assert!(!second.bos);
        assert_eq!(second.granule_position, 160);

        assert!(reader.packetout().is_none());
    }

    #[test]
    fn packet_spans_two_pages() {
        let head = Page::build(FLAG_BOS, GRANULE_NONE, SERIAL, 0, &[255], &[9u8; 255]);
        let tail = Page::build(FLAG_CONTINUED, 300, SERIAL, 1, &[45], &[9u8; 45]);

        let mut reader = StreamReader::new(SERIAL);
        feed(&mut reader, &head);
        assert!(reader.packetout().is_none());

        feed(&mut reader, &tail);
        let packet = reader.packetout().unwrap();
        assert_eq!(packet.data, vec![9u8; 300]);
        assert_eq!(packet.granule_position, 300);
        assert!(packet.bos);
    }

    #[test]
    fn empty_segment_completes_empty_packet() {
        let page = Page::build(FLAG_EOS, 500, SERIAL, 0, &[0], &[]);

        let mut reader = StreamReader::new(SERIAL);
        feed(&mut reader, &page);

        let packet = reader.packetout().unwrap();
        assert!(packet.is_empty());
        assert!(packet.eos);
        assert_eq!(packet.granule_position, 500);
    }

    #[test]
    fn sequence_gap_drops_packet_in_progress() {
        let head = Page::build(FLAG_BOS, GRANULE_NONE, SERIAL, 0, &[255], &[1u8; 255]);
        // Page 1 is lost; page 2 starts a fresh packet.
        let fresh = Page::build(0, 700, SERIAL, 2, &[30], &[2u8; 30]);

        let mut reader = StreamReader::new(SERIAL);
        feed(&mut reader, &head);
        feed(&mut reader, &fresh);

        let packet = reader.packetout().unwrap();
        assert_eq!(packet.data, vec![2u8; 30]);
        // A packet that never completed does not consume a sequence number.
        assert_eq!(packet.packetno, 0);
        assert!(reader.packetout().is_none());
    }

    #[test]
    fn strict_mode_surfaces_gaps() {
        let first = Page::build(FLAG_BOS, 100, SERIAL, 0, &[10], &[0u8; 10]);
        let skipped_to = Page::build(0, 300, SERIAL, 5, &[10], &[0u8; 10]);

        let mut reader = StreamReader::new(SERIAL);
        reader.set_fail_level(log::Level::Warn);
        feed(&mut reader, &first);
        assert!(reader.pagein(skipped_to.view()).is_err());
    }

    #[test]
    fn foreign_serial_is_rejected() {
        let page = Page::build(FLAG_BOS, 0, SERIAL + 1, 0, &[1], &[0]);
        let mut reader = StreamReader::new(SERIAL);
        assert!(reader.pagein(page.view()).is_err());
    }

    #[test]
    fn continued_tail_after_seek_is_discarded() {
        // Landing mid-stream: the first page we see continues a packet
        // whose head is behind us, then holds a complete packet.
        let mut body = vec![5u8; 80];
        body.extend_from_slice(&[6u8; 40]);
        let page = Page::build(FLAG_CONTINUED, 900, SERIAL, 17, &[80, 40], &body);

        let mut reader = StreamReader::new(SERIAL);
        feed(&mut reader, &page);

        let packet = reader.packetout().unwrap();
        assert_eq!(packet.data, vec![6u8; 40]);
        assert_eq!(packet.granule_position, 900);
        assert!(reader.packetout().is_none());
    }

    #[test]
    fn discard_spans_pages_of_255s() {
        // A foreign tail that itself spans a further page boundary.
        let first = Page::build(FLAG_CONTINUED, GRANULE_NONE, SERIAL, 40, &[255], &[7u8; 255]);
        let mut body = vec![7u8; 100];
        body.extend_from_slice(&[8u8; 25]);
        let second = Page::build(FLAG_CONTINUED, 950, SERIAL, 41, &[100, 25], &body);

        let mut reader = StreamReader::new(SERIAL);
        feed(&mut reader, &first);
        assert!(reader.packetout().is_none());

        feed(&mut reader, &second);
        let packet = reader.packetout().unwrap();
        assert_eq!(packet.data, vec![8u8; 25]);
    }

    #[test]
    fn missing_continued_flag_drops_partial() {
        let head = Page::build(FLAG_BOS, GRANULE_NONE, SERIAL, 0, &[255], &[1u8; 255]);
        // Sequence is intact but the continued flag is missing: the packet
        // in progress is unrecoverable.
        let fresh = Page::build(0, 800, SERIAL, 1, &[12], &[2u8; 12]);

        let mut reader = StreamReader::new(SERIAL);
        feed(&mut reader, &head);
        feed(&mut reader, &fresh);

        let packet = reader.packetout().unwrap();
        assert_eq!(packet.data, vec![2u8; 12]);
        assert_eq!(packet.packetno, 0);
        assert!(reader.packetout().is_none());

        // Strict mode turns the same anomaly into an error.
        let mut reader = StreamReader::new(SERIAL);
        reader.set_fail_level(log::Level::Warn);
        feed(&mut reader, &head);
        assert!(reader.pagein(fresh.view()).is_err());
    }

    #[test]
    fn eos_drops_dangling_partial() {
        let page = Page::build(FLAG_BOS | FLAG_EOS, GRANULE_NONE, SERIAL, 0, &[255], &[3u8; 255]);

        let mut reader = StreamReader::new(SERIAL);
        feed(&mut reader, &page);
        assert!(reader.packetout().is_none());

        // State is clean for a reset/reuse.
        reader.reset();
        assert_eq!(reader.queued_packets(), 0);
    }

    #[test]
    fn reset_restarts_numbering() {
        let page = Page::build(FLAG_BOS, 100, SERIAL, 0, &[10], &[1u8; 10]);

        let mut reader = StreamReader::new(SERIAL);
        feed(&mut reader, &page);
        assert_eq!(reader.packetout().unwrap().packetno, 0);

        reader.reset();
        feed(&mut reader, &page);
        let packet = reader.packetout().unwrap();
        assert_eq!(packet.packetno, 0);
        assert!(packet.bos);
    }
}
