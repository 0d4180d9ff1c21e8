//! Per-stream page emission (encode side).
//!
//! A [`StreamWriter`] accepts the packets of one logical stream and packs
//! them into pages: packets are laced into runs of 255-byte segments, a
//! page goes out once a reasonable amount of data is pending (or on
//! [`flush`](StreamWriter::flush)), and the BOS/EOS/continued flags,
//! granule position, sequence number and CRC are filled in on the way out.

use anyhow::{bail, Result};

use crate::structs::page::{Page, FLAG_BOS, FLAG_CONTINUED, FLAG_EOS, GRANULE_NONE, MAX_SEGMENTS};
use crate::utils::errors::EncodeError;

/// Pending body size that makes [`StreamWriter::pageout`] emit a page.
const BODY_FILL_TARGET: usize = 4096;

/// Packs the packets of one logical stream into pages.
///
/// # Example
///
/// ```rust
/// use oggio::process::mux::StreamWriter;
///
/// let mut writer = StreamWriter::new(0xBEEF);
/// writer.packetin(b"ident header", 0, false)?;
///
/// let bos = writer.flush().expect("a pending page");
/// assert!(bos.is_bos());
/// assert_eq!(bos.body(), b"ident header");
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct StreamWriter {
    serial: u32,
    body: Vec<u8>,
    lacing: Vec<u8>,
    /// Parallel to `lacing`: `Some(granule)` on a packet's final segment.
    granule_marks: Vec<Option<i64>>,
    sequence: u32,
    bos_written: bool,
    eos_pending: bool,
    /// The previously emitted page ended mid-packet, so the next page
    /// carries the continued flag.
    carry_continued: bool,
    last_granule: i64,
}

impl StreamWriter {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            body: Vec::new(),
            lacing: Vec::new(),
            granule_marks: Vec::new(),
            sequence: 0,
            bos_written: false,
            eos_pending: false,
            carry_continued: false,
            last_granule: GRANULE_NONE,
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Granule position of the most recently emitted page that closed a
    /// packet, [`GRANULE_NONE`] before any such page.
    pub fn last_granule(&self) -> i64 {
        self.last_granule
    }

    /// Queues one packet for lacing.
    ///
    /// `granule_position` is the codec's position after this packet; pass
    /// `last = true` on the final packet of the stream, after which no
    /// further packets are accepted.
    pub fn packetin(&mut self, data: &[u8], granule_position: i64, last: bool) -> Result<()> {
        if self.eos_pending {
            bail!(EncodeError::StreamFinished(self.serial));
        }

        let full = data.len() / 255;
        for _ in 0..full {
            self.lacing.push(255);
            self.granule_marks.push(None);
        }
        self.lacing.push((data.len() % 255) as u8);
        self.granule_marks.push(Some(granule_position));
        self.body.extend_from_slice(data);

        if last {
            self.eos_pending = true;
        }

        Ok(())
    }

    /// Emits a page if enough data is pending.
    ///
    /// Pages go out when the pending body reaches 4 KiB, the lacing table
    /// is full, the stream's final packet is in, or the first page has not
    /// been written yet (the BOS page never waits). Returns `None` below
    /// those thresholds; drain in a loop until it does.
    pub fn pageout(&mut self) -> Option<Page> {
        let trigger = !self.lacing.is_empty()
            && (self.eos_pending
                || !self.bos_written
                || self.body.len() >= BODY_FILL_TARGET
                || self.lacing.len() >= MAX_SEGMENTS);

        if trigger {
            Some(self.emit_page())
        } else {
            None
        }
    }

    /// Emits whatever is pending regardless of thresholds.
    ///
    /// A single call produces at most one page (the lacing table caps at
    /// 255 segments); call until `None` to drain completely.
    pub fn flush(&mut self) -> Option<Page> {
        if self.lacing.is_empty() {
            None
        } else {
            Some(self.emit_page())
        }
    }

    fn emit_page(&mut self) -> Page {
        let count = self.lacing.len().min(MAX_SEGMENTS);
        let body_len: usize = self.lacing[..count].iter().map(|&l| l as usize).sum();

        let granule = self.granule_marks[..count]
            .iter()
            .rev()
            .find_map(|&mark| mark)
            .unwrap_or(GRANULE_NONE);

        let mut flags = 0;
        if self.carry_continued {
            flags |= FLAG_CONTINUED;
        }
        if !self.bos_written {
            flags |= FLAG_BOS;
        }
        if self.eos_pending && count == self.lacing.len() {
            flags |= FLAG_EOS;
        }

        let page = Page::build(
            flags,
            granule,
            self.serial,
            self.sequence,
            &self.lacing[..count],
            &self.body[..body_len],
        );

        self.sequence += 1;
        self.bos_written = true;
        self.carry_continued = self.lacing[count - 1] == 255;
        self.lacing.drain(..count);
        self.granule_marks.drain(..count);
        self.body.drain(..body_len);
        if granule != GRANULE_NONE {
            self.last_granule = granule;
        }

        page
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::demux::StreamReader;

    const SERIAL: u32 = 0xFEED;

    #[test]
    fn first_page_goes_out_immediately() {
        let mut writer = StreamWriter::new(SERIAL);
        writer.packetin(&[1u8; 30], 0, false).unwrap();

        let page = writer.pageout().expect("BOS page should not wait");
        assert!(page.is_bos());
        assert_eq!(page.sequence_number(), 0);
        assert_eq!(page.granule_position(), 0);
        assert_eq!(page.body().len(), 30);
        assert!(writer.pageout().is_none());
    }

    #[test]
    fn data_accumulates_until_the_fill_target() {
        let mut writer = StreamWriter::new(SERIAL);
        writer.packetin(&[0u8; 10], 0, false).unwrap();
        let _bos = writer.pageout().unwrap();

        writer.packetin(&[1u8; 1000], 100, false).unwrap();
        assert!(writer.pageout().is_none());
        writer.packetin(&[2u8; 1000], 200, false).unwrap();
        writer.packetin(&[3u8; 1000], 300, false).unwrap();
        assert!(writer.pageout().is_none());
        writer.packetin(&[4u8; 1100], 400, false).unwrap();

        let page = writer.pageout().expect("4 KiB pending");
        assert_eq!(page.granule_position(), 400);
        assert_eq!(page.packet_count(), 4);
        assert!(writer.pageout().is_none());
    }

    #[test]
    fn flush_ignores_thresholds() {
        let mut writer = StreamWriter::new(SERIAL);
        writer.packetin(&[1u8; 10], 0, false).unwrap();
        let _bos = writer.pageout().unwrap();

        writer.packetin(&[2u8; 10], 50, false).unwrap();
        assert!(writer.pageout().is_none());

        let page = writer.flush().unwrap();
        assert_eq!(page.body().len(), 10);
        assert_eq!(page.sequence_number(), 1);
        assert!(writer.flush().is_none());
    }

    #[test]
    fn large_packet_spans_pages() {
        let data = vec![0xC3u8; 70_000];
        let mut writer = StreamWriter::new(SERIAL);
        writer.packetin(&data, 4242, true).unwrap();

        let first = writer.pageout().unwrap();
        assert_eq!(first.segment_table().len(), MAX_SEGMENTS);
        assert!(first.segment_table().iter().all(|&l| l == 255));
        assert_eq!(first.granule_position(), GRANULE_NONE);
        assert!(first.is_bos());
        assert!(!first.is_eos());

        let second = writer.pageout().unwrap();
        assert!(second.is_continued());
        assert!(second.is_eos());
        assert_eq!(second.granule_position(), 4242);
        assert!(writer.pageout().is_none());

        assert_eq!(
            first.body().len() + second.body().len(),
            data.len(),
        );
    }

    #[test]
    fn three_page_packet_keeps_the_middle_continued() {
        // 150 KB spans three pages; the middle one both continues a packet
        // and leaves it unfinished.
        let data = vec![0x5Au8; 150_000];
        let mut writer = StreamWriter::new(SERIAL);
        writer.packetin(&data, 7777, true).unwrap();

        let first = writer.pageout().unwrap();
        let middle = writer.pageout().unwrap();
        let last = writer.pageout().unwrap();
        assert!(writer.pageout().is_none());

        assert!(!first.is_continued());
        assert!(middle.is_continued());
        assert!(middle.segment_table().iter().all(|&l| l == 255));
        assert_eq!(middle.granule_position(), GRANULE_NONE);
        assert!(last.is_continued());
        assert!(last.is_eos());
        assert_eq!(last.granule_position(), 7777);

        assert_eq!(
            first.body().len() + middle.body().len() + last.body().len(),
            data.len(),
        );

        let mut reader = StreamReader::new(SERIAL);
        for page in [&first, &middle, &last] {
            reader.pagein(page.view()).unwrap();
        }
        assert_eq!(reader.packetout().unwrap().data, data);
    }

    #[test]
    fn eos_page_closes_the_stream() {
        let mut writer = StreamWriter::new(SERIAL);
        writer.packetin(&[1u8; 10], 0, false).unwrap();
        let _bos = writer.pageout().unwrap();

        writer.packetin(&[2u8; 10], 99, true).unwrap();
        let page = writer.pageout().expect("final packet forces a page");
        assert!(page.is_eos());
        assert_eq!(writer.last_granule(), 99);

        assert!(writer.packetin(&[3u8; 10], 120, false).is_err());
    }

    #[test]
    fn exactly_255_bytes_needs_a_terminator() {
        let mut writer = StreamWriter::new(SERIAL);
        writer.packetin(&[5u8; 255], 10, true).unwrap();

        let page = writer.pageout().unwrap();
        assert_eq!(page.segment_table(), &[255, 0]);
        assert_eq!(page.packet_count(), 1);
    }

    #[test]
    fn emitted_pages_reassemble_to_the_source_packets() {
        let packets: Vec<(Vec<u8>, i64)> = vec![
            (vec![1u8; 40], 0),
            (vec![2u8; 600], 20),
            (vec![3u8; 5000], 40),
            (Vec::new(), 60),
            (vec![4u8; 255], 80),
        ];

        let mut writer = StreamWriter::new(SERIAL);
        let mut pages = Vec::new();
        for (i, (data, granule)) in packets.iter().enumerate() {
            writer
                .packetin(data, *granule, i == packets.len() - 1)
                .unwrap();
            while let Some(page) = writer.pageout() {
                pages.push(page);
            }
        }
        while let Some(page) = writer.flush() {
            pages.push(page);
        }

        let mut reader = StreamReader::new(SERIAL);
        let mut decoded = Vec::new();
        for page in &pages {
            reader.pagein(page.view()).unwrap();
            while let Some(packet) = reader.packetout() {
                decoded.push(packet);
            }
        }

        assert_eq!(decoded.len(), packets.len());
        for (i, packet) in decoded.iter().enumerate() {
            assert_eq!(packet.data, packets[i].0);
            assert_eq!(packet.packetno, i as u64);
        }
        assert!(decoded[0].bos);
        assert!(decoded.last().unwrap().eos);

        for (i, page) in pages.iter().enumerate() {
            assert_eq!(page.sequence_number(), i as u32);
        }
    }
}
