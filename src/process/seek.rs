//! Granule-position seeking.
//!
//! Random access works in two moves: [`Decoder::seek_to_granule`] bisects
//! the physical stream by byte position, probing page granules, until it
//! has pinned the last position whose next usable page still precedes the
//! target; [`Decoder::sync_to_granule`] then reads forward to the first
//! page that states a granule, giving the caller an exact position to
//! count samples from. Byte-level motions (`seek`, `skip`, `seek_start`,
//! `seek_end`) reset all decoding state, since buffered bytes belong to
//! the old position.
//!
//! All of this requires `R: Seek`; a non-seekable source simply has none
//! of these operations.

use std::io::{Read, Seek, SeekFrom};

use anyhow::{bail, Result};
use log::debug;

use crate::process::decode::{Decoder, StreamHandle};
use crate::structs::page::{Page, GRANULE_NONE, MAX_PAGE_SIZE};
use crate::utils::errors::DecodeError;

/// Window size below which bisection stops and forward reading takes over.
const LINEAR_CUTOFF: u64 = 4096;

impl<R: Read + Seek> Decoder<R> {
    /// Moves the byte source and resets all decoding state.
    ///
    /// Stream handles stay valid; parked pages, partial packets and the
    /// BOS prequeue are dropped, and packet numbering restarts.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let position = self.source.seek(pos)?;
        self.reset_streams();
        Ok(position)
    }

    /// Moves `offset` bytes relative to the current source position.
    pub fn skip(&mut self, offset: i64) -> Result<u64> {
        self.seek(SeekFrom::Current(offset))
    }

    /// Rewinds to the start of the physical stream.
    pub fn seek_start(&mut self) -> Result<u64> {
        self.seek(SeekFrom::Start(0))
    }

    /// Jumps to the end of the physical stream.
    pub fn seek_end(&mut self) -> Result<u64> {
        self.seek(SeekFrom::End(0))
    }

    /// Positions the source so that forward reading reaches the first
    /// packet of the handle's stream whose granule is at least `target`.
    ///
    /// Bisects by byte position: each probe resynchronises at `mid` and
    /// reads to the first page of this stream that states a granule. On
    /// return the next usable page precedes the target, so a
    /// [`sync_to_granule`](Self::sync_to_granule) gives the exact granule
    /// to count forward from.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::io::Cursor;
    /// use oggio::process::{decode::Decoder, encode::Encoder};
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let mut encoder = Encoder::new(Vec::new());
    /// let packets: Vec<(Vec<u8>, i64)> = (0..100i64)
    ///     .map(|i| (vec![0u8; 512], (i + 1) * 48))
    ///     .collect();
    /// encoder.write_stream(3, &packets)?;
    ///
    /// let mut decoder = Decoder::new(Cursor::new(encoder.finish()?))?;
    /// let handle = decoder.open(3)?;
    ///
    /// decoder.seek_to_granule(&handle, 2_400)?;
    /// let synced = decoder.sync_to_granule(&handle)?.expect("granule ahead");
    /// assert!(synced <= 2_400);
    /// # Ok(())
    /// # }
    /// ```
    pub fn seek_to_granule(&mut self, handle: &StreamHandle, target: i64) -> Result<()> {
        let serial = handle.serial();
        let mut minpos = 0u64;
        let mut maxpos = self.source.seek(SeekFrom::End(0))?;

        while maxpos - minpos > LINEAR_CUTOFF {
            let mid = minpos + (maxpos - minpos) / 2;
            self.seek(SeekFrom::Start(mid))?;

            let mut probe = None;
            loop {
                if self.source.stream_position()? > maxpos {
                    break;
                }
                match self.read_page()? {
                    None => break,
                    Some(page)
                        if page.serial() == serial
                            && page.granule_position() != GRANULE_NONE =>
                    {
                        probe = Some(page);
                        break;
                    }
                    Some(_) => {}
                }
            }

            match probe {
                None => maxpos = mid,
                Some(page) if page.granule_position() >= target => {
                    maxpos = mid.saturating_sub(1);
                }
                Some(_) => minpos = mid,
            }
        }

        debug!("granule bisection for stream {serial:#010X} settled at byte {minpos}");
        self.seek(SeekFrom::Start(minpos))?;
        Ok(())
    }

    /// Reads forward until the handle's stream states a granule position.
    ///
    /// Already-queued packets are drained first; ones without a granule are
    /// consumed in the process. Otherwise pages are read and folded into
    /// the stream until one carries a granule, whose value is returned; the
    /// packets it completed stay readable. `Ok(None)` at end of stream.
    pub fn sync_to_granule(&mut self, handle: &StreamHandle) -> Result<Option<i64>> {
        let serial = handle.serial();

        loop {
            let Some(slot) = self.streams.get_mut(&serial) else {
                bail!(DecodeError::UnknownSerial(serial));
            };
            match slot.reader.packetout() {
                Some(packet) if packet.has_granule() => {
                    return Ok(Some(packet.granule_position));
                }
                Some(_) => continue,
                None => break,
            }
        }

        loop {
            let Some(page) = self.read_page_serial(serial)? else {
                return Ok(None);
            };
            let granule = page.granule_position();

            let Some(slot) = self.streams.get_mut(&serial) else {
                bail!(DecodeError::UnknownSerial(serial));
            };
            slot.reader.pagein(page.view())?;

            if granule != GRANULE_NONE {
                return Ok(Some(granule));
            }
        }
    }

    /// Scans the tail of the physical stream for its final page.
    ///
    /// Reads the last [`MAX_PAGE_SIZE`] bytes; useful for discovering the
    /// end granule of a stream without decoding it. Leaves the decoder at
    /// end of stream; seek before reading on.
    pub fn last_page(&mut self) -> Result<Option<Page>> {
        let end = self.source.seek(SeekFrom::End(0))?;
        let start = end.saturating_sub(MAX_PAGE_SIZE as u64);
        self.seek(SeekFrom::Start(start))?;

        let mut last = None;
        while let Some(page) = self.read_page()? {
            last = Some(page);
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::encode::Encoder;
    use crate::structs::packet::Packet;
    use rand::Rng;
    use std::io::Cursor;

    const SERIAL: u32 = 77;
    const SAMPLES_PER_PACKET: i64 = 100;
    const DATA_PACKETS: i64 = 200;

    /// A PCM-like stream: two header packets, then packets of 100 samples
    /// each, where global sample `j` (0-based) holds the value `j + 1` as
    /// a little-endian i64. A packet's final sample thus equals its
    /// granule position.
    fn pcm_stream() -> Vec<u8> {
        let mut packets: Vec<(Vec<u8>, i64)> =
            vec![(vec![0x55; 30], 0), (vec![0x66; 40], 0)];
        for k in 0..DATA_PACKETS {
            let mut data = Vec::with_capacity(SAMPLES_PER_PACKET as usize * 8);
            for j in 0..SAMPLES_PER_PACKET {
                let sample = k * SAMPLES_PER_PACKET + j + 1;
                data.extend_from_slice(&sample.to_le_bytes());
            }
            packets.push((data, (k + 1) * SAMPLES_PER_PACKET));
        }

        let mut encoder = Encoder::new(Vec::new());
        encoder.write_stream(SERIAL, &packets).unwrap();
        encoder.finish().unwrap()
    }

    /// Reads forward from a fresh sync point until the packet containing
    /// sample `target` is in hand, and extracts that exact sample.
    fn sample_at(decoder: &mut Decoder<Cursor<Vec<u8>>>, handle: &StreamHandle, target: i64) -> i64 {
        let mut pending: Vec<Packet> = Vec::new();
        let anchor = loop {
            let packet = decoder
                .read_packet(handle)
                .unwrap()
                .expect("target lies within the stream");
            let granule = packet.granule_position;
            pending.push(packet);
            match granule {
                GRANULE_NONE => {}
                g if g >= target => break g,
                // Everything pending ends at or before this granule,
                // strictly before the target.
                _ => pending.clear(),
            }
        };

        // Packets in `pending` end at anchor, anchor - 100, .. counting
        // back from the end of the list.
        let target_end = (target + SAMPLES_PER_PACKET - 1) / SAMPLES_PER_PACKET * SAMPLES_PER_PACKET;
        let back = ((anchor - target_end) / SAMPLES_PER_PACKET) as usize;
        let packet = &pending[pending.len() - 1 - back];
        let offset_from_end = (target_end - target) as usize;
        let index = SAMPLES_PER_PACKET as usize - 1 - offset_from_end;
        i64::from_le_bytes(packet.data[index * 8..index * 8 + 8].try_into().unwrap())
    }

    #[test]
    fn random_targets_land_exactly() {
        let bytes = pcm_stream();
        let mut decoder = Decoder::new(Cursor::new(bytes)).unwrap();
        let handle = decoder.open(SERIAL).unwrap();

        let max_granule = DATA_PACKETS * SAMPLES_PER_PACKET;
        let mut rng = rand::rng();
        for _ in 0..50 {
            let target = rng.random_range(1..=max_granule);
            decoder.seek_to_granule(&handle, target).unwrap();
            let synced = decoder
                .sync_to_granule(&handle)
                .unwrap()
                .expect("stream has granuled pages past every bisection point");
            assert!(synced <= max_granule);

            assert_eq!(sample_at(&mut decoder, &handle, target), target);
        }
    }

    #[test]
    fn bisection_precedes_the_target() {
        let bytes = pcm_stream();
        let mut decoder = Decoder::new(Cursor::new(bytes)).unwrap();
        let handle = decoder.open(SERIAL).unwrap();

        for target in [5_000, 12_345, 19_999] {
            decoder.seek_to_granule(&handle, target).unwrap();
            let synced = decoder.sync_to_granule(&handle).unwrap().unwrap();
            assert!(
                synced < target,
                "sync point {synced} must precede target {target}"
            );
        }
    }

    #[test]
    fn seek_start_replays_from_the_top() {
        let bytes = pcm_stream();
        let mut decoder = Decoder::new(Cursor::new(bytes)).unwrap();
        let handle = decoder.open(SERIAL).unwrap();

        // Consume a while, rewind, and expect numbering to restart.
        for _ in 0..20 {
            decoder.read_packet(&handle).unwrap().unwrap();
        }
        decoder.seek_start().unwrap();

        let packet = decoder.read_packet(&handle).unwrap().unwrap();
        assert_eq!(packet.packetno, 0);
        assert_eq!(packet.data, vec![0x55; 30]);
    }

    #[test]
    fn last_page_reports_the_end_granule() {
        let bytes = pcm_stream();
        let mut decoder = Decoder::new(Cursor::new(bytes)).unwrap();

        let last = decoder.last_page().unwrap().expect("stream has pages");
        assert!(last.is_eos());
        assert_eq!(last.serial(), SERIAL);
        assert_eq!(last.granule_position(), DATA_PACKETS * SAMPLES_PER_PACKET);
    }

    #[test]
    fn sync_returns_none_at_end_of_stream() {
        let bytes = pcm_stream();
        let mut decoder = Decoder::new(Cursor::new(bytes)).unwrap();
        let handle = decoder.open(SERIAL).unwrap();

        decoder.seek_end().unwrap();
        assert!(decoder.sync_to_granule(&handle).unwrap().is_none());
    }

    #[test]
    fn sync_after_plain_byte_seek() {
        let bytes = pcm_stream();
        let len = bytes.len() as u64;
        let mut decoder = Decoder::new(Cursor::new(bytes)).unwrap();
        let handle = decoder.open(SERIAL).unwrap();

        decoder.seek(SeekFrom::Start(len / 2)).unwrap();
        let synced = decoder.sync_to_granule(&handle).unwrap().unwrap();
        assert!(synced > 0 && synced <= DATA_PACKETS * SAMPLES_PER_PACKET);

        // The packets made readable by the sync end exactly at the
        // reported granule, and forward reading steps on from there.
        let first_granuled = loop {
            let packet = decoder.read_packet(&handle).unwrap().unwrap();
            if packet.has_granule() {
                break packet.granule_position;
            }
        };
        assert_eq!(first_granuled, synced);

        let mut current = synced;
        for _ in 0..20 {
            let packet = decoder.read_packet(&handle).unwrap().unwrap();
            current += SAMPLES_PER_PACKET;
            if packet.has_granule() {
                assert_eq!(packet.granule_position, current);
            }
        }
    }
}
