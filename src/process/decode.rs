//! Physical stream decoding.
//!
//! A [`Decoder`] owns the byte source and everything between it and the
//! caller: the sync reader, the BOS discovery prequeue, and one slot per
//! known logical stream holding its page FIFO and packet reassembly state.
//! Pages encountered while the caller drains a different stream are parked
//! in their owner's FIFO, so interleaved consumers never lose data; pages
//! of streams nobody opened are dropped.
//!
//! Logical streams are addressed through [`StreamHandle`] values returned
//! by [`Decoder::open`]. A handle is a lightweight token: all state lives
//! in the decoder, and closing consumes the handle.

use std::collections::{BTreeMap, VecDeque};
use std::io::Read;

use anyhow::{bail, Result};
use log::{debug, trace};

use crate::process::demux::StreamReader;
use crate::process::sync::{PageOut, SyncReader};
use crate::structs::packet::Packet;
use crate::structs::page::{Page, PageRef};
use crate::utils::errors::DecodeError;

/// Bytes pulled from the source per refill of the sync reservoir.
pub(crate) const READ_CHUNK: usize = 4096;

/// Token for one opened logical stream.
///
/// Obtained from [`Decoder::open`]; passing it back to the decoder selects
/// the stream to read. [`Decoder::close`] consumes it.
#[derive(Debug)]
pub struct StreamHandle {
    serial: u32,
}

impl StreamHandle {
    pub fn serial(&self) -> u32 {
        self.serial
    }
}

#[derive(Debug)]
pub(crate) struct StreamSlot {
    pub(crate) reader: StreamReader,
    pub(crate) queue: VecDeque<Page>,
    pub(crate) open: bool,
}

impl StreamSlot {
    fn new(serial: u32, fail_level: log::Level) -> Self {
        let mut reader = StreamReader::new(serial);
        reader.set_fail_level(fail_level);
        Self {
            reader,
            queue: VecDeque::new(),
            open: false,
        }
    }
}

/// Demultiplexing decoder over a byte source.
///
/// Construction scans the BOS preamble of the first link, so the contained
/// logical streams are known up front via [`serials`](Self::serials). Pass
/// `&mut source` instead of `source` to borrow the byte source rather than
/// own it.
///
/// # Example
///
/// ```rust
/// use std::io::Cursor;
/// use oggio::process::{decode::Decoder, encode::Encoder};
///
/// # fn main() -> anyhow::Result<()> {
/// let mut encoder = Encoder::new(Vec::new());
/// encoder.write_stream(42, &[
///     (b"header".to_vec(), 0),
///     (b"payload".to_vec(), 480),
/// ])?;
///
/// let mut decoder = Decoder::new(Cursor::new(encoder.finish()?))?;
/// assert_eq!(decoder.serials().collect::<Vec<_>>(), vec![42]);
///
/// let handle = decoder.open(42)?;
/// let first = decoder.read_packet(&handle)?.expect("stream has packets");
/// assert_eq!(first.data, b"header");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Decoder<R> {
    pub(crate) source: R,
    pub(crate) sync: SyncReader,
    pub(crate) prequeue: VecDeque<Page>,
    pub(crate) streams: BTreeMap<u32, StreamSlot>,
    /// Parking spot for the page a zero-copy read popped off the prequeue;
    /// the returned view borrows it.
    current: Option<Page>,
    fail_level: log::Level,
}

impl<R: Read> Decoder<R> {
    /// Wraps a byte source and discovers the link's logical streams.
    ///
    /// Reads pages up to and including the first non-BOS page; everything
    /// read here is buffered, nothing is lost.
    pub fn new(source: R) -> Result<Self> {
        let mut decoder = Self {
            source,
            sync: SyncReader::new(),
            prequeue: VecDeque::new(),
            streams: BTreeMap::new(),
            current: None,
            fail_level: log::Level::Error,
        };
        decoder.discover_preamble()?;
        Ok(decoder)
    }

    /// Serials of the logical streams in the current link, ascending.
    pub fn serials(&self) -> impl Iterator<Item = u32> + '_ {
        self.streams.keys().copied()
    }

    /// Sets the failure level for reassembly anomalies on all streams.
    ///
    /// - `log::Level::Error`: log page gaps and continue (default)
    /// - `log::Level::Warn`: fail on any gap or lost continuation
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
        for slot in self.streams.values_mut() {
            slot.reader.set_fail_level(level);
        }
    }

    /// Opens a logical stream for packet reading.
    ///
    /// Only open streams accumulate parked pages; a stream left closed
    /// while another is drained loses its data silently. Opening twice is
    /// an error.
    pub fn open(&mut self, serial: u32) -> Result<StreamHandle> {
        let fail_level = self.fail_level;
        let Some(slot) = self.streams.get_mut(&serial) else {
            bail!(DecodeError::UnknownSerial(serial));
        };
        if slot.open {
            bail!(DecodeError::AlreadyOpen(serial));
        }
        slot.open = true;
        slot.reader.reset();
        slot.reader.set_fail_level(fail_level);
        slot.queue.clear();

        Ok(StreamHandle { serial })
    }

    /// Closes a logical stream, dropping its parked pages and partial state.
    pub fn close(&mut self, handle: StreamHandle) {
        if let Some(slot) = self.streams.get_mut(&handle.serial) {
            slot.open = false;
            slot.reader.reset();
            slot.queue.clear();
        }
    }

    /// Returns the next page of the physical stream, any serial.
    ///
    /// `Ok(None)` means the source is exhausted; a page truncated by EOF is
    /// dropped silently.
    pub fn read_page(&mut self) -> Result<Option<Page>> {
        if let Some(page) = self.prequeue.pop_front() {
            return Ok(Some(page));
        }
        self.fetch_page()
    }

    /// Returns a zero-copy view of the next page of the physical stream.
    ///
    /// The borrowed flavour of [`read_page`](Self::read_page): nothing is
    /// copied out of the decoder's buffers, and the view is valid only
    /// until the next decoder operation, which the borrow checker
    /// enforces. Keep a page past that with [`PageRef::to_owned`].
    ///
    /// Serial-filtered and packet reads have no borrowed flavour: pages
    /// parked for other streams and packets spanning pages must outlive
    /// the call that produced them.
    pub fn read_page_ref(&mut self) -> Result<Option<PageRef<'_>>> {
        if let Some(page) = self.prequeue.pop_front() {
            return Ok(Some(self.current.insert(page).view()));
        }

        loop {
            if self.sync.page_ready() {
                break;
            }
            let buf = self.sync.reserve(READ_CHUNK);
            let n = self.source.read(buf)?;
            if n == 0 {
                return Ok(None);
            }
            self.sync.wrote(n);
        }

        match self.sync.pageout() {
            PageOut::Page(page) => Ok(Some(page)),
            // page_ready guaranteed a buffered page.
            _ => Ok(None),
        }
    }

    /// Returns the next page belonging to the handle's stream.
    ///
    /// Pages of other open streams encountered on the way are parked in
    /// their FIFOs; pages of unopened streams are dropped.
    pub fn read_page_for(&mut self, handle: &StreamHandle) -> Result<Option<Page>> {
        self.read_page_serial(handle.serial)
    }

    /// Returns the next packet of the handle's stream.
    pub fn read_packet(&mut self, handle: &StreamHandle) -> Result<Option<Packet>> {
        self.read_packet_serial(handle.serial)
    }

    /// Lazy iterator over all remaining pages of the physical stream.
    ///
    /// Single-pass: each step consumes decoder state. Not restartable
    /// without a seek.
    pub fn pages(&mut self) -> Pages<'_, R> {
        Pages { decoder: self }
    }

    /// Lazy iterator over the remaining pages of one stream.
    pub fn pages_for<'d>(&'d mut self, handle: &StreamHandle) -> StreamPages<'d, R> {
        StreamPages {
            decoder: self,
            serial: handle.serial,
        }
    }

    /// Lazy iterator over the remaining packets of one stream.
    pub fn packets<'d>(&'d mut self, handle: &StreamHandle) -> Packets<'d, R> {
        Packets {
            decoder: self,
            serial: handle.serial,
        }
    }

    /// Advances to the next chained link, re-running BOS discovery.
    ///
    /// Call once every opened stream has delivered its EOS packet; pages of
    /// the finished link still in flight are discarded. Returns `Ok(false)`
    /// when only EOF remains. All handles of the previous link are dead
    /// afterwards.
    pub fn next_link(&mut self) -> Result<bool> {
        self.streams.clear();
        self.prequeue.clear();

        let first_bos = loop {
            match self.fetch_page()? {
                None => return Ok(false),
                Some(page) if page.is_bos() => break page,
                Some(page) => {
                    debug!(
                        "discarding page of stream {:#010X} between links",
                        page.serial()
                    );
                }
            }
        };

        let serial = first_bos.serial();
        self.streams
            .insert(serial, StreamSlot::new(serial, self.fail_level));
        debug!("discovered logical stream {serial:#010X}");
        self.prequeue.push_back(first_bos);
        self.discover_preamble()
            .map(|()| true)
    }

    /// Returns the wrapped byte source, consuming the decoder.
    pub fn into_inner(self) -> R {
        self.source
    }

    /// Discards all buffered decoding state after the source moved.
    ///
    /// Open/closed status is preserved; reassembly state, parked pages and
    /// the BOS prequeue are not.
    pub(crate) fn reset_streams(&mut self) {
        self.sync.reset();
        self.prequeue.clear();
        self.current = None;
        for slot in self.streams.values_mut() {
            slot.reader.reset();
            slot.queue.clear();
        }
    }

    /// Reads pages until the first non-BOS page, registering every BOS
    /// serial. All pages read are kept in the prequeue.
    fn discover_preamble(&mut self) -> Result<()> {
        loop {
            let Some(page) = self.fetch_page()? else {
                return Ok(());
            };
            let bos = page.is_bos();
            if bos {
                let serial = page.serial();
                let fail_level = self.fail_level;
                self.streams
                    .entry(serial)
                    .or_insert_with(|| StreamSlot::new(serial, fail_level));
                debug!("discovered logical stream {serial:#010X}");
            }
            self.prequeue.push_back(page);
            if !bos {
                return Ok(());
            }
        }
    }

    /// Pulls the next page out of the sync reader, refilling from the
    /// source in [`READ_CHUNK`] slices as needed.
    pub(crate) fn fetch_page(&mut self) -> Result<Option<Page>> {
        loop {
            match self.sync.pageout() {
                PageOut::Page(page) => return Ok(Some(page.to_owned())),
                PageOut::Resync { .. } => continue,
                PageOut::NeedMore => {}
            }

            let buf = self.sync.reserve(READ_CHUNK);
            let n = self.source.read(buf)?;
            if n == 0 {
                return Ok(None);
            }
            self.sync.wrote(n);
        }
    }

    pub(crate) fn read_page_serial(&mut self, serial: u32) -> Result<Option<Page>> {
        if let Some(slot) = self.streams.get_mut(&serial) {
            if let Some(page) = slot.queue.pop_front() {
                return Ok(Some(page));
            }
        }

        loop {
            let Some(page) = self.read_page()? else {
                return Ok(None);
            };
            if page.serial() == serial {
                return Ok(Some(page));
            }
            match self.streams.get_mut(&page.serial()) {
                Some(slot) if slot.open => slot.queue.push_back(page),
                _ => trace!("dropping page of inactive stream {:#010X}", page.serial()),
            }
        }
    }

    pub(crate) fn read_packet_serial(&mut self, serial: u32) -> Result<Option<Packet>> {
        loop {
            {
                let Some(slot) = self.streams.get_mut(&serial) else {
                    bail!(DecodeError::UnknownSerial(serial));
                };
                if !slot.open {
                    bail!(DecodeError::NotOpen(serial));
                }
                if let Some(packet) = slot.reader.packetout() {
                    return Ok(Some(packet));
                }
            }

            let Some(page) = self.read_page_serial(serial)? else {
                return Ok(None);
            };
            match self.streams.get_mut(&serial) {
                Some(slot) => slot.reader.pagein(page.view())?,
                None => bail!(DecodeError::NotOpen(serial)),
            }
        }
    }
}

/// Iterator over every remaining page of the physical stream.
#[derive(Debug)]
pub struct Pages<'d, R> {
    decoder: &'d mut Decoder<R>,
}

impl<R: Read> Iterator for Pages<'_, R> {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.read_page().transpose()
    }
}

/// Iterator over the remaining pages of one logical stream.
#[derive(Debug)]
pub struct StreamPages<'d, R> {
    decoder: &'d mut Decoder<R>,
    serial: u32,
}

impl<R: Read> Iterator for StreamPages<'_, R> {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.read_page_serial(self.serial).transpose()
    }
}

/// Iterator over the remaining packets of one logical stream.
#[derive(Debug)]
pub struct Packets<'d, R> {
    decoder: &'d mut Decoder<R>,
    serial: u32,
}

impl<R: Read> Iterator for Packets<'_, R> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.read_packet_serial(self.serial).transpose()
    }
}
