//! Page synchronisation over a raw byte reservoir.
//!
//! [`SyncReader`] owns an expanding buffer that callers fill with arbitrary
//! slices of a physical stream; [`SyncReader::pageout`] locates capture
//! patterns, validates candidates (header sanity plus CRC) and hands out
//! verified page views. Corruption and mid-stream seek positions are
//! handled by scanning forward one byte at a time until the next verifiable
//! page; the skipped distance is reported once per junk run.

use log::{debug, log, warn};

use crate::structs::page::{PageRef, CAPTURE_PATTERN};
use crate::utils::errors::PageError;

/// Result of one [`SyncReader::pageout`] attempt.
#[derive(Debug)]
pub enum PageOut<'a> {
    /// A complete, checksum-verified page.
    Page(PageRef<'a>),
    /// The reservoir holds no complete page; feed more bytes.
    NeedMore,
    /// `skipped` bytes of junk were dropped while hunting for a page
    /// boundary. Call again for the page that follows, if any.
    Resync { skipped: usize },
}

/// Buffer-fed page scanner.
///
/// Bytes enter through [`reserve`](Self::reserve)/[`wrote`](Self::wrote)
/// (or the [`push_bytes`](Self::push_bytes) convenience) and leave as
/// [`PageRef`] views. A returned view borrows the reservoir: the borrow
/// checker keeps it alive only until the next mutating call.
///
/// # Example
///
/// ```rust
/// use oggio::process::sync::{PageOut, SyncReader};
/// use oggio::structs::page::{Page, FLAG_BOS};
///
/// let page = Page::build(FLAG_BOS, 0, 7, 0, &[3], b"abc");
///
/// let mut sync = SyncReader::new();
/// sync.push_bytes(page.as_bytes());
///
/// match sync.pageout() {
///     PageOut::Page(view) => assert_eq!(view.serial(), 7),
///     other => panic!("a whole page is buffered, got {other:?}"),
/// }
/// ```
#[derive(Debug)]
pub struct SyncReader {
    buf: Vec<u8>,
    /// Start of the unconsumed region.
    head: usize,
    /// End of the valid region.
    len: usize,
    /// Set after construction and every reset; junk encountered while
    /// unsynced is expected (seek landing zone) and logged quietly.
    unsynced: bool,
    /// Read position and length of a page already verified by a scan, so
    /// the next extraction skips the checksum pass. Stale entries are
    /// detected by the position check (compaction and consumption both
    /// move the read position).
    verified: Option<(usize, usize)>,
}

/// Outcome of one scan pass, without borrowing the reservoir.
enum Scan {
    Page { len: usize },
    NeedMore,
    Resync { skipped: usize },
}

impl Default for SyncReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncReader {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            head: 0,
            len: 0,
            unsynced: true,
            verified: None,
        }
    }

    /// Number of unconsumed bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.len - self.head
    }

    /// Makes `n` bytes writable at the tail and returns that region.
    ///
    /// Compacts the live region to the front or grows the backing storage
    /// as needed. Follow with [`wrote`](Self::wrote) once data has been
    /// copied in.
    pub fn reserve(&mut self, n: usize) -> &mut [u8] {
        if self.head == self.len {
            self.head = 0;
            self.len = 0;
        } else if self.head > 0 && self.len + n > self.buf.len() {
            self.buf.copy_within(self.head..self.len, 0);
            self.len -= self.head;
            self.head = 0;
        }
        if self.len + n > self.buf.len() {
            self.buf.resize(self.len + n, 0);
        }
        &mut self.buf[self.len..self.len + n]
    }

    /// Marks `n` bytes of the reserved region as filled.
    pub fn wrote(&mut self, n: usize) {
        assert!(self.len + n <= self.buf.len(), "wrote past the reserved region");
        self.len += n;
    }

    /// Copies a slice into the reservoir.
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.reserve(data.len()).copy_from_slice(data);
        self.wrote(data.len());
    }

    /// Drops all buffered bytes and returns to the unsynced state.
    ///
    /// Required after any seek of the underlying source: buffered bytes
    /// belong to the old position.
    pub fn reset(&mut self) {
        self.head = 0;
        self.len = 0;
        self.unsynced = true;
        self.verified = None;
    }

    /// Attempts to extract the next page from the reservoir.
    ///
    /// Scans from the read position for a capture pattern; a candidate that
    /// fails header validation or its CRC is abandoned one byte at a time.
    /// When junk had to be skipped the call reports [`PageOut::Resync`]
    /// first and leaves the following page for the next call.
    pub fn pageout(&mut self) -> PageOut<'_> {
        match self.scan() {
            Scan::Page { len } => {
                let start = self.head;
                self.head = start + len;
                self.verified = None;
                self.unsynced = false;
                PageOut::Page(PageRef::trusted(&self.buf[start..start + len]))
            }
            Scan::NeedMore => PageOut::NeedMore,
            Scan::Resync { skipped } => PageOut::Resync { skipped },
        }
    }

    /// Whether a complete, verified page sits at the read position,
    /// consuming any junk in front of it.
    ///
    /// Unlike [`pageout`](Self::pageout) this borrows nothing, so callers
    /// can interleave it with refills and extract the page afterwards.
    pub fn page_ready(&mut self) -> bool {
        loop {
            match self.scan() {
                Scan::Page { .. } => return true,
                Scan::NeedMore => return false,
                Scan::Resync { .. } => {}
            }
        }
    }

    /// Locates the next verified page, consuming junk up to it. On
    /// success the read position is the page start and the result is
    /// cached, so a follow-up extraction skips the checksum pass.
    fn scan(&mut self) -> Scan {
        if let Some((at, len)) = self.verified {
            if at == self.head {
                return Scan::Page { len };
            }
            self.verified = None;
        }

        let mut cursor = self.head;
        let mut skipped = 0usize;

        loop {
            let window = &self.buf[cursor..self.len];
            let Some(off) = window.windows(4).position(|w| w == CAPTURE_PATTERN) else {
                // Keep up to three trailing bytes, they may open a pattern.
                let keep = window.len().min(3);
                skipped += window.len() - keep;
                self.head = self.len - keep;
                if skipped > 0 {
                    self.report_skip(skipped);
                    return Scan::Resync { skipped };
                }
                return Scan::NeedMore;
            };

            skipped += off;
            cursor += off;

            match PageRef::parse(&self.buf[cursor..self.len]) {
                Ok(page) => {
                    self.head = cursor;
                    self.verified = Some((cursor, page.len()));
                    if skipped > 0 {
                        // Junk is gone; the page stays put for the next call.
                        self.report_skip(skipped);
                        return Scan::Resync { skipped };
                    }
                    return Scan::Page { len: page.len() };
                }
                Err(PageError::Truncated { .. }) => {
                    // The candidate may still complete; junk before it is done for.
                    self.head = cursor;
                    if skipped > 0 {
                        self.report_skip(skipped);
                        return Scan::Resync { skipped };
                    }
                    return Scan::NeedMore;
                }
                Err(err) => {
                    debug!("abandoning page candidate: {err}");
                    skipped += 1;
                    cursor += 1;
                }
            }
        }
    }

    fn report_skip(&self, skipped: usize) {
        let level = if self.unsynced {
            log::Level::Debug
        } else {
            log::Level::Warn
        };
        log!(level, "skipped {skipped} bytes while searching for a page boundary");
        if !self.unsynced && skipped >= 4 {
            warn!("physical stream is damaged or was written with holes");
        }
    }
}
