//! Wire-exact page representation.
//!
//! A page is the physical framing unit of an Ogg stream:
//!
//! | Offset | Size | Field |
//! |--------|------|----------------------------------|
//! | 0      | 4    | capture pattern `OggS`           |
//! | 4      | 1    | stream structure version (0)     |
//! | 5      | 1    | flags: continued / BOS / EOS     |
//! | 6      | 8    | granule position (i64 LE)        |
//! | 14     | 4    | bitstream serial number (u32 LE) |
//! | 18     | 4    | page sequence number (u32 LE)    |
//! | 22     | 4    | CRC-32 (computed field-zeroed)   |
//! | 26     | 1    | segment count N                  |
//! | 27     | N    | lacing table                     |
//! | 27+N   | sum  | body                             |
//!
//! See <https://xiph.org/ogg/doc/framing.html>.
//!
//! Two layered types cover the ownership split: [`PageRef`] is a borrowed
//! view into whatever storage holds the page image (typically the sync
//! reader's reservoir) and is valid only as long as that storage is not
//! mutated, which the borrow checker enforces. [`Page`] owns its image and
//! lives freely; [`PageRef::to_owned`] crosses over.

use crate::utils::crc::PAGE_CRC;
use crate::utils::errors::PageError;

/// The four bytes every page starts with.
pub const CAPTURE_PATTERN: [u8; 4] = *b"OggS";

/// Fixed header size before the lacing table.
pub const HEADER_SIZE: usize = 27;

/// Maximum number of lacing table entries.
pub const MAX_SEGMENTS: usize = 255;

/// Largest possible page image: header + full lacing table + 255 full segments.
pub const MAX_PAGE_SIZE: usize = HEADER_SIZE + MAX_SEGMENTS + MAX_SEGMENTS * 255;

/// Granule position value meaning "no packet ends on this page".
pub const GRANULE_NONE: i64 = -1;

/// Flag bit: the first segment continues a packet from the previous page.
pub const FLAG_CONTINUED: u8 = 0x01;
/// Flag bit: first page of a logical stream.
pub const FLAG_BOS: u8 = 0x02;
/// Flag bit: last page of a logical stream.
pub const FLAG_EOS: u8 = 0x04;

const OFF_VERSION: usize = 4;
const OFF_FLAGS: usize = 5;
const OFF_GRANULE: usize = 6;
const OFF_SERIAL: usize = 14;
const OFF_SEQUENCE: usize = 18;
const OFF_CHECKSUM: usize = 22;
const OFF_SEGMENTS: usize = 26;

/// Checksum of a complete page image with the stored CRC field masked out.
fn checksum_of(image: &[u8]) -> u32 {
    let mut crc = PAGE_CRC.update(PAGE_CRC.init, &image[..OFF_CHECKSUM]);
    crc = PAGE_CRC.update(crc, &[0u8; 4]);
    PAGE_CRC.update(crc, &image[OFF_CHECKSUM + 4..])
}

/// Borrowed view of one complete, checksum-verified page.
///
/// Produced by [`PageRef::parse`]; the view borrows the backing storage, so
/// it cannot outlive the next mutation of whatever buffer produced it.
#[derive(Debug, Clone, Copy)]
pub struct PageRef<'a> {
    raw: &'a [u8],
    body_start: usize,
}

impl<'a> PageRef<'a> {
    /// Parses a page starting at the first byte of `raw`.
    ///
    /// `raw` may extend past the page; the view is trimmed to the page's
    /// exact length. [`PageError::Truncated`] means `raw` ended before the
    /// page did and more bytes may complete it; every other error condemns
    /// the candidate.
    pub fn parse(raw: &'a [u8]) -> Result<Self, PageError> {
        if raw.len() < HEADER_SIZE {
            return Err(PageError::Truncated {
                needed: HEADER_SIZE,
                available: raw.len(),
            });
        }
        if raw[..4] != CAPTURE_PATTERN {
            return Err(PageError::BadCapturePattern);
        }
        if raw[OFF_VERSION] != 0 {
            return Err(PageError::BadVersion(raw[OFF_VERSION]));
        }

        let body_start = HEADER_SIZE + raw[OFF_SEGMENTS] as usize;
        if raw.len() < body_start {
            return Err(PageError::Truncated {
                needed: body_start,
                available: raw.len(),
            });
        }

        let body_len: usize = raw[HEADER_SIZE..body_start].iter().map(|&l| l as usize).sum();
        let total = body_start + body_len;
        if raw.len() < total {
            return Err(PageError::Truncated {
                needed: total,
                available: raw.len(),
            });
        }

        let raw = &raw[..total];
        let stored = u32::from_le_bytes(raw[OFF_CHECKSUM..OFF_CHECKSUM + 4].try_into().unwrap());
        let calculated = checksum_of(raw);
        if stored != calculated {
            return Err(PageError::ChecksumMismatch { stored, calculated });
        }

        Ok(Self { raw, body_start })
    }

    /// View over a page image a prior [`parse`](Self::parse) already
    /// verified. `raw` must be exactly one complete page.
    pub(crate) fn trusted(raw: &'a [u8]) -> Self {
        Self {
            raw,
            body_start: HEADER_SIZE + raw[OFF_SEGMENTS] as usize,
        }
    }

    /// Complete page image, header through body.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.raw
    }

    /// Total length of the page image in bytes.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn version(&self) -> u8 {
        self.raw[OFF_VERSION]
    }

    pub fn flags(&self) -> u8 {
        self.raw[OFF_FLAGS]
    }

    /// Whether the first segment continues a packet begun on an earlier page.
    pub fn is_continued(&self) -> bool {
        self.flags() & FLAG_CONTINUED != 0
    }

    /// Whether this page begins its logical stream.
    pub fn is_bos(&self) -> bool {
        self.flags() & FLAG_BOS != 0
    }

    /// Whether this page ends its logical stream.
    pub fn is_eos(&self) -> bool {
        self.flags() & FLAG_EOS != 0
    }

    /// Granule position of the last packet completing on this page,
    /// [`GRANULE_NONE`] if no packet ends here.
    pub fn granule_position(&self) -> i64 {
        i64::from_le_bytes(self.raw[OFF_GRANULE..OFF_GRANULE + 8].try_into().unwrap())
    }

    /// Serial number of the logical stream this page belongs to.
    pub fn serial(&self) -> u32 {
        u32::from_le_bytes(self.raw[OFF_SERIAL..OFF_SERIAL + 4].try_into().unwrap())
    }

    /// Per-stream page counter, starting at 0.
    pub fn sequence_number(&self) -> u32 {
        u32::from_le_bytes(self.raw[OFF_SEQUENCE..OFF_SEQUENCE + 4].try_into().unwrap())
    }

    /// Stored CRC-32 (already verified by [`PageRef::parse`]).
    pub fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.raw[OFF_CHECKSUM..OFF_CHECKSUM + 4].try_into().unwrap())
    }

    /// The lacing table: one length byte per segment.
    pub fn segment_table(&self) -> &'a [u8] {
        &self.raw[HEADER_SIZE..self.body_start]
    }

    /// Concatenated segment payload.
    pub fn body(&self) -> &'a [u8] {
        &self.raw[self.body_start..]
    }

    /// Number of packets that complete on this page.
    pub fn packet_count(&self) -> usize {
        self.segment_table().iter().filter(|&&l| l < 255).count()
    }

    /// Whether the final packet on this page spills onto the next one.
    pub fn ends_with_continued(&self) -> bool {
        self.segment_table().last() == Some(&255)
    }

    /// Byte ranges of the packet chunks in this page's body.
    ///
    /// Yields one `(range, complete)` pair per packet chunk: `complete` is
    /// `false` for a trailing chunk whose packet continues on the next
    /// page. When [`is_continued`](Self::is_continued) is set, the first
    /// chunk is the tail of a packet begun earlier.
    pub fn packet_bounds(&self) -> PacketBounds<'a> {
        PacketBounds {
            lacing: self.segment_table(),
            index: 0,
            offset: 0,
        }
    }

    /// Copies the page image out of its backing storage.
    pub fn to_owned(&self) -> Page {
        Page {
            raw: self.raw.to_vec(),
            body_start: self.body_start,
        }
    }
}

/// Iterator over the packet chunk ranges of one page.
///
/// Created by [`PageRef::packet_bounds`]; ranges index into the page body.
#[derive(Debug)]
pub struct PacketBounds<'a> {
    lacing: &'a [u8],
    index: usize,
    offset: usize,
}

impl Iterator for PacketBounds<'_> {
    type Item = (std::ops::Range<usize>, bool);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.lacing.len() {
            return None;
        }

        let start = self.offset;
        let mut complete = false;
        while self.index < self.lacing.len() {
            let l = self.lacing[self.index];
            self.offset += l as usize;
            self.index += 1;
            if l < 255 {
                complete = true;
                break;
            }
        }

        Some((start..self.offset, complete))
    }
}

/// Owning page value, independent of any decoder buffer.
#[derive(Debug, Clone)]
pub struct Page {
    raw: Vec<u8>,
    body_start: usize,
}

impl Page {
    /// Serialises a page from its parts, computing the CRC.
    ///
    /// `segment_table` and `body` must agree: the body length equals the sum
    /// of the lacing bytes, and at most [`MAX_SEGMENTS`] entries fit.
    ///
    /// # Example
    ///
    /// ```rust
    /// use oggio::structs::page::{Page, PageRef, FLAG_BOS};
    ///
    /// let page = Page::build(FLAG_BOS, 0, 0x1234, 0, &[11], b"hello ogg!!");
    /// let parsed = PageRef::parse(page.as_bytes()).unwrap();
    /// assert!(parsed.is_bos());
    /// assert_eq!(parsed.body(), b"hello ogg!!");
    /// ```
    pub fn build(
        flags: u8,
        granule_position: i64,
        serial: u32,
        sequence: u32,
        segment_table: &[u8],
        body: &[u8],
    ) -> Self {
        assert!(segment_table.len() <= MAX_SEGMENTS, "lacing table overflow");
        let body_len: usize = segment_table.iter().map(|&l| l as usize).sum();
        assert_eq!(body_len, body.len(), "lacing table does not cover the body");

        let body_start = HEADER_SIZE + segment_table.len();
        let mut raw = Vec::with_capacity(body_start + body.len());
        raw.extend_from_slice(&CAPTURE_PATTERN);
        raw.push(0); // version
        raw.push(flags);
        raw.extend_from_slice(&granule_position.to_le_bytes());
        raw.extend_from_slice(&serial.to_le_bytes());
        raw.extend_from_slice(&sequence.to_le_bytes());
        raw.extend_from_slice(&[0u8; 4]); // checksum, filled below
        raw.push(segment_table.len() as u8);
        raw.extend_from_slice(segment_table);
        raw.extend_from_slice(body);

        let crc = checksum_of(&raw);
        raw[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&crc.to_le_bytes());

        Self { raw, body_start }
    }

    /// Borrowed view of this page.
    pub fn view(&self) -> PageRef<'_> {
        PageRef {
            raw: &self.raw,
            body_start: self.body_start,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_continued(&self) -> bool {
        self.view().is_continued()
    }

    pub fn is_bos(&self) -> bool {
        self.view().is_bos()
    }

    pub fn is_eos(&self) -> bool {
        self.view().is_eos()
    }

    pub fn granule_position(&self) -> i64 {
        self.view().granule_position()
    }

    pub fn serial(&self) -> u32 {
        self.view().serial()
    }

    pub fn sequence_number(&self) -> u32 {
        self.view().sequence_number()
    }

    pub fn segment_table(&self) -> &[u8] {
        self.view().segment_table()
    }

    pub fn body(&self) -> &[u8] {
        self.view().body()
    }

    pub fn packet_count(&self) -> usize {
        self.view().packet_count()
    }
}

// Pages compare by wire image: identical bytes mean identical content,
// regardless of which storage backs them.
impl PartialEq for Page {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Page {}

impl PartialEq for PageRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for PageRef<'_> {}

impl PartialEq<PageRef<'_>> for Page {
    fn eq(&self, other: &PageRef<'_>) -> bool {
        self.raw == other.raw
    }
}

impl PartialEq<Page> for PageRef<'_> {
    fn eq(&self, other: &Page) -> bool {
        self.raw == other.as_bytes()
    }
}
