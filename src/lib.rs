//! # oggio
//!
//! Pure-software implementation of the Ogg container format: the framing
//! layer that Xiph codecs (Vorbis, Opus, Theora, FLAC-in-Ogg) ride on top
//! of. It reads a byte stream and yields pages, then packets, for each
//! interleaved logical bitstream; conversely it accepts packets with
//! granule positions and emits a well-formed byte stream. Random access by
//! granule position works through a bisection search over page boundaries.
//!
//! This crate does not decode codec payloads. After you get packets, hand
//! them to a codec library.
//!
//! ## Technical Overview
//!
//! ```text
//!     physical byte stream (file, memory, any Read source)
//!                           V
//!   pages: framing units with serial, granule position, flags, CRC
//!                           V
//!   packets: the codec-visible data, one logical stream per serial
//! ```
//!
//! The decode side recovers from mid-stream corruption and arbitrary seek
//! positions by scanning for the next verifiable page; losses surface as
//! page sequence gaps, not errors. The encode side lacing-splits packets,
//! fills in BOS/EOS flags, granule positions and CRCs, and keeps every
//! header packet on a page of its own.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::io::Cursor;
//! use oggio::process::{decode::Decoder, encode::Encoder};
//!
//! # fn main() -> anyhow::Result<()> {
//! // Write one logical stream: two headers, then data.
//! let mut encoder = Encoder::new(Vec::new());
//! encoder.write_stream(0x6F67_6721, &[
//!     (b"ident header".to_vec(), 0),
//!     (b"comment header".to_vec(), 0),
//!     (b"audio frame".to_vec(), 960),
//! ])?;
//! let bytes = encoder.finish()?;
//!
//! // Read it back.
//! let mut decoder = Decoder::new(Cursor::new(bytes))?;
//! let serial = decoder.serials().next().expect("one stream");
//! let handle = decoder.open(serial)?;
//! while let Some(packet) = decoder.read_packet(&handle)? {
//!     println!("packet {} ({} bytes)", packet.packetno, packet.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Seeking needs a `Read + Seek` source: `seek_to_granule` bisects to just
//! before the target, `sync_to_granule` pins the exact position to count
//! samples from.

/// Streaming machinery for both framing directions.
///
/// 1. **Page sync** ([`process::sync`]): locates and validates page
///    boundaries in raw bytes.
///
/// 2. **Demultiplexing** ([`process::demux`], [`process::decode`]):
///    reassembles per-stream packets, routing interleaved pages.
///
/// 3. **Multiplexing** ([`process::mux`], [`process::encode`]): packs
///    packets into pages and serialises them.
///
/// 4. **Seeking** ([`process::seek`]): granule-position bisection over
///    seekable sources.
pub mod process;

/// Format component types.
///
/// - **Pages** ([`structs::page`]): the wire framing unit, borrowed and
///   owning flavours
/// - **Packets** ([`structs::packet`]): the codec-visible unit
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **CRC validation** ([`utils::crc`]): the Ogg page checksum
/// - **Error handling** ([`utils::errors`]): error types and escalation
pub mod utils;
