//! Streaming machinery for both framing directions.
//!
//! Decode side: bytes enter a [`SyncReader`](sync::SyncReader), pages come
//! out and are routed by a [`Decoder`](decode::Decoder) to per-stream
//! [`StreamReader`](demux::StreamReader)s, which reassemble packets.
//!
//! Encode side: packets enter per-stream
//! [`StreamWriter`](mux::StreamWriter)s owned by an
//! [`Encoder`](encode::Encoder), pages come out serialised into the sink.

/// Page synchronisation over a raw byte reservoir.
///
/// Provides the [`SyncReader`](sync::SyncReader) for locating and
/// validating page boundaries in unaligned byte streams.
pub mod sync;

/// Per-stream packet reassembly (decode side).
///
/// Provides the [`StreamReader`](demux::StreamReader) for turning one
/// logical stream's pages back into packets.
pub mod demux;

/// Per-stream page emission (encode side).
///
/// Provides the [`StreamWriter`](mux::StreamWriter) for packing packets
/// into correctly laced, flagged and checksummed pages.
pub mod mux;

/// Physical stream decoding.
///
/// Provides the [`Decoder`](decode::Decoder) over a byte source, logical
/// stream discovery and handles, and the page/packet iterators.
pub mod decode;

/// Physical stream encoding.
///
/// Provides the [`Encoder`](encode::Encoder) over a byte sink, including
/// chained multi-stream writing.
pub mod encode;

/// Granule-position seeking.
///
/// Bisection search by granule over seekable sources, plus the
/// sync-to-granule and last-page primitives.
pub mod seek;
