#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err.into());
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

/// Failures while parsing a single page image.
///
/// `Truncated` is the only recoverable kind: it means the backing slice may
/// simply not hold the whole page yet.
#[derive(thiserror::Error, Debug)]
pub enum PageError {
    #[error("Capture pattern mismatch, a page must begin with \"OggS\"")]
    BadCapturePattern,

    #[error("Unsupported stream structure version {0}, expected 0")]
    BadVersion(u8),

    #[error("Page truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Page checksum mismatch: stored {stored:#010X}, calculated {calculated:#010X}")]
    ChecksumMismatch { stored: u32, calculated: u32 },
}

/// Anomalies observed while reassembling packets for one logical stream.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("Page with serial {got:#010X} fed to logical stream {expected:#010X}")]
    SerialMismatch { expected: u32, got: u32 },

    #[error("Page sequence gap in stream {serial:#010X}: expected {expected}, got {got}")]
    PageSequenceGap { serial: u32, expected: u32, got: u32 },

    #[error("Page {sequence} of stream {serial:#010X} starts fresh while a packet was in progress")]
    LostContinuation { serial: u32, sequence: u32 },

    #[error("Stream {serial:#010X} ended with an unterminated packet of {pending} buffered bytes")]
    DanglingPacket { serial: u32, pending: usize },
}

/// Misuse of the physical decoder surface.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("Unknown logical stream serial {0:#010X}")]
    UnknownSerial(u32),

    #[error("Logical stream {0:#010X} is already open")]
    AlreadyOpen(u32),

    #[error("Logical stream {0:#010X} is not open")]
    NotOpen(u32),
}

/// Misuse of the encoding surface.
#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("Logical stream {0:#010X} already received its final packet")]
    StreamFinished(u32),

    #[error("No logical stream with serial {0:#010X} has been written")]
    UnknownStream(u32),
}
