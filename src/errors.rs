use std::error::Error;
use std::fmt::Display;

/// The session cannot continue: reader gone, card removed, or the link timed
/// out. Callers must close and reopen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    ReaderDisconnected,
    CardRemoved,
    Timeout,
    ResponseTooShort(usize),
    CommandTooLong(usize),
    Pcsc(String),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::ReaderDisconnected => write!(f, "Reader disconnected"),
            TransportError::CardRemoved => write!(f, "Card removed"),
            TransportError::Timeout => write!(f, "Transport timeout"),
            TransportError::ResponseTooShort(len) => {
                write!(f, "Response too short, got {} bytes, need at least 2", len)
            }
            TransportError::CommandTooLong(len) => {
                write!(f, "Cannot encode {} bytes of command data", len)
            }
            TransportError::Pcsc(msg) => write!(f, "PC/SC failure: {}", msg),
        }
    }
}

impl Error for TransportError {}

impl From<pcsc::Error> for TransportError {
    fn from(err: pcsc::Error) -> Self {
        match err {
            pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard => TransportError::CardRemoved,
            pcsc::Error::ReaderUnavailable | pcsc::Error::UnknownReader => {
                TransportError::ReaderDisconnected
            }
            pcsc::Error::Timeout => TransportError::Timeout,
            other => TransportError::Pcsc(other.to_string()),
        }
    }
}

/// An unexpected status word from a command we issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolError {
    pub sw: u16,
    pub ins: u8,
}

impl ProtocolError {
    pub fn name(&self) -> &'static str {
        status_name(self.sw)
    }
}

/// Symbolic names for the status words this toolkit dispatches on.
pub fn status_name(sw: u16) -> &'static str {
    match sw {
        0x9000 => "success",
        0x6a82 => "file not found",
        0x6a83 => "record not found",
        0x6a86 | 0x6b00 => "wrong P1P2",
        0x6a88 => "referenced data not found",
        0x6982 => "security not satisfied",
        0x6983 => "authentication method blocked",
        0x6985 => "conditions of use",
        0x6700 => "wrong length",
        0x6d00 => "instruction not supported",
        0x6e00 => "class not supported",
        0x9862 => "sync failure",
        0x9804 => "access condition not fulfilled",
        0x6310 => "more data available",
        sw if sw & 0xfff0 == 0x63c0 => "verification failed",
        sw if sw & 0xff00 == 0x6100 => "response bytes available",
        sw if sw & 0xff00 == 0x6c00 => "wrong Le",
        _ => "unknown status",
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Card returned 0x{:04x} ({}) to instruction 0x{:02x}",
            self.sw,
            self.name(),
            self.ins
        )
    }
}

impl Error for ProtocolError {}

/// Input rejected before any command was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    OddHexLength(usize),
    BadHexChar(char),
    WrongLength {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    LengthOutOfRange {
        what: &'static str,
        min: usize,
        max: usize,
        got: usize,
    },
    NotDigits(&'static str),
    BadLuhn(String),
    Unsupported(&'static str),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::OddHexLength(len) => {
                write!(f, "Odd number of hex digits ({})", len)
            }
            ValidationError::BadHexChar(c) => write!(f, "Invalid hex character {:?}", c),
            ValidationError::WrongLength {
                what,
                expected,
                got,
            } => write!(f, "{} must be {} bytes, got {}", what, expected, got),
            ValidationError::LengthOutOfRange { what, min, max, got } => {
                write!(f, "{} must be {}..={} bytes, got {}", what, min, max, got)
            }
            ValidationError::NotDigits(what) => {
                write!(f, "{} must contain only decimal digits", what)
            }
            ValidationError::BadLuhn(s) => write!(f, "Luhn check failed for {:?}", s),
            ValidationError::Unsupported(what) => write!(f, "{} is not supported", what),
        }
    }
}

impl Error for ValidationError {}

/// A cryptogram or MAC mismatch inside the secure channel. Terminates the
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    CardCryptogramMismatch,
    MacSMismatch,
    SessionClosed,
    NoKeysetMatched,
}

impl Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::CardCryptogramMismatch => {
                write!(f, "Card cryptogram did not verify against the supplied keys")
            }
            CryptoError::MacSMismatch => write!(f, "MAC-S in AUTS did not verify"),
            CryptoError::SessionClosed => {
                write!(f, "Secure channel is no longer usable, reopen it")
            }
            CryptoError::NoKeysetMatched => {
                write!(f, "No candidate keyset produced a valid card cryptogram")
            }
        }
    }
}

impl Error for CryptoError {}

/// Any failure an operation that touches the card can produce. Upper layers
/// never catch: read paths record these per file, write paths stop at the
/// first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardError {
    Transport(TransportError),
    Protocol(ProtocolError),
    Decode(crate::tlv::DecodeError),
    Validation(ValidationError),
    Crypto(CryptoError),
    /// The caller's cancellation predicate fired mid-operation; the card may
    /// be partially written.
    Cancelled { done: usize },
}

impl Display for CardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CardError::Transport(e) => e.fmt(f),
            CardError::Protocol(e) => e.fmt(f),
            CardError::Decode(e) => e.fmt(f),
            CardError::Validation(e) => e.fmt(f),
            CardError::Crypto(e) => e.fmt(f),
            CardError::Cancelled { done } => {
                write!(f, "Cancelled after {} blocks, card state is partial", done)
            }
        }
    }
}

impl Error for CardError {}

impl From<TransportError> for CardError {
    fn from(e: TransportError) -> Self {
        CardError::Transport(e)
    }
}

impl From<ProtocolError> for CardError {
    fn from(e: ProtocolError) -> Self {
        CardError::Protocol(e)
    }
}

impl From<crate::tlv::DecodeError> for CardError {
    fn from(e: crate::tlv::DecodeError) -> Self {
        CardError::Decode(e)
    }
}

impl From<ValidationError> for CardError {
    fn from(e: ValidationError) -> Self {
        CardError::Validation(e)
    }
}

impl From<CryptoError> for CardError {
    fn from(e: CryptoError) -> Self {
        CardError::Crypto(e)
    }
}

/// Errors success into `Ok(data)`, everything else into a typed
/// [`ProtocolError`].
pub fn expect_ok(data: Vec<u8>, sw: u16, ins: u8) -> Result<Vec<u8>, CardError> {
    if sw == 0x9000 {
        Ok(data)
    } else {
        Err(CardError::Protocol(ProtocolError { sw, ins }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names() {
        assert_eq!(status_name(0x6a82), "file not found");
        assert_eq!(status_name(0x6d00), "instruction not supported");
        assert_eq!(status_name(0x63c2), "verification failed");
        assert_eq!(status_name(0x9862), "sync failure");
    }
}
