//! Inbound frame decoding.
//!
//! There is no length framing: whatever a single `read` / `recv_from` call
//! returns is one frame, bounded by the read buffer.

use relay_core::{ChatError, ChatResult};

/// Default read buffer size for one frame or datagram.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Frame text that ends a TCP session.
pub const QUIT_COMMAND: &str = "quit";

/// Decodes a raw frame as UTF-8 text.
///
/// # Errors
///
/// `InvalidMessageFormat` wrapping the UTF-8 error when `bytes` is not text.
pub fn decode_frame(bytes: &[u8]) -> ChatResult<&str> {
    std::str::from_utf8(bytes)
        .map_err(|e| ChatError::invalid_format("Message is not valid UTF-8 text").with_cause(e))
}

/// Whether trimmed frame text asks to end the session.
#[must_use]
pub fn is_quit(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case(QUIT_COMMAND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::ErrorKind;

    #[test]
    fn test_decode_text() {
        assert_eq!(decode_frame(b"hello\n").unwrap(), "hello\n");
        assert_eq!(decode_frame("héllo".as_bytes()).unwrap(), "héllo");
    }

    #[test]
    fn test_decode_rejects_binary() {
        let err = decode_frame(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMessageFormat);
        assert_eq!(err.cause().map(|c| c.type_name()), Some("Utf8Error"));
    }

    #[test]
    fn test_quit_is_case_insensitive() {
        assert!(is_quit("quit"));
        assert!(is_quit("QUIT\r\n"));
        assert!(is_quit("  Quit "));
        assert!(!is_quit("quitting"));
        assert!(!is_quit("/quit"));
    }
}
