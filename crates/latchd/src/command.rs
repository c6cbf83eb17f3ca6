//! Command datagram decoding.
//!
//! The command channel carries short ASCII tokens. There is no sender
//! verification and no replay protection.

use std::fmt;

/// Longest datagram considered for decoding; anything longer is unknown.
pub const MAX_COMMAND_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Unlock,
    Lock,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Unlock => write!(f, "unlock"),
            Command::Lock => write!(f, "lock"),
        }
    }
}

/// Decode a datagram. Unknown, oversized or non-UTF-8 input yields `None`.
pub fn decode(datagram: &[u8]) -> Option<Command> {
    if datagram.len() > MAX_COMMAND_LEN {
        return None;
    }
    let text = std::str::from_utf8(datagram).ok()?;
    match text.trim() {
        "unlock" => Some(Command::Unlock),
        "lock" => Some(Command::Lock),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tokens() {
        assert_eq!(decode(b"unlock"), Some(Command::Unlock));
        assert_eq!(decode(b"lock"), Some(Command::Lock));
        assert_eq!(decode(b"unlock\n"), Some(Command::Unlock));
        assert_eq!(decode(b"  lock\r\n"), Some(Command::Lock));
    }

    #[test]
    fn test_unknown_tokens() {
        assert_eq!(decode(b""), None);
        assert_eq!(decode(b"UNLOCK"), None);
        assert_eq!(decode(b"unlock now"), None);
        assert_eq!(decode(b"open"), None);
        assert_eq!(decode(&[0xff, 0xfe, 0x00]), None);
    }

    #[test]
    fn test_oversized_datagram() {
        let mut big = b"unlock".to_vec();
        big.extend(std::iter::repeat(b' ').take(MAX_COMMAND_LEN));
        assert_eq!(decode(&big), None);
    }
}
