//! Ring tokens.
//!
//! A token is a point in the 32-bit position space shared by instances and
//! lookup keys. Ordering is plain unsigned ordering; the ring wraps from
//! [`Token::MAX`] back to [`Token::MIN`].

use std::fmt;

/// Position on the hash ring.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Token(pub u32);

impl Token {
    /// Start of the ring.
    pub const MIN: Token = Token(0);
    /// End of the ring.
    pub const MAX: Token = Token(u32::MAX);

    /// Clockwise distance from `self` to `other` on the ring.
    pub fn distance_to(&self, other: &Self) -> u32 {
        other.0.wrapping_sub(self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_fixed_width_hex() {
        assert_eq!(Token(0x1234_5678).to_string(), "12345678");
        assert_eq!(Token(0xab).to_string(), "000000ab");
    }

    #[test]
    fn test_distance_wraps() {
        assert_eq!(Token(100).distance_to(&Token(200)), 100);
        assert_eq!(Token::MAX.distance_to(&Token::MIN), 1);
        assert_eq!(Token(200).distance_to(&Token(100)), u32::MAX - 99);
    }
}
