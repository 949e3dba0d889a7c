//! Pin token type

use core::fmt;

/// Key into the handle table, stored in a pinned request's payload slot.
///
/// A freshly allocated payload slot is zeroed, so the raw value 0 is
/// reserved as the "not pinned" sentinel. Tokens are never reused within
/// a thread, so a stale token cannot resolve to a newer request.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PinToken(u64);

impl PinToken {
    /// Sentinel value for an unpinned slot
    pub const NONE: PinToken = PinToken(0);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        PinToken(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Convert to Option, mapping the sentinel to `None`
    #[inline]
    pub const fn to_option(self) -> Option<PinToken> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Debug for PinToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "PinToken(NONE)")
        } else {
            write!(f, "PinToken({})", self.0)
        }
    }
}

impl fmt::Display for PinToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pin#{}", self.0)
    }
}

impl Default for PinToken {
    fn default() -> Self {
        PinToken::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_none() {
        assert!(PinToken::NONE.is_none());
        assert_eq!(PinToken::NONE.to_option(), None);
        assert_eq!(PinToken::default(), PinToken::NONE);
    }

    #[test]
    fn test_token_some() {
        let t = PinToken::new(7);
        assert!(!t.is_none());
        assert_eq!(t.to_option(), Some(t));
        assert_eq!(t.as_u64(), 7);
        assert_eq!(format!("{}", t), "pin#7");
        assert_eq!(format!("{:?}", t), "PinToken(7)");
    }

    #[test]
    fn test_zeroed_slot_reads_as_none() {
        let t: PinToken = unsafe { std::mem::zeroed() };
        assert!(t.is_none());
    }
}
