/// Outcome of a single resolution step.
///
/// `Indeterminate` only ever means "ask the next layer", it is never a final answer and never
/// stored in the cache.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CastResult {
    CannotCast = 0,
    CanCast = 1,
    Indeterminate = 2,
}

/// A definite answer, the only thing the cache stores.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verdict {
    CannotCast = 0,
    CanCast = 1,
}

impl CastResult {
    #[inline]
    pub fn is_definite(self) -> bool {
        self != Self::Indeterminate
    }

    #[inline]
    pub fn verdict(self) -> Option<Verdict> {
        match self {
            Self::CanCast => Some(Verdict::CanCast),
            Self::CannotCast => Some(Verdict::CannotCast),
            Self::Indeterminate => None,
        }
    }
}

impl Verdict {
    #[inline]
    pub fn can_cast(self) -> bool {
        self == Self::CanCast
    }

    #[inline]
    pub(crate) fn from_bits(bits: u8) -> Self {
        if bits == Self::CanCast as u8 {
            Self::CanCast
        } else {
            Self::CannotCast
        }
    }
}

impl From<Verdict> for CastResult {
    #[inline]
    fn from(value: Verdict) -> Self {
        match value {
            Verdict::CanCast => Self::CanCast,
            Verdict::CannotCast => Self::CannotCast,
        }
    }
}

impl From<bool> for Verdict {
    #[inline]
    fn from(value: bool) -> Self {
        if value { Self::CanCast } else { Self::CannotCast }
    }
}
