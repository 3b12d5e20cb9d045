use std::fmt;

/// Slot index of a live connection in the server's arena.
///
/// Wrapping `usize` in a newtype keeps connection handles from being mixed
/// up with other integers. Slots are reused after a connection is dropped,
/// so a `ConnId` is only meaningful while its connection is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(usize);

impl ConnId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the raw index for Vec-based lookup.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}
