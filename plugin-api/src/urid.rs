use std::fmt;

/// A small interned integer identifier for a URI.
///
/// Id `0` is reserved to mean "none" / "unmapped", matching the
/// convention every LV2-style host uses for its `LV2_URID` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Urid(u32);

impl Urid {
    pub const NONE: Urid = Urid(0);

    /// Construct a `Urid` from a raw id.
    ///
    /// Only the registry (or a test) should call this directly; plugin
    /// and catalog code should receive `Urid`s from `map()` calls.
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Urid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "urid:{}", self.0)
    }
}

impl Default for Urid {
    fn default() -> Self {
        Self::NONE
    }
}
