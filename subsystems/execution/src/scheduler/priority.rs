//! # Priority Management
//!
//! Priority levels and niceness. Larger priority values run first.

/// Thread priority, `PRI_MIN..=PRI_MAX`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

/// Lowest priority
pub const PRI_MIN: u8 = 0;
/// Priority of threads created without an explicit one
pub const PRI_DEFAULT: u8 = 31;
/// Highest priority
pub const PRI_MAX: u8 = 63;

/// Number of distinct priority levels
pub const PRI_LEVELS: usize = (PRI_MAX - PRI_MIN) as usize + 1;

impl Priority {
    /// Minimum priority (lowest)
    pub const MIN: Self = Self(PRI_MIN);

    /// Maximum priority (highest)
    pub const MAX: Self = Self(PRI_MAX);

    /// Default priority
    pub const DEFAULT: Self = Self(PRI_DEFAULT);

    /// Create a priority, clamping into range
    pub const fn new(value: u8) -> Self {
        if value > PRI_MAX {
            Self(PRI_MAX)
        } else {
            Self(value)
        }
    }

    /// Create a priority, rejecting out-of-range values
    pub const fn try_new(value: i32) -> Option<Self> {
        if value >= PRI_MIN as i32 && value <= PRI_MAX as i32 {
            Some(Self(value as u8))
        } else {
            None
        }
    }

    /// Create from a computed value, clamping into range
    pub const fn clamped(value: i32) -> Self {
        if value < PRI_MIN as i32 {
            Self(PRI_MIN)
        } else if value > PRI_MAX as i32 {
            Self(PRI_MAX)
        } else {
            Self(value as u8)
        }
    }

    /// Get the raw value
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Ready-bucket index
    pub const fn level(self) -> usize {
        (self.0 - PRI_MIN) as usize
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Niceness, `-20..=20`; higher is nicer to other threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Nice(i8);

impl Nice {
    /// Least nice
    pub const MIN: Self = Self(-20);
    /// Most nice
    pub const MAX: Self = Self(20);
    /// Niceness of the first thread
    pub const DEFAULT: Self = Self(0);

    /// Create a niceness, clamping into range
    pub fn new(value: i32) -> Self {
        Self(value.clamp(Self::MIN.0 as i32, Self::MAX.0 as i32) as i8)
    }

    /// Get the raw value
    pub const fn value(self) -> i32 {
        self.0 as i32
    }
}
