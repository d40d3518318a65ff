//! Bounded integers for validated config limits.
//!
//! Probe batch sizes, wait intervals and size caps are stored as bounded
//! integers so downstream code never re-checks ranges.

use std::fmt;

/// A value outside the inclusive `[min, max]` range of a bounded integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundsError<T> {
    /// Raw value provided.
    pub value: T,
    /// Inclusive minimum.
    pub min: T,
    /// Inclusive maximum.
    pub max: T,
}

impl<T: fmt::Display> fmt::Display for BoundsError<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "value {} is outside [{}, {}]",
            self.value, self.min, self.max
        )
    }
}

impl<T: fmt::Debug + fmt::Display> std::error::Error for BoundsError<T> {}

macro_rules! bounded {
    ($(#[$doc:meta])* $name:ident, $raw:ty) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name<const MIN: $raw, const MAX: $raw>($raw);

        impl<const MIN: $raw, const MAX: $raw> $name<MIN, MAX> {
            /// Wrap `value` when `MIN <= value <= MAX`.
            pub const fn try_new(value: $raw) -> Result<Self, BoundsError<$raw>> {
                if value < MIN || value > MAX {
                    return Err(BoundsError {
                        value,
                        min: MIN,
                        max: MAX,
                    });
                }
                Ok(Self(value))
            }

            /// Return the wrapped value.
            pub const fn get(self) -> $raw {
                self.0
            }
        }

        impl<const MIN: $raw, const MAX: $raw> fmt::Display for $name<MIN, MAX> {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }
    };
}

bounded!(
    /// `u32` constrained to `[MIN, MAX]` (batch sizes, attempt counts).
    BoundedU32,
    u32
);
bounded!(
    /// `u64` constrained to `[MIN, MAX]` (milliseconds, byte sizes).
    BoundedU64,
    u64
);
