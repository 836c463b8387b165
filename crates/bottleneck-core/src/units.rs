//! Strongly typed quantities. Every unit wraps a `u64`; coarse units convert into the base units
//! ([`Nanosecs`] for time, [`BitsPerSec`] for rates).

macro_rules! unit {
    ($name: ident, $suffix: literal) => {
        #[derive(
            Debug,
            Default,
            Copy,
            Clone,
            PartialOrd,
            Ord,
            PartialEq,
            Eq,
            Hash,
            derive_more::Add,
            derive_more::Sub,
            derive_more::AddAssign,
            derive_more::SubAssign,
            derive_more::Sum,
            derive_more::FromStr,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const ZERO: $name = Self::new(0);
            pub const ONE: $name = Self::new(1);
            pub const MAX: $name = Self::new(u64::MAX);

            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn into_u64(self) -> u64 {
                self.0
            }

            pub fn into_f64(self) -> f64 {
                self.0 as f64
            }

            pub fn scale_by(self, factor: f64) -> Self {
                Self((self.0 as f64 * factor).round() as u64)
            }

            pub fn saturating_sub(self, other: Self) -> Self {
                Self(self.0.saturating_sub(other.0))
            }

            pub fn checked_sub(self, other: Self) -> Option<Self> {
                self.0.checked_sub(other.0).map(Self)
            }

            pub fn checked_add(self, other: Self) -> Option<Self> {
                self.0.checked_add(other.0).map(Self)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", self.0, $suffix)
            }
        }
    };
}

// Lossless conversion from a coarse unit into a finer one.
macro_rules! convert {
    ($from: ident => $to: ident, $factor: expr) => {
        impl From<$from> for $to {
            fn from(val: $from) -> Self {
                $to::new(val.into_u64() * $factor)
            }
        }
    };
}

unit!(Nanosecs, "ns");
unit!(Microsecs, "us");
unit!(Millisecs, "ms");
unit!(Secs, "s");

convert!(Microsecs => Nanosecs, 1_000);
convert!(Millisecs => Nanosecs, 1_000_000);
convert!(Secs => Nanosecs, 1_000_000_000);

impl Nanosecs {
    pub fn into_secs_f64(self) -> f64 {
        self.into_f64() / 1e9
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self::new((secs * 1e9).round() as u64)
    }
}

unit!(Bytes, "B");
unit!(Packets, "p");

impl Bytes {
    pub fn into_usize(self) -> usize {
        self.0 as usize
    }
}

unit!(BitsPerSec, "bps");
unit!(Kbps, "Kbps");
unit!(Mbps, "Mbps");
unit!(Gbps, "Gbps");

convert!(Kbps => BitsPerSec, 1_000);
convert!(Mbps => BitsPerSec, 1_000_000);
convert!(Gbps => BitsPerSec, 1_000_000_000);

impl BitsPerSec {
    /// The time it takes to serialize `size` at this rate, rounded up.
    pub fn length(self, size: Bytes) -> Nanosecs {
        if self.0 == 0 {
            return Nanosecs::MAX;
        }
        let bits = size.into_u64() as u128 * 8;
        let nanos = (bits * 1_000_000_000).div_ceil(self.0 as u128);
        Nanosecs::new(nanos.min(u64::MAX as u128) as u64)
    }

    /// The number of bytes (possibly fractional) this rate carries in `duration`.
    pub fn bytes_in(self, duration: Nanosecs) -> f64 {
        self.into_f64() / 8.0 * duration.into_secs_f64()
    }

    pub fn from_f64(bps: f64) -> Self {
        Self::new(bps.max(0.0).round() as u64)
    }
}
