mod clock;
mod control;
mod depth;
mod engine;
mod history;
mod info;
mod limits;
mod params;
mod picker;
mod pool;
mod root;
mod score;
mod stack;
mod tables;
mod transposition;

pub use clock::*;
pub use control::*;
pub use depth::*;
pub use engine::*;
pub use history::*;
pub use info::*;
pub use limits::*;
pub use picker::*;
pub use pool::*;
pub use root::*;
pub use score::*;
pub use stack::*;
pub use tables::*;
pub use transposition::*;

use derive_more::with_trait::{Display, Error};
use std::str::FromStr;

/// The deepest ply the search may reach.
pub const PLY_MAX: i32 = 100;

/// The error returned when parsing an out of range option value.
#[derive(Debug, Display, Copy, Clone, Eq, PartialEq, Hash, Error)]
#[display("option value out of range")]
pub struct OptionOutOfRange;

macro_rules! spin_option {
    ($(#[$attr:meta])* $name:ident($repr:ty) in $min:literal..=$max:literal, default $default:literal) => {
        $(#[$attr])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[cfg_attr(test, derive(test_strategy::Arbitrary))]
        pub struct $name(#[cfg_attr(test, strategy($min..=$max))] $repr);

        impl $name {
            pub const MIN: $repr = $min;
            pub const MAX: $repr = $max;

            #[inline(always)]
            pub fn new(value: $repr) -> Self {
                Self(value.clamp($min, $max))
            }

            #[inline(always)]
            pub fn get(&self) -> $repr {
                self.0
            }
        }

        impl Default for $name {
            #[inline(always)]
            fn default() -> Self {
                Self($default)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = OptionOutOfRange;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().parse::<$repr>() {
                    Ok(v) if ($min..=$max).contains(&v) => Ok(Self(v)),
                    _ => Err(OptionOutOfRange),
                }
            }
        }
    };
}

spin_option! {
    /// The transposition table size, in MiB.
    HashSize(usize) in 1..=4096, default 16
}

spin_option! {
    /// The number of worker threads.
    ThreadCount(usize) in 1..=64, default 1
}

spin_option! {
    /// The number of principal variations to search.
    MultiPv(usize) in 1..=220, default 1
}

spin_option! {
    /// The playing strength handicap; 20 plays at full strength.
    SkillLevel(i32) in 0..=20, default 20
}

/// Configuration for the [`Engine`].
#[derive(Debug, Default, Clone, Eq, PartialEq)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub struct Options {
    pub hash: HashSize,
    pub threads: ThreadCount,
    pub multi_pv: MultiPv,
    pub skill: SkillLevel,
    pub chess960: bool,
    pub ponder: bool,

    /// Debug mode: split-point work is performed synchronously by the
    /// master, preserving the same state transitions in a single thread.
    pub fake_split: bool,
    #[cfg_attr(test, strategy(proptest::strategy::Just(Default::default())))]
    pub book: BookOptions,
}

/// Opening book and search log settings.
///
/// The engine carries no book and writes no log; the options are accepted
/// so that front ends configuring them are not rejected.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct BookOptions {
    pub own_book: bool,
    pub book_file: String,
    pub best_book_move: bool,
    pub use_search_log: bool,
    pub search_log_filename: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_strategy::proptest;

    #[proptest]
    fn spin_options_parse_their_own_display(h: HashSize, t: ThreadCount, s: SkillLevel) {
        assert_eq!(h.to_string().parse(), Ok(h));
        assert_eq!(t.to_string().parse(), Ok(t));
        assert_eq!(s.to_string().parse(), Ok(s));
    }

    #[proptest]
    fn out_of_range_options_fail_to_parse(#[strategy(4097usize..)] n: usize) {
        assert_eq!(n.to_string().parse::<HashSize>(), Err(OptionOutOfRange));
    }

    #[proptest]
    fn new_clamps_to_the_valid_range(n: usize) {
        let h = HashSize::new(n);
        assert!((HashSize::MIN..=HashSize::MAX).contains(&h.get()));
    }
}
