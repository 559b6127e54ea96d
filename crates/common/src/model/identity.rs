// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use rand::Rng;
use std::fmt::{Display, Formatter};

/// Set in `Object.flags` when the low half of the uid is the database id.
pub const FLAG_REVERSED: i64 = 0x1;

/// The 128-bit identifier every persistent object carries, as two signed 64-bit halves so that
/// either half fits an SQL INTEGER column.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Uid {
    pub hi: i64,
    pub lo: i64,
}

impl Uid {
    pub fn new(hi: i64, lo: i64) -> Self {
        Self { hi, lo }
    }

    pub fn random() -> Self {
        let mut rng = rand::rng();
        Self {
            hi: rng.random(),
            lo: rng.random(),
        }
    }

    pub fn from_u128(v: u128) -> Self {
        Self {
            hi: (v >> 64) as u64 as i64,
            lo: v as u64 as i64,
        }
    }

    pub fn as_u128(&self) -> u128 {
        ((self.hi as u64 as u128) << 64) | (self.lo as u64 as u128)
    }
}

impl Display for Uid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.as_u128())
    }
}

/// A uid plus the choice of which half acts as the database id within one store.
///
/// Reversal exists so that an object carrying an id minted by another store can still be
/// inserted when its primary half collides with a local row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    uid: Uid,
    reversed: bool,
}

impl Identity {
    pub fn new(uid: Uid) -> Self {
        Self {
            uid,
            reversed: false,
        }
    }

    /// Rebuild an identity from an `Object` row.
    pub fn from_row(id: i64, id2: i64, flags: i64) -> Self {
        if flags & FLAG_REVERSED != 0 {
            Self {
                uid: Uid::new(id2, id),
                reversed: true,
            }
        } else {
            Self {
                uid: Uid::new(id, id2),
                reversed: false,
            }
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// The same uid with the roles of the halves swapped.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            uid: self.uid,
            reversed: !self.reversed,
        }
    }

    pub fn db_id(&self) -> i64 {
        if self.reversed { self.uid.lo } else { self.uid.hi }
    }

    pub fn companion(&self) -> i64 {
        if self.reversed { self.uid.hi } else { self.uid.lo }
    }

    pub fn flags(&self) -> i64 {
        if self.reversed { FLAG_REVERSED } else { 0 }
    }
}
