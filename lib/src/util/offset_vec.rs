use std::fmt::{Debug, Error, Formatter};
use std::iter::FromIterator;

/// Elements with a width (eg. when used in an `OffsetVec`)
pub trait Width {
    fn width(&self) -> usize;
}

/// A vector of elements of different logical "widths", where offsets into the vector are given in
/// terms of the sum of the widths of the previous elements (as opposed to the number of preceding
/// elements).
///
/// The constant pool is the main user: most entries have width 1, but `long` and `double` entries
/// have width 2 and the slot after them is unusable.
#[derive(Clone)]
pub struct OffsetVec<T: Sized> {
    /// Entries, along with their offset
    entries: Vec<(Offset, T)>,

    /// Offset of the next element to be added
    offset_len: Offset,

    /// Offset for the first element (usually 0, but 1 for the constant pool)
    initial_offset: Offset,
}

/// Offset into an `OffsetVec`
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Offset(pub usize);

impl<T: Sized + Width> OffsetVec<T> {
    /// New empty offset vector
    pub fn new() -> OffsetVec<T> {
        OffsetVec::new_starting_at(Offset(0))
    }

    /// New empty offset vector, with a custom starting offset
    pub fn new_starting_at(initial_offset: Offset) -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            offset_len: initial_offset,
            initial_offset,
        }
    }

    /// Number of entries (not the same as the offset length)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offset of the next element to be added
    pub fn offset_len(&self) -> Offset {
        self.offset_len
    }

    /// Offset of the first element
    pub fn initial_offset(&self) -> Offset {
        self.initial_offset
    }

    /// Add an entry to the back
    pub fn push(&mut self, slot: T) -> Offset {
        let offset = self.offset_len;
        self.offset_len.0 += slot.width();
        self.entries.push((offset, slot));
        offset
    }

    /// Get an entry by its offset in the vector
    ///
    /// Note: this uses binary search to find the offset
    pub fn get_offset(&self, offset: Offset) -> OffsetResult<T> {
        match self.entries.binary_search_by_key(&offset, |(off, _)| *off) {
            Err(insert_at) if insert_at == self.entries.len() => OffsetResult::TooLarge,
            Err(insert_at) => OffsetResult::InvalidOffset(insert_at),
            Ok(found_idx) => OffsetResult::Ok(found_idx, &self.entries[found_idx].1),
        }
    }

    /// Iterate over entries, along with their offsets
    pub fn iter(&self) -> impl Iterator<Item = (Offset, &T)> + '_ {
        self.entries.iter().map(|(offset, t)| (*offset, t))
    }
}

impl<T: Sized + Width> Default for OffsetVec<T> {
    fn default() -> Self {
        OffsetVec::new()
    }
}

impl<A: PartialEq> PartialEq for OffsetVec<A> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<T: Width> FromIterator<T> for OffsetVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut offset_vec = OffsetVec::new();
        for elem in iter {
            offset_vec.push(elem);
        }
        offset_vec
    }
}

impl<T: Debug> Debug for OffsetVec<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_map()
            .entries(self.entries.iter().map(|(off, t)| (off.0, t)))
            .finish()
    }
}

/// Result of looking up an entry by offset
#[derive(Debug, PartialEq, Eq)]
pub enum OffsetResult<'a, T> {
    /// Offset is past the end of the vector
    TooLarge,

    /// Offset falls in the middle of a wide entry (the entry at this index)
    InvalidOffset(usize),

    /// Offset points to an element (index and element)
    Ok(usize, &'a T),
}

impl<'a, T> OffsetResult<'a, T> {
    pub fn ok(self) -> Option<&'a T> {
        match self {
            OffsetResult::Ok(_, t) => Some(t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Slot {
        Narrow(u8),
        Wide(u8),
    }

    impl Width for Slot {
        fn width(&self) -> usize {
            match self {
                Slot::Narrow(_) => 1,
                Slot::Wide(_) => 2,
            }
        }
    }

    #[test]
    fn offsets_account_for_width() {
        let mut vec = OffsetVec::new_starting_at(Offset(1));
        assert_eq!(vec.push(Slot::Narrow(0)), Offset(1));
        assert_eq!(vec.push(Slot::Wide(1)), Offset(2));
        assert_eq!(vec.push(Slot::Narrow(2)), Offset(4));
        assert_eq!(vec.len(), 3);
        assert_eq!(vec.offset_len(), Offset(5));

        assert_eq!(vec.get_offset(Offset(2)), OffsetResult::Ok(1, &Slot::Wide(1)));
        assert_eq!(vec.get_offset(Offset(3)), OffsetResult::InvalidOffset(2));
        assert_eq!(vec.get_offset(Offset(4)).ok(), Some(&Slot::Narrow(2)));
        assert_eq!(vec.get_offset(Offset(9)), OffsetResult::TooLarge);
    }

    #[test]
    fn offset_before_start_is_invalid() {
        let vec: OffsetVec<Slot> = OffsetVec::new_starting_at(Offset(1));
        assert_eq!(vec.get_offset(Offset(0)), OffsetResult::TooLarge);

        let vec: OffsetVec<Slot> = vec![Slot::Narrow(1)]
            .into_iter()
            .collect::<OffsetVec<_>>();
        assert_eq!(vec.get_offset(Offset(0)).ok(), Some(&Slot::Narrow(1)));
    }
}
