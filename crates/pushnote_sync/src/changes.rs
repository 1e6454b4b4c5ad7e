//! Structured diffs between consecutive list snapshots.

use std::collections::HashSet;

/// Describes how the published list changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepresentableChanges {
    /// The observer must reload the whole list.
    Full,
    /// An incremental update.
    Partial(PartialChanges),
}

/// Index sets of an incremental update.
///
/// Deletions, modifications and move sources index the pre-change list;
/// insertions and move destinations index the post-change list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialChanges {
    /// Removed indices.
    pub deletions: Vec<usize>,
    /// Inserted indices.
    pub insertions: Vec<usize>,
    /// Modified indices.
    pub modifications: Vec<usize>,
    /// `(old_index, new_index)` pairs.
    pub moves: Vec<(usize, usize)>,
}

impl RepresentableChanges {
    /// A single insertion.
    pub fn insertion(index: usize) -> Self {
        Self::insertions(index..index + 1)
    }

    /// Insertions at a contiguous range of indices.
    pub fn insertions(range: std::ops::Range<usize>) -> Self {
        RepresentableChanges::Partial(PartialChanges {
            insertions: range.collect(),
            ..PartialChanges::default()
        })
    }

    /// A single deletion.
    pub fn deletion(index: usize) -> Self {
        RepresentableChanges::Partial(PartialChanges {
            deletions: vec![index],
            ..PartialChanges::default()
        })
    }

    /// A single modification.
    pub fn modification(index: usize) -> Self {
        RepresentableChanges::Partial(PartialChanges {
            modifications: vec![index],
            ..PartialChanges::default()
        })
    }

    /// A single move.
    pub fn moved(from: usize, to: usize) -> Self {
        RepresentableChanges::Partial(PartialChanges {
            moves: vec![(from, to)],
            ..PartialChanges::default()
        })
    }

    /// True for [`RepresentableChanges::Full`].
    pub fn is_full(&self) -> bool {
        matches!(self, RepresentableChanges::Full)
    }

    /// Replays the diff on `old`.
    ///
    /// Retained items keep their pre-change value unless they are listed as
    /// modified; inserted, moved and modified slots take their value from
    /// `new`. Returns `None` if the index sets are inconsistent with the list
    /// lengths. For a valid diff the result equals `new`.
    pub fn apply<T: Clone>(&self, old: &[T], new: &[T]) -> Option<Vec<T>> {
        let changes = match self {
            RepresentableChanges::Full => return Some(new.to_vec()),
            RepresentableChanges::Partial(changes) => changes,
        };

        let removed: HashSet<usize> = changes
            .deletions
            .iter()
            .copied()
            .chain(changes.moves.iter().map(|(from, _)| *from))
            .collect();
        let modified: HashSet<usize> = changes.modifications.iter().copied().collect();
        if removed.iter().chain(modified.iter()).any(|i| *i >= old.len()) {
            return None;
        }

        let placed: HashSet<usize> = changes
            .insertions
            .iter()
            .copied()
            .chain(changes.moves.iter().map(|(_, to)| *to))
            .collect();
        if placed.iter().any(|i| *i >= new.len()) {
            return None;
        }

        let mut retained = old
            .iter()
            .enumerate()
            .filter(|(i, _)| !removed.contains(i));
        let mut result = Vec::with_capacity(new.len());
        for (slot, new_item) in new.iter().enumerate() {
            if placed.contains(&slot) {
                result.push(new_item.clone());
                continue;
            }
            let (old_index, old_item) = retained.next()?;
            if modified.contains(&old_index) {
                result.push(new_item.clone());
            } else {
                result.push(old_item.clone());
            }
        }

        if retained.next().is_some() {
            return None;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertions_at_tail() {
        let old = vec!["a", "b"];
        let new = vec!["a", "b", "c", "d"];
        let changes = RepresentableChanges::insertions(2..4);
        assert_eq!(changes.apply(&old, &new), Some(new.clone()));
    }

    #[test]
    fn deletion_and_modification() {
        let old = vec!["a", "b", "c"];
        let new = vec!["a", "C"];
        let changes = RepresentableChanges::Partial(PartialChanges {
            deletions: vec![1],
            modifications: vec![2],
            ..PartialChanges::default()
        });
        assert_eq!(changes.apply(&old, &new), Some(new.clone()));
    }

    #[test]
    fn move_to_end() {
        let old = vec!["a", "b", "c"];
        let new = vec!["b", "c", "a"];
        assert_eq!(
            RepresentableChanges::moved(0, 2).apply(&old, &new),
            Some(new.clone())
        );
    }

    #[test]
    fn wrong_index_is_detected() {
        let old = vec!["a", "b", "c"];
        let new = vec!["a", "c"];
        let changes = RepresentableChanges::deletion(2);
        assert_ne!(changes.apply(&old, &new), Some(new.clone()));
        assert_eq!(RepresentableChanges::deletion(7).apply(&old, &new), None);
    }

    #[test]
    fn length_mismatch_is_detected() {
        let old = vec!["a"];
        let new = vec!["a", "b"];
        assert_eq!(RepresentableChanges::modification(0).apply(&old, &new), None);
    }

    #[test]
    fn full_reload() {
        let changes = RepresentableChanges::Full;
        assert!(changes.is_full());
        assert_eq!(changes.apply(&["x"], &["y"]), Some(vec!["y"]));
    }
}
