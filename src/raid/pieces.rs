//! Piece Map
//!
//! Set of byte ranges of the logical file, kept as `offset -> length`.
//! Non-streaming writes record what they touched here so parity can be
//! recomputed for groups once they are fully covered. The read path uses
//! the same structure for ranges that failed and need reconstruction.

use std::collections::{BTreeMap, BTreeSet};

/// Byte ranges keyed by start offset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PieceMap {
    pieces: BTreeMap<u64, u64>,
}

impl PieceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn clear(&mut self) {
        self.pieces.clear();
    }

    /// Record `[offset, offset + len)`. A piece at the same offset keeps
    /// the longer length.
    pub fn add(&mut self, offset: u64, len: u64) {
        if len == 0 {
            return;
        }
        let entry = self.pieces.entry(offset).or_insert(len);
        *entry = (*entry).max(len);
    }

    /// Coalesce overlapping and touching pieces
    pub fn merge(&mut self) {
        let mut merged: BTreeMap<u64, u64> = BTreeMap::new();
        let mut current: Option<(u64, u64)> = None;

        for (&start, &len) in &self.pieces {
            let end = start + len;
            current = match current {
                Some((s, e)) if start <= e => Some((s, e.max(end))),
                Some((s, e)) => {
                    merged.insert(s, e - s);
                    Some((start, end))
                }
                None => Some((start, end)),
            };
        }
        if let Some((s, e)) = current {
            merged.insert(s, e - s);
        }
        self.pieces = merged;
    }

    /// Iterate `(offset, len)` in offset order
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.pieces.iter().map(|(&o, &l)| (o, l))
    }

    /// Remove and return the start offset of every group of `group_size`
    /// bytes that the pieces cover completely. Uncovered remainders stay.
    pub fn take_full_groups(&mut self, group_size: u64) -> BTreeSet<u64> {
        self.merge();
        let mut groups = BTreeSet::new();
        let mut remaining = BTreeMap::new();

        for (start, len) in self.iter() {
            let end = start + len;
            let first = start.div_ceil(group_size) * group_size;
            let mut group = first;
            while group + group_size <= end {
                groups.insert(group);
                group += group_size;
            }

            if group == first {
                remaining.insert(start, len);
                continue;
            }
            if start < first {
                remaining.insert(start, first - start);
            }
            if group < end {
                remaining.insert(group, end - group);
            }
        }

        self.pieces = remaining;
        groups
    }

    /// Remove every piece and return the start of every group it touches
    pub fn take_all_groups(&mut self, group_size: u64) -> BTreeSet<u64> {
        self.merge();
        let mut groups = BTreeSet::new();

        for (start, len) in self.iter() {
            let end = start + len;
            let mut group = (start / group_size) * group_size;
            while group < end {
                groups.insert(group);
                group += group_size;
            }
        }

        self.pieces.clear();
        groups
    }

    /// Split the pieces at group boundaries, keyed by group start
    pub fn by_group(&self, group_size: u64) -> BTreeMap<u64, PieceMap> {
        let mut out: BTreeMap<u64, PieceMap> = BTreeMap::new();

        for (mut start, len) in self.iter() {
            let end = start + len;
            while start < end {
                let group = (start / group_size) * group_size;
                let stop = end.min(group + group_size);
                out.entry(group).or_default().add(start, stop - start);
                start = stop;
            }
        }
        out
    }
}

impl FromIterator<(u64, u64)> for PieceMap {
    fn from_iter<I: IntoIterator<Item = (u64, u64)>>(iter: I) -> Self {
        let mut map = PieceMap::new();
        for (offset, len) in iter {
            map.add(offset, len);
        }
        map
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pieces(map: &PieceMap) -> Vec<(u64, u64)> {
        map.iter().collect()
    }

    #[test]
    fn test_add_keeps_longest() {
        let mut map = PieceMap::new();
        map.add(10, 5);
        map.add(10, 3);
        map.add(10, 8);
        map.add(20, 0);
        assert_eq!(pieces(&map), vec![(10, 8)]);
    }

    #[test]
    fn test_merge_overlapping_and_adjacent() {
        let mut map: PieceMap = [(0, 10), (5, 10), (15, 5), (30, 2), (31, 1)]
            .into_iter()
            .collect();
        map.merge();
        assert_eq!(pieces(&map), vec![(0, 20), (30, 2)]);
    }

    #[test]
    fn test_take_full_groups_keeps_remainders() {
        let mut map: PieceMap = [(50, 300)].into_iter().collect();
        let groups = map.take_full_groups(100);

        assert_eq!(groups.into_iter().collect::<Vec<_>>(), vec![100, 200]);
        assert_eq!(pieces(&map), vec![(50, 50), (300, 50)]);
    }

    #[test]
    fn test_take_full_groups_partial_only() {
        let mut map: PieceMap = [(10, 50)].into_iter().collect();
        assert!(map.take_full_groups(100).is_empty());
        assert_eq!(pieces(&map), vec![(10, 50)]);
    }

    #[test]
    fn test_pieces_complete_a_group_together() {
        let mut map: PieceMap = [(0, 60)].into_iter().collect();
        assert!(map.take_full_groups(100).is_empty());

        map.add(60, 40);
        let groups = map.take_full_groups(100);
        assert_eq!(groups.into_iter().collect::<Vec<_>>(), vec![0]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_take_all_groups() {
        let mut map: PieceMap = [(10, 5), (150, 100)].into_iter().collect();
        let groups = map.take_all_groups(100);
        assert_eq!(groups.into_iter().collect::<Vec<_>>(), vec![0, 100, 200]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_by_group_splits_at_boundaries() {
        let map: PieceMap = [(90, 20), (250, 10)].into_iter().collect();
        let split = map.by_group(100);

        assert_eq!(pieces(&split[&0]), vec![(90, 10)]);
        assert_eq!(pieces(&split[&100]), vec![(100, 10)]);
        assert_eq!(pieces(&split[&200]), vec![(250, 10)]);
    }
}
