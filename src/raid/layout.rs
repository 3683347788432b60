//! Double Parity Group Layout
//!
//! Pure index arithmetic for one double parity group. A group with `n`
//! data stripes is `n` rows of `n + 2` blocks. Blocks are numbered row by
//! row ("big" index); the column is the logical stripe the block lives on.
//!
//! ```text
//!            data stripes           P     DP
//!          ┌────┬────┬────┬────┐  ┌────┐ ┌────┐
//!  row 0   │  0 │  1 │  2 │  3 │  │  4 │ │  5 │
//!  row 1   │  6 │  7 │  8 │  9 │  │ 10 │ │ 11 │
//!  row 2   │ 12 │ 13 │ 14 │ 15 │  │ 16 │ │ 17 │
//!  row 3   │ 18 │ 19 │ 20 │ 21 │  │ 22 │ │ 23 │
//!          └────┴────┴────┴────┘  └────┘ └────┘
//! ```
//!
//! Data blocks are also addressed densely ("small" index, `0..n²`) in file
//! order. `P` of a row is the XOR of the row's data blocks. Diagonal `k`
//! holds the block at column `(k + r) mod (n + 1)` of every row `r`, so it
//! crosses the `P` column once. Its XOR is stored in `DP` of row `k`.
//! Diagonal `n` passes through block `n` (row 0 parity) and is not stored.

/// Index arithmetic of a double parity group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagonalLayout {
    n_data: usize,
}

impl DiagonalLayout {
    pub fn new(n_data: usize) -> Self {
        Self { n_data }
    }

    /// Data stripes (and rows) per group
    pub fn n_data(&self) -> usize {
        self.n_data
    }

    /// Blocks per row: data + parity + diagonal parity
    pub fn row_width(&self) -> usize {
        self.n_data + 2
    }

    /// Rows per group
    pub fn rows(&self) -> usize {
        self.n_data
    }

    /// Data blocks per group
    pub fn data_blocks(&self) -> usize {
        self.n_data * self.n_data
    }

    /// All blocks of a group
    pub fn total_blocks(&self) -> usize {
        self.n_data * self.row_width()
    }

    /// Dense data index to big index
    pub fn small_to_big(&self, small: usize) -> usize {
        (small / self.n_data) * self.row_width() + small % self.n_data
    }

    /// Big index to dense data index, `None` for parity blocks
    pub fn big_to_small(&self, big: usize) -> Option<usize> {
        let (col, row) = self.locate(big);
        (col < self.n_data).then(|| row * self.n_data + col)
    }

    /// `(logical stripe, row)` of a block
    pub fn locate(&self, big: usize) -> (usize, usize) {
        (big % self.row_width(), big / self.row_width())
    }

    /// Big index of the block at `(column, row)`
    pub fn index(&self, col: usize, row: usize) -> usize {
        row * self.row_width() + col
    }

    /// Simple parity block of a row
    pub fn parity_block(&self, row: usize) -> usize {
        self.index(self.n_data, row)
    }

    /// Diagonal parity block storing diagonal `k`
    pub fn diagonal_parity_block(&self, k: usize) -> usize {
        self.index(self.n_data + 1, k)
    }

    pub fn is_parity(&self, big: usize) -> bool {
        self.locate(big).0 == self.n_data
    }

    pub fn is_diagonal_parity(&self, big: usize) -> bool {
        self.locate(big).0 == self.n_data + 1
    }

    /// Members of the row stripe of `big`: the row's data blocks followed
    /// by its parity. Diagonal parity blocks have no row stripe.
    pub fn horizontal_stripe(&self, big: usize) -> Option<Vec<usize>> {
        if self.is_diagonal_parity(big) {
            return None;
        }
        let row = self.locate(big).1;
        Some((0..=self.n_data).map(|col| self.index(col, row)).collect())
    }

    /// Diagonal that `big` lies on, `None` for the unstored diagonal
    pub fn diagonal_of(&self, big: usize) -> Option<usize> {
        let (col, row) = self.locate(big);
        let k = if col == self.n_data + 1 {
            row
        } else {
            let p = self.n_data + 1;
            (col + p - row % p) % p
        };
        (k < self.n_data).then_some(k)
    }

    /// Members of diagonal `k` in row order, followed by its parity block
    pub fn diagonal_members(&self, k: usize) -> Vec<usize> {
        let p = self.n_data + 1;
        let mut members: Vec<usize> = (0..self.rows())
            .map(|row| self.index((k + row) % p, row))
            .collect();
        members.push(self.diagonal_parity_block(k));
        members
    }

    /// Diagonal stripe through `big`, `None` on the unstored diagonal
    pub fn diagonal_stripe(&self, big: usize) -> Option<Vec<usize>> {
        self.diagonal_of(big).map(|k| self.diagonal_members(k))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut v: Vec<usize>) -> Vec<usize> {
        v.sort_unstable();
        v
    }

    #[test]
    fn test_geometry() {
        let layout = DiagonalLayout::new(4);
        assert_eq!(layout.row_width(), 6);
        assert_eq!(layout.data_blocks(), 16);
        assert_eq!(layout.total_blocks(), 24);
    }

    #[test]
    fn test_small_big_mapping() {
        let layout = DiagonalLayout::new(4);
        assert_eq!(layout.small_to_big(0), 0);
        assert_eq!(layout.small_to_big(3), 3);
        assert_eq!(layout.small_to_big(4), 6);
        assert_eq!(layout.small_to_big(15), 21);

        assert_eq!(layout.big_to_small(4), None);
        assert_eq!(layout.big_to_small(5), None);
        assert_eq!(layout.big_to_small(21), Some(15));
    }

    #[test]
    fn test_parity_positions() {
        let layout = DiagonalLayout::new(4);
        assert_eq!(layout.parity_block(0), 4);
        assert_eq!(layout.parity_block(3), 22);
        assert_eq!(layout.diagonal_parity_block(0), 5);
        assert_eq!(layout.diagonal_parity_block(3), 23);
        assert_eq!(layout.locate(23), (5, 3));
    }

    #[test]
    fn test_stored_diagonals() {
        let layout = DiagonalLayout::new(4);
        assert_eq!(layout.diagonal_members(0), vec![0, 7, 14, 21, 5]);
        assert_eq!(layout.diagonal_members(1), vec![1, 8, 15, 22, 11]);
        assert_eq!(sorted(layout.diagonal_members(2)), vec![2, 9, 16, 17, 18]);
        assert_eq!(sorted(layout.diagonal_members(3)), vec![3, 10, 12, 19, 23]);
    }

    #[test]
    fn test_unstored_diagonal() {
        let layout = DiagonalLayout::new(4);
        // Diagonal 4 runs through 4, 6, 13, 20
        for big in [4, 6, 13, 20] {
            assert_eq!(layout.diagonal_of(big), None);
            assert!(layout.diagonal_stripe(big).is_none());
        }
        assert_eq!(layout.diagonal_of(0), Some(0));
    }

    #[test]
    fn test_every_block_on_its_diagonal() {
        let layout = DiagonalLayout::new(4);
        for big in 0..layout.total_blocks() {
            if let Some(stripe) = layout.diagonal_stripe(big) {
                assert!(stripe.contains(&big), "block {} missing from its diagonal", big);
            }
        }
    }

    #[test]
    fn test_horizontal_stripe() {
        let layout = DiagonalLayout::new(4);
        assert_eq!(layout.horizontal_stripe(8), Some(vec![6, 7, 8, 9, 10]));
        assert_eq!(layout.horizontal_stripe(10), Some(vec![6, 7, 8, 9, 10]));
        assert_eq!(layout.horizontal_stripe(11), None);
    }
}
