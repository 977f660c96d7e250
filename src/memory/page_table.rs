// src/memory/page_table.rs
//
// Page-table roots, two layouts:
//
//   - FlatTable: one array of PTE words, page numbers index directly
//     (the 32-bit configuration).
//   - MultiLevelTable: five levels of 512-entry directories
//     (PGD -> P4D -> PUD -> PMD -> PT), intermediate levels allocated
//     lazily on first write (the 64-bit configuration).
//
// The `mm64` feature picks the layout the address space uses; both are
// always compiled. Reads through an absent level return the zero word;
// writes past the addressable range fail.

use super::pte::Pte;
use super::{MemError, Pgn};

/// Entries in the flat root: 4 MiB of virtual space in 256-byte pages.
pub const FLAT_TABLE_ENTRIES: u64 = 1 << 14;

/// Geometry of one directory level in the five-level tree.
pub const LEVEL_BITS: u32 = 9;
pub const LEVEL_ENTRIES: usize = 1 << LEVEL_BITS;
const LEVEL_MASK: u64 = (LEVEL_ENTRIES as u64) - 1;

/// Page numbers addressable by five 9-bit directory indices.
pub const MULTI_LEVEL_MAX_PGN: u64 = 1 << (5 * LEVEL_BITS);

/// The table layout the kernel is built with.
#[cfg(not(feature = "mm64"))]
pub type PageDirectory = FlatTable;
#[cfg(feature = "mm64")]
pub type PageDirectory = MultiLevelTable;

// ============================================================================
// Directory index decomposition
// ============================================================================

/// Directory indices of one page number, root first:
/// `[pgd, p4d, pud, pmd, pt]`, each in `0..512`.
pub fn page_directories(pgn: Pgn) -> [usize; 5] {
    [
        ((pgn >> (4 * LEVEL_BITS)) & LEVEL_MASK) as usize,
        ((pgn >> (3 * LEVEL_BITS)) & LEVEL_MASK) as usize,
        ((pgn >> (2 * LEVEL_BITS)) & LEVEL_MASK) as usize,
        ((pgn >> LEVEL_BITS) & LEVEL_MASK) as usize,
        (pgn & LEVEL_MASK) as usize,
    ]
}

// ============================================================================
// Flat single-level table
// ============================================================================

#[derive(Debug)]
pub struct FlatTable {
    entries: Vec<Pte>,
}

impl FlatTable {
    pub fn new() -> Self {
        Self {
            entries: vec![Pte::EMPTY; FLAT_TABLE_ENTRIES as usize],
        }
    }

    /// The zero word for any page number outside the table.
    pub fn get(&self, pgn: Pgn) -> Pte {
        self.entries
            .get(pgn as usize)
            .copied()
            .unwrap_or(Pte::EMPTY)
    }

    pub fn set(&mut self, pgn: Pgn, pte: Pte) -> Result<(), MemError> {
        let slot = self
            .entries
            .get_mut(pgn as usize)
            .ok_or(MemError::OutOfBounds)?;
        *slot = pte;
        Ok(())
    }

    /// Visit every initialised entry in page-number order.
    pub fn for_each_present(&self, mut f: impl FnMut(Pgn, Pte)) {
        for (pgn, pte) in self.entries.iter().enumerate() {
            if pte.is_present() {
                f(pgn as Pgn, *pte);
            }
        }
    }
}

impl Default for FlatTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Five-level table
// ============================================================================

// Each interior level is either absent or an owned 512-entry array of
// the next level; dropping the root frees the whole tree.

#[derive(Debug)]
struct PtLeaf {
    entries: Vec<Pte>,
}

impl PtLeaf {
    fn new() -> Box<Self> {
        Box::new(Self {
            entries: vec![Pte::EMPTY; LEVEL_ENTRIES],
        })
    }
}

#[derive(Debug)]
struct Pmd {
    pts: Vec<Option<Box<PtLeaf>>>,
}

#[derive(Debug)]
struct Pud {
    pmds: Vec<Option<Box<Pmd>>>,
}

#[derive(Debug)]
struct P4d {
    puds: Vec<Option<Box<Pud>>>,
}

fn empty_level<T>() -> Vec<Option<Box<T>>> {
    (0..LEVEL_ENTRIES).map(|_| None).collect()
}

#[derive(Debug)]
pub struct MultiLevelTable {
    pgd: Vec<Option<Box<P4d>>>,
}

impl MultiLevelTable {
    pub fn new() -> Self {
        Self { pgd: empty_level() }
    }

    /// The zero word when any intermediate level is absent or the page
    /// number exceeds the addressable range.
    pub fn get(&self, pgn: Pgn) -> Pte {
        if pgn >= MULTI_LEVEL_MAX_PGN {
            return Pte::EMPTY;
        }
        let [i1, i2, i3, i4, i5] = page_directories(pgn);
        let Some(p4d) = self.pgd[i1].as_ref() else {
            return Pte::EMPTY;
        };
        let Some(pud) = p4d.puds[i2].as_ref() else {
            return Pte::EMPTY;
        };
        let Some(pmd) = pud.pmds[i3].as_ref() else {
            return Pte::EMPTY;
        };
        let Some(pt) = pmd.pts[i4].as_ref() else {
            return Pte::EMPTY;
        };
        pt.entries[i5]
    }

    /// Write one entry, allocating zero-filled intermediate tables on
    /// the way down.
    pub fn set(&mut self, pgn: Pgn, pte: Pte) -> Result<(), MemError> {
        if pgn >= MULTI_LEVEL_MAX_PGN {
            return Err(MemError::OutOfBounds);
        }
        let [i1, i2, i3, i4, i5] = page_directories(pgn);
        let p4d = self.pgd[i1].get_or_insert_with(|| Box::new(P4d { puds: empty_level() }));
        let pud = p4d.puds[i2].get_or_insert_with(|| Box::new(Pud { pmds: empty_level() }));
        let pmd = pud.pmds[i3].get_or_insert_with(|| Box::new(Pmd { pts: empty_level() }));
        let pt = pmd.pts[i4].get_or_insert_with(PtLeaf::new);
        pt.entries[i5] = pte;
        Ok(())
    }

    /// Visit every initialised entry in page-number order.
    pub fn for_each_present(&self, mut f: impl FnMut(Pgn, Pte)) {
        for (i1, p4d) in self.pgd.iter().enumerate() {
            let Some(p4d) = p4d else { continue };
            for (i2, pud) in p4d.puds.iter().enumerate() {
                let Some(pud) = pud else { continue };
                for (i3, pmd) in pud.pmds.iter().enumerate() {
                    let Some(pmd) = pmd else { continue };
                    for (i4, pt) in pmd.pts.iter().enumerate() {
                        let Some(pt) = pt else { continue };
                        for (i5, pte) in pt.entries.iter().enumerate() {
                            if pte.is_present() {
                                let pgn = (i1 as u64) << (4 * LEVEL_BITS)
                                    | (i2 as u64) << (3 * LEVEL_BITS)
                                    | (i3 as u64) << (2 * LEVEL_BITS)
                                    | (i4 as u64) << LEVEL_BITS
                                    | i5 as u64;
                                f(pgn, *pte);
                            }
                        }
                    }
                }
            }
        }
    }
}

impl Default for MultiLevelTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_table_rejects_out_of_range_writes() {
        let mut pt = FlatTable::new();
        let pte = Pte::init(true, 7, false, 0, 0).unwrap();
        assert_eq!(pt.set(FLAT_TABLE_ENTRIES, pte), Err(MemError::OutOfBounds));
        pt.set(12, pte).unwrap();
        assert_eq!(pt.get(12), pte);
        assert_eq!(pt.get(FLAT_TABLE_ENTRIES + 1), Pte::EMPTY);
    }

    #[test]
    fn directory_indices_stay_in_range_at_the_boundaries() {
        assert_eq!(page_directories(0), [0, 0, 0, 0, 0]);
        let idx = page_directories(MULTI_LEVEL_MAX_PGN - 1);
        assert_eq!(idx, [511, 511, 511, 511, 511]);
        for i in idx {
            assert!(i < LEVEL_ENTRIES);
        }
        assert_eq!(page_directories(513), [0, 0, 0, 1, 1]);
    }

    #[test]
    fn multi_level_reads_return_zero_through_absent_levels() {
        let pt = MultiLevelTable::new();
        assert_eq!(pt.get(0), Pte::EMPTY);
        assert_eq!(pt.get(MULTI_LEVEL_MAX_PGN - 1), Pte::EMPTY);
        assert_eq!(pt.get(MULTI_LEVEL_MAX_PGN), Pte::EMPTY);
    }

    #[test]
    fn multi_level_write_allocates_levels_lazily() {
        let mut pt = MultiLevelTable::new();
        let pte = Pte::init(true, 3, false, 0, 0).unwrap();
        pt.set(MULTI_LEVEL_MAX_PGN - 1, pte).unwrap();
        assert_eq!(pt.get(MULTI_LEVEL_MAX_PGN - 1), pte);
        // A sibling under a different root entry is still absent.
        assert_eq!(pt.get(0), Pte::EMPTY);
        assert_eq!(pt.set(MULTI_LEVEL_MAX_PGN, pte), Err(MemError::OutOfBounds));
    }

    #[test]
    fn walks_visit_entries_in_page_number_order() {
        let mut pt = MultiLevelTable::new();
        let pte = Pte::init(true, 9, false, 0, 0).unwrap();
        for pgn in [513u64, 2, MULTI_LEVEL_MAX_PGN - 1] {
            pt.set(pgn, pte).unwrap();
        }
        let mut seen = Vec::new();
        pt.for_each_present(|pgn, _| seen.push(pgn));
        assert_eq!(seen, vec![2, 513, MULTI_LEVEL_MAX_PGN - 1]);
    }
}
