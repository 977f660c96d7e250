// src/memory/vma.rs
//
// Virtual memory areas: half-open ranges of valid virtual addresses,
// each with a program break and a free-region list for symbol
// allocation. An address space keeps its VMAs in ascending id order
// and never lets two of them overlap.

use super::{Addr, MemError};

// ============================================================================
// Regions
// ============================================================================

/// Half-open virtual range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmRegion {
    pub start: Addr,
    pub end: Addr,
}

impl VmRegion {
    pub fn new(start: Addr, end: Addr) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, addr: Addr) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Half-open overlap: empty regions never overlap anything.
    pub fn overlaps(&self, other: &VmRegion) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ============================================================================
// One VMA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vma {
    pub id: u32,
    pub start: Addr,
    pub end: Addr,
    /// Program break: `start <= sbrk <= end`.
    pub sbrk: Addr,
    /// Sub-ranges not currently bound to a symbol. Head of the list is
    /// the first element; a freed region is reused first.
    pub free_regions: Vec<VmRegion>,
}

impl Vma {
    /// A fresh VMA: break at `start`, free list holding a single
    /// zero-length region.
    pub fn new(id: u32, start: Addr, end: Addr) -> Self {
        Self {
            id,
            start,
            end,
            sbrk: start,
            free_regions: vec![VmRegion::new(start, start)],
        }
    }

    pub fn range(&self) -> VmRegion {
        VmRegion::new(self.start, self.end)
    }

    pub fn overlaps(&self, other: &Vma) -> bool {
        self.range().overlaps(&other.range())
    }

    // ====================================================================
    // FREE-REGION LIST
    // ====================================================================

    /// First-fit carve of `size` bytes from the free list. The donor
    /// region keeps its tail (possibly zero-length).
    pub fn take_free_region(&mut self, size: u64) -> Option<VmRegion> {
        let rg = self.free_regions.iter_mut().find(|rg| rg.len() >= size)?;
        let carved = VmRegion::new(rg.start, rg.start + size);
        rg.start += size;
        Some(carved)
    }

    /// Return a region to the head of the free list.
    pub fn return_region(&mut self, rg: VmRegion) {
        self.free_regions.insert(0, rg);
    }

    // ====================================================================
    // MERGE / SPLIT
    // ====================================================================

    /// Merge an adjacent VMA into this one, consuming it. The result
    /// covers the union, keeps the larger program break and the
    /// concatenated free lists.
    pub fn merge(&mut self, other: Vma) -> Result<(), MemError> {
        if self.end != other.start && other.end != self.start {
            return Err(MemError::Overlap);
        }
        self.start = self.start.min(other.start);
        self.end = self.end.max(other.end);
        self.sbrk = self.sbrk.max(other.sbrk);
        self.free_regions.extend(other.free_regions);
        Ok(())
    }

    /// Split at `addr`, strictly inside the range. `self` keeps the
    /// lower half with its break clamped; the returned VMA covers
    /// `[addr, end)` under id `self.id + 1`. Free regions that straddle
    /// the cut are themselves split.
    pub fn split(&mut self, addr: Addr) -> Result<Vma, MemError> {
        if addr <= self.start || addr >= self.end {
            return Err(MemError::OutOfBounds);
        }

        let mut upper = Vma {
            id: self.id + 1,
            start: addr,
            end: self.end,
            sbrk: self.sbrk.max(addr),
            free_regions: Vec::new(),
        };

        let mut lower_regions = Vec::new();
        for rg in self.free_regions.drain(..) {
            if rg.end <= addr {
                lower_regions.push(rg);
            } else if rg.start >= addr {
                upper.free_regions.push(rg);
            } else {
                lower_regions.push(VmRegion::new(rg.start, addr));
                upper.free_regions.push(VmRegion::new(addr, rg.end));
            }
        }
        self.free_regions = lower_regions;
        self.end = addr;
        self.sbrk = self.sbrk.min(addr);

        Ok(upper)
    }
}

// ============================================================================
// The VMA list of one address space
// ============================================================================

#[derive(Debug, Default)]
pub struct VmaList {
    vmas: Vec<Vma>,
}

impl VmaList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vma> {
        self.vmas.iter()
    }

    pub fn len(&self) -> usize {
        self.vmas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vmas.is_empty()
    }

    /// Linear lookup by id. A missing id is a miss, not a walk off the
    /// end of the list.
    pub fn get(&self, id: u32) -> Option<&Vma> {
        self.vmas.iter().find(|v| v.id == id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Vma> {
        self.vmas.iter_mut().find(|v| v.id == id)
    }

    /// Insert in ascending id order. Rejects a range overlap with any
    /// existing VMA, and a duplicate id.
    pub fn add(&mut self, vma: Vma) -> Result<(), MemError> {
        if self.vmas.iter().any(|v| v.overlaps(&vma) || v.id == vma.id) {
            return Err(MemError::Overlap);
        }
        let pos = self.vmas.partition_point(|v| v.id < vma.id);
        self.vmas.insert(pos, vma);
        Ok(())
    }

    /// Unlink and return the VMA, with all its region nodes.
    pub fn remove(&mut self, id: u32) -> Result<Vma, MemError> {
        let pos = self
            .vmas
            .iter()
            .position(|v| v.id == id)
            .ok_or(MemError::NotFound)?;
        Ok(self.vmas.remove(pos))
    }

    /// Merge VMA `b_id` into VMA `a_id` (they must be adjacent).
    /// On failure `b` stays in the list untouched.
    pub fn merge(&mut self, a_id: u32, b_id: u32) -> Result<(), MemError> {
        if a_id == b_id || self.get(a_id).is_none() {
            return Err(MemError::NotFound);
        }
        let b = self.remove(b_id)?;
        let a = self.get_mut(a_id).expect("checked above");
        if a.end != b.start && b.end != a.start {
            let err = MemError::Overlap;
            self.add(b).expect("b came out of this list");
            return Err(err);
        }
        self.get_mut(a_id).expect("checked above").merge(b)
    }

    /// Split VMA `id` at `addr`; the upper half enters the list under
    /// id `id + 1`, which must be unused.
    pub fn split(&mut self, id: u32, addr: Addr) -> Result<u32, MemError> {
        if self.get(id + 1).is_some() {
            return Err(MemError::Overlap);
        }
        let vma = self.get_mut(id).ok_or(MemError::NotFound)?;
        let upper = vma.split(addr)?;
        let new_id = upper.id;
        self.add(upper)?;
        Ok(new_id)
    }

    /// Would `range` collide with any VMA other than `exclude_id`?
    pub fn validate_no_overlap(&self, range: VmRegion, exclude_id: u32) -> Result<(), MemError> {
        if self
            .vmas
            .iter()
            .any(|v| v.id != exclude_id && v.range().overlaps(&range))
        {
            return Err(MemError::Overlap);
        }
        Ok(())
    }

    /// Structural invariants: disjoint ranges, ascending ids, break and
    /// free regions inside every VMA.
    pub fn invariants_hold(&self) -> bool {
        let ids_ascend = self.vmas.windows(2).all(|w| w[0].id < w[1].id);
        let disjoint = self
            .vmas
            .iter()
            .enumerate()
            .all(|(i, v)| !self.vmas[i + 1..].iter().any(|w| v.overlaps(w)));
        let well_formed = self.vmas.iter().all(|v| {
            v.start <= v.sbrk
                && v.sbrk <= v.end
                && v.free_regions
                    .iter()
                    .all(|rg| rg.start >= v.start && rg.end <= v.end && rg.start <= rg.end)
        });
        ids_ascend && disjoint && well_formed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_vma_starts_with_one_zero_length_region() {
        let vma = Vma::new(0, 0x100, 0x100);
        assert_eq!(vma.sbrk, 0x100);
        assert_eq!(vma.free_regions, vec![VmRegion::new(0x100, 0x100)]);
    }

    #[test]
    fn add_rejects_overlap_and_keeps_state_unchanged() {
        let mut list = VmaList::new();
        list.add(Vma::new(0, 0, 1000)).unwrap();
        let before: Vec<Vma> = list.iter().cloned().collect();
        assert_eq!(list.add(Vma::new(1, 500, 1500)), Err(MemError::Overlap));
        let after: Vec<Vma> = list.iter().cloned().collect();
        assert_eq!(before, after);
        assert!(list.invariants_hold());
    }

    #[test]
    fn add_then_remove_restores_the_list() {
        let mut list = VmaList::new();
        list.add(Vma::new(0, 0, 1000)).unwrap();
        let before: Vec<Vma> = list.iter().cloned().collect();
        list.add(Vma::new(2, 4000, 5000)).unwrap();
        list.remove(2).unwrap();
        let after: Vec<Vma> = list.iter().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn vmas_are_kept_in_ascending_id_order() {
        let mut list = VmaList::new();
        list.add(Vma::new(4, 4000, 5000)).unwrap();
        list.add(Vma::new(1, 1000, 2000)).unwrap();
        list.add(Vma::new(2, 2000, 3000)).unwrap();
        let ids: Vec<u32> = list.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![1, 2, 4]);
        assert!(list.invariants_hold());
    }

    #[test]
    fn lookup_of_a_missing_id_is_a_miss() {
        let mut list = VmaList::new();
        list.add(Vma::new(0, 0, 100)).unwrap();
        assert!(list.get(7).is_none());
        assert_eq!(list.remove(7), Err(MemError::NotFound));
    }

    #[test]
    fn merge_requires_adjacency_and_keeps_the_larger_break() {
        let mut a = Vma::new(0, 0, 1000);
        a.sbrk = 700;
        let mut b = Vma::new(1, 1000, 2000);
        b.sbrk = 1200;
        a.merge(b).unwrap();
        assert_eq!(a.range(), VmRegion::new(0, 2000));
        assert_eq!(a.sbrk, 1200);

        let mut c = Vma::new(2, 5000, 6000);
        assert_eq!(c.merge(Vma::new(3, 0, 100)), Err(MemError::Overlap));
    }

    #[test]
    fn merge_accepts_the_symmetric_order() {
        let mut a = Vma::new(1, 1000, 2000);
        let b = Vma::new(0, 0, 1000);
        a.merge(b).unwrap();
        assert_eq!(a.range(), VmRegion::new(0, 2000));
    }

    #[test]
    fn split_partitions_free_regions_at_the_cut() {
        let mut vma = Vma::new(0, 0, 1000);
        vma.sbrk = 900;
        vma.free_regions = vec![
            VmRegion::new(100, 300),
            VmRegion::new(400, 600),
            VmRegion::new(700, 800),
        ];
        let upper = vma.split(500).unwrap();

        assert_eq!(vma.range(), VmRegion::new(0, 500));
        assert_eq!(vma.sbrk, 500);
        assert_eq!(
            vma.free_regions,
            vec![VmRegion::new(100, 300), VmRegion::new(400, 500)]
        );

        assert_eq!(upper.id, 1);
        assert_eq!(upper.range(), VmRegion::new(500, 1000));
        assert_eq!(upper.sbrk, 900);
        assert_eq!(
            upper.free_regions,
            vec![VmRegion::new(500, 600), VmRegion::new(700, 800)]
        );
    }

    #[test]
    fn split_outside_the_range_fails() {
        let mut vma = Vma::new(0, 100, 200);
        assert_eq!(vma.split(100), Err(MemError::OutOfBounds));
        assert_eq!(vma.split(200), Err(MemError::OutOfBounds));
    }

    #[test]
    fn split_then_merge_round_trips_the_range() {
        let mut list = VmaList::new();
        list.add(Vma::new(0, 0, 1000)).unwrap();
        let new_id = list.split(0, 400).unwrap();
        assert!(list.invariants_hold());
        list.merge(0, new_id).unwrap();
        assert_eq!(list.get(0).unwrap().range(), VmRegion::new(0, 1000));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn carve_and_return_reuse_the_freed_region_first() {
        let mut vma = Vma::new(0, 0, 0x400);
        vma.free_regions = vec![VmRegion::new(0, 0x300)];
        let rg = vma.take_free_region(0x100).unwrap();
        assert_eq!(rg, VmRegion::new(0, 0x100));
        assert_eq!(vma.free_regions[0], VmRegion::new(0x100, 0x300));
        vma.return_region(rg);
        let again = vma.take_free_region(0x80).unwrap();
        assert_eq!(again, VmRegion::new(0, 0x80));
    }
}
