// src/memory/address_space.rs
//
// AddressSpace: groups a process's page-table root, VMA list,
// symbol/region table and the FIFO victim queue into a single owned
// unit. Dropping it frees every page-table level, every VMA and
// region node, and the queue in one go.
//
// An address space is born with one empty VMA (id 0) and grows through
// VMA extensions and PTE writes.

use std::collections::VecDeque;
use std::fmt::Write as _;

use super::page_table::PageDirectory;
use super::pte::Pte;
use super::vma::{Vma, VmaList, VmRegion};
use super::{AsId, MemError, Pgn, SYM_TABLE_SIZE};

#[derive(Debug)]
pub struct AddressSpace {
    id: AsId,
    pgd: PageDirectory,
    vmas: VmaList,
    /// Region currently bound to each user-supplied symbol id; the
    /// empty region means "unbound".
    symrgtbl: [VmRegion; SYM_TABLE_SIZE],
    /// Pages in mapping order; the default victim selector takes the
    /// head. Mutated only on behalf of the owning process, inside its
    /// CPU turn.
    fifo_pgn: VecDeque<Pgn>,
}

impl AddressSpace {
    pub fn new(id: AsId) -> Self {
        let mut vmas = VmaList::new();
        vmas.add(Vma::new(0, 0, 0)).expect("first vma in empty list");
        Self {
            id,
            pgd: PageDirectory::new(),
            vmas,
            symrgtbl: [VmRegion::default(); SYM_TABLE_SIZE],
            fifo_pgn: VecDeque::new(),
        }
    }

    pub fn id(&self) -> AsId {
        self.id
    }

    // ====================================================================
    // PAGE TABLE
    // ====================================================================

    pub fn pte(&self, pgn: Pgn) -> Pte {
        self.pgd.get(pgn)
    }

    pub fn set_pte(&mut self, pgn: Pgn, pte: Pte) -> Result<(), MemError> {
        self.pgd.set(pgn, pte)
    }

    /// Lowest-numbered page that is resident in RAM, if any. Victim
    /// fallback for an empty FIFO.
    pub fn find_any_resident(&self) -> Option<(Pgn, Pte)> {
        let mut found = None;
        self.pgd.for_each_present(|pgn, pte| {
            if found.is_none() && pte.is_resident() {
                found = Some((pgn, pte));
            }
        });
        found
    }

    // ====================================================================
    // VMAS
    // ====================================================================

    pub fn vmas(&self) -> &VmaList {
        &self.vmas
    }

    pub fn vmas_mut(&mut self) -> &mut VmaList {
        &mut self.vmas
    }

    // ====================================================================
    // SYMBOL / REGION TABLE
    // ====================================================================

    pub fn symbol(&self, rgid: u32) -> Result<VmRegion, MemError> {
        self.symrgtbl
            .get(rgid as usize)
            .copied()
            .ok_or(MemError::OutOfBounds)
    }

    pub fn bind_symbol(&mut self, rgid: u32, rg: VmRegion) -> Result<(), MemError> {
        let slot = self
            .symrgtbl
            .get_mut(rgid as usize)
            .ok_or(MemError::OutOfBounds)?;
        *slot = rg;
        Ok(())
    }

    pub fn clear_symbol(&mut self, rgid: u32) -> Result<(), MemError> {
        self.bind_symbol(rgid, VmRegion::default())
    }

    // ====================================================================
    // FIFO VICTIM QUEUE
    // ====================================================================

    /// Append a freshly mapped (or re-resident) page to the tail.
    pub fn push_fifo_pgn(&mut self, pgn: Pgn) {
        self.fifo_pgn.push_back(pgn);
    }

    /// Oldest mapped page, from the head.
    pub fn pop_victim_pgn(&mut self) -> Option<Pgn> {
        self.fifo_pgn.pop_front()
    }

    pub fn fifo_pgns(&self) -> &VecDeque<Pgn> {
        &self.fifo_pgn
    }

    // ====================================================================
    // DUMP
    // ====================================================================

    /// Render the initialised page-table entries in `[start, end)`.
    pub fn dump_page_table(&self, start: Pgn, end: Pgn) -> String {
        let mut out = String::new();
        self.pgd.for_each_present(|pgn, pte| {
            if pgn < start || pgn >= end {
                return;
            }
            if pte.is_swapped() {
                let _ = writeln!(
                    out,
                    "PGN[{}]: SWAPPED(typ:{} off:{})",
                    pgn,
                    pte.swap_type(),
                    pte.swap_off()
                );
            } else {
                let _ = writeln!(out, "PGN[{}]: FPN[{}]", pgn, pte.fpn());
            }
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn born_with_one_empty_vma_and_clean_tables() {
        let mm = AddressSpace::new(1);
        assert_eq!(mm.vmas().len(), 1);
        let vma0 = mm.vmas().get(0).unwrap();
        assert_eq!((vma0.start, vma0.end, vma0.sbrk), (0, 0, 0));
        assert_eq!(mm.symbol(0), Ok(VmRegion::default()));
        assert!(mm.fifo_pgns().is_empty());
        assert_eq!(mm.pte(0), Pte::EMPTY);
    }

    #[test]
    fn symbol_table_is_bounds_checked() {
        let mut mm = AddressSpace::new(1);
        assert_eq!(
            mm.symbol(SYM_TABLE_SIZE as u32),
            Err(MemError::OutOfBounds)
        );
        mm.bind_symbol(3, VmRegion::new(0, 100)).unwrap();
        assert_eq!(mm.symbol(3), Ok(VmRegion::new(0, 100)));
        mm.clear_symbol(3).unwrap();
        assert!(mm.symbol(3).unwrap().is_empty());
    }

    #[test]
    fn fifo_queue_is_first_in_first_out() {
        let mut mm = AddressSpace::new(1);
        mm.push_fifo_pgn(4);
        mm.push_fifo_pgn(9);
        assert_eq!(mm.pop_victim_pgn(), Some(4));
        assert_eq!(mm.pop_victim_pgn(), Some(9));
        assert_eq!(mm.pop_victim_pgn(), None);
    }

    #[test]
    fn dump_shows_resident_and_swapped_entries() {
        let mut mm = AddressSpace::new(1);
        mm.set_pte(0, Pte::init(true, 3, false, 0, 0).unwrap()).unwrap();
        mm.set_pte(1, Pte::init(true, 0, true, 2, 9).unwrap()).unwrap();
        let dump = mm.dump_page_table(0, 16);
        assert!(dump.contains("PGN[0]: FPN[3]"));
        assert!(dump.contains("PGN[1]: SWAPPED(typ:2 off:9)"));
    }
}
