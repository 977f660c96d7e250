// src/memory/paging.rs
//
// The paging engine: frame allocation from the RAM device, on-demand
// range mapping into an address space, page copies between physical
// devices, and VMA limit growth with rollback.

use log::{debug, trace};

use crate::kernel::Kernel;

use super::address_space::AddressSpace;
use super::memphy::Memphy;
use super::vma::VmRegion;
use super::{page_align_up, page_num, Addr, AsId, Fpn, MemError, MAX_PGN, PAGE_SIZE};

// ============================================================================
// Frame allocation
// ============================================================================

/// Pull `req_pgnum` frames from the RAM device onto a fresh list bound
/// to `owner`.
///
/// Exhaustion is the distinct `NoFreeFrame` condition, separate from
/// any other failure; the frames taken so far are returned to the
/// device so a failed request leaves no observable state behind.
pub fn alloc_pages_range(
    krnl: &Kernel,
    owner: AsId,
    req_pgnum: usize,
) -> Result<Vec<Fpn>, MemError> {
    let mut mram = krnl.mram.lock();
    let mut frames = Vec::with_capacity(req_pgnum);
    for _ in 0..req_pgnum {
        match mram.get_usedfp(owner) {
            Ok(fpn) => frames.push(fpn),
            Err(MemError::NoFreeFrame) => {
                for fpn in frames {
                    let _ = mram.free_usedfp(fpn);
                }
                return Err(MemError::NoFreeFrame);
            }
            Err(e) => return Err(e),
        }
    }
    trace!("alloc_pages_range: owner {} got {:?}", owner, frames);
    Ok(frames)
}

// ============================================================================
// Range mapping
// ============================================================================

/// Write a resident PTE for each frame, page by page from `addr`, and
/// append every mapped page number to the FIFO queue tail. Returns the
/// mapped region `[addr, addr + n*P)`.
pub fn vmap_page_range(
    mm: &mut AddressSpace,
    addr: Addr,
    frames: &[Fpn],
) -> Result<VmRegion, MemError> {
    for (i, &fpn) in frames.iter().enumerate() {
        let pgn = page_num(addr + i as u64 * PAGE_SIZE);
        let mut pte = mm.pte(pgn);
        pte.set_fpn(fpn);
        mm.set_pte(pgn, pte)?;
        mm.push_fifo_pgn(pgn);
    }
    Ok(VmRegion::new(addr, addr + frames.len() as u64 * PAGE_SIZE))
}

/// Zero-initialise `pgnum` page-table entries starting at `addr`
/// (page aligned).
pub fn vmap_pgd_memset(mm: &mut AddressSpace, addr: Addr, pgnum: u64) -> Result<(), MemError> {
    for i in 0..pgnum {
        let pgn = page_num(addr + i * PAGE_SIZE);
        mm.set_pte(pgn, super::pte::Pte::EMPTY)?;
    }
    Ok(())
}

/// Allocate and map `incpgnum` fresh pages at `map_start`. Out of
/// memory is a hard failure here; swapping in on allocation is a
/// planned extension.
pub fn vm_map_ram(
    krnl: &Kernel,
    mm: &mut AddressSpace,
    map_start: Addr,
    incpgnum: usize,
) -> Result<VmRegion, MemError> {
    let frames = alloc_pages_range(krnl, mm.id(), incpgnum)?;
    vmap_page_range(mm, map_start, &frames)
}

// ============================================================================
// Swap copy
// ============================================================================

/// Byte-by-byte copy of one page between two physical devices.
pub fn swap_cp_page(
    src: &mut Memphy,
    src_fpn: Fpn,
    dst: &mut Memphy,
    dst_fpn: Fpn,
) -> Result<(), MemError> {
    for cell in 0..PAGE_SIZE {
        let byte = src.read(src_fpn * PAGE_SIZE + cell)?;
        dst.write(dst_fpn * PAGE_SIZE + cell, byte)?;
    }
    Ok(())
}

// ============================================================================
// VMA growth
// ============================================================================

/// Grow VMA `vmaid` by `inc_sz` bytes, rounded up to whole pages, and
/// map the new pages. Growth past the addressable range (`MAX_PGN`
/// pages) is out of bounds. On any failure both `vm_end` and `sbrk`
/// are restored to their saved values.
pub fn inc_vma_limit(
    krnl: &Kernel,
    mm: &mut AddressSpace,
    vmaid: u32,
    inc_sz: u64,
) -> Result<(), MemError> {
    let inc_amt = page_align_up(inc_sz);
    let incnumpage = (inc_amt / PAGE_SIZE) as usize;

    let vma = mm.vmas_mut().get_mut(vmaid).ok_or(MemError::NotFound)?;
    let old_end = vma.end;
    let old_sbrk = vma.sbrk;

    // Tentatively advance, then validate and map; roll back on failure.
    vma.end += inc_amt;
    vma.sbrk += inc_sz;
    let new_range = vma.range();

    let rollback = |mm: &mut AddressSpace| {
        let vma = mm.vmas_mut().get_mut(vmaid).expect("vma existed above");
        vma.end = old_end;
        vma.sbrk = old_sbrk;
    };

    if new_range.end > MAX_PGN * PAGE_SIZE {
        rollback(mm);
        return Err(MemError::OutOfBounds);
    }
    if new_range.is_empty()
        || mm
            .vmas()
            .validate_no_overlap(new_range, vmaid)
            .is_err()
    {
        rollback(mm);
        return Err(MemError::Overlap);
    }

    if let Err(e) = vm_map_ram(krnl, mm, old_end, incnumpage) {
        rollback(mm);
        return Err(e);
    }

    debug!(
        "inc_vma_limit: as {} vma {} grew to [{:#x},{:#x}) sbrk {:#x}",
        mm.id(),
        vmaid,
        new_range.start,
        new_range.end,
        old_sbrk + inc_sz,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;
    use crate::memory::vma::Vma;

    fn small_kernel(ram_frames: u64) -> Kernel {
        Kernel::new(ram_frames * PAGE_SIZE, [4 * PAGE_SIZE, 0, 0, 0])
    }

    #[test]
    fn allocation_failure_returns_taken_frames() {
        let krnl = small_kernel(2);
        let err = alloc_pages_range(&krnl, 1, 3).unwrap_err();
        assert_eq!(err, MemError::NoFreeFrame);
        assert_eq!(krnl.mram.lock().stats().free_frames, 2);
        // The device is untouched, so a smaller request still succeeds.
        assert_eq!(alloc_pages_range(&krnl, 1, 2).unwrap().len(), 2);
    }

    #[test]
    fn mapped_ranges_enter_the_fifo_in_page_order() {
        let krnl = small_kernel(4);
        let mut mm = AddressSpace::new(1);
        let rg = vm_map_ram(&krnl, &mut mm, 0, 3).unwrap();
        assert_eq!(rg, VmRegion::new(0, 3 * PAGE_SIZE));
        assert_eq!(mm.fifo_pgns().iter().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        for pgn in 0..3 {
            assert!(mm.pte(pgn).is_resident());
        }
        assert_eq!(krnl.mram.lock().find_frame(mm.pte(0).fpn()), Some(1));
    }

    #[test]
    fn memset_range_zeroes_the_entries() {
        let krnl = small_kernel(4);
        let mut mm = AddressSpace::new(1);
        vm_map_ram(&krnl, &mut mm, 0, 2).unwrap();
        vmap_pgd_memset(&mut mm, 0, 2).unwrap();
        assert_eq!(mm.pte(0), crate::memory::pte::Pte::EMPTY);
        assert_eq!(mm.pte(1), crate::memory::pte::Pte::EMPTY);
    }

    #[test]
    fn swap_copy_round_trips_frame_content() {
        let mut a = Memphy::new(2 * PAGE_SIZE, true);
        let mut b = Memphy::new(2 * PAGE_SIZE, true);
        for cell in 0..PAGE_SIZE {
            a.write(PAGE_SIZE + cell, (cell % 251) as u8).unwrap();
        }
        swap_cp_page(&mut a, 1, &mut b, 0).unwrap();
        // Clobber the source, then copy back.
        for cell in 0..PAGE_SIZE {
            a.write(PAGE_SIZE + cell, 0xFF).unwrap();
        }
        swap_cp_page(&mut b, 0, &mut a, 1).unwrap();
        for cell in 0..PAGE_SIZE {
            assert_eq!(a.read(PAGE_SIZE + cell).unwrap(), (cell % 251) as u8);
        }
    }

    #[test]
    fn heap_growth_advances_end_by_pages_and_sbrk_by_bytes() {
        let krnl = small_kernel(8);
        let mut mm = AddressSpace::new(1);
        inc_vma_limit(&krnl, &mut mm, 0, 100).unwrap();
        let vma = mm.vmas().get(0).unwrap();
        assert_eq!(vma.end, page_align_up(100));
        assert_eq!(vma.sbrk, 100);
        assert_eq!(mm.fifo_pgns().len(), (page_align_up(100) / PAGE_SIZE) as usize);
    }

    #[test]
    fn growth_into_a_neighbour_rolls_back() {
        let krnl = small_kernel(8);
        let mut mm = AddressSpace::new(1);
        mm.vmas_mut()
            .add(Vma::new(1, PAGE_SIZE, 2 * PAGE_SIZE))
            .unwrap();
        let err = inc_vma_limit(&krnl, &mut mm, 0, 2 * PAGE_SIZE).unwrap_err();
        assert_eq!(err, MemError::Overlap);
        let vma = mm.vmas().get(0).unwrap();
        assert_eq!((vma.start, vma.end, vma.sbrk), (0, 0, 0));
        assert!(mm.fifo_pgns().is_empty());
        assert_eq!(krnl.mram.lock().stats().used_frames, 0);
    }

    #[test]
    fn growth_past_the_addressable_range_rolls_back() {
        let krnl = small_kernel(2);
        let mut mm = AddressSpace::new(1);
        let err = inc_vma_limit(&krnl, &mut mm, 0, MAX_PGN * PAGE_SIZE + 1).unwrap_err();
        assert_eq!(err, MemError::OutOfBounds);
        let vma = mm.vmas().get(0).unwrap();
        assert_eq!((vma.end, vma.sbrk), (0, 0));
        assert_eq!(krnl.mram.lock().stats().used_frames, 0);
    }

    #[test]
    fn growth_without_frames_rolls_back() {
        let krnl = small_kernel(1);
        let mut mm = AddressSpace::new(1);
        let err = inc_vma_limit(&krnl, &mut mm, 0, 2 * PAGE_SIZE).unwrap_err();
        assert_eq!(err, MemError::NoFreeFrame);
        let vma = mm.vmas().get(0).unwrap();
        assert_eq!((vma.end, vma.sbrk), (0, 0));
        assert_eq!(krnl.mram.lock().stats().free_frames, 1);
    }

    #[test]
    fn growth_of_a_missing_vma_is_a_miss() {
        let krnl = small_kernel(2);
        let mut mm = AddressSpace::new(1);
        assert_eq!(
            inc_vma_limit(&krnl, &mut mm, 9, 100),
            Err(MemError::NotFound)
        );
    }
}
