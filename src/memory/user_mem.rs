// src/memory/user_mem.rs
//
// User-facing memory operations driven by the instruction set: symbol
// region allocation and release, byte reads and writes with address
// translation, and the FIFO demand-fault path that brings a swapped
// page back into RAM.
//
// Everything here runs on behalf of the owning process, inside its CPU
// turn; the FIFO queue is never touched across CPUs.

use log::{debug, trace};

use crate::kernel::Kernel;
use crate::process::syscall::{sys_memmap, MemOp, SysRegs};
use crate::process::Pid;

use super::address_space::AddressSpace;
use super::paging::swap_cp_page;
use super::vma::VmRegion;
use super::{page_num, page_offset, Addr, Fpn, MemError, Pgn, PAGE_SIZE};

/// The heap VMA every process allocates from.
const HEAP_VMA: u32 = 0;

// ============================================================================
// Symbol regions
// ============================================================================

/// Bind `size` bytes to symbol `rgid`: first-fit from the heap VMA's
/// free list, else grow the VMA through the `SYSMEM_INC_OP` syscall
/// and take the region at the old program break.
pub fn alloc_region(
    krnl: &Kernel,
    mm: &mut AddressSpace,
    pid: Pid,
    rgid: u32,
    size: u64,
) -> Result<Addr, MemError> {
    mm.symbol(rgid)?;

    let vma = mm.vmas_mut().get_mut(HEAP_VMA).ok_or(MemError::NotFound)?;
    if let Some(rg) = vma.take_free_region(size) {
        mm.bind_symbol(rgid, rg)?;
        trace!("alloc_region: pid {} rgid {} reused {:#x}..{:#x}", pid, rgid, rg.start, rg.end);
        return Ok(rg.start);
    }

    let old_sbrk = mm.vmas().get(HEAP_VMA).ok_or(MemError::NotFound)?.sbrk;
    let mut regs = SysRegs {
        a1: MemOp::Inc as u64,
        a2: HEAP_VMA as u64,
        a3: size,
    };
    sys_memmap(krnl, pid, mm, &mut regs)?;

    let rg = VmRegion::new(old_sbrk, old_sbrk + size);
    mm.bind_symbol(rgid, rg)?;
    debug!(
        "alloc_region: pid {} rgid {} at {:#x} size {}",
        pid, rgid, rg.start, size
    );
    Ok(rg.start)
}

/// Unbind symbol `rgid` and return its region to the head of the heap
/// VMA's free list. An unbound symbol is a lookup miss.
pub fn free_region(mm: &mut AddressSpace, rgid: u32) -> Result<(), MemError> {
    let rg = mm.symbol(rgid)?;
    if rg.is_empty() {
        return Err(MemError::NotFound);
    }
    mm.vmas_mut()
        .get_mut(HEAP_VMA)
        .ok_or(MemError::NotFound)?
        .return_region(rg);
    mm.clear_symbol(rgid)?;
    Ok(())
}

// ============================================================================
// Demand fault
// ============================================================================

/// Resolve `pgn` to a RAM frame, swapping the page in if needed.
///
/// A page that was never mapped is a miss. A swapped page evicts the
/// FIFO-head victim (fallback: the lowest resident page): a dirty or
/// never-backed victim is first copied to a fresh slot on the active
/// swap device; a clean victim with a slot just flips back to the
/// swapped form, its slot still holding the bytes.
pub fn pg_getpage(
    krnl: &Kernel,
    mm: &mut AddressSpace,
    pid: Pid,
    pgn: Pgn,
) -> Result<Fpn, MemError> {
    let pte = mm.pte(pgn);
    if !pte.is_present() {
        return Err(MemError::NotFound);
    }
    if !pte.is_swapped() {
        return Ok(pte.fpn());
    }

    // 1. Pick a victim frame.
    let (vic_pgn, vic_pte) = loop {
        match mm.pop_victim_pgn() {
            Some(p) => {
                let cand = mm.pte(p);
                if cand.is_resident() {
                    break (p, cand);
                }
            }
            None => break mm.find_any_resident().ok_or(MemError::NoFreeFrame)?,
        }
    };
    let vic_fpn = vic_pte.fpn();

    // 2. Write the victim back.
    let active = krnl.active_swap_id();
    if vic_pte.is_dirty() || !vic_pte.is_backed() {
        let swp_fpn = krnl.swap(active).lock().get_usedfp(mm.id())?;
        if vic_pte.is_backed() {
            let _ = krnl
                .swap(vic_pte.swap_type() as usize)
                .lock()
                .free_usedfp(vic_pte.swap_off());
        }
        let mut regs = SysRegs {
            a1: MemOp::Swp as u64,
            a2: vic_fpn,
            a3: swp_fpn,
        };
        sys_memmap(krnl, pid, mm, &mut regs)?;
        let mut p = vic_pte;
        p.set_swap(active as u32, swp_fpn);
        mm.set_pte(vic_pgn, p)?;
        debug!(
            "pg_getpage: pid {} evicted pgn {} to swap {}:{}",
            pid, vic_pgn, active, swp_fpn
        );
    } else {
        let mut p = vic_pte;
        p.set_swap(p.swap_type(), p.swap_off());
        mm.set_pte(vic_pgn, p)?;
        trace!("pg_getpage: pid {} dropped clean pgn {}", pid, vic_pgn);
    }

    // 3. Copy the requested page into the freed frame.
    {
        let mut src = krnl.swap(pte.swap_type() as usize).lock();
        let mut dst = krnl.mram.lock();
        swap_cp_page(&mut src, pte.swap_off(), &mut dst, vic_fpn)?;
    }

    // 4. The faulting entry becomes resident; its slot stays behind as
    //    the clean copy.
    let mut new_pte = pte;
    new_pte.set_fpn(vic_fpn);
    new_pte.clear_dirty();
    mm.set_pte(pgn, new_pte)?;

    // 5. Newly resident pages go to the FIFO tail.
    mm.push_fifo_pgn(pgn);

    debug!("pg_getpage: pid {} pgn {} now at fpn {}", pid, pgn, vic_fpn);
    Ok(vic_fpn)
}

// ============================================================================
// Byte access
// ============================================================================

fn region_addr(mm: &AddressSpace, rgid: u32, offset: u64) -> Result<Addr, MemError> {
    let rg = mm.symbol(rgid)?;
    if rg.is_empty() {
        return Err(MemError::NotFound);
    }
    let addr = rg.start + offset;
    if !rg.contains(addr) {
        return Err(MemError::OutOfBounds);
    }
    Ok(addr)
}

/// Read one byte at `offset` inside the region bound to `rgid`.
pub fn read_byte(
    krnl: &Kernel,
    mm: &mut AddressSpace,
    pid: Pid,
    rgid: u32,
    offset: u64,
) -> Result<u8, MemError> {
    let addr = region_addr(mm, rgid, offset)?;
    let fpn = pg_getpage(krnl, mm, pid, page_num(addr))?;
    let mut regs = SysRegs {
        a1: MemOp::IoRead as u64,
        a2: fpn * PAGE_SIZE + page_offset(addr),
        a3: 0,
    };
    sys_memmap(krnl, pid, mm, &mut regs)?;
    Ok(regs.a3 as u8)
}

/// Write one byte at `offset` inside the region bound to `rgid` and
/// mark the page dirty.
pub fn write_byte(
    krnl: &Kernel,
    mm: &mut AddressSpace,
    pid: Pid,
    rgid: u32,
    offset: u64,
    value: u8,
) -> Result<(), MemError> {
    let addr = region_addr(mm, rgid, offset)?;
    let pgn = page_num(addr);
    let fpn = pg_getpage(krnl, mm, pid, pgn)?;

    let mut pte = mm.pte(pgn);
    pte.set_dirty();
    mm.set_pte(pgn, pte)?;

    let mut regs = SysRegs {
        a1: MemOp::IoWrite as u64,
        a2: fpn * PAGE_SIZE + page_offset(addr),
        a3: value as u64,
    };
    sys_memmap(krnl, pid, mm, &mut regs)
}
