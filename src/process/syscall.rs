// src/process/syscall.rs
//
// The memory-management syscall shim: one dispatch over a small
// register block. Callees reach all kernel-wide state through the
// explicit handle, so no user-space pointer is ever trusted or
// dereferenced here.

use log::error;

use crate::kernel::Kernel;
use crate::memory::address_space::AddressSpace;
use crate::memory::paging::{inc_vma_limit, swap_cp_page, vmap_pgd_memset};
use crate::memory::MemError;

use super::Pid;

/// Register block of one syscall: `a1` is the operation code, `a2` and
/// `a3` its operands. `SYSMEM_IO_READ` returns its result in `a3`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysRegs {
    pub a1: u64,
    pub a2: u64,
    pub a3: u64,
}

/// Memory operation codes for `sys_memmap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum MemOp {
    /// Zero-init `a3` page-table entries at address `a2`.
    Map = 100,
    /// Grow VMA `a2` by `a3` bytes.
    Inc = 101,
    /// Copy RAM frame `a2` to frame `a3` of the active swap device.
    Swp = 102,
    /// Read the RAM byte at `a2` into `a3`.
    IoRead = 103,
    /// Write byte `a3` to RAM address `a2`.
    IoWrite = 104,
}

impl MemOp {
    pub fn from_u64(n: u64) -> Option<Self> {
        match n {
            100 => Some(Self::Map),
            101 => Some(Self::Inc),
            102 => Some(Self::Swp),
            103 => Some(Self::IoRead),
            104 => Some(Self::IoWrite),
            _ => None,
        }
    }
}

/// Dispatch one memory-management syscall on behalf of `pid`.
pub fn sys_memmap(
    krnl: &Kernel,
    pid: Pid,
    mm: &mut AddressSpace,
    regs: &mut SysRegs,
) -> Result<(), MemError> {
    let Some(op) = MemOp::from_u64(regs.a1) else {
        error!("sys_memmap: pid {} unknown memop code {}", pid, regs.a1);
        return Err(MemError::NotFound);
    };

    match op {
        MemOp::Map => vmap_pgd_memset(mm, regs.a2, regs.a3),
        MemOp::Inc => inc_vma_limit(krnl, mm, regs.a2 as u32, regs.a3),
        MemOp::Swp => {
            let mut ram = krnl.mram.lock();
            let mut swp = krnl.active_swap().lock();
            swap_cp_page(&mut ram, regs.a2, &mut swp, regs.a3)
        }
        MemOp::IoRead => {
            let value = krnl.mram.lock().read(regs.a2)?;
            regs.a3 = value as u64;
            Ok(())
        }
        MemOp::IoWrite => krnl.mram.lock().write(regs.a2, regs.a3 as u8),
    }
}
