// src/process/exec.rs
//
// One-instruction execution step. The time-slot driver calls `run`
// once per slot for the dispatched process; there is no preemption
// inside an instruction.

use log::{debug, trace};

use crate::kernel::Kernel;
use crate::memory::{user_mem, MemError, PAGE_SIZE};

use super::program::Instruction;
use super::Pcb;

/// Execute the instruction at the PC and advance it.
pub fn run(krnl: &Kernel, proc: &mut Pcb) -> Result<(), MemError> {
    let Some(&inst) = proc.code.insts.get(proc.pc) else {
        return Err(MemError::OutOfBounds);
    };
    proc.pc += 1;

    let pid = proc.pid;
    let mm = proc.mm.as_mut().ok_or(MemError::NotFound)?;

    match inst {
        Instruction::Calc => {
            trace!("pid {}: calc", pid);
            Ok(())
        }
        Instruction::Alloc { size, rgid } => {
            let addr = user_mem::alloc_region(krnl, mm, pid, rgid, size)?;
            debug!(
                "pid {}: alloc region={} address={:#x} size={}",
                pid, rgid, addr, size
            );
            debug!(
                "pid {}: page table\n{}",
                pid,
                mm.dump_page_table(0, (addr + size) / PAGE_SIZE + 1)
            );
            Ok(())
        }
        Instruction::Free { rgid } => {
            user_mem::free_region(mm, rgid)?;
            debug!("pid {}: free region={}", pid, rgid);
            Ok(())
        }
        Instruction::Read { rgid, offset } => {
            let value = user_mem::read_byte(krnl, mm, pid, rgid, offset)?;
            debug!(
                "pid {}: read region={} offset={} value={}",
                pid, rgid, offset, value
            );
            Ok(())
        }
        Instruction::Write { value, rgid, offset } => {
            user_mem::write_byte(krnl, mm, pid, rgid, offset, value)?;
            debug!(
                "pid {}: write region={} offset={} value={}",
                pid, rgid, offset, value
            );
            Ok(())
        }
    }
}
