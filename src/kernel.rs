// src/kernel.rs
//
// The kernel-wide handle: the RAM device, the swap devices, the
// currently-active swap selector, the scheduler and the global done
// flag. Exactly one per simulator; every syscall and memory operation
// receives it explicitly, so PCBs never hold a kernel pointer.

use std::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::memory::memphy::Memphy;
use crate::memory::MAX_SWAP_DEVICES;
use crate::process::scheduler::Scheduler;

pub struct Kernel {
    /// Physical RAM. Random-access by default.
    pub mram: Mutex<Memphy>,
    mswp: [Mutex<Memphy>; MAX_SWAP_DEVICES],
    /// Device the paging engine evicts to. Fixed at boot.
    active_mswp: usize,
    pub sched: Scheduler,
    /// Set by the loader after the last admission; CPUs with nothing
    /// left to run then retire.
    done: AtomicBool,
}

impl Kernel {
    pub fn new(ram_size: u64, swap_sizes: [u64; MAX_SWAP_DEVICES]) -> Self {
        Self {
            mram: Mutex::new(Memphy::new(ram_size, true)),
            mswp: swap_sizes.map(|sz| Mutex::new(Memphy::new(sz, true))),
            active_mswp: 0,
            sched: Scheduler::new(),
            done: AtomicBool::new(false),
        }
    }

    pub fn swap(&self, idx: usize) -> &Mutex<Memphy> {
        &self.mswp[idx]
    }

    pub fn active_swap_id(&self) -> usize {
        self.active_mswp
    }

    pub fn active_swap(&self) -> &Mutex<Memphy> {
        self.swap(self.active_swap_id())
    }

    pub fn set_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}
