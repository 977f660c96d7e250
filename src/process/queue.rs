// src/process/queue.rs
//
// Scheduler queue types: a bounded FIFO queue of PCBs, and the
// running-set bookkeeping list with a best-effort purge. Queue
// overflow refuses the process and hands it back to the caller;
// losing one silently is not an option.

use std::collections::VecDeque;

use super::{Pcb, Pid};

pub const MAX_QUEUE_SIZE: usize = 10;

#[derive(Default)]
pub struct PcbQueue {
    slots: VecDeque<Box<Pcb>>,
}

impl PcbQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Append at the tail; a full queue refuses and returns the PCB.
    pub fn enqueue(&mut self, proc: Box<Pcb>) -> Result<(), Box<Pcb>> {
        if self.slots.len() >= MAX_QUEUE_SIZE {
            return Err(proc);
        }
        self.slots.push_back(proc);
        Ok(())
    }

    /// Take the head.
    pub fn dequeue(&mut self) -> Option<Box<Pcb>> {
        self.slots.pop_front()
    }
}

/// The `running` bookkeeping set: pids of the processes CPUs are
/// currently holding. The queues (or the dispatching CPU) own the
/// PCBs themselves.
#[derive(Default)]
pub struct RunningList {
    pids: Vec<Pid>,
}

impl RunningList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pid: Pid) {
        self.pids.push(pid);
    }

    /// Remove one entry for `pid` wherever it sits; a miss has no
    /// side effects.
    pub fn purge(&mut self, pid: Pid) -> Option<Pid> {
        let pos = self.pids.iter().position(|&p| p == pid)?;
        Some(self.pids.remove(pos))
    }

    pub fn pids(&self) -> &[Pid] {
        &self.pids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::program::Program;
    use std::sync::Arc;

    fn proc(pid: u32) -> Box<Pcb> {
        Box::new(Pcb::new(Pid(pid), 0, Arc::new(Program::empty())))
    }

    #[test]
    fn fifo_order_is_preserved() {
        let mut q = PcbQueue::new();
        q.enqueue(proc(1)).unwrap();
        q.enqueue(proc(2)).unwrap();
        q.enqueue(proc(3)).unwrap();
        assert_eq!(q.dequeue().unwrap().pid, Pid(1));
        assert_eq!(q.dequeue().unwrap().pid, Pid(2));
        assert_eq!(q.dequeue().unwrap().pid, Pid(3));
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn overflow_hands_the_process_back() {
        let mut q = PcbQueue::new();
        for i in 0..MAX_QUEUE_SIZE as u32 {
            q.enqueue(proc(i)).unwrap();
        }
        let rejected = q.enqueue(proc(99)).unwrap_err();
        assert_eq!(rejected.pid, Pid(99));
        assert_eq!(q.len(), MAX_QUEUE_SIZE);
    }

    #[test]
    fn running_list_purge_miss_has_no_side_effects() {
        let mut running = RunningList::new();
        running.push(Pid(1));
        running.push(Pid(2));
        assert!(running.purge(Pid(9)).is_none());
        assert_eq!(running.pids(), [Pid(1), Pid(2)]);
        assert_eq!(running.purge(Pid(1)), Some(Pid(1)));
        assert_eq!(running.pids(), [Pid(2)]);
    }
}
