// src/process/scheduler.rs
//
// Ready-queue schedulers. The default is the multi-level queue (MLQ):
// MAX_PRIO bounded FIFO queues, each priority level i earning a
// per-cycle slot budget of MAX_PRIO - i, plus a `running` bookkeeping
// set. The alternative (without the `mlq` feature) is a single
// ready/run round-robin pair.
//
// One scheduler object exists per simulator, owned by the kernel
// handle; a single mutex covers all queues for the whole duration of
// every operation.

use spin::Mutex;

use super::queue::{PcbQueue, RunningList};
use super::{Pcb, Pid};

pub const MAX_PRIO: usize = 140;

/// Per-cycle slot budget of priority level `prio`.
pub fn slot_budget(prio: usize) -> u32 {
    (MAX_PRIO - prio) as u32
}

#[cfg(feature = "mlq")]
pub type Scheduler = MlqScheduler;
#[cfg(not(feature = "mlq"))]
pub type Scheduler = RoundRobinScheduler;

// ============================================================================
// MLQ scheduler
// ============================================================================

struct MlqState {
    queues: Vec<PcbQueue>,
    running: RunningList,
    /// Next priority level to serve.
    curr_prio: usize,
    /// Remaining slots at `curr_prio` before moving on.
    curr_slot: u32,
}

pub struct MlqScheduler {
    inner: Mutex<MlqState>,
}

impl MlqScheduler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MlqState {
                queues: (0..MAX_PRIO).map(|_| PcbQueue::new()).collect(),
                running: RunningList::new(),
                curr_prio: 0,
                curr_slot: 0,
            }),
        }
    }

    pub fn queue_empty(&self) -> bool {
        self.inner.lock().queues.iter().all(|q| q.is_empty())
    }

    /// Serve the current priority level until its slot budget runs out,
    /// then move to the next non-empty level, wrapping around. Ties
    /// within a level are FIFO on arrival.
    pub fn get_proc(&self) -> Option<Box<Pcb>> {
        let mut st = self.inner.lock();
        loop {
            if st.curr_slot == 0 {
                let from = st.curr_prio;
                let found = (0..MAX_PRIO)
                    .map(|i| (from + i) % MAX_PRIO)
                    .find(|&p| !st.queues[p].is_empty())?;
                st.curr_prio = found;
                st.curr_slot = slot_budget(found);
            }
            let prio = st.curr_prio;
            if let Some(proc) = st.queues[prio].dequeue() {
                st.running.push(proc.pid);
                st.curr_slot -= 1;
                if st.curr_slot == 0 {
                    st.curr_prio = (prio + 1) % MAX_PRIO;
                }
                return Some(proc);
            }
            // The level drained mid-budget; rescan from here.
            st.curr_slot = 0;
        }
    }

    /// Re-queue a process whose time slice expired: purge it from the
    /// running set (best-effort) and put it back at its priority level.
    pub fn put_proc(&self, proc: Box<Pcb>) -> Result<(), Box<Pcb>> {
        let mut st = self.inner.lock();
        let _ = st.running.purge(proc.pid);
        let prio = (proc.prio as usize).min(MAX_PRIO - 1);
        st.queues[prio].enqueue(proc)
    }

    /// Initial admission; the process was never on the running set.
    pub fn add_proc(&self, proc: Box<Pcb>) -> Result<(), Box<Pcb>> {
        let mut st = self.inner.lock();
        let prio = (proc.prio as usize).min(MAX_PRIO - 1);
        st.queues[prio].enqueue(proc)
    }

    pub fn running_pids(&self) -> Vec<Pid> {
        self.inner.lock().running.pids().to_vec()
    }
}

impl Default for MlqScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Round-robin fallback
// ============================================================================

struct RrState {
    ready: PcbQueue,
    run: PcbQueue,
    running: RunningList,
}

pub struct RoundRobinScheduler {
    inner: Mutex<RrState>,
}

impl RoundRobinScheduler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RrState {
                ready: PcbQueue::new(),
                run: PcbQueue::new(),
                running: RunningList::new(),
            }),
        }
    }

    pub fn queue_empty(&self) -> bool {
        let st = self.inner.lock();
        st.ready.is_empty() && st.run.is_empty()
    }

    /// Drain the run queue back into the ready queue once the latter is
    /// empty, then take the ready head.
    pub fn get_proc(&self) -> Option<Box<Pcb>> {
        let mut st = self.inner.lock();
        if st.ready.is_empty() {
            while let Some(p) = st.run.dequeue() {
                st.ready
                    .enqueue(p)
                    .expect("run and ready queues have equal capacity");
            }
        }
        let proc = st.ready.dequeue()?;
        st.running.push(proc.pid);
        Some(proc)
    }

    pub fn put_proc(&self, proc: Box<Pcb>) -> Result<(), Box<Pcb>> {
        let mut st = self.inner.lock();
        let _ = st.running.purge(proc.pid);
        st.run.enqueue(proc)
    }

    pub fn add_proc(&self, proc: Box<Pcb>) -> Result<(), Box<Pcb>> {
        self.inner.lock().ready.enqueue(proc)
    }

    pub fn running_pids(&self) -> Vec<Pid> {
        self.inner.lock().running.pids().to_vec()
    }
}

impl Default for RoundRobinScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::program::Program;
    use std::sync::Arc;

    fn proc(pid: u32, prio: u32) -> Box<Pcb> {
        Box::new(Pcb::new(Pid(pid), prio, Arc::new(Program::empty())))
    }

    #[test]
    fn slot_budget_decreases_with_priority_level() {
        for i in 0..MAX_PRIO {
            assert_eq!(slot_budget(i), (MAX_PRIO - i) as u32);
        }
    }

    #[test]
    fn empty_scheduler_yields_nothing() {
        let sched = MlqScheduler::new();
        assert!(sched.queue_empty());
        assert!(sched.get_proc().is_none());
    }

    #[test]
    fn get_moves_the_process_onto_the_running_set() {
        let sched = MlqScheduler::new();
        sched.add_proc(proc(1, 3)).unwrap();
        let p = sched.get_proc().unwrap();
        assert_eq!(p.pid, Pid(1));
        assert_eq!(sched.running_pids(), vec![Pid(1)]);
        sched.put_proc(p).unwrap();
        assert!(sched.running_pids().is_empty());
    }

    #[test]
    fn high_priority_level_exhausts_its_budget_before_low() {
        let sched = MlqScheduler::new();
        sched.add_proc(proc(1, 0)).unwrap();
        sched.add_proc(proc(2, (MAX_PRIO - 1) as u32)).unwrap();

        // Process 1 is dispatched slot_budget(0) times in a row.
        for _ in 0..slot_budget(0) {
            let p = sched.get_proc().unwrap();
            assert_eq!(p.pid, Pid(1));
            sched.put_proc(p).unwrap();
        }
        // Only then does the lowest level get its first dispatch.
        let p = sched.get_proc().unwrap();
        assert_eq!(p.pid, Pid(2));
        sched.put_proc(p).unwrap();
    }

    #[test]
    fn round_robin_within_one_priority_level() {
        let sched = MlqScheduler::new();
        sched.add_proc(proc(1, 10)).unwrap();
        sched.add_proc(proc(2, 10)).unwrap();
        let mut seen = Vec::new();
        for _ in 0..6 {
            let p = sched.get_proc().unwrap();
            seen.push(p.pid.0);
            sched.put_proc(p).unwrap();
        }
        assert_eq!(seen, vec![1, 2, 1, 2, 1, 2]);
    }

    #[test]
    fn drained_level_passes_its_turn_to_the_next_one() {
        let sched = MlqScheduler::new();
        sched.add_proc(proc(1, 5)).unwrap();
        sched.add_proc(proc(2, 9)).unwrap();
        // Take process 1 and do not requeue it: level 5 still has
        // budget left but no processes.
        let p1 = sched.get_proc().unwrap();
        assert_eq!(p1.pid, Pid(1));
        let p2 = sched.get_proc().unwrap();
        assert_eq!(p2.pid, Pid(2));
    }

    #[test]
    fn fallback_scheduler_drains_run_queue_into_ready() {
        let sched = RoundRobinScheduler::new();
        sched.add_proc(proc(1, 0)).unwrap();
        sched.add_proc(proc(2, 0)).unwrap();
        let a = sched.get_proc().unwrap();
        sched.put_proc(a).unwrap();
        let b = sched.get_proc().unwrap();
        sched.put_proc(b).unwrap();
        // Ready is now empty; the run queue refills it in FIFO order.
        let again = sched.get_proc().unwrap();
        assert_eq!(again.pid, Pid(1));
    }
}
