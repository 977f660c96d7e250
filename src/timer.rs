// src/timer.rs
//
// The deterministic time-slot driver: a global discrete clock, one
// event handle per participant (CPU threads and the loader), a turn
// token that orders CPUs within a slot, and a scheduling barrier.
//
// Round protocol, per tick:
//   1. the timer thread waits until every handle reports done or
//      finished;
//   2. it bumps the clock, resets the CPU order, then releases every
//      participant into the next slot;
//   3. once every handle is finished, the timer exits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

// ============================================================================
// Per-participant event handle
// ============================================================================

#[derive(Default)]
struct EventState {
    /// Ready to advance to the next slot.
    done: bool,
    /// Permanently finished; skipped in later rounds.
    fsh: bool,
}

/// One participant's membership in the current round. The two condvars
/// share the state mutex: `event_cond` signals participant-to-timer,
/// `timer_cond` timer-to-participant.
pub struct TimerEvent {
    state: Mutex<EventState>,
    event_cond: Condvar,
    timer_cond: Condvar,
}

impl TimerEvent {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(EventState::default()),
            event_cond: Condvar::new(),
            timer_cond: Condvar::new(),
        })
    }

    /// Report the slot's work as done, then block until the timer opens
    /// the next slot.
    pub fn next_slot(&self) {
        let mut st = self.state.lock().unwrap();
        st.done = true;
        self.event_cond.notify_one();
        while st.done {
            st = self.timer_cond.wait(st).unwrap();
        }
    }

    /// Leave the clock for good.
    pub fn detach(&self) {
        let mut st = self.state.lock().unwrap();
        st.fsh = true;
        self.event_cond.notify_one();
    }
}

// ============================================================================
// CPU-order token
// ============================================================================

/// Whose turn it is inside the current slot. CPUs go in strict
/// descending id order, the loader last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Cpu(usize),
    Loader,
}

struct OrderState {
    turn: Turn,
    active: Vec<bool>,
}

impl OrderState {
    fn highest_active(&self) -> Option<usize> {
        self.active.iter().rposition(|&a| a)
    }

    fn next_active_below(&self, id: usize) -> Option<usize> {
        self.active[..id].iter().rposition(|&a| a)
    }
}

struct CpuOrder {
    state: Mutex<OrderState>,
    cond: Condvar,
}

impl CpuOrder {
    fn new(num_cpus: usize) -> Self {
        let active = vec![true; num_cpus];
        let turn = if num_cpus > 0 {
            Turn::Cpu(num_cpus - 1)
        } else {
            Turn::Loader
        };
        Self {
            state: Mutex::new(OrderState { turn, active }),
            cond: Condvar::new(),
        }
    }

    fn wait_turn(&self, turn: Turn) {
        let mut st = self.state.lock().unwrap();
        while st.turn != turn {
            st = self.cond.wait(st).unwrap();
        }
    }

    fn signal_next(&self, current: Turn) {
        let mut st = self.state.lock().unwrap();
        st.turn = match current {
            Turn::Loader => st.highest_active().map(Turn::Cpu).unwrap_or(Turn::Loader),
            Turn::Cpu(0) => Turn::Loader,
            Turn::Cpu(id) => st
                .next_active_below(id)
                .map(Turn::Cpu)
                .unwrap_or(Turn::Loader),
        };
        self.cond.notify_all();
    }

    fn mark_inactive(&self, id: usize) {
        let mut st = self.state.lock().unwrap();
        if id < st.active.len() {
            st.active[id] = false;
        }
    }

    fn active_count(&self) -> usize {
        self.state.lock().unwrap().active.iter().filter(|&&a| a).count()
    }

    /// Slot start: the token goes back to the highest still-active CPU.
    fn reset(&self) {
        let mut st = self.state.lock().unwrap();
        st.turn = st.highest_active().map(Turn::Cpu).unwrap_or(Turn::Loader);
        self.cond.notify_all();
    }
}

// ============================================================================
// Scheduling barrier
// ============================================================================

#[derive(Default)]
struct BarrierState {
    done_count: usize,
    released: bool,
}

struct SchedBarrier {
    state: Mutex<BarrierState>,
    cond: Condvar,
}

impl SchedBarrier {
    fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState::default()),
            cond: Condvar::new(),
        }
    }

    fn signal_done(&self, total_participants: usize) {
        let mut st = self.state.lock().unwrap();
        st.done_count += 1;
        if st.done_count >= total_participants {
            st.released = true;
            self.cond.notify_all();
        }
    }

    fn wait(&self) {
        let mut st = self.state.lock().unwrap();
        while !st.released {
            st = self.cond.wait(st).unwrap();
        }
    }

    fn reset(&self) {
        let mut st = self.state.lock().unwrap();
        st.done_count = 0;
        st.released = false;
    }
}

// ============================================================================
// The timer
// ============================================================================

pub struct Timer {
    time: AtomicU64,
    started: AtomicBool,
    stop: AtomicBool,
    events: Mutex<Vec<Arc<TimerEvent>>>,
    order: CpuOrder,
    barrier: SchedBarrier,
}

impl Timer {
    pub fn new(num_cpus: usize) -> Arc<Self> {
        Arc::new(Self {
            time: AtomicU64::new(0),
            started: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
            order: CpuOrder::new(num_cpus),
            barrier: SchedBarrier::new(),
        })
    }

    pub fn current_time(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }

    /// Register a participant. Only possible before the clock starts.
    pub fn attach_event(&self) -> Option<Arc<TimerEvent>> {
        if self.started.load(Ordering::SeqCst) {
            return None;
        }
        let ev = TimerEvent::new();
        self.events.lock().unwrap().push(ev.clone());
        Some(ev)
    }

    /// Spawn the timer thread.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.started.store(true, Ordering::SeqCst);
        let timer = Arc::clone(self);
        thread::Builder::new()
            .name("timer".into())
            .spawn(move || timer.routine())
            .expect("spawn timer thread")
    }

    fn routine(&self) {
        let events = self.events.lock().unwrap().clone();
        while !self.stop.load(Ordering::SeqCst) {
            println!("Time slot {:3}", self.current_time());

            // Wait for every participant to finish the current slot.
            let mut fsh = 0;
            for ev in &events {
                let mut st = ev.state.lock().unwrap();
                while !st.done && !st.fsh {
                    st = ev.event_cond.wait(st).unwrap();
                }
                if st.fsh {
                    fsh += 1;
                }
            }

            self.time.fetch_add(1, Ordering::SeqCst);
            self.reset_slot_state();

            // Release everyone into the new slot.
            for ev in &events {
                let mut st = ev.state.lock().unwrap();
                st.done = false;
                ev.timer_cond.notify_one();
            }

            if fsh == events.len() {
                break;
            }
        }
    }

    /// Ask the timer thread to wind down; the caller joins the handle.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn reset_slot_state(&self) {
        self.order.reset();
        self.barrier.reset();
    }

    // ====================================================================
    // CPU ordering passthroughs
    // ====================================================================

    /// Block until the turn token equals `turn`.
    pub fn wait_cpu_turn(&self, turn: Turn) {
        self.order.wait_turn(turn);
    }

    /// Pass the token on: a CPU hands it to the next active CPU below,
    /// CPU 0 hands it to the loader, the loader re-arms the highest
    /// active CPU.
    pub fn signal_next_cpu(&self, current: Turn) {
        self.order.signal_next(current);
    }

    /// A CPU with no more work is skipped in subsequent rounds.
    pub fn mark_cpu_inactive(&self, id: usize) {
        self.order.mark_inactive(id);
    }

    // ====================================================================
    // Scheduling barrier
    // ====================================================================

    pub fn signal_scheduling_done(&self) {
        // Active CPUs plus the loader.
        self.barrier.signal_done(self.order.active_count() + 1);
    }

    pub fn wait_scheduling_barrier(&self) {
        self.barrier.wait();
    }
}
