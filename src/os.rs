// src/os.rs
//
// Thread routines and simulation assembly: one timer thread drives
// `num_cpus` CPU threads plus the loader through globally-ordered time
// slots. Within a slot CPUs take their turn in descending id order and
// the loader goes last; the next slot opens only after every
// participant has reported in.

use std::sync::Arc;
use std::thread;

use log::{debug, error};

use crate::config::Config;
use crate::kernel::Kernel;
use crate::memory::address_space::AddressSpace;
use crate::process::{exec, program, Pcb, Pid};
use crate::timer::{Timer, TimerEvent, Turn};

// ============================================================================
// CPU routine
// ============================================================================

fn cpu_routine(
    krnl: Arc<Kernel>,
    timer: Arc<Timer>,
    event: Arc<TimerEvent>,
    id: usize,
    time_slot: u32,
) {
    let mut proc: Option<Box<Pcb>> = None;
    let mut time_left: u32 = 0;
    loop {
        // CPUs process from highest id to lowest within each slot.
        timer.wait_cpu_turn(Turn::Cpu(id));

        if proc.is_none() {
            proc = krnl.sched.get_proc();
            if proc.is_none() {
                // First load failed; skip a dummy load this slot.
                timer.signal_next_cpu(Turn::Cpu(id));
                event.next_slot();
                continue;
            }
        } else if proc.as_ref().is_some_and(|p| p.finished()) {
            let p = proc.take().expect("checked some");
            println!("\tCPU {}: Processed {:2} has finished", id, p.pid);
            drop(p);
            proc = krnl.sched.get_proc();
            time_left = 0;
        } else if time_left == 0 {
            // Time slice expired with work remaining.
            let p = proc.take().expect("checked some");
            println!("\tCPU {}: Put process {:2} to run queue", id, p.pid);
            if let Err(p) = krnl.sched.put_proc(p) {
                error!("CPU {}: ready queue full, dropping process {}", id, p.pid);
            }
            proc = krnl.sched.get_proc();
        }

        // Recheck after any reload above.
        match &mut proc {
            None if krnl.is_done() => {
                println!("\tCPU {} stopped", id);
                timer.mark_cpu_inactive(id);
                timer.signal_next_cpu(Turn::Cpu(id));
                break;
            }
            None => {
                // New processes may still arrive in later slots.
                timer.signal_next_cpu(Turn::Cpu(id));
                event.next_slot();
                continue;
            }
            Some(p) => {
                if time_left == 0 {
                    println!("\tCPU {}: Dispatched process {:2}", id, p.pid);
                    time_left = time_slot;
                }
                if let Err(e) = exec::run(&krnl, p) {
                    error!("CPU {}: process {}: {}", id, p.pid, e);
                }
            }
        }

        timer.signal_next_cpu(Turn::Cpu(id));
        time_left -= 1;
        event.next_slot();
    }
    event.detach();
}

// ============================================================================
// Loader routine
// ============================================================================

fn ld_routine(krnl: Arc<Kernel>, timer: Arc<Timer>, event: Arc<TimerEvent>, cfg: Config) {
    // The loader runs after all CPUs in every slot.
    timer.wait_cpu_turn(Turn::Loader);
    debug!("ld_routine");
    timer.signal_next_cpu(Turn::Loader);

    for (i, spec) in cfg.procs.iter().enumerate() {
        let pid = Pid(i as u32 + 1);
        let mut proc = match program::load(&spec.path, pid) {
            Ok(p) => p,
            Err(e) => {
                error!("cannot load {}: {}", spec.path.display(), e);
                std::process::exit(1);
            }
        };
        if let Some(prio) = spec.prio {
            proc.prio = prio;
        }

        while timer.current_time() < spec.start_time {
            event.next_slot();
            timer.wait_cpu_turn(Turn::Loader);
            timer.signal_next_cpu(Turn::Loader);
        }

        // Build the address space completely before publishing it;
        // no half-initialised structure may become reachable.
        let mm = AddressSpace::new(pid.0);
        proc.mm = Some(mm);

        println!(
            "\tLoaded a process at {}, PID: {} PRIO: {}",
            spec.path.display(),
            pid,
            proc.prio
        );
        if let Err(p) = krnl.sched.add_proc(Box::new(proc)) {
            error!("ready queue full, refusing process {} at admission", p.pid);
        }

        timer.signal_next_cpu(Turn::Loader);
        event.next_slot();
        timer.wait_cpu_turn(Turn::Loader);
    }

    timer.signal_next_cpu(Turn::Loader);
    krnl.set_done();
    event.detach();
}

// ============================================================================
// Assembly
// ============================================================================

/// Wire up the kernel, the clock and all threads, run the simulation
/// to completion, and tear everything down.
pub fn run_simulation(cfg: Config) {
    let timer = Timer::new(cfg.num_cpus);
    let cpu_events: Vec<_> = (0..cfg.num_cpus)
        .map(|_| timer.attach_event().expect("clock not started yet"))
        .collect();
    let ld_event = timer.attach_event().expect("clock not started yet");

    let krnl = Arc::new(Kernel::new(cfg.mem.ram_size, cfg.mem.swap_sizes));
    debug!(
        "kernel up: ram {:#x} bytes, swap {:?}",
        cfg.mem.ram_size, cfg.mem.swap_sizes
    );

    let timer_handle = timer.start();

    let loader = {
        let krnl = Arc::clone(&krnl);
        let timer = Arc::clone(&timer);
        let cfg = cfg.clone();
        thread::Builder::new()
            .name("loader".into())
            .spawn(move || ld_routine(krnl, timer, ld_event, cfg))
            .expect("spawn loader thread")
    };

    let cpus: Vec<_> = cpu_events
        .into_iter()
        .enumerate()
        .map(|(id, event)| {
            let krnl = Arc::clone(&krnl);
            let timer = Arc::clone(&timer);
            let time_slot = cfg.time_slot;
            thread::Builder::new()
                .name(format!("cpu{id}"))
                .spawn(move || cpu_routine(krnl, timer, event, id, time_slot))
                .expect("spawn cpu thread")
        })
        .collect();

    for cpu in cpus {
        cpu.join().expect("cpu thread panicked");
    }
    loader.join().expect("loader thread panicked");

    timer.stop();
    timer_handle.join().expect("timer thread panicked");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemConfig, ProcSpec};
    use crate::memory::PAGE_SIZE;
    use std::fs;
    use std::path::PathBuf;

    /// Drop-cleaned scratch directory with program files.
    struct ProgDir(PathBuf);

    impl ProgDir {
        fn new(tag: &str, programs: &[(&str, &str)]) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "ossim-test-{}-{}",
                tag,
                std::process::id()
            ));
            fs::create_dir_all(&dir).unwrap();
            for (name, text) in programs {
                fs::write(dir.join(name), text).unwrap();
            }
            Self(dir)
        }

        fn spec(&self, name: &str, start_time: u64, prio: u32) -> ProcSpec {
            ProcSpec {
                start_time,
                path: self.0.join(name),
                prio: Some(prio),
            }
        }
    }

    impl Drop for ProgDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn mem() -> MemConfig {
        MemConfig {
            ram_size: 64 * PAGE_SIZE,
            swap_sizes: [64 * PAGE_SIZE, 0, 0, 0],
        }
    }

    #[test]
    fn two_cpus_two_processes_run_to_completion() {
        let dir = ProgDir::new(
            "basic",
            &[
                ("a", "0 4\nalloc 100 0\nwrite 7 0 3\nread 0 3\nfree 0\n"),
                ("b", "0 3\ncalc\ncalc\ncalc\n"),
            ],
        );
        let cfg = Config {
            time_slot: 2,
            num_cpus: 2,
            mem: mem(),
            procs: vec![dir.spec("a", 0, 0), dir.spec("b", 0, 0)],
        };
        // Completion without deadlock is the property under test; the
        // slot protocol and queues do the rest.
        run_simulation(cfg);
    }

    #[test]
    fn late_start_times_hold_processes_back() {
        let dir = ProgDir::new("late", &[("p", "0 2\ncalc\ncalc\n")]);
        let cfg = Config {
            time_slot: 1,
            num_cpus: 1,
            mem: mem(),
            procs: vec![dir.spec("p", 4, 10)],
        };
        run_simulation(cfg);
    }
}
