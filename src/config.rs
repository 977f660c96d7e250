// src/config.rs
//
// Simulation configuration, read once at startup:
//
//   time_slot num_cpus num_processes
//   [ram_size swap0 swap1 swap2 swap3]     (optional; exactly five ints)
//   start_time program_name [priority]     (x num_processes)
//
// Program names resolve under input/proc/. A missing file is fatal to
// the caller; malformed content reports the offending line.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::memory::{MAX_SWAP_DEVICES, PAGE_SIZE};

pub const DEFAULT_RAM_SIZE: u64 = 0x0010_0000;
pub const DEFAULT_SWAP_SIZE: u64 = 0x0100_0000;

/// Directory process programs are resolved under.
pub const PROC_DIR: &str = "input/proc";

#[derive(Debug, Clone)]
pub struct MemConfig {
    pub ram_size: u64,
    pub swap_sizes: [u64; MAX_SWAP_DEVICES],
}

impl Default for MemConfig {
    fn default() -> Self {
        let mut swap_sizes = [0; MAX_SWAP_DEVICES];
        swap_sizes[0] = DEFAULT_SWAP_SIZE;
        Self {
            ram_size: DEFAULT_RAM_SIZE,
            swap_sizes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcSpec {
    pub start_time: u64,
    pub path: PathBuf,
    /// Scheduling priority from the config; absent entries fall back
    /// to the program file's default.
    pub prio: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub time_slot: u32,
    pub num_cpus: usize,
    pub mem: MemConfig,
    pub procs: Vec<ProcSpec>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot find configure file at {}", .0.display())]
    Missing(PathBuf),
    #[error("config line {line}: {msg}")]
    Parse { line: usize, msg: String },
}

fn parse_err(line: usize, msg: impl Into<String>) -> ConfigError {
    ConfigError::Parse {
        line,
        msg: msg.into(),
    }
}

fn ints_of(line: &str) -> Option<Vec<u64>> {
    line.split_whitespace()
        .map(|t| t.parse::<u64>().ok())
        .collect()
}

pub fn parse_config(text: &str) -> Result<Config, ConfigError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(n, l)| (n + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty())
        .peekable();

    let (hdr_no, header) = lines.next().ok_or_else(|| parse_err(1, "empty config"))?;
    let hdr = ints_of(header)
        .filter(|v| v.len() == 3)
        .ok_or_else(|| parse_err(hdr_no, "header must be `time_slot num_cpus num_processes`"))?;
    let (time_slot, num_cpus, num_processes) = (hdr[0] as u32, hdr[1] as usize, hdr[2] as usize);
    if time_slot == 0 || num_cpus == 0 {
        return Err(parse_err(hdr_no, "time_slot and num_cpus must be positive"));
    }

    // The memory line is recognised by carrying exactly five integers;
    // anything else is already a process entry.
    let mut mem = MemConfig::default();
    if let Some(&(_, line)) = lines.peek() {
        if let Some(v) = ints_of(line).filter(|v| v.len() == 5) {
            mem.ram_size = v[0];
            for (slot, &sz) in mem.swap_sizes.iter_mut().zip(&v[1..]) {
                *slot = sz;
            }
            lines.next();
        }
    }
    if cfg!(feature = "mm64") && mem.ram_size < PAGE_SIZE {
        mem.ram_size = PAGE_SIZE;
    }

    let mut procs = Vec::with_capacity(num_processes);
    for _ in 0..num_processes {
        let (no, line) = lines
            .next()
            .ok_or_else(|| parse_err(0, format!("expected {num_processes} process entries")))?;
        let tok: Vec<&str> = line.split_whitespace().collect();
        if tok.len() < 2 || tok.len() > 3 {
            return Err(parse_err(no, "process entry must be `start_time name [priority]`"));
        }
        let start_time: u64 = tok[0]
            .parse()
            .map_err(|_| parse_err(no, format!("bad start time `{}`", tok[0])))?;
        let prio = match tok.get(2) {
            Some(t) => Some(
                t.parse::<u32>()
                    .map_err(|_| parse_err(no, format!("bad priority `{t}`")))?,
            ),
            None => None,
        };
        procs.push(ProcSpec {
            start_time,
            path: Path::new(PROC_DIR).join(tok[1]),
            prio,
        });
    }

    Ok(Config {
        time_slot,
        num_cpus,
        mem,
        procs,
    })
}

/// Read and parse the config file; a file that cannot be read at all
/// is the fatal missing-config case.
pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let text = fs::read_to_string(path).map_err(|_| ConfigError::Missing(path.to_path_buf()))?;
    parse_config(&text)
}
