// src/process/program.rs
//
// Program files and the loader. A program file has a header line
// `default_priority instruction_count`, then one instruction per line:
//
//   calc
//   alloc <size> <rgid>
//   free <rgid>
//   read <rgid> <offset>
//   write <value> <rgid> <offset>
//
// `load` builds a PCB around the parsed, immutable code section. The
// MLQ config priority overrides the file default at admission.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use super::{Pcb, Pid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Calc,
    Alloc { size: u64, rgid: u32 },
    Free { rgid: u32 },
    Read { rgid: u32, offset: u64 },
    Write { value: u8, rgid: u32, offset: u64 },
}

#[derive(Debug)]
pub struct Program {
    pub default_prio: u32,
    pub insts: Vec<Instruction>,
}

impl Program {
    pub fn empty() -> Self {
        Self {
            default_prio: 0,
            insts: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read program file: {0}")]
    Io(#[from] io::Error),
    #[error("program line {line}: {msg}")]
    Parse { line: usize, msg: String },
}

fn parse_err(line: usize, msg: impl Into<String>) -> LoadError {
    LoadError::Parse {
        line,
        msg: msg.into(),
    }
}

fn int_field<T: std::str::FromStr>(
    tokens: &[&str],
    idx: usize,
    line: usize,
) -> Result<T, LoadError> {
    tokens
        .get(idx)
        .ok_or_else(|| parse_err(line, "missing operand"))?
        .parse()
        .map_err(|_| parse_err(line, format!("bad operand `{}`", tokens[idx])))
}

pub fn parse_program(text: &str) -> Result<Program, LoadError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(n, l)| (n + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    let (hdr_no, header) = lines
        .next()
        .ok_or_else(|| parse_err(1, "empty program"))?;
    let hdr: Vec<&str> = header.split_whitespace().collect();
    if hdr.len() != 2 {
        return Err(parse_err(hdr_no, "header must be `priority count`"));
    }
    let default_prio: u32 = int_field(&hdr, 0, hdr_no)?;
    let count: usize = int_field(&hdr, 1, hdr_no)?;

    let mut insts = Vec::with_capacity(count);
    for (no, line) in lines.take(count) {
        let tok: Vec<&str> = line.split_whitespace().collect();
        let inst = match tok[0].to_ascii_lowercase().as_str() {
            "calc" => Instruction::Calc,
            "alloc" => Instruction::Alloc {
                size: int_field(&tok, 1, no)?,
                rgid: int_field(&tok, 2, no)?,
            },
            "free" => Instruction::Free {
                rgid: int_field(&tok, 1, no)?,
            },
            "read" => Instruction::Read {
                rgid: int_field(&tok, 1, no)?,
                offset: int_field(&tok, 2, no)?,
            },
            "write" => Instruction::Write {
                value: int_field(&tok, 1, no)?,
                rgid: int_field(&tok, 2, no)?,
                offset: int_field(&tok, 3, no)?,
            },
            other => return Err(parse_err(no, format!("unknown opcode `{other}`"))),
        };
        insts.push(inst);
    }
    if insts.len() != count {
        return Err(parse_err(
            0,
            format!("expected {} instructions, found {}", count, insts.len()),
        ));
    }

    Ok(Program {
        default_prio,
        insts,
    })
}

/// Load a program file and wrap it in a fresh PCB with the file's
/// default priority. The address space is attached later, by the
/// loader thread, once fully built.
pub fn load(path: &Path, pid: Pid) -> Result<Pcb, LoadError> {
    let text = fs::read_to_string(path)?;
    let program = parse_program(&text)?;
    let prio = program.default_prio;
    Ok(Pcb::new(pid, prio, Arc::new(program)))
}
