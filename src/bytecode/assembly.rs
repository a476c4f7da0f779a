/*!
  The human readable textual form of bytecode is called assembly. This module
  leverages the `strum` derives of the opcode enum to serialize and
  deserialize bytecode to assembly.

  One instruction per line, tokens separated by spaces, `#` starts a comment.
  CATCH, CROAK, SETF and RESETF accept symbolic flag names when a `FlagSpec`
  has been loaded; everything else takes flags by index.
*/

use std::collections::HashMap;
use std::fmt::Write as _;
use std::str::FromStr;

use nom::{
  bytes::complete::take_while1,
  character::complete::{char as one_char, space0, space1},
  combinator::{opt, rest},
  multi::many0,
  sequence::preceded,
  IResult,
};
use thiserror::Error;

use super::{CodeError, Instruction, Opcode};
use crate::flags::{Flag, RESERVED_FLAGS};

// An `Either`-like enum to transparently collect source code errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
  #[error("error on line {line}: {name} is not an operation")]
  UnknownOpcode { line: u32, name: String },
  #[error("error on line {line}: {opcode} was given {count} arguments")]
  WrongArguments { line: u32, opcode: Opcode, count: usize },
  #[error("error on line {line}: {token} is not a number")]
  BadNumber { line: u32, token: String },
  #[error("error on line {line}: unknown flag name {name}")]
  UnknownFlag { line: u32, name: String },
  #[error("error on line {line}: flag {flag} is reserved")]
  ReservedFlag { line: u32, flag: Flag },
  #[error("error on line {line}: unparsable instruction")]
  Syntax { line: u32 },
  #[error("flag spec line {line} is malformed")]
  BadSpec { line: u32 },
  #[error(transparent)]
  Code(#[from] CodeError),
}

/**
  Symbolic flag names for assembly, loaded from CSV lines of the form
  `name,index[,description]`. Names for reserved indices are refused so a spec
  cannot alias engine flags.
*/
#[derive(Debug, Clone, Default)]
pub struct FlagSpec {
  names: HashMap<String, Flag>,
}

impl FlagSpec {
  pub fn new() -> Self {
    FlagSpec::default()
  }

  /// Loads CSV content, returning the number of flags registered.
  pub fn load_csv(&mut self, text: &str) -> Result<usize, AsmError> {
    let mut count = 0usize;
    for (idx, raw) in text.lines().enumerate() {
      let line_no = idx as u32 + 1;
      let line = raw.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      let mut fields = line.split(',');
      let name = fields.next().map(str::trim).filter(|s| !s.is_empty());
      let index = fields.next().map(str::trim);
      let (name, index) = match (name, index) {
        (Some(n), Some(i)) => (n, i),
        _ => return Err(AsmError::BadSpec { line: line_no }),
      };
      let flag: Flag = index
        .parse()
        .map_err(|_| AsmError::BadSpec { line: line_no })?;
      if flag < RESERVED_FLAGS {
        return Err(AsmError::ReservedFlag { line: line_no, flag });
      }
      self.names.insert(name.to_string(), flag);
      count += 1;
    }
    Ok(count)
  }

  pub fn get(&self, name: &str) -> Option<Flag> {
    self.names.get(name).copied()
  }
}

// Symbols share their character set with navigation targets and numeric
// selectors, so one token rule covers every argument position.
fn token(input: &str) -> IResult<&str, &str> {
  take_while1(|c: char| c.is_ascii_alphanumeric() || "_.*^><-".contains(c))(input)
}

fn mnemonic(input: &str) -> IResult<&str, &str> {
  take_while1(|c: char| c.is_ascii_uppercase())(input)
}

fn comment(input: &str) -> IResult<&str, &str> {
  preceded(one_char('#'), rest)(input)
}

fn instruction_line(input: &str) -> IResult<&str, (&str, Vec<&str>)> {
  let (input, _) = space0(input)?;
  let (input, name) = mnemonic(input)?;
  let (input, args) = many0(preceded(space1, token))(input)?;
  let (input, _) = space0(input)?;
  let (input, _) = opt(comment)(input)?;
  Ok((input, (name, args)))
}

/**
  Parses assembly text into instructions. Empty lines and comment-only lines
  are skipped; every error carries the 1-based source line.
*/
pub fn parse_assembly(text: &str, flags: Option<&FlagSpec>) -> Result<Vec<Instruction>, AsmError> {
  let mut out = Vec::new();
  for (idx, raw) in text.lines().enumerate() {
    let line_no = idx as u32 + 1;
    let line = raw.trim_end();
    if line.trim().is_empty() || line.trim_start().starts_with('#') {
      continue;
    }
    let (leftover, (name, args)) =
      instruction_line(line).map_err(|_| AsmError::Syntax { line: line_no })?;
    if !leftover.is_empty() {
      return Err(AsmError::Syntax { line: line_no });
    }
    let opcode = Opcode::from_str(name).map_err(|_| AsmError::UnknownOpcode {
      line: line_no,
      name: name.to_string(),
    })?;
    out.push(instruction_from(line_no, opcode, &args, flags)?);
  }
  Ok(out)
}

/// Parses and encodes in one step; this is the assembler proper.
pub fn assemble(text: &str, flags: Option<&FlagSpec>) -> Result<Vec<u8>, AsmError> {
  let instructions = parse_assembly(text, flags)?;
  let mut blob = Vec::new();
  for instruction in &instructions {
    instruction.encode_into(&mut blob)?;
  }
  Ok(blob)
}

/// Disassembles a code blob back to assembly text, one instruction per line.
pub fn disassemble(code: &[u8]) -> Result<String, CodeError> {
  let mut out = String::new();
  for instruction in super::decode_all(code)? {
    let _ = writeln!(out, "{}", instruction);
  }
  Ok(out)
}

fn instruction_from(
  line: u32,
  opcode: Opcode,
  args: &[&str],
  flags: Option<&FlagSpec>,
) -> Result<Instruction, AsmError> {
  let wrong = || AsmError::WrongArguments { line, opcode, count: args.len() };

  let instruction = match (opcode, args) {
    (Opcode::Catch, [target, flag, invert]) => Instruction::Catch {
      target: target.to_string(),
      flag: parse_flag(line, flag, flags)?,
      invert: parse_bit(line, invert)?,
    },

    (Opcode::Croak, [flag, invert]) => Instruction::Croak {
      flag: parse_flag(line, flag, flags)?,
      invert: parse_bit(line, invert)?,
    },

    (Opcode::Load, [symbol, reserve]) => Instruction::Load {
      symbol: symbol.to_string(),
      reserve: parse_num(line, reserve)?,
    },

    (Opcode::Reload, [symbol]) => Instruction::Reload { symbol: symbol.to_string() },
    (Opcode::Map, [symbol]) => Instruction::Map { symbol: symbol.to_string() },
    (Opcode::Move, [target]) => Instruction::Move { target: target.to_string() },
    (Opcode::Back, []) => Instruction::Back,

    (Opcode::InCmp, [selector, target]) => Instruction::InCmp {
      selector: selector.to_string(),
      target: target.to_string(),
    },

    (Opcode::Halt, []) => Instruction::Halt,

    (Opcode::MSize, [min, max]) => Instruction::MSize {
      min: parse_num(line, min)?,
      max: parse_num(line, max)?,
    },

    (Opcode::MOut, [choice, title]) => Instruction::MOut {
      choice: choice.to_string(),
      title: title.to_string(),
    },

    (Opcode::MNext, [choice, title]) => Instruction::MNext {
      choice: choice.to_string(),
      title: title.to_string(),
    },

    (Opcode::MPrev, [choice, title]) => Instruction::MPrev {
      choice: choice.to_string(),
      title: title.to_string(),
    },

    (Opcode::SetF, [flag]) => Instruction::SetF { flag: parse_flag(line, flag, flags)? },
    (Opcode::ResetF, [flag]) => Instruction::ResetF { flag: parse_flag(line, flag, flags)? },
    (Opcode::Lang, [tag]) => Instruction::Lang { tag: tag.to_string() },

    _ => return Err(wrong()),
  };
  Ok(instruction)
}

fn parse_num<T: FromStr>(line: u32, token: &str) -> Result<T, AsmError> {
  token.parse().map_err(|_| AsmError::BadNumber { line, token: token.to_string() })
}

fn parse_bit(line: u32, token: &str) -> Result<bool, AsmError> {
  match token {
    "0" => Ok(false),
    "1" => Ok(true),
    _ => Err(AsmError::BadNumber { line, token: token.to_string() }),
  }
}

fn parse_flag(line: u32, token: &str, flags: Option<&FlagSpec>) -> Result<Flag, AsmError> {
  if let Ok(flag) = token.parse::<Flag>() {
    return Ok(flag);
  }
  match flags.and_then(|spec| spec.get(token)) {
    Some(flag) => Ok(flag),
    None => Err(AsmError::UnknownFlag { line, name: token.to_string() }),
  }
}
