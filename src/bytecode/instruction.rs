/*!
  Representation of VM instructions abstractly and as binary bytecode.

  Argument layout per opcode:

  ```text
  CATCH   [sym][flag:u32][invert:u8]
  CROAK   [flag:u32][invert:u8]
  LOAD    [sym][reserve:u8]
  RELOAD  [sym]
  MAP     [sym]
  MOVE    [sym]
  BACK
  INCMP   [selector][sym]
  HALT
  MSIZE   [min:u16][max:u32]
  MOUT    [choice][title-sym]
  MNEXT   [choice][title-sym]
  MPREV   [choice][title-sym]
  SETF    [flag:u32]
  RESETF  [flag:u32]
  LANG    [tag]
  ```

  where `[sym]` and the other byte strings are `len:u8 || bytes` and integers
  are big-endian.
*/

use std::convert::TryFrom;
use std::fmt::{Display, Formatter};

use super::{CodeError, Opcode};
use crate::flags::Flag;

/// Holds the decoded components of an instruction.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Instruction {
  Catch { target: String, flag: Flag, invert: bool },
  Croak { flag: Flag, invert: bool },
  Load { symbol: String, reserve: u8 },
  Reload { symbol: String },
  Map { symbol: String },
  Move { target: String },
  Back,
  InCmp { selector: String, target: String },
  Halt,
  MSize { min: u16, max: u32 },
  MOut { choice: String, title: String },
  MNext { choice: String, title: String },
  MPrev { choice: String, title: String },
  SetF { flag: Flag },
  ResetF { flag: Flag },
  Lang { tag: String },
}

impl Instruction {
  pub fn opcode(&self) -> Opcode {
    match self {
      Instruction::Catch { .. } => Opcode::Catch,
      Instruction::Croak { .. } => Opcode::Croak,
      Instruction::Load { .. } => Opcode::Load,
      Instruction::Reload { .. } => Opcode::Reload,
      Instruction::Map { .. } => Opcode::Map,
      Instruction::Move { .. } => Opcode::Move,
      Instruction::Back => Opcode::Back,
      Instruction::InCmp { .. } => Opcode::InCmp,
      Instruction::Halt => Opcode::Halt,
      Instruction::MSize { .. } => Opcode::MSize,
      Instruction::MOut { .. } => Opcode::MOut,
      Instruction::MNext { .. } => Opcode::MNext,
      Instruction::MPrev { .. } => Opcode::MPrev,
      Instruction::SetF { .. } => Opcode::SetF,
      Instruction::ResetF { .. } => Opcode::ResetF,
      Instruction::Lang { .. } => Opcode::Lang,
    }
  }

  /**
    Encodes the instruction into `out`. The only failure is a symbol or byte
    string longer than the one-byte length prefix can carry.
  */
  pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), CodeError> {
    out.push(self.opcode().code());
    match self {
      Instruction::Catch { target, flag, invert } => {
        push_str(out, target)?;
        out.extend_from_slice(&flag.to_be_bytes());
        out.push(*invert as u8);
      }

      Instruction::Croak { flag, invert } => {
        out.extend_from_slice(&flag.to_be_bytes());
        out.push(*invert as u8);
      }

      Instruction::Load { symbol, reserve } => {
        push_str(out, symbol)?;
        out.push(*reserve);
      }

      | Instruction::Reload { symbol }
      | Instruction::Map { symbol } => {
        push_str(out, symbol)?;
      }

      Instruction::Move { target } => {
        push_str(out, target)?;
      }

      Instruction::InCmp { selector, target } => {
        push_str(out, selector)?;
        push_str(out, target)?;
      }

      Instruction::MSize { min, max } => {
        out.extend_from_slice(&min.to_be_bytes());
        out.extend_from_slice(&max.to_be_bytes());
      }

      | Instruction::MOut { choice, title }
      | Instruction::MNext { choice, title }
      | Instruction::MPrev { choice, title } => {
        push_str(out, choice)?;
        push_str(out, title)?;
      }

      | Instruction::SetF { flag }
      | Instruction::ResetF { flag } => {
        out.extend_from_slice(&flag.to_be_bytes());
      }

      Instruction::Lang { tag } => {
        push_str(out, tag)?;
      }

      | Instruction::Back
      | Instruction::Halt => {}
    }
    Ok(())
  }

  pub fn encode(&self) -> Result<Vec<u8>, CodeError> {
    let mut out = Vec::new();
    self.encode_into(&mut out)?;
    Ok(out)
  }
}

impl Display for Instruction {
  /// Renders the instruction in assembly form, `MNEMONIC arg arg`.
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let opcode = self.opcode();
    match self {
      Instruction::Catch { target, flag, invert } => {
        write!(f, "{} {} {} {}", opcode, target, flag, *invert as u8)
      }
      Instruction::Croak { flag, invert } => {
        write!(f, "{} {} {}", opcode, flag, *invert as u8)
      }
      Instruction::Load { symbol, reserve } => write!(f, "{} {} {}", opcode, symbol, reserve),
      | Instruction::Reload { symbol }
      | Instruction::Map { symbol } => write!(f, "{} {}", opcode, symbol),
      Instruction::Move { target } => write!(f, "{} {}", opcode, target),
      Instruction::InCmp { selector, target } => {
        write!(f, "{} {} {}", opcode, selector, target)
      }
      Instruction::MSize { min, max } => write!(f, "{} {} {}", opcode, min, max),
      | Instruction::MOut { choice, title }
      | Instruction::MNext { choice, title }
      | Instruction::MPrev { choice, title } => {
        write!(f, "{} {} {}", opcode, choice, title)
      }
      | Instruction::SetF { flag }
      | Instruction::ResetF { flag } => write!(f, "{} {}", opcode, flag),
      Instruction::Lang { tag } => write!(f, "{} {}", opcode, tag),
      | Instruction::Back
      | Instruction::Halt => write!(f, "{}", opcode),
    }
  }
}

/**
  Decodes one instruction from the front of `code`, returning it together with
  the remaining bytes. An unassigned opcode byte fails with `InvalidOp`; an
  argument block running past the end of `code` fails with `Truncated`.
*/
pub fn decode_instruction(code: &[u8]) -> Result<(Instruction, &[u8]), CodeError> {
  let (&op_byte, mut rest) = match code.split_first() {
    Some(split) => split,
    None => return Err(CodeError::Truncated(Opcode::Halt)),
  };
  let opcode = Opcode::try_from(op_byte).map_err(|_| CodeError::InvalidOp(op_byte))?;

  let instruction = match opcode {
    Opcode::Catch => {
      let target = take_str(&mut rest, opcode)?;
      let flag = take_u32(&mut rest, opcode)?;
      let invert = take_u8(&mut rest, opcode)? != 0;
      Instruction::Catch { target, flag, invert }
    }

    Opcode::Croak => {
      let flag = take_u32(&mut rest, opcode)?;
      let invert = take_u8(&mut rest, opcode)? != 0;
      Instruction::Croak { flag, invert }
    }

    Opcode::Load => {
      let symbol = take_str(&mut rest, opcode)?;
      let reserve = take_u8(&mut rest, opcode)?;
      Instruction::Load { symbol, reserve }
    }

    Opcode::Reload => Instruction::Reload { symbol: take_str(&mut rest, opcode)? },
    Opcode::Map => Instruction::Map { symbol: take_str(&mut rest, opcode)? },
    Opcode::Move => Instruction::Move { target: take_str(&mut rest, opcode)? },
    Opcode::Back => Instruction::Back,

    Opcode::InCmp => {
      let selector = take_str(&mut rest, opcode)?;
      let target = take_str(&mut rest, opcode)?;
      Instruction::InCmp { selector, target }
    }

    Opcode::Halt => Instruction::Halt,

    Opcode::MSize => {
      let min = take_u16(&mut rest, opcode)?;
      let max = take_u32(&mut rest, opcode)?;
      Instruction::MSize { min, max }
    }

    Opcode::MOut => {
      let choice = take_str(&mut rest, opcode)?;
      let title = take_str(&mut rest, opcode)?;
      Instruction::MOut { choice, title }
    }

    Opcode::MNext => {
      let choice = take_str(&mut rest, opcode)?;
      let title = take_str(&mut rest, opcode)?;
      Instruction::MNext { choice, title }
    }

    Opcode::MPrev => {
      let choice = take_str(&mut rest, opcode)?;
      let title = take_str(&mut rest, opcode)?;
      Instruction::MPrev { choice, title }
    }

    Opcode::SetF => Instruction::SetF { flag: take_u32(&mut rest, opcode)? },
    Opcode::ResetF => Instruction::ResetF { flag: take_u32(&mut rest, opcode)? },
    Opcode::Lang => Instruction::Lang { tag: take_str(&mut rest, opcode)? },
  };

  Ok((instruction, rest))
}

/// Decodes an entire code blob. Used by the disassembler and tests; the
/// interpreter decodes incrementally so a halt preserves the remainder.
pub fn decode_all(mut code: &[u8]) -> Result<Vec<Instruction>, CodeError> {
  let mut out = Vec::new();
  while !code.is_empty() {
    let (instruction, rest) = decode_instruction(code)?;
    out.push(instruction);
    code = rest;
  }
  Ok(out)
}

fn push_str(out: &mut Vec<u8>, s: &str) -> Result<(), CodeError> {
  if s.len() > u8::MAX as usize {
    return Err(CodeError::ArgumentTooLong);
  }
  out.push(s.len() as u8);
  out.extend_from_slice(s.as_bytes());
  Ok(())
}

fn take_u8(rest: &mut &[u8], opcode: Opcode) -> Result<u8, CodeError> {
  let (&v, tail) = rest.split_first().ok_or(CodeError::Truncated(opcode))?;
  *rest = tail;
  Ok(v)
}

fn take_u16(rest: &mut &[u8], opcode: Opcode) -> Result<u16, CodeError> {
  if rest.len() < 2 {
    return Err(CodeError::Truncated(opcode));
  }
  let (head, tail) = rest.split_at(2);
  *rest = tail;
  Ok(u16::from_be_bytes([head[0], head[1]]))
}

fn take_u32(rest: &mut &[u8], opcode: Opcode) -> Result<u32, CodeError> {
  if rest.len() < 4 {
    return Err(CodeError::Truncated(opcode));
  }
  let (head, tail) = rest.split_at(4);
  *rest = tail;
  Ok(u32::from_be_bytes([head[0], head[1], head[2], head[3]]))
}

fn take_str(rest: &mut &[u8], opcode: Opcode) -> Result<String, CodeError> {
  let len = take_u8(rest, opcode)? as usize;
  if rest.len() < len {
    return Err(CodeError::Truncated(opcode));
  }
  let (head, tail) = rest.split_at(len);
  *rest = tail;
  String::from_utf8(head.to_vec()).map_err(|_| CodeError::BadSymbol(opcode))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encode_decode_every_opcode() {
    let instructions = vec![
      Instruction::Catch { target: "fail".into(), flag: 9, invert: true },
      Instruction::Croak { flag: 10, invert: false },
      Instruction::Load { symbol: "who".into(), reserve: 8 },
      Instruction::Reload { symbol: "who".into() },
      Instruction::Map { symbol: "who".into() },
      Instruction::Move { target: "sub".into() },
      Instruction::Back,
      Instruction::InCmp { selector: "1".into(), target: "sub".into() },
      Instruction::Halt,
      Instruction::MSize { min: 16, max: 160 },
      Instruction::MOut { choice: "1".into(), title: "to_sub".into() },
      Instruction::MNext { choice: "11".into(), title: "next".into() },
      Instruction::MPrev { choice: "22".into(), title: "prev".into() },
      Instruction::SetF { flag: 8 },
      Instruction::ResetF { flag: 8 },
      Instruction::Lang { tag: "nor".into() },
    ];
    let mut blob = Vec::new();
    for instruction in &instructions {
      instruction.encode_into(&mut blob).unwrap();
    }
    assert_eq!(decode_all(&blob).unwrap(), instructions);
  }

  #[test]
  fn wire_layout_is_byte_exact() {
    let b = Instruction::InCmp { selector: "1".into(), target: "sub".into() }
      .encode()
      .unwrap();
    assert_eq!(b, vec![0x08, 0x01, b'1', 0x03, b's', b'u', b'b']);

    let b = Instruction::Catch { target: "x".into(), flag: 9, invert: true }
      .encode()
      .unwrap();
    assert_eq!(b, vec![0x01, 0x01, b'x', 0, 0, 0, 9, 1]);

    let b = Instruction::MSize { min: 16, max: 160 }.encode().unwrap();
    assert_eq!(b, vec![0x0a, 0, 16, 0, 0, 0, 160]);
  }

  #[test]
  fn invalid_opcode() {
    assert_eq!(decode_instruction(&[0xee]), Err(CodeError::InvalidOp(0xee)));
    assert_eq!(decode_instruction(&[0x00]), Err(CodeError::InvalidOp(0x00)));
  }

  #[test]
  fn truncated_argument() {
    // LOAD with a symbol length running past the end
    assert_eq!(
      decode_instruction(&[0x03, 0x05, b'a']),
      Err(CodeError::Truncated(Opcode::Load))
    );
    // SETF missing flag bytes
    assert_eq!(
      decode_instruction(&[0x0e, 0x00, 0x00]),
      Err(CodeError::Truncated(Opcode::SetF))
    );
  }

  #[test]
  fn symbol_too_long() {
    let long = "x".repeat(300);
    assert_eq!(
      Instruction::Move { target: long }.encode(),
      Err(CodeError::ArgumentTooLong)
    );
  }

  #[test]
  fn display_is_assembly_text() {
    let i = Instruction::InCmp { selector: "1".into(), target: "sub".into() };
    assert_eq!(i.to_string(), "INCMP 1 sub");
    assert_eq!(Instruction::Back.to_string(), "BACK");
    assert_eq!(
      Instruction::Catch { target: "f".into(), flag: 9, invert: false }.to_string(),
      "CATCH f 9 0"
    );
  }

  #[test]
  fn decode_preserves_remainder() {
    let mut blob = Instruction::Halt.encode().unwrap();
    blob.extend(Instruction::Back.encode().unwrap());
    let (first, rest) = decode_instruction(&blob).unwrap();
    assert_eq!(first, Instruction::Halt);
    assert_eq!(rest, &[0x07][..]);
  }
}
