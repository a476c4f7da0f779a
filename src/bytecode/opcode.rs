/*!
  Opcodes of the dialog virtual machine.

  The numeric values are the on-disk encoding and are never reordered or
  reused. 0x00 is deliberately unassigned so that zeroed storage decodes as
  invalid rather than as an instruction.
*/

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display as StrumDisplay, EnumString, IntoStaticStr};

// Order-dependencies: `Instruction::decode` and `bytecode::assembly` map
// arguments by opcode. Adding an opcode means extending both.
#[derive(
  StrumDisplay, IntoStaticStr, EnumString, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,         PartialEq,        Debug, Hash,
)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
pub enum Opcode {
  /// Branch to a node when a flag matches, without growing the path.
  Catch = 0x01,
  /// Terminate the session when a flag matches.
  Croak = 0x02,
  /// Invoke an external function, cache the content under its symbol.
  Load = 0x03,
  /// Re-invoke and overwrite an existing cache entry.
  Reload = 0x04,
  /// Mark a symbol as a template variable for the next render.
  Map = 0x05,
  /// Descend to a node.
  Move = 0x06,
  /// Ascend one level.
  Back = 0x07,
  /// Compare input to a selector, navigate on match.
  InCmp = 0x08,
  /// Stop execution for this turn and await input.
  Halt = 0x09,
  /// Advise render sizing.
  MSize = 0x0a,
  /// Append a menu entry.
  MOut = 0x0b,
  /// Set the next-page browse entry.
  MNext = 0x0c,
  /// Set the previous-page browse entry.
  MPrev = 0x0d,
  /// Set a user flag.
  SetF = 0x0e,
  /// Clear a user flag.
  ResetF = 0x0f,
  /// Set the session language.
  Lang = 0x10,
}

impl Opcode {
  /// The 8-bit value as written to bytecode.
  pub fn code(&self) -> u8 {
    (*self).into()
  }
}
