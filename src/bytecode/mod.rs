/*!

  On-disk bytecode for dialog nodes. A node's code is a flat sequence of
  instructions with no header and no trailer. Each instruction is a one-byte
  opcode followed by its argument block: length-prefixed symbols and byte
  strings (`len:u8 || bytes`) and big-endian fixed-width integers.

  The encoding is the compatibility contract: code assembled by one build must
  execute on any later build, so opcode numbers are fixed and never reused.
  The decoded `Instruction` form is what the interpreter dispatches on; an
  enum is used for the whole record (unlike tighter packed designs) because
  node code is short-lived and measured in tens of records, not millions.

*/

mod assembly;
mod instruction;
mod opcode;

pub use assembly::{assemble, disassemble, parse_assembly, AsmError, FlagSpec};
pub use instruction::{decode_all, decode_instruction, Instruction};
pub use opcode::Opcode;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
  #[error("invalid opcode 0x{0:02x}")]
  InvalidOp(u8),
  #[error("truncated argument block for {0}")]
  Truncated(Opcode),
  #[error("symbol argument for {0} is not valid utf-8")]
  BadSymbol(Opcode),
  #[error("symbol or byte string exceeds 255 bytes")]
  ArgumentTooLong,
}
