//! Bytecode representation and editing
//!
//! ### Structure
//!
//! A method body ([`Code`]) is a linear stream of [`Insn`]s kept in an [`InsnList`]. Branch
//! targets, exception ranges, and debug tables refer to [`SynLabel`]s, which are placed in the
//! stream as pseudo-instructions. Every instruction in the list has a stable [`InsnId`] that
//! survives insertions and removals around it.
//!
//! ### Editing
//!
//! Transformations walk the stream and queue changes in an [`EditBuffer`], anchored on instruction
//! ids. The buffer is committed atomically once the walk is over. New instruction sequences are
//! produced with an [`InsnBuilder`], which knows how to pick the shortest encoding for constants
//! and how to lay out switches.
//!
//! ### Frames
//!
//! The verifier fills in [`Code::frames`], the stack map frames a class file of version 50 or
//! later needs at every branch target and exception handler.

mod buffer;
mod builder;
mod code;
mod dump;
mod frame;
mod insn;
mod label;
mod list;
pub mod opcode;

pub use buffer::*;
pub use builder::*;
pub use code::*;
pub use dump::*;
pub use frame::*;
pub use insn::*;
pub use label::*;
pub use list::*;
