//! Structural patching for Hermes bytecode modules
//!
//! A [`PatchSession`] takes ownership of a parsed [`Module`](hbc_bytecode::Module)
//! and edits function bodies through persistent byte [`Rope`]s. Targets are
//! found by [`Fingerprint`] and instruction [`query!`]es, edited through a
//! [`PatchContext`], and folded back into the module by
//! [`PatchSession::commit`], ready for [`hbc_bytecode::write_module`].
//!
//! ```no_run
//! use hbc_patch::{PatchDef, PatchSession, run_patches, query};
//!
//! # fn demo(module: hbc_bytecode::Module) -> hbc_patch::Result<()> {
//! let mut session = PatchSession::new(module);
//! let defs = [PatchDef::apply(|ctx| {
//!     let found = ctx.match_first(&[query!(LoadConstFalse)])?;
//!     ctx.replace_one(&found[0], &[found[0].with_operand(0, 0u8)])
//! })
//! .identifier("isDeveloper")];
//! for outcome in run_patches(&mut session, &defs) {
//!     println!("{outcome}");
//! }
//! let module = session.commit();
//! # let _ = module;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub use hbc_bytecode;

pub mod context;
pub mod error;
pub mod patches;
pub mod query;
pub mod rope;
pub mod session;
pub mod strings;

pub use context::PatchContext;
pub use error::{PatchError, Result};
pub use patches::{Fingerprint, PatchAction, PatchDef, PatchOutcome, run_patches};
pub use query::{InstructionQuery, Matched, QueryOperand, ResolvedQuery};
pub use rope::Rope;
pub use session::{FunctionEditor, PatchSession};
pub use strings::{PendingStrings, StringIndex, StringSource};
