//! Declarative patch definitions
//!
//! A [`PatchDef`] picks its target function by [`Fingerprint`]: the function's
//! name, opcodes it must contain and strings it must reference. The action
//! then either replaces the body, runs a callback on a [`PatchContext`], or
//! applies nested definitions to the closures the matched function creates.
//!
//! Definitions are loadable from JSON:
//!
//! ```json
//! {
//!   "identifier": "isDeveloper",
//!   "replace": [["LoadConstTrue", 0], ["Ret", 0]]
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use hbc_bytecode::{Opcode, OperandRole, RawInstruction, instructions};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Deserializer};

use crate::context::PatchContext;
use crate::error::{PatchError, Result};
use crate::session::PatchSession;

/// What a function contains, for picking patch targets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint {
    /// Function name string id
    pub name: u32,
    /// Every opcode used
    pub opcodes: FxHashSet<Opcode>,
    /// Every string id referenced
    pub strings: FxHashSet<u32>,
    /// Every bigint id referenced
    pub bigints: FxHashSet<u32>,
    /// Closures created, in first-use order
    pub closures: Vec<u32>,
}

impl Fingerprint {
    /// Fingerprint of a function's current bytecode
    pub fn of(session: &PatchSession, id: u32) -> Result<Self> {
        let name = session.module().function(id)?.header.function_name;
        let bytecode = session.bytecode(id)?.to_bytes();
        let mut fp = Fingerprint {
            name,
            ..Fingerprint::default()
        };

        for insn in instructions(&bytecode) {
            let insn = insn?;
            fp.opcodes.insert(insn.opcode());
            for (_, id) in insn.operands_with_role(OperandRole::String) {
                fp.strings.insert(id);
            }
            for (_, id) in insn.operands_with_role(OperandRole::BigInt) {
                fp.bigints.insert(id);
            }
            for (_, id) in insn.operands_with_role(OperandRole::Function) {
                if !fp.closures.contains(&id) {
                    fp.closures.push(id);
                }
            }
        }
        Ok(fp)
    }
}

/// Callback run on a matched function
pub type ApplyFn = Arc<dyn Fn(&mut PatchContext<'_>) -> Result<()> + Send + Sync>;

/// What to do with a matched function
#[derive(Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchAction {
    /// Match these definitions against the function's closures
    #[serde(deserialize_with = "one_or_many")]
    Patches(Vec<PatchDef>),
    /// Replace the whole body
    Replace(Vec<RawInstruction>),
    /// Run a callback
    #[serde(skip)]
    Apply(ApplyFn),
}

impl fmt::Debug for PatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchAction::Patches(defs) => f.debug_tuple("Patches").field(defs).finish(),
            PatchAction::Replace(insns) => f.debug_tuple("Replace").field(insns).finish(),
            PatchAction::Apply(_) => f.write_str("Apply(..)"),
        }
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<PatchDef>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(Box<PatchDef>),
        Many(Vec<PatchDef>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(def) => vec![*def],
        OneOrMany::Many(defs) => defs,
    })
}

/// A fingerprint plus an action
#[derive(Debug, Clone, Deserialize)]
pub struct PatchDef {
    /// Exact function name
    #[serde(default)]
    pub identifier: Option<String>,
    /// Substrings of strings the function must reference
    #[serde(default)]
    pub strings: Vec<String>,
    /// Opcodes the function must use
    #[serde(default)]
    pub opcodes: Vec<Opcode>,
    /// Action
    #[serde(flatten)]
    pub action: PatchAction,
}

impl PatchDef {
    fn with_action(action: PatchAction) -> Self {
        Self {
            identifier: None,
            strings: Vec::new(),
            opcodes: Vec::new(),
            action,
        }
    }

    /// Replace the matched function's body
    pub fn replace(insns: Vec<RawInstruction>) -> Self {
        Self::with_action(PatchAction::Replace(insns))
    }

    /// Run `f` on the matched function
    pub fn apply<F>(f: F) -> Self
    where
        F: Fn(&mut PatchContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self::with_action(PatchAction::Apply(Arc::new(f)))
    }

    /// Match `defs` against the matched function's closures
    pub fn nested(defs: Vec<PatchDef>) -> Self {
        Self::with_action(PatchAction::Patches(defs))
    }

    /// Require this function name
    pub fn identifier(mut self, name: impl Into<String>) -> Self {
        self.identifier = Some(name.into());
        self
    }

    /// Require a referenced string containing `text`
    pub fn string(mut self, text: impl Into<String>) -> Self {
        self.strings.push(text.into());
        self
    }

    /// Require an opcode
    pub fn opcode(mut self, opcode: Opcode) -> Self {
        self.opcodes.push(opcode);
        self
    }

    /// Parse one definition or a list of them from JSON
    pub fn from_json(text: &str) -> serde_json::Result<Vec<PatchDef>> {
        let mut de = serde_json::Deserializer::from_str(text);
        let defs = one_or_many(&mut de)?;
        de.end()?;
        Ok(defs)
    }

    fn matches(&self, compiled: &Compiled, fp: &Fingerprint) -> bool {
        compiled.identifier.is_none_or(|id| id == fp.name)
            && self.opcodes.iter().all(|op| fp.opcodes.contains(op))
            && compiled.strings.iter().all(|id| fp.strings.contains(id))
    }
}

/// Result of running one [`PatchDef`]
#[derive(Debug)]
pub enum PatchOutcome {
    /// Applied to the only matching function
    Applied {
        /// Target function
        function: u32,
        /// Outcomes of nested definitions
        nested: Vec<PatchOutcome>,
    },
    /// No function matched
    NotFound,
    /// Several functions matched; applied to the first
    NotUnique {
        /// Function the patch was applied to
        function: u32,
        /// Number of matching functions
        count: usize,
        /// Outcomes of nested definitions
        nested: Vec<PatchOutcome>,
    },
    /// Fingerprint lookup or action failed
    Failed(PatchError),
}

impl PatchOutcome {
    /// Whether the action ran to completion
    pub fn is_applied(&self) -> bool {
        matches!(self, PatchOutcome::Applied { .. } | PatchOutcome::NotUnique { .. })
    }

    /// Outcomes of nested definitions
    pub fn nested(&self) -> &[PatchOutcome] {
        match self {
            PatchOutcome::Applied { nested, .. } | PatchOutcome::NotUnique { nested, .. } => nested,
            _ => &[],
        }
    }
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchOutcome::Applied { function, .. } => write!(f, "applied to function {function}"),
            PatchOutcome::NotFound => f.write_str("did not match anything"),
            PatchOutcome::NotUnique { function, count, .. } => {
                write!(f, "matched {count} functions, applied to function {function}")
            }
            PatchOutcome::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

/// String ids a definition's fingerprint resolved to
struct Compiled {
    identifier: Option<u32>,
    strings: Vec<u32>,
}

fn compile(session: &PatchSession, def: &PatchDef) -> Result<Compiled> {
    let identifier = def
        .identifier
        .as_deref()
        .map(|name| {
            session
                .find_string(name)
                .ok_or_else(|| PatchError::IdentifierNotFound(name.to_owned()))
        })
        .transpose()?;
    let strings = def
        .strings
        .iter()
        .map(|text| {
            session
                .find_partial_string(text)
                .ok_or_else(|| PatchError::StringNotFound(text.clone()))
        })
        .collect::<Result<_>>()?;
    Ok(Compiled { identifier, strings })
}

/// Run definitions against every function of the session
pub fn run_patches(session: &mut PatchSession, defs: &[PatchDef]) -> Vec<PatchOutcome> {
    let candidates: Vec<u32> = (0..session.function_count()).collect();
    run_over(session, defs, &candidates)
}

struct Hit {
    function: u32,
    closures: Vec<u32>,
    count: usize,
}

fn run_over(session: &mut PatchSession, defs: &[PatchDef], candidates: &[u32]) -> Vec<PatchOutcome> {
    let compiled: Vec<Result<Compiled>> = defs.iter().map(|def| compile(session, def)).collect();
    let mut hits: Vec<Option<Hit>> = defs.iter().map(|_| None).collect();
    let mut order = Vec::new();

    for &id in candidates {
        let fp = match Fingerprint::of(session, id) {
            Ok(fp) => fp,
            Err(err) => {
                tracing::warn!(function = id, %err, "skipping undecodable function");
                continue;
            }
        };
        for (index, def) in defs.iter().enumerate() {
            let Ok(c) = &compiled[index] else { continue };
            if !def.matches(c, &fp) {
                continue;
            }
            if let Some(hit) = &mut hits[index] {
                hit.count += 1;
                tracing::warn!(patch = index, first = hit.function, also = id, "patch is not unique");
            } else {
                hits[index] = Some(Hit {
                    function: id,
                    closures: fp.closures.clone(),
                    count: 1,
                });
                order.push(index);
            }
        }
    }

    let mut outcomes: Vec<Option<PatchOutcome>> = compiled
        .into_iter()
        .enumerate()
        .map(|(index, c)| match c {
            Err(err) => {
                tracing::warn!(patch = index, %err, "patch fingerprint did not resolve");
                Some(PatchOutcome::Failed(err))
            }
            Ok(_) if hits[index].is_none() => {
                tracing::warn!(patch = index, def = ?defs[index], "patch did not match anything");
                Some(PatchOutcome::NotFound)
            }
            Ok(_) => None,
        })
        .collect();

    for index in order {
        let Some(hit) = hits[index].take() else { continue };
        let result = apply(session, &defs[index].action, &hit);
        outcomes[index] = Some(match result {
            Err(err) => {
                tracing::warn!(patch = index, function = hit.function, %err, "patch failed");
                PatchOutcome::Failed(err)
            }
            Ok(nested) if hit.count > 1 => PatchOutcome::NotUnique {
                function: hit.function,
                count: hit.count,
                nested,
            },
            Ok(nested) => {
                tracing::debug!(patch = index, function = hit.function, "patch applied");
                PatchOutcome::Applied {
                    function: hit.function,
                    nested,
                }
            }
        });
    }

    outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap_or(PatchOutcome::NotFound))
        .collect()
}

fn apply(session: &mut PatchSession, action: &PatchAction, hit: &Hit) -> Result<Vec<PatchOutcome>> {
    match action {
        PatchAction::Patches(defs) => Ok(run_over(session, defs, &hit.closures)),
        PatchAction::Replace(insns) => {
            PatchContext::new(session, hit.function)?.replace_all(insns)?;
            Ok(Vec::new())
        }
        PatchAction::Apply(f) => {
            f(&mut PatchContext::new(session, hit.function)?)?;
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query;
    use hbc_bytecode::{FunctionSpec, Module, Operand};

    fn module() -> Module {
        let mut b = Module::builder();
        let outer = b.add_string("outer");
        let flag = b.add_string("featureFlag");
        let inner = b.add_string("inner");
        b.add_function(FunctionSpec::new(outer).frame_size(2).instructions(vec![
            RawInstruction::new(Opcode::CreateClosure, [0.into(), 0.into(), 1.into()]),
            RawInstruction::new(Opcode::LoadConstString, [1.into(), flag.into()]),
            RawInstruction::new(Opcode::Ret, [0.into()]),
        ]))
        .unwrap();
        b.add_function(FunctionSpec::new(inner).frame_size(1).instructions(vec![
            RawInstruction::new(Opcode::LoadConstFalse, [0.into()]),
            RawInstruction::new(Opcode::Ret, [0.into()]),
        ]))
        .unwrap();
        b.build()
    }

    #[test]
    fn test_fingerprint() {
        let session = PatchSession::new(module());
        let fp = Fingerprint::of(&session, 0).unwrap();
        assert_eq!(fp.name, 0);
        assert_eq!(fp.closures, [1]);
        assert!(fp.strings.contains(&1));
        assert!(fp.opcodes.contains(&Opcode::LoadConstString));
        assert!(fp.bigints.is_empty());
    }

    #[test]
    fn test_replace_by_identifier() {
        let mut session = PatchSession::new(module());
        let defs = [PatchDef::replace(vec![
            RawInstruction::new(Opcode::LoadConstTrue, [0.into()]),
            RawInstruction::new(Opcode::Ret, [0.into()]),
        ])
        .identifier("inner")];
        let outcomes = run_patches(&mut session, &defs);
        assert!(matches!(outcomes[..], [PatchOutcome::Applied { function: 1, .. }]));
        assert_eq!(session.dirty_functions().collect::<Vec<_>>(), [1]);
    }

    #[test]
    fn test_nested_and_apply() {
        let mut session = PatchSession::new(module());
        let defs = [PatchDef::nested(vec![PatchDef::apply(|ctx| {
            let found = ctx.match_first(&[query!(LoadConstFalse)])?;
            ctx.replace_one(&found[0], &[RawInstruction::new(Opcode::LoadConstTrue, [found[0].operands[0]])])
        })])
        .string("Flag")];
        let outcomes = run_patches(&mut session, &defs);
        assert!(outcomes[0].is_applied());
        assert!(matches!(outcomes[0].nested(), [PatchOutcome::Applied { function: 1, .. }]));

        let module = session.commit();
        let ops: Vec<_> = module.instructions(1).unwrap().map(|i| i.unwrap().opcode()).collect();
        assert_eq!(ops, [Opcode::LoadConstTrue, Opcode::Ret]);
    }

    #[test]
    fn test_failures_are_reported() {
        let mut session = PatchSession::new(module());
        let defs = [
            PatchDef::replace(vec![]).identifier("missing"),
            PatchDef::replace(vec![]).string("nowhere"),
            PatchDef::replace(vec![]).opcode(Opcode::Throw),
            PatchDef::replace(vec![]).opcode(Opcode::Ret),
            PatchDef::apply(|ctx| ctx.match_first(&[query!(Throw)]).map(drop)).identifier("outer"),
        ];
        let outcomes = run_patches(&mut session, &defs);
        assert!(matches!(&outcomes[0], PatchOutcome::Failed(PatchError::IdentifierNotFound(s)) if s == "missing"));
        assert!(matches!(&outcomes[1], PatchOutcome::Failed(PatchError::StringNotFound(_))));
        assert!(matches!(outcomes[2], PatchOutcome::NotFound));
        assert!(matches!(outcomes[3], PatchOutcome::NotUnique { function: 0, count: 2, .. }));
        assert!(matches!(outcomes[4], PatchOutcome::Failed(PatchError::MatchFailed { .. })));
        // The non-unique replacement only touched the first match.
        assert_eq!(session.dirty_functions().collect::<Vec<_>>(), [0]);
    }

    #[test]
    fn test_json_definitions() {
        let defs = PatchDef::from_json(
            r#"[
                { "identifier": "inner", "replace": [["LoadConstTrue", 0], ["Ret", 0]] },
                { "strings": ["Flag"], "opcodes": ["CreateClosure"],
                  "patches": { "identifier": "inner", "replace": [["Ret", 0]] } }
            ]"#,
        )
        .unwrap();
        assert_eq!(defs.len(), 2);
        assert!(matches!(&defs[0].action, PatchAction::Replace(list) if list.len() == 2));
        assert_eq!(defs[1].opcodes, [Opcode::CreateClosure]);
        let PatchAction::Patches(nested) = &defs[1].action else {
            panic!("expected nested patches");
        };
        assert_eq!(nested[0].identifier.as_deref(), Some("inner"));

        let mut session = PatchSession::new(module());
        let outcomes = run_patches(&mut session, &defs[1..]);
        assert!(matches!(outcomes[0].nested(), [PatchOutcome::Applied { function: 1, .. }]));
        let module = session.commit();
        let ops: Vec<_> = module.instructions(1).unwrap().map(|i| i.unwrap().operand(0)).collect();
        assert_eq!(ops, [Operand::Int(0)]);
    }
}
