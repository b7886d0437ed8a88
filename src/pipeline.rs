//! Driver pipeline: parse a scenario, compare its two types and build the
//! thunk between them.
//!
//! ```text
//! source ─► Scenario::parse ─► compare ─► Report
//!                  │
//!                  └─► ThunkCompiler ─► CLIF text / object bytes
//! ```

use std::fmt;

use derive_more::{Display, From};
use polyabi_core::{AbstractionComparator, CanonicalType, ExplosionKind, InvariantViolation};
use polyabi_cranelift::{CompilationError, ThunkCompiler, ThunkRequest};
use target_lexicon::Triple;

use crate::parser::{ParseError, Scenario};

#[derive(Debug, Display, From)]
pub enum PipelineError {
    #[display("parse error: {_0}")]
    Parse(ParseError),

    #[display("{_0}")]
    Invariant(InvariantViolation),

    #[display("{_0}")]
    Compilation(CompilationError),

    #[display("`{_0}` is not a function type, no thunk can be built")]
    #[from(ignore)]
    NotAFunction(String),
}

impl std::error::Error for PipelineError {}

/// Knobs shared by `inspect` and `emit`.
#[derive(Clone, Debug)]
pub struct Options {
    /// Target triple, the host if unset.
    pub target: Option<Triple>,
    /// Explosion used for the thunk.
    pub explosion: ExplosionKind,
    /// Uncurry level for the function comparison.
    pub uncurry_level: u32,
    pub thunk_name: String,
    pub generic_name: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            target: None,
            explosion: ExplosionKind::Maximal,
            uncurry_level: 0,
            thunk_name: "thunk".to_string(),
            generic_name: "generic".to_string(),
        }
    }
}

/// How the representations of the two types compare.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Comparison {
    pub orig: String,
    pub subst: String,
    pub bindings: Vec<(String, String)>,
    pub memory: bool,
    pub explosion: Vec<(ExplosionKind, bool)>,
    /// Present when both types are functions.
    pub function: Option<(u32, Vec<(ExplosionKind, bool)>)>,
}

fn verdict(differs: bool) -> &'static str {
    if differs { "differs" } else { "same" }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "orig:  {}", self.orig)?;
        writeln!(f, "subst: {}", self.subst)?;
        if !self.bindings.is_empty() {
            writeln!(f, "bindings:")?;
            for (archetype, replacement) in &self.bindings {
                writeln!(f, "  {archetype} = {replacement}")?;
            }
        }
        writeln!(f, "memory: {}", verdict(self.memory))?;
        for (kind, differs) in &self.explosion {
            writeln!(f, "explosion ({kind}): {}", verdict(*differs))?;
        }
        if let Some((level, function)) = &self.function {
            for (kind, differs) in function {
                writeln!(f, "function ({kind}, uncurry {level}): {}", verdict(*differs))?;
            }
        }
        Ok(())
    }
}

/// Everything `inspect` prints.
#[derive(Clone, Debug)]
pub struct Report {
    pub comparison: Comparison,
    /// Cranelift IR of the thunk, for function scenarios.
    pub thunk: Option<String>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.comparison)?;
        if let Some(clif) = &self.thunk {
            writeln!(f)?;
            write!(f, "{clif}")?;
        }
        Ok(())
    }
}

/// Run the three predicates over a scenario.
pub fn compare<'db>(
    db: &'db dyn salsa::Database,
    scenario: &Scenario<'db>,
    uncurry_level: u32,
) -> Result<Comparison, PipelineError> {
    let comparator = AbstractionComparator::new(db);
    let (orig, subst) = (scenario.orig, scenario.subst);

    let memory = comparator.differs_in_memory(orig, subst)?;
    let explosion = ExplosionKind::ALL
        .iter()
        .map(|&kind| Ok((kind, comparator.differs_in_explosion(orig, subst, kind)?)))
        .collect::<Result<Vec<_>, InvariantViolation>>()?;
    let function = if is_function_pair(db, orig, subst) {
        let verdicts = ExplosionKind::ALL
            .iter()
            .map(|&kind| {
                let differs = comparator.differs_as_function(orig, subst, kind, uncurry_level)?;
                Ok((kind, differs))
            })
            .collect::<Result<Vec<_>, InvariantViolation>>()?;
        Some((uncurry_level, verdicts))
    } else {
        None
    };

    Ok(Comparison {
        orig: orig.display(db).to_string(),
        subst: subst.display(db).to_string(),
        bindings: scenario
            .substitutions
            .iter()
            .map(|entry| {
                (
                    entry.archetype.display(db).to_string(),
                    entry.replacement.display(db).to_string(),
                )
            })
            .collect(),
        memory,
        explosion,
        function,
    })
}

fn thunk_request<'db>(
    db: &'db dyn salsa::Database,
    scenario: &Scenario<'db>,
    options: &Options,
) -> Result<ThunkRequest<'db>, PipelineError> {
    for ty in [scenario.orig, scenario.subst] {
        if !ty.is_function(db) {
            return Err(PipelineError::NotAFunction(ty.display(db).to_string()));
        }
    }
    Ok(ThunkRequest {
        name: options.thunk_name.clone(),
        callee: options.generic_name.clone(),
        orig: scenario.orig,
        subst: scenario.subst,
        substitutions: scenario.substitutions.clone(),
        kind: options.explosion,
    })
}

fn is_function_pair<'db>(
    db: &'db dyn salsa::Database,
    orig: CanonicalType<'db>,
    subst: CanonicalType<'db>,
) -> bool {
    orig.is_function(db) && subst.is_function(db)
}

/// Parse `source` and describe how its two types compare.
pub fn inspect(
    db: &dyn salsa::Database,
    source: &str,
    options: &Options,
) -> Result<Report, PipelineError> {
    let scenario = Scenario::parse(db, source)?;
    let comparison = compare(db, &scenario, options.uncurry_level)?;
    tracing::debug!(orig = %comparison.orig, subst = %comparison.subst, "compared");

    let thunk = if is_function_pair(db, scenario.orig, scenario.subst) {
        let request = thunk_request(db, &scenario, options)?;
        let mut compiler = ThunkCompiler::new(options.target.clone())?;
        Some(compiler.define_thunk(db, &request)?.clif)
    } else {
        None
    };

    Ok(Report { comparison, thunk })
}

/// Parse `source` and compile its thunk into an object file.
pub fn emit_object(
    db: &dyn salsa::Database,
    source: &str,
    options: &Options,
) -> Result<Vec<u8>, PipelineError> {
    let scenario = Scenario::parse(db, source)?;
    let request = thunk_request(db, &scenario, options)?;
    let mut compiler = ThunkCompiler::new(options.target.clone())?;
    let thunk = compiler.define_thunk(db, &request)?;
    tracing::debug!(thunk = %request.name, clif = %thunk.clif, "thunk defined");
    Ok(compiler.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use polyabi_core::AbiDatabase;

    fn comparison(source: &str, uncurry_level: u32) -> String {
        let db = AbiDatabase::default();
        let scenario = Scenario::parse(&db, source).unwrap();
        compare(&db, &scenario, uncurry_level).unwrap().to_string()
    }

    #[test]
    fn compares_boxed_tuple() {
        let report = comparison(
            "generic T\nbind T = (i32, f64)\norig ($T, i8)\nsubst ((i32, f64), i8)\n",
            0,
        );
        assert_snapshot!(report, @r"
        orig:  ($T, i8)
        subst: ((i32, f64), i8)
        bindings:
          $T = (i32, f64)
        memory: differs
        explosion (minimal): differs
        explosion (maximal): differs
        ");
    }

    #[test]
    fn compares_class_bound_function() {
        let report = comparison(
            "generic C: class\nbind C = object\norig ($C) -> $C\nsubst (object) -> object\n",
            0,
        );
        assert_snapshot!(report, @r"
        orig:  ($C) -> $C
        subst: (object) -> object
        bindings:
          $C = object
        memory: same
        explosion (minimal): same
        explosion (maximal): same
        function (minimal, uncurry 0): same
        function (maximal, uncurry 0): same
        ");
    }

    #[test]
    fn rejects_thunk_for_non_functions() {
        let db = AbiDatabase::default();
        let err = emit_object(&db, "orig i32\nsubst i32\n", &Options::default()).unwrap_err();
        assert!(matches!(err, PipelineError::NotAFunction(_)));
    }

    #[test]
    fn inspect_includes_thunk_ir() {
        let db = AbiDatabase::default();
        let report = inspect(
            &db,
            "generic T\nbind T = i64\norig ($T) -> $T\nsubst (i64) -> i64\n",
            &Options::default(),
        )
        .unwrap();
        let clif = report.thunk.unwrap();
        assert!(clif.contains("call fn0"), "{clif}");
    }
}
