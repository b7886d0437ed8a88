//! Textual scenarios: declarations plus an abstract/substituted type pair.
//!
//! ```text
//! # comments run to the end of the line
//! protocol Shape { area, draw }
//! generic T: Shape
//! generic U: class
//! bind T = any Shape
//! orig ($T, i32) -> $T
//! subst (any Shape, i32) -> any Shape
//! ```
//!
//! Every declaration occupies one line and may only refer to protocols and
//! generics declared above it.

use std::collections::HashMap;

use chumsky::prelude::*;
use derive_more::Display;
use polyabi_core::{
    CanonicalType, InvariantViolation, Protocol, ScalarType, Substitution, SubstitutionList,
};

type Extra<'src> = extra::Err<Rich<'src, char>>;

/// A type as written, before names are resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeExpr {
    /// A scalar name.
    Named(String),
    Archetype(String),
    Existential(String),
    Tuple(Vec<TypeExpr>),
    /// A parenthesized type without a trailing comma.
    Group(Box<TypeExpr>),
    Nominal {
        name: String,
        fields: Vec<(String, TypeExpr)>,
    },
    Function {
        params: Vec<TypeExpr>,
        result: Box<TypeExpr>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Bound {
    Class,
    Protocol(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decl {
    Protocol {
        name: String,
        requirements: Vec<String>,
    },
    Generic {
        name: String,
        bounds: Vec<Bound>,
    },
    Bind {
        generic: String,
        replacement: TypeExpr,
    },
    Orig(TypeExpr),
    Subst(TypeExpr),
}

#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum ParseError {
    #[display("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[display("line {line}: unknown type `{name}`")]
    UnknownType { line: usize, name: String },

    #[display("line {line}: unknown protocol `{name}`")]
    UnknownProtocol { line: usize, name: String },

    #[display("line {line}: unknown generic `${name}`")]
    UnknownGeneric { line: usize, name: String },

    #[display("line {line}: `{name}` is already declared")]
    Redeclared { line: usize, name: String },

    #[display("line {line}: {violation}")]
    Invalid {
        line: usize,
        violation: InvariantViolation,
    },

    #[display("missing `{keyword}` declaration")]
    Missing { keyword: &'static str },
}

impl std::error::Error for ParseError {}

fn keyword<'src>(word: &'static str) -> impl Parser<'src, &'src str, (), Extra<'src>> + Clone {
    just(word)
        .then_ignore(text::whitespace().at_least(1))
        .ignored()
}

fn name<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    text::ident().map(str::to_string).padded()
}

fn type_expr<'src>() -> impl Parser<'src, &'src str, TypeExpr, Extra<'src>> + Clone {
    recursive(|ty| {
        let archetype = just('$')
            .ignore_then(text::ident())
            .map(|name: &str| TypeExpr::Archetype(name.to_string()));

        let existential = keyword("any")
            .ignore_then(text::ident())
            .map(|name: &str| TypeExpr::Existential(name.to_string()));

        // `a, b, c` / `a, b,` / `a` / empty
        let parenthesized = ty
            .clone()
            .then_ignore(just(',').padded())
            .repeated()
            .collect::<Vec<_>>()
            .then(ty.clone().or_not())
            .delimited_by(just('(').padded(), just(')').padded())
            .map(|(mut elements, last): (Vec<TypeExpr>, Option<TypeExpr>)| {
                match (elements.is_empty(), last) {
                    (true, Some(only)) => TypeExpr::Group(Box::new(only)),
                    (_, last) => {
                        elements.extend(last);
                        TypeExpr::Tuple(elements)
                    }
                }
            });

        let fields = name()
            .then_ignore(just(':').padded())
            .then(ty.clone())
            .separated_by(just(',').padded())
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just('{').padded(), just('}').padded());

        let named = text::ident()
            .map(str::to_string)
            .then(fields.or_not())
            .map(|(name, fields)| match fields {
                Some(fields) => TypeExpr::Nominal { name, fields },
                None => TypeExpr::Named(name),
            });

        let atom = choice((archetype, existential, parenthesized, named)).padded();

        atom.then(just("->").padded().ignore_then(ty).or_not())
            .map(|(params, result)| match result {
                None => params,
                Some(result) => TypeExpr::Function {
                    params: match params {
                        TypeExpr::Tuple(params) => params,
                        TypeExpr::Group(param) => vec![*param],
                        param => vec![param],
                    },
                    result: Box::new(result),
                },
            })
    })
}

fn declaration<'src>() -> impl Parser<'src, &'src str, Decl, Extra<'src>> {
    let protocol = keyword("protocol")
        .ignore_then(name())
        .then(
            name()
                .separated_by(just(','))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just('{').padded(), just('}').padded()),
        )
        .map(|(name, requirements)| Decl::Protocol { name, requirements });

    let bound = name().map(|name| match name.as_str() {
        "class" => Bound::Class,
        _ => Bound::Protocol(name),
    });
    let generic = keyword("generic")
        .ignore_then(name())
        .then(
            just(':')
                .ignore_then(bound.separated_by(just('+')).at_least(1).collect::<Vec<_>>())
                .or_not(),
        )
        .map(|(name, bounds)| Decl::Generic {
            name,
            bounds: bounds.unwrap_or_default(),
        });

    let bind = keyword("bind")
        .ignore_then(just('$').or_not().padded())
        .ignore_then(name())
        .then_ignore(just('='))
        .then(type_expr())
        .map(|(generic, replacement)| Decl::Bind {
            generic,
            replacement,
        });

    let orig = keyword("orig").ignore_then(type_expr()).map(Decl::Orig);
    let subst = keyword("subst").ignore_then(type_expr()).map(Decl::Subst);

    choice((protocol, generic, bind, orig, subst))
        .padded()
        .then_ignore(end())
}

/// Parse one type, e.g. `($T, i32) -> any Shape`.
pub fn parse_type(source: &str) -> Result<TypeExpr, ParseError> {
    type_expr()
        .then_ignore(end())
        .parse(source)
        .into_result()
        .map_err(|errors| syntax_error(1, errors))
}

/// Parse every declaration, paired with its 1-based line number.
pub fn parse_declarations(source: &str) -> Result<Vec<(usize, Decl)>, ParseError> {
    let mut decls = Vec::new();
    for (index, line) in source.lines().enumerate() {
        let line_no = index + 1;
        let code = match line.find('#') {
            Some(start) => &line[..start],
            None => line,
        };
        if code.trim().is_empty() {
            continue;
        }
        let decl = declaration()
            .parse(code)
            .into_result()
            .map_err(|errors| syntax_error(line_no, errors))?;
        decls.push((line_no, decl));
    }
    Ok(decls)
}

fn syntax_error(line: usize, errors: Vec<Rich<'_, char>>) -> ParseError {
    let message = errors
        .into_iter()
        .next()
        .map(|error| format!("{error} at column {}", error.span().start + 1))
        .unwrap_or_else(|| "invalid declaration".to_string());
    ParseError::Syntax { line, message }
}

/// Protocols and generics declared so far.
#[derive(Default)]
pub struct TypeEnv<'db> {
    protocols: HashMap<String, Protocol<'db>>,
    generics: HashMap<String, CanonicalType<'db>>,
}

impl<'db> TypeEnv<'db> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protocol(&self, name: &str) -> Option<Protocol<'db>> {
        self.protocols.get(name).copied()
    }

    pub fn generic(&self, name: &str) -> Option<CanonicalType<'db>> {
        self.generics.get(name).copied()
    }

    pub fn declare_protocol(
        &mut self,
        db: &'db dyn salsa::Database,
        line: usize,
        name: &str,
        requirements: Vec<String>,
    ) -> Result<Protocol<'db>, ParseError> {
        if self.protocols.contains_key(name) {
            return Err(ParseError::Redeclared {
                line,
                name: name.to_string(),
            });
        }
        let protocol = Protocol::new(db, name.to_string(), requirements);
        self.protocols.insert(name.to_string(), protocol);
        Ok(protocol)
    }

    pub fn declare_generic(
        &mut self,
        db: &'db dyn salsa::Database,
        line: usize,
        name: &str,
        bounds: &[Bound],
    ) -> Result<CanonicalType<'db>, ParseError> {
        if self.generics.contains_key(name) {
            return Err(ParseError::Redeclared {
                line,
                name: format!("${name}"),
            });
        }
        let mut class_bound = false;
        let mut protocols = Vec::new();
        for bound in bounds {
            match bound {
                Bound::Class => class_bound = true,
                Bound::Protocol(protocol) => {
                    let protocol = self.protocol(protocol).ok_or_else(|| {
                        ParseError::UnknownProtocol {
                            line,
                            name: protocol.clone(),
                        }
                    })?;
                    protocols.push(protocol);
                }
            }
        }
        let archetype = CanonicalType::archetype(db, name, class_bound, protocols);
        self.generics.insert(name.to_string(), archetype);
        Ok(archetype)
    }

    /// Intern `expr`, resolving every name it mentions.
    pub fn resolve(
        &self,
        db: &'db dyn salsa::Database,
        line: usize,
        expr: &TypeExpr,
    ) -> Result<CanonicalType<'db>, ParseError> {
        let resolve_all = |exprs: &[TypeExpr]| -> Result<Vec<_>, ParseError> {
            exprs.iter().map(|e| self.resolve(db, line, e)).collect()
        };
        Ok(match expr {
            TypeExpr::Named(name) => {
                let scalar =
                    ScalarType::from_name(name).ok_or_else(|| ParseError::UnknownType {
                        line,
                        name: name.clone(),
                    })?;
                CanonicalType::scalar(db, scalar)
            }
            TypeExpr::Archetype(name) => {
                self.generic(name)
                    .ok_or_else(|| ParseError::UnknownGeneric {
                        line,
                        name: name.clone(),
                    })?
            }
            TypeExpr::Existential(name) => {
                let protocol = self
                    .protocol(name)
                    .ok_or_else(|| ParseError::UnknownProtocol {
                        line,
                        name: name.clone(),
                    })?;
                CanonicalType::existential(db, protocol)
            }
            TypeExpr::Tuple(elements) => CanonicalType::tuple(db, resolve_all(elements)?),
            TypeExpr::Group(inner) => self.resolve(db, line, inner)?,
            TypeExpr::Nominal { name, fields } => {
                let fields = fields
                    .iter()
                    .map(|(field, ty)| Ok((field.clone(), self.resolve(db, line, ty)?)))
                    .collect::<Result<Vec<_>, ParseError>>()?;
                CanonicalType::nominal(db, name.as_str(), fields)
            }
            TypeExpr::Function { params, result } => CanonicalType::function(
                db,
                resolve_all(params)?,
                self.resolve(db, line, result)?,
            ),
        })
    }
}

/// A fully resolved scenario.
#[derive(Clone, Debug)]
pub struct Scenario<'db> {
    pub orig: CanonicalType<'db>,
    pub subst: CanonicalType<'db>,
    pub substitutions: SubstitutionList<'db>,
}

impl<'db> Scenario<'db> {
    pub fn parse(db: &'db dyn salsa::Database, source: &str) -> Result<Self, ParseError> {
        let mut env = TypeEnv::new();
        let mut substitutions = SubstitutionList::new();
        let mut orig = None;
        let mut subst = None;

        for (line, decl) in parse_declarations(source)? {
            match decl {
                Decl::Protocol { name, requirements } => {
                    env.declare_protocol(db, line, &name, requirements)?;
                }
                Decl::Generic { name, bounds } => {
                    env.declare_generic(db, line, &name, &bounds)?;
                }
                Decl::Bind {
                    generic,
                    replacement,
                } => {
                    let archetype =
                        env.generic(&generic)
                            .ok_or_else(|| ParseError::UnknownGeneric {
                                line,
                                name: generic.clone(),
                            })?;
                    let replacement = env.resolve(db, line, &replacement)?;
                    substitutions
                        .push(db, Substitution::bind(db, archetype, replacement))
                        .map_err(|violation| ParseError::Invalid { line, violation })?;
                }
                Decl::Orig(expr) => set_once(&mut orig, line, "orig", env.resolve(db, line, &expr)?)?,
                Decl::Subst(expr) => {
                    set_once(&mut subst, line, "subst", env.resolve(db, line, &expr)?)?
                }
            }
        }

        Ok(Scenario {
            orig: orig.ok_or(ParseError::Missing { keyword: "orig" })?,
            subst: subst.ok_or(ParseError::Missing { keyword: "subst" })?,
            substitutions,
        })
    }
}

fn set_once<'db>(
    slot: &mut Option<CanonicalType<'db>>,
    line: usize,
    keyword: &str,
    ty: CanonicalType<'db>,
) -> Result<(), ParseError> {
    if slot.is_some() {
        return Err(ParseError::Redeclared {
            line,
            name: keyword.to_string(),
        });
    }
    *slot = Some(ty);
    Ok(())
}
