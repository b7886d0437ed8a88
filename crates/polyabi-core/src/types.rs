//! Canonical type trees.
//!
//! Types are interned in the salsa database, so a `CanonicalType` is a cheap
//! `Copy` handle and structural equality is handle equality. Trees are
//! immutable and acyclic: children are interned before their parents.

use std::fmt;

/// A fully resolved type.
#[salsa::interned(debug)]
pub struct CanonicalType<'db> {
    #[returns(ref)]
    pub kind: TypeKind<'db>,
}

/// Primitive types with a fixed machine representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, salsa::Update)]
pub enum ScalarType {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Untyped machine address.
    RawPointer,
    /// Reference to a class instance.
    Object,
}

impl ScalarType {
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::I8 => "i8",
            ScalarType::I16 => "i16",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
            ScalarType::RawPointer => "rawptr",
            ScalarType::Object => "object",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "i8" => ScalarType::I8,
            "i16" => ScalarType::I16,
            "i32" => ScalarType::I32,
            "i64" => ScalarType::I64,
            "f32" => ScalarType::F32,
            "f64" => ScalarType::F64,
            "rawptr" => ScalarType::RawPointer,
            "object" => ScalarType::Object,
            _ => return None,
        })
    }
}

/// A named field of a nominal aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, salsa::Update)]
pub struct Field<'db> {
    pub name: String,
    pub ty: CanonicalType<'db>,
}

/// The different kinds of canonical types.
#[derive(Clone, Debug, PartialEq, Eq, Hash, salsa::Update)]
pub enum TypeKind<'db> {
    Scalar(ScalarType),

    /// Struct-like aggregate with ordered named fields.
    Nominal { name: String, fields: Vec<Field<'db>> },

    /// Ordered unnamed fields. The empty tuple is the unit type.
    Tuple(Vec<CanonicalType<'db>>),

    /// A single argument clause. Curried functions return another function.
    Function {
        params: Vec<CanonicalType<'db>>,
        result: CanonicalType<'db>,
    },

    /// Type variable of the enclosing generic context.
    ///
    /// A class-bound archetype can only be bound to reference types and its
    /// opaque handle is the reference itself.
    Archetype {
        name: String,
        class_bound: bool,
        protocols: Vec<Protocol<'db>>,
    },

    /// A value of unknown static type conforming to a protocol.
    Existential(Protocol<'db>),
}

/// A protocol and its requirements in declaration order.
///
/// Witness tables hold one entry per requirement, in this order.
#[salsa::interned(debug)]
pub struct Protocol<'db> {
    #[returns(ref)]
    pub name: String,
    #[returns(ref)]
    pub requirements: Vec<String>,
}

impl<'db> CanonicalType<'db> {
    pub fn scalar(db: &'db dyn salsa::Database, scalar: ScalarType) -> Self {
        Self::new(db, TypeKind::Scalar(scalar))
    }

    pub fn unit(db: &'db dyn salsa::Database) -> Self {
        Self::new(db, TypeKind::Tuple(Vec::new()))
    }

    pub fn tuple(db: &'db dyn salsa::Database, elements: Vec<CanonicalType<'db>>) -> Self {
        Self::new(db, TypeKind::Tuple(elements))
    }

    pub fn nominal(
        db: &'db dyn salsa::Database,
        name: impl Into<String>,
        fields: impl IntoIterator<Item = (String, CanonicalType<'db>)>,
    ) -> Self {
        let fields = fields
            .into_iter()
            .map(|(name, ty)| Field { name, ty })
            .collect();
        Self::new(
            db,
            TypeKind::Nominal {
                name: name.into(),
                fields,
            },
        )
    }

    pub fn function(
        db: &'db dyn salsa::Database,
        params: Vec<CanonicalType<'db>>,
        result: CanonicalType<'db>,
    ) -> Self {
        Self::new(db, TypeKind::Function { params, result })
    }

    pub fn archetype(
        db: &'db dyn salsa::Database,
        name: impl Into<String>,
        class_bound: bool,
        protocols: Vec<Protocol<'db>>,
    ) -> Self {
        Self::new(
            db,
            TypeKind::Archetype {
                name: name.into(),
                class_bound,
                protocols,
            },
        )
    }

    pub fn existential(db: &'db dyn salsa::Database, protocol: Protocol<'db>) -> Self {
        Self::new(db, TypeKind::Existential(protocol))
    }

    pub fn is_archetype(self, db: &'db dyn salsa::Database) -> bool {
        matches!(self.kind(db), TypeKind::Archetype { .. })
    }

    pub fn is_function(self, db: &'db dyn salsa::Database) -> bool {
        matches!(self.kind(db), TypeKind::Function { .. })
    }

    /// Field types of a tuple or nominal aggregate, in layout order.
    pub fn aggregate_fields(self, db: &'db dyn salsa::Database) -> Option<Vec<CanonicalType<'db>>> {
        match self.kind(db) {
            TypeKind::Tuple(elements) => Some(elements.clone()),
            TypeKind::Nominal { fields, .. } => Some(fields.iter().map(|f| f.ty).collect()),
            _ => None,
        }
    }

    /// Parameters and result of a function type.
    pub fn function_parts(
        self,
        db: &'db dyn salsa::Database,
    ) -> Option<(&'db [CanonicalType<'db>], CanonicalType<'db>)> {
        match self.kind(db) {
            TypeKind::Function { params, result } => Some((params.as_slice(), *result)),
            _ => None,
        }
    }

    /// Protocols required by an archetype; empty for any other type.
    pub fn archetype_protocols(self, db: &'db dyn salsa::Database) -> &'db [Protocol<'db>] {
        match self.kind(db) {
            TypeKind::Archetype { protocols, .. } => protocols.as_slice(),
            _ => &[],
        }
    }

    pub fn display(self, db: &'db dyn salsa::Database) -> TypeDisplay<'db> {
        TypeDisplay { db, ty: self }
    }
}

/// Renders a type in the textual syntax accepted by the driver.
pub struct TypeDisplay<'db> {
    db: &'db dyn salsa::Database,
    ty: CanonicalType<'db>,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let db = self.db;
        match self.ty.kind(db) {
            TypeKind::Scalar(scalar) => f.write_str(scalar.name()),
            TypeKind::Nominal { name, fields } => {
                write!(f, "{name} {{")?;
                for (i, field) in fields.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{sep}{}: {}", field.name, field.ty.display(db))?;
                }
                if fields.is_empty() {
                    f.write_str("}")
                } else {
                    f.write_str(" }")
                }
            }
            TypeKind::Tuple(elements) => {
                f.write_str("(")?;
                write_list(f, db, elements)?;
                if elements.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            TypeKind::Function { params, result } => {
                f.write_str("(")?;
                write_list(f, db, params)?;
                write!(f, ") -> {}", result.display(db))
            }
            TypeKind::Archetype { name, .. } => write!(f, "${name}"),
            TypeKind::Existential(protocol) => write!(f, "any {}", protocol.name(db)),
        }
    }
}

fn write_list<'db>(
    f: &mut fmt::Formatter<'_>,
    db: &'db dyn salsa::Database,
    types: &[CanonicalType<'db>],
) -> fmt::Result {
    for (i, ty) in types.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", ty.display(db))?;
    }
    Ok(())
}
