//! Error types for reabstraction code emission

use derive_more::Display;
use polyabi_core::{InvariantViolation, TargetError};

pub type CompilationResult<T> = Result<T, CompilationError>;

#[derive(Display, Debug)]
#[display("{kind}")]
pub struct CompilationError {
    kind: Box<CompilationErrorKind>,
}

impl<E> From<E> for CompilationError
where
    CompilationErrorKind: From<E>,
{
    fn from(error: E) -> Self {
        CompilationError {
            kind: Box::new(CompilationErrorKind::from(error)),
        }
    }
}

impl CompilationError {
    pub fn kind(&self) -> &CompilationErrorKind {
        &self.kind
    }

    /// The violated invariant, if this error is one.
    pub fn invariant(&self) -> Option<&InvariantViolation> {
        match &*self.kind {
            CompilationErrorKind::Invariant(violation) => Some(violation),
            _ => None,
        }
    }

    pub(crate) fn unsupported(feature: impl std::fmt::Display) -> Self {
        CompilationErrorKind::Unsupported(feature.to_string()).into()
    }

    pub(crate) fn codegen(msg: impl std::fmt::Display) -> Self {
        CompilationErrorKind::CodegenError(msg.to_string()).into()
    }
}

#[derive(Display, Debug)]
pub enum CompilationErrorKind {
    #[display("Internal invariant violated: {_0}")]
    Invariant(InvariantViolation),

    #[display("Code generation error: {_0}")]
    CodegenError(String),

    #[display("Module error: {_0}")]
    ModuleError(cranelift_module::ModuleError),

    #[display("Cranelift error: {_0}")]
    CraneliftError(String),

    #[display("Unsupported: {_0}")]
    Unsupported(String),

    #[display("Invalid target: {_0}")]
    InvalidTarget(String),

    #[display("Object generation failed: {_0}")]
    ObjectError(object::write::Error),
}

impl From<InvariantViolation> for CompilationErrorKind {
    fn from(error: InvariantViolation) -> Self {
        CompilationErrorKind::Invariant(error)
    }
}

impl From<TargetError> for CompilationErrorKind {
    fn from(error: TargetError) -> Self {
        CompilationErrorKind::InvalidTarget(error.to_string())
    }
}

impl From<cranelift_module::ModuleError> for CompilationErrorKind {
    fn from(error: cranelift_module::ModuleError) -> Self {
        CompilationErrorKind::ModuleError(error)
    }
}

impl From<object::write::Error> for CompilationErrorKind {
    fn from(error: object::write::Error) -> Self {
        CompilationErrorKind::ObjectError(error)
    }
}

impl From<cranelift_codegen::settings::SetError> for CompilationErrorKind {
    fn from(error: cranelift_codegen::settings::SetError) -> Self {
        CompilationErrorKind::CraneliftError(error.to_string())
    }
}

impl From<cranelift_codegen::isa::LookupError> for CompilationErrorKind {
    fn from(error: cranelift_codegen::isa::LookupError) -> Self {
        CompilationErrorKind::InvalidTarget(error.to_string())
    }
}

impl From<cranelift_codegen::CodegenError> for CompilationErrorKind {
    fn from(error: cranelift_codegen::CodegenError) -> Self {
        CompilationErrorKind::CodegenError(error.to_string())
    }
}

impl std::error::Error for CompilationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &*self.kind {
            CompilationErrorKind::Invariant(e) => Some(e),
            CompilationErrorKind::ModuleError(e) => Some(e),
            CompilationErrorKind::ObjectError(e) => Some(e),
            _ => None,
        }
    }
}
