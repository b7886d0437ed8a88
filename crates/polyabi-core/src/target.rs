//! Target description used for layout decisions.

use derive_more::Display;
use target_lexicon::{PointerWidth, Triple};

#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum TargetError {
    #[display("unsupported pointer width for target `{_0}`")]
    UnsupportedPointerWidth(String),
}

impl std::error::Error for TargetError {}

/// The parts of a target that affect value representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetInfo {
    pointer_bytes: u32,
}

impl TargetInfo {
    pub const POINTER_32: TargetInfo = TargetInfo { pointer_bytes: 4 };
    pub const POINTER_64: TargetInfo = TargetInfo { pointer_bytes: 8 };

    pub fn from_triple(triple: &Triple) -> Result<Self, TargetError> {
        match triple.pointer_width() {
            Ok(PointerWidth::U32) => Ok(Self::POINTER_32),
            Ok(PointerWidth::U64) => Ok(Self::POINTER_64),
            _ => Err(TargetError::UnsupportedPointerWidth(triple.to_string())),
        }
    }

    /// The machine this compiler runs on.
    pub fn host() -> Self {
        Self::from_triple(&Triple::host()).unwrap_or(Self::POINTER_64)
    }

    /// Size and alignment of pointers, opaque handles and references.
    pub fn pointer_bytes(self) -> u32 {
        self.pointer_bytes
    }
}
