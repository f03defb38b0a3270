use crate::meta::MetaKind;

/// Structural violation found while resolving a marker stream.
///
/// The stream is expected to come from a decoder working on already
/// validated bytecode, so every variant points at a decoding defect
/// upstream rather than a recoverable condition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedControlFlow<A> {
    #[error("end at {location:?} has no open construct to close")]
    UnmatchedEnd { location: A },

    /// Consistency check: only block, loop and if are ever opened, so an
    /// end always finds one of them.
    #[error("end at {location:?} closes a {opener} marker")]
    UnexpectedEnd { location: A, opener: MetaKind },

    #[error("else at {location:?} is not directly inside an if")]
    ElseWithoutIf { location: A },

    #[error("else at {location:?} pairs with an if that already has an else")]
    DuplicateElse { location: A },

    #[error("br at {location:?} targets level {level} but only {open} constructs are open")]
    BranchTooDeep { location: A, level: u32, open: usize },

    /// Consistency check, like `UnexpectedEnd`: a branch only ever lands
    /// on an open block, loop or if.
    #[error("br at {location:?} targets a {target} marker")]
    InvalidBranchTarget { location: A, target: MetaKind },

    #[error("return at {location:?} leaves {depth} values on the stack")]
    ReturnArity { location: A, depth: u32 },

    #[error("value stack underflow at {location:?}")]
    ValueStackUnderflow { location: A },

    #[error("{open} constructs still open at end of function")]
    Unterminated { open: usize },
}
