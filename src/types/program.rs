use std::fmt;

use super::error::EvalError;
use super::expr::CheckedExpr;
use super::schema::Txn;
use super::{Type, Value};

/// A checked, boolean-valued rule definition ready for evaluation.
///
/// Programs are produced by [`Compiler::check`](crate::Compiler::check) or decoded
/// from a compiled payload with [`Program::from_bytes`]. Immutable and `Send + Sync`;
/// a single program can be evaluated from many threads.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub(crate) expr: CheckedExpr,
    /// BLAKE3 digest of the definition text the program was compiled from.
    pub(crate) source_digest: [u8; 32],
}

impl Program {
    pub(crate) fn new(expr: CheckedExpr, definition: &str) -> Self {
        Self {
            expr,
            source_digest: *blake3::hash(definition.as_bytes()).as_bytes(),
        }
    }

    /// The checked output type. Always `bool` for programs accepted by the compiler.
    #[must_use]
    pub fn output_type(&self) -> &Type {
        &self.expr.ty
    }

    /// Digest of the source definition, embedded in the compiled payload.
    #[must_use]
    pub fn source_digest(&self) -> &[u8; 32] {
        &self.source_digest
    }

    /// Whether this program was compiled from exactly `definition`.
    #[must_use]
    pub fn is_compiled_from(&self, definition: &str) -> bool {
        blake3::hash(definition.as_bytes()).as_bytes() == &self.source_digest
    }

    /// Evaluate the program against a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] on missing map keys, arithmetic faults, or
    /// dynamically typed values that do not fit the operation applied to them.
    pub fn evaluate(&self, txn: &Txn) -> Result<bool, EvalError> {
        match crate::evaluate::evaluate(&self.expr, txn)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::NotBoolean {
                actual: other.type_name(),
            }),
        }
    }

    /// Encode the program into its opaque, storable payload.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::serial::SerializeError) if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::serial::SerializeError> {
        crate::serial::encode(self)
    }

    /// Decode a program from a payload previously produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) on
    /// format, version, integrity, or validation failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::serial::DeserializeError> {
        crate::serial::decode(bytes)
    }
}

/// Canonical, fully parenthesized source rendering. Re-compiling the
/// rendering yields an equal expression tree.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)
    }
}
