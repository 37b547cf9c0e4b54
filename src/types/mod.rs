mod error;
mod expr;
mod program;
mod rule;
mod schema;
mod ty;
mod value;

pub use error::{CompileError, EvalError};
pub use expr::{ArithOp, BinaryOp, CompareOp, Expr, Function, Literal, UnaryOp};
pub(crate) use expr::{CheckedExpr, CheckedKind};
pub use program::Program;
pub use rule::{ExecutableRule, NewRule, RuleId, RuleRecord};
pub use schema::{SCHEMA_VERSION, Txn, TxnField, VARIABLE};
pub use ty::Type;
pub use value::Value;
