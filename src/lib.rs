//! Transaction rules: a small boolean expression language over a `txn`
//! variable, compiled into a checked, self-describing binary program, plus
//! rule stores that answer "which rules apply to this user and entity".

mod compile;
pub mod config;
pub mod error;
mod evaluate;
pub mod parse;
pub mod serial;
pub mod store;
mod types;

pub use compile::Compiler;
pub use config::{MongoConfig, PostgresConfig, StoreConfig};
pub use error::{PersistenceError, Result, RulesError};
pub use parse::ParseError;
pub use serial::{DeserializeError, SerializeError};
#[cfg(feature = "mongo")]
pub use store::MongoRuleStore;
#[cfg(feature = "postgres")]
pub use store::PgRuleStore;
pub use store::{Applicability, MemoryRuleStore, RuleStore};
pub use types::{
    ArithOp, BinaryOp, CompareOp, CompileError, EvalError, ExecutableRule, Expr, Function,
    Literal, NewRule, Program, RuleId, RuleRecord, SCHEMA_VERSION, Txn, TxnField, Type, UnaryOp,
    VARIABLE, Value,
};
