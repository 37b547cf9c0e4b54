//! Binary encoding of checked programs.
//!
//! This is the opaque `compiled` payload stored with every rule. It consists
//! of a 32-byte fixed header followed by a bincode-encoded program tree.
//!
//! ## Wire Format
//!
//! ```text
//! Offset  Size  Field
//! 0       4     Magic bytes: b"TXRL"
//! 4       2     Format version (u16, little-endian)
//! 6       2     Schema version of the `txn` declaration (u16, little-endian)
//! 8       4     Flags (u32, little-endian, must be zero)
//! 12      4     Payload length in bytes (u32, little-endian)
//! 16      16    BLAKE3 hash of the payload (truncated to 16 bytes)
//! 32..    var   Bincode-encoded payload
//! ```
//!
//! ## Versioning
//!
//! Both the format version and the schema version must match exactly. A
//! payload checked against another `txn` schema is rejected with
//! [`DeserializeError::SchemaMismatch`] rather than evaluated against fields
//! it was never checked for.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    ArithOp, CheckedExpr, CheckedKind, CompareOp, Function, Literal, Program, SCHEMA_VERSION,
    TxnField, Type,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAGIC: &[u8; 4] = b"TXRL";
const FORMAT_VERSION: u16 = 1;
const HEADER_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when encoding a [`Program`].
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode program: {0}")]
    Encode(#[from] bincode::error::EncodeError),
}

/// Errors that can occur when decoding a [`Program`] from a stored payload.
#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("not a compiled rule: invalid magic bytes")]
    BadMagic,

    #[error("incompatible format version: payload is v{blob}, engine supports v{supported}")]
    IncompatibleVersion { blob: u16, supported: u16 },

    #[error("payload was checked against txn schema v{blob}, current schema is v{supported}")]
    SchemaMismatch { blob: u16, supported: u16 },

    #[error("unsupported header flags {0:#x}")]
    UnsupportedFlags(u32),

    #[error("integrity check failed: BLAKE3 checksum mismatch")]
    ChecksumMismatch,

    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("failed to decode payload: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("validation failed: {0}")]
    Validation(String),
}

fn invalid(message: impl Into<String>) -> DeserializeError {
    DeserializeError::Validation(message.into())
}

// ---------------------------------------------------------------------------
// Serialized type hierarchy
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct SerializedProgram {
    metadata: ProgramMetadata,
    root: SerializedNode,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProgramMetadata {
    node_count: u32,
    source_digest: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedNode {
    ty: SerializedType,
    kind: SerializedKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum SerializedType {
    Null,
    Bool,
    Int,
    Double,
    Str,
    List(Box<SerializedType>),
    Map(Box<SerializedType>),
    Dyn,
    Txn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedLiteral {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum SerializedCompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum SerializedArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedKind {
    Literal(SerializedLiteral),
    Field(u8),
    Index {
        operand: Box<SerializedNode>,
        key: Box<SerializedNode>,
    },
    List(Vec<SerializedNode>),
    Call {
        function: u8,
        args: Vec<SerializedNode>,
    },
    Not(Box<SerializedNode>),
    Neg(Box<SerializedNode>),
    /// Left-nested chain `((a && b) && c)` stored as `[a, b, c]`.
    And(Vec<SerializedNode>),
    Or(Vec<SerializedNode>),
    Compare {
        op: SerializedCompareOp,
        lhs: Box<SerializedNode>,
        rhs: Box<SerializedNode>,
    },
    In {
        element: Box<SerializedNode>,
        collection: Box<SerializedNode>,
    },
    Arith {
        op: SerializedArithOp,
        lhs: Box<SerializedNode>,
        rhs: Box<SerializedNode>,
    },
    Conditional {
        condition: Box<SerializedNode>,
        then: Box<SerializedNode>,
        otherwise: Box<SerializedNode>,
    },
}

// ---------------------------------------------------------------------------
// Operator, literal, and type conversion
// ---------------------------------------------------------------------------

fn serialize_compare(op: CompareOp) -> SerializedCompareOp {
    match op {
        CompareOp::Eq => SerializedCompareOp::Eq,
        CompareOp::Neq => SerializedCompareOp::Neq,
        CompareOp::Gt => SerializedCompareOp::Gt,
        CompareOp::Gte => SerializedCompareOp::Gte,
        CompareOp::Lt => SerializedCompareOp::Lt,
        CompareOp::Lte => SerializedCompareOp::Lte,
    }
}

fn deserialize_compare(op: SerializedCompareOp) -> CompareOp {
    match op {
        SerializedCompareOp::Eq => CompareOp::Eq,
        SerializedCompareOp::Neq => CompareOp::Neq,
        SerializedCompareOp::Gt => CompareOp::Gt,
        SerializedCompareOp::Gte => CompareOp::Gte,
        SerializedCompareOp::Lt => CompareOp::Lt,
        SerializedCompareOp::Lte => CompareOp::Lte,
    }
}

fn serialize_arith(op: ArithOp) -> SerializedArithOp {
    match op {
        ArithOp::Add => SerializedArithOp::Add,
        ArithOp::Sub => SerializedArithOp::Sub,
        ArithOp::Mul => SerializedArithOp::Mul,
        ArithOp::Div => SerializedArithOp::Div,
        ArithOp::Rem => SerializedArithOp::Rem,
    }
}

fn deserialize_arith(op: SerializedArithOp) -> ArithOp {
    match op {
        SerializedArithOp::Add => ArithOp::Add,
        SerializedArithOp::Sub => ArithOp::Sub,
        SerializedArithOp::Mul => ArithOp::Mul,
        SerializedArithOp::Div => ArithOp::Div,
        SerializedArithOp::Rem => ArithOp::Rem,
    }
}

fn serialize_literal(lit: &Literal) -> SerializedLiteral {
    match lit {
        Literal::Null => SerializedLiteral::Null,
        Literal::Bool(v) => SerializedLiteral::Bool(*v),
        Literal::Int(v) => SerializedLiteral::Int(*v),
        Literal::Double(v) => SerializedLiteral::Double(*v),
        Literal::String(v) => SerializedLiteral::Str(v.clone()),
    }
}

fn deserialize_literal(lit: SerializedLiteral) -> Literal {
    match lit {
        SerializedLiteral::Null => Literal::Null,
        SerializedLiteral::Bool(v) => Literal::Bool(v),
        SerializedLiteral::Int(v) => Literal::Int(v),
        SerializedLiteral::Double(v) => Literal::Double(v),
        SerializedLiteral::Str(v) => Literal::String(v),
    }
}

fn serialize_type(ty: &Type) -> SerializedType {
    match ty {
        Type::Null => SerializedType::Null,
        Type::Bool => SerializedType::Bool,
        Type::Int => SerializedType::Int,
        Type::Double => SerializedType::Double,
        Type::String => SerializedType::Str,
        Type::List(elem) => SerializedType::List(Box::new(serialize_type(elem))),
        Type::Map(value) => SerializedType::Map(Box::new(serialize_type(value))),
        Type::Dyn => SerializedType::Dyn,
        Type::Txn => SerializedType::Txn,
    }
}

fn deserialize_type(ty: SerializedType) -> Result<Type, DeserializeError> {
    Ok(match ty {
        SerializedType::Null => Type::Null,
        SerializedType::Bool => Type::Bool,
        SerializedType::Int => Type::Int,
        SerializedType::Double => Type::Double,
        SerializedType::Str => Type::String,
        SerializedType::List(elem) => Type::list(deserialize_type(*elem)?),
        SerializedType::Map(value) => Type::map(deserialize_type(*value)?),
        SerializedType::Dyn => Type::Dyn,
        SerializedType::Txn => return Err(invalid("node typed as the bare txn variable")),
    })
}

#[allow(clippy::cast_possible_truncation)] // Function::ALL has 7 entries
fn function_index(function: Function) -> u8 {
    Function::ALL
        .iter()
        .position(|f| *f == function)
        .map_or(u8::MAX, |i| i as u8)
}

// ---------------------------------------------------------------------------
// CheckedExpr -> SerializedNode
// ---------------------------------------------------------------------------

fn flatten(expr: &CheckedExpr) -> SerializedNode {
    let node = |e: &CheckedExpr| Box::new(flatten(e));
    let kind = match &expr.kind {
        CheckedKind::Literal(lit) => SerializedKind::Literal(serialize_literal(lit)),
        CheckedKind::Field(field) => SerializedKind::Field(field.slot()),
        CheckedKind::Index { operand, key } => SerializedKind::Index {
            operand: node(operand),
            key: node(key),
        },
        CheckedKind::List(items) => SerializedKind::List(items.iter().map(flatten).collect()),
        CheckedKind::Call { function, args } => SerializedKind::Call {
            function: function_index(*function),
            args: args.iter().map(flatten).collect(),
        },
        CheckedKind::Not(inner) => SerializedKind::Not(node(inner)),
        CheckedKind::Neg(inner) => SerializedKind::Neg(node(inner)),
        CheckedKind::And(..) => {
            let mut children = Vec::new();
            collect_chain(expr, true, &mut children);
            SerializedKind::And(children)
        }
        CheckedKind::Or(..) => {
            let mut children = Vec::new();
            collect_chain(expr, false, &mut children);
            SerializedKind::Or(children)
        }
        CheckedKind::Compare { op, lhs, rhs } => SerializedKind::Compare {
            op: serialize_compare(*op),
            lhs: node(lhs),
            rhs: node(rhs),
        },
        CheckedKind::In {
            element,
            collection,
        } => SerializedKind::In {
            element: node(element),
            collection: node(collection),
        },
        CheckedKind::Arith { op, lhs, rhs } => SerializedKind::Arith {
            op: serialize_arith(*op),
            lhs: node(lhs),
            rhs: node(rhs),
        },
        CheckedKind::Conditional {
            condition,
            then,
            otherwise,
        } => SerializedKind::Conditional {
            condition: node(condition),
            then: node(then),
            otherwise: node(otherwise),
        },
    };
    SerializedNode {
        ty: serialize_type(&expr.ty),
        kind,
    }
}

/// Only the left spine is flattened, so unflattening restores the exact tree.
fn collect_chain(expr: &CheckedExpr, and: bool, out: &mut Vec<SerializedNode>) {
    match &expr.kind {
        CheckedKind::And(left, right) if and => {
            collect_chain(left, and, out);
            out.push(flatten(right));
        }
        CheckedKind::Or(left, right) if !and => {
            collect_chain(left, and, out);
            out.push(flatten(right));
        }
        _ => out.push(flatten(expr)),
    }
}

fn count_nodes(node: &SerializedNode) -> u32 {
    let children: u32 = match &node.kind {
        SerializedKind::Literal(_) | SerializedKind::Field(_) => 0,
        SerializedKind::Not(inner) | SerializedKind::Neg(inner) => count_nodes(inner),
        SerializedKind::Index { operand: a, key: b }
        | SerializedKind::Compare { lhs: a, rhs: b, .. }
        | SerializedKind::In {
            element: a,
            collection: b,
        }
        | SerializedKind::Arith { lhs: a, rhs: b, .. } => count_nodes(a) + count_nodes(b),
        SerializedKind::List(items)
        | SerializedKind::Call { args: items, .. }
        | SerializedKind::And(items)
        | SerializedKind::Or(items) => items.iter().map(count_nodes).sum(),
        SerializedKind::Conditional {
            condition,
            then,
            otherwise,
        } => count_nodes(condition) + count_nodes(then) + count_nodes(otherwise),
    };
    children.saturating_add(1)
}

// ---------------------------------------------------------------------------
// SerializedNode -> CheckedExpr
// ---------------------------------------------------------------------------

fn unflatten(node: SerializedNode) -> Result<CheckedExpr, DeserializeError> {
    let ty = deserialize_type(node.ty)?;
    let boxed = |n: Box<SerializedNode>| unflatten(*n).map(Box::new);
    let expect_bool = |what: &str| -> Result<(), DeserializeError> {
        if ty == Type::Bool {
            Ok(())
        } else {
            Err(invalid(format!("{what} node typed as {ty}")))
        }
    };

    let kind = match node.kind {
        SerializedKind::Literal(lit) => {
            let lit = deserialize_literal(lit);
            if lit.ty() != ty {
                return Err(invalid(format!("literal {lit} typed as {ty}")));
            }
            CheckedKind::Literal(lit)
        }
        SerializedKind::Field(slot) => {
            let field = TxnField::from_slot(slot)
                .ok_or_else(|| invalid(format!("field slot {slot} out of bounds")))?;
            if field.ty() != ty {
                return Err(invalid(format!(
                    "field {} typed as {ty}, declared {}",
                    field.name(),
                    field.ty()
                )));
            }
            CheckedKind::Field(field)
        }
        SerializedKind::Index { operand, key } => CheckedKind::Index {
            operand: boxed(operand)?,
            key: boxed(key)?,
        },
        SerializedKind::List(items) => CheckedKind::List(
            items
                .into_iter()
                .map(unflatten)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        SerializedKind::Call { function, args } => {
            let function = Function::ALL
                .get(usize::from(function))
                .copied()
                .ok_or_else(|| invalid(format!("function index {function} out of bounds")))?;
            if args.len() != function.arity() {
                return Err(invalid(format!(
                    "{} called with {} argument(s)",
                    function.name(),
                    args.len()
                )));
            }
            CheckedKind::Call {
                function,
                args: args
                    .into_iter()
                    .map(unflatten)
                    .collect::<Result<Vec<_>, _>>()?,
            }
        }
        SerializedKind::Not(inner) => {
            expect_bool("not")?;
            CheckedKind::Not(boxed(inner)?)
        }
        SerializedKind::Neg(inner) => CheckedKind::Neg(boxed(inner)?),
        SerializedKind::And(children) => {
            expect_bool("and")?;
            return fold_chain(children, CheckedKind::And);
        }
        SerializedKind::Or(children) => {
            expect_bool("or")?;
            return fold_chain(children, CheckedKind::Or);
        }
        SerializedKind::Compare { op, lhs, rhs } => {
            expect_bool("comparison")?;
            CheckedKind::Compare {
                op: deserialize_compare(op),
                lhs: boxed(lhs)?,
                rhs: boxed(rhs)?,
            }
        }
        SerializedKind::In {
            element,
            collection,
        } => {
            expect_bool("in")?;
            CheckedKind::In {
                element: boxed(element)?,
                collection: boxed(collection)?,
            }
        }
        SerializedKind::Arith { op, lhs, rhs } => CheckedKind::Arith {
            op: deserialize_arith(op),
            lhs: boxed(lhs)?,
            rhs: boxed(rhs)?,
        },
        SerializedKind::Conditional {
            condition,
            then,
            otherwise,
        } => CheckedKind::Conditional {
            condition: boxed(condition)?,
            then: boxed(then)?,
            otherwise: boxed(otherwise)?,
        },
    };
    Ok(CheckedExpr::new(kind, ty))
}

fn fold_chain(
    children: Vec<SerializedNode>,
    combine: fn(Box<CheckedExpr>, Box<CheckedExpr>) -> CheckedKind,
) -> Result<CheckedExpr, DeserializeError> {
    let mut iter = children.into_iter();
    let Some(first) = iter.next() else {
        return Err(invalid("empty and/or expression"));
    };
    let first = unflatten(first)?;
    iter.try_fold(first, |acc, child| {
        Ok(CheckedExpr::new(
            combine(Box::new(acc), Box::new(unflatten(child)?)),
            Type::Bool,
        ))
    })
}

// ---------------------------------------------------------------------------
// Header I/O
// ---------------------------------------------------------------------------

fn write_header(buf: &mut Vec<u8>, payload: &[u8]) {
    let hash = blake3::hash(payload);
    let hash_bytes = hash.as_bytes();

    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // flags (reserved)
    #[allow(clippy::cast_possible_truncation)] // a single rule never approaches 4 GiB
    let payload_len = payload.len() as u32;
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&hash_bytes[..16]);
}

struct Header {
    format_version: u16,
    schema_version: u16,
    flags: u32,
    payload_len: usize,
    hash: [u8; 16],
}

fn read_header(bytes: &[u8]) -> Result<Header, DeserializeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DeserializeError::LengthMismatch {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    }

    if &bytes[0..4] != MAGIC {
        return Err(DeserializeError::BadMagic);
    }

    let mut hash = [0u8; 16];
    hash.copy_from_slice(&bytes[16..32]);

    Ok(Header {
        format_version: u16::from_le_bytes([bytes[4], bytes[5]]),
        schema_version: u16::from_le_bytes([bytes[6], bytes[7]]),
        flags: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        payload_len: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize,
        hash,
    })
}

// ---------------------------------------------------------------------------
// Public encode/decode
// ---------------------------------------------------------------------------

pub(crate) fn encode(program: &Program) -> Result<Vec<u8>, SerializeError> {
    let root = flatten(&program.expr);
    let serialized = SerializedProgram {
        metadata: ProgramMetadata {
            node_count: count_nodes(&root),
            source_digest: program.source_digest,
        },
        root,
    };
    let payload = bincode::serde::encode_to_vec(&serialized, bincode::config::standard())?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    write_header(&mut buf, &payload);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Program, DeserializeError> {
    let header = read_header(bytes)?;

    if header.format_version != FORMAT_VERSION {
        return Err(DeserializeError::IncompatibleVersion {
            blob: header.format_version,
            supported: FORMAT_VERSION,
        });
    }
    if header.schema_version != SCHEMA_VERSION {
        return Err(DeserializeError::SchemaMismatch {
            blob: header.schema_version,
            supported: SCHEMA_VERSION,
        });
    }

    // No flags are defined yet.
    if header.flags != 0 {
        return Err(DeserializeError::UnsupportedFlags(header.flags));
    }

    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != header.payload_len {
        return Err(DeserializeError::LengthMismatch {
            expected: header.payload_len,
            actual: payload.len(),
        });
    }

    // Integrity check
    if blake3::hash(payload).as_bytes()[..16] != header.hash {
        return Err(DeserializeError::ChecksumMismatch);
    }

    let (serialized, consumed): (SerializedProgram, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
    if consumed != payload.len() {
        return Err(invalid(format!(
            "{} trailing bytes after program",
            payload.len() - consumed
        )));
    }

    let node_count = count_nodes(&serialized.root);
    if serialized.metadata.node_count != node_count {
        return Err(invalid(format!(
            "metadata says {} nodes but payload has {node_count}",
            serialized.metadata.node_count
        )));
    }

    let expr = unflatten(serialized.root)?;
    if expr.ty != Type::Bool {
        return Err(invalid(format!("program output typed as {}", expr.ty)));
    }

    Ok(Program {
        expr,
        source_digest: serialized.metadata.source_digest,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
