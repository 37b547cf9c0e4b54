use std::fmt;

use super::schema::{TxnField, VARIABLE};
use super::Type;

/// Comparison operators supported in rule expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Arithmetic operators. `Add` also concatenates strings and lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Binary operators as written in source, before type checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Compare(CompareOp),
    In,
    Arith(ArithOp),
}

/// Scalar literal written in a definition.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl Literal {
    #[must_use]
    pub fn ty(&self) -> Type {
        match self {
            Literal::Null => Type::Null,
            Literal::Bool(_) => Type::Bool,
            Literal::Int(_) => Type::Int,
            Literal::Double(_) => Type::Double,
            Literal::String(_) => Type::String,
        }
    }
}

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Size,
    Contains,
    StartsWith,
    EndsWith,
    Int,
    Double,
    String,
}

impl Function {
    pub const ALL: [Function; 7] = [
        Function::Size,
        Function::Contains,
        Function::StartsWith,
        Function::EndsWith,
        Function::Int,
        Function::Double,
        Function::String,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Function::Size => "size",
            Function::Contains => "contains",
            Function::StartsWith => "startsWith",
            Function::EndsWith => "endsWith",
            Function::Int => "int",
            Function::Double => "double",
            Function::String => "string",
        }
    }

    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Number of arguments, counting the receiver of a method-style call.
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            Function::Size | Function::Int | Function::Double | Function::String => 1,
            Function::Contains | Function::StartsWith | Function::EndsWith => 2,
        }
    }

    /// Whether the canonical rendering uses receiver syntax (`a.f(b)`).
    pub(crate) fn is_method(self) -> bool {
        matches!(
            self,
            Function::Contains | Function::StartsWith | Function::EndsWith
        )
    }
}

/// Parsed expression tree. Names are unresolved strings.
/// Transformed into a checked tree by [`Compiler`](crate::Compiler).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Ident(String),
    Select {
        operand: Box<Expr>,
        field: String,
    },
    Index {
        operand: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        target: Option<Box<Expr>>,
        function: String,
        args: Vec<Expr>,
    },
    List(Vec<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

/// Type-checked expression. Every node carries its static type and every
/// reference to `txn` is resolved to a [`TxnField`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CheckedExpr {
    pub(crate) kind: CheckedKind,
    pub(crate) ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CheckedKind {
    Literal(Literal),
    Field(TxnField),
    /// Map lookup by key or list lookup by position.
    Index {
        operand: Box<CheckedExpr>,
        key: Box<CheckedExpr>,
    },
    List(Vec<CheckedExpr>),
    /// Function call; the receiver of a method call is `args[0]`.
    Call {
        function: Function,
        args: Vec<CheckedExpr>,
    },
    Not(Box<CheckedExpr>),
    Neg(Box<CheckedExpr>),
    And(Box<CheckedExpr>, Box<CheckedExpr>),
    Or(Box<CheckedExpr>, Box<CheckedExpr>),
    Compare {
        op: CompareOp,
        lhs: Box<CheckedExpr>,
        rhs: Box<CheckedExpr>,
    },
    In {
        element: Box<CheckedExpr>,
        collection: Box<CheckedExpr>,
    },
    Arith {
        op: ArithOp,
        lhs: Box<CheckedExpr>,
        rhs: Box<CheckedExpr>,
    },
    Conditional {
        condition: Box<CheckedExpr>,
        then: Box<CheckedExpr>,
        otherwise: Box<CheckedExpr>,
    },
}

impl CheckedExpr {
    pub(crate) fn new(kind: CheckedKind, ty: Type) -> Self {
        Self { kind, ty }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "=="),
            CompareOp::Neq => write!(f, "!="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Gte => write!(f, ">="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Lte => write!(f, "<="),
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArithOp::Add => write!(f, "+"),
            ArithOp::Sub => write!(f, "-"),
            ArithOp::Mul => write!(f, "*"),
            ArithOp::Div => write!(f, "/"),
            ArithOp::Rem => write!(f, "%"),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Or => write!(f, "||"),
            BinaryOp::And => write!(f, "&&"),
            BinaryOp::Compare(op) => write!(f, "{op}"),
            BinaryOp::In => write!(f, "in"),
            BinaryOp::Arith(op) => write!(f, "{op}"),
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Not => write!(f, "!"),
            UnaryOp::Neg => write!(f, "-"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Bool(v) => write!(f, "{v}"),
            Literal::Int(v) => write!(f, "{v}"),
            // Debug keeps the decimal point, so the literal re-parses as a double.
            Literal::Double(v) => write!(f, "{v:?}"),
            Literal::String(v) => {
                write!(f, "\"")?;
                for c in v.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::Ident(name) => write!(f, "{name}"),
            Expr::Select { operand, field } => write!(f, "{operand}.{field}"),
            Expr::Index { operand, index } => write!(f, "{operand}[{index}]"),
            Expr::Call {
                target,
                function,
                args,
            } => {
                if let Some(target) = target {
                    write!(f, "{target}.")?;
                }
                write!(f, "{function}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::List(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Expr::Unary { op, operand } => write!(f, "{op}{operand}"),
            Expr::Binary { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => write!(f, "({condition} ? {then} : {otherwise})"),
        }
    }
}

impl fmt::Display for CheckedExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CheckedKind::Literal(lit) => write!(f, "{lit}"),
            CheckedKind::Field(field) => write!(f, "{VARIABLE}.{}", field.name()),
            CheckedKind::Index { operand, key } => write!(f, "{operand}[{key}]"),
            CheckedKind::List(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            CheckedKind::Call { function, args } => match args.split_first() {
                Some((receiver, rest)) if function.is_method() => {
                    write!(f, "{receiver}.{}(", function.name())?;
                    write_list(f, rest)?;
                    write!(f, ")")
                }
                _ => {
                    write!(f, "{}(", function.name())?;
                    write_list(f, args)?;
                    write!(f, ")")
                }
            },
            CheckedKind::Not(inner) => write!(f, "!{inner}"),
            CheckedKind::Neg(inner) => write!(f, "-{inner}"),
            CheckedKind::And(a, b) => write!(f, "({a} && {b})"),
            CheckedKind::Or(a, b) => write!(f, "({a} || {b})"),
            CheckedKind::Compare { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            CheckedKind::In {
                element,
                collection,
            } => write!(f, "({element} in {collection})"),
            CheckedKind::Arith { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            CheckedKind::Conditional {
                condition,
                then,
                otherwise,
            } => write!(f, "({condition} ? {then} : {otherwise})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(l: Literal) -> Box<Expr> {
        Box::new(Expr::Literal(l))
    }

    #[test]
    fn function_lookup() {
        assert_eq!(Function::lookup("startsWith"), Some(Function::StartsWith));
        assert_eq!(Function::lookup("startswith"), None);
        for function in Function::ALL {
            assert_eq!(Function::lookup(function.name()), Some(function));
        }
    }

    #[test]
    fn double_literal_keeps_decimal_point() {
        assert_eq!(Literal::Double(1_000_000.0).to_string(), "1000000.0");
        assert_eq!(Literal::Double(0.25).to_string(), "0.25");
    }

    #[test]
    fn string_literal_is_escaped() {
        assert_eq!(
            Literal::String("a\"b\\c\n".into()).to_string(),
            r#""a\"b\\c\n""#
        );
    }

    #[test]
    fn binary_display_is_parenthesized() {
        let expr = Expr::Binary {
            op: BinaryOp::Compare(CompareOp::Gte),
            lhs: Box::new(Expr::Select {
                operand: Box::new(Expr::Ident("txn".into())),
                field: "Amount".into(),
            }),
            rhs: lit(Literal::Double(10.0)),
        };
        assert_eq!(expr.to_string(), "(txn.Amount >= 10.0)");
    }

    #[test]
    fn method_call_display() {
        let expr = Expr::Call {
            target: Some(Box::new(Expr::Ident("s".into()))),
            function: "contains".into(),
            args: vec![Expr::Literal(Literal::String("x".into()))],
        };
        assert_eq!(expr.to_string(), "s.contains(\"x\")");
    }

    #[test]
    fn checked_field_renders_with_variable() {
        let expr = CheckedExpr::new(CheckedKind::Field(TxnField::RiskScore), Type::Int);
        assert_eq!(expr.to_string(), "txn.RiskScore");
    }
}
