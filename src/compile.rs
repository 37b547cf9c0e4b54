use tracing::debug;

use crate::error::RulesError;
use crate::parse::parse;
use crate::types::{
    ArithOp, BinaryOp, CheckedExpr, CheckedKind, CompareOp, CompileError, Expr, Function, Literal,
    Program, TxnField, Type, UnaryOp, VARIABLE,
};

/// Turns rule definitions into type-checked programs.
///
/// The compiler is stateless; the declared environment is fixed to the single
/// `txn` variable described by [`Txn`](crate::Txn). A definition is accepted
/// only if it parses, every reference resolves, every operator application
/// type-checks, and the result type is exactly `bool`.
///
/// # Example
///
/// ```
/// use txn_rules::{Compiler, Program};
///
/// let compiled = Compiler::new().compile("txn.Amount >= 1000000.0").unwrap();
/// let program = Program::from_bytes(&compiled).unwrap();
/// assert_eq!(program.to_string(), "(txn.Amount >= 1000000.0)");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Compiler;

impl Compiler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse and type-check a definition.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] describing the first problem found.
    pub fn check(&self, definition: &str) -> Result<Program, CompileError> {
        let expr = parse(definition)?;
        let checked = check(&expr)?;
        if checked.ty != Type::Bool {
            return Err(CompileError::NotBoolean { actual: checked.ty });
        }
        Ok(Program::new(checked, definition))
    }

    /// Check a definition and encode it into the opaque payload stored
    /// alongside the rule.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::Compile`] if the definition is rejected, or
    /// [`RulesError::Serialize`] if encoding fails.
    pub fn compile(&self, definition: &str) -> Result<Vec<u8>, RulesError> {
        let program = self.check(definition)?;
        let bytes = program.to_bytes()?;
        debug!(len = bytes.len(), "compiled rule definition");
        Ok(bytes)
    }
}

fn boxed(expr: CheckedExpr) -> Box<CheckedExpr> {
    Box::new(expr)
}

fn check(expr: &Expr) -> Result<CheckedExpr, CompileError> {
    match expr {
        Expr::Literal(lit) => Ok(CheckedExpr::new(CheckedKind::Literal(lit.clone()), lit.ty())),
        Expr::Ident(name) if name == VARIABLE => Err(CompileError::BareVariable {
            name: name.clone(),
        }),
        Expr::Ident(name) => Err(CompileError::UndeclaredReference { name: name.clone() }),
        Expr::Select { operand, field } => check_select(operand, field),
        Expr::Index { operand, index } => {
            let operand = check(operand)?;
            let key = check(index)?;
            check_index(operand, key)
        }
        Expr::Call {
            target,
            function,
            args,
        } => {
            let mut checked = Vec::with_capacity(args.len() + 1);
            if let Some(target) = target {
                checked.push(check(target)?);
            }
            for arg in args {
                checked.push(check(arg)?);
            }
            check_call(function, checked)
        }
        Expr::List(items) => {
            let items = items.iter().map(check).collect::<Result<Vec<_>, _>>()?;
            let elem = match items.split_first() {
                Some((first, rest)) if rest.iter().all(|i| i.ty == first.ty) => first.ty.clone(),
                _ => Type::Dyn,
            };
            Ok(CheckedExpr::new(CheckedKind::List(items), Type::list(elem)))
        }
        Expr::Unary { op, operand } => check_unary(*op, check(operand)?),
        Expr::Binary { op, lhs, rhs } => check_binary(*op, check(lhs)?, check(rhs)?),
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => check_conditional(check(condition)?, check(then)?, check(otherwise)?),
    }
}

fn check_select(operand: &Expr, field: &str) -> Result<CheckedExpr, CompileError> {
    if let Expr::Ident(name) = operand
        && name == VARIABLE
    {
        return match TxnField::lookup(field) {
            Some(f) => Ok(CheckedExpr::new(CheckedKind::Field(f), f.ty())),
            None => Err(CompileError::UndefinedField {
                field: field.to_owned(),
                receiver: Type::Txn,
            }),
        };
    }

    // `m.key` on a map is sugar for `m["key"]`.
    let operand = check(operand)?;
    let ty = match &operand.ty {
        Type::Map(value) => (**value).clone(),
        Type::Dyn => Type::Dyn,
        other => {
            return Err(CompileError::UndefinedField {
                field: field.to_owned(),
                receiver: other.clone(),
            });
        }
    };
    let key = CheckedExpr::new(
        CheckedKind::Literal(Literal::String(field.to_owned())),
        Type::String,
    );
    Ok(CheckedExpr::new(
        CheckedKind::Index {
            operand: boxed(operand),
            key: boxed(key),
        },
        ty,
    ))
}

fn check_index(operand: CheckedExpr, key: CheckedExpr) -> Result<CheckedExpr, CompileError> {
    let ty = match (&operand.ty, &key.ty) {
        (Type::Map(value), Type::String | Type::Dyn) => (**value).clone(),
        (Type::List(elem), Type::Int | Type::Dyn) => (**elem).clone(),
        (Type::Dyn, Type::String | Type::Int | Type::Dyn) => Type::Dyn,
        (o, k) => return Err(CompileError::overload("[]", &[o, k])),
    };
    Ok(CheckedExpr::new(
        CheckedKind::Index {
            operand: boxed(operand),
            key: boxed(key),
        },
        ty,
    ))
}

fn check_call(name: &str, args: Vec<CheckedExpr>) -> Result<CheckedExpr, CompileError> {
    let function = Function::lookup(name).ok_or_else(|| CompileError::UnknownFunction {
        name: name.to_owned(),
    })?;
    if args.len() != function.arity() {
        return Err(CompileError::WrongArity {
            function: function.name(),
            expected: function.arity(),
            actual: args.len(),
        });
    }

    let types: Vec<&Type> = args.iter().map(|a| &a.ty).collect();
    let ty = match (function, types.as_slice()) {
        (Function::Size, [Type::String | Type::List(_) | Type::Map(_) | Type::Dyn]) => Type::Int,
        (
            Function::Contains | Function::StartsWith | Function::EndsWith,
            [Type::String | Type::Dyn, Type::String | Type::Dyn],
        ) => Type::Bool,
        (Function::Int, [Type::Int | Type::Double | Type::String | Type::Dyn]) => Type::Int,
        (Function::Double, [Type::Int | Type::Double | Type::String | Type::Dyn]) => Type::Double,
        (
            Function::String,
            [Type::Int | Type::Double | Type::String | Type::Bool | Type::Dyn],
        ) => Type::String,
        _ => return Err(CompileError::overload(function.name(), &types)),
    };
    Ok(CheckedExpr::new(CheckedKind::Call { function, args }, ty))
}

fn check_unary(op: UnaryOp, operand: CheckedExpr) -> Result<CheckedExpr, CompileError> {
    match op {
        UnaryOp::Not if operand.ty.admits_bool() => Ok(CheckedExpr::new(
            CheckedKind::Not(boxed(operand)),
            Type::Bool,
        )),
        UnaryOp::Neg => match operand.kind {
            // Fold so that `-5` is a literal, not a negation node.
            CheckedKind::Literal(Literal::Int(v)) if v.checked_neg().is_some() => Ok(
                CheckedExpr::new(CheckedKind::Literal(Literal::Int(-v)), Type::Int),
            ),
            CheckedKind::Literal(Literal::Double(v)) => Ok(CheckedExpr::new(
                CheckedKind::Literal(Literal::Double(-v)),
                Type::Double,
            )),
            _ if operand.ty.is_numeric() || operand.ty.is_dyn() => {
                let ty = operand.ty.clone();
                Ok(CheckedExpr::new(CheckedKind::Neg(boxed(operand)), ty))
            }
            _ => Err(CompileError::overload(op, &[&operand.ty])),
        },
        UnaryOp::Not => Err(CompileError::overload(op, &[&operand.ty])),
    }
}

fn check_binary(
    op: BinaryOp,
    lhs: CheckedExpr,
    rhs: CheckedExpr,
) -> Result<CheckedExpr, CompileError> {
    let mismatch = |l: &CheckedExpr, r: &CheckedExpr| CompileError::overload(op, &[&l.ty, &r.ty]);
    match op {
        BinaryOp::And | BinaryOp::Or => {
            if !(lhs.ty.admits_bool() && rhs.ty.admits_bool()) {
                return Err(mismatch(&lhs, &rhs));
            }
            let kind = if op == BinaryOp::And {
                CheckedKind::And(boxed(lhs), boxed(rhs))
            } else {
                CheckedKind::Or(boxed(lhs), boxed(rhs))
            };
            Ok(CheckedExpr::new(kind, Type::Bool))
        }
        BinaryOp::Compare(cmp) => {
            let ok = match cmp {
                CompareOp::Eq | CompareOp::Neq => lhs.ty.is_equatable_with(&rhs.ty),
                _ => lhs.ty.is_orderable_with(&rhs.ty),
            };
            if !ok {
                return Err(mismatch(&lhs, &rhs));
            }
            Ok(CheckedExpr::new(
                CheckedKind::Compare {
                    op: cmp,
                    lhs: boxed(lhs),
                    rhs: boxed(rhs),
                },
                Type::Bool,
            ))
        }
        BinaryOp::In => {
            let ok = match &rhs.ty {
                Type::List(elem) => lhs.ty.is_equatable_with(elem),
                Type::Map(_) => matches!(lhs.ty, Type::String | Type::Dyn),
                Type::Dyn => true,
                _ => false,
            };
            if !ok {
                return Err(mismatch(&lhs, &rhs));
            }
            Ok(CheckedExpr::new(
                CheckedKind::In {
                    element: boxed(lhs),
                    collection: boxed(rhs),
                },
                Type::Bool,
            ))
        }
        BinaryOp::Arith(arith) => {
            let ty = arith_type(arith, &lhs.ty, &rhs.ty).ok_or_else(|| mismatch(&lhs, &rhs))?;
            Ok(CheckedExpr::new(
                CheckedKind::Arith {
                    op: arith,
                    lhs: boxed(lhs),
                    rhs: boxed(rhs),
                },
                ty,
            ))
        }
    }
}

/// Arithmetic never mixes `int` and `double`; conversions must be explicit.
fn arith_type(op: ArithOp, lhs: &Type, rhs: &Type) -> Option<Type> {
    match (op, lhs, rhs) {
        (_, Type::Dyn, _) | (_, _, Type::Dyn) => Some(Type::Dyn),
        (_, Type::Int, Type::Int) => Some(Type::Int),
        (ArithOp::Rem, _, _) => None,
        (_, Type::Double, Type::Double) => Some(Type::Double),
        (ArithOp::Add, Type::String, Type::String) => Some(Type::String),
        (ArithOp::Add, Type::List(a), Type::List(b)) => Some(if a == b {
            Type::List(a.clone())
        } else {
            Type::list(Type::Dyn)
        }),
        _ => None,
    }
}

fn check_conditional(
    condition: CheckedExpr,
    then: CheckedExpr,
    otherwise: CheckedExpr,
) -> Result<CheckedExpr, CompileError> {
    if !condition.ty.admits_bool() {
        return Err(CompileError::overload(
            "?:",
            &[&condition.ty, &then.ty, &otherwise.ty],
        ));
    }
    let ty = match (&then.ty, &otherwise.ty) {
        (a, b) if a == b => a.clone(),
        (Type::Dyn, _) | (_, Type::Dyn) => Type::Dyn,
        (Type::Null, other) | (other, Type::Null) => other.clone(),
        (a, b) => {
            return Err(CompileError::IncompatibleBranches {
                then: a.clone(),
                otherwise: b.clone(),
            });
        }
    };
    Ok(CheckedExpr::new(
        CheckedKind::Conditional {
            condition: boxed(condition),
            then: boxed(then),
            otherwise: boxed(otherwise),
        },
        ty,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_str(definition: &str) -> Result<Program, CompileError> {
        Compiler::new().check(definition)
    }

    #[test]
    fn accepts_boolean_comparison() {
        let program = check_str("txn.Amount >= 1000000.0").unwrap();
        assert_eq!(program.output_type(), &Type::Bool);
    }

    #[test]
    fn rejects_non_boolean_result() {
        let err = check_str("txn.Amount").unwrap_err();
        assert_eq!(err.to_string(), "got double, but want bool type");
    }

    #[test]
    fn rejects_dyn_result() {
        let err = check_str("txn.CustomData.vip").unwrap_err();
        assert!(matches!(err, CompileError::NotBoolean { actual: Type::Dyn }));
    }

    #[test]
    fn rejects_unknown_field() {
        let err = check_str("txn.Amonut > 1.0").unwrap_err();
        assert!(matches!(err, CompileError::UndefinedField { ref field, .. } if field == "Amonut"));
    }

    #[test]
    fn rejects_undeclared_variable() {
        let err = check_str("amount > 1.0").unwrap_err();
        assert!(matches!(err, CompileError::UndeclaredReference { ref name } if name == "amount"));
    }

    #[test]
    fn rejects_bare_variable() {
        let err = check_str("txn == null").unwrap_err();
        assert!(matches!(err, CompileError::BareVariable { .. }));
    }

    #[test]
    fn rejects_mixed_numeric_arithmetic() {
        let err = check_str("txn.Amount + 1 > 2.0").unwrap_err();
        assert_eq!(
            err.to_string(),
            "found no matching overload for '+' applied to (double, int)"
        );
    }

    #[test]
    fn allows_cross_numeric_comparison() {
        assert!(check_str("txn.Amount > 100").is_ok());
        assert!(check_str("txn.RiskScore <= 50.5").is_ok());
    }

    #[test]
    fn rejects_string_number_comparison() {
        assert!(matches!(
            check_str("txn.Name > 1").unwrap_err(),
            CompileError::NoMatchingOverload { .. }
        ));
    }

    #[test]
    fn map_fields_select_and_index() {
        assert!(check_str("txn.CustomBools.vip").is_ok());
        assert!(check_str("txn.CustomBools['vip'] && txn.Aggregates.sum_24h > 10.0").is_ok());
        assert!(check_str("txn.CustomStrings[1] == 'x'").is_err());
    }

    #[test]
    fn functions_are_typed() {
        assert!(check_str("size(txn.Name) > 3").is_ok());
        assert!(check_str("txn.Name.startsWith('acme')").is_ok());
        assert!(check_str("double(txn.RiskScore) * 2.0 > txn.Amount").is_ok());
        assert!(matches!(
            check_str("txn.Amount.contains('x')").unwrap_err(),
            CompileError::NoMatchingOverload { .. }
        ));
        assert!(matches!(
            check_str("size(txn.Name, txn.Name) > 1").unwrap_err(),
            CompileError::WrongArity { .. }
        ));
        assert!(matches!(
            check_str("matches(txn.Name, 'x')").unwrap_err(),
            CompileError::UnknownFunction { .. }
        ));
    }

    #[test]
    fn in_operator() {
        assert!(check_str("txn.Currency in ['USD', 'EUR']").is_ok());
        assert!(check_str("'vip' in txn.CustomBools").is_ok());
        assert!(check_str("txn.Currency in [1, 2]").is_err());
    }

    #[test]
    fn negative_literals_fold() {
        let program = check_str("txn.RiskScore > -5").unwrap();
        assert_eq!(program.to_string(), "(txn.RiskScore > -5)");
        match &program.expr.kind {
            CheckedKind::Compare { rhs, .. } => {
                assert_eq!(rhs.kind, CheckedKind::Literal(Literal::Int(-5)));
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn conditional_branches_must_agree() {
        assert!(check_str("txn.RiskScore > 5 ? txn.Amount > 1.0 : false").is_ok());
        assert!(matches!(
            check_str("(txn.RiskScore > 5 ? 1 : 'a') == 1").unwrap_err(),
            CompileError::IncompatibleBranches { .. }
        ));
    }

    #[test]
    fn and_requires_booleans() {
        assert!(check_str("txn.Amount && true").is_err());
    }

    #[test]
    fn compile_produces_payload() {
        let bytes = Compiler::new().compile("txn.Amount >= 1000000.0").unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn compile_reports_syntax_errors() {
        let err = Compiler::new().compile("txn.Amount >=").unwrap_err();
        assert!(matches!(
            err,
            RulesError::Compile(CompileError::Parse(_))
        ));
    }
}
