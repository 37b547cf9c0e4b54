use crate::types::{
    ArithOp, CheckedExpr, CheckedKind, CompareOp, EvalError, Function, Txn, TxnField, Value,
};

pub(crate) fn evaluate(expr: &CheckedExpr, txn: &Txn) -> Result<Value, EvalError> {
    match &expr.kind {
        CheckedKind::Literal(lit) => Ok(Value::from(lit)),
        CheckedKind::Field(field) => Ok(field.read(txn)),
        CheckedKind::Index { operand, key } => {
            if let Some(field) = map_field(operand) {
                return match evaluate(key, txn)? {
                    Value::String(k) => field
                        .entry(txn, &k)
                        .ok_or(EvalError::NoSuchKey { key: k }),
                    other => Err(overload("[]", &[&Value::Map(Default::default()), &other])),
                };
            }
            let container = evaluate(operand, txn)?;
            let key = evaluate(key, txn)?;
            index(container, key)
        }
        CheckedKind::List(items) => items
            .iter()
            .map(|item| evaluate(item, txn))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        CheckedKind::Call { function, args } => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, txn))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, args)
        }
        CheckedKind::Not(inner) => match evaluate(inner, txn)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(overload("!", &[&other])),
        },
        CheckedKind::Neg(inner) => match evaluate(inner, txn)? {
            Value::Int(v) => v
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| EvalError::Overflow {
                    operator: "-".into(),
                }),
            Value::Double(v) => Ok(Value::Double(-v)),
            other => Err(overload("-", &[&other])),
        },
        CheckedKind::And(a, b) => logical(a, b, false, txn),
        CheckedKind::Or(a, b) => logical(a, b, true, txn),
        CheckedKind::Compare { op, lhs, rhs } => {
            let l = evaluate(lhs, txn)?;
            let r = evaluate(rhs, txn)?;
            l.compare(*op, &r)
                .map(Value::Bool)
                .ok_or_else(|| overload(op, &[&l, &r]))
        }
        CheckedKind::In {
            element,
            collection,
        } => {
            let element = evaluate(element, txn)?;
            if let Some(field) = map_field(collection) {
                return match element {
                    Value::String(k) => Ok(Value::Bool(field.entry(txn, &k).is_some())),
                    other => Err(overload("in", &[&other, &Value::Map(Default::default())])),
                };
            }
            let found = match (&element, evaluate(collection, txn)?) {
                (e, Value::List(items)) => items
                    .iter()
                    .any(|item| e.compare(CompareOp::Eq, item) == Some(true)),
                (Value::String(k), Value::Map(map)) => map.contains_key(k),
                (e, other) => return Err(overload("in", &[e, &other])),
            };
            Ok(Value::Bool(found))
        }
        CheckedKind::Arith { op, lhs, rhs } => {
            let l = evaluate(lhs, txn)?;
            let r = evaluate(rhs, txn)?;
            arith(*op, l, r)
        }
        CheckedKind::Conditional {
            condition,
            then,
            otherwise,
        } => match evaluate(condition, txn)? {
            Value::Bool(true) => evaluate(then, txn),
            Value::Bool(false) => evaluate(otherwise, txn),
            other => Err(overload("?:", &[&other])),
        },
    }
}

/// A direct reference to one of the map-typed `txn` fields, which can be
/// probed by key without materializing the whole map.
fn map_field(expr: &CheckedExpr) -> Option<TxnField> {
    match expr.kind {
        CheckedKind::Field(field) if field.is_map() => Some(field),
        _ => None,
    }
}

fn overload(operator: impl ToString, operands: &[&Value]) -> EvalError {
    EvalError::NoMatchingOverload {
        operator: operator.to_string(),
        operands: operands
            .iter()
            .map(|v| v.type_name())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn as_bool(expr: &CheckedExpr, txn: &Txn) -> Result<bool, EvalError> {
    match evaluate(expr, txn)? {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::NotBoolean {
            actual: other.type_name(),
        }),
    }
}

/// `&&` and `||` are commutative with respect to errors: a decisive operand
/// (`false` for `&&`, `true` for `||`) wins even if the other side fails.
fn logical(
    a: &CheckedExpr,
    b: &CheckedExpr,
    decisive: bool,
    txn: &Txn,
) -> Result<Value, EvalError> {
    let left = as_bool(a, txn);
    if matches!(left, Ok(v) if v == decisive) {
        return Ok(Value::Bool(decisive));
    }
    match (left, as_bool(b, txn)) {
        (_, Ok(v)) if v == decisive => Ok(Value::Bool(decisive)),
        (Ok(_), Ok(_)) => Ok(Value::Bool(!decisive)),
        (Err(e), _) | (_, Err(e)) => Err(e),
    }
}

fn index(container: Value, key: Value) -> Result<Value, EvalError> {
    match (container, key) {
        (Value::Map(mut map), Value::String(k)) => {
            map.remove(&k).ok_or(EvalError::NoSuchKey { key: k })
        }
        (Value::List(mut items), Value::Int(i)) => {
            let len = items.len();
            match usize::try_from(i) {
                Ok(pos) if pos < len => Ok(items.swap_remove(pos)),
                _ => Err(EvalError::IndexOutOfRange { index: i, len }),
            }
        }
        (c, k) => Err(overload("[]", &[&c, &k])),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn call(function: Function, args: Vec<Value>) -> Result<Value, EvalError> {
    let invalid = |value: &Value, target: &'static str| EvalError::InvalidConversion {
        value: value.to_string(),
        target,
    };
    match (function, args.as_slice()) {
        (Function::Size, [Value::String(s)]) => Ok(Value::Int(s.chars().count() as i64)),
        (Function::Size, [Value::List(items)]) => Ok(Value::Int(items.len() as i64)),
        (Function::Size, [Value::Map(map)]) => Ok(Value::Int(map.len() as i64)),
        (Function::Contains, [Value::String(s), Value::String(sub)]) => {
            Ok(Value::Bool(s.contains(sub.as_str())))
        }
        (Function::StartsWith, [Value::String(s), Value::String(prefix)]) => {
            Ok(Value::Bool(s.starts_with(prefix.as_str())))
        }
        (Function::EndsWith, [Value::String(s), Value::String(suffix)]) => {
            Ok(Value::Bool(s.ends_with(suffix.as_str())))
        }
        (Function::Int, [Value::Int(v)]) => Ok(Value::Int(*v)),
        (Function::Int, [v @ Value::Double(d)]) => {
            let t = d.trunc();
            if t.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64 {
                Ok(Value::Int(t as i64))
            } else {
                Err(invalid(v, "int"))
            }
        }
        (Function::Int, [v @ Value::String(s)]) => {
            s.parse().map(Value::Int).map_err(|_| invalid(v, "int"))
        }
        (Function::Double, [Value::Int(v)]) => Ok(Value::Double(*v as f64)),
        (Function::Double, [Value::Double(v)]) => Ok(Value::Double(*v)),
        (Function::Double, [v @ Value::String(s)]) => {
            s.parse().map(Value::Double).map_err(|_| invalid(v, "double"))
        }
        (Function::String, [Value::String(s)]) => Ok(Value::String(s.clone())),
        (Function::String, [Value::Int(v)]) => Ok(Value::String(v.to_string())),
        (Function::String, [Value::Double(v)]) => Ok(Value::String(v.to_string())),
        (Function::String, [Value::Bool(v)]) => Ok(Value::String(v.to_string())),
        (f, args) => Err(overload(f.name(), &args.iter().collect::<Vec<_>>())),
    }
}

fn arith(op: ArithOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    let overflow = || EvalError::Overflow {
        operator: op.to_string(),
    };
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            if matches!(op, ArithOp::Div | ArithOp::Rem) && b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            let result = match op {
                ArithOp::Add => a.checked_add(b),
                ArithOp::Sub => a.checked_sub(b),
                ArithOp::Mul => a.checked_mul(b),
                ArithOp::Div => a.checked_div(b),
                ArithOp::Rem => a.checked_rem(b),
            };
            result.map(Value::Int).ok_or_else(overflow)
        }
        (Value::Double(a), Value::Double(b)) if op != ArithOp::Rem => Ok(Value::Double(match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            _ => a / b,
        })),
        (Value::String(mut a), Value::String(b)) if op == ArithOp::Add => {
            a.push_str(&b);
            Ok(Value::String(a))
        }
        (Value::List(mut a), Value::List(b)) if op == ArithOp::Add => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (l, r) => Err(overload(op, &[&l, &r])),
    }
}
