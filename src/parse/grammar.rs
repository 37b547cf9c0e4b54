use winnow::ascii::{digit1, multispace1, till_line_ending};
use winnow::combinator::{alt, cut_err, delimited, not, opt, preceded, repeat, separated};
use winnow::error::{ErrMode, ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

use crate::types::{ArithOp, BinaryOp, CompareOp, Expr, Literal, UnaryOp};

// -- Whitespace & comments --------------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    let _: () = repeat(
        0..,
        alt((multispace1.void(), ("//", till_line_ending).void())),
    )
    .parse_next(input)?;
    Ok(())
}

// -- Identifiers ------------------------------------------------------------

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., is_ident_char),
    )
        .take()
        .parse_next(input)
}

fn keyword_in(input: &mut &str) -> ModalResult<()> {
    ("in", not(one_of(is_ident_char))).void().parse_next(input)
}

// -- Literals ---------------------------------------------------------------

fn string_literal(input: &mut &str) -> ModalResult<String> {
    let quote = one_of(['"', '\'']).parse_next(input)?;
    let mut s = String::new();
    loop {
        let ch = cut_err(any)
            .context(StrContext::Expected(StrContextValue::Description(
                "closing quote",
            )))
            .parse_next(input)?;
        match ch {
            c if c == quote => return Ok(s),
            '\\' => {
                let esc = cut_err(any).parse_next(input)?;
                match esc {
                    '"' => s.push('"'),
                    '\'' => s.push('\''),
                    '\\' => s.push('\\'),
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            c => s.push(c),
        }
    }
}

/// Integer unless the text has a fraction or an exponent. Out of range
/// values of either kind are rejected.
fn number(input: &mut &str) -> ModalResult<Literal> {
    let text = (
        digit1,
        opt(('.', digit1)),
        opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)),
    )
        .take()
        .parse_next(input)?;
    if text.contains(['.', 'e', 'E']) {
        let v: f64 = text
            .parse()
            .map_err(|_| ErrMode::from_input(input).cut())?;
        if !v.is_finite() {
            return Err(ErrMode::from_input(input).cut());
        }
        Ok(Literal::Double(v))
    } else {
        let v: i64 = text
            .parse()
            .map_err(|_| ErrMode::from_input(input).cut())?;
        Ok(Literal::Int(v))
    }
}

// -- Operators --------------------------------------------------------------

fn relation_op(input: &mut &str) -> ModalResult<BinaryOp> {
    ws.parse_next(input)?;
    alt((
        "<=".value(BinaryOp::Compare(CompareOp::Lte)),
        "<".value(BinaryOp::Compare(CompareOp::Lt)),
        ">=".value(BinaryOp::Compare(CompareOp::Gte)),
        ">".value(BinaryOp::Compare(CompareOp::Gt)),
        "==".value(BinaryOp::Compare(CompareOp::Eq)),
        "!=".value(BinaryOp::Compare(CompareOp::Neq)),
        keyword_in.value(BinaryOp::In),
    ))
    .parse_next(input)
}

fn additive_op(input: &mut &str) -> ModalResult<ArithOp> {
    ws.parse_next(input)?;
    alt(('+'.value(ArithOp::Add), '-'.value(ArithOp::Sub))).parse_next(input)
}

fn multiplicative_op(input: &mut &str) -> ModalResult<ArithOp> {
    ws.parse_next(input)?;
    alt((
        '*'.value(ArithOp::Mul),
        '/'.value(ArithOp::Div),
        '%'.value(ArithOp::Rem),
    ))
    .parse_next(input)
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

// -- Expressions ------------------------------------------------------------
//
// Precedence, loosest first:
//   ?:  ||  &&  relations (== != < <= > >= in)  + -  * / %  unary (! -)  member

fn arguments(input: &mut &str) -> ModalResult<Vec<Expr>> {
    let args: Vec<Expr> = separated(0.., expr, (ws, ',')).parse_next(input)?;
    cut_err((ws, ')')).parse_next(input)?;
    Ok(args)
}

fn list(input: &mut &str) -> ModalResult<Expr> {
    '['.parse_next(input)?;
    let items: Vec<Expr> = separated(0.., expr, (ws, ',')).parse_next(input)?;
    opt((ws, ',')).parse_next(input)?;
    cut_err((ws, ']')).parse_next(input)?;
    Ok(Expr::List(items))
}

fn ident_or_call(input: &mut &str) -> ModalResult<Expr> {
    let name = ident.parse_next(input)?;
    match name {
        "true" => return Ok(Expr::Literal(Literal::Bool(true))),
        "false" => return Ok(Expr::Literal(Literal::Bool(false))),
        "null" => return Ok(Expr::Literal(Literal::Null)),
        "in" => return Err(ErrMode::from_input(input)),
        _ => {}
    }
    let checkpoint = input.checkpoint();
    ws.parse_next(input)?;
    if opt('(').parse_next(input)?.is_some() {
        let args = arguments(input)?;
        Ok(Expr::Call {
            target: None,
            function: name.to_owned(),
            args,
        })
    } else {
        input.reset(&checkpoint);
        Ok(Expr::Ident(name.to_owned()))
    }
}

fn primary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    alt((
        delimited('(', cut_err(expr), cut_err((ws, ')'))),
        list,
        string_literal.map(|s| Expr::Literal(Literal::String(s))),
        number.map(Expr::Literal),
        ident_or_call,
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "expression",
    )))
    .parse_next(input)
}

/// Field selection, indexing, and method calls, applied left to right.
fn member(input: &mut &str) -> ModalResult<Expr> {
    let mut expr = primary(input)?;
    loop {
        let checkpoint = input.checkpoint();
        ws.parse_next(input)?;
        if opt('.').parse_next(input)?.is_some() {
            ws.parse_next(input)?;
            let name = cut_err(ident)
                .context(StrContext::Expected(StrContextValue::Description(
                    "field or method name",
                )))
                .parse_next(input)?;
            let after_name = input.checkpoint();
            ws.parse_next(input)?;
            if opt('(').parse_next(input)?.is_some() {
                let args = arguments(input)?;
                expr = Expr::Call {
                    target: Some(Box::new(expr)),
                    function: name.to_owned(),
                    args,
                };
            } else {
                input.reset(&after_name);
                expr = Expr::Select {
                    operand: Box::new(expr),
                    field: name.to_owned(),
                };
            }
        } else if opt('[').parse_next(input)?.is_some() {
            let index = cut_err(self::expr).parse_next(input)?;
            cut_err((ws, ']')).parse_next(input)?;
            expr = Expr::Index {
                operand: Box::new(expr),
                index: Box::new(index),
            };
        } else {
            input.reset(&checkpoint);
            return Ok(expr);
        }
    }
}

fn unary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    let op = opt(alt(('!'.value(UnaryOp::Not), '-'.value(UnaryOp::Neg)))).parse_next(input)?;
    match op {
        Some(op) => {
            let operand = cut_err(unary).parse_next(input)?;
            Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            })
        }
        None => member(input),
    }
}

fn multiplication(input: &mut &str) -> ModalResult<Expr> {
    let first = unary(input)?;
    let rest: Vec<(ArithOp, Expr)> =
        repeat(0.., (multiplicative_op, cut_err(unary))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, (op, r)| binary(BinaryOp::Arith(op), acc, r)))
}

fn addition(input: &mut &str) -> ModalResult<Expr> {
    let first = multiplication(input)?;
    let rest: Vec<(ArithOp, Expr)> =
        repeat(0.., (additive_op, cut_err(multiplication))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, (op, r)| binary(BinaryOp::Arith(op), acc, r)))
}

fn relation(input: &mut &str) -> ModalResult<Expr> {
    let first = addition(input)?;
    let rest: Vec<(BinaryOp, Expr)> =
        repeat(0.., (relation_op, cut_err(addition))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, (op, r)| binary(op, acc, r)))
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = relation(input)?;
    let rest: Vec<Expr> = repeat(0.., preceded((ws, "&&"), cut_err(relation))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| binary(BinaryOp::And, acc, r)))
}

fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = and_expr(input)?;
    let rest: Vec<Expr> = repeat(0.., preceded((ws, "||"), cut_err(and_expr))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| binary(BinaryOp::Or, acc, r)))
}

fn conditional(input: &mut &str) -> ModalResult<Expr> {
    let condition = or_expr(input)?;
    if opt(preceded(ws, '?')).parse_next(input)?.is_none() {
        return Ok(condition);
    }
    let then = cut_err(or_expr).parse_next(input)?;
    cut_err(preceded(ws, ':')).parse_next(input)?;
    let otherwise = cut_err(conditional).parse_next(input)?;
    Ok(Expr::Conditional {
        condition: Box::new(condition),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    })
}

fn expr(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    conditional(input)
}

// -- Top-level parser -------------------------------------------------------

pub fn definition(input: &mut &str) -> ModalResult<Expr> {
    let e = expr(input)?;
    ws.parse_next(input)?;
    Ok(e)
}

#[cfg(test)]
mod tests {
    use crate::parse::parse;

    use super::*;

    fn select(field: &str) -> Expr {
        Expr::Select {
            operand: Box::new(Expr::Ident("txn".into())),
            field: field.into(),
        }
    }

    #[test]
    fn parse_field_comparison() {
        let e = parse("txn.Amount >= 1000000.0").unwrap();
        assert_eq!(
            e,
            binary(
                BinaryOp::Compare(CompareOp::Gte),
                select("Amount"),
                Expr::Literal(Literal::Double(1_000_000.0)),
            )
        );
    }

    #[test]
    fn parse_all_comparison_ops() {
        let ops = [
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Neq),
            (">", CompareOp::Gt),
            (">=", CompareOp::Gte),
            ("<", CompareOp::Lt),
            ("<=", CompareOp::Lte),
        ];
        for (sym, expected) in ops {
            let input = format!("txn.RiskScore {sym} 1");
            match parse(&input).unwrap() {
                Expr::Binary {
                    op: BinaryOp::Compare(op),
                    ..
                } => assert_eq!(op, expected, "failed for {sym}"),
                other => panic!("expected comparison for {sym}, got {other:?}"),
            }
        }
    }

    #[test]
    fn parse_literals() {
        let cases = [
            ("42", Literal::Int(42)),
            ("3.25", Literal::Double(3.25)),
            ("1e3", Literal::Double(1000.0)),
            ("true", Literal::Bool(true)),
            ("false", Literal::Bool(false)),
            ("null", Literal::Null),
            (r#""hello""#, Literal::String("hello".into())),
            ("'single'", Literal::String("single".into())),
            (r#""a\"b""#, Literal::String("a\"b".into())),
        ];
        for (text, expected) in cases {
            assert_eq!(parse(text).unwrap(), Expr::Literal(expected), "failed for {text}");
        }
    }

    #[test]
    fn double_literals_must_be_finite() {
        assert_eq!(
            parse("1.7976931348623157e308").unwrap(),
            Expr::Literal(Literal::Double(f64::MAX))
        );
        for bad in ["1e400", "1.8e308", "txn.Amount < 1e999"] {
            assert!(parse(bad).is_err(), "expected error for {bad:?}");
        }
    }

    #[test]
    fn and_binds_tighter_than_or() {
        match parse("a || b && c").unwrap() {
            Expr::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => {
                assert_eq!(*lhs, Expr::Ident("a".into()));
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::And, .. }));
            }
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let e = parse("1 + 2 * 3").unwrap();
        assert_eq!(e.to_string(), "(1 + (2 * 3))");
    }

    #[test]
    fn subtraction_is_left_associative() {
        assert_eq!(parse("5 - 2 - 1").unwrap().to_string(), "((5 - 2) - 1)");
    }

    #[test]
    fn parse_parenthesized_grouping() {
        assert_eq!(
            parse("(a || b) && c").unwrap().to_string(),
            "((a || b) && c)"
        );
    }

    #[test]
    fn parse_unary() {
        assert_eq!(parse("!!a").unwrap().to_string(), "!!a");
        assert_eq!(parse("-txn.Amount").unwrap().to_string(), "-txn.Amount");
        assert_eq!(parse("1 - -2").unwrap().to_string(), "(1 - -2)");
    }

    #[test]
    fn parse_member_chain() {
        let e = parse("txn.CustomData['device'].os").unwrap();
        assert_eq!(e.to_string(), r#"txn.CustomData["device"].os"#);
    }

    #[test]
    fn parse_method_and_global_calls() {
        let e = parse("txn.Name.startsWith('acme') && size(txn.Name) > 3").unwrap();
        assert_eq!(
            e.to_string(),
            r#"(txn.Name.startsWith("acme") && (size(txn.Name) > 3))"#
        );
    }

    #[test]
    fn parse_in_and_lists() {
        let e = parse("txn.Currency in ['USD', 'EUR',]").unwrap();
        assert_eq!(e.to_string(), r#"(txn.Currency in ["USD", "EUR"])"#);
    }

    #[test]
    fn in_prefix_identifier_is_not_keyword() {
        let e = parse("txn.Currency == index").unwrap();
        assert!(matches!(
            e,
            Expr::Binary {
                op: BinaryOp::Compare(CompareOp::Eq),
                ..
            }
        ));
    }

    #[test]
    fn parse_conditional_is_right_associative() {
        let e = parse("a ? b : c ? d : e").unwrap();
        assert_eq!(e.to_string(), "(a ? b : (c ? d : e))");
    }

    #[test]
    fn parse_comments_ignored() {
        let e = parse("// large transfers\ntxn.Amount > 10.0 // inline\n").unwrap();
        assert!(matches!(e, Expr::Binary { .. }));
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in [
            "",
            "txn.Amount >=",
            "txn.Amount >= 1 1",
            "(txn.Amount > 1",
            "txn.",
            "'unterminated",
            "txn.Amount = 1",
            "99999999999999999999",
            "[1, 2",
            "1e400",
            "txn.Amount < 2.5e308",
        ] {
            assert!(parse(bad).is_err(), "expected error for {bad:?}");
        }
    }
}
