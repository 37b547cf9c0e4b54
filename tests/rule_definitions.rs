use std::collections::HashMap;

use txn_rules::{CompileError, Compiler, EvalError, RulesError, Txn, Type};

fn txn() -> Txn {
    let mut custom_data = serde_json::Map::new();
    custom_data.insert("merchant".into(), serde_json::json!({"mcc": 5967, "new": true}));
    Txn {
        name: "wire-out".into(),
        kind: "debit".into(),
        currency: "EUR".into(),
        amount: 12_500.0,
        risk_score: 80,
        custom_data,
        custom_bools: HashMap::from([("first_time_payee".into(), true)]),
        custom_floats: HashMap::from([("velocity".into(), 0.75)]),
        custom_strings: HashMap::from([("country".into(), "NG".into())]),
        aggregates: HashMap::from([("count_1h".into(), 4.0)]),
    }
}

fn eval(definition: &str) -> Result<bool, EvalError> {
    Compiler::new().check(definition).unwrap().evaluate(&txn())
}

fn reject(definition: &str) -> CompileError {
    Compiler::new().check(definition).unwrap_err()
}

// ---------------------------------------------------------------------------
// Realistic rules
// ---------------------------------------------------------------------------

#[test]
fn fraud_style_rules_evaluate() {
    assert_eq!(
        eval("txn.RiskScore >= 75 && txn.CustomBools.first_time_payee"),
        Ok(true)
    );
    assert_eq!(
        eval("txn.CustomStrings.country in ['NG', 'KP'] && txn.Amount > 10000.0"),
        Ok(true)
    );
    assert_eq!(
        eval("txn.Aggregates.count_1h > 5.0 || txn.CustomFloats.velocity > 0.9"),
        Ok(false)
    );
    assert_eq!(eval("txn.CustomData.merchant.mcc == 5967"), Ok(true));
    assert_eq!(eval("txn.CustomData.merchant.new == true"), Ok(true));
}

#[test]
fn multi_line_definition_with_comments() {
    let definition = "
        // high value wires to new payees
        txn.Type == 'debit'
            && txn.Amount >= 10000.0   // EUR
            && txn.CustomBools['first_time_payee']
    ";
    assert_eq!(eval(definition), Ok(true));
}

#[test]
fn explicit_conversions_bridge_numeric_types() {
    assert_eq!(eval("double(txn.RiskScore) * 100.0 < txn.Amount"), Ok(true));
    assert_eq!(eval("int(txn.Amount) % 1000 == 500"), Ok(true));
    assert_eq!(eval("int('80') == txn.RiskScore"), Ok(true));
}

#[test]
fn runtime_errors_surface_from_evaluation() {
    assert_eq!(
        eval("txn.CustomStrings.city == 'Lagos'"),
        Err(EvalError::NoSuchKey { key: "city".into() })
    );
    assert_eq!(
        eval("txn.RiskScore / (txn.RiskScore - 80) > 1"),
        Err(EvalError::DivisionByZero)
    );
    assert!(matches!(
        eval("int('eighty') > 1"),
        Err(EvalError::InvalidConversion { target: "int", .. })
    ));
}

// ---------------------------------------------------------------------------
// Rejected definitions
// ---------------------------------------------------------------------------

#[test]
fn non_boolean_definitions_are_rejected() {
    for (definition, actual) in [
        ("txn.Amount", Type::Double),
        ("txn.RiskScore + 1", Type::Int),
        ("txn.Name", Type::String),
        ("[true]", Type::list(Type::Bool)),
        ("txn.CustomData.merchant", Type::Dyn),
    ] {
        match reject(definition) {
            CompileError::NotBoolean { actual: got } => assert_eq!(got, actual, "{definition}"),
            other => panic!("{definition}: expected NotBoolean, got {other:?}"),
        }
    }
}

#[test]
fn reference_errors() {
    assert!(matches!(
        reject("amount > 1.0"),
        CompileError::UndeclaredReference { .. }
    ));
    assert!(matches!(
        reject("txn.amount > 1.0"),
        CompileError::UndefinedField { .. }
    ));
    assert!(matches!(reject("txn"), CompileError::BareVariable { .. }));
}

#[test]
fn type_errors() {
    assert!(matches!(
        reject("txn.Amount > 'big'"),
        CompileError::NoMatchingOverload { .. }
    ));
    assert!(matches!(
        reject("txn.Amount * 2 > 1.0"),
        CompileError::NoMatchingOverload { .. }
    ));
    assert!(matches!(
        reject("!txn.Name"),
        CompileError::NoMatchingOverload { .. }
    ));
    assert!(matches!(
        reject("txn.Name.startsWith()"),
        CompileError::WrongArity { .. }
    ));
}

#[test]
fn syntax_errors() {
    for bad in ["", "txn.Amount >", "txn.Amount > 1 &&", "'unterminated", "txn..Amount"] {
        assert!(
            matches!(reject(bad), CompileError::Parse(_)),
            "{bad:?} should be a syntax error"
        );
    }
}

#[test]
fn compile_wraps_errors() {
    let err = Compiler::new().compile("txn.Amount").unwrap_err();
    assert_eq!(err.code(), "COMPILE_FAILED");
    assert!(matches!(
        err,
        RulesError::Compile(CompileError::NotBoolean { .. })
    ));
}

#[test]
fn oversized_definitions_are_rejected_not_crashed() {
    let parens = format!("{}true{}", "(".repeat(1_000), ")".repeat(1_000));
    let chain = vec!["txn.RiskScore > 1"; 5_000].join(" && ");
    let bangs = format!("{}true", "!".repeat(10_000));
    let ternaries = format!("{}false", "true ? false : ".repeat(5_000));
    for bad in [&parens, &chain, &bangs, &ternaries] {
        assert!(matches!(reject(bad), CompileError::Parse(_)));
        let err = Compiler::new().compile(bad).unwrap_err();
        assert_eq!(err.code(), "COMPILE_FAILED");
    }
}

#[test]
fn long_chains_within_bounds_evaluate() {
    let chain = vec!["txn.RiskScore > 1"; 100].join(" && ");
    assert_eq!(eval(&chain), Ok(true));
    let nested = format!("{}txn.Amount > 1.0{}", "(".repeat(60), ")".repeat(60));
    assert_eq!(eval(&nested), Ok(true));
}

#[test]
fn out_of_range_double_literal_is_rejected() {
    for bad in ["txn.Amount < 1e400", "txn.Amount > -1e400", "txn.Amount < 1.0e309"] {
        assert!(matches!(reject(bad), CompileError::Parse(_)), "{bad}");
    }
    assert_eq!(eval("txn.Amount < 1e300"), Ok(true));
}
