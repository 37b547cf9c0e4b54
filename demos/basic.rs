use txn_rules::{MemoryRuleStore, NewRule, RuleStore, Txn};

#[tokio::main]
async fn main() {
    let store = MemoryRuleStore::new();

    // Define rules for user 12345
    store
        .create(
            NewRule::new("large-transfer", "12345", "txn.Amount >= 1000000.0")
                .include(["abc"])
                .exclude(["cde"]),
        )
        .await
        .expect("failed to create rule");
    store
        .create(NewRule::new(
            "sanctioned-currency",
            "12345",
            "txn.Currency in ['RUB', 'IRR']",
        ))
        .await
        .expect("failed to create rule");

    // A definition that does not type-check is rejected up front
    if let Err(err) = store
        .create(NewRule::new("broken", "12345", "txn.Amount > 'lots'"))
        .await
    {
        println!("rejected: {err}");
    }

    // Load the rules that apply to entity abc and run them
    let rules = store
        .read("12345", "abc")
        .await
        .expect("failed to read rules");

    let txn = Txn {
        amount: 2_500_000.0,
        currency: "USD".into(),
        ..Txn::default()
    };

    for rule in &rules {
        match rule.evaluate(&txn) {
            Ok(true) => println!("{} ({}): flagged", rule.name, rule.program),
            Ok(false) => println!("{} ({}): clear", rule.name, rule.program),
            Err(err) => println!("{}: {err}", rule.name),
        }
    }
}
