
use proptest::prelude::*;
use strategies::{arb_definition, arb_placements, arb_query, arb_txn};
use txn_rules::{Compiler, MemoryRuleStore, Program, RuleStore};

proptest! {
    /// Evaluating a compiled definition agrees with the reference evaluator.
    #[test]
    fn evaluation_matches_reference(def in arb_definition(4), txn in arb_txn()) {
        let source = def.source();
        let program = Compiler::new().check(&source).unwrap();
        prop_assert_eq!(program.evaluate(&txn), Ok(def.expected(&txn)), "{}", source);
    }

    /// A stored payload decodes to exactly the program that was checked.
    #[test]
    fn payload_round_trip_preserves_program(def in arb_definition(4), txn in arb_txn()) {
        let source = def.source();
        let compiler = Compiler::new();
        let checked = compiler.check(&source).unwrap();
        let decoded = Program::from_bytes(&compiler.compile(&source).unwrap()).unwrap();
        prop_assert_eq!(&decoded, &checked);
        prop_assert!(decoded.is_compiled_from(&source));
        prop_assert_eq!(decoded.evaluate(&txn), checked.evaluate(&txn));
    }

    /// The canonical rendering is a fixed point of check-then-display.
    #[test]
    fn canonical_form_is_stable(def in arb_definition(3)) {
        let first = Compiler::new().check(&def.source()).unwrap().to_string();
        let second = Compiler::new().check(&first).unwrap().to_string();
        prop_assert_eq!(first, second);
    }

    /// Corrupting any payload byte is detected, never evaluated.
    #[test]
    fn corrupted_payload_is_rejected(def in arb_definition(2), pos in any::<prop::sample::Index>(), bit in 0_u8..8) {
        let mut bytes = Compiler::new().compile(&def.source()).unwrap();
        let i = pos.index(bytes.len());
        bytes[i] ^= 1 << bit;
        prop_assert!(Program::from_bytes(&bytes).is_err(), "byte {} bit {}", i, bit);
    }

    /// The in-memory store returns exactly the applicable rules, oldest first.
    #[test]
    fn memory_store_applicability(placements in arb_placements(), (user, entity) in arb_query()) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let names = runtime.block_on(async {
            let store = MemoryRuleStore::new();
            for (i, placement) in placements.iter().enumerate() {
                store.create(placement.to_rule(&format!("rule_{i}"))).await.unwrap();
            }
            store.read(user, entity).await.unwrap()
        })
        .into_iter()
        .map(|rule| rule.name)
        .collect::<Vec<_>>();

        let expected = placements
            .iter()
            .enumerate()
            .filter(|(_, p)| p.applies(user, entity))
            .map(|(i, _)| format!("rule_{i}"))
            .collect::<Vec<_>>();
        prop_assert_eq!(names, expected);
    }
}
