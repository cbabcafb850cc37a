use botcalc_core::literal::{coerce, format_value};
use botcalc_core::{Bot, PrecalculationManager, Value};
use proptest::prelude::*;

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        (-1_000_000i32..1_000_000).prop_map(Value::from),
        (-1.0e6f64..1.0e6).prop_map(Value::Number),
    ]
}

fn arb_literal() -> impl Strategy<Value = Value> {
    prop_oneof![
        arb_scalar(),
        prop::collection::vec(arb_scalar(), 0..6).prop_map(Value::Array),
    ]
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(512))]

    #[test]
    fn format_then_parse_round_trips(value in arb_literal()) {
        let text = format_value(&value).expect("literals format to text");
        prop_assert_eq!(coerce(&text), value);
    }

    #[test]
    fn reevaluation_is_idempotent(a in -1000i32..1000, b in -1000i32..1000, flag in any::<bool>()) {
        let bots = vec![
            Bot::new("x").with_tag("a", a).with_tag("flag", flag),
            Bot::new("y")
                .with_tag("b", b)
                .with_tag("sum", "=getTag('x', '#a') + tags.b")
                .with_tag("pick", "=getTag('x', '#flag') ? tags.sum : -tags.sum")
                .with_tag("list", "[=tags.b * 2, 3, text]"),
        ];

        let mut first = PrecalculationManager::default();
        first.bots_added(bots.clone()).expect("add");
        let mut second = PrecalculationManager::default();
        second.bots_added(bots).expect("add");

        prop_assert_eq!(first.get_all_precalculated_state(), second.get_all_precalculated_state());

        // Rewriting a tag with the same raw value changes nothing.
        let same = Bot::new("x").with_tag("a", a).with_tag("flag", flag);
        let diff = first
            .bots_updated(vec![botcalc_core::BotUpdate::new(same, ["a", "flag"])])
            .expect("update");
        prop_assert!(diff.updated_bots.is_empty());
        prop_assert_eq!(first.get_all_precalculated_state(), second.get_all_precalculated_state());
    }
}
