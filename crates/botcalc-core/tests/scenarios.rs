//! End-to-end batches through the precalculation manager.
//!
//! Covers literal coercion, selector-driven recomputation on add/remove,
//! filter-tag matching, minimality of `updatedBots`, and error values.

use botcalc_core::config::RuntimeConfig;
use botcalc_core::dependency::Dependency;
use botcalc_core::filter::{FilterParse, parse_filter_tag};
use botcalc_core::{Assignment, Bot, BotStateDiff, BotUpdate, PrecalculationManager, StateUpdate, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn manager_with(bots: Vec<Bot>) -> PrecalculationManager {
    let mut manager = PrecalculationManager::default();
    manager.bots_added(bots).expect("initial add");
    manager
}

fn value<'m>(manager: &'m PrecalculationManager, id: &str, tag: &str) -> Option<&'m Value> {
    manager.bot(id).and_then(|bot| bot.value(tag))
}

fn update(manager: &mut PrecalculationManager, id: &str, tag: &str, raw: impl Into<Value>) -> StateUpdate {
    let space = manager.bot(id).and_then(|bot| bot.space.clone());
    let mut bot = Bot::new(id).with_tag(tag, raw);
    bot.space = space;
    manager
        .bots_updated(vec![BotUpdate::new(bot, [tag])])
        .expect("update")
}

fn move_to(manager: &mut PrecalculationManager, id: &str, space: &str) -> StateUpdate {
    manager
        .bots_updated(vec![BotUpdate::new(Bot::new(id).in_space(space), Vec::<String>::new())])
        .expect("move")
}

// ---------------------------------------------------------------------------
// Literals (A, B)
// ---------------------------------------------------------------------------

#[test]
fn scenario_a_literals_are_typed() {
    let manager = manager_with(vec![
        Bot::new("n").with_tag("num", "123.145"),
        Bot::new("t").with_tag("num", "true"),
        Bot::new("f").with_tag("num", "false"),
    ]);
    assert_eq!(value(&manager, "n", "num"), Some(&Value::Number(123.145)));
    assert_eq!(value(&manager, "t", "num"), Some(&Value::Bool(true)));
    assert_eq!(value(&manager, "f", "num"), Some(&Value::Bool(false)));
}

#[test]
fn scenario_b_arrays_split_on_every_comma() {
    let manager = manager_with(vec![Bot::new("a").with_tag("tag", "[test(a, b, c), 1.23, true]")]);
    assert_eq!(
        value(&manager, "a", "tag"),
        Some(&Value::Array(vec![
            "test(a".into(),
            "b".into(),
            "c)".into(),
            Value::Number(1.23),
            Value::Bool(true),
        ]))
    );
}

// ---------------------------------------------------------------------------
// Selector recomputation (C, D)
// ---------------------------------------------------------------------------

#[test]
fn scenario_c_and_d_added_and_removed_bots_reach_readers() {
    let mut manager = manager_with(vec![
        Bot::new("a").with_tag("formula", r##"=getBots("#name","bob").length"##),
    ]);
    assert_eq!(value(&manager, "a", "formula"), Some(&Value::Number(0.0)));

    let added = manager
        .bots_added(vec![Bot::new("b").with_tag("name", "bob")])
        .expect("add b");
    assert_eq!(added.added_bots, vec!["b"]);
    assert_eq!(added.updated_bots, vec!["a"]);
    assert_eq!(value(&manager, "a", "formula"), Some(&Value::Number(1.0)));
    assert!(matches!(added.state.get("b"), Some(BotStateDiff::Added(bot)) if bot.values["name"] == Value::from("bob")));
    assert_eq!(
        added.updated_values("a").and_then(|values| values.get("formula")),
        Some(&Value::Number(1.0))
    );

    let removed = manager.bots_removed(["b"]).expect("remove b");
    assert_eq!(removed.removed_bots, vec!["b"]);
    assert_eq!(removed.updated_bots, vec!["a"]);
    assert_eq!(removed.state.get("b"), Some(&BotStateDiff::Removed));
    assert_eq!(value(&manager, "a", "formula"), Some(&Value::Number(0.0)));
}

#[test]
fn value_selectors_ignore_other_values() {
    let mut manager = manager_with(vec![
        Bot::new("a").with_tag("formula", r##"=getBots("#name","bob").length"##),
    ]);
    let added = manager
        .bots_added(vec![Bot::new("c").with_tag("name", "alice")])
        .expect("add c");
    assert!(added.updated_bots.is_empty());
    assert!(!added.state.contains_key("a"));
}

#[test]
fn renaming_into_a_selector_updates_readers() {
    let mut manager = manager_with(vec![
        Bot::new("a").with_tag("count", r##"=getBots("#name","bob").length"##),
        Bot::new("b").with_tag("name", "alice"),
    ]);
    let diff = update(&mut manager, "b", "name", "bob");
    assert_eq!(diff.updated_bots, vec!["b", "a"]);
    assert_eq!(value(&manager, "a", "count"), Some(&Value::Number(1.0)));

    let diff = update(&mut manager, "b", "name", "carol");
    assert_eq!(diff.updated_bots, vec!["b", "a"]);
    assert_eq!(value(&manager, "a", "count"), Some(&Value::Number(0.0)));
}

#[test]
fn reading_a_missing_bot_picks_it_up_when_added() {
    let mut manager = manager_with(vec![Bot::new("a").with_tag("f", "=getTag('b', '#x')")]);
    assert_eq!(value(&manager, "a", "f"), None);
    assert_eq!(manager.dependencies_of("a", "f"), Some(&[Dependency::bot_tag("b", "x")][..]));

    let added = manager
        .bots_added(vec![Bot::new("b").with_tag("x", 5)])
        .expect("add b");
    assert_eq!(added.updated_bots, vec!["a"]);
    assert_eq!(value(&manager, "a", "f"), Some(&Value::Number(5.0)));
}

// ---------------------------------------------------------------------------
// Spaces
// ---------------------------------------------------------------------------

#[test]
fn bot_references_follow_a_space_change() {
    let mut manager = manager_with(vec![
        Bot::new("a")
            .with_tag("ref", "=getBot('#name', 'bob')")
            .with_tag("where", "=this.space"),
        Bot::new("b").with_tag("name", "bob"),
    ]);
    let Some(Value::Object(before)) = value(&manager, "a", "ref") else {
        panic!("expected bot object");
    };
    assert_eq!(before.get("space"), None);

    let diff = move_to(&mut manager, "b", "tempLocal");
    assert_eq!(diff.updated_bots, vec!["a"]);
    let Some(Value::Object(after)) = value(&manager, "a", "ref") else {
        panic!("expected bot object");
    };
    assert_eq!(after.get("id"), Some(&Value::from("b")));
    assert_eq!(after.get("space"), Some(&Value::from("tempLocal")));
    assert_eq!(value(&manager, "a", "where"), None);

    let diff = move_to(&mut manager, "a", "shared");
    assert_eq!(diff.updated_bots, vec!["a"]);
    assert_eq!(value(&manager, "a", "where"), Some(&Value::from("shared")));
}

#[test]
fn space_queries_see_bots_move_in_and_out() {
    let mut manager = manager_with(vec![
        Bot::new("a").with_tag("count", "=getBots(inSpace('tmp')).length"),
        Bot::new("b").with_tag("name", "bob"),
    ]);
    assert_eq!(value(&manager, "a", "count"), Some(&Value::Number(0.0)));

    let diff = move_to(&mut manager, "b", "tmp");
    assert_eq!(diff.updated_bots, vec!["a"]);
    assert_eq!(value(&manager, "a", "count"), Some(&Value::Number(1.0)));

    let diff = move_to(&mut manager, "b", "shared");
    assert_eq!(diff.updated_bots, vec!["a"]);
    assert_eq!(value(&manager, "a", "count"), Some(&Value::Number(0.0)));
}

// ---------------------------------------------------------------------------
// Filter tags (E, F)
// ---------------------------------------------------------------------------

#[test]
fn scenario_e_filter_matches_exact_value_only() {
    let manager = manager_with(vec![
        Bot::new("joe").with_tag("name", "Joe"),
        Bot::new("lower").with_tag("name", "joe"),
        Bot::new("other").with_tag("name", "Bob"),
    ]);
    assert!(manager.tag_matches_filter(r#"+(#name:"Joe")"#, "joe", "+"));
    assert!(!manager.tag_matches_filter(r#"+(#name:"Joe")"#, "lower", "+"));
    assert!(!manager.tag_matches_filter(r#"+(#name:"Joe")"#, "other", "+"));
    assert!(!manager.tag_matches_filter(r#"+(#name:"Joe")"#, "joe", "-"));
}

#[test]
fn scenario_f_unterminated_filter_still_parses() {
    let FilterParse::Complete(parsed) = parse_filter_tag(r#"+ ( # lal alal : "abc"#) else {
        panic!("expected complete parse");
    };
    assert_eq!(parsed.event_name, "+");
    assert_eq!(parsed.filter.tag, "lal alal");
    assert_eq!(parsed.filter.value, Value::from("abc"));
}

#[test]
fn filters_on_one_bot_match_another() {
    let manager = manager_with(vec![
        Bot::new("subject")
            .with_tag(r#"onCombine(#color:"red")"#, "=1")
            .with_tag(r#"onCombine(#color:"blue")"#, "=2")
            .with_tag("label", "x"),
        Bot::new("red").with_tag("color", "red"),
    ]);
    assert_eq!(
        manager.tags_matching_filter("subject", "red", "onCombine"),
        vec![r#"onCombine(#color:"red")"#.to_string()]
    );
    assert_eq!(manager.filters_matching_arguments("subject", "onCombine").len(), 2);
    assert!(manager.filters_matching_arguments("subject", "onDrop").is_empty());
}

// ---------------------------------------------------------------------------
// Minimality and mutual dependents
// ---------------------------------------------------------------------------

#[test]
fn unrelated_bots_never_appear_in_updated_bots() {
    let mut manager = manager_with(vec![
        Bot::new("reader").with_tag("x", "=getTag('src', '#v') + 1"),
        Bot::new("src").with_tag("v", 1),
        Bot::new("bystander").with_tag("y", "=getTag('elsewhere', '#v')"),
        Bot::new("elsewhere").with_tag("v", 10),
        Bot::new("counter").with_tag("n", "=getBots('#other').length"),
    ]);
    let diff = update(&mut manager, "src", "v", 2);
    assert_eq!(diff.updated_bots, vec!["src", "reader"]);
    assert!(!diff.state.contains_key("bystander"));
    assert!(!diff.state.contains_key("counter"));
}

#[test]
fn removing_mutual_dependents_together() {
    let mut manager = manager_with(vec![
        Bot::new("p").with_tag("v", "=getTag('q', '#v')"),
        Bot::new("q").with_tag("v", "=getTag('p', '#v')"),
        Bot::new("watcher").with_tag("n", "=getBots('#v').length"),
    ]);
    assert_eq!(value(&manager, "watcher", "n"), Some(&Value::Number(2.0)));

    let diff = manager.bots_removed(["p", "q", "p"]).expect("remove");
    assert_eq!(diff.removed_bots, vec!["p", "q"]);
    assert_eq!(diff.updated_bots, vec!["watcher"]);
    assert_eq!(value(&manager, "watcher", "n"), Some(&Value::Number(0.0)));
    assert_eq!(manager.tracker_stats().nodes, 1);
}

#[test]
fn transitive_chain_recomputes_in_discovery_order() {
    let mut manager = manager_with(vec![
        Bot::new("root").with_tag("v", 1),
        Bot::new("mid").with_tag("v", "=getTag('root', '#v') * 2"),
        Bot::new("leaf").with_tag("v", "=getTag('mid', '#v') * 2"),
    ]);
    let diff = update(&mut manager, "root", "v", 3);
    assert_eq!(diff.updated_bots, vec!["root", "mid", "leaf"]);
    assert_eq!(value(&manager, "leaf", "v"), Some(&Value::Number(12.0)));
}

// ---------------------------------------------------------------------------
// Errors and assignments
// ---------------------------------------------------------------------------

#[test]
fn failing_formula_leaves_other_tags_intact() {
    let manager = manager_with(vec![
        Bot::new("a")
            .with_tag("bad", "=nope()")
            .with_tag("broken", "=1 +")
            .with_tag("good", "=1 + 1"),
    ]);
    assert_eq!(
        value(&manager, "a", "bad"),
        Some(&Value::from("ReferenceError: nope is not defined"))
    );
    assert_eq!(value(&manager, "a", "broken"), Some(&Value::from("=1 +")));
    assert_eq!(value(&manager, "a", "good"), Some(&Value::Number(2.0)));
}

#[test]
fn cycles_surface_as_values() {
    let manager = manager_with(vec![
        Bot::new("a").with_tag("x", "=getTag('b', '#x')"),
        Bot::new("b").with_tag("x", "=getTag('a', '#x')"),
    ]);
    let expected = Value::from("CycleError: Circular dependency detected");
    assert_eq!(value(&manager, "a", "x"), Some(&expected));
    assert_eq!(value(&manager, "b", "x"), Some(&expected));
}

#[test]
fn assignment_rewrite_appears_in_diff() {
    let mut manager = manager_with(vec![Bot::new("a").with_tag("base", 21)]);
    let diff = update(&mut manager, "a", "double", Assignment::new(":=getTag('a', '#base') * 2"));
    let Some(BotStateDiff::Updated(partial)) = diff.state.get("a") else {
        panic!("expected partial diff for a");
    };
    let Some(Value::Assignment(stored)) = partial.tags.get("double") else {
        panic!("expected rewritten assignment in diff");
    };
    assert!(stored.is_resolved());
    assert_eq!(partial.values.get("double"), Some(&Value::Number(42.0)));
}

#[test]
fn accessor_writes_feed_recomputation() {
    let mut manager = manager_with(vec![
        Bot::new("a").with_tag("x", 1),
        Bot::new("b").with_tag("y", "=getTag('a', '#x') + 1"),
    ]);
    {
        let mut accessor = manager.accessor("a").expect("accessor");
        assert_eq!(accessor.get("x"), Some(&Value::Number(1.0)));
        let diff = accessor.set("x", 5).expect("set");
        assert_eq!(diff.updated_bots, vec!["a", "b"]);
        assert_eq!(accessor.raw("x"), Some(&Value::Number(5.0)));
    }
    assert_eq!(value(&manager, "b", "y"), Some(&Value::Number(6.0)));

    let mut accessor = manager.accessor("a").expect("accessor");
    accessor.delete("x").expect("delete");
    assert!(accessor.get("x").is_none());
    assert!(accessor.tag_names().is_empty());
    assert!(manager.accessor("missing").is_none());
}

#[test]
fn logging_formula_errors_does_not_change_the_diff() {
    fn batches(log_formula_errors: bool) -> (StateUpdate, StateUpdate) {
        let mut manager = PrecalculationManager::new(RuntimeConfig {
            log_formula_errors,
            ..RuntimeConfig::default()
        });
        let added = manager
            .bots_added(vec![
                Bot::new("a").with_tag("bad", "=nope()").with_tag("ok", "=1 + 1"),
                Bot::new("b").with_tag("copy", "=getTag('a', '#bad')"),
            ])
            .expect("add");
        let updated = update(&mut manager, "a", "bad", "=null.x");
        (added, updated)
    }

    let quiet = batches(false);
    let logged = batches(true);
    assert_eq!(quiet, logged);
    assert_eq!(
        serde_json::to_vec(&quiet.1).expect("json"),
        serde_json::to_vec(&logged.1).expect("json")
    );
    assert_eq!(quiet.1.updated_bots, vec!["a", "b"]);
}

#[test]
fn nested_reads_run_under_their_own_step_budget() {
    let mut bots: Vec<Bot> = (0..12)
        .map(|idx| Bot::new(format!("b{idx}")).with_tag("v", format!("=getTag('b{}', '#v') + 1", idx + 1)))
        .collect();
    bots.push(Bot::new("b12").with_tag("v", 0));

    let mut manager = PrecalculationManager::new(RuntimeConfig {
        max_steps: 30,
        ..RuntimeConfig::default()
    });
    manager.bots_added(bots).expect("add chain");
    assert_eq!(value(&manager, "b0", "v"), Some(&Value::Number(12.0)));
    assert_eq!(value(&manager, "b11", "v"), Some(&Value::Number(1.0)));
}
