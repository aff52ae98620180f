//! Model-level optimizer checks.
//!
//! A small reference evaluator runs pipelines over an in-memory
//! collection; the optimizer must preserve the result multiset (field
//! ordering aside) and be idempotent.

use mangrove::core::{Data, FieldPath, Leaf};
use mangrove::query::plan::pipeline::{
    Condition, Expression, IdHandling, Reshape, Selector, ShapeValue, Workflow,
};
use mangrove::query::{optimize, Optimizer};
use proptest::prelude::*;
use serde_json::{json, Value as Json};

// ========== Reference evaluator ==========

fn eval_pipeline(workflow: &Workflow, input: &[Json]) -> Vec<Json> {
    match workflow {
        Workflow::Read { .. } => input.to_vec(),
        Workflow::Project { source, shape, .. } => eval_pipeline(source, input)
            .iter()
            .map(|doc| eval_reshape(shape, doc))
            .collect(),
        Workflow::Match { source, selector } => eval_pipeline(source, input)
            .into_iter()
            .filter(|doc| eval_selector(selector, doc))
            .collect(),
        Workflow::Skip { source, count } => {
            let docs = eval_pipeline(source, input);
            docs.into_iter().skip(usize::try_from(*count).unwrap()).collect()
        }
        Workflow::Limit { source, count } => {
            let docs = eval_pipeline(source, input);
            docs.into_iter().take(usize::try_from(*count).unwrap()).collect()
        }
        other => panic!("evaluator does not model {}", other.stage_name()),
    }
}

fn eval_reshape(shape: &Reshape, doc: &Json) -> Json {
    eval_reshape_at(shape, &[], doc)
}

fn eval_reshape_at(shape: &Reshape, prefix: &[Leaf], doc: &Json) -> Json {
    let mut out = serde_json::Map::new();
    for (key, value) in shape.iter() {
        let mut source_path = prefix.to_vec();
        source_path.push(key.clone());
        let evaluated = match value {
            ShapeValue::Doc(nested) => Some(eval_reshape_at(nested, &source_path, doc)),
            ShapeValue::Expr(Expression::Include) => lookup(doc, &source_path).cloned(),
            ShapeValue::Expr(e) => eval_expr(e, doc),
        };
        if let Some(evaluated) = evaluated {
            out.insert(key.to_string(), evaluated);
        }
    }
    Json::Object(out)
}

fn eval_expr(expr: &Expression, doc: &Json) -> Option<Json> {
    match expr {
        Expression::Var(var) => {
            let path = var.path.as_ref()?;
            lookup(doc, path.leaves()).cloned()
        }
        Expression::Literal(d) => Some(d.to_json()),
        other => panic!("evaluator does not model expression {other}"),
    }
}

fn eval_selector(selector: &Selector, doc: &Json) -> bool {
    match selector {
        Selector::And(clauses) => clauses.iter().all(|c| eval_selector(c, doc)),
        Selector::Or(clauses) => clauses.iter().any(|c| eval_selector(c, doc)),
        Selector::Doc(fields) => fields.iter().all(|(path, cond)| {
            let value = lookup(doc, path.leaves());
            eval_condition(cond, value)
        }),
    }
}

fn eval_condition(cond: &Condition, value: Option<&Json>) -> bool {
    let Some(value) = value else {
        return false;
    };
    let num = |j: &Json| j.as_f64();
    match cond {
        Condition::Eq(d) => *value == d.to_json(),
        Condition::Neq(d) => *value != d.to_json(),
        Condition::Gt(d) => matches!((num(value), num(&d.to_json())), (Some(a), Some(b)) if a > b),
        Condition::Gte(d) => {
            matches!((num(value), num(&d.to_json())), (Some(a), Some(b)) if a >= b)
        }
        Condition::Lt(d) => matches!((num(value), num(&d.to_json())), (Some(a), Some(b)) if a < b),
        Condition::Lte(d) => {
            matches!((num(value), num(&d.to_json())), (Some(a), Some(b)) if a <= b)
        }
        Condition::In(items) => items.iter().any(|d| *value == d.to_json()),
        Condition::Exists(yes) => *yes,
        Condition::Regex(_) => false,
    }
}

fn lookup<'a>(doc: &'a Json, path: &[Leaf]) -> Option<&'a Json> {
    let mut cursor = doc;
    for leaf in path {
        cursor = match leaf {
            Leaf::Name(name) => cursor.get(name)?,
            Leaf::Index(i) => cursor.get(usize::try_from(*i).ok()?)?,
        };
    }
    Some(cursor)
}

/// Multiset comparison, insensitive to field order.
fn same_documents(mut a: Vec<Json>, mut b: Vec<Json>) -> bool {
    let key = |j: &Json| normalize(j).to_string();
    a.sort_by_key(key);
    b.sort_by_key(key);
    a.iter().map(&key).eq(b.iter().map(&key))
}

fn normalize(j: &Json) -> Json {
    match j {
        Json::Object(fields) => {
            let mut sorted: Vec<(&String, &Json)> = fields.iter().collect();
            sorted.sort_by_key(|(k, _)| k.as_str());
            Json::Object(sorted.into_iter().map(|(k, v)| (k.clone(), normalize(v))).collect())
        }
        Json::Array(items) => Json::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

// ========== Fixtures ==========

fn collection() -> Vec<Json> {
    (0..12)
        .map(|i| {
            json!({
                "a": i,
                "b": i % 3,
                "c": format!("doc{i}"),
            })
        })
        .collect()
}

// Shapes always produce all three fields, so every downstream stage sees
// the fields it references.
fn arb_shape() -> impl Strategy<Value = Reshape> {
    let value = || {
        prop_oneof![
            Just(ShapeValue::include()),
            Just(ShapeValue::var("a")),
            Just(ShapeValue::var("b")),
            Just(ShapeValue::var("c")),
            Just(ShapeValue::Expr(Expression::literal(42i64))),
        ]
    };
    (value(), value(), value()).prop_map(|(a, b, c)| {
        Reshape::new().with("a", a).with("b", b).with("c", c)
    })
}

fn arb_selector() -> impl Strategy<Value = Selector> {
    let field = prop_oneof![Just("a"), Just("b")];
    let cond = (0i64..6).prop_flat_map(|n| {
        prop_oneof![
            Just(Condition::Eq(Data::int(n))),
            Just(Condition::Gt(Data::int(n))),
            Just(Condition::Lte(Data::int(n))),
        ]
    });
    (field, cond).prop_map(|(field, cond)| Selector::doc([(FieldPath::name(field), cond)]))
}

fn arb_workflow() -> impl Strategy<Value = Workflow> {
    let leaf = Just(Workflow::read("docs"));
    leaf.prop_recursive(5, 20, 2, |inner| {
        prop_oneof![
            (inner.clone(), arb_shape()).prop_map(|(w, shape)| Workflow::Project {
                source: Box::new(w),
                shape,
                id: IdHandling::Ignore,
            }),
            (inner.clone(), arb_selector()).prop_map(|(w, selector)| Workflow::Match {
                source: Box::new(w),
                selector,
            }),
            (inner.clone(), 0u64..6).prop_map(|(w, count)| Workflow::Skip {
                source: Box::new(w),
                count,
            }),
            (inner, 1u64..8).prop_map(|(w, count)| Workflow::Limit {
                source: Box::new(w),
                count,
            }),
        ]
    })
}

// ========== Tests ==========

#[test]
fn match_pushdown_scenario_preserves_results() {
    // [$match, $project {a: $x, b: $y}, $match {a: 1}] over documents with
    // x/y source fields.
    let input: Vec<Json> =
        (0..8).map(|i| json!({ "x": i % 2, "y": i, "state": "MA" })).collect();

    let wf = Workflow::Match {
        source: Box::new(Workflow::Project {
            source: Box::new(Workflow::Match {
                source: Box::new(Workflow::read("docs")),
                selector: Selector::eq(FieldPath::name("state"), "MA"),
            }),
            shape: Reshape::new()
                .with("a", ShapeValue::var("x"))
                .with("b", ShapeValue::var("y")),
            id: IdHandling::Ignore,
        }),
        selector: Selector::eq(FieldPath::name("a"), 1i64),
    };

    let optimized = Optimizer::new().without_delete_unused_fields().optimize(wf.clone());
    assert!(same_documents(eval_pipeline(&wf, &input), eval_pipeline(&optimized, &input)));
}

#[test]
fn project_pair_scenario_preserves_results() {
    let input = collection();
    let wf = Workflow::Project {
        source: Box::new(Workflow::Project {
            source: Box::new(Workflow::read("docs")),
            shape: Reshape::new()
                .with("a", ShapeValue::include())
                .with("b", ShapeValue::include())
                .with("c", ShapeValue::include()),
            id: IdHandling::Ignore,
        }),
        shape: Reshape::new()
            .with("a", ShapeValue::var("a"))
            .with("b", ShapeValue::var("b"))
            .with("c", ShapeValue::var("c")),
        id: IdHandling::Ignore,
    };

    let optimized = optimize(wf.clone());
    assert!(same_documents(eval_pipeline(&wf, &input), eval_pipeline(&optimized, &input)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn optimization_preserves_the_result_multiset(wf in arb_workflow()) {
        let input = collection();
        let optimized = optimize(wf.clone());
        let before = eval_pipeline(&wf, &input);
        let after = eval_pipeline(&optimized, &input);
        prop_assert!(
            same_documents(before.clone(), after.clone()),
            "pipelines disagree:\n{wf}\nvs\n{optimized}\n{before:?}\n{after:?}"
        );
    }

    #[test]
    fn optimization_is_idempotent(wf in arb_workflow()) {
        let once = optimize(wf);
        let twice = optimize(once.clone());
        prop_assert_eq!(once, twice);
    }
}
