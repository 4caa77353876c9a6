use super::*;
use crate::translate::Translator;
use rand::Rng;

fn bound(sql: &str, values: Vec<TypedValue>) -> TranslationResult {
    Translator::default().translate(sql, &[]).unwrap().bind(&values).unwrap()
}

fn random_vector(n: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn bracketed(v: &[f32]) -> String {
    format!("[{}]", v.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(","))
}

#[test]
fn prepared_distance_scenario_inlines_128_components() {
    let v = random_vector(128);
    let input = bound("SELECT id FROM docs ORDER BY distance(embedding, $1) LIMIT 5", vec![TypedValue::Text(bracketed(&v))]);
    let out = VectorQueryOptimizer::default().optimize(&input);
    assert!(out.params.is_empty());
    assert!(out.param_order.is_empty());
    assert!(out.sql.starts_with("SELECT id FROM docs ORDER BY VECTOR_COSINE(embedding, TO_VECTOR('["));
    assert!(out.sql.ends_with("]', FLOAT)) DESC LIMIT 5"));
    let literal = &out.sql[out.sql.find("'[").unwrap() + 2..out.sql.find("]'").unwrap()];
    assert_eq!(literal.split(',').count(), 128);
    // translator output is left alone
    assert_eq!(input.params.len(), 1);
}

#[test]
fn encodings_produce_identical_literals() {
    let v = random_vector(16);
    let text = bracketed(&v);
    let delimited = text.trim_start_matches('[').trim_end_matches(']').to_string();
    let compact = encode_compact(&v);
    let opt = VectorQueryOptimizer::default();
    let sql = "SELECT id FROM docs ORDER BY embedding <=> $1 LIMIT 3";
    let outs: Vec<String> = [text, delimited, compact]
        .into_iter()
        .map(|p| opt.optimize(&bound(sql, vec![TypedValue::Text(p)])).sql)
        .collect();
    assert_eq!(outs[0], outs[1]);
    assert_eq!(outs[0], outs[2]);
    assert!(outs[0].contains(&bracketed(&v)));
}

#[test]
fn middle_parameter_removal_keeps_neighbours_in_order() {
    let input = bound(
        "SELECT id FROM docs WHERE owner = $1 ORDER BY embedding <-> $2 LIMIT $3",
        vec![TypedValue::text("ann"), TypedValue::text("[1,2,3]"), TypedValue::Int(7)],
    );
    let out = VectorQueryOptimizer::default().optimize(&input);
    assert_eq!(out.params, vec![TypedValue::text("ann"), TypedValue::Int(7)]);
    assert_eq!(out.param_order, vec![0, 2]);
    assert_eq!(
        out.sql,
        "SELECT id FROM docs WHERE owner = ? ORDER BY VECTOR_L2(embedding, TO_VECTOR('[1,2,3]', FLOAT)) LIMIT ?"
    );
}

#[test]
fn oversized_literal_stays_bound_but_normalized() {
    let v = random_vector(1024);
    let compact = encode_compact(&v);
    let input = bound("SELECT id FROM docs ORDER BY embedding <=> $1 LIMIT 5", vec![TypedValue::Text(compact)]);
    let out = VectorQueryOptimizer::default().optimize(&input);
    assert_eq!(out.sql, input.sql);
    assert_eq!(out.params.len(), 1);
    assert_eq!(out.params[0], TypedValue::Text(bracketed(&v)));
}

#[test]
fn dimension_mismatch_skips_only_that_occurrence() {
    let input = bound(
        "SELECT id FROM docs WHERE embedding <-> $1::vector(4) < 1 ORDER BY embedding <=> $2 LIMIT 1",
        vec![TypedValue::text("[1,2,3]"), TypedValue::text("[1,0]")],
    );
    let out = VectorQueryOptimizer::default().optimize(&input);
    assert_eq!(out.params, vec![TypedValue::text("[1,2,3]")]);
    assert!(out.sql.contains("VECTOR_L2(embedding, TO_VECTOR(?, FLOAT))"));
    assert!(out.sql.contains("VECTOR_COSINE(embedding, TO_VECTOR('[1,0]', FLOAT)) DESC"));
}

#[test]
fn undecodable_value_is_left_alone() {
    let input = bound("SELECT id FROM docs ORDER BY embedding <=> $1 LIMIT 5", vec![TypedValue::text("not a vector")]);
    let out = VectorQueryOptimizer::default().optimize(&input);
    assert_eq!(out, input);
}

#[test]
fn bracketless_literal_gets_brackets() {
    let input = bound("SELECT VECTOR_COSINE(e, TO_VECTOR('1, 2,3', FLOAT)) FROM t", vec![]);
    let out = VectorQueryOptimizer::default().optimize(&input);
    assert_eq!(out.sql, "SELECT VECTOR_COSINE(e, TO_VECTOR('[1,2,3]', FLOAT)) FROM t");
}

#[test]
fn question_marks_in_literals_are_not_counted() {
    let input = bound(
        "SELECT id FROM docs WHERE note <> '?' AND tag = $1 ORDER BY embedding <=> $2 LIMIT 1",
        vec![TypedValue::text("x"), TypedValue::text("[0.5,0.25]")],
    );
    let out = VectorQueryOptimizer::default().optimize(&input);
    assert_eq!(out.params, vec![TypedValue::text("x")]);
    assert!(out.sql.contains("note <> '?'"));
    assert!(out.sql.contains("TO_VECTOR('[0.5,0.25]', FLOAT)"));
}

#[test]
fn metrics_are_recorded_per_call() {
    let opt = VectorQueryOptimizer::new(MAX_LITERAL_SIZE_BYTES, 1000.0);
    let input = bound("SELECT id FROM docs ORDER BY embedding <=> $1 LIMIT 5", vec![TypedValue::text("[1,2]")]);
    opt.optimize(&input);
    opt.optimize(&input);
    let recent = opt.recent();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].vectors_found, 1);
    assert_eq!(recent[0].vectors_transformed, 1);
    assert_eq!(recent[0].params_before, 1);
    assert_eq!(recent[0].params_after, 0);
    let stats = opt.stats();
    assert_eq!(stats.total_calls, 2);
    assert_eq!(stats.compliance_rate, 100.0);
}

#[test]
fn vector_first_calls_are_inlined_too() {
    let input = bound(
        "SELECT id FROM docs WHERE owner = $1 ORDER BY $2 <=> embedding LIMIT $3",
        vec![TypedValue::text("ann"), TypedValue::text("1,2,3"), TypedValue::Int(4)],
    );
    let out = VectorQueryOptimizer::default().optimize(&input);
    assert_eq!(out.params, vec![TypedValue::text("ann"), TypedValue::Int(4)]);
    assert_eq!(
        out.sql,
        "SELECT id FROM docs WHERE owner = ? ORDER BY VECTOR_COSINE(TO_VECTOR('[1,2,3]', FLOAT), embedding) DESC LIMIT ?"
    );

    let input = bound("SELECT cosine_distance($1, embedding) AS d FROM docs", vec![TypedValue::text("[0.5,0.25]")]);
    let out = VectorQueryOptimizer::default().optimize(&input);
    assert!(out.params.is_empty());
    assert!(out.sql.contains("VECTOR_COSINE(TO_VECTOR('[0.5,0.25]', FLOAT), embedding)"), "{}", out.sql);
}

#[test]
fn budget_violations_are_counted_but_never_change_the_result() {
    let v = random_vector(1536);
    let input = bound("SELECT id FROM docs ORDER BY embedding <=> $1 LIMIT 10", vec![TypedValue::Text(encode_compact(&v))]);

    let strict = VectorQueryOptimizer::new(MAX_LITERAL_SIZE_BYTES, 0.0);
    let relaxed = VectorQueryOptimizer::new(MAX_LITERAL_SIZE_BYTES, 1000.0);
    let out = strict.optimize(&input);
    let expected = relaxed.optimize(&input);
    assert_eq!(out.sql, expected.sql);
    assert_eq!(out.params, expected.params);
    // too large to inline, but the bound value was still normalized
    assert_eq!(out.params, vec![TypedValue::Text(bracketed(&v))]);

    strict.optimize(&input);
    let recent = strict.recent();
    assert!(recent.iter().all(|m| !m.within_budget));
    assert_eq!(recent[0].vectors_found, 1);
    let stats = strict.stats();
    assert_eq!(stats.total_calls, 2);
    assert_eq!(stats.total_violations, 2);
    assert_eq!(stats.compliance_rate, 0.0);
    assert_eq!(stats.budget_ms, 0.0);
    assert_eq!(relaxed.stats().total_violations, 0);
}
