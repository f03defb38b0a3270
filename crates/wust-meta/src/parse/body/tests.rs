use crate::{Engine, FuncIdx, MarkerStream, MetaKind, parse_module};

use MetaKind::*;

fn collect(wat: &str) -> Vec<MarkerStream<usize>> {
    let bytes = wat::parse_str(wat).unwrap();
    parse_module(&Engine::default(), &bytes)
        .unwrap()
        .into_iter()
        .map(|func| func.stream)
        .collect()
}

fn collect_first(wat: &str) -> MarkerStream<usize> {
    collect(wat).remove(0)
}

fn kinds(stream: &MarkerStream<usize>) -> Vec<MetaKind> {
    stream.iter().map(|(_, meta)| meta.kind()).collect()
}

/// (target, implicit pops) of every branch, in stream order.
fn branches(stream: &MarkerStream<usize>) -> Vec<(Option<usize>, Option<u32>)> {
    stream
        .iter()
        .filter_map(|(_, meta)| meta.as_br())
        .map(|br| (br.target, br.implicit_pops))
        .collect()
}

fn location_of(stream: &MarkerStream<usize>, kind: MetaKind, nth: usize) -> usize {
    stream
        .iter()
        .filter(|(_, meta)| meta.kind() == kind)
        .nth(nth)
        .map(|(_, meta)| meta.location)
        .unwrap()
}

#[test]
fn body_is_wrapped_in_implicit_block() {
    let mut stream = collect_first(
        r#"
        (module
            (func
                br 0
            )
        )
    "#,
    );
    assert_eq!(kinds(&stream), [BeginBlock, Br, End]);

    stream.resolve().unwrap();
    let func_end = location_of(&stream, End, 0);
    assert_eq!(branches(&stream), [(Some(func_end), Some(0))]);
}

#[test]
fn br_if_pops_condition_before_branch() {
    let mut stream = collect_first(
        r#"
        (module
            (func (param i32) (result i32)
                (loop $l
                    local.get 0
                    br_if $l
                )
                i32.const 1
            )
        )
    "#,
    );
    assert_eq!(
        kinds(&stream),
        [BeginBlock, BeginLoop, Push, Pop, Br, End, Push, End]
    );

    stream.resolve().unwrap();
    let loop_start = location_of(&stream, BeginLoop, 0);
    assert_eq!(branches(&stream), [(Some(loop_start), Some(0))]);
}

#[test]
fn loop_back_edge_counts_leftover_values() {
    let mut stream = collect_first(
        r#"
        (module
            (func (param i32)
                (loop $l
                    i32.const 1
                    local.get 0
                    br_if $l
                    drop
                )
            )
        )
    "#,
    );
    assert_eq!(
        kinds(&stream),
        [BeginBlock, BeginLoop, Push, Push, Pop, Br, Pop, End, End]
    );

    stream.resolve().unwrap();
    let loop_start = location_of(&stream, BeginLoop, 0);
    assert_eq!(branches(&stream), [(Some(loop_start), Some(1))]);
}

#[test]
fn else_arm_starts_from_block_params() {
    let mut stream = collect_first(
        r#"
        (module
            (func (param i32) (result i32)
                local.get 0
                (if (result i32)
                    (then i32.const 1)
                    (else i32.const 2)
                )
            )
        )
    "#,
    );
    assert_eq!(
        kinds(&stream),
        [BeginBlock, Push, Pop, If, Push, Else, Pop, Push, End, End]
    );

    stream.resolve().unwrap();
    let if_id = stream.iter().find(|(_, m)| m.kind() == If).unwrap().0;
    let else_id = stream.iter().find(|(_, m)| m.kind() == Else).unwrap().0;
    assert_eq!(stream[if_id].as_if().unwrap().else_ref, Some(else_id));
    assert_eq!(stream[else_id].as_else().unwrap().if_ref, Some(if_id));
}

#[test]
fn dead_code_never_pops_below_its_block() {
    let mut stream = collect_first(
        r#"
        (module
            (func (result i32)
                (block $b (result i32)
                    i32.const 1
                    br $b
                    i32.add
                )
            )
        )
    "#,
    );
    // `i32.add` only sees the one value of its own block.
    assert_eq!(
        kinds(&stream),
        [BeginBlock, BeginBlock, Push, Br, Pop, Push, End, End]
    );

    stream.resolve().unwrap();
    let block_end = location_of(&stream, End, 0);
    assert_eq!(branches(&stream), [(Some(block_end), Some(0))]);
}

#[test]
fn dead_branch_to_loop_supplies_loop_params() {
    let mut stream = collect_first(
        r#"
        (module
            (func (param i32)
                local.get 0
                (loop (param i32)
                    br 0
                    drop
                    br 0
                )
            )
        )
    "#,
    );
    // The second `br` runs on a polymorphic stack; a placeholder stands in
    // for the loop param that `drop` took.
    assert_eq!(
        kinds(&stream),
        [BeginBlock, Push, BeginLoop, Br, Pop, Push, Br, Pop, End, End]
    );

    stream.resolve().unwrap();
    let loop_start = location_of(&stream, BeginLoop, 0);
    assert_eq!(
        branches(&stream),
        [(Some(loop_start), Some(0)), (Some(loop_start), Some(0))]
    );
}

#[test]
fn branch_after_unreachable_supplies_loop_params() {
    let mut stream = collect_first(
        r#"
        (module
            (func (param i32)
                local.get 0
                (loop (param i32)
                    unreachable
                    drop
                    br 0
                )
            )
        )
    "#,
    );
    assert_eq!(
        kinds(&stream),
        [BeginBlock, Push, BeginLoop, Pop, Push, Br, Pop, End, End]
    );

    stream.resolve().unwrap();
    let loop_start = location_of(&stream, BeginLoop, 0);
    assert_eq!(branches(&stream), [(Some(loop_start), Some(0))]);
}

#[test]
fn dead_br_if_to_loop_supplies_loop_params() {
    let mut stream = collect_first(
        r#"
        (module
            (func (param i32)
                local.get 0
                (loop (param i32)
                    unreachable
                    drop
                    i32.const 0
                    br_if 0
                    drop
                )
            )
        )
    "#,
    );
    assert_eq!(
        kinds(&stream),
        [BeginBlock, Push, BeginLoop, Pop, Push, Pop, Push, Br, Pop, End, End]
    );

    stream.resolve().unwrap();
    let loop_start = location_of(&stream, BeginLoop, 0);
    assert_eq!(branches(&stream), [(Some(loop_start), Some(0))]);
}

#[test]
fn return_unwinds_values_below_the_result() {
    let mut stream = collect_first(
        r#"
        (module
            (func (result i32)
                i32.const 1
                (block
                    i32.const 2
                    return
                )
            )
        )
    "#,
    );
    assert_eq!(
        kinds(&stream),
        [BeginBlock, Push, BeginBlock, Push, Pop, Return, Push, End, End]
    );

    stream.resolve().unwrap();
    let ret = stream
        .iter()
        .find_map(|(_, meta)| meta.as_return())
        .unwrap();
    assert_eq!(ret.returns_val, Some(true));
}

#[test]
fn br_table_emits_one_branch_per_label() {
    let mut stream = collect_first(
        r#"
        (module
            (func (param i32)
                (block $a
                    (block $b
                        local.get 0
                        br_table $a $b $a
                    )
                )
            )
        )
    "#,
    );
    assert_eq!(
        kinds(&stream),
        [BeginBlock, BeginBlock, BeginBlock, Push, Pop, Br, Br, Br, End, End, End]
    );

    stream.resolve().unwrap();
    let end_b = Some(location_of(&stream, End, 0));
    let end_a = Some(location_of(&stream, End, 1));
    assert_eq!(
        branches(&stream),
        [(end_a, Some(0)), (end_b, Some(0)), (end_a, Some(0))]
    );
}

#[test]
fn calls_use_callee_arity() {
    let funcs = collect(
        r#"
        (module
            (import "env" "log" (func $log (param i32)))
            (func $add (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add
            )
            (func
                i32.const 1
                i32.const 2
                call $add
                call $log
            )
        )
    "#,
    );
    assert_eq!(funcs.len(), 2);
    assert_eq!(
        kinds(&funcs[1]),
        [BeginBlock, Push, Push, Pop, Pop, Push, Pop, End]
    );
}

#[test]
fn defined_functions_are_numbered_after_imports() {
    let bytes = wat::parse_str(
        r#"
        (module
            (import "env" "a" (func))
            (import "env" "b" (func))
            (func)
            (func)
        )
    "#,
    )
    .unwrap();
    let funcs = parse_module(&Engine::default(), &bytes).unwrap();
    let indices: Vec<_> = funcs.iter().map(|func| func.func_idx).collect();
    assert_eq!(indices, [FuncIdx(2), FuncIdx(3)]);
}

#[test]
fn unsupported_operator_is_reported() {
    let bytes = wat::parse_str(
        r#"
        (module
            (func
                v128.const i32x4 0 0 0 0
                drop
            )
        )
    "#,
    )
    .unwrap();
    let err = parse_module(&Engine::default(), &bytes).unwrap_err();
    assert!(
        format!("{err:#}").contains("unsupported operator"),
        "unexpected error: {err:#}"
    );
}
