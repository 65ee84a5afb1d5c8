//! Black-box integration tests for xcrud
//!
//! These tests go through the public surface only: descriptors in, wire
//! messages and lifecycle plans out.

use xcrud::ast::{Any, Expr, Scalar};
use xcrud::protocol::{
    ClientMessage, CrudMessage, Encode, Limit, LimitExpr, RowLock, RowLockOptions, UpdateType,
};
use xcrud::{
    CompileError, Decision, GrammarStart, Mode, Plan, Statement, StatementRegistry,
    StatementState, Value, compile, compile_prepared, parse,
};

fn people() -> Statement {
    Statement::find("people")
        .schema("test")
        .criteria("age > :min AND name LIKE :pattern")
        .bind("min", 18)
        .bind("pattern", "A%")
}

fn execute_args(plan: &Plan) -> &[Any] {
    match plan {
        Plan::Prepare { execute, .. } | Plan::Reuse { execute } => &execute.args,
        other => panic!("expected a prepared execution, got {:?}", other.decision()),
    }
}

// ============ Parsing ============

#[test]
fn multiplication_and_division_associate_left() {
    let parsed = parse("3 * 4 / 2", GrammarStart::Expr).unwrap();
    let Expr::Operator(root, params) = &parsed.expr else {
        panic!("expected an operator at the root");
    };
    assert_eq!(root, "/");
    assert!(matches!(&params[0], Expr::Operator(name, _) if name == "*"));
    assert_eq!(params[1], Expr::Literal(Scalar::SInt(2)));
    assert!(parsed.placeholders.is_empty());
}

#[test]
fn parse_errors_carry_position() {
    let err = parse("age > > 3", GrammarStart::Expr).unwrap_err();
    assert_eq!(err.offset, 6);
    assert_eq!(err.found, ">");
}

// ============ Execute mode ============

#[test]
fn args_follow_placeholder_order() {
    let stmt = Statement::find("c")
        .criteria("b = :second OR a = :first OR b = :second")
        .bind("first", 1)
        .bind("second", "two");
    let message = compile(&stmt, Mode::Execute).unwrap();
    assert_eq!(
        message.args(),
        &[Scalar::string("two"), Scalar::SInt(1)]
    );
}

#[test]
fn limit_with_count_only_omits_offset() {
    let message = compile(&people().limit(10), Mode::Execute).unwrap();
    assert_eq!(
        message.limit(),
        Some(&Limit {
            row_count: 10,
            offset: None
        })
    );
    assert!(message.limit_expr().is_none());

    let message = compile(&people(), Mode::Execute).unwrap();
    assert!(message.limit().is_none());
}

#[test]
fn limit_with_offset() {
    let message = compile(&people().limit(10).offset(20), Mode::Execute).unwrap();
    assert_eq!(
        message.limit(),
        Some(&Limit {
            row_count: 10,
            offset: Some(20)
        })
    );
}

#[test]
fn find_clauses_are_copied() {
    let stmt = people()
        .fields("name")
        .fields("age * 2 AS double_age")
        .group_by("name")
        .having("count(*) > 1")
        .order_by("age DESC")
        .lock(RowLock::ExclusiveLock, Some(RowLockOptions::SkipLocked));
    let CrudMessage::Find(find) = compile(&stmt, Mode::Execute).unwrap() else {
        panic!("expected find");
    };
    assert_eq!(find.collection.schema.as_deref(), Some("test"));
    assert_eq!(find.projection.len(), 2);
    assert_eq!(find.projection[1].alias.as_deref(), Some("double_age"));
    assert_eq!(find.grouping, vec![Expr::member(["name"])]);
    assert!(find.grouping_criteria.is_some());
    assert_eq!(find.order.len(), 1);
    assert_eq!(find.locking, Some(RowLock::ExclusiveLock));
    assert_eq!(find.locking_options, Some(RowLockOptions::SkipLocked));
}

// ============ Prepare mode ============

#[test]
fn prepare_mode_uses_limit_expr_and_no_args() {
    let (message, table) = compile_prepared(&people().limit(10)).unwrap();
    assert_eq!(table, vec!["min", "pattern"]);
    assert!(message.args().is_empty());
    assert!(message.limit().is_none());
    assert_eq!(
        message.limit_expr(),
        Some(&LimitExpr {
            row_count: Expr::Placeholder(2),
            offset: Some(Expr::Placeholder(3)),
        })
    );
}

#[test]
fn modes_never_mix_limit_shapes() {
    for stmt in [people(), people().limit(1), people().limit(1).offset(2)] {
        let direct = compile(&stmt, Mode::Execute).unwrap();
        assert!(direct.limit_expr().is_none());
        let prepared = compile(&stmt, Mode::Prepare).unwrap();
        assert!(prepared.limit().is_none());
        assert!(prepared.args().is_empty());
    }
}

#[test]
fn compiling_twice_is_byte_identical() {
    let stmt = people().fields("name").order_by("age").limit(3);
    for mode in [Mode::Execute, Mode::Prepare] {
        let a = compile(&stmt, mode).unwrap().to_bytes();
        let b = compile(&stmt, mode).unwrap().to_bytes();
        assert_eq!(a, b);
    }
}

#[test]
fn prepared_shape_ignores_values() {
    let a = compile(&people().limit(5), Mode::Prepare).unwrap().to_bytes();
    let b = compile(
        &people().bind("min", 99).bind("pattern", "Z%").limit(50).offset(7),
        Mode::Prepare,
    )
    .unwrap()
    .to_bytes();
    assert_eq!(a, b);
}

// ============ Update / delete ============

#[test]
fn item_remove_needs_no_value() {
    let stmt = Statement::update("c").criteria("_id = :id").bind("id", "x").unset("tags");
    let CrudMessage::Update(update) = compile(&stmt, Mode::Execute).unwrap() else {
        panic!("expected update");
    };
    assert_eq!(update.operation[0].operation, UpdateType::ItemRemove);
    assert!(update.operation[0].value.is_none());
}

#[test]
fn other_update_kinds_need_a_value() {
    for kind in [
        UpdateType::Set,
        UpdateType::ItemSet,
        UpdateType::ItemReplace,
        UpdateType::ItemMerge,
        UpdateType::ArrayInsert,
        UpdateType::ArrayAppend,
        UpdateType::MergePatch,
    ] {
        let stmt = Statement::update("c").modify("a", kind, None);
        assert!(
            matches!(
                compile(&stmt, Mode::Execute),
                Err(CompileError::InvalidDescriptor(_))
            ),
            "{kind:?} without a value should be rejected"
        );
    }
}

#[test]
fn update_value_maps_become_objects() {
    let mut fields = indexmap::IndexMap::new();
    fields.insert("k".to_string(), Value::from(1));
    fields.insert("skip".to_string(), Value::Unsupported("callback".into()));
    let stmt = Statement::update("c").modify("a", UpdateType::ItemMerge, Some(Value::Map(fields)));
    let CrudMessage::Update(update) = compile(&stmt, Mode::Execute).unwrap() else {
        panic!("expected update");
    };
    assert_eq!(
        update.operation[0].value,
        Some(Expr::Object(vec![(
            "k".into(),
            Expr::Literal(Scalar::SInt(1))
        )]))
    );
}

#[test]
fn delete_on_a_table() {
    let stmt = Statement::delete("t")
        .schema("s")
        .table()
        .criteria("t.id = ?")
        .bind("0", 7)
        .limit(1);
    let CrudMessage::Delete(delete) = compile(&stmt, Mode::Execute).unwrap() else {
        panic!("expected delete");
    };
    assert_eq!(delete.args, vec![Scalar::SInt(7)]);
    let Some(Expr::Operator(_, params)) = &delete.criteria else {
        panic!("expected criteria");
    };
    let Expr::Ident(column) = &params[0] else {
        panic!("expected a column");
    };
    assert_eq!(column.table_name.as_deref(), Some("t"));
    assert_eq!(column.name.as_deref(), Some("id"));
}

// ============ Prepared statement lifecycle ============

#[test]
fn execute_then_prepare_then_reuse() {
    let mut registry = StatementRegistry::new();
    let handle = registry.register();

    let plan = registry.decide(handle, &people()).unwrap();
    assert_eq!(plan.decision(), Decision::Direct);
    assert_eq!(plan.statement_id(), None);

    let plan = registry.decide(handle, &people()).unwrap();
    assert_eq!(plan.decision(), Decision::Prepare);
    assert_eq!(plan.statement_id(), Some(1));
    let messages = plan.messages();
    assert!(matches!(messages[0], ClientMessage::Prepare(_)));
    assert!(matches!(messages[1], ClientMessage::Execute(_)));

    let rebound = people().bind("min", 30);
    let plan = registry.decide(handle, &rebound).unwrap();
    assert_eq!(plan.decision(), Decision::Reuse);
    assert_eq!(plan.statement_id(), Some(1));
    assert_eq!(
        execute_args(&plan),
        &[
            Any::Scalar(Scalar::SInt(30)),
            Any::Scalar(Scalar::string("A%")),
        ]
    );
}

#[test]
fn adding_a_limit_deallocates() {
    let mut registry = StatementRegistry::new();
    let handle = registry.register();
    registry.decide(handle, &people()).unwrap();
    registry.decide(handle, &people()).unwrap();

    let plan = registry.decide(handle, &people().limit(5)).unwrap();
    let Plan::Deallocate {
        deallocate,
        message,
    } = &plan
    else {
        panic!("expected deallocate, got {:?}", plan.decision());
    };
    assert_eq!(deallocate.stmt_id, 1);
    assert!(message.limit().is_some());
    assert_eq!(registry.state(handle), Some(&StatementState::Unprepared));

    // Next run prepares the new shape.
    let plan = registry.decide(handle, &people().limit(5)).unwrap();
    assert_eq!(plan.decision(), Decision::Prepare);
}

#[test]
fn adding_an_offset_keeps_the_preparation() {
    let mut registry = StatementRegistry::new();
    let handle = registry.register();
    registry.decide(handle, &people().limit(5)).unwrap();
    registry.decide(handle, &people().limit(5)).unwrap();

    let plan = registry.decide(handle, &people().limit(5).offset(10)).unwrap();
    assert_eq!(plan.decision(), Decision::Reuse);
    let args = execute_args(&plan);
    assert_eq!(
        &args[2..],
        &[Any::Scalar(Scalar::UInt(5)), Any::Scalar(Scalar::UInt(10))]
    );
}

#[test]
fn handles_do_not_share_state() {
    let mut registry = StatementRegistry::new();
    let a = registry.register();
    let b = registry.register();
    registry.decide(a, &people()).unwrap();
    registry.decide(a, &people()).unwrap();
    assert_eq!(registry.decide(b, &people()).unwrap().decision(), Decision::Direct);
    assert_eq!(registry.decide(b, &people()).unwrap().statement_id(), Some(2));
}
