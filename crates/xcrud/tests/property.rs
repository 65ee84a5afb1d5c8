use proptest::prelude::*;
use xcrud::protocol::Encode;
use xcrud::{GrammarStart, Mode, Statement, compile, parse};

/// Atoms with either `?` or `:name` placeholders; one expression never mixes them.
fn arb_atom(positional: bool) -> impl Strategy<Value = String> {
    let placeholder = if positional {
        Just("?".to_string()).boxed()
    } else {
        (0usize..4).prop_map(|n| format!(":p{n}")).boxed()
    };
    prop_oneof![
        Just("a".to_string()),
        Just("$.b[0]".to_string()),
        (0i64..1000).prop_map(|n| n.to_string()),
        Just("'s'".to_string()),
        placeholder,
    ]
}

fn arb_expr(depth: u32, positional: bool) -> BoxedStrategy<String> {
    if depth == 0 {
        return arb_atom(positional).boxed();
    }

    let leaf = arb_atom(positional);
    let nested = (
        arb_expr(depth - 1, positional),
        prop_oneof![
            Just("+"),
            Just("-"),
            Just("*"),
            Just("/"),
            Just("="),
            Just("<>"),
            Just("AND"),
            Just("OR"),
        ],
        arb_expr(depth - 1, positional),
    )
        .prop_map(|(lhs, op, rhs)| format!("({lhs} {op} {rhs})"));
    prop_oneof![leaf, nested].boxed()
}

fn arb_criteria(depth: u32) -> BoxedStrategy<String> {
    any::<bool>()
        .prop_flat_map(move |positional| arb_expr(depth, positional))
        .boxed()
}

/// Names in first-occurrence order, `?` named after its table position.
fn expected_names(expr: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = expr;
    while let Some(i) = rest.find(['?', ':']) {
        let name = if rest[i..].starts_with('?') {
            rest = &rest[i + 1..];
            names.len().to_string()
        } else {
            let tail = &rest[i + 1..];
            let end = tail
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(tail.len());
            rest = &tail[end..];
            tail[..end].to_string()
        };
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

proptest! {
    #[test]
    fn placeholder_table_is_first_occurrence_order(expr in arb_criteria(3)) {
        let parsed = parse(&expr, GrammarStart::Expr).expect("generated expression should parse");
        prop_assert_eq!(&parsed.placeholders, &expected_names(&expr));
        for pos in parsed.expr.placeholders() {
            prop_assert!((pos as usize) < parsed.placeholders.len());
        }
    }

    #[test]
    fn execute_emits_one_arg_per_placeholder(expr in arb_criteria(3), seed in 0i64..100) {
        let parsed = parse(&expr, GrammarStart::Expr).expect("generated expression should parse");
        let mut stmt = Statement::find("c").criteria(expr.as_str());
        for (i, name) in parsed.placeholders.iter().enumerate() {
            stmt = stmt.bind(name.clone(), seed + i as i64);
        }
        let message = compile(&stmt, Mode::Execute).unwrap();
        prop_assert_eq!(message.args().len(), parsed.placeholders.len());
    }

    #[test]
    fn prepared_shape_does_not_depend_on_values(
        expr in arb_criteria(2),
        x in any::<i64>(),
        y in any::<i64>(),
        limit in 1u64..1000,
        offset in proptest::option::of(0u64..1000),
    ) {
        let build = |v: i64, offset: Option<u64>| {
            let mut stmt = Statement::find("c").criteria(expr.as_str()).limit(limit);
            if let Some(offset) = offset {
                stmt = stmt.offset(offset);
            }
            for n in 0..4 {
                stmt = stmt.bind(format!("p{n}"), v);
            }
            stmt
        };
        let a = compile(&build(x, None), Mode::Prepare).unwrap().to_bytes();
        let b = compile(&build(y, offset), Mode::Prepare).unwrap().to_bytes();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn parser_never_panics(input in "[a-z0-9 :?$.*+\\-()\\[\\]'<>=!]{0,40}") {
        let _ = parse(&input, GrammarStart::Expr);
    }
}
