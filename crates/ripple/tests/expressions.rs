use ripple::expression::{CompileError, Functions, parse};
use ripple::graph::{Graph, InletRef, MapCell};
use ripple::record::RecordScope;
use ripple::value::{Record, Value};

fn scope(graph: &mut Graph, fields: &[(&str, i32)]) -> RecordScope {
    RecordScope::new(graph, fields.iter().copied().collect::<Record>())
}

#[test]
fn sum_of_fields_recomputes_after_an_update() {
    let mut graph = Graph::new();
    let scope = scope(&mut graph, &[("a", 1), ("b", 2)]);
    let root = scope.compile(&mut graph, &parse("$a + $b").unwrap()).unwrap();

    let version = scope.commit(&mut graph);
    graph.recohere(root, version);
    assert_eq!(graph.value(root), Some(&Value::from(3)));

    scope.set(&mut graph, "a", 5);
    let version = scope.commit(&mut graph);
    graph.recohere(root, version);
    assert_eq!(graph.value(root), Some(&Value::from(7)));
}

#[test]
fn shared_operands_are_evaluated_once_per_version() {
    let mut graph = Graph::new();
    let scope = scope(&mut graph, &[("a", 2)]);
    let doubled = scope.compile(&mut graph, &parse("$a * 2").unwrap()).unwrap();
    let left = graph.insert(MapCell::new(|value| value.plus(&Value::from(1))));
    let right = graph.insert(MapCell::new(|value| value.minus(&Value::from(1))));
    graph.bind(InletRef::new(left, 0), doubled);
    graph.bind(InletRef::new(right, 0), doubled);

    let version = scope.commit(&mut graph);
    graph.recohere(left, version);
    graph.recohere(right, version);
    graph.recohere(right, version);
    assert_eq!(graph.value(left), Some(&Value::from(5)));
    assert_eq!(graph.value(right), Some(&Value::from(3)));
    assert_eq!(graph.evaluations(doubled), 1);
    assert_eq!(graph.evaluations(right), 1);
}

#[test]
fn decoherence_reaches_only_dependents() {
    let mut graph = Graph::new();
    let scope = scope(&mut graph, &[("a", 1), ("b", 2)]);
    let uses_a = scope.compile(&mut graph, &parse("$a + 1").unwrap()).unwrap();
    let uses_b = scope.compile(&mut graph, &parse("-$b").unwrap()).unwrap();
    let version = scope.commit(&mut graph);
    graph.recohere(uses_a, version);
    graph.recohere(uses_b, version);

    scope.set(&mut graph, "a", 10);
    assert!(!graph.is_coherent(uses_a));
    assert!(graph.is_coherent(uses_b));

    scope.commit(&mut graph);
    assert_eq!(graph.value(uses_a), Some(&Value::from(11)));
    assert_eq!(graph.evaluations(uses_b), 1);
}

#[test]
fn functions_are_injected_per_scope() {
    let mut graph = Graph::new();
    let mut functions = Functions::empty();
    functions.register("twice", |args| args.first().map_or(Value::Absent, |v| v.times(&Value::from(2))));
    let scope = RecordScope::with_functions(&mut graph, Record::from_iter([("n", 21)]), functions);

    let root = scope.compile(&mut graph, &parse("twice($n)").unwrap()).unwrap();
    let version = scope.commit(&mut graph);
    graph.recohere(root, version);
    assert_eq!(graph.value(root), Some(&Value::from(42)));

    let error = scope.compile(&mut graph, &parse("abs($n)").unwrap()).unwrap_err();
    assert_eq!(error, CompileError::UnknownFunction("abs".into()));
}

#[test]
fn parse_errors_are_reported() {
    let error = parse("$a + ").unwrap_err();
    assert!(!error.errors.is_empty());
    assert!(error.to_string().contains("expression"));
}

#[test]
fn disposing_a_field_of_a_dynamic_get_frees_the_whole_path() {
    let mut graph = Graph::new();
    let fields = Record::from_iter([("x", Value::record([("b", 5)])), ("y", Value::record([("b", 8)]))]);
    let scope = RecordScope::new(&mut graph, fields);
    scope.set(&mut graph, "k", "x");
    let before = graph.len();

    let root = scope.compile(&mut graph, &parse("$[$k].b").unwrap()).unwrap();
    let version = scope.commit(&mut graph);
    graph.recohere(root, version);
    assert_eq!(graph.value(root), Some(&Value::from(5)));

    scope.set(&mut graph, "k", "y");
    let version = scope.commit(&mut graph);
    graph.recohere(root, version);
    assert_eq!(graph.value(root), Some(&Value::from(8)));

    graph.dispose(root);
    assert!(!graph.contains(root));
    assert_eq!(graph.len(), before + 1);
}
