use std::cell::RefCell;
use std::rc::Rc;

use polycl::combine::NextMethod;
use polycl::engine::Engine;
use polycl::error::DispatchError;
use polycl::method::{MethodBody, Qualifier};
use polycl::specializer::Specializer;
use polycl::value::{TypeTag, Value};

fn constant_body(s: &str) -> MethodBody {
    let s = s.to_string();
    Rc::new(move |_: &Engine, _: &NextMethod, _: &[Value]| Ok(Value::string(&s)))
}

fn call_name(engine: &Engine, generic: &str, args: &[Value]) -> String {
    match engine.call(generic, args).unwrap() {
        Value::Str(s) => s.to_string(),
        other => panic!("expected string result, got {:?}", other),
    }
}

#[test]
fn eql_outranks_builtin_type() {
    let mut engine = Engine::new();

    engine
        .define_method(
            "classify",
            &[],
            &[Specializer::Builtin(TypeTag::Integer)],
            false,
            constant_body("integer"),
        )
        .unwrap();
    engine
        .define_method(
            "classify",
            &[],
            &[Specializer::Eql(Value::Integer(0))],
            false,
            constant_body("zero"),
        )
        .unwrap();

    assert_eq!(call_name(&engine, "classify", &[Value::Integer(0)]), "zero");
    assert_eq!(
        call_name(&engine, "classify", &[Value::Integer(5)]),
        "integer"
    );
    // Numeric eql crosses representations.
    assert_eq!(call_name(&engine, "classify", &[Value::Float(0.0)]), "zero");
}

#[test]
fn head_specializer_matches_tagged_lists() {
    let mut engine = Engine::new();
    let circle = engine.intern("circle");
    let triangle = engine.intern("triangle");

    engine
        .define_method(
            "kind",
            &[],
            &[Specializer::Head(Value::Symbol(circle))],
            false,
            constant_body("circle-form"),
        )
        .unwrap();
    engine
        .define_method(
            "kind",
            &[],
            &[Specializer::Universal],
            false,
            constant_body("other"),
        )
        .unwrap();

    let circle_form = Value::list(vec![Value::Symbol(circle), Value::Integer(2)]);
    let triangle_form = Value::list(vec![Value::Symbol(triangle)]);

    assert_eq!(call_name(&engine, "kind", &[circle_form]), "circle-form");
    // Undeclared head literals fall to the universal bucket.
    assert_eq!(call_name(&engine, "kind", &[triangle_form]), "other");
    assert_eq!(call_name(&engine, "kind", &[Value::Integer(1)]), "other");
    assert_eq!(call_name(&engine, "kind", &[Value::list(vec![])]), "other");
}

#[test]
fn nominal_dispatch_respects_single_parent_ancestry() {
    let mut engine = Engine::new();
    let shape = engine.define_record_type("shape", None, &[]);
    let circle = engine.define_record_type("circle", Some(shape), &["r"]);
    let disk = engine.define_record_type("disk", Some(circle), &[]);

    engine
        .define_method("describe", &[], &[Specializer::Type(shape)], false, constant_body("shape"))
        .unwrap();

    let d = engine.make_record(disk, &[]).unwrap();
    // The parent-chain walk reaches the grandparent's method.
    assert_eq!(call_name(&engine, "describe", &[d.clone()]), "shape");

    engine
        .define_method("describe", &[], &[Specializer::Type(circle)], false, constant_body("circle"))
        .unwrap();
    // A more specific method shadows the ancestor's.
    assert_eq!(call_name(&engine, "describe", &[d.clone()]), "circle");

    engine
        .define_method("describe", &[], &[Specializer::Type(disk)], false, constant_body("disk"))
        .unwrap();
    assert_eq!(call_name(&engine, "describe", &[d]), "disk");

    // Siblings are unaffected.
    let c = engine.make_record(circle, &[]).unwrap();
    assert_eq!(call_name(&engine, "describe", &[c]), "circle");
}

#[test]
fn builtin_supertypes_widen_the_match() {
    let mut engine = Engine::new();

    engine
        .define_method(
            "num-kind",
            &[],
            &[Specializer::Builtin(TypeTag::Number)],
            false,
            constant_body("number"),
        )
        .unwrap();
    engine
        .define_method(
            "num-kind",
            &[],
            &[Specializer::Builtin(TypeTag::Integer)],
            false,
            constant_body("integer"),
        )
        .unwrap();
    engine
        .define_method(
            "num-kind",
            &[],
            &[Specializer::Builtin(TypeTag::Sequence)],
            false,
            constant_body("sequence"),
        )
        .unwrap();

    assert_eq!(call_name(&engine, "num-kind", &[Value::Integer(1)]), "integer");
    assert_eq!(call_name(&engine, "num-kind", &[Value::Float(1.5)]), "number");
    assert_eq!(
        call_name(&engine, "num-kind", &[Value::string("abc")]),
        "sequence"
    );
    assert_eq!(
        call_name(&engine, "num-kind", &[Value::list(vec![])]),
        "sequence"
    );

    let err = engine.call("num-kind", &[Value::Nil]).unwrap_err();
    assert!(matches!(err, DispatchError::NoApplicableMethod { .. }));
}

#[test]
fn absent_arguments_satisfy_only_the_universal_specializer() {
    let mut engine = Engine::new();

    engine
        .define_method(
            "size",
            &[],
            &[Specializer::Universal, Specializer::Builtin(TypeTag::Integer)],
            false,
            constant_body("with-limit"),
        )
        .unwrap();
    engine
        .define_method(
            "size",
            &[],
            &[Specializer::Universal],
            false,
            constant_body("default"),
        )
        .unwrap();

    assert_eq!(
        call_name(&engine, "size", &[Value::string("x"), Value::Integer(3)]),
        "with-limit"
    );
    assert_eq!(call_name(&engine, "size", &[Value::string("x")]), "default");
}

#[test]
fn context_expressions_dispatch_on_engine_context() {
    let mut engine = Engine::new();
    let dark = engine.intern("dark");

    engine
        .define_method(
            "palette",
            &[],
            &[],
            false,
            constant_body("light-palette"),
        )
        .unwrap();
    engine
        .define_method_with_context(
            "palette",
            &[],
            &[],
            &[("theme", Specializer::Eql(Value::Symbol(dark)))],
            false,
            constant_body("dark-palette"),
        )
        .unwrap();

    assert_eq!(call_name(&engine, "palette", &[]), "light-palette");

    engine.set_context("theme", Value::Symbol(dark));
    assert_eq!(call_name(&engine, "palette", &[]), "dark-palette");

    engine.clear_context("theme");
    assert_eq!(call_name(&engine, "palette", &[]), "light-palette");
}

#[test]
fn precedence_declaration_reorders_specificity() {
    let mut engine = Engine::new();

    let define_pair = |engine: &mut Engine, name: &str| {
        engine
            .define_method(
                name,
                &[],
                &[Specializer::Builtin(TypeTag::Integer), Specializer::Universal],
                false,
                constant_body("x-wins"),
            )
            .unwrap();
        engine
            .define_method(
                name,
                &[],
                &[Specializer::Universal, Specializer::Builtin(TypeTag::Integer)],
                false,
                constant_body("y-wins"),
            )
            .unwrap();
    };

    // Default: the leftmost argument dominates.
    define_pair(&mut engine, "pick");
    assert_eq!(
        call_name(&engine, "pick", &[Value::Integer(1), Value::Integer(2)]),
        "x-wins"
    );

    // Declared precedence: the second argument dominates.
    engine
        .define_generic(
            "pick2",
            &["x", "y"],
            polycl::generic::GenericOptions {
                documentation: None,
                precedence: Some(vec!["y".to_string(), "x".to_string()]),
            },
        )
        .unwrap();
    define_pair(&mut engine, "pick2");
    assert_eq!(
        call_name(&engine, "pick2", &[Value::Integer(1), Value::Integer(2)]),
        "y-wins"
    );
}

#[test]
fn area_example_end_to_end() {
    let mut engine = Engine::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    let shape = engine.define_record_type("shape", None, &[]);
    let circle = engine.define_record_type("circle", Some(shape), &["r"]);
    let square = engine.define_record_type("square", Some(shape), &["s"]);
    // No triangle method will exist; it is not even a shape.
    let triangle = engine.define_record_type("triangle", None, &["a", "b", "c"]);

    engine
        .define_method(
            "area",
            &[],
            &[Specializer::Type(circle)],
            false,
            Rc::new(|engine: &Engine, _: &NextMethod, args: &[Value]| {
                let r = match engine.slot_value(&args[0], "r") {
                    Some(Value::Integer(n)) => n as f64,
                    Some(Value::Float(f)) => f,
                    _ => 0.0,
                };
                Ok(Value::Float(std::f64::consts::PI * r * r))
            }),
        )
        .unwrap();
    engine
        .define_method(
            "area",
            &[],
            &[Specializer::Type(square)],
            false,
            Rc::new(|engine: &Engine, _: &NextMethod, args: &[Value]| {
                let s = match engine.slot_value(&args[0], "s") {
                    Some(Value::Integer(n)) => n as f64,
                    Some(Value::Float(f)) => f,
                    _ => 0.0,
                };
                Ok(Value::Float(s * s))
            }),
        )
        .unwrap();
    let seen = log.clone();
    engine
        .define_method(
            "area",
            &[Qualifier::Before],
            &[Specializer::Type(shape)],
            false,
            Rc::new(move |_: &Engine, _: &NextMethod, _: &[Value]| {
                seen.borrow_mut().push("invoked".to_string());
                Ok(Value::Nil)
            }),
        )
        .unwrap();

    let c = engine
        .make_record(circle, &[("r", Value::Integer(2))])
        .unwrap();
    let result = engine.call("area", &[c]).unwrap();
    assert_eq!(log.borrow().len(), 1);
    assert!(result.eql(&Value::Float(std::f64::consts::PI * 4.0)));

    let sq = engine
        .make_record(square, &[("s", Value::Integer(3))])
        .unwrap();
    let result = engine.call("area", &[sq]).unwrap();
    assert!(result.eql(&Value::Float(9.0)));

    let t = engine.make_record(triangle, &[]).unwrap();
    let err = engine.call("area", &[t]).unwrap_err();
    assert!(matches!(err, DispatchError::NoApplicableMethod { .. }));
}
