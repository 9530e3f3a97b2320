#![cfg(test)]

use kdl_compiler::{
    compile_source,
    error::ReasonCode,
    resource::{ResourceInstance, ValueContainer},
    scene::{AttributeKind, ElementKind, ElementValue, Rect},
    scene_encoder::decode_interface,
    CompileOptions, Compiler,
};

fn integers(instance: &ResourceInstance, list: &str, label: &str) -> Vec<i64> {
    match instance.value(list) {
        Some(ValueContainer::List(entries)) => entries
            .iter()
            .filter_map(|entry| match entry.get(label) {
                Some(ValueContainer::Integer(v)) => Some(*v),
                _ => None,
            })
            .collect(),
        other => panic!("expected a list under {}, found {:?}", list, other),
    }
}

#[test]
fn test_count_and_reference_end_to_end() {
    let input = r#"
    type Holder : "hold" {
        template {
            DWRD "Count";
            RSRC "Ref";
        };
        field("Count") { Count as Integer; };
        field("Ref") { Ref as Reference; };
    };

    declare Holder {
        new (#1, "Holder") {
            Count = 3;
            Ref = #Widget.10;
        };
    }
    "#;

    let compilation = compile_source(input, "holder.kdl").expect("compile failed");
    assert_eq!(compilation.instances.len(), 1);

    let instance = &compilation.instances[0];
    assert_eq!(instance.value("Count"), Some(&ValueContainer::Integer(3)));
    match instance.value("Ref") {
        Some(ValueContainer::Reference(reference)) => {
            assert_eq!(reference.id, 10);
            assert_eq!(reference.type_name.as_deref(), Some("Widget"));
        }
        other => panic!("expected a reference, found {:?}", other),
    }

    let resource = &compilation.resources[0];
    assert_eq!(resource.type_code.to_string(), "hold");
    let mut expected = vec![0, 3];
    expected.extend_from_slice(&10i64.to_be_bytes());
    assert_eq!(resource.data, expected);
}

#[test]
fn test_main_scene_end_to_end() {
    let input = r#"
    scene <1000> "Main" {
        Size = 320, 240;
        Button("ok") {
            Frame = 0,0,80,24;
            Value = "OK";
        }
    }
    "#;

    let compilation = compile_source(input, "main.kdl").expect("compile failed");
    assert_eq!(compilation.instances.len(), 1);
    let resource = &compilation.resources[0];
    assert_eq!(resource.type_name, "SceneInterface");
    assert_eq!(resource.id, 1000);
    assert_eq!(resource.name, "Main");

    let scene = decode_interface(&resource.data).expect("decode failed");
    assert_eq!(scene.size, (320, 240));
    assert_eq!(scene.elements.len(), 1);
    let button = &scene.elements[0];
    assert_eq!(button.kind, ElementKind::Button);
    assert_eq!(
        button.attribute(AttributeKind::Frame),
        Some(&ElementValue::Rect(Rect { x: 0, y: 0, width: 80, height: 24 }))
    );
    assert_eq!(button.attribute(AttributeKind::Value), Some(&ElementValue::Text("OK".into())));
}

#[test]
fn test_repeat_counters_and_bound() {
    let types = r#"
    type Menu : "menu" {
        template { OCNT "Entries" { DWRD "Number"; CSTR "Label"; }; };
        repeatable<3, 5, Entries> field("Entry") { Number = FieldNumber; Label = "entry"; };
    };
    "#;

    let source = format!("{} declare Menu {{ new {{ Entry = default; Entry = default; Entry {{ Label = \"x\"; }}; }}; }}", types);
    let compilation = compile_source(&source, "menu.kdl").expect("compile failed");
    assert_eq!(integers(&compilation.instances[0], "Entries", "Number"), vec![3, 4, 5]);

    let source = format!(
        "{} declare Menu {{ new {{ Entry = default; Entry = default; Entry = default; Entry = default; }}; }}",
        types
    );
    let err = compile_source(&source, "menu.kdl").unwrap_err();
    assert_eq!(err.code(), Some(ReasonCode::RepeatBoundExceeded));
}

#[test]
fn test_nested_new_keeps_sibling_counters() {
    let input = r#"
    type Node : "node" {
        template {
            OCNT "Children" { DWRD "Slot"; RSRC "Target"; };
        };
        repeatable<0, 9, Children> field("Child") {
            Slot = FieldNumber;
            Target as Reference<Node>;
        };
    };

    declare Node {
        new (#1) {
            Child = default, new (#2) { Child = default; Child = default; Child = default; };
            Child = default;
        };
    }
    "#;

    let compilation = compile_source(input, "nodes.kdl").expect("compile failed");
    let inner = &compilation.instances[0];
    let outer = &compilation.instances[1];
    assert_eq!(inner.reference.id, 2);
    assert_eq!(integers(inner, "Children", "Slot"), vec![0, 1, 2]);
    assert_eq!(outer.reference.id, 1);
    assert_eq!(integers(outer, "Children", "Slot"), vec![0, 1]);
}

#[test]
fn test_bitmask_join_is_order_independent() {
    let types = r#"
    type Options : "optn" {
        template { HLNG "Flags"; };
        field("Flags") { Flags [ Alpha = 0x01, Beta = 0x02 ]; };
    };
    "#;
    let flags = |expr: &str| {
        let source = format!("{} declare Options {{ new {{ Flags = {}; }}; }}", types, expr);
        let compilation = compile_source(&source, "options.kdl").expect("compile failed");
        compilation.resources[0].data.clone()
    };

    assert_eq!(flags("Alpha | Beta"), vec![0, 0, 0, 3]);
    assert_eq!(flags("Beta | Alpha"), vec![0, 0, 0, 3]);
    assert_eq!(flags("Beta"), vec![0, 0, 0, 2]);
}

#[test]
fn test_source_types_with_constructors() {
    let input = r#"
    type Point : "pnt " {
        template { DWRD "X"; DWRD "Y"; };
        field("X") { X; };
        field("Y") { Y; };
        constructor(x, y) { this.X = x; this.Y = y; };
    };

    type Marker : "mrkr" {
        template {
            PSTR "Name";
            NESTED<Point> "At";
        };
        field("Name") { Name; };
        field("At") { At as Point; };
    };

    $spacing = 16;
    declare Marker {
        new (#1) { Name = "start"; At = Point($spacing, $spacing * 2); };
    }
    "#;

    let compilation = compile_source(input, "markers.kdl").expect("compile failed");
    let instance = &compilation.instances[0];
    assert_eq!(instance.value("At.X"), Some(&ValueContainer::Integer(16)));
    assert_eq!(instance.value("At.Y"), Some(&ValueContainer::Integer(32)));
    assert_eq!(compilation.resources[0].data, vec![5, b's', b't', b'a', b'r', b't', 0, 16, 0, 32]);
    assert!(compilation.registry.type_named("Marker").is_some());
}

#[test]
fn test_auto_ids_and_duplicates() {
    let options = CompileOptions {
        first_auto_id: 500,
        ..CompileOptions::default()
    };
    let compiler = Compiler::new(options).unwrap();
    let compilation = compiler
        .compile_str(
            r#"declare Package { new (#500) { }; new (#auto) { }; new { }; }"#,
            "ids.kdl",
        )
        .expect("compile failed");
    let ids: Vec<i64> = compilation.resources.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![500, 501, 502]);

    let err = compile_source(r#"declare Package { new (#7) { }; new (#7) { }; }"#, "ids.kdl").unwrap_err();
    assert_eq!(err.code(), Some(ReasonCode::DuplicateResource));
}

#[test]
fn test_condition_suppresses_declarations() {
    let input = r#"
    $debug = 0;
    declare Package {
        @condition($debug == 1) new (#1, "Debug") { Name = "debug"; };
        @condition($debug == 0) new (#2, "Release") { Name = "release"; };
    }
    "#;
    let compilation = compile_source(input, "cond.kdl").expect("compile failed");
    assert_eq!(compilation.resources.len(), 1);
    assert_eq!(compilation.resources[0].name, "Release");
}

#[test]
fn test_references_keep_metadata_through_arithmetic() {
    let input = r#"
    $base = #LuaScript.100;
    declare ShaderSet {
        new ($base + 1, "Set") { Vertex = #VertexShader.1 + 9; Fragment = 5 + #FragmentShader.1; };
    }
    "#;
    let compilation = compile_source(input, "shaders.kdl").expect("compile failed");
    let instance = &compilation.instances[0];
    assert_eq!(instance.reference.id, 101);
    assert_eq!(instance.reference.type_name.as_deref(), Some("ShaderSet"));
    match instance.value("Vertex") {
        Some(ValueContainer::Reference(r)) => {
            assert_eq!(r.id, 10);
            assert_eq!(r.type_name.as_deref(), Some("VertexShader"));
            assert_eq!(r.type_code.map(|c| c.to_string()), Some("vshd".to_string()));
        }
        other => panic!("expected a reference, found {:?}", other),
    }
    match instance.value("Fragment") {
        Some(ValueContainer::Reference(r)) => {
            assert_eq!(r.id, 6);
            assert_eq!(r.type_name.as_deref(), Some("FragmentShader"));
        }
        other => panic!("expected a reference, found {:?}", other),
    }
}

#[test]
fn test_overflowing_values_are_reported() {
    let types = r#"
    type Panel : "panl" {
        template {
            RECT "Bounds";
            RSRC "Target";
        };
        field("Bounds") { Bounds as Rect; };
        field("Target") { Target as Reference; };
    };
    "#;
    let code = |body: &str| {
        compile_source(&format!("{}{}", types, body), "panel.kdl")
            .unwrap_err()
            .code()
    };

    assert_eq!(
        code("declare Panel { new (#1) { Bounds = frame(1, 0, 9223372036854775807, 1); }; }"),
        Some(ReasonCode::ValueOutOfRange)
    );
    assert_eq!(
        code("declare Panel { new (#1) { $r = #9223372036854775807; $r++; Target = $r; }; }"),
        Some(ReasonCode::ValueOutOfRange)
    );
}

#[test]
fn test_diagnostics_name_code_and_location() {
    let input = "declare Package {\n    new { Title = \"x\"; };\n}\n";
    let err = compile_source(input, "pkg.kdl").unwrap_err();
    assert_eq!(err.code(), Some(ReasonCode::UnknownField));
    let message = err.to_string();
    assert!(message.starts_with("pkg.kdl:2:"), "{}", message);
    assert!(message.contains("error[KDL023]"), "{}", message);
}

#[test]
fn test_dry_run_still_validates() {
    let options = CompileOptions {
        suppress_resources: true,
        ..CompileOptions::default()
    };
    let compiler = Compiler::new(options).unwrap();
    let ok = compiler.compile_str(r#"declare Package { new (#1) { Name = "a"; }; }"#, "dry.kdl").unwrap();
    assert!(ok.resources.is_empty());

    let err = compiler.compile_str(r#"declare Package { new (#1) { Nope = 1; }; }"#, "dry.kdl").unwrap_err();
    assert_eq!(err.code(), Some(ReasonCode::UnknownField));
}
