//! End-to-end behaviour of the mapping engine through the public API.

use datamapping::{
    parse_json, Completion, ConvertError, Converter, FieldRule, MappingError, MappingSchema,
    ObjectRef, ObjectType, RawRecord, Record, SchemaRegistry, Target, Value,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn root_data() -> ObjectType {
    ObjectType::new("RootData", ["id", "verb_id", "somethings_deep"])
}

fn deeper() -> ObjectType {
    ObjectType::new("Deeper", ["info"])
}

fn simple_row() -> serde_json::Value {
    json!({
        "verb_id": "TestRow",
        "special_case": {
            "a_string": "MyString",
            "a_phrase": "Doesn't Matter now does it?",
            "an_id": "MyImportantID"
        }
    })
}

fn text(s: &str) -> Option<Value> {
    Some(Value::from(s))
}

// =============================================================================
// Index
// =============================================================================

#[test]
fn index_is_deterministic() {
    let root = root_data();
    let build = || {
        MappingSchema::builder("BasicMapping")
            .target(&root)
            .rule("verb_id", FieldRule::map_to())
            .rule("special_case_an_id", FieldRule::new(root.field("id")).path("special_case.an_id"))
            .rule("special_case_string", FieldRule::new("some_string").path("special_case.a_string"))
            .build()
            .unwrap()
    };
    let first = build();
    let second = build();

    let describe = |schema: &MappingSchema| {
        schema
            .field_index()
            .map(|(key, rules)| (key.to_string(), format!("{:?}", rules)))
            .collect::<Vec<_>>()
    };
    assert_eq!(describe(&first), describe(&second));
    assert_eq!(first.headings().collect::<Vec<_>>(), ["special_case", "verb_id"]);
}

#[test]
fn unset_path_defaults_to_key() {
    let schema = MappingSchema::builder("S")
        .rule("verb_id", FieldRule::map_to())
        .build()
        .unwrap();
    let rules = schema.get_mappings("verb_id");
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].get_path(), "verb_id");
}

// =============================================================================
// Conversion pipeline
// =============================================================================

#[test]
fn special_case_round_trip() {
    let root = root_data();
    let schema = MappingSchema::builder("BasicMapping")
        .target(&root)
        .rule("verb_id", FieldRule::map_to())
        .rule("special_case_an_id", FieldRule::new(root.field("id")).path("special_case.an_id"))
        .rule("special_case_string", FieldRule::new("some_string").path("special_case.a_string"))
        .build()
        .unwrap();

    let item = schema
        .map_item(json!({"special_case": {"an_id": "X", "a_string": "Y"}}))
        .unwrap();
    assert!(item.borrow().is_exactly(&root));
    assert_eq!(item.get("id"), text("X"));
    assert_eq!(item.get("some_string"), text("Y"));
}

#[test]
fn shared_key_fans_out_once_per_rule() {
    let root = root_data();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let counting = Converter::value("count", move |v| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(v)
    });

    let schema = MappingSchema::builder("BasicMapping")
        .target(&root)
        .rule("verb_id", FieldRule::map_to())
        .rule(
            "special_case",
            FieldRule::new(root.field("id")).path("special_case.an_id").converter(counting.clone()),
        )
        .rule(
            "_1",
            FieldRule::new("alt_id").path("special_case.an_id").converter(counting),
        )
        .build()
        .unwrap();

    let item = schema.map_item(simple_row()).unwrap();
    assert_eq!(item.get("alt_id"), text("MyImportantID"));
    assert_eq!(item.get("id"), text("MyImportantID"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn deep_paths_traverse_past_the_dispatch_key() {
    let schema = MappingSchema::builder("Deep")
        .target(&root_data())
        .rule("a", FieldRule::new("leaf").path("a.b.c"))
        .rule("list", FieldRule::new("second").path("list.1.name"))
        .build()
        .unwrap();

    let item = schema
        .map_item(json!({
            "a": {"b": {"c": 3}},
            "list": [{"name": "zero"}, {"name": "one"}]
        }))
        .unwrap();
    assert_eq!(item.get("leaf"), Some(Value::Integer(3)));
    assert_eq!(item.get("second"), text("one"));
}

#[test]
fn missing_key_keeps_the_intermediate_value() {
    let schema = MappingSchema::builder("Missing")
        .target(&root_data())
        .rule("special_case", FieldRule::new("uid").path("special_case.nope"))
        .build()
        .unwrap();

    let item = schema.map_item(json!({"special_case": {"an_id": "X"}})).unwrap();
    let written = item.get("uid").unwrap();
    assert_eq!(written.as_record().unwrap().get("an_id"), Some(&Value::from("X")));
}

#[test]
fn scalar_intermediate_is_a_traversal_error() {
    let schema = MappingSchema::builder("Broken")
        .target(&root_data())
        .rule("special_case", FieldRule::new("uid").path("special_case.an_id.deeper"))
        .build()
        .unwrap();

    let err = schema.map_item(simple_row()).unwrap_err();
    match err {
        MappingError::Traversal { header, token, found } => {
            assert_eq!(header, "special_case");
            assert_eq!(token, "deeper");
            assert_eq!(found, "text");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn converter_failure_names_header_value_and_converter() {
    let schema = MappingSchema::builder("Failing")
        .target(&root_data())
        .rule(
            "verb_id",
            FieldRule::map_to().converter(Converter::value("to_int", |v: Value| {
                v.as_str()
                    .and_then(|s| s.parse::<i64>().ok())
                    .map(Value::Integer)
                    .ok_or(ConvertError::Type { expected: "integer text", found: "text" })
            })),
        )
        .build()
        .unwrap();

    let err = schema.map_item(simple_row()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("'verb_id'"));
    assert!(message.contains("to_int"));
    assert!(message.contains("TestRow"));
}

#[test]
fn rows_pair_headings_with_values() {
    let schema = MappingSchema::builder("Rows")
        .target(&root_data())
        .rule("ID", FieldRule::new("id"))
        .build()
        .unwrap();

    let headings = vec!["ID".to_string(), "Extra".to_string()];
    let item = schema
        .map_row(&headings, vec![Value::Bytes(b"42".to_vec()), Value::Bytes(vec![0xE9])])
        .unwrap();
    assert_eq!(item.get("id"), text("42"));
    assert_eq!(item.get("Extra"), text("é"));
}

// =============================================================================
// Unmapped data and ignore rules
// =============================================================================

#[test]
fn unmapped_keys_are_kept_when_enabled() {
    let build = |store| {
        MappingSchema::builder("Unmapped")
            .target(&root_data())
            .rule("verb_id", FieldRule::map_to())
            .store_unmapped(store)
            .build()
            .unwrap()
    };

    let kept = build(true).map_item(json!({"verb_id": "v", "other": [1, 2]})).unwrap();
    assert_eq!(
        kept.get("other"),
        Some(Value::List(vec![Value::Integer(1), Value::Integer(2)]))
    );

    let dropped = build(false).map_item(json!({"verb_id": "v", "other": [1, 2]})).unwrap();
    assert!(!dropped.has("other"));
    assert_eq!(dropped.get("verb_id"), text("v"));
}

#[test]
fn ignore_consumes_without_writing() {
    let schema = MappingSchema::builder("Ignoring")
        .target(&root_data())
        .rule("a_phrase", FieldRule::ignore())
        .rule("old", FieldRule::pass())
        .build()
        .unwrap();

    let item = schema.map_item(json!({"a_phrase": "x", "old": 1})).unwrap();
    assert!(!item.has("a_phrase"));
    assert!(!item.has("old"));
}

// =============================================================================
// Embedded mappings
// =============================================================================

#[test]
fn embedded_mapping_writes_into_child_and_parent() {
    let root = root_data();
    let deep = deeper();

    let embedded = MappingSchema::builder("EmbeddedMapping")
        .target(&deep)
        .rule("a_string", FieldRule::map_to().to(deep.field("info")))
        .rule("a_phrase", FieldRule::ignore())
        .rule("an_id", FieldRule::map_to().to(root.field("id")))
        .on_complete(|item| {
            if item.get("info") != Some(Value::from("MyString")) || item.has("id") {
                return Err("embedded item is wrong".to_string());
            }
            Ok(Completion::Keep)
        })
        .build()
        .unwrap();

    let schema = MappingSchema::builder("BasicMapping")
        .target(&root)
        .rule("verb_id", FieldRule::tbd())
        .rule(
            "special_case",
            FieldRule::new(Target::setter("add_something", |obj, value| {
                obj.push("somethings_deep", value)
            }))
            .via(&embedded),
        )
        .on_complete(|item| {
            if item.get("id") != Some(Value::from("MyImportantID")) {
                return Err("parent id was not written".to_string());
            }
            Ok(Completion::Keep)
        })
        .build()
        .unwrap();

    let item = schema.map_item(simple_row()).unwrap();
    let deep_items = item.get("somethings_deep").unwrap();
    let child = deep_items.as_list().unwrap()[0].as_object().unwrap().clone();
    assert!(child.borrow().is_exactly(&deep));
    assert_eq!(child.get("info"), text("MyString"));
    assert_eq!(item.get("verb_id"), text("TestRow"));
}

#[test]
fn child_object_is_reachable_from_parent_context() {
    let root = root_data();
    let deep = deeper();

    let embedded = MappingSchema::builder("EmbeddedMapping")
        .target(&deep)
        .rule("a_string", FieldRule::map_to().to(deep.field("info")))
        .build()
        .unwrap();

    // `trailer` follows `special_case` in the input and is routed by marker to the child
    let schema = MappingSchema::builder("BasicMapping")
        .target(&root)
        .rule("special_case", FieldRule::new(root.append("somethings_deep")).via(&embedded))
        .rule("trailer", FieldRule::new("note").context(&deep))
        .store_unmapped(false)
        .build()
        .unwrap();

    let item = schema
        .map_item(json!({"special_case": {"a_string": "S"}, "trailer": "for the child"}))
        .unwrap();
    let child = item.get("somethings_deep").unwrap().as_list().unwrap()[0]
        .as_object()
        .unwrap()
        .clone();
    assert_eq!(child.get("note"), text("for the child"));
    assert!(!item.has("note"));
}

#[test]
fn json_input_is_mapped_in_document_order() {
    let root = root_data();
    let deep = deeper();

    let embedded = MappingSchema::builder("EmbeddedMapping")
        .target(&deep)
        .rule("a_string", FieldRule::map_to().to(deep.field("info")))
        .build()
        .unwrap();

    // `alpha` is routed into the object created by `zeta`, which comes first
    let schema = MappingSchema::builder("BasicMapping")
        .target(&root)
        .rule("zeta", FieldRule::new(root.append("somethings_deep")).via(&embedded))
        .rule("alpha", FieldRule::new("note").context(&deep))
        .build()
        .unwrap();

    let parsed = parse_json(br#"{"zeta": {"a_string": "S"}, "alpha": "late"}"#).unwrap();
    let raw = parsed.records.into_iter().next().unwrap();
    let item = schema.map_item(raw).unwrap();

    let child = item.get("somethings_deep").unwrap().as_list().unwrap()[0]
        .as_object()
        .unwrap()
        .clone();
    assert_eq!(child.get("note"), text("late"));
}

#[test]
fn embedded_schema_without_target_shares_the_parent_object() {
    let root = root_data();
    let flattened = MappingSchema::builder("Flattened")
        .rule("an_id", FieldRule::new(root.field("id")))
        .rule("a_string", FieldRule::new("label"))
        .store_unmapped(false)
        .build()
        .unwrap();

    let schema = MappingSchema::builder("Outer")
        .target(&root)
        .rule("special_case", FieldRule::embedded_values(Converter::nested(flattened)))
        .build()
        .unwrap();

    let item = schema.map_item(simple_row()).unwrap();
    assert_eq!(item.get("id"), text("MyImportantID"));
    assert_eq!(item.get("label"), text("MyString"));
    assert!(!item.has("special_case"));
}

// =============================================================================
// List mappings
// =============================================================================

#[test]
fn list_schema_yields_one_object_per_element() {
    let finalized = Arc::new(AtomicUsize::new(0));
    let counter = finalized.clone();
    let schema = MappingSchema::builder("Deepers")
        .target(&deeper())
        .rule("info", FieldRule::preserve())
        .list()
        .on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Completion::Keep)
        })
        .build()
        .unwrap();

    let items: Vec<ObjectRef> = schema
        .map_items(Value::from(json!([{"info": "a"}, {"info": "b"}, {"info": "c"}])))
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(items.len(), 3);
    assert_eq!(finalized.load(Ordering::SeqCst), 3);
    assert!(!items[0].ptr_eq(&items[1]));
    assert_eq!(items[2].get("info"), text("c"));
}

#[test]
fn nested_list_schema_skips_elements() {
    let root = root_data();
    let deep = deeper();
    let elements = MappingSchema::builder("Deepers")
        .target(&deep)
        .rule("info", FieldRule::preserve())
        .list()
        .on_complete(|item| {
            Ok(match item.get("info") {
                Some(Value::Text(s)) if s == "skip" => Completion::Skip,
                _ => Completion::Keep,
            })
        })
        .build()
        .unwrap();

    let schema = MappingSchema::builder("Parent")
        .target(&root)
        .rule("deep", FieldRule::new(root.append("somethings_deep")).via(&elements))
        .build()
        .unwrap();

    let item = schema
        .map_item(json!({"deep": [{"info": "a"}, {"info": "skip"}, {"info": "c"}]}))
        .unwrap();
    let collected = item.get("somethings_deep").unwrap();
    let infos: Vec<Option<Value>> = collected
        .as_list()
        .unwrap()
        .iter()
        .map(|v| v.as_object().unwrap().get("info"))
        .collect();
    assert_eq!(infos, vec![text("a"), text("c")]);
}

#[test]
fn root_skip_is_reported() {
    let schema = MappingSchema::builder("Skipper")
        .target(&root_data())
        .on_complete(|_| Ok(Completion::Skip))
        .build()
        .unwrap();
    let err = schema.map_item(Record::new()).unwrap_err();
    assert!(matches!(err, MappingError::Skipped(ref name) if name == "Skipper"));
}

// =============================================================================
// Annotation, registry, persistence
// =============================================================================

#[test]
fn annotation_wraps_scalars_with_provenance() {
    let root = root_data();
    let schema = MappingSchema::builder("Annotated")
        .target(&root)
        .annotate(true)
        .rule(
            "special_case",
            FieldRule::new(root.field("id"))
                .path("special_case.an_id")
                .converter(
                    Converter::value("upper", |v: Value| Ok(Value::from(v.to_string().to_uppercase())))
                        .with_doc("Uppercase the id.\nKeeps everything else."),
                ),
        )
        .build()
        .unwrap();

    let item = schema.map_item(simple_row()).unwrap();
    let id = item.get("id").unwrap();
    let annotated = id.as_annotated().unwrap();
    assert_eq!(annotated.value(), &Value::from("MYIMPORTANTID"));
    assert_eq!(annotated.get("path"), Some(&Value::from("special_case.an_id")));
    assert_eq!(annotated.get("MethodExecuted"), Some(&Value::from("upper")));
    assert_eq!(
        annotated.get("MethodDocstring"),
        Some(&Value::List(vec![
            Value::from("Uppercase the id."),
            Value::from("Keeps everything else.")
        ]))
    );
    assert_eq!(item.to_json()["id"]["value"], "MYIMPORTANTID");
}

#[test]
fn registry_falls_back_to_nearest_ancestor() {
    let base = ObjectType::new("Work", ["id"]);
    let song = ObjectType::builder("Song").extends(&base).field("lyrics").build();
    let registry = SchemaRegistry::new();
    registry.maps(
        &base,
        MappingSchema::builder("WorkMapping").target(&base).build().unwrap(),
    );

    assert_eq!(registry.locate(&song).unwrap().name(), "WorkMapping");
    assert!(registry.locate(&ObjectType::new("Other", ["x"])).is_err());
}

#[test]
fn generic_marker_respects_bounds() {
    let media = ObjectType::new("Media", ["id"]);
    let audio = ObjectType::builder("Audio").extends(&media).build();
    let text_ty = ObjectType::new("Text", ["id"]);
    let holder = ObjectType::builder("Holder").param("T", Some(&media)).field("item").build();

    let good = ObjectRef::new(holder.instantiate_with(vec![audio]).unwrap());
    let bad = ObjectRef::new(holder.instantiate_with(vec![text_ty]).unwrap());
    assert!(good.matches(&holder, false));
    assert!(!bad.matches(&holder, false));
    assert!(holder.instantiate_with(Vec::new()).is_err());
}

#[test]
fn each_saves_through_the_type_hook() {
    let saved = Arc::new(AtomicUsize::new(0));
    let counter = saved.clone();
    let track = ObjectType::builder("Track")
        .field("title")
        .on_save(move |object| {
            if object.get("title").is_none() {
                return Err("untitled".to_string());
            }
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();

    let schema = MappingSchema::builder("Tracks")
        .target(&track)
        .rule("title", FieldRule::preserve())
        .build()
        .unwrap();

    for raw in [json!({"title": "One"}), json!({"title": "Two"})] {
        let item = schema.map_item(RawRecord::from(raw)).unwrap();
        schema.each(&item).unwrap();
    }
    assert_eq!(saved.load(Ordering::SeqCst), 2);
}
