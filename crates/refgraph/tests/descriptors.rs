//! Descriptor builds: caching, classification, strict and lenient modes.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use refgraph::{
    BuildMode, Field, FieldKind, FieldRef, MarkRequest, ObjectRef, ObjectRegistry, RawKind,
    ReachError, Reflect, RegistryConfig, TypeTable, WeakObjectRef,
};

/// A foreign handle the builder cannot enumerate.
struct Callback(#[allow(dead_code)] u64);

impl Field for Callback {
    fn raw_kind() -> RawKind {
        RawKind::Other("callback")
    }

    fn view(&self) -> FieldRef<'_> {
        FieldRef::Empty
    }
}

#[derive(Reflect)]
struct Widget {
    target: ObjectRef,
    on_click: Callback,
}

#[allow(dead_code)]
#[derive(Reflect)]
struct Tree {
    children: Vec<Tree>,
    owner: Option<ObjectRef>,
}

#[derive(Reflect, Default)]
struct Transform {
    scale: f32,
    parent: Option<ObjectRef>,
}

#[derive(Reflect, Default)]
struct Everything {
    direct: Option<ObjectRef>,
    weak: Option<WeakObjectRef>,
    list: VecDeque<ObjectRef>,
    set: BTreeSet<ObjectRef>,
    hashed: HashSet<ObjectRef>,
    keyed: HashMap<ObjectRef, String>,
    valued: HashMap<String, Vec<ObjectRef>>,
    fixed: [Option<ObjectRef>; 2],
    nested: Transform,
    nested_list: Vec<Transform>,
    names: Vec<String>,
    counters: HashMap<String, u64>,
}

#[test]
fn test_descriptor_is_cached() {
    let table = TypeTable::new(BuildMode::Strict);
    let first = table.descriptor::<Everything>().unwrap();
    let second = table.descriptor::<Everything>().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(table.contains::<Everything>());
    assert!(table.contains::<Transform>());
}

#[test]
fn test_classification() {
    let table = TypeTable::new(BuildMode::Strict);
    let descriptor = table.descriptor::<Everything>().unwrap();

    let names: Vec<_> = descriptor.fields().iter().map(|f| f.name()).collect();
    assert_eq!(
        names,
        [
            "direct",
            "weak",
            "list",
            "set",
            "hashed",
            "keyed",
            "valued",
            "fixed",
            "nested",
            "nested_list",
        ]
    );

    let kind = |name: &str| descriptor.field(name).unwrap().kind().clone();
    assert!(matches!(
        kind("direct"),
        FieldKind::Optional(e) if matches!(*e, FieldKind::DirectStrong)
    ));
    assert!(matches!(kind("weak"), FieldKind::Optional(e) if matches!(*e, FieldKind::DirectWeak)));
    assert!(matches!(kind("list"), FieldKind::Array(_)));
    assert!(matches!(kind("set"), FieldKind::Set(_)));
    assert!(matches!(kind("hashed"), FieldKind::Set(_)));
    assert!(matches!(kind("keyed"), FieldKind::Map { key: Some(_), value: None }));
    assert!(matches!(kind("valued"), FieldKind::Map { key: None, value: Some(_) }));
    assert!(matches!(kind("fixed"), FieldKind::Array(_)));
    assert!(matches!(kind("nested"), FieldKind::NestedStruct(d) if d.type_name() == "Transform"));
    assert!(matches!(
        kind("nested_list"),
        FieldKind::Array(e) if matches!(*e, FieldKind::NestedStruct(_))
    ));

    assert!(descriptor.field("names").is_none());
    assert!(descriptor.field("counters").is_none());
    assert!(!descriptor.field("weak").unwrap().kind().holds_strong());
    assert_eq!(descriptor.strong_fields().count(), 9);
}

#[test]
fn test_every_container_is_walked() {
    let mut registry = ObjectRegistry::new();
    let targets: Vec<_> = (0..9)
        .map(|_| registry.spawn(Transform::default()).unwrap())
        .collect();
    let watched = registry.spawn(Transform::default()).unwrap();

    let holder = registry
        .spawn(Everything {
            direct: Some(targets[0]),
            weak: Some(watched.downgrade()),
            list: [targets[1]].into(),
            set: [targets[2]].into(),
            hashed: [targets[3]].into(),
            keyed: [(targets[4], "four".to_owned())].into(),
            valued: [("five".to_owned(), vec![targets[5]])].into(),
            fixed: [Some(targets[6]), None],
            nested: Transform {
                scale: 1.0,
                parent: Some(targets[7]),
            },
            nested_list: vec![Transform {
                scale: 2.0,
                parent: Some(targets[8]),
            }],
            names: vec!["x".to_owned()],
            counters: HashMap::new(),
        })
        .unwrap();
    registry.add_to_root(holder).unwrap();

    registry.mark(&MarkRequest::new()).unwrap();

    for &target in &targets {
        assert!(registry.is_reachable(target), "{target} not reached");
    }
    assert!(!registry.is_reachable(watched));

    let mut fields: Vec<_> = registry
        .outgoing_references(holder)
        .unwrap()
        .into_iter()
        .map(|(_, field)| field)
        .collect();
    fields.sort_unstable();
    assert_eq!(
        fields,
        [
            "direct",
            "fixed",
            "hashed",
            "keyed",
            "list",
            "nested",
            "nested_list",
            "set",
            "valued"
        ]
    );
}

#[test]
fn test_strict_rejects_unknown_kind() {
    let table = TypeTable::new(BuildMode::Strict);
    let err = table.descriptor::<Widget>().unwrap_err();

    assert_eq!(
        err,
        ReachError::UnknownFieldKind {
            type_name: "Widget",
            field: "on_click",
            kind: "callback",
        }
    );
    assert!(!table.contains::<Widget>());

    let mut registry =
        ObjectRegistry::with_config(RegistryConfig::default().with_build_mode(BuildMode::Strict));
    let target = registry.spawn(Transform::default()).unwrap();
    assert!(registry
        .spawn(Widget {
            target,
            on_click: Callback(0),
        })
        .is_err());
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_lenient_skips_unknown_kind() {
    let table = TypeTable::new(BuildMode::Lenient);
    let descriptor = table.descriptor::<Widget>().unwrap();

    assert_eq!(descriptor.fields().len(), 1);
    assert_eq!(descriptor.fields()[0].name(), "target");

    let mut registry =
        ObjectRegistry::with_config(RegistryConfig::default().with_build_mode(BuildMode::Lenient));
    let target = registry.spawn(Transform::default()).unwrap();
    let widget = registry
        .spawn(Widget {
            target,
            on_click: Callback(0),
        })
        .unwrap();
    registry.add_to_root(widget).unwrap();
    registry.mark(&MarkRequest::new()).unwrap();
    assert!(registry.is_reachable(target));
}

#[test]
fn test_recursive_struct_is_detected() {
    let table = TypeTable::new(BuildMode::Strict);
    assert_eq!(
        table.descriptor::<Tree>().unwrap_err(),
        ReachError::RecursiveStruct {
            type_name: "Tree",
            field: "children",
        }
    );

    let lenient = TypeTable::new(BuildMode::Lenient);
    let descriptor = lenient.descriptor::<Tree>().unwrap();
    let names: Vec<_> = descriptor.fields().iter().map(|f| f.name()).collect();
    assert_eq!(names, ["owner"]);
}

#[test]
fn test_type_table_is_shared() {
    let table = Arc::new(TypeTable::new(BuildMode::Strict));
    let mut first = ObjectRegistry::with_type_table(Arc::clone(&table), RegistryConfig::default());
    let mut second = ObjectRegistry::with_type_table(Arc::clone(&table), RegistryConfig::default());

    let a = first.spawn(Transform::default()).unwrap();
    let b = second.spawn(Transform::default()).unwrap();

    assert!(Arc::ptr_eq(
        first.record(a).unwrap().descriptor(),
        second.record(b).unwrap().descriptor()
    ));
    assert!(Arc::ptr_eq(first.type_table(), &table));
}

#[test]
fn test_concurrent_builds_agree() {
    let table = Arc::new(TypeTable::new(BuildMode::Strict));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let table = Arc::clone(&table);
            std::thread::spawn(move || table.descriptor::<Everything>().unwrap())
        })
        .collect();
    let descriptors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for descriptor in &descriptors[1..] {
        assert!(Arc::ptr_eq(&descriptors[0], descriptor));
    }
}
