//! `is_referenced`, `referencers` and the flag scope they run in.

use std::panic::{catch_unwind, AssertUnwindSafe};

use refgraph::{
    Keep, MarkRequest, ObjectFlags, ObjectRef, ObjectRegistry, PassPhase, ReachError,
    ReferenceQuery, Reflect, RegistryConfig, ScopedFlagMarker, SpawnParams, OUTER_FIELD,
};

#[derive(Reflect, Default)]
struct Node {
    items: Vec<ObjectRef>,
    parent: Option<ObjectRef>,
}

fn spawn(registry: &mut ObjectRegistry) -> ObjectRef {
    registry.spawn(Node::default()).unwrap()
}

fn spawn_in(registry: &mut ObjectRegistry, outer: ObjectRef) -> ObjectRef {
    registry
        .spawn_with(Node::default(), SpawnParams::new().with_outer(outer))
        .unwrap()
}

fn link(registry: &mut ObjectRegistry, from: ObjectRef, to: ObjectRef) {
    registry.get_mut::<Node>(from).unwrap().items.push(to);
}

fn all_flags(registry: &ObjectRegistry) -> Vec<(ObjectRef, ObjectFlags)> {
    registry.iter().map(|r| (r.id(), r.flags())).collect()
}

#[test]
fn test_isolated_object_is_not_referenced() {
    // A(root) -> B -> C, D alone
    let mut registry = ObjectRegistry::new();
    let a = spawn(&mut registry);
    let b = spawn(&mut registry);
    let c = spawn(&mut registry);
    let d = spawn(&mut registry);
    link(&mut registry, a, b);
    link(&mut registry, b, c);
    registry.add_to_root(a).unwrap();

    let query = ReferenceQuery::default();
    assert!(!registry.is_referenced(d, &query).unwrap());
    assert!(registry.is_referenced(c, &query).unwrap());
}

#[test]
fn test_shared_target() {
    // A(root) -> B, C -> B
    let mut registry = ObjectRegistry::new();
    let a = spawn(&mut registry);
    let b = spawn(&mut registry);
    let c = spawn(&mut registry);
    link(&mut registry, a, b);
    link(&mut registry, c, b);
    registry.add_to_root(a).unwrap();

    let query = ReferenceQuery::default();
    assert!(!registry.is_referenced(c, &query).unwrap());
    assert!(registry.is_referenced(b, &query).unwrap());

    // Only roots count: B is still referenced through A.
    let roots_only = ReferenceQuery::default().with_keep(Keep::Nothing);
    assert!(registry.is_referenced(b, &roots_only).unwrap());
}

#[test]
fn test_keep_flags_limit_referencers() {
    let mut registry = ObjectRegistry::new();
    let target = spawn(&mut registry);
    let holder = spawn(&mut registry);
    link(&mut registry, holder, target);

    // The holder is neither rooted nor standalone.
    let query = ReferenceQuery::new(ObjectFlags::STANDALONE);
    assert!(!registry.is_referenced(target, &query).unwrap());

    registry.set_flags(holder, ObjectFlags::STANDALONE).unwrap();
    assert!(registry.is_referenced(target, &query).unwrap());
}

#[test]
fn test_self_reference_does_not_count() {
    let mut registry = ObjectRegistry::new();
    let a = spawn(&mut registry);
    link(&mut registry, a, a);

    assert!(!registry.is_referenced(a, &ReferenceQuery::default()).unwrap());
    let report = registry.referencers(a, &ReferenceQuery::default()).unwrap();
    assert!(report.external.is_empty());
    assert!(report.internal.is_empty());
}

#[test]
fn test_subobjects_are_checked() {
    let mut registry = ObjectRegistry::new();
    let package = spawn(&mut registry);
    let inner = spawn_in(&mut registry, package);
    let user = spawn(&mut registry);
    link(&mut registry, user, inner);

    let with_subs = ReferenceQuery::default().with_subobjects(true);
    let report = registry.referencers(package, &with_subs).unwrap();
    assert!(report.is_referenced());
    assert_eq!(report.external.len(), 1);
    assert_eq!(report.external[0].referencer, user);
    assert_eq!(report.external[0].fields, vec!["items"]);
    assert!(report.internal.is_empty());
    assert!(!report.target_reachable);

    registry.get_mut::<Node>(user).unwrap().items.clear();
    assert!(!registry.is_referenced(package, &with_subs).unwrap());
}

#[test]
fn test_inner_references_are_internal() {
    let mut registry = ObjectRegistry::new();
    let package = spawn(&mut registry);
    let inner = spawn_in(&mut registry, package);
    let outsider = spawn(&mut registry);
    link(&mut registry, outsider, package);

    let report = registry
        .referencers(package, &ReferenceQuery::default())
        .unwrap();

    assert_eq!(report.internal.len(), 1);
    assert_eq!(report.internal[0].referencer, inner);
    assert_eq!(report.internal[0].fields, vec![OUTER_FIELD]);
    assert_eq!(report.external.len(), 1);
    assert_eq!(report.external[0].referencer, outsider);
    assert_eq!(report.external[0].total_references, 1);
}

#[test]
fn test_internal_partition_without_outer_edges() {
    let mut registry =
        ObjectRegistry::with_config(RegistryConfig::default().with_outer_keeps_alive(false));
    let package = spawn(&mut registry);
    let inner = spawn_in(&mut registry, package);
    let deeper = spawn_in(&mut registry, inner);
    registry.get_mut::<Node>(deeper).unwrap().parent = Some(package);
    link(&mut registry, deeper, package);

    let report = registry
        .referencers(package, &ReferenceQuery::default())
        .unwrap();

    assert!(report.external.is_empty());
    assert_eq!(report.internal.len(), 1);
    assert_eq!(report.internal[0].referencer, deeper);
    assert_eq!(report.internal[0].total_references, 2);
    assert_eq!(report.internal[0].fields, vec!["items", "parent"]);
    assert!(report.is_referenced());
}

#[test]
fn test_rooted_target_is_referenced() {
    let mut registry = ObjectRegistry::new();
    let a = spawn(&mut registry);
    registry.add_to_root(a).unwrap();

    let report = registry.referencers(a, &ReferenceQuery::default()).unwrap();
    assert!(report.rooted);
    assert!(registry.is_referenced(a, &ReferenceQuery::default()).unwrap());
}

#[test]
fn test_query_errors() {
    let mut registry = ObjectRegistry::new();
    let dead = spawn(&mut registry);
    let junk = spawn(&mut registry);
    registry.destroy(dead).unwrap();
    registry.mark_as_garbage(junk).unwrap();

    let query = ReferenceQuery::default();
    assert_eq!(
        registry.is_referenced(dead, &query),
        Err(ReachError::StaleObject(dead))
    );
    assert_eq!(
        registry.is_referenced(junk, &query),
        Err(ReachError::GarbageObject(junk))
    );
}

#[test]
fn test_flags_are_restored() {
    let mut registry = ObjectRegistry::new();
    let a = spawn(&mut registry);
    let b = spawn(&mut registry);
    let c = spawn_in(&mut registry, b);
    link(&mut registry, a, b);
    registry.add_to_root(a).unwrap();
    registry
        .set_flags(c, ObjectFlags::TAG_EXCLUDED | ObjectFlags::USER_2)
        .unwrap();
    let before = all_flags(&registry);

    let query = ReferenceQuery::default().with_subobjects(true);
    assert!(registry.is_referenced(b, &query).unwrap());

    assert_eq!(all_flags(&registry), before);
    assert_eq!(registry.pass_phase(), PassPhase::Idle);
}

#[test]
fn test_query_pass_cannot_be_swept() {
    let mut registry = ObjectRegistry::new();
    let a = spawn(&mut registry);
    let b = spawn(&mut registry);
    registry.add_to_root(a).unwrap();
    registry.mark(&MarkRequest::new()).unwrap();

    registry.is_referenced(b, &ReferenceQuery::default()).unwrap();

    assert!(matches!(
        registry.sweep_unreachable(),
        Err(ReachError::InvalidPassState { .. })
    ));
}

#[test]
fn test_panicking_keep_predicate_poisons_registry() {
    let mut registry = ObjectRegistry::new();
    let target = spawn(&mut registry);
    let bystander = spawn(&mut registry);
    registry.set_flags(bystander, ObjectFlags::USER_0).unwrap();
    let before = all_flags(&registry);

    let query = ReferenceQuery::default().with_keep(Keep::Predicate(|_| panic!("keep predicate")));
    let result = catch_unwind(AssertUnwindSafe(|| registry.is_referenced(target, &query)));
    assert!(result.is_err());

    // Flags are restored on unwind, but the pass never completed.
    assert_eq!(all_flags(&registry), before);
    assert_eq!(registry.pass_phase(), PassPhase::Marking);
    assert_eq!(
        registry.mark(&MarkRequest::new()).unwrap_err(),
        ReachError::InvalidPassState {
            phase: PassPhase::Marking
        }
    );
    assert!(registry
        .is_referenced(target, &ReferenceQuery::default())
        .is_err());
}

#[test]
fn test_scoped_marker_restores_flags() {
    let mut registry = ObjectRegistry::new();
    let a = spawn(&mut registry);
    let b = spawn(&mut registry);
    let c = spawn(&mut registry);
    link(&mut registry, a, b);
    link(&mut registry, b, c);
    registry.add_to_root(a).unwrap();

    {
        let mut scope = ScopedFlagMarker::new(&mut registry).unwrap();
        assert_eq!(scope.saved_len(), 3);
        scope.set_flags(b, ObjectFlags::USER_3).unwrap();

        let report = scope
            .mark(&MarkRequest::new().with_exclude(ObjectFlags::USER_3))
            .unwrap();
        assert_eq!(report.excluded_hits, 1);
        assert!(scope.is_reachable(b));
        assert!(!scope.is_reachable(c));
        assert_eq!(scope.pass_phase(), PassPhase::FlagsSaved);
        scope.destroy(c).unwrap();
    }

    assert!(registry.flags(b).unwrap().is_empty());
    assert_eq!(registry.pass_phase(), PassPhase::Idle);
    assert!(!registry.contains(c));
}

#[test]
fn test_registry_mark_inside_scope_is_rejected() {
    let mut registry = ObjectRegistry::new();
    spawn(&mut registry);

    let mut scope = ScopedFlagMarker::new(&mut registry).unwrap();
    let inner: &mut ObjectRegistry = &mut scope;
    assert_eq!(
        inner.mark(&MarkRequest::new()).unwrap_err(),
        ReachError::InvalidPassState {
            phase: PassPhase::FlagsSaved
        }
    );
}

#[test]
fn test_leaked_marker_blocks_passes() {
    let mut registry = ObjectRegistry::new();
    let a = spawn(&mut registry);

    std::mem::forget(ScopedFlagMarker::new(&mut registry).unwrap());

    assert_eq!(registry.pass_phase(), PassPhase::FlagsSaved);
    assert!(matches!(
        registry.mark(&MarkRequest::new()),
        Err(ReachError::InvalidPassState {
            phase: PassPhase::FlagsSaved
        })
    ));
    assert!(registry.is_referenced(a, &ReferenceQuery::default()).is_err());
    assert!(ScopedFlagMarker::new(&mut registry).is_err());
}
