use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration, Utc};
use gatehouse_auth::{
    AuthzPolicy, EffectiveGrants, EndpointRegistry, EndpointRuleRow, PermissionKey, RequestContext,
    RoleGrantRow, RoleGrants, RoleRow, RoleStatus, RuleBindingRow, UserPrincipal, authorize,
};
use gatehouse_core::{RoleId, RuleId, UserId};
use gatehouse_infra::{
    AuthorizationEngine, AuthzCaches, AuthzIndexes, AuthzStore, FetchPolicy, InMemoryAuthzStore,
    administrator_role_id,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Rule rows for `/resource/{i}` GET, each enforcing `Resource{i}.Read`.
fn rows(count: usize) -> (Vec<EndpointRuleRow>, Vec<RuleBindingRow>, HashSet<PermissionKey>) {
    let mut rules = Vec::with_capacity(count);
    let mut bindings = Vec::with_capacity(count);
    let mut keys = HashSet::with_capacity(count);
    for i in 0..count {
        let id = RuleId::new();
        let key = PermissionKey::new(format!("Resource{i}.Read"));
        rules.push(EndpointRuleRow {
            id,
            path: format!("/resource/{i}"),
            method: "GET".to_string(),
            require_authentication: true,
            description: None,
            retired: false,
        });
        bindings.push(RuleBindingRow {
            rule_id: id,
            permission_key: key.clone(),
            enforced: true,
            retired: false,
        });
        keys.insert(key);
    }
    (rules, bindings, keys)
}

fn principal(roles: Vec<RoleId>) -> UserPrincipal {
    let now = Utc::now();
    UserPrincipal {
        user_id: UserId::new(),
        role_ids: roles,
        issued_at: now - Duration::minutes(1),
        expires_at: now + Duration::hours(1),
    }
}

fn bench_registry_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_build");

    for count in [10, 100, 1000, 10000].iter() {
        let (rules, bindings, keys) = rows(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                let registry = EndpointRegistry::build(rules.clone(), bindings.clone(), &keys);
                black_box(registry.len())
            });
        });
    }

    group.finish();
}

fn bench_pure_decision(c: &mut Criterion) {
    let mut group = c.benchmark_group("pure_decision");
    group.sample_size(1000);

    let (rules, bindings, keys) = rows(1000);
    let registry = EndpointRegistry::build(rules, bindings, &keys);
    let policy = AuthzPolicy::default();

    let role_id = RoleId::new();
    let role = RoleRow {
        id: role_id,
        name: "Reader".to_string(),
        status: RoleStatus::Active,
        retired: false,
    };
    let grants = RoleGrants::build(
        role_id,
        Some(role),
        [RoleGrantRow {
            role_id,
            permission_key: PermissionKey::new("Resource500.Read"),
            retired: false,
        }],
        &keys,
    );
    let ctx = RequestContext::new("/resource/500", "GET").with_principal(principal(vec![role_id]));

    group.bench_function("allow_with_grants", |b| {
        b.iter(|| {
            let rule = registry.resolve(&ctx.path, &ctx.method);
            let verdict = authorize(rule.as_deref(), &ctx, &policy, Utc::now(), |_| {
                EffectiveGrants::union([&grants])
            });
            black_box(verdict)
        });
    });

    group.bench_function("unmatched_route", |b| {
        let miss = RequestContext::new("/nowhere", "GET");
        b.iter(|| {
            let rule = registry.resolve(&miss.path, &miss.method);
            black_box(authorize(rule.as_deref(), &miss, &policy, Utc::now(), |_| {
                EffectiveGrants::default()
            }))
        });
    });

    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_decide");
    group.sample_size(1000);

    let rt = tokio::runtime::Runtime::new().unwrap();
    let ctx = RequestContext::new("/admin/authz/rules", "GET")
        .with_principal(principal(vec![administrator_role_id()]));

    let engine = {
        let store = Arc::new(InMemoryAuthzStore::seeded());
        let indexes = Arc::new(AuthzIndexes::new(store, Arc::new(AuthzCaches::new()), FetchPolicy::default()));
        AuthorizationEngine::new(indexes, AuthzPolicy::default(), Arc::new(Default::default()))
    };

    group.bench_function("warm_cache", |b| {
        rt.block_on(engine.decide(&ctx));
        b.iter(|| black_box(rt.block_on(engine.decide(&ctx))));
    });

    group.bench_function("cold_after_invalidation", |b| {
        b.iter(|| {
            engine.indexes().caches().rules_changed();
            engine.indexes().caches().role_changed(administrator_role_id());
            black_box(rt.block_on(engine.decide(&ctx)))
        });
    });

    group.bench_function("seeded_store_scan", |b| {
        let store = InMemoryAuthzStore::seeded();
        b.iter(|| black_box(rt.block_on(store.active_rules()).unwrap().len()));
    });

    group.finish();
}

criterion_group!(benches, bench_registry_build, bench_pure_decision, bench_engine);
criterion_main!(benches);
