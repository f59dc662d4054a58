//! Integration tests for component resolution and initialization.

mod common;

use std::sync::Arc;
use std::time::Duration;

use fabrun::Error;
use fabrun::Runtime;
use fabrun::StaticHost;
use fabrun::config::AppConfig;
use fabrun::lazy::CellState;
use fabrun::registry;

use common::CACHE;
use common::Cache;
use common::CacheFixture;
use common::FRONTEND;
use common::Frontend;

// --- Test 1: Singleton resolution under contention ---

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_first_resolution_runs_factory_once() {
    let fixture = CacheFixture::slow(Duration::from_millis(50));
    let runtime = common::single([fixture.registration()]);

    let mut tasks = Vec::new();
    for _ in 0..128 {
        let runtime = runtime.clone();
        tasks.push(tokio::spawn(async move { runtime.get::<dyn Cache>().await }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.expect("join").expect("resolve"));
    }

    assert_eq!(fixture.inits(), 1);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));

    let component = runtime.component(CACHE).expect("component");
    assert_eq!(component.states().implementation, CellState::Done);
    assert_eq!(component.states().stub, CellState::Unstarted);
}

// --- Test 2: Factory errors are cached ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_factory_is_never_rerun() {
    let fixture = CacheFixture::failing();
    let runtime = common::single([fixture.registration()]);

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let runtime = runtime.clone();
        tasks.push(tokio::spawn(async move { runtime.get::<dyn Cache>().await.err() }));
    }

    let mut errors = Vec::new();
    for task in tasks {
        errors.push(task.await.expect("join").expect("resolution should fail"));
    }
    let later = runtime.get::<dyn Cache>().await.err().expect("still failing");

    assert_eq!(fixture.inits(), 1);
    assert!(errors.iter().all(|e| e == &later));
    assert!(matches!(
        later,
        Error::Init { ref component, ref reason } if component == CACHE && reason.contains("disk on fire")
    ));
}

// --- Test 3: Routing declaration is mandatory ---

#[test]
fn test_registration_without_routing_is_rejected() {
    let err = CacheFixture::new().builder().build().expect_err("must be rejected");
    assert_eq!(err, registry::Error::MissingRouting(CACHE.into()));
}

#[test]
fn test_routed_methods_on_unrouted_cache_are_rejected() {
    let err = CacheFixture::new()
        .builder()
        .unrouted()
        .build()
        .expect_err("must be rejected");
    assert!(matches!(err, registry::Error::Invalid { .. }));
}

// --- Test 4: Reference injection ---

#[tokio::test]
async fn test_declared_reference_is_injected() {
    let fixture = CacheFixture::new();
    let runtime = common::single([fixture.registration(), common::frontend(true)]);

    let cache = runtime.get::<dyn Cache>().await.expect("cache");
    cache.put("apple".into(), "red".into()).await.expect("put");

    let frontend = runtime.get::<dyn Frontend>().await.expect("frontend");
    assert_eq!(frontend.lookup("apple".into()).await.expect("lookup"), "red");
    assert_eq!(
        frontend.lookup("pear".into()).await,
        Err(Error::application("pear not found"))
    );

    // The frontend reaches the cache under its own caller name, sharing the
    // one cache implementation.
    assert_eq!(fixture.inits(), 1);
    let by_frontend = runtime.metrics().method(FRONTEND, CACHE, "Get", false);
    assert_eq!(by_frontend.count.get(), 2);
}

#[tokio::test]
async fn test_undeclared_reference_fails_initialization() {
    let runtime = common::single([CacheFixture::new().registration(), common::frontend(false)]);

    let err = runtime.get::<dyn Frontend>().await.err().expect("must fail");
    match err {
        Error::Init { component, reason } => {
            assert_eq!(component, FRONTEND);
            assert!(reason.contains("without declaring"), "{}", reason);
        }
        other => panic!("unexpected error: {}", other),
    }
}

// --- Test 5: Configuration binding ---

#[tokio::test]
async fn test_config_section_binds_into_factory() {
    let config = AppConfig::from_toml_str("[\"shop/Cache\"]\nSize = 1\n").expect("config");
    let runtime = Runtime::builder()
        .registry(common::registry([CacheFixture::new().registration()]))
        .config(config)
        .build()
        .expect("runtime");

    let cache = runtime.get::<dyn Cache>().await.expect("cache");
    cache.put("a".into(), "1".into()).await.expect("first put fits");
    assert_eq!(
        cache.put("b".into(), "2".into()).await,
        Err(Error::application("cache full"))
    );
}

#[test]
fn test_unknown_config_key_fails_startup() {
    let config = AppConfig::from_toml_str("[\"shop/Cache\"]\nBogus = 1\n").expect("config");
    let err = Runtime::builder()
        .registry(common::registry([CacheFixture::new().registration()]))
        .config(config)
        .build()
        .expect_err("startup must fail");
    assert!(matches!(err, Error::Config(_)));
}

// --- Test 6: Listeners ---

#[tokio::test]
async fn test_listener_renders_bound_address() {
    let config = AppConfig::from_toml_str("[listeners]\nweb = { local_address = \"127.0.0.1:0\" }\n")
        .expect("config");
    let runtime = Runtime::builder()
        .registry(common::registry([CacheFixture::new().registration(), common::frontend(true)]))
        .config(config)
        .build()
        .expect("runtime");

    let frontend = runtime.get::<dyn Frontend>().await.expect("frontend");
    let address = frontend.address().await.expect("address");
    assert!(address.starts_with("127.0.0.1:"), "{}", address);
    assert!(!address.ends_with(":0"));
}

#[tokio::test]
async fn test_listener_renders_proxy_address() {
    let host = StaticHost::single_process().proxy("web", "shop.example:443");
    let runtime = Runtime::builder()
        .registry(common::registry([CacheFixture::new().registration(), common::frontend(true)]))
        .host(Arc::new(host))
        .build()
        .expect("runtime");

    let frontend = runtime.get::<dyn Frontend>().await.expect("frontend");
    assert_eq!(frontend.address().await.expect("address"), "shop.example:443");
}

// --- Test 7: Registry lifecycle ---

#[test]
fn test_runtime_freezes_its_registry() {
    let registry = common::registry([CacheFixture::new().registration()]);
    let _runtime = Runtime::builder()
        .registry(registry.clone())
        .build()
        .expect("runtime");

    let err = registry.register(common::frontend(true)).expect_err("frozen");
    assert_eq!(err, registry::Error::Frozen(FRONTEND.into()));
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let registry = common::registry([CacheFixture::new().registration()]);
    let err = registry
        .register(CacheFixture::new().registration())
        .expect_err("duplicate");
    assert_eq!(err, registry::Error::Duplicate(CACHE.into()));
}
