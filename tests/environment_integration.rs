use std::sync::Arc;
use std::time::Duration;

use svc_router::accessor::Accessor;
use svc_router::discovery::{FakeBackend, ServiceEntry, Watch};
use svc_router::environment::{AccessorFactory, Environment};
use svc_router::ring::Ring;

fn factory() -> AccessorFactory {
    Arc::new(|instances: &[String]| Accessor::ring(Ring::build(instances.to_vec(), 211)))
}

#[tokio::test]
async fn watch_reflects_backend_updates_through_the_accessor() {
    let backend = Arc::new(FakeBackend::new());
    backend.set_service(
        "payments",
        vec![ServiceEntry {
            address: "10.0.0.1".to_string(),
            port: 8080,
            tags: vec![],
        }],
    );

    let env = Environment::new(backend.clone(), "https".to_string(), factory());
    let key = env
        .ensure_watch(Watch {
            service: "payments".to_string(),
            tag: None,
            other_tags: vec![],
            passing_only: true,
            datacenter: None,
        })
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let accessor = env.accessor_for(&key);
    let result = accessor.get(b"any-key");
    assert_eq!(result.instance, "https://10.0.0.1:8080");
    assert!(result.error.is_none());

    backend.set_service(
        "payments",
        vec![ServiceEntry {
            address: "10.0.0.2".to_string(),
            port: 9090,
            tags: vec![],
        }],
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    let result = accessor.get(b"any-key");
    assert_eq!(result.instance, "https://10.0.0.2:9090");

    env.close().await;
}

#[tokio::test]
async fn backend_errors_surface_as_sticky_accessor_errors() {
    let backend = Arc::new(FakeBackend::new());
    backend.set_service("payments", vec![]);

    let env = Environment::new(backend.clone(), "https".to_string(), factory());
    let key = env
        .ensure_watch(Watch {
            service: "payments".to_string(),
            tag: None,
            other_tags: vec![],
            passing_only: true,
            datacenter: None,
        })
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    backend.fail_service("payments", svc_router::error::ServiceError::Backend("boom".to_string()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let accessor = env.accessor_for(&key);
    let result = accessor.get(b"any-key");
    assert!(matches!(result.error, Some(svc_router::error::ServiceError::Backend(_))));

    env.close().await;
}

#[tokio::test]
async fn register_then_deregister_round_trips_through_the_backend() {
    let backend = Arc::new(FakeBackend::new());
    backend.set_service("irrelevant", vec![]);

    let env = Environment::new(backend.clone(), "https".to_string(), factory());
    env.register(
        backend.clone(),
        "checkout".to_string(),
        Some("checkout-1".to_string()),
        "10.0.0.5".to_string(),
        8443,
        vec!["primary".to_string()],
        &[],
    )
    .await
    .unwrap();

    assert!(backend.is_registered("checkout-1"));

    env.deregister("10.0.0.5:8443").await.unwrap();
    assert!(!backend.is_registered("checkout-1"));

    env.close().await;
}
