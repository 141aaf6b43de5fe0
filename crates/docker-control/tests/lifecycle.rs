//! Container lifecycle tests against a running Docker engine.
//!
//! Run with `cargo test -p docker-control --features docker-tests`.

#![cfg(feature = "docker-tests")]

use docker_control::{ContainerHandle, ContainerSpec, ContainerState, Error, ReusePolicy, connect};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    listener.local_addr().expect("local addr").port()
}

fn postgres_spec(name: &str) -> ContainerSpec {
    ContainerSpec::new(name, "postgres", "11.8-alpine")
        .with_port(free_port(), 5432)
        .with_env("POSTGRES_DB", "main_db")
        .with_env("POSTGRES_USER", "postgres")
        .with_env("POSTGRES_PASSWORD", "pass")
}

#[tokio::test]
async fn create_start_stop_remove_round_trip() {
    let docker = connect().expect("docker engine");
    let name = unique_name("docker-control-lifecycle");
    let cancel = CancellationToken::new();

    let mut handle = ContainerHandle::create_or_reuse(docker, postgres_spec(&name))
        .await
        .expect("create container");
    assert_eq!(handle.state(), ContainerState::Created);

    handle.start(&cancel).await.expect("start container");
    assert_eq!(handle.state(), ContainerState::Running);
    assert!(!handle.ip_address().expect("ip after start").is_empty());

    handle.stop().await.expect("stop container");
    assert_eq!(handle.state(), ContainerState::Stopped);
    // Idempotent: a second stop is a no-op
    handle.stop().await.expect("second stop");

    handle.remove().await.expect("remove container");
    assert_eq!(handle.state(), ContainerState::Removed);
    // Idempotent: a second remove is a no-op
    handle.remove().await.expect("second remove");
}

#[tokio::test]
async fn ip_address_before_start_fails() {
    let docker = connect().expect("docker engine");
    let name = unique_name("docker-control-notstarted");

    let mut handle = ContainerHandle::create_or_reuse(docker, postgres_spec(&name))
        .await
        .expect("create container");

    assert!(matches!(handle.ip_address(), Err(Error::NotStarted { .. })));

    handle.remove().await.expect("remove container");
}

#[tokio::test]
async fn reuse_attaches_and_recreate_replaces() {
    let docker = connect().expect("docker engine");
    let name = unique_name("docker-control-reuse");

    let mut first = ContainerHandle::create_or_reuse(docker.clone(), postgres_spec(&name))
        .await
        .expect("create first container");

    // Same name with reuse-if-exists attaches instead of failing on the
    // name collision.
    let reuse_spec = postgres_spec(&name).with_reuse(ReusePolicy::ReuseIfExists);
    let _attached = ContainerHandle::create_or_reuse(docker.clone(), reuse_spec)
        .await
        .expect("attach to existing container");

    // Always-recreate replaces the existing container outright.
    let mut replaced = ContainerHandle::create_or_reuse(docker, postgres_spec(&name))
        .await
        .expect("recreate container");

    replaced.remove().await.expect("remove container");
    // The original handle now points at a removed container; teardown stays
    // a no-op rather than an error.
    first.remove().await.expect("remove original handle");
}
