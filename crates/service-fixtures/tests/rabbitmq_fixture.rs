//! RabbitMQ fixture tests against a running Docker engine.
//!
//! Run with `cargo test -p service-fixtures --features docker-tests`.

#![cfg(feature = "docker-tests")]

use service_fixtures::{PortAllocator, RabbitMqFixture, RabbitMqOptions, connect};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test]
async fn broker_fixture_end_to_end() {
    init_tracing();
    let docker = connect().expect("docker engine");
    let allocator = PortAllocator::new();
    let cancel = CancellationToken::new();

    let options = RabbitMqOptions::default()
        .with_name(format!("fixtures-rabbit-{}", Uuid::new_v4().simple()))
        .with_host_ports(
            allocator.allocate().expect("allocate amqp port"),
            allocator.allocate().expect("allocate management port"),
        );
    let amqp_port = options.host_amqp_port;

    let fixture = RabbitMqFixture::initialize_with_options(&docker, options, &cancel)
        .await
        .expect("initialize fixture");

    assert_eq!(fixture.amqp_url(), format!("amqp://127.0.0.1:{amqp_port}"));
    assert_eq!(fixture.user(), "rabbit");
    assert_eq!(fixture.password(), "pass");

    // Ready means the broker port actually accepts connections.
    TcpStream::connect(("127.0.0.1", amqp_port))
        .await
        .expect("broker port is reachable");

    fixture.dispose().await;

    // The container is gone; the port no longer accepts connections.
    assert!(TcpStream::connect(("127.0.0.1", amqp_port)).await.is_err());
}
