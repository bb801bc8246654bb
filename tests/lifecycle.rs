//! Cross-façade lifecycle tests driven through the public API with a
//! recording transport.

use std::time::{Duration, Instant};

use machine_client::{
    ComponentConfig, ComponentState, ConfigBrowserConfig, ConfigClient, ConnectionState,
    Envelope, LauncherClient, LauncherConfig, MessageType, ProtocolParameters,
    RecordingTransport, RemoteComponent, StatusChannel, StatusClient, StatusConfig,
    TransportAction,
};

const INTERVAL: Duration = Duration::from_secs(3);

// Initialize tracing once for test logging; repeat calls are no-ops.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn full_update(payload: &str, keepalive_ms: u64) -> Vec<u8> {
    let mut env = Envelope::new(MessageType::FullUpdate).with_payload(payload);
    env.pparams = Some(ProtocolParameters {
        keepalive_timer_ms: keepalive_ms,
    });
    env.encode().unwrap()
}

fn ack() -> Vec<u8> {
    Envelope::new(MessageType::PingAcknowledge).encode().unwrap()
}

#[test]
fn test_status_client_full_lifecycle_and_restart() {
    init_tracing();
    let mut client = StatusClient::new(
        StatusConfig::new("10.0.0.1:5550"),
        RecordingTransport::new(),
    )
    .unwrap();
    let now = Instant::now();

    client.start(); // Disconnected -> Connecting
    for topic in ["motion", "config", "io", "task", "interp"] {
        client.handle_message(topic, &full_update("{}", 2000), now);
    }
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.synced());

    client.stop();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!client.synced());

    // A stopped client can be started again.
    client.start();
    assert_eq!(client.state(), ConnectionState::Connecting);
    for topic in ["motion", "config", "io", "task", "interp"] {
        client.handle_message(topic, &full_update("{}", 2000), now);
    }
    assert!(client.synced());
}

#[test]
fn test_status_synced_never_observed_outside_connected() {
    init_tracing();
    let mut client = StatusClient::new(
        StatusConfig::new("10.0.0.1:5550"),
        RecordingTransport::new(),
    )
    .unwrap();
    let now = Instant::now();

    let check = |client: &StatusClient<RecordingTransport>| {
        if client.synced() {
            assert_eq!(client.state(), ConnectionState::Connected);
        }
    };

    client.start();
    check(&client);
    for topic in ["motion", "config", "io", "task", "interp"] {
        client.handle_message(topic, &full_update("{}", 1000), now);
        check(&client);
    }
    assert!(client.synced());

    // Timeout exits Connected; sync must drop with it.
    client.poll_heartbeat(now + Duration::from_millis(2000));
    check(&client);
    assert_eq!(client.state(), ConnectionState::Timeout);
    assert!(!client.synced());
}

#[test]
fn test_launcher_recovers_after_command_timeout() {
    init_tracing();
    let mut client = LauncherClient::new(
        LauncherConfig::new("10.0.0.1:5560", "10.0.0.1:5561"),
        RecordingTransport::new(),
        RecordingTransport::new(),
    )
    .unwrap();
    let now = Instant::now();

    client.start(now);
    client.handle_command_message(&ack());
    client.handle_subscribe_message("launcher", &full_update("[]", 60000), now);
    assert_eq!(client.state(), ConnectionState::Connected);

    // Two silent periods on the command channel: probe, then timeout.
    client.poll_heartbeats(now + INTERVAL);
    client.poll_heartbeats(now + 2 * INTERVAL);
    assert_eq!(client.state(), ConnectionState::Timeout);
    assert!(!client.connected());

    // The probe kept firing; a late acknowledge restores the connection.
    client.handle_command_message(&ack());
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.connected());
}

#[test]
fn test_config_browse_flow() {
    init_tracing();
    let mut client = ConfigClient::new(
        ConfigBrowserConfig::new("10.0.0.1:5570"),
        RecordingTransport::new(),
    )
    .unwrap();
    let now = Instant::now();

    client.start(now);
    client.handle_message(&ack());
    assert_eq!(client.state(), ConnectionState::Connected);

    let describe = Envelope::new(MessageType::DescribeApplication)
        .with_payload(r#"{"name":"mill","description":"3-axis mill"}"#)
        .encode()
        .unwrap();
    client.handle_message(&describe);
    assert_eq!(client.applications().len(), 1);

    client.retrieve_application("mill");
    let detail = Envelope::new(MessageType::ApplicationDetail)
        .with_payload(r#"{"name":"mill","files":["mill.ini","mill.hal"]}"#)
        .encode()
        .unwrap();
    client.handle_message(&detail);
    assert_eq!(
        client.application_detail().unwrap()["files"][1],
        serde_json::Value::from("mill.hal")
    );
}

#[test]
fn test_component_survives_stop_start_cycle() {
    init_tracing();
    let mut component = RemoteComponent::new(
        ComponentConfig::new("10.0.0.1:5580", "10.0.0.1:5581", "anddemo"),
        RecordingTransport::new(),
        RecordingTransport::new(),
    )
    .unwrap();
    component.set_bind_payload(r#"{"pins":[]}"#);
    let now = Instant::now();

    component.start(now);
    component.handle_command_message(&ack());
    let confirm = Envelope::new(MessageType::BindConfirm).encode().unwrap();
    component.handle_command_message(&confirm);
    component.handle_data_message(&full_update("{}", 2000), now);
    assert_eq!(component.state(), ComponentState::Synced);

    component.stop();
    assert_eq!(component.state(), ComponentState::Down);

    component.start(now);
    component.handle_command_message(&ack());
    assert_eq!(component.state(), ComponentState::Binding);
}

#[test]
fn test_component_error_requires_explicit_restart() {
    init_tracing();
    let mut component = RemoteComponent::new(
        ComponentConfig::new("10.0.0.1:5580", "10.0.0.1:5581", "anddemo"),
        RecordingTransport::new(),
        RecordingTransport::new(),
    )
    .unwrap();
    component.set_bind_payload(r#"{"pins":[]}"#);
    let now = Instant::now();

    component.start(now);
    component.handle_command_message(&ack());
    let reject = Envelope::new(MessageType::BindReject)
        .with_notes(["unknown component"])
        .encode()
        .unwrap();
    component.handle_command_message(&reject);
    assert_eq!(component.state(), ComponentState::Error);

    // Liveness timers are stopped in Error; silent periods change nothing.
    component.poll_heartbeats(now + 10 * INTERVAL);
    assert_eq!(component.state(), ComponentState::Error);

    component.stop();
    component.start(now);
    assert_eq!(component.state(), ComponentState::Trying);
    assert!(component.error().is_none());
}

#[test]
fn test_invalid_configuration_is_rejected_up_front() {
    init_tracing();
    assert!(StatusClient::new(StatusConfig::new(""), RecordingTransport::new()).is_err());
    assert!(StatusClient::new(
        StatusConfig::new("tcp://10.0.0.1"),
        RecordingTransport::new()
    )
    .is_err());

    let mut config = LauncherConfig::new("10.0.0.1:5560", "10.0.0.1:5561");
    config.identity = String::new();
    assert!(LauncherClient::new(
        config,
        RecordingTransport::new(),
        RecordingTransport::new()
    )
    .is_err());
}

#[test]
fn test_status_error_cleanup_is_atomic() {
    init_tracing();
    let mut client = StatusClient::new(
        StatusConfig::new("10.0.0.1:5550"),
        RecordingTransport::new(),
    )
    .unwrap();
    let now = Instant::now();

    client.start();
    for topic in ["motion", "config", "io", "task", "interp"] {
        client.handle_message(topic, &full_update("{}", 2000), now);
    }

    let err = Envelope::new(MessageType::Error)
        .with_notes(["estop"])
        .encode()
        .unwrap();
    client.handle_message("motion", &err, now);

    // By the time the error is observable the transport is already closed
    // and every channel unsubscribed.
    assert_eq!(client.state(), ConnectionState::Error);
    assert_eq!(client.error_string(), "estop");
    assert!(client
        .transport()
        .actions
        .contains(&TransportAction::Close));
    for channel in [StatusChannel::MOTION, StatusChannel::TASK] {
        assert!(!client
            .transport()
            .subscriptions()
            .contains(&channel.topic().to_string()));
    }
}
