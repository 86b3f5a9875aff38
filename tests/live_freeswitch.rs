//! Integration tests against a live FreeSWITCH instance.
//!
//! These tests need FreeSWITCH ESL reachable with the settings from the
//! `FREESWITCH_ESL_*` environment variables (defaults: localhost:8021, ClueCon).
//! Run with: cargo test --test live_freeswitch -- --ignored

use freeswitch_event_socket::{
    EslConfig, EslError, EslEventType, EventSocket, InboundSocket,
};
use std::time::Duration;

async fn connect() -> EventSocket {
    let config = EslConfig::from_env().expect("invalid FREESWITCH_ESL_* settings");
    InboundSocket::connect(&config)
        .await
        .expect("failed to connect to FreeSWITCH")
}

#[tokio::test]
#[ignore]
async fn live_connect_and_status() {
    let socket = connect().await;
    assert!(socket.is_connected());

    let resp = socket
        .send_api("status")
        .await
        .unwrap();
    let body = resp
        .body()
        .expect("status should have body");
    assert!(body.contains("UP"), "expected UP in status: {}", body);
}

#[tokio::test]
#[ignore]
async fn live_wrong_password() {
    let config = EslConfig {
        password: "definitely-not-the-password".to_string(),
        ..EslConfig::from_env().unwrap()
    };
    assert!(matches!(
        InboundSocket::connect(&config).await,
        Err(EslError::Authentication { .. })
    ));
}

#[tokio::test]
#[ignore]
async fn live_subscribe_and_recv_heartbeat() {
    let socket = connect().await;
    let mut events = socket.events();

    socket
        .subscribe_events(&[EslEventType::Heartbeat])
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(25), async {
        loop {
            let event = events
                .recv()
                .await
                .expect("connection closed");
            if event.is_event_type(EslEventType::Heartbeat) {
                return event;
            }
        }
    })
    .await
    .expect("timeout waiting for heartbeat");

    assert!(event
        .header("Core-UUID")
        .is_some());
}

#[tokio::test]
#[ignore]
async fn live_api_multiple_commands() {
    let socket = connect().await;
    let (version, hostname, vars) = tokio::join!(
        socket.send_api("version"),
        socket.send_api("hostname"),
        socket.send_api("global_getvar"),
    );
    assert!(version
        .unwrap()
        .body()
        .unwrap_or_default()
        .contains("FreeSWITCH"));
    assert!(!hostname
        .unwrap()
        .body()
        .unwrap_or_default()
        .is_empty());
    assert!(vars
        .unwrap()
        .is_success());
}

#[tokio::test]
#[ignore]
async fn live_api_err_body() {
    let socket = connect().await;
    let resp = socket
        .send_api("nonexistent_command_xyz")
        .await
        .unwrap();
    assert!(!resp.is_success());
    assert!(resp
        .error_message()
        .is_some());
}

#[tokio::test]
#[ignore]
async fn live_background_job() {
    let socket = connect().await;
    let result = socket
        .background_job("status", None, None)
        .await
        .unwrap();
    assert!(result.success, "bgapi status failed: {:?}", result.body);
    assert!(result
        .body
        .unwrap_or_default()
        .contains("UP"));
}

#[tokio::test]
#[ignore]
async fn live_execute_on_parked_call() {
    let socket = connect().await;
    let resp = socket
        .send_api("originate null/test &park()")
        .await
        .unwrap();
    let Some(uuid) = resp
        .body()
        .and_then(|body| body.strip_prefix("+OK "))
        .map(str::to_string)
    else {
        eprintln!("originate failed ({:?}), skipping", resp.body());
        return;
    };

    let completed = socket
        .execute_application(&uuid, "set", Some("live_test=1"), Default::default())
        .await
        .unwrap();
    assert!(completed.is_some(), "set did not complete on {}", uuid);

    let var = socket
        .send_api(&format!("uuid_getvar {} live_test", uuid))
        .await
        .unwrap();
    assert_eq!(var.body(), Some("1"));

    socket
        .send_api(&format!("uuid_kill {}", uuid))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn live_exit() {
    let socket = connect().await;
    socket
        .exit()
        .await
        .unwrap();
    assert!(!socket.is_connected());
}
