//! Connection lifecycle against fixed local ports

use std::net::UdpSocket;
use std::sync::Arc;

use livelink_gw::config::LifecycleConfig;
use livelink_gw::connection::{ConnectionManager, ConnectionState};
use livelink_gw::error::ConnectError;
use livelink_gw::osc::{Endpoint, OscTransport};
use serial_test::serial;

const SEND_PORT: u16 = 11000;
const RECEIVE_PORT: u16 = 11001;

fn test_endpoint() -> Endpoint {
    Endpoint {
        host: "127.0.0.1".to_string(),
        send_port: SEND_PORT,
        receive_port: RECEIVE_PORT,
        listen_host: "127.0.0.1".to_string(),
    }
}

fn make_manager() -> ConnectionManager {
    ConnectionManager::new(Arc::new(OscTransport::new()), LifecycleConfig::default())
}

#[tokio::test]
#[serial]
async fn test_connect_reports_info() {
    let manager = make_manager();

    manager.connect(test_endpoint()).await.unwrap();
    assert!(manager.is_connected());
    assert_eq!(manager.state(), ConnectionState::Connected);

    let info = manager.get_connection_info();
    assert!(info.connected);
    assert_eq!(info.send_endpoint.as_deref(), Some("127.0.0.1:11000"));
    assert_eq!(info.receive_port, Some(RECEIVE_PORT));
    assert!(info.handlers_count >= 2);
    assert_eq!(info.connection_attempts, 1);
    assert!(info.ping_age_ms.is_some());

    manager.disconnect().await;
}

#[tokio::test]
#[serial]
async fn test_send_counts_messages() {
    let manager = make_manager();
    manager.connect(test_endpoint()).await.unwrap();

    let before = manager.get_connection_info().messages_sent;
    assert!(manager.transport().send("/live/song/get/tempo", vec![]));
    assert_eq!(manager.get_connection_info().messages_sent, before + 1);

    manager.disconnect().await;
    assert!(!manager.transport().send("/live/song/get/tempo", vec![]));
}

#[tokio::test]
#[serial]
async fn test_reconnect_after_disconnect() {
    let manager = make_manager();

    manager.connect(test_endpoint()).await.unwrap();
    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // The receive port is free again
    manager.connect(test_endpoint()).await.unwrap();
    assert!(manager.is_connected());
    assert_eq!(manager.connection_attempts(), 2);

    manager.disconnect().await;
    manager.disconnect().await;
    assert!(!manager.is_connected());
    assert!(manager.get_connection_info().ping_age_ms.is_none());
}

#[tokio::test]
#[serial]
async fn test_connect_twice_replaces_connection() {
    let manager = make_manager();

    manager.connect(test_endpoint()).await.unwrap();
    manager.connect(test_endpoint()).await.unwrap();
    assert!(manager.is_connected());

    manager.disconnect().await;
}

#[tokio::test]
#[serial]
async fn test_port_busy() {
    let _squatter = UdpSocket::bind(("127.0.0.1", RECEIVE_PORT)).unwrap();
    let manager = make_manager();

    let err = manager.connect(test_endpoint()).await.unwrap_err();
    assert!(matches!(err, ConnectError::PortBusy { port } if port == RECEIVE_PORT));
    assert_eq!(err.reason(), "port_busy");
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!manager.is_connected());
}
