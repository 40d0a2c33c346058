//! End to end against a fake Live answering on a local UDP socket

use std::sync::Arc;
use std::time::Duration;

use livelink_gw::config::{LifecycleConfig, PacerConfig, SyncConfig};
use livelink_gw::connection::ConnectionManager;
use livelink_gw::events::{Event, EventBus, TrackLevel};
use livelink_gw::osc::{Endpoint, OscMessage, OscSink, OscTransport, OscType};
use livelink_gw::rate::Pacer;
use livelink_gw::session::{SessionState, SessionStore};
use livelink_gw::sync::SyncController;
use rosc::OscPacket;
use serial_test::serial;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

const LIVE_PORT: u16 = 19200;
const GATEWAY_PORT: u16 = 19201;

struct FakeLive {
    socket: UdpSocket,
}

impl FakeLive {
    async fn bind() -> Self {
        let socket = UdpSocket::bind(("127.0.0.1", LIVE_PORT)).await.unwrap();
        Self { socket }
    }

    async fn recv(&self) -> OscMessage {
        let mut buf = vec![0u8; 4096];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), self.socket.recv_from(&mut buf))
            .await
            .expect("fake Live timed out waiting for a message")
            .unwrap();
        match rosc::decoder::decode_udp(&buf[..len]).unwrap().1 {
            OscPacket::Message(msg) => msg,
            OscPacket::Bundle(_) => panic!("unexpected bundle"),
        }
    }

    /// Next message that is not heartbeat or polling traffic
    async fn recv_request(&self) -> OscMessage {
        loop {
            let msg = self.recv().await;
            if msg.addr != "/live/test" {
                return msg;
            }
        }
    }

    async fn reply(&self, addr: &str, args: Vec<OscType>) {
        let packet = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        });
        let bytes = rosc::encoder::encode(&packet).unwrap();
        self.socket
            .send_to(&bytes, ("127.0.0.1", GATEWAY_PORT))
            .await
            .unwrap();
    }
}

struct Gateway {
    bus: EventBus,
    store: Arc<SessionStore>,
    connection: Arc<ConnectionManager>,
    controller: Arc<SyncController>,
    token: CancellationToken,
}

async fn make_gateway() -> Gateway {
    let token = CancellationToken::new();
    let bus = EventBus::new();
    let store = Arc::new(SessionStore::new(2, 2));
    let transport = Arc::new(OscTransport::new());
    let connection = Arc::new(ConnectionManager::new(
        transport.clone(),
        LifecycleConfig::default(),
    ));
    let (pacer, _) = Pacer::spawn(
        transport.clone() as Arc<dyn OscSink>,
        &PacerConfig::default(),
        token.child_token(),
    );

    let controller = Arc::new(
        SyncController::new(
            bus.clone(),
            store.clone(),
            transport.clone(),
            Arc::new(pacer),
            SyncConfig::default(),
            Duration::from_secs(30),
        )
        .with_connection(connection.clone()),
    );
    controller.attach();
    controller.install_handlers(&transport);

    connection
        .connect(Endpoint {
            host: "127.0.0.1".to_string(),
            send_port: LIVE_PORT,
            receive_port: GATEWAY_PORT,
            listen_host: "127.0.0.1".to_string(),
        })
        .await
        .unwrap();

    Gateway {
        bus,
        store,
        connection,
        controller,
        token,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
#[serial]
async fn test_initial_sync_against_fake_live() {
    let live = FakeLive::bind().await;
    let gw = make_gateway().await;

    let greeting = live.recv().await;
    assert_eq!(greeting.addr, "/live/test");
    assert_eq!(greeting.args, vec![OscType::String("hello".into())]);

    gw.controller.request_initial_sync();
    assert_eq!(live.recv_request().await.addr, "/live/song/get/track_names");
    assert_eq!(live.recv_request().await.addr, "/live/song/get/tempo");

    live.reply(
        "/live/song/get/track_names",
        vec![
            OscType::String("Drums".into()),
            OscType::String("Bass".into()),
            OscType::String("Keys".into()),
        ],
    )
    .await;
    live.reply("/live/song/get/tempo", vec![OscType::Float(128.0)]).await;

    let store = gw.store.clone();
    assert!(wait_until(|| store.tempo().bpm == 128.0).await);
    assert_eq!(gw.store.track_names(), vec!["Drums", "Bass", "Keys"]);

    // 3 tracks x 6 + 3 tracks x 2 scenes x 4
    let mut requests = 0;
    while requests < 3 * 6 + 3 * 2 * 4 {
        let msg = live.recv_request().await;
        assert!(msg.addr.starts_with("/live/track/get/") || msg.addr.starts_with("/live/clip"));
        requests += 1;
    }

    assert!(gw.connection.get_connection_info().messages_received >= 2);
    gw.connection.disconnect().await;
    gw.token.cancel();
}

#[tokio::test]
#[serial]
async fn test_local_write_confirmed_by_fake_live() {
    let live = FakeLive::bind().await;
    let gw = make_gateway().await;
    live.recv().await;

    gw.bus.publish(Event::TrackVolume(TrackLevel {
        track: 1,
        value: 0.5,
    }));

    let write = live.recv_request().await;
    assert_eq!(write.addr, "/live/track/1/volume");
    assert_eq!(write.args, vec![OscType::Float(0.5)]);
    assert_eq!(gw.controller.pending_writes(), 1);

    // Live echoes the applied value
    live.reply("/live/track/get/volume", vec![OscType::Int(1), OscType::Float(0.5)])
        .await;

    let store = gw.store.clone();
    assert!(wait_until(|| store.track(1).map(|t| t.volume) == Some(0.5)).await);
    assert_eq!(gw.controller.pending_writes(), 0);

    // Nothing was echoed back to Live
    let extra = tokio::time::timeout(Duration::from_millis(200), live.recv_request()).await;
    assert!(extra.is_err());

    gw.connection.disconnect().await;
    gw.token.cancel();
}
