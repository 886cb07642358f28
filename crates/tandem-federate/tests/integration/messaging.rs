//! Message exchange: wifi deliveries end to end, the time-zero send bump,
//! and the lenient/strict malformed-payload policy.

use crate::harness::{establish, spawn_federate, test_config, Orchestrator};
use tandem_protocol::{Command, NodeKind, TimeMessage};

const IP_1: u32 = 0x0600_0001;
const IP_2: u32 = 0x0600_0002;
const BROADCAST: u32 = u32::MAX;
const LINK_DELAY: i64 = 1_000_000;

#[tokio::test]
async fn test_wifi_broadcast_delivered_with_link_delay() {
    let (federate, mut orch) = establish(test_config()).await.unwrap();

    orch.add_node(0, 1, NodeKind::Radio, 0.0, 0.0).await.unwrap();
    orch.add_node(0, 2, NodeKind::Radio, 50.0, 0.0).await.unwrap();
    assert_eq!(orch.advance(0).await.unwrap(), 0);

    orch.configure_wifi(1, 1, IP_1, 50.0).await.unwrap();
    orch.configure_wifi(1, 2, IP_2, 50.0).await.unwrap();
    orch.send_wifi(10, 1, BROADCAST, 42, 100).await.unwrap();

    orch.advance(1_000_000_000).await.unwrap();

    assert_eq!(orch.wifi_receipts.len(), 1);
    let receipt = &orch.wifi_receipts[0];
    assert_eq!(receipt.node_id, 2);
    assert_eq!(receipt.message_id, 42);
    assert_eq!(receipt.time, 10 + LINK_DELAY);

    orch.shutdown().await.unwrap();
    federate.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_send_at_time_zero_bumps_to_one_nanosecond() {
    let (federate, mut orch) = establish(test_config()).await.unwrap();

    orch.add_node(0, 1, NodeKind::Radio, 0.0, 0.0).await.unwrap();
    orch.add_node(0, 2, NodeKind::Radio, 10.0, 0.0).await.unwrap();
    assert_eq!(orch.advance(0).await.unwrap(), 0);

    orch.configure_wifi(0, 1, IP_1, 50.0).await.unwrap();
    orch.configure_wifi(0, 2, IP_2, 50.0).await.unwrap();
    orch.send_wifi(0, 1, BROADCAST, 9, 64).await.unwrap();

    orch.advance(1_000_000_000).await.unwrap();

    // The transmission fired at 1 ns, not 0.
    assert!(orch.notifications.contains(&1));
    assert_eq!(orch.wifi_receipts.len(), 1);
    assert_eq!(orch.wifi_receipts[0].time, 1 + LINK_DELAY);

    orch.shutdown().await.unwrap();
    federate.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_out_of_range_node_receives_nothing() {
    let mut cfg = test_config();
    cfg.model.wifi_range = 100.0;
    let (federate, mut orch) = establish(cfg).await.unwrap();

    orch.add_node(0, 1, NodeKind::Radio, 0.0, 0.0).await.unwrap();
    orch.add_node(0, 2, NodeKind::Radio, 400.0, 0.0).await.unwrap();
    assert_eq!(orch.advance(0).await.unwrap(), 0);

    orch.configure_wifi(1, 1, IP_1, 50.0).await.unwrap();
    orch.configure_wifi(1, 2, IP_2, 50.0).await.unwrap();
    orch.send_wifi(10, 1, BROADCAST, 5, 64).await.unwrap();

    orch.advance(1_000_000_000).await.unwrap();
    assert!(orch.wifi_receipts.is_empty());

    orch.shutdown().await.unwrap();
    federate.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_lenient_mode_tolerates_malformed_payload() {
    let (federate, mut orch) = establish(test_config()).await.unwrap();

    // A bare TimeMessage is far too short for a wifi radio config.
    orch.command.write_command(Command::ConfWifiRadio).await.unwrap();
    orch.command
        .write_message(&TimeMessage { time: 5 })
        .await
        .unwrap();
    assert_eq!(orch.command.read_command().await.unwrap(), Command::Success);

    // The session is still healthy.
    assert_eq!(orch.advance(0).await.unwrap(), 0);

    orch.shutdown().await.unwrap();
    federate.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_strict_mode_ends_session_on_malformed_payload() {
    let mut cfg = test_config();
    cfg.session.lenient_decode = false;
    let federate = spawn_federate(cfg).await.unwrap();
    let mut orch = Orchestrator::connect(federate.notify_port).await.unwrap();
    assert_eq!(orch.init(0, 1_000_000).await.unwrap(), Command::Success);

    orch.command.write_command(Command::ConfWifiRadio).await.unwrap();
    orch.command
        .write_message(&TimeMessage { time: 5 })
        .await
        .unwrap();

    assert!(federate.task.await.unwrap().is_err());
}
