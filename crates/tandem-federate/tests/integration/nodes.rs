//! Node lifecycle over the wire: setup-phase creation, scheduled creation,
//! and removal semantics.

use crate::harness::{establish, test_config};
use tandem_protocol::{Command, NodeKind};

const IP_1: u32 = 0x0600_0001;
const IP_2: u32 = 0x0600_0002;
const BROADCAST: u32 = u32::MAX;

#[tokio::test]
async fn test_node_created_after_start_is_scheduled() {
    let (federate, mut orch) = establish(test_config()).await.unwrap();

    orch.add_node(0, 1, NodeKind::Radio, 0.0, 0.0).await.unwrap();
    assert_eq!(orch.advance(0).await.unwrap(), 0);

    // Node 2 only comes into existence at t=100, via a scheduled event.
    orch.add_node(100, 2, NodeKind::Radio, 10.0, 0.0).await.unwrap();
    orch.configure_wifi(1, 1, IP_1, 50.0).await.unwrap();
    orch.configure_wifi(150, 2, IP_2, 50.0).await.unwrap();
    orch.send_wifi(200, 2, BROADCAST, 7, 64).await.unwrap();

    orch.advance(1_000_000_000).await.unwrap();
    assert_eq!(orch.wifi_receipts.len(), 1);
    assert_eq!(orch.wifi_receipts[0].node_id, 1);
    assert_eq!(orch.wifi_receipts[0].message_id, 7);

    orch.shutdown().await.unwrap();
    federate.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_duplicate_node_id_keeps_session_alive() {
    let (federate, mut orch) = establish(test_config()).await.unwrap();

    assert_eq!(
        orch.add_node(0, 5, NodeKind::Radio, 0.0, 0.0).await.unwrap(),
        Command::Success
    );
    // Second creation fails inside the federate but scheduling acceptance
    // was already the contract; the session keeps going.
    assert_eq!(
        orch.add_node(0, 5, NodeKind::Wired, 1.0, 0.0).await.unwrap(),
        Command::Success
    );
    assert_eq!(orch.advance(0).await.unwrap(), 0);

    orch.shutdown().await.unwrap();
    federate.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_removed_node_receives_nothing() {
    let (federate, mut orch) = establish(test_config()).await.unwrap();

    orch.add_node(0, 1, NodeKind::Radio, 0.0, 0.0).await.unwrap();
    orch.add_node(0, 2, NodeKind::Radio, 10.0, 0.0).await.unwrap();
    assert_eq!(orch.advance(0).await.unwrap(), 0);

    orch.configure_wifi(1, 1, IP_1, 50.0).await.unwrap();
    orch.configure_wifi(1, 2, IP_2, 50.0).await.unwrap();

    // First transmission lands, then node 2 goes away, then a second
    // transmission finds nobody.
    orch.send_wifi(100, 1, BROADCAST, 1, 64).await.unwrap();
    orch.advance(500_000_000).await.unwrap();
    assert_eq!(orch.wifi_receipts.len(), 1);

    orch.remove_node(600_000_000, 2).await.unwrap();
    orch.send_wifi(600_000_010, 1, BROADCAST, 2, 64).await.unwrap();
    orch.advance(2_000_000_000).await.unwrap();
    assert_eq!(orch.wifi_receipts.len(), 1, "no delivery after removal");

    orch.shutdown().await.unwrap();
    federate.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_late_cell_tower_is_fatal() {
    let (federate, mut orch) = establish(test_config()).await.unwrap();

    assert_eq!(orch.advance(0).await.unwrap(), 0);
    let _ = orch.add_node(10, 9, NodeKind::Enb, 0.0, 0.0).await;
    assert!(federate.task.await.unwrap().is_err());
}
