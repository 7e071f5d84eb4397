//! Link-layer behaviour seen through the service: fragmentation at the
//! negotiated MTU, acknowledged operations, and retry exhaustion.

use wifiprov::config::ProvisioningConfig;
use wifiprov::events::InboundEvent;
use wifiprov::fsm::StateId;
use wifiprov::link::channels::ChannelId;
use wifiprov::link::chunked::{FRAG_CONT, FRAG_SINGLE, FRAG_START};
use wifiprov::link::queue::{GattOperation, OperationKind};

use crate::mock_device::Harness;

#[test]
fn status_is_fragmented_at_minimum_mtu() {
    let mut h = Harness::new(ProvisioningConfig::default());
    h.connect_peer();
    h.write(ChannelId::Control, &[0x03]);
    h.settle();

    let status_ops: Vec<_> = h
        .dev
        .issued
        .iter()
        .filter(|op| op.channel == ChannelId::Status)
        .collect();
    // {"status":"SUCCESS","msg":"CONNECTED"} is 38 bytes; 20 per notify.
    assert_eq!(status_ops.len(), 3);
    assert_eq!(status_ops[0].payload[0], FRAG_START);
    assert!(status_ops[1..].iter().all(|op| op.payload[0] == FRAG_CONT));
    assert!(status_ops.iter().all(|op| op.payload.len() <= 20));
    assert!(status_ops.iter().all(|op| op.kind == OperationKind::Notify));
}

#[test]
fn larger_mtu_sends_single_fragment() {
    let mut h = Harness::new(ProvisioningConfig::default());
    h.connect_peer();
    h.post(InboundEvent::MtuChanged(185));
    h.write(ChannelId::Control, &[0x03]);
    h.settle();

    let last = h.dev.issued.last().expect("status issued");
    assert_eq!(last.channel, ChannelId::Status);
    assert_eq!(last.payload[0], FRAG_SINGLE);
    assert_eq!(h.svc.link().max_payload_size(), 182);
}

#[test]
fn inbound_fragments_reassemble_at_any_mtu() {
    let mut h = Harness::new(ProvisioningConfig::default());
    h.mtu = 64;
    let companion = h.authenticate();
    assert_eq!(h.state(), StateId::ReceivingCredentials);

    h.mtu = 23;
    h.submit_credentials(&companion, br#"{"ssid":"Home","pass":"secret123"}"#);
    assert_eq!(h.state(), StateId::ConnectingWifi);
}

#[test]
fn failing_transport_drops_status_without_stalling() {
    let mut h = Harness::new(ProvisioningConfig::default());
    h.connect_peer();
    h.dev.fail_issue = true;
    h.write(ChannelId::Control, &[0x03]);
    for _ in 0..12 {
        h.tick();
    }
    // Every fragment burns its full retry budget, then the queue is empty.
    assert!(h.svc.link().queue.is_empty());
    assert_eq!(h.svc.metrics().dropped_operations, 3);

    h.dev.fail_issue = false;
    h.write(ChannelId::Control, &[0x03]);
    h.settle();
    assert_eq!(h.dev.issued.len(), 3);
    assert_eq!(h.state(), StateId::Connected);
}

#[test]
fn disconnect_cancels_queued_notifications() {
    let mut h = Harness::new(ProvisioningConfig::default());
    h.connect_peer();
    h.write(ChannelId::Control, &[0x03]);
    assert!(!h.svc.link().queue.is_empty());

    h.post(InboundEvent::PeerDisconnected);
    assert!(h.svc.link().queue.is_empty());
    h.settle();
    assert!(h.dev.issued.iter().all(|op| op.channel != ChannelId::Status));
}

#[test]
fn mtu_resets_on_new_connection() {
    let mut h = Harness::new(ProvisioningConfig::default());
    h.connect_peer();
    h.post(InboundEvent::MtuChanged(247));
    assert_eq!(h.svc.link().mtu(), 247);
    h.post(InboundEvent::PeerDisconnected);
    assert_eq!(h.svc.link().mtu(), 23);
}

#[test]
fn indicate_waits_for_acknowledgement() {
    let mut op_queue = wifiprov::link::queue::OperationQueue::new(1, 1_000);
    let mut dev = crate::mock_device::MockDevice::new();
    op_queue
        .enqueue(GattOperation::indicate(ChannelId::Data, vec![1, 2, 3]), 0)
        .unwrap();
    op_queue
        .enqueue(GattOperation::notify(ChannelId::Data, vec![4]), 0)
        .unwrap();

    op_queue.process_queue(0, &mut dev);
    assert_eq!(dev.issued.len(), 1);
    op_queue.process_queue(10, &mut dev);
    assert_eq!(dev.issued.len(), 1, "indicate still awaiting ack");

    op_queue.complete(true);
    op_queue.process_queue(20, &mut dev);
    assert_eq!(dev.issued.len(), 2);
    assert!(op_queue.is_empty());
}
