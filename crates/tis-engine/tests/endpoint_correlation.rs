//! Endpoint tests over the in-memory transport: correlated requests and
//! receive loop resilience.

use std::sync::Arc;
use std::time::Duration;

use tis_engine::{
    stop_signal, CorrelationOptions, DomainEvent, Endpoint, EngineConfig, EngineError,
    EngineEvent, MemoryPeer, MemoryTransport,
};
use tis_packet::payload::ChannelFeedback;
use tis_packet::{decode_frame, Address, Frame, Identity, Message};
use tokio::task::JoinHandle;

const LIGHT: Address = Address::new(1, 10);

fn setup(config: EngineConfig) -> (Arc<Endpoint<MemoryTransport>>, Arc<MemoryPeer>) {
    let (transport, peer) = MemoryTransport::pair();
    (Arc::new(Endpoint::new(transport, config)), Arc::new(peer))
}

/// Answer every frame the endpoint sends with whatever `respond` returns.
fn spawn_device<F>(peer: Arc<MemoryPeer>, respond: F) -> JoinHandle<()>
where
    F: Fn(&Frame, usize) -> Vec<Message> + Send + 'static,
{
    tokio::spawn(async move {
        let mut count = 0;
        while let Some(sent) = peer.next_sent().await {
            count += 1;
            let frame = decode_frame(&sent.bytes).unwrap();
            for reply in respond(&frame, count) {
                peer.inject_message(&reply);
            }
        }
    })
}

fn feedback(level: u8) -> Message {
    Identity::new(LIGHT, 0x0258).raw(Address::new(1, 254), 0x0032, vec![1, 0xF8, level])
}

#[tokio::test(start_paused = true)]
async fn test_request_matches_feedback() {
    let (endpoint, peer) = setup(EngineConfig::default());
    let (stop, signal) = stop_signal();
    let receiver = endpoint.clone();
    let receive_loop = tokio::spawn(async move { receiver.run_receive_loop(signal).await });

    spawn_device(peer.clone(), |frame, _| {
        if frame.opcode == 0x0031 && frame.target == LIGHT {
            vec![feedback(frame.payload[1])]
        } else {
            vec![]
        }
    });

    let mut events = endpoint.subscribe_events();
    let request = endpoint.identity().channel_control(LIGHT, 1, 75, 0);
    let reply = endpoint.request(&request).await.unwrap();

    assert_eq!(reply.request_opcode, 0x0031);
    assert_eq!(reply.frame.opcode, 0x0032);
    assert_eq!(reply.frame.source, LIGHT);
    assert_eq!(reply.attempts, 1);
    assert!(reply.latency < Duration::from_secs(1));
    assert_eq!(endpoint.tracker().pending_count(), 0);

    let mut matched = false;
    let mut feedback_event = None;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::Matched(m) => matched = m.id == reply.id,
            EngineEvent::Domain { event, .. } => feedback_event = Some(event),
            _ => {}
        }
    }
    assert!(matched);
    assert_eq!(
        feedback_event,
        Some(DomainEvent::ChannelFeedback(ChannelFeedback {
            channel: 1,
            success: true,
            level: 75
        }))
    );

    stop.stop();
    receive_loop.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_request_times_out_after_attempts() {
    let (endpoint, peer) = setup(EngineConfig::default());
    let (stop, signal) = stop_signal();
    let receiver = endpoint.clone();
    tokio::spawn(async move { receiver.run_receive_loop(signal).await });

    let request = endpoint.identity().channel_status_query(LIGHT, None);
    let options = CorrelationOptions {
        timeout: Duration::from_millis(500),
        attempts: 3,
    };
    let err = endpoint
        .send_with_correlation(&request, options)
        .await
        .unwrap_err();
    match err {
        EngineError::CorrelationTimeout {
            opcode,
            target,
            attempts,
        } => {
            assert_eq!(opcode, 0x0033);
            assert_eq!(target, LIGHT);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected {:?}", other),
    }

    let sent = peer.sent();
    assert_eq!(sent.len(), 3);
    for pair in sent.windows(2) {
        let gap = pair[1].at - pair[0].at;
        assert!(gap >= Duration::from_millis(500) && gap < Duration::from_millis(600));
    }
    assert_eq!(endpoint.tracker().pending_count(), 0);
    stop.stop();
}

#[tokio::test(start_paused = true)]
async fn test_long_timeout_outlives_pending_sweep() {
    let config = EngineConfig {
        pending_ttl: Duration::from_secs(1),
        ..Default::default()
    };
    let (endpoint, peer) = setup(config);
    let (stop, signal) = stop_signal();
    let receiver = endpoint.clone();
    tokio::spawn(async move { receiver.run_receive_loop(signal).await });

    let request = endpoint.identity().channel_status_query(LIGHT, None);
    let options = CorrelationOptions {
        timeout: Duration::from_secs(3),
        attempts: 3,
    };
    let started = tokio::time::Instant::now();
    let err = endpoint
        .send_with_correlation(&request, options)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CorrelationTimeout { attempts: 3, .. }));
    assert_eq!(peer.sent().len(), 3);
    assert!(started.elapsed() >= Duration::from_secs(9));
    assert_eq!(endpoint.tracker().pending_count(), 0);
    stop.stop();
}

#[tokio::test(start_paused = true)]
async fn test_retry_is_answered() {
    let (endpoint, peer) = setup(EngineConfig::default());
    let (stop, signal) = stop_signal();
    let receiver = endpoint.clone();
    tokio::spawn(async move { receiver.run_receive_loop(signal).await });

    // The device misses the first send.
    spawn_device(peer.clone(), |frame, count| {
        if frame.opcode == 0x0031 && count >= 2 {
            vec![feedback(40)]
        } else {
            vec![]
        }
    });

    let request = endpoint.identity().channel_control(LIGHT, 1, 40, 0);
    let options = CorrelationOptions {
        timeout: Duration::from_millis(300),
        attempts: 3,
    };
    let reply = endpoint.send_with_correlation(&request, options).await.unwrap();
    assert_eq!(reply.attempts, 2);
    assert!(reply.latency >= Duration::from_millis(300));
    assert_eq!(peer.sent().len(), 2);
    stop.stop();
}

#[tokio::test(start_paused = true)]
async fn test_reply_from_wrong_device_does_not_match() {
    let (endpoint, peer) = setup(EngineConfig::default());
    let (stop, signal) = stop_signal();
    let receiver = endpoint.clone();
    tokio::spawn(async move { receiver.run_receive_loop(signal).await });

    spawn_device(peer.clone(), |_, _| {
        vec![Identity::new(Address::new(1, 11), 0x0258).raw(
            Address::new(1, 254),
            0x0032,
            vec![1, 0xF8, 10],
        )]
    });

    let request = endpoint.identity().channel_control(LIGHT, 1, 10, 0);
    let options = CorrelationOptions {
        timeout: Duration::from_millis(200),
        attempts: 1,
    };
    let err = endpoint.send_with_correlation(&request, options).await.unwrap_err();
    assert!(matches!(err, EngineError::CorrelationTimeout { .. }));
    // The stray reply was still seen.
    assert!(endpoint.registry().get(Address::new(1, 11)).is_some());
    stop.stop();
}

#[tokio::test(start_paused = true)]
async fn test_receive_loop_survives_bad_frames() {
    let (endpoint, peer) = setup(EngineConfig::default());
    let mut events = endpoint.subscribe_events();
    let (stop, signal) = stop_signal();
    let receiver = endpoint.clone();
    let receive_loop = tokio::spawn(async move { receiver.run_receive_loop(signal).await });

    let good = feedback(100).encode().unwrap();
    let mut corrupt = good.clone();
    corrupt[12] ^= 0x01;

    peer.inject(vec![0x00, 0x01, 0x02], None);
    peer.inject(corrupt, None);
    peer.inject(good[..8].to_vec(), None);
    // A handler failure: channel feedback needs three bytes.
    peer.inject_message(&Identity::new(LIGHT, 0x0258).raw(
        Address::new(1, 254),
        0x0032,
        vec![1],
    ));
    peer.inject(good, None);

    let mut rejected = Vec::new();
    let mut handler_errors = 0;
    loop {
        match events.recv().await.unwrap() {
            EngineEvent::Rejected { error, .. } => rejected.push(error.as_label()),
            EngineEvent::HandlerError { opcode, .. } => {
                assert_eq!(opcode, 0x0032);
                handler_errors += 1;
            }
            EngineEvent::Domain { event, .. } => {
                assert!(matches!(event, DomainEvent::ChannelFeedback(_)));
                break;
            }
            _ => {}
        }
    }
    assert_eq!(rejected, vec!["no_preamble", "checksum_mismatch", "too_short"]);
    assert_eq!(handler_errors, 1);

    stop.stop();
    receive_loop.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_receive_loop_stops_within_timeout() {
    let config = EngineConfig {
        receive_timeout: Duration::from_millis(250),
        ..Default::default()
    };
    let (endpoint, _peer) = setup(config);
    let (stop, signal) = stop_signal();
    let receiver = endpoint.clone();
    let receive_loop = tokio::spawn(async move { receiver.run_receive_loop(signal).await });

    tokio::time::sleep(Duration::from_secs(2)).await;
    let stopped_at = tokio::time::Instant::now();
    stop.stop();
    receive_loop.await.unwrap().unwrap();
    assert!(tokio::time::Instant::now() - stopped_at <= Duration::from_millis(250));
}

#[tokio::test]
async fn test_receive_loop_reports_closed_transport() {
    let (transport, peer) = MemoryTransport::pair();
    let endpoint = Endpoint::new(transport, EngineConfig::default());
    drop(peer);
    let (_stop, signal) = stop_signal();
    let err = endpoint.run_receive_loop(signal).await.unwrap_err();
    assert!(matches!(err, EngineError::TransportClosed));
}
