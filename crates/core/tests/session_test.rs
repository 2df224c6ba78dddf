//! Signaling session driven against an in-memory SFU endpoint

use sfu_publish_core::testing::{MockPeer, PeerCall};
use sfu_publish_core::{
    ConnectivityState, Error, GateSignal, IceCandidate, JoinMode, MemoryTransport, PeerEvent,
    PublishOptions, PublisherConfig, SessionDescription, SessionState, SfuEndpoint, SignalReply,
    SignalRequest, SignalingSession,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

type SessionTask = JoinHandle<sfu_publish_core::Result<sfu_publish_core::SessionReport>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sfu_publish_core=debug")
        .with_test_writer()
        .try_init();
}

struct Harness {
    peer: Arc<MockPeer>,
    sfu: SfuEndpoint,
    gate: sfu_publish_core::GateWaiter,
    task: SessionTask,
}

fn start(config: PublisherConfig) -> Harness {
    start_with(config, |_| {})
}

/// Like `start`, with a hook that runs on the peer before the session does
fn start_with(config: PublisherConfig, before_run: impl FnOnce(&MockPeer)) -> Harness {
    init_tracing();

    let (peer, events) = MockPeer::new("publisher");
    before_run(&peer);
    let peer = Arc::new(peer);
    let (transport, sfu) = MemoryTransport::pair();
    let session = SignalingSession::new(config, transport, peer.clone(), events);
    let gate = session.gate_waiter();
    let task = tokio::spawn(session.run());

    Harness {
        peer,
        sfu,
        gate,
        task,
    }
}

fn sfu_answer(n: u32) -> SessionDescription {
    SessionDescription::answer(format!("v=0 sfu answer {}", n))
}

fn join_reply(answer: &SessionDescription) -> SignalReply {
    SignalReply::Join {
        description: Some(answer.to_json().unwrap()),
    }
}

/// Join with offer and answer it; returns the offer
async fn complete_join(h: &mut Harness) -> SessionDescription {
    let offer = match h.sfu.next_request().await.unwrap() {
        SignalRequest::Join {
            description: Some(offer),
            ..
        } => offer,
        other => panic!("expected join with offer, got {:?}", other),
    };
    h.sfu.reply(join_reply(&sfu_answer(1))).unwrap();
    offer
}

/// Waits until the session has processed every peer event emitted so far
async fn connect(h: &mut Harness) {
    h.peer.set_connectivity(ConnectivityState::Connected);
    assert_eq!(h.gate.wait_open().await, GateSignal::Open);
}

#[tokio::test]
async fn test_join_with_offer_end_to_end() {
    let mut h = start(PublisherConfig::default());

    let offer = match h.sfu.next_request().await.unwrap() {
        SignalRequest::Join {
            room_id,
            display_name,
            description: Some(offer),
        } => {
            assert_eq!(room_id, "test");
            assert_eq!(display_name, "test");
            offer
        }
        other => panic!("expected join with offer, got {:?}", other),
    };
    assert!(offer.is_offer());

    // A candidate racing ahead of the answer is buffered, then flushed
    let early = IceCandidate::new("candidate:1 1 udp 2130706431 192.0.2.1 5000 typ host");
    h.sfu.reply(SignalReply::trickle(&early).unwrap()).unwrap();
    h.sfu.reply(join_reply(&sfu_answer(1))).unwrap();

    h.peer.gather(&["candidate:9 1 udp 2130706431 10.0.0.9 6000 typ host"]);
    connect(&mut h).await;

    match h.sfu.next_request().await.unwrap() {
        SignalRequest::Trickle { candidate } => assert!(candidate.candidate.starts_with("candidate:9")),
        other => panic!("expected trickle, got {:?}", other),
    }

    // Later connectivity changes do not re-fire the gate
    h.peer.set_connectivity(ConnectivityState::Disconnected);
    h.peer.set_connectivity(ConnectivityState::Connected);

    h.sfu.end_stream().unwrap();
    let report = assert_ok!(h.task.await.unwrap());

    assert_eq!(report.final_state, SessionState::Closed);
    assert_eq!(report.rounds_applied, 1);
    assert_eq!(report.candidates_applied, 1);
    assert_eq!(report.dropped_messages, 0);
    assert!(report.connected);
    assert_eq!(h.peer.applied_candidates(), vec![early]);
    assert!(h.peer.calls().contains(&PeerCall::SetRemote(sfu_answer(1))));
    assert!(h.peer.calls().contains(&PeerCall::Close));

    // Send half closed: no TrickleComplete without the marker enabled
    assert_eq!(h.sfu.next_request().await, None);
}

#[tokio::test]
async fn test_malformed_messages_are_dropped() {
    let mut h = start(PublisherConfig::default());
    complete_join(&mut h).await;

    h.sfu
        .reply(SignalReply::Description {
            payload: "{not json".to_string(),
        })
        .unwrap();
    h.sfu
        .reply(SignalReply::Trickle {
            payload: r#"{"sdpMid":"0"}"#.to_string(),
        })
        .unwrap();
    h.sfu
        .reply(SignalReply::Description {
            payload: r#"{"type":"answer","sdp":""}"#.to_string(),
        })
        .unwrap();

    connect(&mut h).await;
    h.sfu.end_stream().unwrap();

    let report = h.task.await.unwrap().unwrap();
    assert_eq!(report.final_state, SessionState::Closed);
    assert_eq!(report.dropped_messages, 3);
    assert_eq!(report.rounds_applied, 1);
}

#[tokio::test]
async fn test_join_then_publish() {
    let config = PublisherConfig {
        room_id: "lobby".to_string(),
        display_name: Some("pink.video".to_string()),
        join_mode: JoinMode::JoinThenPublish,
        ..Default::default()
    };
    let mut h = start(config);

    assert_eq!(
        h.sfu.next_request().await.unwrap(),
        SignalRequest::Join {
            room_id: "lobby".to_string(),
            display_name: "pink.video".to_string(),
            description: None,
        }
    );
    h.sfu.reply(SignalReply::Join { description: None }).unwrap();

    match h.sfu.next_request().await.unwrap() {
        SignalRequest::Publish {
            description,
            options,
        } => {
            assert!(description.is_offer());
            assert_eq!(options, PublishOptions::default());
        }
        other => panic!("expected publish, got {:?}", other),
    }
    h.sfu
        .reply(SignalReply::Publish {
            description: sfu_answer(1).to_json().unwrap(),
        })
        .unwrap();

    connect(&mut h).await;
    h.sfu.cancel().unwrap();

    let report = h.task.await.unwrap().unwrap();
    assert_eq!(report.final_state, SessionState::Closed);
    assert_eq!(report.rounds_applied, 1);
}

#[tokio::test]
async fn test_rejected_join_is_fatal() {
    let mut h = start(PublisherConfig::default());
    h.sfu.next_request().await.unwrap();
    h.sfu
        .reply(SignalReply::Error {
            code: 403,
            message: "room locked".to_string(),
        })
        .unwrap();

    let err = assert_err!(h.task.await.unwrap());
    assert!(matches!(err, Error::Signaling { code: 403, .. }));
    assert_eq!(h.gate.wait_open().await, GateSignal::Shutdown);
}

#[tokio::test]
async fn test_error_reply_after_join_is_logged_only() {
    let mut h = start(PublisherConfig::default());
    complete_join(&mut h).await;

    h.sfu
        .reply(SignalReply::Error {
            code: 500,
            message: "transient".to_string(),
        })
        .unwrap();

    connect(&mut h).await;
    h.sfu.end_stream().unwrap();
    assert_ok!(h.task.await.unwrap());
}

#[tokio::test]
async fn test_stream_closed_mid_negotiation_is_reported() {
    let mut h = start(PublisherConfig::default());
    h.sfu.next_request().await.unwrap();
    h.sfu.end_stream().unwrap();

    let err = h.task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::UnexpectedClose(_)));
    assert_eq!(err.exit_code(), 1);
    assert!(h.peer.calls().contains(&PeerCall::Close));
}

#[tokio::test]
async fn test_remote_offer_before_local_offer_is_fatal() {
    let mut h = start(PublisherConfig {
        join_mode: JoinMode::JoinThenPublish,
        ..Default::default()
    });
    h.sfu.next_request().await.unwrap();

    h.sfu
        .reply(SignalReply::description(&SessionDescription::offer("v=0 sfu offer")).unwrap())
        .unwrap();

    let err = h.task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Negotiation(_)));
}

#[tokio::test]
async fn test_remote_renegotiation_and_local_renegotiation() {
    let mut h = start(PublisherConfig::default());
    complete_join(&mut h).await;
    connect(&mut h).await;

    // Remote-initiated round
    let sfu_offer = SessionDescription::offer("v=0 sfu offer 2");
    h.sfu.reply(SignalReply::description(&sfu_offer).unwrap()).unwrap();
    match h.sfu.next_request().await.unwrap() {
        SignalRequest::Description { description } => assert!(!description.is_offer()),
        other => panic!("expected answer, got {:?}", other),
    }

    // Local round, requested twice while in flight
    h.peer.emit(PeerEvent::NegotiationNeeded);
    h.peer.emit(PeerEvent::NegotiationNeeded);
    match h.sfu.next_request().await.unwrap() {
        SignalRequest::Description { description } => assert!(description.is_offer()),
        other => panic!("expected offer, got {:?}", other),
    }
    h.sfu.reply(SignalReply::description(&sfu_answer(3)).unwrap()).unwrap();

    // The coalesced request is issued once the first round settles
    match h.sfu.next_request().await.unwrap() {
        SignalRequest::Description { description } => assert!(description.is_offer()),
        other => panic!("expected deferred offer, got {:?}", other),
    }
    h.sfu.reply(SignalReply::description(&sfu_answer(4)).unwrap()).unwrap();

    h.sfu.end_stream().unwrap();
    let report = h.task.await.unwrap().unwrap();
    assert_eq!(report.rounds_applied, 4);
}

async fn next_description(h: &mut Harness) -> SessionDescription {
    match h.sfu.next_request().await.unwrap() {
        SignalRequest::Description { description } => description,
        other => panic!("expected description, got {:?}", other),
    }
}

fn count_calls(peer: &MockPeer, call: &PeerCall) -> usize {
    peer.calls().iter().filter(|c| *c == call).count()
}

#[tokio::test]
async fn test_negotiation_needed_before_run_adds_no_round() {
    // Tracks added before the session starts raise negotiation-needed early
    let mut h = start_with(PublisherConfig::default(), |peer| {
        peer.emit(PeerEvent::NegotiationNeeded);
    });

    complete_join(&mut h).await;
    connect(&mut h).await;
    h.sfu.end_stream().unwrap();

    let report = h.task.await.unwrap().unwrap();
    assert_eq!(report.rounds_applied, 1);
    assert_eq!(count_calls(&h.peer, &PeerCall::CreateOffer), 1);
    assert_eq!(h.sfu.next_request().await, None);
}

#[tokio::test]
async fn test_glare_with_sfu_keeps_local_offer() {
    let mut h = start(PublisherConfig::default());
    complete_join(&mut h).await;
    connect(&mut h).await;

    h.peer.emit(PeerEvent::NegotiationNeeded);
    let local_offer = next_description(&mut h).await;
    assert!(local_offer.is_offer());

    // Offers cross: ours wins and goes out again
    let crossing = SessionDescription::offer("v=0 sfu offer 2");
    h.sfu.reply(SignalReply::description(&crossing).unwrap()).unwrap();
    assert_eq!(next_description(&mut h).await, local_offer);

    // The SFU yields, answers ours, then re-offers
    h.sfu.reply(SignalReply::description(&sfu_answer(2)).unwrap()).unwrap();
    let reoffer = SessionDescription::offer("v=0 sfu offer 3");
    h.sfu.reply(SignalReply::description(&reoffer).unwrap()).unwrap();
    assert!(!next_description(&mut h).await.is_offer());

    // A late copy of the re-offer is not answered twice
    h.sfu.reply(SignalReply::description(&reoffer).unwrap()).unwrap();

    h.sfu.end_stream().unwrap();
    let report = h.task.await.unwrap().unwrap();
    assert_eq!(report.final_state, SessionState::Closed);
    assert_eq!(report.rounds_applied, 3);
    assert_eq!(count_calls(&h.peer, &PeerCall::SetRemote(crossing)), 0);
    assert_eq!(count_calls(&h.peer, &PeerCall::SetRemote(reoffer)), 1);
    assert_eq!(count_calls(&h.peer, &PeerCall::Rollback), 0);
    assert_eq!(h.sfu.next_request().await, None);
}

#[tokio::test]
async fn test_replayed_answer_is_not_a_new_round() {
    let mut h = start(PublisherConfig::default());
    complete_join(&mut h).await;
    connect(&mut h).await;

    h.peer.emit(PeerEvent::NegotiationNeeded);
    assert!(next_description(&mut h).await.is_offer());

    // Stale copy of the join answer, then the real one
    h.sfu.reply(SignalReply::description(&sfu_answer(1)).unwrap()).unwrap();
    h.sfu.reply(SignalReply::description(&sfu_answer(2)).unwrap()).unwrap();

    h.sfu.end_stream().unwrap();
    let report = h.task.await.unwrap().unwrap();
    assert_eq!(report.final_state, SessionState::Closed);
    assert_eq!(report.rounds_applied, 2);
    assert_eq!(count_calls(&h.peer, &PeerCall::SetRemote(sfu_answer(1))), 1);
    assert_eq!(count_calls(&h.peer, &PeerCall::SetRemote(sfu_answer(2))), 1);
}

#[tokio::test]
async fn test_complete_offer_mode_does_not_trickle() {
    let mut h = start(PublisherConfig {
        trickle: false,
        ..Default::default()
    });

    let offer = complete_join(&mut h).await;
    assert!(offer.sdp.contains("a=end-of-candidates"));
    assert!(h.peer.calls().contains(&PeerCall::WaitGathering));

    h.peer.gather(&["candidate:1 1 udp 2130706431 10.0.0.1 5000 typ host"]);
    connect(&mut h).await;
    h.sfu.end_stream().unwrap();
    h.task.await.unwrap().unwrap();

    assert_eq!(h.sfu.next_request().await, None);
}

#[tokio::test]
async fn test_end_of_candidates_marker() {
    let mut h = start(PublisherConfig {
        signal_end_of_candidates: true,
        ..Default::default()
    });
    complete_join(&mut h).await;

    h.peer.gather(&["candidate:1 1 udp 2130706431 10.0.0.1 5000 typ host"]);
    connect(&mut h).await;

    assert!(matches!(
        h.sfu.next_request().await.unwrap(),
        SignalRequest::Trickle { .. }
    ));
    assert_eq!(
        h.sfu.next_request().await.unwrap(),
        SignalRequest::TrickleComplete
    );

    h.sfu.end_stream().unwrap();
    h.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failed_candidate_application_is_fatal() {
    let mut h = start(PublisherConfig::default());
    complete_join(&mut h).await;
    connect(&mut h).await;

    h.peer.fail_add_candidate(true);
    h.sfu
        .reply(SignalReply::trickle(&IceCandidate::new("candidate:bogus")).unwrap())
        .unwrap();

    let err = h.task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Negotiation(_)));
}

#[tokio::test(start_paused = true)]
async fn test_join_timeout() {
    let mut h = start(PublisherConfig {
        join_timeout_ms: Some(1_000),
        ..Default::default()
    });
    h.sfu.next_request().await.unwrap();

    let err = h.task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::OperationTimeout(_)));
    drop(h.sfu);
}

#[tokio::test(start_paused = true)]
async fn test_join_timeout_disarmed_after_answer() {
    let mut h = start(PublisherConfig {
        join_timeout_ms: Some(1_000),
        ..Default::default()
    });
    complete_join(&mut h).await;
    connect(&mut h).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!h.task.is_finished());

    h.sfu.end_stream().unwrap();
    assert_ok!(h.task.await.unwrap());
}

#[tokio::test]
async fn test_close_handle_ends_session() {
    init_tracing();

    let (peer, events) = MockPeer::new("publisher");
    let (transport, mut sfu) = MemoryTransport::pair();
    let session = SignalingSession::new(PublisherConfig::default(), transport, Arc::new(peer), events);
    let handle = session.handle();
    let task = tokio::spawn(session.run());

    sfu.next_request().await.unwrap();
    sfu.reply(join_reply(&sfu_answer(1))).unwrap();

    handle.close();
    handle.close();

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.final_state, SessionState::Closed);
    assert_eq!(sfu.next_request().await, None);
}
