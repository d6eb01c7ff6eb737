use std::sync::Arc;
use std::time::Duration;

use swarmwire::Address;
use swarmwire::Message;
use swarmwire::Payload;
use swarmwire::Transport;
use swarmwire::memory::MemoryTransport;
use swarmwire::frame;

use crate::*;
use crate::correlation::Error;
use crate::correlation::Prepared;
use crate::correlation::Resolution;

fn request(n: i64) -> Message {
    let mut msg = Message::value(&n, "incrementer").unwrap();
    msg.sender = Address::from("caller");
    msg
}

fn answer(req: &Message, n: i64) -> Message {
    req.reply(Message::value(&n, "").unwrap())
}

// ============================================================================
//  PREDICTOR
// ============================================================================

#[test]
fn test_predictor_caches_at_threshold() {
    let mut p = Predictor::new(5);
    let req = request(1);
    let sig = req.signature();

    for _ in 0..4 {
        assert!(!p.observe(sig, &answer(&req, 2)));
        assert!(!p.is_cached(&sig));
    }
    assert!(p.observe(sig, &answer(&req, 2)));

    let cached = p.predict(&sig).unwrap();
    assert_eq!(cached.payload.data::<i64>().unwrap(), 2);
}

#[test]
fn test_predictor_differing_response_blocks_caching() {
    let mut p = Predictor::new(3);
    let req = request(1);
    let sig = req.signature();

    p.observe(sig, &answer(&req, 2));
    p.observe(sig, &answer(&req, 7));
    for _ in 0..10 {
        assert!(!p.observe(sig, &answer(&req, 2)));
    }
    assert!(!p.is_cached(&sig));
}

#[test]
fn test_predictor_decay_forgets_counts() {
    let mut p = Predictor::new(5);
    let req = request(1);
    let sig = req.signature();

    p.observe(sig, &answer(&req, 2));
    p.observe(sig, &answer(&req, 2));
    p.decay();
    assert_eq!(p.len(), 1);
    p.decay();
    assert!(p.is_empty());
}

#[test]
fn test_predictor_decay_demotes_cached_entry() {
    let mut p = Predictor::new(3);
    let req = request(1);
    let sig = req.signature();

    for _ in 0..3 {
        p.observe(sig, &answer(&req, 2));
    }
    assert!(p.is_cached(&sig));

    p.decay();
    assert!(!p.is_cached(&sig));

    // one more identical answer restores the cache
    assert!(p.observe(sig, &answer(&req, 2)));
    assert!(p.is_cached(&sig));
}

#[test]
fn test_predictor_zero_threshold_disabled() {
    let mut p = Predictor::new(0);
    let req = request(1);
    for _ in 0..10 {
        assert!(!p.observe(req.signature(), &answer(&req, 2)));
    }
    assert!(p.is_empty());
}

// ============================================================================
//  CORRELATOR
// ============================================================================

fn transmit(c: &Arc<Correlator>, msg: &Message) -> PendingResult {
    match c.prepare(msg) {
        Prepared::Transmit(handle) => handle,
        Prepared::Predicted(_) => panic!("unexpected prediction"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_correlator_resolves_by_id() {
    let c = Correlator::new(Duration::from_secs(10), 5);
    let req = request(1);
    let handle = transmit(&c, &req);
    assert_eq!(c.pending_len(), 1);

    assert!(matches!(c.resolve(answer(&req, 2)), Resolution::Resolved));
    let response = handle.await.unwrap();
    assert_eq!(response.id, req.id);
    assert_eq!(response.payload.data::<i64>().unwrap(), 2);
    assert_eq!(c.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_correlator_out_of_order_responses() {
    let c = Correlator::new(Duration::from_secs(10), 5);
    let first = request(1);
    let second = request(2);
    let h1 = transmit(&c, &first);
    let h2 = transmit(&c, &second);

    c.resolve(answer(&second, 3));
    c.resolve(answer(&first, 2));

    assert_eq!(h1.await.unwrap().payload.data::<i64>().unwrap(), 2);
    assert_eq!(h2.await.unwrap().payload.data::<i64>().unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_correlator_timeout_then_late_response_dropped() {
    let c = Correlator::new(Duration::from_secs(10), 5);
    let req = request(1);
    let handle = transmit(&c, &req);

    assert_eq!(handle.await.unwrap_err(), Error::Timeout);
    assert_eq!(c.pending_len(), 0);

    // the late answer neither resolves anything nor reaches the handler
    assert!(matches!(c.resolve(answer(&req, 2)), Resolution::Late));
}

#[tokio::test(start_paused = true)]
async fn test_correlator_response_cancels_timeout() {
    let c = Correlator::new(Duration::from_secs(1), 5);
    let req = request(1);
    let handle = transmit(&c, &req);

    c.resolve(answer(&req, 2));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(handle.await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_correlator_reused_id_gets_own_timeout() {
    let c = Correlator::new(Duration::from_secs(10), 5);
    let req = request(1);
    let first = transmit(&c, &req);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let second = transmit(&c, &req);
    assert_eq!(first.await.unwrap_err(), Error::Superseded);
    assert_eq!(c.pending_len(), 1);

    // the first registration's deadline passes without touching the second
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(c.pending_len(), 1);

    assert!(matches!(c.resolve(answer(&req, 2)), Resolution::Resolved));
    assert_eq!(second.await.unwrap().payload.data::<i64>().unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_correlator_reused_id_times_out_after_full_window() {
    let c = Correlator::new(Duration::from_secs(10), 5);
    let req = request(1);
    let _first = transmit(&c, &req);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let started = tokio::time::Instant::now();
    let second = transmit(&c, &req);

    assert_eq!(second.await.unwrap_err(), Error::Timeout);
    assert_eq!(started.elapsed(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_correlator_unmatched_passthrough() {
    let c = Correlator::new(Duration::from_secs(10), 5);
    let stray = request(9);
    match c.resolve(stray.clone()) {
        Resolution::Unmatched(msg) => assert_eq!(msg, stray),
        other => panic!("expected unmatched, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_correlator_reject_all() {
    let c = Correlator::new(Duration::from_secs(10), 5);
    let h1 = transmit(&c, &request(1));
    let h2 = transmit(&c, &request(2));

    c.reject_all(Error::ConnectionLost("gone".into()));
    assert_eq!(h1.await.unwrap_err(), Error::ConnectionLost("gone".into()));
    assert_eq!(h2.await.unwrap_err(), Error::ConnectionLost("gone".into()));
}

#[tokio::test(start_paused = true)]
async fn test_correlator_predicts_after_threshold() {
    let c = Correlator::new(Duration::from_secs(10), 5);

    for _ in 0..5 {
        let req = request(1);
        let handle = transmit(&c, &req);
        c.resolve(answer(&req, 2));
        handle.await.unwrap();
    }

    let sixth = request(1);
    let Prepared::Predicted(handle) = c.prepare(&sixth) else {
        panic!("sixth request should be predicted");
    };
    assert_eq!(c.pending_len(), 0);

    let response = handle.await.unwrap();
    assert_eq!(response.id, sixth.id);
    assert_eq!(response.payload.data::<i64>().unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_correlator_decay_demotes_prediction() {
    let c = Correlator::new(Duration::from_secs(10), 2);
    for _ in 0..2 {
        let req = request(1);
        let handle = transmit(&c, &req);
        c.resolve(answer(&req, 2));
        handle.await.unwrap();
    }
    assert!(c.is_cached(&request(1).signature()));

    c.decay();
    assert!(!c.is_cached(&request(1).signature()));
}

// ============================================================================
//  SERVICE
// ============================================================================

fn config() -> RuntimeConfig {
    RuntimeConfig::default().with_response_timeout(Duration::from_secs(10))
}

async fn next_message(peer: &MemoryTransport) -> Message {
    let bytes = peer.recv().await.unwrap().expect("channel closed");
    frame::decode(&bytes).unwrap()
}

fn start(name: &str) -> (Service, MemoryTransport) {
    let (local, peer) = MemoryTransport::pair();
    let service = Service::start(name, &config(), Arc::new(local)).unwrap();
    (service, peer)
}

#[tokio::test(start_paused = true)]
async fn test_service_identifies_first() {
    let (service, peer) = start("echo");
    service.send(Message::value(&1, "other").unwrap()).unwrap();

    let identify = next_message(&peer).await;
    assert!(identify.recipient.is_supervisor());
    let Payload::Identify(identify) = identify.payload else {
        panic!("first frame must be Identify");
    };
    assert_eq!(identify.service_name, "echo");
    assert_eq!(identify.instance_id, service.id().to_string());

    let next = next_message(&peer).await;
    assert_eq!(next.recipient, Address::from("other"));
}

#[tokio::test(start_paused = true)]
async fn test_service_send_keeps_no_state() {
    let (service, peer) = start("a");
    next_message(&peer).await;

    service.send(Message::value(&1, "b").unwrap()).unwrap();
    let sent = next_message(&peer).await;
    assert_eq!(sent.sender, service.address());
    assert_eq!(service.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_service_request_round_trip() {
    let (service, peer) = start("a");
    next_message(&peer).await;

    let handle = service.request(Message::value(&1, "incrementer").unwrap()).unwrap();
    let req = next_message(&peer).await;
    assert_eq!(req.sender, service.address());

    peer.send(&frame::encode(&answer(&req, 2)).unwrap()).await.unwrap();
    let response = handle.await.unwrap();
    assert_eq!(response.payload.data::<i64>().unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_service_sixth_identical_request_stays_local() {
    let (service, peer) = start("a");
    next_message(&peer).await;

    for _ in 0..5 {
        let handle = service.request(Message::value(&1, "incrementer").unwrap()).unwrap();
        let req = next_message(&peer).await;
        peer.send(&frame::encode(&answer(&req, 2)).unwrap()).await.unwrap();
        handle.await.unwrap();
    }

    let handle = service.request(Message::value(&1, "incrementer").unwrap()).unwrap();
    assert_eq!(handle.await.unwrap().payload.data::<i64>().unwrap(), 2);

    // nothing was written for the sixth request
    service.send(Message::value("marker", "b").unwrap()).unwrap();
    let next = next_message(&peer).await;
    assert_eq!(next.payload.data::<String>().unwrap(), "marker");
}

#[tokio::test(start_paused = true)]
async fn test_service_handler_and_respond() {
    let (service, peer) = start("incrementer");
    next_message(&peer).await;

    service.on_message(|svc, msg| {
        let n: i64 = msg.payload.data().unwrap();
        svc.respond(&msg, Message::value(&(n + 1), "").unwrap()).unwrap();
    });

    let mut req = Message::value(&41, "incrementer").unwrap();
    req.sender = Address::from("asker");
    peer.send(&frame::encode(&req).unwrap()).await.unwrap();

    let response = next_message(&peer).await;
    assert_eq!(response.id, req.id);
    assert_eq!(response.recipient, Address::from("asker"));
    assert_eq!(response.payload.data::<i64>().unwrap(), 42);
}

#[tokio::test(start_paused = true)]
async fn test_service_request_timeout() {
    let (service, peer) = start("a");
    next_message(&peer).await;

    let handle = service.request(Message::value(&1, "nobody").unwrap()).unwrap();
    assert_eq!(handle.await.unwrap_err(), Error::Timeout);
    assert_eq!(service.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_service_channel_loss_is_fatal() {
    let (service, peer) = start("a");
    next_message(&peer).await;

    let handle = service.request(Message::value(&1, "b").unwrap()).unwrap();
    next_message(&peer).await;
    peer.close().await.unwrap();

    assert!(matches!(handle.await.unwrap_err(), Error::ConnectionLost(_)));
    assert_eq!(service.closed().await, EXIT_CONNECTION_LOST);
    assert!(service.send(Message::value(&1, "b").unwrap()).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_service_exit_flushes_and_closes() {
    let (service, peer) = start("a");
    service.send(Message::value(&1, "b").unwrap()).unwrap();
    service.exit(7);
    service.exit(9);

    assert_eq!(service.closed().await, 7);
    assert!(matches!(next_message(&peer).await.payload, Payload::Identify(_)));
    assert_eq!(next_message(&peer).await.payload.data::<i64>().unwrap(), 1);
    assert_eq!(peer.recv().await.unwrap(), None);
}

#[test]
fn test_wait_for_blocks_on_runtime() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let (service, peer) = runtime.block_on(async { start("a") });

    let handle = runtime.block_on(async {
        next_message(&peer).await;
        service.request(Message::value(&1, "b").unwrap()).unwrap()
    });
    runtime.block_on(async {
        let req = next_message(&peer).await;
        peer.send(&frame::encode(&answer(&req, 2)).unwrap()).await.unwrap();
    });

    let response = wait_for(&runtime, handle, Duration::from_secs(5)).unwrap();
    assert_eq!(response.payload.data::<i64>().unwrap(), 2);

    let stuck = runtime.block_on(async { service.request(Message::value(&1, "b").unwrap()).unwrap() });
    let started = std::time::Instant::now();
    assert_eq!(wait_all(&runtime, vec![stuck], Duration::from_millis(50)).unwrap_err(), Error::Timeout);
    assert!(started.elapsed() < Duration::from_secs(5));
}
