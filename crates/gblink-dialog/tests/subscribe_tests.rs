//! Subscription lifecycle: renewal scheduling, notify-driven extension,
//! 5xx retry, deferred start, and notifier-side teardown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockSip, CAMERA, LOCAL_PLATFORM, PEER_PLATFORM};
use gblink_core::manscdp::detail::{Keepalive, MessageDetail, ResultKind};
use gblink_core::{Charset, CmdKind, Message, RootKind, Utf8Transcoder};
use gblink_dialog::errors::DialogError;
use gblink_dialog::sip::SubscribeOutcome;
use gblink_dialog::{SignalingConfig, SignalingManager, SubscribeStatus, TerminateReason};
use tokio_test::assert_ok;

fn manager_with(sip: &Arc<MockSip>, config: SignalingConfig) -> Arc<SignalingManager> {
    common::init_tracing();
    let manager = SignalingManager::new(
        LOCAL_PLATFORM,
        sip.clone(),
        Arc::new(Utf8Transcoder),
        config,
    );
    let peer = manager.add_peer(PEER_PLATFORM, Charset::Utf8);
    peer.set_online(true);
    manager
}

fn manager(sip: &Arc<MockSip>) -> Arc<SignalingManager> {
    manager_with(sip, SignalingConfig::default())
}

fn alarm_notify() -> Message {
    let mut message = Message::new(RootKind::Notify, CmdKind::Keepalive);
    message.set_device_id(CAMERA);
    message.set_detail(MessageDetail::Keepalive(Keepalive {
        status: ResultKind::Ok,
        faulty_devices: Vec::new(),
    }));
    message
}

#[tokio::test(start_paused = true)]
async fn renewal_is_scheduled_ahead_of_expiry() {
    let sip = MockSip::new();
    let manager = manager(&sip);
    sip.queue_subscribe(Ok(SubscribeOutcome { code: 200, handle: Some(11) }));

    let sub = manager.open_subscription(PEER_PLATFORM, "Catalog", 3600).unwrap();
    tokio_test::assert_ok!(sub.start().await);

    assert_eq!(sub.status(), SubscribeStatus::Active);
    assert_eq!(sub.handle(), Some(11));
    assert_eq!(sub.expires(), 3600);
    assert!(manager.subscriptions().resolve(11).is_some());
    assert_eq!(sip.sent_subscribes.lock().len(), 1);
    // Renewal fires one margin (30s) before expiry.
    assert_eq!(sub.renewal_in(), Some(Duration::from_secs(3570)));
    assert_eq!(sub.remaining(), Some(Duration::from_secs(3600)));
}

#[tokio::test(start_paused = true)]
async fn renewal_timer_resubscribes_inside_the_dialog() {
    let sip = MockSip::new();
    let manager = manager(&sip);
    sip.queue_subscribe(Ok(SubscribeOutcome { code: 200, handle: Some(11) }));
    sip.queue_subscribe(Ok(SubscribeOutcome { code: 200, handle: Some(11) }));

    let sub = manager.open_subscription(PEER_PLATFORM, "Catalog", 60).unwrap();
    sub.start().await.unwrap();
    assert_eq!(sub.renewal_in(), Some(Duration::from_secs(30)));

    tokio::time::sleep(Duration::from_secs(31)).await;

    let sent = sip.sent_subscribes.lock().clone();
    assert_eq!(sent.len(), 2);
    // The refresh reuses the established handle.
    assert_eq!(sent[1].4, Some(11));
    assert_eq!(sub.status(), SubscribeStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn notify_extension_reschedules_the_renewal() {
    let sip = MockSip::new();
    let manager = manager(&sip);
    sip.queue_subscribe(Ok(SubscribeOutcome { code: 200, handle: Some(11) }));

    let sub = manager.open_subscription(PEER_PLATFORM, "Catalog", 3600).unwrap();
    sub.start().await.unwrap();

    assert_eq!(manager.on_notify(11, "active;expires=7200", None), 200);
    assert_eq!(sub.expires(), 7200);
    assert_eq!(sub.remaining(), Some(Duration::from_secs(7200)));
    assert_eq!(sub.renewal_in(), Some(Duration::from_secs(7170)));
}

#[tokio::test(start_paused = true)]
async fn transient_refusals_are_retried() {
    let sip = MockSip::new();
    let manager = manager(&sip);
    sip.queue_subscribe(Ok(SubscribeOutcome { code: 503, handle: None }));
    sip.queue_subscribe(Ok(SubscribeOutcome { code: 200, handle: Some(4) }));

    let sub = manager.open_subscription(PEER_PLATFORM, "Alarm", 3600).unwrap();
    tokio_test::assert_ok!(sub.start().await);

    assert_eq!(sub.status(), SubscribeStatus::Active);
    assert_eq!(sip.sent_subscribes.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn retry_cap_gives_the_subscription_up() {
    let sip = MockSip::new();
    let config = SignalingConfig { resubscribe_retry_cap: Some(1), ..Default::default() };
    let manager = manager_with(&sip, config);
    sip.queue_subscribe(Ok(SubscribeOutcome { code: 503, handle: None }));
    sip.queue_subscribe(Ok(SubscribeOutcome { code: 503, handle: None }));

    let sub = manager.open_subscription(PEER_PLATFORM, "Alarm", 3600).unwrap();
    let err = sub.start().await.unwrap_err();
    assert!(matches!(err, DialogError::Rejected { code: 503, .. }));
    assert_eq!(sub.status(), SubscribeStatus::Terminated);
    assert_eq!(sub.terminate_reason(), Some(TerminateReason::GiveUp));
    assert_eq!(sip.sent_subscribes.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn hard_refusal_terminates_as_rejected() {
    let sip = MockSip::new();
    let manager = manager(&sip);
    sip.queue_subscribe(Ok(SubscribeOutcome { code: 488, handle: None }));

    let sub = manager.open_subscription(PEER_PLATFORM, "Catalog", 3600).unwrap();
    assert!(sub.start().await.is_err());
    assert_eq!(sub.status(), SubscribeStatus::Terminated);
    assert_eq!(sub.terminate_reason(), Some(TerminateReason::Rejected));
}

#[tokio::test(start_paused = true)]
async fn start_defers_until_the_peer_comes_online() {
    let sip = MockSip::new();
    let manager = SignalingManager::new(
        LOCAL_PLATFORM,
        sip.clone(),
        Arc::new(Utf8Transcoder),
        SignalingConfig::default(),
    );
    let peer = manager.add_peer(PEER_PLATFORM, Charset::Utf8);

    let sub = manager.open_subscription(PEER_PLATFORM, "Catalog", 3600).unwrap();
    sub.start().await.unwrap();
    assert_eq!(sub.status(), SubscribeStatus::Pending);
    assert!(sip.sent_subscribes.lock().is_empty());

    sip.queue_subscribe(Ok(SubscribeOutcome { code: 200, handle: Some(9) }));
    peer.set_online(true);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(sub.status(), SubscribeStatus::Active);
    assert_eq!(sub.handle(), Some(9));
    assert_eq!(sip.sent_subscribes.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn peer_that_stays_offline_times_the_deferral_out() {
    let sip = MockSip::new();
    let manager = SignalingManager::new(
        LOCAL_PLATFORM,
        sip.clone(),
        Arc::new(Utf8Transcoder),
        SignalingConfig { offline_wait: Duration::from_secs(120), ..Default::default() },
    );
    manager.add_peer(PEER_PLATFORM, Charset::Utf8);

    let sub = manager.open_subscription(PEER_PLATFORM, "Catalog", 3600).unwrap();
    sub.start().await.unwrap();
    assert_eq!(sub.status(), SubscribeStatus::Pending);

    tokio::time::sleep(Duration::from_secs(121)).await;

    assert_eq!(sub.status(), SubscribeStatus::Terminated);
    assert_eq!(sub.terminate_reason(), Some(TerminateReason::Timeout));
    assert!(sip.sent_subscribes.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn notifies_ride_the_active_subscription() {
    let sip = MockSip::new();
    let manager = manager(&sip);
    sip.queue_subscribe(Ok(SubscribeOutcome { code: 200, handle: Some(11) }));

    let sub = manager.open_subscription(PEER_PLATFORM, "Catalog", 3600).unwrap();
    sub.start().await.unwrap();

    let code = sub.send_notify(alarm_notify()).await.unwrap();
    assert_eq!(code, 200);

    let notifies = sip.sent_notifies.lock().clone();
    assert_eq!(notifies.len(), 1);
    let (handle, state, body) = &notifies[0];
    assert_eq!(*handle, 11);
    assert_eq!(state, "active;expires=3600");
    assert!(body.is_some());
    assert!(sip.sent_messages.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn pending_sessions_fall_back_to_plain_messages() {
    let sip = MockSip::new();
    let manager = manager(&sip);

    let sub = manager.open_subscription(PEER_PLATFORM, "Catalog", 3600).unwrap();
    assert_eq!(sub.status(), SubscribeStatus::Pending);

    let code = sub.send_notify(alarm_notify()).await.unwrap();
    assert_eq!(code, 200);
    assert!(sip.sent_notifies.lock().is_empty());
    assert_eq!(sip.sent_messages.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn inbound_subscriptions_confirm_and_tear_down_with_notifys() {
    let sip = MockSip::new();
    let manager = manager(&sip);

    assert_eq!(manager.on_subscribe(PEER_PLATFORM, 5, "Catalog", 300).await, 200);
    tokio::time::sleep(Duration::from_millis(1)).await;

    let sub = manager.subscriptions().resolve(5).unwrap();
    assert_eq!(sub.status(), SubscribeStatus::Active);
    assert!(sub.is_incoming());
    {
        let notifies = sip.sent_notifies.lock();
        assert_eq!(notifies.len(), 1);
        assert_eq!(notifies[0].1, "active;expires=300");
    }

    // A refresh adopts the new lifetime without re-confirming.
    assert_eq!(manager.on_subscribe(PEER_PLATFORM, 5, "Catalog", 600).await, 200);
    assert_eq!(sub.expires(), 600);
    assert_eq!(sip.sent_notifies.lock().len(), 1);

    manager.shutdown().await;
    assert_eq!(sub.status(), SubscribeStatus::Terminated);
    assert_eq!(sub.terminate_reason(), Some(TerminateReason::Deactivated));
    {
        let notifies = sip.sent_notifies.lock();
        assert_eq!(notifies.len(), 2);
        assert_eq!(notifies[1].1, "terminated;reason=deactivated");
    }
    assert!(manager.subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn terminated_notify_ends_the_session() {
    let sip = MockSip::new();
    let manager = manager(&sip);
    sip.queue_subscribe(Ok(SubscribeOutcome { code: 200, handle: Some(11) }));

    let sub = manager.open_subscription(PEER_PLATFORM, "Catalog", 3600).unwrap();
    sub.start().await.unwrap();

    assert_eq!(manager.on_notify(11, "terminated;reason=timeout", None), 200);
    assert_eq!(sub.status(), SubscribeStatus::Terminated);
    assert_eq!(sub.terminate_reason(), Some(TerminateReason::Timeout));
    assert!(manager.subscriptions().resolve(11).is_none());
    assert_eq!(manager.on_notify(11, "active;expires=60", None), 481);
}

#[tokio::test(start_paused = true)]
async fn notify_bodies_reach_the_callback() {
    let sip = MockSip::new();
    let manager = manager(&sip);
    sip.queue_subscribe(Ok(SubscribeOutcome { code: 200, handle: Some(11) }));

    let sub = manager.open_subscription(PEER_PLATFORM, "Catalog", 3600).unwrap();
    sub.start().await.unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    sub.set_notify_callback(move |message| {
        sink.lock().push(message.device_id().unwrap_or_default().to_string());
        200
    });

    let body = alarm_notify().to_wire(&Utf8Transcoder).unwrap();
    assert_eq!(manager.on_notify(11, "active;expires=3600", Some(&body)), 200);
    assert_eq!(seen.lock().as_slice(), [CAMERA.to_string()]);

    assert_eq!(manager.on_notify(11, "active;expires=3600", Some(b"<Notify>".as_slice())), 400);
}
