use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use kyrobus::{
    BoxError, ChannelConfig, EmitOptions, EntityId, EventChannel, ListenOptions, OffKind,
    Registration, Replies, Target,
};

type Log = Arc<Mutex<Vec<Replies>>>;

fn recorder() -> (Log, impl Fn(&Replies, &Registration) + Send + Sync + 'static) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (log, move |replies: &Replies, _: &Registration| {
        sink.lock().unwrap().push(replies.clone());
    })
}

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let c = Arc::new(AtomicUsize::new(0));
    (Arc::clone(&c), c)
}

#[test]
fn listener_first_then_emit_replies_once() {
    let ch = EventChannel::new();
    let listener = ch
        .on("a", |p, _| Ok(json!(p.as_i64().unwrap_or(0) * 2)), ListenOptions::default())
        .unwrap();

    let (log, on_reply) = recorder();
    let trigger = ch.emit("a", json!(5), EmitOptions::new().on_reply(on_reply)).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].get(&listener.id()), Some(&json!(10)));
    // matched and unwaited: retired after dispatch
    assert!(!trigger.has());
    assert_eq!(ch.size("a").unwrap().emit, 0);
}

#[test]
fn waited_trigger_catches_every_later_listener() {
    let ch = EventChannel::new();
    let (log, on_reply) = recorder();
    let trigger = ch
        .emit("a", json!(5), EmitOptions::new().wait().on_reply(on_reply))
        .unwrap();
    assert!(log.lock().unwrap().is_empty());

    let first = ch.on("a", |p, _| Ok(p.clone()), ListenOptions::default()).unwrap();
    assert!(trigger.has());
    let second = ch.on("a", |_, _| Ok(json!("late")), ListenOptions::default()).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].len(), 1);
    assert_eq!(log[0].get(&first.id()), Some(&json!(5)));
    assert_eq!(log[1].get(&second.id()), Some(&json!("late")));
    assert!(trigger.has());
}

#[tokio::test]
async fn synchronous_replies_precede_asynchronous_ones() {
    let ch = EventChannel::new();
    let slow = ch
        .on_wait(
            "a",
            |_p: Value, _reg: Registration| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<Value, BoxError>(json!("slow"))
            },
            ListenOptions::default(),
        )
        .unwrap();
    let fast = ch.on("a", |_, _| Ok(json!("fast")), ListenOptions::default()).unwrap();

    let (log, on_reply) = recorder();
    let trigger = ch.emit("a", json!(null), EmitOptions::new().on_reply(on_reply)).unwrap();

    {
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].keys().copied().collect::<Vec<_>>(), vec![fast.id()]);
    }
    assert!(!trigger.has());

    tokio::time::sleep(Duration::from_millis(250)).await;

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].keys().copied().collect::<Vec<_>>(), vec![fast.id(), slow.id()]);
    assert_eq!(log[1].get(&slow.id()), Some(&json!("slow")));
}

#[test]
fn once_listener_answers_first_emit_only() {
    let ch = EventChannel::new();
    let (calls, seen) = counter();
    ch.on(
        "a",
        move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(json!(null))
        },
        ListenOptions::once(),
    )
    .unwrap();

    ch.emit("a", json!(1), EmitOptions::new()).unwrap();
    let second = ch.emit("a", json!(2), EmitOptions::new()).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(ch.size("a").unwrap().on, 0);
    // nobody left to catch it
    assert!(second.has());
}

#[test]
fn unmatched_trigger_stays_pending_until_off() {
    let ch = EventChannel::new();
    let trigger = ch.emit("never", json!(1), EmitOptions::new()).unwrap();
    assert!(trigger.has());
    assert!(ch.has(trigger.id()));
    assert_eq!(ch.size("never").unwrap().emit, 1);

    trigger.off();
    assert!(!trigger.has());
    trigger.off();
    assert_eq!(ch.size("never").unwrap().count(), 0);
}

#[test]
fn pending_trigger_is_consumed_by_first_listener() {
    let ch = EventChannel::new();
    let (log, on_reply) = recorder();
    let trigger = ch.emit("a", json!(3), EmitOptions::new().on_reply(on_reply)).unwrap();

    let (calls, seen) = counter();
    ch.on(
        "a",
        move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(json!(true))
        },
        ListenOptions::default(),
    )
    .unwrap();
    assert!(!trigger.has());

    ch.on("a", |_, _| Ok(json!(false)), ListenOptions::default()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn self_off_suppresses_async_reply() {
    let ch = EventChannel::new();
    ch.on_wait(
        "a",
        |_p: Value, reg: Registration| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            reg.off();
            Ok::<Value, BoxError>(json!("too late"))
        },
        ListenOptions::default(),
    )
    .unwrap();

    let (log, on_reply) = recorder();
    ch.emit("a", json!(null), EmitOptions::new().on_reply(on_reply)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(log.lock().unwrap().is_empty());
    assert_eq!(ch.size("a").unwrap().on, 0);
}

#[test]
fn self_off_in_sync_callback_suppresses_reply() {
    let ch = EventChannel::new();
    ch.on(
        "a",
        |_, reg| {
            reg.off();
            Ok(json!(1))
        },
        ListenOptions::default(),
    )
    .unwrap();

    let (log, on_reply) = recorder();
    let trigger = ch.emit("a", json!(null), EmitOptions::new().on_reply(on_reply)).unwrap();
    assert!(log.lock().unwrap().is_empty());
    assert!(!trigger.has());
}

#[tokio::test]
async fn off_trigger_abandons_in_flight_replies() {
    let ch = EventChannel::new();
    ch.on_wait(
        "slow",
        |_p: Value, _reg: Registration| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<Value, BoxError>(json!(1))
        },
        ListenOptions::default(),
    )
    .unwrap();

    let (log, on_reply) = recorder();
    let trigger = ch
        .emit("slow", json!(null), EmitOptions::new().wait().on_reply(on_reply))
        .unwrap();
    trigger.off();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn failing_listeners_do_not_block_others() {
    let ch = EventChannel::new();
    ch.on("a", |_, _| Err("boom".into()), ListenOptions::default()).unwrap();
    ch.on("a", |_, _| panic!("listener exploded"), ListenOptions::default())
        .unwrap();
    let ok = ch.on("a", |_, _| Ok(json!("fine")), ListenOptions::default()).unwrap();

    let (log, on_reply) = recorder();
    ch.emit("a", json!(null), EmitOptions::new().on_reply(on_reply)).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].len(), 1);
    assert_eq!(log[0].get(&ok.id()), Some(&json!("fine")));
}

#[test]
fn failed_reply_does_not_consume_once_listener() {
    let ch = EventChannel::new();
    let (calls, seen) = counter();
    let listener = ch
        .on(
            "a",
            move |_, _| {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("first attempt fails".into())
                } else {
                    Ok(json!(null))
                }
            },
            ListenOptions::once(),
        )
        .unwrap();

    ch.emit("a", json!(1), EmitOptions::new()).unwrap();
    assert!(listener.has());
    ch.emit("a", json!(2), EmitOptions::new()).unwrap();
    assert!(!listener.has());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn once_trigger_takes_the_first_reply() {
    let ch = EventChannel::new();
    let first = ch.on("a", |_, _| Ok(json!(1)), ListenOptions::default()).unwrap();
    let (calls, seen) = counter();
    ch.on(
        "a",
        move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(json!(2))
        },
        ListenOptions::default(),
    )
    .unwrap();

    let (log, on_reply) = recorder();
    let trigger = ch
        .emit("a", json!(null), EmitOptions::new().wait().once().on_reply(on_reply))
        .unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].keys().copied().collect::<Vec<_>>(), vec![first.id()]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!trigger.has());
}

#[test]
fn deferred_listener_outside_runtime_leaves_trigger_pending() {
    let ch = EventChannel::new();
    let (calls, seen) = counter();
    let listener = ch
        .on_wait(
            "a",
            move |_p: Value, _reg: Registration| {
                seen.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<Value, BoxError>(json!(1)) }
            },
            ListenOptions::once(),
        )
        .unwrap();

    let (log, on_reply) = recorder();
    let trigger = ch.emit("a", json!(null), EmitOptions::new().on_reply(on_reply)).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(log.lock().unwrap().is_empty());
    assert!(trigger.has());
    assert!(listener.has());

    // a synchronous listener still gets the trigger
    let sync = ch.on("a", |_, _| Ok(json!(2)), ListenOptions::default()).unwrap();
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].get(&sync.id()), Some(&json!(2)));
    assert!(!trigger.has());
}

#[test]
fn deferred_listener_registered_outside_runtime_skips_pending_trigger() {
    let ch = EventChannel::new();
    let trigger = ch.emit("b", json!(null), EmitOptions::new()).unwrap();
    ch.on_wait(
        "b",
        |_p: Value, _reg: Registration| async move { Ok::<Value, BoxError>(json!(1)) },
        ListenOptions::default(),
    )
    .unwrap();

    assert!(trigger.has());
    assert_eq!(ch.size("b").unwrap().emit, 1);
}

#[test]
fn emit_now_returns_synchronous_replies() {
    let ch = EventChannel::new();
    let double = ch
        .on("a", |p, _| Ok(json!(p.as_i64().unwrap_or(0) * 2)), ListenOptions::default())
        .unwrap();
    let negate = ch
        .on("a", |p, _| Ok(json!(-p.as_i64().unwrap_or(0))), ListenOptions::default())
        .unwrap();

    let replies = ch.emit_now("a", json!(4)).unwrap();
    assert_eq!(replies.keys().copied().collect::<Vec<_>>(), vec![double.id(), negate.id()]);
    assert_eq!(replies.get(&double.id()), Some(&json!(8)));
    assert_eq!(replies.get(&negate.id()), Some(&json!(-4)));
    assert_eq!(ch.size("a").unwrap().emit, 0);
}

#[test]
fn emit_now_does_not_keep_unmatched_trigger() {
    let ch = EventChannel::new();
    let replies = ch.emit_now("a", json!(1)).unwrap();
    assert!(replies.is_empty());
    assert_eq!(ch.size("a").unwrap().emit, 0);

    let (calls, seen) = counter();
    ch.on(
        "a",
        move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(json!(null))
        },
        ListenOptions::default(),
    )
    .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(ch.emit_now("", json!(1)).unwrap_err().is_validation());
}

#[tokio::test]
async fn emit_async_resolves_with_synchronous_replies() {
    let ch = EventChannel::new();
    let listener = ch.on("a", |p, _| Ok(p.clone()), ListenOptions::default()).unwrap();
    ch.on_wait(
        "a",
        |_p: Value, _reg: Registration| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<Value, BoxError>(json!("late"))
        },
        ListenOptions::default(),
    )
    .unwrap();

    let replies = ch.emit_async("a", json!(3), EmitOptions::new()).unwrap().await.unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies.get(&listener.id()), Some(&json!(3)));
}

#[tokio::test]
async fn emit_async_waits_for_a_later_listener() {
    let ch = EventChannel::new();
    let (log, on_reply) = recorder();
    let pending = ch
        .emit_async("a", json!(1), EmitOptions::new().on_reply(on_reply))
        .unwrap();
    assert!(pending.trigger().has());

    let producer = ch.clone();
    let listener = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        producer
            .on_wait(
                "a",
                |p: Value, _reg: Registration| async move {
                    Ok::<Value, BoxError>(json!(p.as_i64().unwrap_or(0) + 1))
                },
                ListenOptions::default(),
            )
            .unwrap()
    });

    let replies = pending.await.unwrap();
    let listener = listener.await.unwrap();
    assert_eq!(replies.get(&listener.id()), Some(&json!(2)));
    // the caller's reply callback runs as well
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn cancelled_emit_async_fails_and_drops_the_trigger() {
    let ch = EventChannel::new();
    let pending = ch.emit_async("a", json!(null), EmitOptions::new()).unwrap();
    let id = pending.id();
    assert!(ch.has(id));

    assert!(pending.cancel());
    assert!(!pending.cancel());
    assert!(!ch.has(id));

    let err = pending.await.unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
fn off_by_name_and_pattern_respects_kind() {
    let ch = EventChannel::new();
    let l1 = ch.on("user.created", |_, _| Ok(json!(null)), ListenOptions::default()).unwrap();
    let l2 = ch.on("user.deleted", |_, _| Ok(json!(null)), ListenOptions::default()).unwrap();
    let t1 = ch.emit("user.updated", json!(null), EmitOptions::new()).unwrap();
    let other = ch.emit("order.created", json!(null), EmitOptions::new()).unwrap();

    let pattern = Target::pattern(r"^user\.").unwrap();
    assert_eq!(ch.size(pattern.clone()).unwrap().count(), 3);

    let removed = ch.off_kind(pattern.clone(), OffKind::On).unwrap();
    assert_eq!(removed, vec![l1.id(), l2.id()]);
    assert!(t1.has());

    assert_eq!(ch.off(pattern).unwrap(), vec![t1.id()]);
    assert!(other.has());
    assert!(ch.off("missing").unwrap().is_empty());
    assert!(ch.off(EntityId::from_raw(999)).unwrap().is_empty());
}

#[test]
fn id_size_reports_single_entity() {
    let ch = EventChannel::new();
    let l = ch.on("a", |_, _| Ok(json!(null)), ListenOptions::default()).unwrap();
    let size = ch.size(l.id()).unwrap();
    assert_eq!((size.on, size.emit, size.hook), (1, 0, 0));
    assert_eq!(size.count(), 1);
}

#[test]
fn listener_registered_inside_callback_sees_pending_triggers() {
    let ch = EventChannel::new();
    ch.emit("inner", json!("cached"), EmitOptions::new().wait()).unwrap();

    let nested = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&nested);
    let handle = ch.clone();
    ch.on(
        "outer",
        move |_, _| {
            let got = Arc::clone(&slot);
            handle.on(
                "inner",
                move |p, _| {
                    *got.lock().unwrap() = Some(p.clone());
                    Ok(json!(null))
                },
                ListenOptions::default(),
            )?;
            Ok(json!(null))
        },
        ListenOptions::once(),
    )
    .unwrap();
    ch.emit("outer", json!(null), EmitOptions::new()).unwrap();

    assert_eq!(*nested.lock().unwrap(), Some(json!("cached")));
}

#[test]
fn restore_rebuilds_pending_triggers() {
    let source = EventChannel::new();
    source.emit("job", json!({"n": 1}), EmitOptions::new()).unwrap();
    source.emit("job", json!({"n": 2}), EmitOptions::new().wait()).unwrap();
    let snapshot = serde_json::to_string(&source.export()).unwrap();

    let target = EventChannel::with_config(ChannelConfig::default());
    let snapshot: kyrobus::ChannelSnapshot = serde_json::from_str(&snapshot).unwrap();
    target.restore(&snapshot.triggers).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    target
        .on(
            "job",
            move |p, _| {
                sink.lock().unwrap().push(p["n"].clone());
                Ok(json!(null))
            },
            ListenOptions::default(),
        )
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![json!(1), json!(2)]);
    // the waited trigger stays open
    assert_eq!(target.size("job").unwrap().emit, 1);
}
