//! Sessions talking to each other through the in-process relay.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use codesync_core::{
    CollabSession, EditOp, EngineState, MemoryHub, PayloadFormat, Snapshot, SyncConfig,
    SyncEvent, SyncEventHandler,
};

fn config(sender: &str) -> SyncConfig {
    SyncConfig::new("room-1")
        .with_sender_id(sender)
        .with_coalesce_window(Duration::ZERO)
}

fn open(hub: &MemoryHub, sender: &str) -> CollabSession {
    CollabSession::open(config(sender), hub.connect()).unwrap()
}

#[test]
fn concurrent_edits_converge_through_relay() {
    let hub = MemoryHub::new();
    hub.set_buffered(true);
    let alice = open(&hub, "alice");
    let bob = open(&hub, "bob");

    alice.edit(EditOp::insert(0, "abc")).unwrap();
    hub.flush();
    assert_eq!(bob.text(), "abc");

    alice.edit(EditOp::insert(3, "X")).unwrap();
    bob.edit(EditOp::delete(0, 1)).unwrap();
    assert_eq!(alice.state(), EngineState::AwaitingAck);
    hub.flush();

    assert_eq!(alice.text(), "bcX");
    assert_eq!(bob.text(), "bcX");
    assert_eq!(alice.state(), EngineState::Idle);
    assert_eq!(bob.state(), EngineState::Idle);
}

#[test]
fn several_rounds_of_interleaved_typing_converge() {
    let hub = MemoryHub::new();
    hub.set_buffered(true);
    let alice = open(&hub, "alice");
    let bob = open(&hub, "bob");

    alice.set_text("fn main() {\n}\n").unwrap();
    hub.flush();

    // Both type inside the braces without seeing each other.
    alice.edit(EditOp::insert(12, "    let a = 1;\n")).unwrap();
    bob.edit(EditOp::insert(12, "    let b = 2;\n")).unwrap();
    bob.edit(EditOp::replace(3, 4, "start")).unwrap();
    hub.flush();
    assert_eq!(alice.text(), bob.text());
    assert_eq!(
        alice.text(),
        "fn start() {\n    let a = 1;\n    let b = 2;\n}\n"
    );

    alice.edit(EditOp::delete(0, 3)).unwrap();
    bob.edit(EditOp::insert(0, "pub ")).unwrap();
    hub.flush();
    assert_eq!(alice.text(), bob.text());
    assert_eq!(alice.snapshot().revision, bob.snapshot().revision);
}

#[test]
fn teardown_while_awaiting_ack_applies_nothing() {
    let hub = MemoryHub::new();
    hub.set_buffered(true);
    let alice = open(&hub, "alice");
    let bob = open(&hub, "bob");

    bob.edit(EditOp::insert(0, "mine")).unwrap();
    assert_eq!(bob.state(), EngineState::AwaitingAck);
    alice.edit(EditOp::insert(0, "theirs")).unwrap();

    bob.close();
    hub.flush();
    assert_eq!(bob.text(), "mine");
    assert_eq!(bob.state(), EngineState::Closed);
    assert_eq!(bob.pending_len(), 0);
    assert_eq!(alice.text(), "theirsmine");
}

#[test]
fn dropping_a_session_unregisters_it() {
    let hub = MemoryHub::new();
    let alice = open(&hub, "alice");
    let bob_transport = hub.connect();
    let bob = CollabSession::open(config("bob"), bob_transport.clone()).unwrap();
    drop(bob);

    alice.edit(EditOp::insert(0, "x")).unwrap();
    // Nothing is listening on bob's end anymore, and nothing panics.
    assert_eq!(alice.text(), "x");
    assert_eq!(alice.state(), EngineState::AwaitingAck);
}

#[test]
fn edits_held_while_disconnected_flush_on_reconnect() {
    let hub = MemoryHub::new();
    let alice_transport = hub.connect();
    let alice = CollabSession::open(config("alice"), alice_transport.clone()).unwrap();
    let bob = open(&hub, "bob");

    alice_transport.disconnect();
    alice.edit(EditOp::insert(0, "offline ")).unwrap();
    alice.edit(EditOp::insert(8, "work")).unwrap();
    alice.tick();
    assert_eq!(alice.state(), EngineState::LocalEditing);
    assert_eq!(bob.text(), "");

    alice_transport.reconnect();
    assert_eq!(bob.text(), "offline work");
    assert_eq!(alice.state(), EngineState::Idle);
}

#[test]
fn resync_adopts_peer_snapshot() {
    let hub = MemoryHub::new();
    let alice = CollabSession::open_with(
        config("alice"),
        Snapshot {
            buffer: "hello".to_string(),
            revision: 5,
        },
        hub.connect(),
        None,
    )
    .unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let handler: Arc<dyn SyncEventHandler> =
        Arc::new(move |event: SyncEvent| sink.lock().unwrap().push(event));
    let bob = CollabSession::open_with(
        config("bob"),
        Snapshot {
            buffer: "goodbye".to_string(),
            revision: 3,
        },
        hub.connect(),
        Some(handler),
    )
    .unwrap();

    bob.request_resync();
    assert_eq!(
        bob.snapshot(),
        Snapshot {
            buffer: "hello".to_string(),
            revision: 5
        }
    );
    {
        let events = events.lock().unwrap();
        assert!(events.contains(&SyncEvent::ResyncRequested));
        assert!(events.contains(&SyncEvent::Resynced { revision: 5 }));
    }

    bob.edit(EditOp::insert(5, "!")).unwrap();
    assert_eq!(alice.text(), "hello!");
}

#[test]
fn full_text_peer_interoperates() {
    let hub = MemoryHub::new();
    let legacy = CollabSession::open(
        config("legacy").with_payload_format(PayloadFormat::FullText),
        hub.connect(),
    )
    .unwrap();
    let modern = open(&hub, "modern");

    legacy.set_text("const x = 1;").unwrap();
    assert_eq!(modern.text(), "const x = 1;");

    modern.edit(EditOp::replace(10, 1, "2")).unwrap();
    assert_eq!(legacy.text(), "const x = 2;");
}

#[test]
fn echoing_relay_does_not_duplicate_edits() {
    let hub = MemoryHub::new().with_echo(true);
    let alice = open(&hub, "alice");
    let bob = open(&hub, "bob");

    alice.edit(EditOp::insert(0, "once")).unwrap();
    assert_eq!(alice.text(), "once");
    assert_eq!(bob.text(), "once");
    assert_eq!(alice.state(), EngineState::Idle);
}

#[test]
fn lost_frame_is_resent_before_later_edits_apply() {
    let hub = MemoryHub::new();
    hub.set_buffered(true);
    let alice = CollabSession::open(
        config("alice").with_ack_timeout(Duration::from_millis(1)),
        hub.connect(),
    )
    .unwrap();
    let bob = open(&hub, "bob");

    alice.edit(EditOp::insert(0, "XX")).unwrap();
    assert_eq!(hub.discard_queued(), 1);
    alice.edit(EditOp::insert(1, "Y")).unwrap();
    hub.flush();
    // Bob cannot place "Y" without the edit before it.
    assert_eq!(bob.text(), "");
    assert_eq!(alice.pending_len(), 2);

    std::thread::sleep(Duration::from_millis(5));
    alice.tick();
    hub.flush();
    assert_eq!(alice.text(), "XYX");
    assert_eq!(bob.text(), "XYX");
    assert_eq!(alice.pending_len(), 0);
}

#[test]
fn edit_made_while_resyncing_is_reported_dropped() {
    let hub = MemoryHub::new();
    hub.set_buffered(true);
    let hello = Snapshot {
        buffer: "hello".to_string(),
        revision: 5,
    };
    let alice =
        CollabSession::open_with(config("alice"), hello.clone(), hub.connect(), None).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let handler: Arc<dyn SyncEventHandler> =
        Arc::new(move |event: SyncEvent| sink.lock().unwrap().push(event));
    let bob =
        CollabSession::open_with(config("bob"), hello, hub.connect(), Some(handler)).unwrap();

    bob.request_resync();
    bob.edit(EditOp::insert(5, "!")).unwrap();
    assert_eq!(bob.state(), EngineState::LocalEditing);
    hub.flush();

    assert_eq!(alice.text(), "hello");
    assert_eq!(bob.text(), "hello");
    assert_eq!(bob.pending_len(), 0);
    assert!(
        events
            .lock()
            .unwrap()
            .contains(&SyncEvent::EditDropped { origin_revision: 5 })
    );
}
