//! Lifecycle of a voice session against fake devices and a fake agent.

use crate::helpers::{
    capabilities, drain_events, eventually, fixture, pcm, statuses, wait_for_status,
};
use care_voice::audio::device::UnitId;
use care_voice::pipeline::messages::{Speaker, TranscriptFragment};
use care_voice::transport::TransportEvent;
use care_voice::{EndReason, HandlerCell, RuntimeEvent, SessionError, StartRequest, Status};
use std::sync::atomic::Ordering;

fn request(role: &str) -> StartRequest {
    StartRequest::new(role, capabilities())
}

// ─── Start ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn mic_denied_stays_idle_and_never_connects() {
    let fx = fixture(HandlerCell::unbound());
    fx.devices.deny_mic.store(true, Ordering::SeqCst);
    let mut events = fx.session.subscribe_events();

    let result = fx.session.start(request("PATIENT")).await;

    assert!(matches!(result, Err(SessionError::Acquisition(_))));
    assert_eq!(fx.session.status(), Status::Idle);
    assert!(!fx.session.is_active());
    assert_eq!(fx.connector.opens(), 0, "no transport may be opened");
    assert_eq!(fx.devices.log().output_opens, 0);
    assert!(drain_events(&mut events).is_empty());
}

#[tokio::test]
async fn mic_stream_failure_never_connects() {
    let fx = fixture(HandlerCell::unbound());
    fx.devices.deny_stream.store(true, Ordering::SeqCst);
    let mut events = fx.session.subscribe_events();

    let result = fx.session.start(request("PATIENT")).await;

    assert!(matches!(result, Err(SessionError::Acquisition(_))));
    assert_eq!(fx.session.status(), Status::Idle);
    assert!(!fx.session.is_active());
    assert_eq!(fx.connector.opens(), 0, "no transport may be opened");
    let log = fx.devices.log();
    assert_eq!(log.input_opens, 1);
    assert_eq!(log.input_stops, 1, "microphone released");
    assert_eq!(log.output_opens, log.output_closes, "output released");
    assert!(drain_events(&mut events).is_empty());
}

#[tokio::test]
async fn output_failure_releases_the_microphone() {
    let fx = fixture(HandlerCell::unbound());
    fx.devices.fail_output.store(true, Ordering::SeqCst);

    let result = fx.session.start(request("PATIENT")).await;

    assert!(matches!(result, Err(SessionError::Acquisition(_))));
    let log = fx.devices.log();
    assert_eq!(log.input_opens, 1);
    assert_eq!(log.input_stops, 1);
    assert_eq!(fx.connector.opens(), 0);
    assert_eq!(fx.session.status(), Status::Idle);
}

#[tokio::test]
async fn transport_failure_releases_audio_devices() {
    let fx = fixture(HandlerCell::unbound());
    fx.connector.fail.store(true, Ordering::SeqCst);

    let result = fx.session.start(request("PATIENT")).await;

    assert!(matches!(result, Err(SessionError::Transport(_))));
    let log = fx.devices.log();
    assert_eq!(log.input_stops, 1);
    assert_eq!(log.output_closes, 1);
    assert_eq!(fx.session.status(), Status::Idle);
    assert!(!fx.session.is_active());
}

#[tokio::test]
async fn start_opens_listening_session_with_role_and_default_voice() {
    let fx = fixture(HandlerCell::unbound());

    let info = fx.session.start(request("NURSE")).await.unwrap();

    assert_eq!(fx.session.status(), Status::Listening);
    assert_eq!(info.voice, "Zephyr");
    assert_eq!(info.role, "NURSE");
    assert_eq!(fx.session.session_info(), Some(info));

    let setups = fx.connector.setups();
    assert_eq!(setups.len(), 1);
    assert_eq!(setups[0].voice, "Zephyr");
    assert_eq!(
        setups[0].instructions,
        "Help coordinate care. Current role: NURSE."
    );

    fx.session.stop().await;
}

#[tokio::test]
async fn requested_voice_overrides_default() {
    let fx = fixture(HandlerCell::unbound());
    let info = fx
        .session
        .start(request("DOCTOR").with_voice("Kore"))
        .await
        .unwrap();
    assert_eq!(info.voice, "Kore");
    assert_eq!(fx.connector.setups()[0].voice, "Kore");
    fx.session.stop().await;
}

#[tokio::test]
async fn second_start_is_rejected_while_active() {
    let fx = fixture(HandlerCell::unbound());
    fx.session.start(request("PATIENT")).await.unwrap();

    let second = fx.session.start(request("PATIENT")).await;

    assert!(matches!(second, Err(SessionError::AlreadyActive)));
    assert_eq!(fx.connector.opens(), 1);
    assert_eq!(fx.devices.log().input_opens, 1);
    fx.session.stop().await;
}

#[tokio::test]
async fn stop_during_pending_start_abandons_it() {
    let fx = fixture(HandlerCell::unbound());
    fx.connector.stall.store(true, Ordering::SeqCst);
    let mut events = fx.session.subscribe_events();

    let (started, ()) = tokio::join!(fx.session.start(request("PATIENT")), async {
        eventually("connect attempted", || fx.connector.opens() == 1).await;
        fx.session.stop().await;
    });

    assert!(matches!(started, Err(SessionError::StartCancelled)));
    assert_eq!(fx.session.status(), Status::Idle);
    assert!(!fx.session.is_active());
    let log = fx.devices.log();
    assert_eq!(log.input_stops, 1);
    assert_eq!(log.output_closes, 1);
    assert!(drain_events(&mut events).is_empty(), "session never went live");

    // The handle is usable again.
    fx.connector.stall.store(false, Ordering::SeqCst);
    fx.session.start(request("PATIENT")).await.unwrap();
    assert_eq!(fx.session.status(), Status::Listening);
    fx.session.stop().await;
}

// ─── Capture ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn microphone_blocks_reach_the_agent_as_16k_chunks() {
    let fx = fixture(HandlerCell::unbound());
    fx.session.start(request("PATIENT")).await.unwrap();
    let mut remote = fx.connector.take_remote();

    fx.devices.push_frames(&[0.25; 300]);
    assert!(remote.peer.audio_rx.try_recv().is_err(), "partial block held back");

    fx.devices.push_frames(&[0.25; 300]);
    let chunk = remote.peer.audio_rx.try_recv().unwrap();
    assert_eq!(chunk.sample_rate, 16_000);
    assert_eq!(chunk.sample_count, 160);
    assert_eq!(chunk.mime_type(), "audio/pcm;rate=16000");

    fx.session.stop().await;
}

// ─── Playback and status ──────────────────────────────────────────────────────

#[tokio::test]
async fn agent_audio_plays_gaplessly_and_drives_status() {
    let fx = fixture(HandlerCell::unbound());
    let mut events = fx.session.subscribe_events();
    let mut status = fx.session.watch_status();
    fx.session.start(request("PATIENT")).await.unwrap();
    let remote = fx.connector.take_remote();

    fx.devices.set_clock(1.0);
    remote.send(TransportEvent::AudioReceived(pcm(2400)));
    remote.send(TransportEvent::AudioReceived(pcm(4800)));
    wait_for_status(&mut status, Status::Speaking).await;
    eventually("two buffers scheduled", || fx.devices.log().scheduled.len() == 2).await;

    let scheduled = fx.devices.log().scheduled;
    let (first, first_start, first_len) = scheduled[0];
    let (second, second_start, _) = scheduled[1];
    assert_eq!(first_start, 1.0);
    assert_eq!(first_len, 2400);
    assert!((second_start - (first_start + 0.1)).abs() < 1e-9);

    fx.devices.finish(first);
    fx.devices.finish(second);
    wait_for_status(&mut status, Status::Listening).await;

    assert_eq!(
        statuses(&drain_events(&mut events)),
        vec![Status::Listening, Status::Speaking, Status::Listening]
    );
    fx.session.stop().await;
}

#[tokio::test]
async fn interruption_flushes_queued_audio_immediately() {
    let fx = fixture(HandlerCell::unbound());
    let mut events = fx.session.subscribe_events();
    let mut status = fx.session.watch_status();
    fx.session.start(request("PATIENT")).await.unwrap();
    let remote = fx.connector.take_remote();

    remote.send(TransportEvent::AudioReceived(pcm(2400)));
    remote.send(TransportEvent::AudioReceived(pcm(2400)));
    remote.send(TransportEvent::Interrupted);
    wait_for_status(&mut status, Status::Listening).await;
    eventually("both units stopped", || fx.devices.log().stopped.len() == 2).await;

    let mut stopped = fx.devices.log().stopped;
    stopped.sort();
    assert_eq!(stopped, vec![UnitId(0), UnitId(1)]);
    assert!(
        drain_events(&mut events).contains(&RuntimeEvent::Interrupted { flushed: 2 })
    );

    // A late completion for a flushed unit changes nothing.
    fx.devices.finish(UnitId(0));

    // Fresh audio starts at the clock, not after the discarded buffers.
    fx.devices.set_clock(0.05);
    remote.send(TransportEvent::AudioReceived(pcm(2400)));
    wait_for_status(&mut status, Status::Speaking).await;
    eventually("third buffer scheduled", || fx.devices.log().scheduled.len() == 3).await;
    assert_eq!(fx.devices.log().scheduled[2].1, 0.05);

    fx.session.stop().await;
}

#[tokio::test]
async fn malformed_audio_is_dropped_without_status_change() {
    let fx = fixture(HandlerCell::unbound());
    let mut status = fx.session.watch_status();
    fx.session.start(request("PATIENT")).await.unwrap();
    let remote = fx.connector.take_remote();

    remote.send(TransportEvent::AudioReceived(vec![1, 2, 3]));
    remote.send(TransportEvent::AudioReceived(pcm(240)));
    wait_for_status(&mut status, Status::Speaking).await;

    let scheduled = fx.devices.log().scheduled;
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].2, 240);
    assert!(fx.session.is_active());

    fx.session.stop().await;
}

// ─── Transcript ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn transcript_accumulates_and_resets_on_next_start() {
    let fx = fixture(HandlerCell::unbound());
    let mut transcript = fx.session.watch_transcript();
    fx.session.start(request("PATIENT")).await.unwrap();
    let remote = fx.connector.take_remote();

    for (speaker, text) in [
        (Speaker::User, "Check on "),
        (Speaker::Agent, "Looking that up."),
        (Speaker::User, "Maria Lopez"),
    ] {
        remote.send(TransportEvent::Transcript(TranscriptFragment {
            speaker,
            text: text.into(),
        }));
    }
    tokio::time::timeout(
        std::time::Duration::from_secs(2),
        transcript.wait_for(|t| t.user == "Check on Maria Lopez"),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(fx.session.transcript().agent, "Looking that up.");

    fx.session.stop().await;
    assert_eq!(fx.session.transcript().user, "Check on Maria Lopez");

    fx.session.start(request("PATIENT")).await.unwrap();
    assert!(fx.session.transcript().is_empty());
    fx.session.stop().await;
}

// ─── Teardown ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_twice_releases_everything_once() {
    let fx = fixture(HandlerCell::unbound());
    let mut events = fx.session.subscribe_events();
    fx.session.start(request("PATIENT")).await.unwrap();
    let remote = fx.connector.take_remote();

    fx.session.stop().await;
    fx.session.stop().await;

    let log = fx.devices.log();
    assert_eq!(log.input_stops, 1);
    assert_eq!(log.output_closes, 1);
    assert!(remote.peer.cancel.is_cancelled(), "transport closed");
    assert_eq!(fx.session.status(), Status::Idle);
    assert!(!fx.session.is_active());

    let ended: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, RuntimeEvent::SessionEnded { .. }))
        .collect();
    assert_eq!(
        ended,
        vec![RuntimeEvent::SessionEnded {
            reason: EndReason::Stopped
        }]
    );
}

#[tokio::test]
async fn transport_close_tears_down_and_later_stop_is_a_no_op() {
    let fx = fixture(HandlerCell::unbound());
    let mut events = fx.session.subscribe_events();
    let mut status = fx.session.watch_status();
    fx.session.start(request("PATIENT")).await.unwrap();
    let remote = fx.connector.take_remote();

    remote.send(TransportEvent::AudioReceived(pcm(2400)));
    remote.send(TransportEvent::Closed);
    wait_for_status(&mut status, Status::Idle).await;
    eventually("session slot cleared", || !fx.session.is_active()).await;

    fx.session.stop().await;

    let log = fx.devices.log();
    assert_eq!(log.input_stops, 1);
    assert_eq!(log.output_closes, 1);
    assert_eq!(log.stopped, vec![UnitId(0)], "queued audio discarded");
    assert!(drain_events(&mut events).contains(&RuntimeEvent::SessionEnded {
        reason: EndReason::TransportClosed
    }));

    // The handle is reusable after a transport failure.
    fx.session.start(request("PATIENT")).await.unwrap();
    assert_eq!(fx.connector.opens(), 2);
    fx.session.stop().await;
}

#[tokio::test]
async fn transport_error_ends_session_with_cause() {
    let fx = fixture(HandlerCell::unbound());
    let mut events = fx.session.subscribe_events();
    let mut status = fx.session.watch_status();
    fx.session.start(request("PATIENT")).await.unwrap();
    let remote = fx.connector.take_remote();

    remote.send(TransportEvent::Error("socket reset".into()));
    wait_for_status(&mut status, Status::Idle).await;
    eventually("session slot cleared", || !fx.session.is_active()).await;

    assert!(drain_events(&mut events).contains(&RuntimeEvent::SessionEnded {
        reason: EndReason::TransportError("socket reset".into())
    }));
}
