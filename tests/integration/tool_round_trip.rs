//! Tool calls from the agent through the host handler and back.

use crate::helpers::{
    capabilities, drain_events, eventually, fixture, handler, pcm, statuses, wait_for_status,
};
use care_voice::tools::ToolCall;
use care_voice::transport::TransportEvent;
use care_voice::{ActionCall, HandlerCell, RuntimeEvent, StartRequest, Status};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        args: args.as_object().cloned().unwrap_or_default(),
    }
}

#[tokio::test]
async fn two_calls_in_one_message_get_one_batched_reply() {
    let fx = fixture(handler(|call: &ActionCall| {
        Ok(Some(format!("done {}", call.id)))
    }));
    fx.session
        .start(StartRequest::new("NURSE", capabilities()))
        .await
        .unwrap();
    let mut remote = fx.connector.take_remote();

    remote.send(TransportEvent::ToolCallReceived(vec![
        call("a", "getPatientInfo", json!({"patientName": "Maria Lopez"})),
        call("b", "navigate", json!({"target": "inbox"})),
    ]));

    let results = remote.tool_results().await;
    let mut ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(results.iter().all(|r| r.result == format!("done {}", r.id)));
    assert!(remote.peer.tool_rx.try_recv().is_err(), "exactly one reply");

    fx.session.stop().await;
}

#[tokio::test]
async fn handler_sees_upper_cased_action_and_arguments() {
    let seen: Arc<Mutex<Vec<ActionCall>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let fx = fixture(handler(move |call: &ActionCall| {
        sink.lock().unwrap().push(call.clone());
        Ok(None)
    }));
    fx.session
        .start(StartRequest::new("PATIENT", capabilities()))
        .await
        .unwrap();
    let mut remote = fx.connector.take_remote();

    remote.send(TransportEvent::ToolCallReceived(vec![call(
        "x1",
        "reportMedicalHelp",
        json!({"patientId": "p-17"}),
    )]));
    let results = remote.tool_results().await;

    assert_eq!(results[0].result, "Action complete.");
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].action, "REPORTMEDICALHELP");
    assert_eq!(seen[0].name, "reportMedicalHelp");
    assert_eq!(seen[0].arg_str("patientId"), Some("p-17"));
    drop(seen);

    fx.session.stop().await;
}

#[tokio::test]
async fn handler_swapped_mid_session_handles_the_next_call() {
    let fx = fixture(handler(|_: &ActionCall| Ok(Some("patient view".into()))));
    fx.session
        .start(StartRequest::new("PATIENT", capabilities()))
        .await
        .unwrap();
    let mut remote = fx.connector.take_remote();

    fx.session
        .set_action_handler(|_: &ActionCall| -> anyhow::Result<Option<String>> {
            Ok(Some("doctor view".into()))
        });
    remote.send(TransportEvent::ToolCallReceived(vec![call(
        "n1",
        "navigate",
        json!({"target": "doctor"}),
    )]));

    assert_eq!(remote.tool_results().await[0].result, "doctor view");
    fx.session.stop().await;
}

#[tokio::test]
async fn failing_and_panicking_handlers_still_answer_every_call() {
    let fx = fixture(handler(|call: &ActionCall| match call.id.as_str() {
        "err" => Err(anyhow::anyhow!("patient store offline")),
        "panic" => panic!("handler bug"),
        _ => Ok(Some("fine".into())),
    }));
    let mut events = fx.session.subscribe_events();
    fx.session
        .start(StartRequest::new("PATIENT", capabilities()))
        .await
        .unwrap();
    let mut remote = fx.connector.take_remote();

    remote.send(TransportEvent::ToolCallReceived(vec![
        call("err", "getPatientInfo", json!({})),
        call("panic", "navigate", json!({})),
        call("ok", "navigate", json!({})),
    ]));
    let results = remote.tool_results().await;

    assert_eq!(results.len(), 3);
    let failure = care_voice::config::DispatchConfig::default().failure_result;
    assert_eq!(results[0].result, failure);
    assert_eq!(results[1].result, failure);
    assert_eq!(results[2].result, "fine");
    assert!(fx.session.is_active(), "dispatch failures do not end the session");

    let successes: Vec<(String, bool)> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            RuntimeEvent::ToolResult { id, success, .. } => Some((id, success)),
            _ => None,
        })
        .collect();
    assert_eq!(
        successes,
        vec![
            ("err".into(), false),
            ("panic".into(), false),
            ("ok".into(), true)
        ]
    );

    fx.session.stop().await;
}

#[tokio::test]
async fn dispatch_passes_through_processing() {
    let fx = fixture(HandlerCell::unbound());
    let mut events = fx.session.subscribe_events();
    let mut status = fx.session.watch_status();
    fx.session
        .start(StartRequest::new("PATIENT", capabilities()))
        .await
        .unwrap();
    let mut remote = fx.connector.take_remote();

    remote.send(TransportEvent::ToolCallReceived(vec![call("t", "navigate", json!({}))]));
    remote.tool_results().await;
    eventually("status settled", || fx.session.status() == Status::Listening).await;

    // With audio still playing, the bridge hands status back to Speaking.
    remote.send(TransportEvent::AudioReceived(pcm(2400)));
    wait_for_status(&mut status, Status::Speaking).await;
    remote.send(TransportEvent::ToolCallReceived(vec![call("u", "navigate", json!({}))]));
    remote.tool_results().await;
    eventually("status settled", || fx.session.status() == Status::Speaking).await;

    assert_eq!(
        statuses(&drain_events(&mut events)),
        vec![
            Status::Listening,
            Status::Processing,
            Status::Listening,
            Status::Speaking,
            Status::Processing,
            Status::Speaking,
        ]
    );
    fx.session.stop().await;
}
