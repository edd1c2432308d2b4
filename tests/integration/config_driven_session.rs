//! Host-loaded configuration flowing into a session.

use crate::helpers::{FakeConnector, FakeDevices, capabilities};
use care_voice::audio::device::AudioDevices;
use care_voice::tools::ToolCall;
use care_voice::transport::{Connector, TransportEvent};
use care_voice::{HandlerCell, SessionConfig, StartRequest, VoiceSession};
use std::sync::Arc;

#[tokio::test]
async fn persona_and_dispatch_text_come_from_the_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        [persona]
        voice_name = "Aoede"

        [dispatch]
        default_result = "Done."
        "#,
    )
    .unwrap();
    let config = SessionConfig::from_file(&path).unwrap();

    let devices = Arc::new(FakeDevices::default());
    let connector = Arc::new(FakeConnector::default());
    let session = VoiceSession::new(
        config,
        devices as Arc<dyn AudioDevices>,
        Arc::clone(&connector) as Arc<dyn Connector>,
        HandlerCell::unbound(),
    );

    let info = session
        .start(StartRequest::new("DRIVER", capabilities()))
        .await
        .unwrap();
    assert_eq!(info.voice, "Aoede");
    assert_eq!(connector.setups()[0].voice, "Aoede");

    let mut remote = connector.take_remote();
    remote.send(TransportEvent::ToolCallReceived(vec![ToolCall {
        id: "r1".into(),
        name: "navigate".into(),
        args: Default::default(),
    }]));
    assert_eq!(remote.tool_results().await[0].result, "Done.");

    session.stop().await;
}

#[test]
fn saved_config_survives_a_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("care-voice").join("config.toml");

    let mut config = SessionConfig::default();
    config.transport.api_key_env = "CLEARWATER_LIVE_KEY".into();
    config.audio.input_device = Some("USB Headset".into());
    config.save_to_file(&path).unwrap();

    let loaded = SessionConfig::from_file(&path).unwrap();
    assert_eq!(loaded.transport.api_key_env, "CLEARWATER_LIVE_KEY");
    assert_eq!(loaded.audio.input_device.as_deref(), Some("USB Headset"));
    assert_eq!(loaded.audio.capture_block_size, 4096);
}
