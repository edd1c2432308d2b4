//! Gemini Live wire protocol.
//!
//! Client frames are externally tagged JSON objects (`{"setup": {..}}`,
//! `{"realtimeInput": {..}}`, `{"toolResponse": {..}}`). Server frames are a
//! single object whose optional members say what happened; one frame may
//! carry transcripts, audio, tool calls and an interruption at once.

use super::{SessionSetup, TransportEvent};
use crate::audio::codec;
use crate::error::{Result, SessionError};
use crate::pipeline::messages::{PcmChunk, Speaker, TranscriptFragment};
use crate::tools::{ParameterKind, ToolArgs, ToolCall, ToolDeclaration, ToolResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// Setup frame for a model and session description.
    pub fn setup(model: &str, setup: &SessionSetup) -> Self {
        let tools = if setup.tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolSet {
                function_declarations: setup.tools.iter().map(FunctionDeclaration::from).collect(),
            }]
        };

        Self::Setup(Setup {
            model: model.to_owned(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_owned()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: setup.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: setup.instructions.clone(),
                }],
            },
            tools,
            input_audio_transcription: TranscriptionConfig {},
            output_audio_transcription: TranscriptionConfig {},
        })
    }

    pub fn audio(chunk: &PcmChunk) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: chunk.mime_type(),
                data: chunk.data.clone(),
            }],
        })
    }

    pub fn tool_results(results: &[ToolResult]) -> Self {
        Self::ToolResponse(ToolResponse {
            function_responses: results
                .iter()
                .map(|r| FunctionResponse {
                    id: r.id.clone(),
                    name: r.name.clone(),
                    response: FunctionResult {
                        result: r.result.clone(),
                    },
                })
                .collect(),
        })
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SessionError::Transport(format!("cannot encode client message: {e}")))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSet>,
    pub input_audio_transcription: TranscriptionConfig,
    pub output_audio_transcription: TranscriptionConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Empty object enabling transcription of one direction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: ObjectSchema,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectSchema {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl From<&ToolDeclaration> for FunctionDeclaration {
    fn from(tool: &ToolDeclaration) -> Self {
        let properties = tool
            .parameters
            .iter()
            .map(|(name, spec)| {
                let (kind, values) = match &spec.kind {
                    ParameterKind::String => ("STRING", None),
                    ParameterKind::Boolean => ("BOOLEAN", None),
                    ParameterKind::Enum { values } => ("STRING", Some(values.clone())),
                };
                (
                    name.clone(),
                    PropertySchema {
                        kind,
                        description: spec.description.clone(),
                        values,
                    },
                )
            })
            .collect();

        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: ObjectSchema {
                kind: "OBJECT",
                properties,
                required: tool
                    .required_parameters()
                    .into_iter()
                    .map(str::to_owned)
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: FunctionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResult {
    pub result: String,
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCallFrame>,
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<InboundPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundPart {
    #[serde(default)]
    pub inline_data: Option<Blob>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallFrame {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: ToolArgs,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

impl ServerMessage {
    /// Parse one text or binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Decode`] if the frame is not a JSON object.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        serde_json::from_slice(frame)
            .map_err(|e| SessionError::Decode(format!("unparseable server message: {e}")))
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten the frame into transport events.
    ///
    /// Order: transcripts, audio parts as they appear, the tool-call batch,
    /// cancellations, interruption, turn completion, go-away. Audio parts with
    /// a malformed payload are dropped.
    pub fn into_events(self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        let mut interrupted = false;
        let mut turn_complete = false;

        if let Some(content) = self.server_content {
            for (speaker, transcription) in [
                (Speaker::User, content.input_transcription),
                (Speaker::Agent, content.output_transcription),
            ] {
                if let Some(text) = transcription.and_then(|t| t.text)
                    && !text.is_empty()
                {
                    events.push(TransportEvent::Transcript(TranscriptFragment { speaker, text }));
                }
            }

            for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
                if let Some(blob) = part.inline_data {
                    if !blob.mime_type.is_empty() && !blob.mime_type.starts_with("audio/") {
                        debug!(mime = %blob.mime_type, "ignoring non-audio inline data");
                        continue;
                    }
                    match codec::decode(&blob.data) {
                        Ok(bytes) => events.push(TransportEvent::AudioReceived(bytes)),
                        Err(e) => warn!("dropping inbound audio part: {e}"),
                    }
                } else if let Some(text) = part.text {
                    debug!(len = text.len(), "ignoring model text part");
                }
            }

            interrupted = content.interrupted;
            turn_complete = content.turn_complete;
        }

        if let Some(frame) = self.tool_call
            && !frame.function_calls.is_empty()
        {
            let calls = frame
                .function_calls
                .into_iter()
                .map(|fc| ToolCall {
                    id: fc.id,
                    name: fc.name,
                    args: fc.args,
                })
                .collect();
            events.push(TransportEvent::ToolCallReceived(calls));
        }

        if let Some(cancel) = self.tool_call_cancellation
            && !cancel.ids.is_empty()
        {
            events.push(TransportEvent::ToolCallCancelled(cancel.ids));
        }

        if interrupted {
            events.push(TransportEvent::Interrupted);
        }
        if turn_complete {
            events.push(TransportEvent::TurnComplete);
        }
        if self.go_away.is_some() {
            events.push(TransportEvent::GoAway);
        }

        events
    }
}
