//! # Gemini Live Client
//!
//! Production `UpstreamConnector` for the Gemini Live bidirectional streaming API.
//!
//! ## Protocol Overview:
//! 1. Open a WebSocket to `BidiGenerateContent` with the API key in the query string
//! 2. Send a `setup` message (model, audio response modality, voice, system instruction)
//! 3. Wait for `setupComplete`
//! 4. Stream `realtimeInput` audio chunks and `clientContent` text turns
//! 5. Read `serverContent` frames carrying base64 PCM, text parts and `turnComplete`
//!
//! Every frame is JSON. The service sends some of them as binary WebSocket
//! messages, so both message kinds go through the same decoder.

use super::{
    ConnectOptions, ResponseEvent, UpstreamConnection, UpstreamConnector, UpstreamError,
    UpstreamInput, UpstreamSink, UpstreamSource,
};
use crate::config::UpstreamConfig;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for Gemini Live sessions.
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    endpoint: String,
    api_version: String,
    api_key: String,
    model: String,
}

impl GeminiLiveConnector {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    /// Streaming endpoint without the credential (safe to log).
    fn service_url(&self) -> String {
        format!(
            "{}/google.ai.generativelanguage.{}.GenerativeService.BidiGenerateContent",
            self.endpoint, self.api_version
        )
    }

    fn setup_message(&self, options: &ConnectOptions) -> ClientMessage {
        ClientMessage::Setup(Setup {
            model: self.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: options.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                role: None,
                parts: vec![TextPart {
                    text: options.system_instruction.clone(),
                }],
            },
        })
    }
}

#[async_trait]
impl UpstreamConnector for GeminiLiveConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<UpstreamConnection, UpstreamError> {
        let url = self.service_url();
        info!("Connecting to upstream: {} (model {})", url, self.model);

        let (ws_stream, _) = connect_async(format!("{}?key={}", url, self.api_key)).await?;
        let (mut writer, mut reader) = ws_stream.split();

        let setup = serde_json::to_string(&self.setup_message(options))?;
        writer.send(Message::Text(setup)).await?;

        // Nothing useful arrives before setupComplete
        loop {
            let payload = match reader.next().await {
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Close(frame))) => {
                    return Err(UpstreamError::Handshake(format!(
                        "connection closed during setup: {}",
                        frame.map(|f| f.reason.to_string()).unwrap_or_default()
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(UpstreamError::Handshake(
                        "connection ended before setup completed".to_string(),
                    ))
                }
            };

            match decode_frame(&payload)? {
                Frame::SetupComplete => break,
                other => debug!("Ignoring frame before setup completed: {:?}", other),
            }
        }

        info!("Upstream session ready (voice {})", options.voice);
        Ok(UpstreamConnection {
            sink: Box::new(GeminiSink { writer }),
            source: Box::new(GeminiSource { reader }),
        })
    }
}

struct GeminiSink {
    writer: SplitSink<WsStream, Message>,
}

#[async_trait]
impl UpstreamSink for GeminiSink {
    async fn send(&mut self, input: UpstreamInput) -> Result<(), UpstreamError> {
        let json = encode_input(&input)?;
        self.writer.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), UpstreamError> {
        match self.writer.close().await {
            Ok(()) => Ok(()),
            // The service may already have hung up
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

struct GeminiSource {
    reader: SplitStream<WsStream>,
}

#[async_trait]
impl UpstreamSource for GeminiSource {
    async fn next_event(&mut self) -> Result<Option<ResponseEvent>, UpstreamError> {
        loop {
            let payload = match self.reader.next().await {
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Close(frame))) => {
                    debug!("Upstream sent close frame: {:?}", frame);
                    return Ok(None);
                }
                // Pings are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed))
                | None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
            };

            match decode_frame(&payload)? {
                Frame::Event(event) => return Ok(Some(event)),
                Frame::GoAway(time_left) => {
                    warn!("Upstream is going away (time left: {:?})", time_left)
                }
                Frame::SetupComplete | Frame::Ignored => {}
            }
        }
    }
}

// --- Outgoing wire types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: Content,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContent {
    turns: Vec<Content>,
    turn_complete: bool,
}

/// Serialize one input into its JSON frame.
fn encode_input(input: &UpstreamInput) -> Result<String, UpstreamError> {
    let message = match input {
        UpstreamInput::Audio(chunk) => ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: chunk.format().mime_type(),
                data: BASE64.encode(chunk.data()),
            }],
        }),
        UpstreamInput::Text { text, end_of_turn } => ClientMessage::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user"),
                parts: vec![TextPart { text: text.clone() }],
            }],
            turn_complete: *end_of_turn,
        }),
    };
    Ok(serde_json::to_string(&message)?)
}

// --- Incoming wire types ---

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerFrame {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ServerPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerPart {
    text: Option<String>,
    inline_data: Option<InlineData>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    time_left: Option<String>,
}

/// What one server frame means to the bridge.
#[derive(Debug, PartialEq)]
enum Frame {
    SetupComplete,
    Event(ResponseEvent),
    GoAway(Option<String>),
    Ignored,
}

fn decode_frame(payload: &[u8]) -> Result<Frame, UpstreamError> {
    let frame: ServerFrame = serde_json::from_slice(payload)?;

    if frame.setup_complete.is_some() {
        return Ok(Frame::SetupComplete);
    }
    if let Some(go_away) = frame.go_away {
        return Ok(Frame::GoAway(go_away.time_left));
    }
    let Some(content) = frame.server_content else {
        return Ok(Frame::Ignored);
    };

    if content.interrupted {
        debug!("Upstream reported the model turn was interrupted");
    }

    let mut audio: Option<Vec<u8>> = None;
    let mut text: Option<String> = None;
    for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
        if let Some(inline) = part.inline_data {
            audio.get_or_insert_with(Vec::new).extend(BASE64.decode(inline.data)?);
        }
        match part.text {
            Some(t) if !part.thought && !t.is_empty() => {
                text.get_or_insert_with(String::new).push_str(&t)
            }
            _ => {}
        }
    }

    let event = ResponseEvent {
        audio,
        text,
        turn_complete: content.turn_complete,
    };
    if event.is_empty() {
        Ok(Frame::Ignored)
    } else {
        Ok(Frame::Event(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioChunk, PcmFormat};
    use serde_json::{json, Value};
    use std::future::Future;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn options() -> ConnectOptions {
        ConnectOptions {
            voice: "Aoede".to_string(),
            system_instruction: "Be kind.".to_string(),
        }
    }

    fn connector() -> GeminiLiveConnector {
        let mut config = crate::config::AppConfig::default().upstream;
        config.api_key = "secret".to_string();
        config.endpoint = "wss://example.test/ws/".to_string();
        GeminiLiveConnector::new(&config)
    }

    #[test]
    fn test_service_url_omits_key() {
        let url = connector().service_url();
        assert_eq!(
            url,
            "wss://example.test/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent"
        );
        assert!(!url.contains("secret"));
    }

    #[test]
    fn test_setup_message_shape() {
        let json: Value = serde_json::to_value(connector().setup_message(&options())).unwrap();
        let setup = &json["setup"];
        assert_eq!(setup["model"], "models/gemini-2.5-flash-native-audio-preview-09-2025");
        assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Aoede"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Be kind.");
        assert!(setup["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn test_encode_audio_input() {
        let chunk = AudioChunk::new(vec![0x01, 0x02, 0x03], PcmFormat::CLIENT_INPUT);
        let json: Value = serde_json::from_str(&encode_input(&UpstreamInput::Audio(chunk)).unwrap()).unwrap();
        let media = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(media["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(media["data"], "AQID");
    }

    #[test]
    fn test_encode_text_input() {
        let input = UpstreamInput::Text {
            text: "Hello".to_string(),
            end_of_turn: true,
        };
        let json: Value = serde_json::from_str(&encode_input(&input).unwrap()).unwrap();
        assert_eq!(
            json,
            json!({
                "clientContent": {
                    "turns": [{"role": "user", "parts": [{"text": "Hello"}]}],
                    "turnComplete": true
                }
            })
        );
    }

    #[test]
    fn test_decode_setup_complete_and_go_away() {
        assert_eq!(decode_frame(br#"{"setupComplete":{}}"#).unwrap(), Frame::SetupComplete);
        assert_eq!(
            decode_frame(br#"{"goAway":{"timeLeft":"10s"}}"#).unwrap(),
            Frame::GoAway(Some("10s".to_string()))
        );
        assert_eq!(decode_frame(br#"{"usageMetadata":{}}"#).unwrap(), Frame::Ignored);
    }

    #[test]
    fn test_decode_model_turn() {
        let payload = json!({
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQI="}},
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AwQ="}},
                    {"text": "thinking...", "thought": true},
                    {"text": "Hi there"}
                ]},
                "turnComplete": true
            }
        });
        let frame = decode_frame(payload.to_string().as_bytes()).unwrap();
        assert_eq!(
            frame,
            Frame::Event(ResponseEvent {
                audio: Some(vec![1, 2, 3, 4]),
                text: Some("Hi there".to_string()),
                turn_complete: true,
            })
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode_frame(b"not json"), Err(UpstreamError::Json(_))));
        let bad_audio = br#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"data":"!!"}}]}}}"#;
        assert!(matches!(decode_frame(bad_audio), Err(UpstreamError::Base64(_))));
    }

    #[test]
    fn test_decode_empty_server_content_is_ignored() {
        assert_eq!(decode_frame(br#"{"serverContent":{}}"#).unwrap(), Frame::Ignored);
    }

    /// A one-connection WebSocket server on localhost running `script`.
    async fn local_service<F, Fut>(script: F) -> (GeminiLiveConnector, JoinHandle<()>)
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            script(ws).await;
        });

        let mut config = crate::config::AppConfig::default().upstream;
        config.api_key = "secret".to_string();
        config.endpoint = format!("ws://{}", addr);
        (GeminiLiveConnector::new(&config), server)
    }

    async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
        let message = ws.next().await.unwrap().unwrap();
        serde_json::from_str(message.to_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_connect_waits_for_setup_complete() {
        let (connector, server) = local_service(|mut ws| async move {
            let setup = next_json(&mut ws).await;
            assert_eq!(
                setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                    ["prebuiltVoiceConfig"]["voiceName"],
                "Aoede"
            );

            // Frames ahead of setupComplete are skipped, binary ones included
            ws.send(Message::Text(r#"{"usageMetadata":{}}"#.to_string())).await.unwrap();
            ws.send(Message::Binary(br#"{"setupComplete":{}}"#.to_vec())).await.unwrap();

            let input = next_json(&mut ws).await;
            assert_eq!(input["realtimeInput"]["mediaChunks"][0]["data"], "AQID");

            let reply = json!({
                "serverContent": {
                    "modelTurn": {"parts": [{"text": "Hi!"}]},
                    "turnComplete": true
                }
            });
            ws.send(Message::Text(reply.to_string())).await.unwrap();

            // Drain until the client closes
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() {
                    break;
                }
            }
        })
        .await;

        let mut upstream = connector.connect(&options()).await.unwrap();
        let chunk = AudioChunk::new(vec![0x01, 0x02, 0x03], PcmFormat::CLIENT_INPUT);
        upstream.sink.send(UpstreamInput::Audio(chunk)).await.unwrap();

        let events: Vec<_> = upstream.source.receive().collect().await;
        assert_eq!(events.len(), 1);
        let event = events.into_iter().next().unwrap().unwrap();
        assert_eq!(event.text.as_deref(), Some("Hi!"));
        assert!(event.turn_complete);

        upstream.sink.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_during_setup_is_a_handshake_error() {
        let (connector, server) = local_service(|mut ws| async move {
            next_json(&mut ws).await;
            ws.close(None).await.unwrap();
        })
        .await;

        let result = connector.connect(&options()).await;
        assert!(matches!(result, Err(UpstreamError::Handshake(_))));
        server.await.unwrap();
    }
}
