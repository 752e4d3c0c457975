//! Character client
//!
//! Ties the pieces together for one conversation: the protocol engine for
//! transport, the capture chunker and encoder for outbound voice, and the
//! decoder, playback assembler and text assemblers for everything the
//! character sends back. Consumers read [`ClientEvent`]s from the channel
//! returned by [`CharacterClient::new`] and pull rendered audio with
//! [`CharacterClient::render`].

use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::audio::buffer::{AudioChunk, AudioSegment};
use crate::audio::capture::{CaptureChunker, FrameSink};
use crate::audio::playback::{PlaybackAssembler, PlaybackEvent, PlaybackStats};
use crate::codec::decoder::{DecoderStats, TransportDecoder};
use crate::codec::encoder::{EncoderStats, TransportEncoder};
use crate::config::ClientConfig;
use crate::constants::CAPTURE_SAMPLE_RATE;
use crate::error::CaptureError;
use crate::events::InboundEvent;
use crate::network::{
    ConnectionState, Connector, EngineEvent, PendingAck, ProtocolEngine, SessionInfo,
};
use crate::protocol::messages::{
    self, AudioResponse, ServerError, TextDelta, UserText, VoiceStart,
};
use crate::protocol::Payload;
use crate::response::{ResponseAssembler, TextUpdate};

/// Everything a consumer of the client can observe
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected(SessionInfo),
    Disconnected,
    BotResponse(TextUpdate),
    Transcript(TextUpdate),
    VoiceReceived(AudioSegment),
    PlaybackStarted,
    PlaybackComplete,
    Backpressure { dropped: usize },
    Error(String),
}

type EventSender = mpsc::UnboundedSender<ClientEvent>;

/// One conversation with a character
pub struct CharacterClient {
    config: ClientConfig,
    engine: ProtocolEngine,
    events: EventSender,

    chunker: CaptureChunker,
    chunks: Receiver<AudioChunk>,
    encoder: TransportEncoder,
    voice_active: bool,

    playback: Arc<Mutex<PlaybackAssembler>>,
    decoder: Arc<Mutex<TransportDecoder>>,
}

impl CharacterClient {
    /// Create a client and its event stream. Must be called within a tokio runtime.
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (engine, engine_events) = ProtocolEngine::spawn(connector);

        let (chunk_tx, chunks) = crossbeam_channel::unbounded();
        let chunker = CaptureChunker::new(&config.capture, chunk_tx);

        let playback = Arc::new(Mutex::new(PlaybackAssembler::new(&config.playback)));
        let decoder = Arc::new(Mutex::new(TransportDecoder::default()));
        let router = Router {
            events: events.clone(),
            bot: ResponseAssembler::new(),
            transcript: ResponseAssembler::new(),
            decoder: decoder.clone(),
            playback: playback.clone(),
        };
        tokio::spawn(router.run(engine_events));

        (
            Self {
                config,
                engine,
                events,
                chunker,
                chunks,
                encoder: TransportEncoder::default(),
                voice_active: false,
                playback,
                decoder,
            },
            event_rx,
        )
    }

    /// Start connecting with the client's configuration
    pub fn connect(&self) {
        tracing::info!(
            "Connecting to {} as character {}",
            self.config.endpoint,
            self.config.character_id
        );
        self.engine.connect(self.config.clone());
    }

    /// Send typed text to the character
    pub fn send_text(&self, text: &str) {
        let message = UserText {
            text: text.to_string(),
        };
        self.engine
            .send_event(messages::USER_TEXT, vec![to_payload(&message)], false);
    }

    /// Send an application event and wait for the service to acknowledge it
    pub fn send_with_ack(&self, name: &str, args: Vec<Payload>) -> Option<PendingAck> {
        self.engine.send_event(name, args, true)
    }

    /// Begin streaming voice; chunk sequence numbers restart at 0
    pub fn start_voice_session(&mut self) {
        if self.voice_active {
            tracing::debug!("Voice session already active");
            return;
        }
        self.chunker.start();
        self.voice_active = true;
        let start = VoiceStart {
            sample_rate: CAPTURE_SAMPLE_RATE,
        };
        self.engine
            .send_event(messages::VOICE_START, vec![to_payload(&start)], false);
    }

    /// Supply captured audio at `sample_rate`.
    ///
    /// A frame at any rate other than the capture rate ends the voice
    /// session and is reported as an error event.
    pub fn supply_frame(&mut self, frame: &[f32], sample_rate: u32) -> Result<(), CaptureError> {
        if !self.voice_active {
            return Err(CaptureError::NotActive);
        }
        if sample_rate != CAPTURE_SAMPLE_RATE {
            let error = CaptureError::UnsupportedSampleRate(sample_rate);
            self.capture_failed(error.clone());
            return Err(error);
        }
        self.chunker.supply(frame);
        self.send_pending_chunks();
        Ok(())
    }

    /// Finish the voice session, sending any buffered audio as the final chunk
    pub fn end_voice_session(&mut self) -> Result<(), CaptureError> {
        if !self.voice_active {
            return Err(CaptureError::NotActive);
        }
        self.chunker.flush();
        self.send_pending_chunks();
        self.close_voice_session();
        Ok(())
    }

    /// Abandon the voice session, discarding audio not yet sent
    pub fn cancel_voice_session(&mut self) {
        if !self.voice_active {
            return;
        }
        self.chunker.stop();
        // Chunks already emitted but not yet sent are dropped too
        let discarded = self.chunks.try_iter().count();
        if discarded > 0 {
            tracing::debug!("Discarded {} unsent capture chunks", discarded);
        }
        self.close_voice_session();
    }

    /// Report an input failure: the voice session becomes inactive
    pub fn capture_failed(&mut self, error: CaptureError) {
        tracing::error!("Capture failed: {}", error);
        if self.voice_active {
            self.chunker.stop();
            self.chunks.try_iter().for_each(drop);
            self.close_voice_session();
        }
        let _ = self.events.send(ClientEvent::Error(error.to_string()));
    }

    pub fn is_voice_active(&self) -> bool {
        self.voice_active
    }

    fn close_voice_session(&mut self) {
        self.voice_active = false;
        self.engine
            .send_event(messages::VOICE_END, vec![Payload::Json(json!({}))], false);
    }

    fn send_pending_chunks(&mut self) {
        while let Ok(chunk) = self.chunks.try_recv() {
            let message = self.encoder.encode(&chunk);
            self.engine
                .send_event(messages::AUDIO_CHUNK, vec![to_payload(&message)], false);
        }
    }

    /// Fill `out` with the next playback samples (24kHz mono)
    pub fn render(&self, out: &mut [f32]) {
        let playback_events = self.playback.lock().render(out);
        forward_playback_events(&self.events, playback_events);
    }

    /// Stop the character's current audio immediately
    pub fn interrupt_playback(&self) {
        let playback_events = self.playback.lock().interrupt();
        forward_playback_events(&self.events, playback_events);
    }

    /// End the conversation; pending acknowledgments resolve as cancelled
    pub fn disconnect(&mut self) {
        if self.voice_active {
            self.chunker.stop();
            self.chunks.try_iter().for_each(drop);
            self.voice_active = false;
        }
        self.engine.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.engine.state()
    }

    /// Register a handler for an event the client does not interpret itself
    pub fn on_event<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.engine.on_event(name, handler);
    }

    pub fn encoder_stats(&self) -> EncoderStats {
        self.encoder.stats()
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.lock().stats()
    }

    pub fn playback_stats(&self) -> PlaybackStats {
        self.playback.lock().stats()
    }
}

impl FrameSink for CharacterClient {
    fn supply(&mut self, frame: &[f32]) {
        if let Err(e) = self.supply_frame(frame, CAPTURE_SAMPLE_RATE) {
            tracing::trace!("Frame ignored: {}", e);
        }
    }
}

fn to_payload<T: Serialize>(value: &T) -> Payload {
    Payload::Json(serde_json::to_value(value).unwrap_or_default())
}

fn parse_first<T: DeserializeOwned>(event: &InboundEvent) -> Option<T> {
    let value = event.first_json()?.clone();
    serde_json::from_value(value)
        .inspect_err(|e| tracing::warn!("Malformed '{}' event: {}", event.name, e))
        .ok()
}

fn forward_playback_events(events: &EventSender, playback_events: Vec<PlaybackEvent>) {
    for event in playback_events {
        let client_event = match event {
            PlaybackEvent::Started => ClientEvent::PlaybackStarted,
            PlaybackEvent::Complete => ClientEvent::PlaybackComplete,
            PlaybackEvent::Interrupted { discarded_segments } => {
                tracing::debug!("Playback interrupted, {} segments discarded", discarded_segments);
                continue;
            }
        };
        let _ = events.send(client_event);
    }
}

/// Turns engine output into client events.
///
/// Lifecycle changes and inbound application events arrive on the one
/// engine channel, so consumers see them in the order the engine saw them.
struct Router {
    events: EventSender,
    bot: ResponseAssembler,
    transcript: ResponseAssembler,
    decoder: Arc<Mutex<TransportDecoder>>,
    playback: Arc<Mutex<PlaybackAssembler>>,
}

impl Router {
    async fn run(mut self, mut engine_events: mpsc::UnboundedReceiver<EngineEvent>) {
        while let Some(event) = engine_events.recv().await {
            if self.events.is_closed() {
                break;
            }
            self.route(event);
        }
    }

    fn route(&mut self, event: EngineEvent) {
        let client_event = match event {
            EngineEvent::Connected(session) => ClientEvent::Connected(session),
            EngineEvent::Disconnected => {
                self.bot.clear();
                self.transcript.clear();
                ClientEvent::Disconnected
            }
            EngineEvent::Reconnecting { attempt, delay } => {
                tracing::debug!("Reconnect attempt {} in {:?}", attempt, delay);
                return;
            }
            EngineEvent::Backpressure { dropped } => ClientEvent::Backpressure { dropped },
            EngineEvent::Error(message) => ClientEvent::Error(message),
            EngineEvent::Message(inbound) => return self.inbound(&inbound),
        };
        let _ = self.events.send(client_event);
    }

    fn inbound(&mut self, event: &InboundEvent) {
        match event.name.as_str() {
            messages::BOT_RESPONSE => {
                if let Some(delta) = parse_first::<TextDelta>(event) {
                    let update = self.bot.apply(delta);
                    let _ = self.events.send(ClientEvent::BotResponse(update));
                }
            }
            messages::TRANSCRIPT => {
                if let Some(delta) = parse_first::<TextDelta>(event) {
                    let update = self.transcript.apply(delta);
                    let _ = self.events.send(ClientEvent::Transcript(update));
                }
            }
            messages::AUDIO_RESPONSE => self.audio(event),
            messages::SERVER_ERROR => {
                if let Some(error) = parse_first::<ServerError>(event) {
                    tracing::warn!("Service error: {}", error.message);
                    let _ = self.events.send(ClientEvent::Error(error.message));
                }
            }
            _ => {}
        }
    }

    fn audio(&mut self, event: &InboundEvent) {
        let Some(response) = parse_first::<AudioResponse>(event) else {
            return;
        };
        let segment = match self.decoder.lock().decode(&response) {
            Ok(segment) => segment,
            Err(e) => {
                tracing::warn!("Dropping audio segment {}: {}", response.sequence, e);
                return;
            }
        };
        let _ = self.events.send(ClientEvent::VoiceReceived(segment.clone()));
        let playback_events = self.playback.lock().push(segment);
        forward_playback_events(&self.events, playback_events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::ChunkMarker;
    use crate::codec::pcm::{decode_transport, encode_transport, pcm16_to_bytes};
    use crate::config::CaptureConfig;
    use crate::network::transport::mock::{MockConnector, ServerSide};
    use crate::protocol::{Frame, Packet};
    use serde_json::Value;

    struct Harness {
        client: CharacterClient,
        events: mpsc::UnboundedReceiver<ClientEvent>,
        server: ServerSide,
    }

    impl Harness {
        async fn connected(config: ClientConfig) -> Self {
            let (connector, mut servers) = MockConnector::new();
            let (client, mut events) = CharacterClient::new(config, Arc::new(connector));
            client.connect();
            let mut server = servers.recv().await.unwrap();
            server.handshake(25_000, 20_000).await;
            assert!(matches!(events.recv().await, Some(ClientEvent::Connected(_))));
            Self {
                client,
                events,
                server,
            }
        }

        async fn event(&mut self) -> ClientEvent {
            self.events.recv().await.unwrap()
        }

        /// Next event packet as (name, first argument)
        async fn sent(&mut self) -> (String, Value) {
            let packet = self.server.recv_packet().await;
            let name = packet.event_name().unwrap_or_default().to_string();
            let arg = packet
                .args()
                .first()
                .and_then(Payload::as_json)
                .cloned()
                .unwrap_or(Value::Null);
            (name, arg)
        }

        fn deliver(&self, name: &str, arg: Value) {
            self.server
                .send(Frame::Message(Packet::event("/", name, vec![arg.into()])));
        }
    }

    fn config() -> ClientConfig {
        ClientConfig {
            endpoint: "wss://character.test/socket.io/".into(),
            character_id: "char-1".into(),
            player_id: "player-1".into(),
            capture: CaptureConfig::buffered(100),
            ..ClientConfig::default()
        }
    }

    fn audio(sequence: u32, samples: &[i16], marker: &str) -> Value {
        json!({
            "audio": encode_transport(&pcm16_to_bytes(samples)),
            "sequence": sequence,
            "marker": marker,
            "sampleRate": 24000,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_round_trip() {
        let mut h = Harness::connected(config()).await;

        h.client.send_text("hello there");
        assert_eq!(
            h.sent().await,
            ("user_text".to_string(), json!({"text": "hello there"}))
        );

        for (text, is_final) in [("Hel", false), ("lo", false), ("!", true)] {
            h.deliver(
                "bot_response",
                json!({"utteranceId": "r1", "text": text, "isFinal": is_final}),
            );
        }

        let mut finals = Vec::new();
        for _ in 0..3 {
            match h.event().await {
                ClientEvent::BotResponse(update) if update.is_final => finals.push(update.text),
                ClientEvent::BotResponse(_) => {}
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(finals, vec!["Hello!"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcript_is_separate_stream() {
        let mut h = Harness::connected(config()).await;
        h.deliver(
            "transcript",
            json!({"utteranceId": "r1", "text": "hi", "isFinal": true}),
        );
        match h.event().await {
            ClientEvent::Transcript(update) => {
                assert_eq!(update.text, "hi");
                assert!(update.is_final);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_session_streams_chunks_in_order() {
        let mut h = Harness::connected(config()).await;

        h.client.start_voice_session();
        h.client.supply(&vec![0.25; 2400]);
        h.client.end_voice_session().unwrap();

        assert_eq!(
            h.sent().await,
            ("voice_start".to_string(), json!({"sampleRate": 16000}))
        );

        let (name, first) = h.sent().await;
        assert_eq!(name, "audio_chunk");
        assert_eq!(first["sequence"], 0);
        assert_eq!(first["marker"], "start");
        let bytes = decode_transport(first["audio"].as_str().unwrap()).unwrap();
        assert_eq!(bytes.len(), 3200);

        let (_, last) = h.sent().await;
        assert_eq!(last["sequence"], 1);
        assert_eq!(last["marker"], "end");

        assert_eq!(h.sent().await.0, "voice_end");
        assert!(!h.client.is_voice_active());
        assert_eq!(h.client.encoder_stats().frames_encoded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_errors() {
        let mut h = Harness::connected(config()).await;
        assert_eq!(h.client.end_voice_session(), Err(CaptureError::NotActive));

        h.client.start_voice_session();
        assert_eq!(
            h.client.supply_frame(&[0.0; 441], 44_100),
            Err(CaptureError::UnsupportedSampleRate(44_100))
        );
        assert!(!h.client.is_voice_active());
        assert!(matches!(h.event().await, ClientEvent::Error(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_response_plays_back() {
        let mut h = Harness::connected(config()).await;

        h.deliver("audio_response", audio(0, &[16384; 4], "start"));
        h.deliver("audio_response", audio(1, &[-16384; 4], "end"));

        assert!(matches!(h.event().await, ClientEvent::VoiceReceived(s) if s.is_start()));
        assert_eq!(h.event().await, ClientEvent::PlaybackStarted);
        match h.event().await {
            ClientEvent::VoiceReceived(segment) => {
                assert_eq!(segment.marker, ChunkMarker::End);
                assert_eq!(segment.samples.len(), 4);
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut out = [0.0f32; 8];
        h.client.render(&mut out);
        assert!((out[0] - 0.5).abs() < 1e-3);
        assert!((out[7] + 0.5).abs() < 1e-3);
        assert_eq!(h.event().await, ClientEvent::PlaybackComplete);
        assert_eq!(h.client.decoder_stats().frames_decoded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_keep_connection_order() {
        let (connector, mut servers) = MockConnector::new();
        let mut cfg = config();
        cfg.reconnect.max_attempts = 0;
        let (client, mut events) = CharacterClient::new(cfg, Arc::new(connector));
        client.connect();

        let mut server = servers.recv().await.unwrap();
        server.handshake(25_000, 20_000).await;
        server.send(Frame::Message(Packet::event(
            "/",
            "bot_response",
            vec![json!({"utteranceId": "r1", "text": "hi", "isFinal": true}).into()],
        )));
        server.fail("connection reset");

        assert!(matches!(events.recv().await, Some(ClientEvent::Connected(_))));
        match events.recv().await {
            Some(ClientEvent::BotResponse(update)) => assert_eq!(update.text, "hi"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(events.recv().await, Some(ClientEvent::Disconnected));
        assert!(matches!(events.recv().await, Some(ClientEvent::Error(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_and_disconnect() {
        let mut h = Harness::connected(config()).await;
        h.deliver("error", json!({"message": "character not found"}));
        assert_eq!(
            h.event().await,
            ClientEvent::Error("character not found".to_string())
        );

        h.client.disconnect();
        assert_eq!(h.event().await, ClientEvent::Disconnected);
        assert_eq!(h.client.state(), ConnectionState::Disconnected);
    }
}
