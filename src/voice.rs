//! Voice collaborator contracts
//!
//! Speech capture and playback live outside the crate; front-ends plug in
//! implementations of `SpeechToText` and `TextToSpeech`. This module owns the
//! retry policy, the voice command vocabulary and non-blocking playback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default number of listen attempts before giving up on an utterance
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default time to wait for speech to start
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(5);

/// The speech service itself failed; ends voice mode
#[derive(Debug, Clone, thiserror::Error)]
#[error("speech service error: {0}")]
pub struct SpeechServiceError(pub String);

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Capture one utterance
    ///
    /// `Ok(None)` means nothing usable was heard (silence, timeout or
    /// unintelligible audio), which is retried, not an error.
    async fn listen(&self, timeout: Duration) -> Result<Option<String>, SpeechServiceError>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn speak(&self, text: &str) -> Result<(), SpeechServiceError>;
}

/// Commands recognized while in voice mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCommand {
    ExitVoiceMode,
    SaveChat,
    ResetConversation,
}

impl VoiceCommand {
    /// Match an utterance against the command phrases
    pub fn parse(utterance: &str) -> Option<Self> {
        let normalized = utterance
            .trim()
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .to_lowercase();
        match normalized.as_str() {
            "exit voice mode" => Some(VoiceCommand::ExitVoiceMode),
            "save chat" => Some(VoiceCommand::SaveChat),
            "reset conversation" => Some(VoiceCommand::ResetConversation),
            _ => None,
        }
    }
}

/// Speech-to-text with bounded retries
pub struct VoiceInput {
    stt: Arc<dyn SpeechToText>,
    listen_timeout: Duration,
    max_retries: u32,
}

impl VoiceInput {
    pub fn new(stt: Arc<dyn SpeechToText>) -> Self {
        Self {
            stt,
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_listen_timeout(mut self, timeout: Duration) -> Self {
        self.listen_timeout = timeout;
        self
    }

    /// Next recognized utterance, or `None` once every attempt came back empty
    pub async fn next_utterance(&self) -> Result<Option<String>, SpeechServiceError> {
        for attempt in 1..=self.max_retries {
            match self.stt.listen(self.listen_timeout).await? {
                Some(text) if !text.trim().is_empty() => return Ok(Some(text)),
                _ => debug!(attempt, max = self.max_retries, "No speech recognized"),
            }
        }
        warn!(attempts = self.max_retries, "Max retries reached, leaving voice input");
        Ok(None)
    }
}

/// Play `text` on a spawned task so input is never blocked on playback
pub fn speak_in_background(tts: Arc<dyn TextToSpeech>, text: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = tts.speak(&text).await {
            warn!(error = %e, "Text-to-speech failed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns scripted results, one per listen call
    struct ScriptedStt {
        script: Mutex<Vec<Result<Option<String>, SpeechServiceError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedStt {
        fn new(mut script: Vec<Result<Option<String>, SpeechServiceError>>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl SpeechToText for ScriptedStt {
        async fn listen(&self, _timeout: Duration) -> Result<Option<String>, SpeechServiceError> {
            *self.calls.lock().unwrap() += 1;
            self.script.lock().unwrap().pop().unwrap_or(Ok(None))
        }
    }

    #[test]
    fn test_voice_command_parse() {
        assert_eq!(VoiceCommand::parse("Exit voice mode."), Some(VoiceCommand::ExitVoiceMode));
        assert_eq!(VoiceCommand::parse("  save chat "), Some(VoiceCommand::SaveChat));
        assert_eq!(
            VoiceCommand::parse("reset conversation"),
            Some(VoiceCommand::ResetConversation)
        );
        assert_eq!(VoiceCommand::parse("save the chat please"), None);
    }

    #[tokio::test]
    async fn test_retries_until_speech() {
        let stt = ScriptedStt::new(vec![Ok(None), Ok(Some("hello".to_string()))]);
        let input = VoiceInput::new(stt.clone());
        assert_eq!(input.next_utterance().await.unwrap(), Some("hello".to_string()));
        assert_eq!(*stt.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let stt = ScriptedStt::new(vec![]);
        let input = VoiceInput::new(stt.clone()).with_retries(3);
        assert_eq!(input.next_utterance().await.unwrap(), None);
        assert_eq!(*stt.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_service_error_is_hard() {
        let stt = ScriptedStt::new(vec![Err(SpeechServiceError("offline".to_string()))]);
        let input = VoiceInput::new(stt.clone());
        assert!(input.next_utterance().await.is_err());
        assert_eq!(*stt.calls.lock().unwrap(), 1);
    }

    struct RecordingTts(Mutex<Vec<String>>);

    #[async_trait]
    impl TextToSpeech for RecordingTts {
        async fn speak(&self, text: &str) -> Result<(), SpeechServiceError> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_speak_in_background() {
        let tts = Arc::new(RecordingTts(Mutex::new(Vec::new())));
        speak_in_background(tts.clone(), "done".to_string())
            .await
            .unwrap();
        assert_eq!(*tts.0.lock().unwrap(), vec!["done".to_string()]);
    }
}
