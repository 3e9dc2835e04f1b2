//! Whisper ASR using whisper-rs (whisper.cpp bindings).
//!
//! Loads a GGML model once at startup, then transcribes 16kHz mono f32
//! audio on demand.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::config::RecognitionConfig;
use crate::{Error, Result};

/// Cheap to clone; the context is shared.
#[derive(Clone)]
pub struct WhisperTranscriber {
    ctx: Arc<WhisperContext>,
    language: String,
}

impl WhisperTranscriber {
    pub fn load(config: &RecognitionConfig) -> Result<Self> {
        let model_path = find_model(&config.model)?;

        info!("Loading Whisper model from {}", model_path.display());
        let t0 = Instant::now();

        let path = model_path
            .to_str()
            .ok_or_else(|| Error::Recognition("model path is not valid UTF-8".into()))?;
        let ctx = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| Error::Recognition(format!("failed to load Whisper model: {e}")))?;

        info!("Whisper model loaded in {}ms", t0.elapsed().as_millis());
        Ok(Self {
            ctx: Arc::new(ctx),
            language: config.language.clone(),
        })
    }

    /// Transcribe audio to text. Blocking; run it off the async threads.
    pub fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let t0 = Instant::now();

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| Error::Recognition(format!("failed to create whisper state: {e}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.language));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(true);
        params.set_token_timestamps(false);

        state
            .full(params, samples)
            .map_err(|e| Error::Recognition(format!("whisper inference failed: {e}")))?;

        let mut text = String::new();
        for i in 0..state.full_n_segments() {
            let Some(segment) = state.get_segment(i) else {
                continue;
            };
            if let Ok(segment_text) = segment.to_str_lossy() {
                let trimmed = segment_text.trim();
                if !trimmed.is_empty() {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(trimmed);
                }
            }
        }

        let audio_secs = samples.len() as f64 / 16000.0;
        info!(
            "Transcribed {:.1}s audio in {}ms: {} chars",
            audio_secs,
            t0.elapsed().as_millis(),
            text.chars().count()
        );
        Ok(text)
    }
}

/// Resolve a model name or path to a GGML file on disk.
fn find_model(model: &str) -> Result<PathBuf> {
    let direct = PathBuf::from(model);
    if direct.is_file() {
        return Ok(direct);
    }

    let filenames = [
        format!("ggml-{}.bin", model.replace('/', "-")),
        "ggml-base.en.bin".to_string(),
        "ggml-base.bin".to_string(),
        "ggml-small.en.bin".to_string(),
    ];
    let search_dirs: Vec<PathBuf> = [
        std::env::current_dir().ok(),
        dirs::home_dir().map(|h| h.join(".cache/whisper")),
        dirs::data_dir().map(|d| d.join("voice-chat")),
    ]
    .into_iter()
    .flatten()
    .collect();

    search_dirs
        .iter()
        .flat_map(|dir| filenames.iter().map(move |name| dir.join(name)))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            Error::Recognition(format!(
                "Whisper GGML model '{model}' not found in {search_dirs:?}; download one with:\n  \
                 wget https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-base.en.bin"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_model_path_wins() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let found = find_model(file.path().to_str().unwrap()).unwrap();
        assert_eq!(found, file.path());
    }

    #[test]
    fn unknown_model_reports_search_dirs() {
        let err = find_model("voice-chat-missing-model").unwrap_err();
        assert!(err.to_string().contains("voice-chat-missing-model"));
    }
}
