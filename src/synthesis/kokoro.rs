//! Native Kokoro backend: text → phonemes → ONNX inference → rodio playback.
//!
//! Each utterance is split into sentences so cancellation takes effect at
//! the next sentence boundary at the latest.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ndarray::{Array1, Array2, Array3};
use ndarray_npy::NpzReader;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::SpeechSynthesizer;
use crate::config::SynthesisConfig;
use crate::{Error, Result};

const SAMPLE_RATE: u32 = 24000;
// First dimension of the voice style arrays
const MAX_TOKENS: usize = 510;

pub struct KokoroSynthesizer {
    // ort Session::run needs &mut
    session: Mutex<Option<Session>>,
    phonemizer: Option<misaki_rs::G2P>,
    vocab: HashMap<char, i64>,
    /// Style vectors per voice, shape (510, 256).
    voices: HashMap<String, Array2<f32>>,
    voice: String,
    speed: f32,

    output_stream: Option<OutputStream>,

    turn: AsyncMutex<()>,
    epoch: AtomicU64,
    stop_playback: Arc<AtomicBool>,
    active_sink: Arc<Mutex<Option<Sink>>>,

    model_path: PathBuf,
    voices_path: PathBuf,
    tokenizer_path: PathBuf,
}

impl KokoroSynthesizer {
    pub fn new(config: &SynthesisConfig) -> Self {
        let model_path = if config.model_path.is_empty() {
            std::env::current_dir().unwrap_or_default().join("kokoro-v1.0.onnx")
        } else {
            PathBuf::from(&config.model_path)
        };
        let base_dir = model_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Self {
            session: Mutex::new(None),
            phonemizer: None,
            vocab: HashMap::new(),
            voices: HashMap::new(),
            voice: config.voice.clone(),
            speed: config.speed,
            output_stream: None,
            turn: AsyncMutex::new(()),
            epoch: AtomicU64::new(0),
            stop_playback: Arc::new(AtomicBool::new(false)),
            active_sink: Arc::new(Mutex::new(None)),
            voices_path: base_dir.join("voices-v1.0.bin"),
            tokenizer_path: base_dir.join("tokenizer.json"),
            model_path,
        }
    }

    /// Load tokenizer, voices, ONNX model, phonemizer and audio output.
    /// Blocking; call before handing the engine to the renderer.
    pub fn load_model_sync(&mut self) -> Result<()> {
        let t0 = Instant::now();

        self.vocab = load_tokenizer(&self.tokenizer_path)?;
        info!("Tokenizer loaded: {} tokens", self.vocab.len());

        self.voices = load_voices(&self.voices_path)?;
        if !self.voices.contains_key(&self.voice) {
            return Err(Error::Config(format!("unknown Kokoro voice: {}", self.voice)));
        }
        info!("Loaded {} voices", self.voices.len());

        info!("Loading ONNX model from {}", self.model_path.display());
        let onnx_err = |e: String| Error::Synthesis(format!("failed to load ONNX model: {e}"));
        let session = Session::builder()
            .map_err(|e| onnx_err(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| onnx_err(e.to_string()))?
            .with_intra_threads(4)
            .map_err(|e| onnx_err(e.to_string()))?
            .commit_from_file(&self.model_path)
            .map_err(|e| onnx_err(e.to_string()))?;
        *self.session.lock() = Some(session);

        self.phonemizer = Some(misaki_rs::G2P::new(misaki_rs::Language::EnglishUS));

        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| Error::Audio(format!("failed to open audio output: {e}")))?;
        self.output_stream = Some(stream);

        info!("Kokoro TTS loaded in {}ms", t0.elapsed().as_millis());
        Ok(())
    }

    fn cancelled_since(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
    }

    /// Generate audio samples for a single sentence.
    fn generate_audio(&self, text: &str) -> Result<Vec<f32>> {
        let mut session_guard = self.session.lock();
        let session = session_guard
            .as_mut()
            .ok_or_else(|| Error::Synthesis("model not loaded".into()))?;
        let phonemizer = self
            .phonemizer
            .as_ref()
            .ok_or_else(|| Error::Synthesis("phonemizer not loaded".into()))?;

        let (phonemes, _tokens) = phonemizer
            .g2p(text)
            .map_err(|e| Error::Synthesis(format!("phonemization failed: {e}")))?;
        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        // Pad with 0 on both ends; unknown phonemes are skipped
        let mut token_ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
        token_ids.push(0);
        token_ids.extend(phonemes.chars().filter_map(|ch| self.vocab.get(&ch).copied()));
        token_ids.push(0);
        token_ids.truncate(MAX_TOKENS);
        let n_tokens = token_ids.len();

        let styles = self
            .voices
            .get(&self.voice)
            .ok_or_else(|| Error::Synthesis(format!("voice not found: {}", self.voice)))?;
        let style_idx = n_tokens.saturating_sub(2).min(styles.nrows() - 1);
        let style_vec: Vec<f32> = styles.row(style_idx).to_vec();

        let tensor_err = |e: String| Error::Synthesis(format!("failed to build tensor: {e}"));
        let tokens = Array2::from_shape_vec((1, n_tokens), token_ids)
            .map_err(|e| tensor_err(e.to_string()))?;
        let style =
            Array2::from_shape_vec((1, 256), style_vec).map_err(|e| tensor_err(e.to_string()))?;
        let speed = Array1::from_vec(vec![self.speed]);

        let outputs = session
            .run(ort::inputs![
                "tokens" => Tensor::from_array(tokens).map_err(|e| tensor_err(e.to_string()))?,
                "style" => Tensor::from_array(style).map_err(|e| tensor_err(e.to_string()))?,
                "speed" => Tensor::from_array(speed).map_err(|e| tensor_err(e.to_string()))?
            ])
            .map_err(|e| Error::Synthesis(format!("ONNX inference failed: {e}")))?;

        let (_, first_output) = outputs
            .iter()
            .next()
            .ok_or_else(|| Error::Synthesis("no output tensor from model".into()))?;
        let (_shape, audio) = first_output
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Synthesis(format!("failed to extract audio: {e}")))?;

        let samples = audio.to_vec();
        debug!(
            "Generated {} samples ({:.1}s)",
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32
        );
        Ok(samples)
    }

    /// Play samples to completion. Returns true if stopped by `cancel`.
    async fn play_audio(&self, samples: Vec<f32>) -> bool {
        let Some(stream) = &self.output_stream else {
            warn!("No audio output stream");
            return false;
        };

        let sink = Sink::connect_new(stream.mixer());
        sink.append(SamplesBuffer::new(1, SAMPLE_RATE, samples));
        *self.active_sink.lock() = Some(sink);

        let stop = self.stop_playback.clone();
        let active_sink = self.active_sink.clone();
        let was_cancelled = tokio::task::spawn_blocking(move || loop {
            let finished = active_sink.lock().as_ref().map_or(true, Sink::empty);
            if finished {
                return false;
            }
            if stop.load(Ordering::SeqCst) {
                if let Some(sink) = active_sink.lock().take() {
                    sink.stop();
                }
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        })
        .await
        .unwrap_or(false);

        *self.active_sink.lock() = None;
        was_cancelled
    }
}

#[async_trait]
impl SpeechSynthesizer for KokoroSynthesizer {
    fn generation(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    async fn speak(&self, text: &str, generation: u64) -> Result<()> {
        let epoch = generation;
        if self.cancelled_since(epoch) {
            debug!("Utterance cancelled before it was queued");
            return Ok(());
        }
        let _turn = self.turn.lock().await;
        // Re-arm first so a cancel landing after the check still stops playback
        self.stop_playback.store(false, Ordering::SeqCst);
        if self.cancelled_since(epoch) {
            debug!("Utterance cancelled while queued");
            return Ok(());
        }

        let sentences = split_sentences(text.trim());
        for (i, sentence) in sentences.iter().enumerate() {
            if self.cancelled_since(epoch) {
                info!("Cancelled before sentence {}/{}", i + 1, sentences.len());
                break;
            }

            let t_gen = Instant::now();
            let samples = match self.generate_audio(sentence) {
                Ok(s) => s,
                Err(e) => {
                    warn!("TTS generation failed for sentence {}: {e}", i + 1);
                    continue;
                }
            };
            let gen_ms = t_gen.elapsed().as_millis();

            if samples.is_empty() || self.cancelled_since(epoch) {
                continue;
            }

            let t_play = Instant::now();
            if self.play_audio(samples).await {
                info!("Cancelled during sentence {}/{}", i + 1, sentences.len());
                break;
            }
            debug!(
                "Sentence {}/{}: gen={gen_ms}ms play={}ms",
                i + 1,
                sentences.len(),
                t_play.elapsed().as_millis()
            );
        }

        Ok(())
    }

    fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.stop_playback.store(true, Ordering::SeqCst);
        if let Some(sink) = self.active_sink.lock().take() {
            sink.stop();
        }
        info!("TTS cancelled");
    }
}

/// Load the phoneme vocabulary from tokenizer.json (`model.vocab`).
fn load_tokenizer(path: &Path) -> Result<HashMap<char, i64>> {
    let contents = fs::read_to_string(path)?;
    let data: serde_json::Value = serde_json::from_str(&contents)?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or_else(|| Error::Synthesis("missing model.vocab in tokenizer.json".into()))?;

    let mut map = HashMap::with_capacity(vocab.len());
    for (token, id) in vocab {
        let id = id
            .as_i64()
            .ok_or_else(|| Error::Synthesis(format!("token id for {token:?} is not an integer")))?;
        if let Some(ch) = token.chars().next() {
            map.insert(ch, id);
        }
    }
    Ok(map)
}

/// Load all voice styles from the NPZ archive, squeezing (510, 1, 256) to (510, 256).
fn load_voices(path: &Path) -> Result<HashMap<String, Array2<f32>>> {
    let npz_err = |e: String| Error::Synthesis(format!("voices file {}: {e}", path.display()));
    let mut npz = NpzReader::new(fs::File::open(path)?).map_err(|e| npz_err(e.to_string()))?;
    let names = npz.names().map_err(|e| npz_err(e.to_string()))?;

    let mut voices = HashMap::with_capacity(names.len());
    for npy_name in names {
        let arr: Array3<f32> = npz.by_name(&npy_name).map_err(|e| npz_err(e.to_string()))?;
        let (rows, cols) = (arr.shape()[0], arr.shape()[2]);
        let styles = arr
            .into_shape_with_order((rows, cols))
            .map_err(|e| npz_err(e.to_string()))?;
        voices.insert(npy_name.trim_end_matches(".npy").to_string(), styles);
    }
    Ok(voices)
}

/// Split text into sentences at `.`, `!` or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?')
            && bytes.get(i + 1).is_some_and(u8::is_ascii_whitespace)
        {
            let s = text[start..=i].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = i + 1;
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}
