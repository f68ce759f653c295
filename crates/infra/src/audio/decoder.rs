//! WAV decoding with `hound`

use async_trait::async_trait;
use murmur_core::domain::audio::{AudioError, BufferDecoder, Result, SampleBuffer};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, instrument};

/// Decodes PCM and float WAV data into normalised `f32` samples
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl WavDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode synchronously
    pub fn decode_bytes(name: &str, bytes: &[u8]) -> Result<SampleBuffer> {
        let failure = |e: hound::Error| AudioError::DecodeFailure(format!("{name}: {e}"));

        let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(failure)?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(failure)?,
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(AudioError::DecodeFailure(format!(
                        "{name}: unsupported bit depth {}",
                        spec.bits_per_sample
                    )));
                }
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(failure)?
            }
        };

        debug!(
            name,
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            samples = samples.len(),
            "WAV decoded"
        );
        SampleBuffer::new(spec.sample_rate, spec.channels, samples)
    }

    /// Read and decode a file
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn decode_file<P: AsRef<Path>>(&self, path: P) -> Result<SampleBuffer> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            AudioError::DecodeFailure(format!("{}: {e}", path.display()))
        })?;
        let name = path.display().to_string();
        self.decode(&name, bytes).await
    }
}

#[async_trait]
impl BufferDecoder for WavDecoder {
    async fn decode(&self, name: &str, bytes: Vec<u8>) -> Result<SampleBuffer> {
        let owned = name.to_string();
        tokio::task::spawn_blocking(move || Self::decode_bytes(&owned, &bytes))
            .await
            .map_err(|e| AudioError::Runtime(format!("decode task failed: {e}")))?
    }
}
