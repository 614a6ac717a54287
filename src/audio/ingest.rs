// Band stem ingestion
// Reads per-band WAV stems into mono signals for the transient filter

use hound::{SampleFormat, WavReader};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::onsets::Band;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Missing required input: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Failed to read WAV file: {0}")]
    WavReadError(#[from] hound::Error),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid audio data")]
    InvalidData,
}

#[derive(Debug, Clone)]
pub struct AudioData {
    /// Interleaved samples normalized to f32 in range [-1.0, 1.0]
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Total number of frames (samples / channels)
    pub frame_count: usize,
}

impl AudioData {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count as f64 / self.sample_rate as f64
    }

    /// Convert to mono by averaging channels
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }

        let channels = self.channels as usize;
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// Mono signal of one band stem
#[derive(Debug, Clone, PartialEq)]
pub struct BandSignal {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl BandSignal {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        BandSignal {
            samples,
            sample_rate,
        }
    }

    pub fn from_audio(audio: &AudioData) -> Self {
        BandSignal {
            samples: audio.to_mono(),
            sample_rate: audio.sample_rate,
        }
    }
}

/// Band stems keyed by band
pub type BandSignals = BTreeMap<Band, BandSignal>;

/// Decode a WAV file held in memory
pub fn ingest_wav(data: &[u8]) -> Result<AudioData, AudioError> {
    let reader = WavReader::new(Cursor::new(data))?;
    read_samples(reader)
}

fn read_samples<R: std::io::Read>(mut reader: WavReader<R>) -> Result<AudioData, AudioError> {
    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels;

    if channels == 0 || sample_rate == 0 {
        return Err(AudioError::InvalidData);
    }

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|s| s as f32 / 128.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32768.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 8388608.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 2147483648.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        (format, bits) => {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?} {}-bit audio",
                format, bits
            )));
        }
    };

    let frame_count = samples.len() / channels as usize;

    Ok(AudioData {
        samples,
        sample_rate,
        channels,
        frame_count,
    })
}

/// Load one band stem from disk as a mono signal
pub fn load_band_wav(path: &Path) -> Result<BandSignal, AudioError> {
    if !path.exists() {
        return Err(AudioError::MissingInput(path.to_path_buf()));
    }

    let reader = WavReader::open(path)?;
    let audio = read_samples(reader)?;
    log::debug!(
        "Loaded band stem {}: {} Hz, {} channels, {:.2} s",
        path.display(),
        audio.sample_rate,
        audio.channels,
        audio.duration_secs()
    );
    Ok(BandSignal::from_audio(&audio))
}

/// Load every listed band stem; any missing file fails the whole load
pub fn load_band_signals(paths: &BTreeMap<Band, PathBuf>) -> Result<BandSignals, AudioError> {
    paths
        .iter()
        .map(|(&band, path)| Ok((band, load_band_wav(path)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use tempfile::TempDir;

    fn write_test_wav(path: &Path, channels: u16, samples: &[i16]) {
        let spec = WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_audio_data_to_mono() {
        let audio_data = AudioData {
            samples: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
            sample_rate: 44100,
            channels: 2,
            frame_count: 3,
        };

        let mono = audio_data.to_mono();

        assert_eq!(mono.len(), 3);
        assert!((mono[0] - 0.15).abs() < 1e-6);
        assert!((mono[1] - 0.35).abs() < 1e-6);
        assert!((mono[2] - 0.55).abs() < 1e-6);
    }

    #[test]
    fn test_audio_data_duration_secs() {
        let audio_data = AudioData {
            samples: vec![0.0; 8000],
            sample_rate: 4000,
            channels: 1,
            frame_count: 8000,
        };

        assert_eq!(audio_data.duration_secs(), 2.0);
    }

    #[test]
    fn test_load_band_wav_stereo_to_mono() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("drum_high.wav");
        write_test_wav(&path, 2, &[16384, 0, -16384, 0]);

        let signal = load_band_wav(&path).unwrap();

        assert_eq!(signal.sample_rate, 8000);
        assert_eq!(signal.samples.len(), 2);
        assert!((signal.samples[0] - 0.25).abs() < 1e-6);
        assert!((signal.samples[1] + 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_ingest_wav_from_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("drum_mid.wav");
        write_test_wav(&path, 1, &[0, 32767, -32768]);

        let bytes = std::fs::read(&path).unwrap();
        let audio = ingest_wav(&bytes).unwrap();

        assert_eq!(audio.channels, 1);
        assert_eq!(audio.frame_count, 3);
        assert!((audio.samples[2] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_stem_is_distinguishable() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("drum_low.wav");

        let err = load_band_wav(&missing).unwrap_err();
        assert!(matches!(err, AudioError::MissingInput(ref p) if p == &missing));

        let mut paths = BTreeMap::new();
        paths.insert(Band::Low, missing);
        assert!(matches!(
            load_band_signals(&paths),
            Err(AudioError::MissingInput(_))
        ));
    }
}
