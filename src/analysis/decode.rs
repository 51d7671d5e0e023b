//! # WAV Payload Decoding
//!
//! Recorded fragments arrive as encoded WAV files in binary WebSocket frames.
//! Decoding normalises every supported sample format to `f64` in [-1.0, 1.0]
//! and averages multi-channel frames down to mono.

use super::{AnalysisError, AnalysisResult};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;

/// Mono audio decoded from a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f64>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode a WAV payload into mono samples.
///
/// ## Supported formats:
/// - Integer PCM of any bit depth, normalised by 2^(bits-1)
/// - 32-bit float PCM, taken as-is
pub fn decode_wav(payload: &[u8]) -> AnalysisResult<DecodedAudio> {
    if payload.is_empty() {
        return Err(AnalysisError::EmptySignal);
    }

    let reader = WavReader::new(Cursor::new(payload))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f64> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| v as f64))
            .collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f64;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f64 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    if interleaved.is_empty() {
        return Err(AnalysisError::EmptySignal);
    }

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f64>() / frame.len() as f64)
            .collect()
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Encode mono samples as a 32-bit float WAV file.
pub fn encode_wav(samples: &[f64], sample_rate: u32) -> AnalysisResult<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| AnalysisError::Encode(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(sample as f32)
                .map_err(|e| AnalysisError::Encode(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| AnalysisError::Encode(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_int16(frames: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for &s in frames {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_float_wav_decodes_to_same_samples() {
        let samples = vec![0.0, 0.25, -0.5, 0.75];
        let payload = encode_wav(&samples, 8000).unwrap();
        let decoded = decode_wav(&payload).unwrap();

        assert_eq!(decoded.sample_rate, 8000);
        assert_eq!(decoded.samples, samples);
    }

    #[test]
    fn test_stereo_is_averaged_to_mono() {
        // Two frames: (16384, 0) and (-16384, -16384)
        let payload = encode_int16(&[16384, 0, -16384, -16384], 2, 44_100);
        let decoded = decode_wav(&payload).unwrap();

        assert_eq!(decoded.sample_rate, 44_100);
        assert_eq!(decoded.samples.len(), 2);
        assert!((decoded.samples[0] - 0.25).abs() < 1e-9);
        assert!((decoded.samples[1] + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        assert!(decode_wav(b"definitely not a wav file").is_err());
        assert!(matches!(decode_wav(&[]), Err(AnalysisError::EmptySignal)));
    }
}
