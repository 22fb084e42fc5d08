//! # Audio Framing
//!
//! Converts generated float samples into the two wire representations:
//! - **PCM16**: raw little-endian 16-bit signed mono, one payload per streamed chunk
//! - **WAV container**: a complete RIFF/WAVE file for full (non-streaming) responses
//!
//! Everything here is a pure transformation; nothing touches the network or the disk.

use byteorder::{LittleEndian, ReadBytesExt};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::{self, Cursor};

/// PCM scale factor. Using 32767 (not 32768) keeps +1.0 representable.
const PCM16_SCALE: f32 = 32767.0;

/// Convert one float sample to a 16-bit PCM value.
///
/// Samples are clamped to [-1.0, 1.0] first so that out-of-range generator output
/// saturates instead of wrapping around.
pub fn sample_to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * PCM16_SCALE).round() as i16
}

/// Serialize samples as little-endian 16-bit signed mono PCM.
pub fn to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_pcm16(sample).to_le_bytes());
    }
    bytes
}

/// Decode little-endian 16-bit PCM back into float samples in [-1.0, 1.0].
///
/// ## Errors:
/// Returns an error if the byte count is odd, i.e. not a whole number of samples.
pub fn pcm16_to_samples(bytes: &[u8]) -> Result<Vec<f32>, String> {
    if bytes.len() % 2 != 0 {
        return Err("PCM16 data length must be even".to_string());
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / PCM16_SCALE);
    }
    Ok(samples)
}

/// Header of every WAV file this service writes.
fn container_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn wav_error(err: hound::Error) -> io::Error {
    match err {
        hound::Error::IoError(err) => err,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

/// Wrap sample batches into a complete mono 16-bit WAV file.
///
/// Batches are concatenated in the order given, which is the order they were received.
pub fn to_container<B>(batches: &[B], sample_rate: u32) -> io::Result<Vec<u8>>
where
    B: AsRef<[f32]>,
{
    let total: usize = batches.iter().map(|batch| batch.as_ref().len()).sum();
    let mut cursor = Cursor::new(Vec::with_capacity(44 + total * 2));

    let mut writer = WavWriter::new(&mut cursor, container_spec(sample_rate)).map_err(wav_error)?;
    for batch in batches {
        for &sample in batch.as_ref() {
            writer.write_sample(sample_to_pcm16(sample)).map_err(wav_error)?;
        }
    }
    writer.finalize().map_err(wav_error)?;

    Ok(cursor.into_inner())
}

/// Read a WAV file produced by [`to_container`].
///
/// ## Returns:
/// The sample rate from the header and the 16-bit samples.
pub fn read_container(bytes: &[u8]) -> io::Result<(u32, Vec<i16>)> {
    let mut reader = WavReader::new(Cursor::new(bytes)).map_err(wav_error)?;
    let spec = reader.spec();

    if spec.channels != 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected mono audio, found {} channels", spec.channels),
        ));
    }
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected 16-bit audio, found {} bits", spec.bits_per_sample),
        ));
    }

    let samples = reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(wav_error)?;
    Ok((spec.sample_rate, samples))
}

/// Playback length in seconds of `sample_count` mono samples.
pub fn duration(sample_count: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f64 / sample_rate as f64
}
