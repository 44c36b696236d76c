//! Audio decoding using symphonia
//!
//! Decodes a local file to a mono `Waveform` at the analysis sample rate.
//! Channels are averaged packet by packet; the result is resampled with
//! rubato's FFT resampler when the source rate differs.

use crate::error::{BeatkeyError, ErrorContext, Result};
use crate::types::{to_mono, Waveform};
use rubato::{FftFixedInOut, Resampler};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, trace};

/// Sample rate every decoded waveform is converted to
pub const TARGET_SAMPLE_RATE: u32 = 22050;

/// Maximum file size we'll attempt to decode (2GB)
const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Input frames per rubato chunk
const RESAMPLE_CHUNK: usize = 1024;

/// An opened audio stream positioned at its first audio track
struct AudioStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
}

/// Decode an audio file to a mono waveform at `TARGET_SAMPLE_RATE`
pub fn decode(path: &Path) -> Result<Waveform> {
    if !path.exists() {
        return Err(BeatkeyError::FileNotFound(path.to_path_buf()));
    }

    let size = std::fs::metadata(path)
        .map(|m| m.len())
        .with_file_context(path)?;
    if size > MAX_FILE_SIZE {
        return Err(BeatkeyError::decode_error(
            path,
            format!(
                "File too large ({:.1} GB). Maximum supported size is 2 GB.",
                size as f64 / (1024.0 * 1024.0 * 1024.0)
            ),
        ));
    }

    let mut stream = open(path)?;
    let samples = read_mono(&mut stream, path)?;
    let source = Waveform::new(samples, stream.sample_rate)?;

    let waveform = resample(&source, TARGET_SAMPLE_RATE);
    debug!(
        "Decoded {} ({:.2}s @ {}Hz -> {}Hz)",
        path.display(),
        waveform.duration_seconds(),
        source.sample_rate,
        waveform.sample_rate
    );

    Ok(waveform)
}

/// Identify the container and build a decoder for its first audio track
fn open(path: &Path) -> Result<AudioStream> {
    let file = std::fs::File::open(path).with_file_context(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let detected = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| BeatkeyError::decode_error(path, format!("Failed to identify format: {}", e)))?;
    let format = detected.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| BeatkeyError::decode_error(path, "No audio tracks found"))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| BeatkeyError::decode_error(path, "Unknown sample rate"))?;
    let track_id = track.id;

    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| {
            BeatkeyError::decode_error(path, format!("Failed to create decoder: {}", e))
        })?;

    debug!(
        "Opened {} @ {}Hz, {} channels",
        path.display(),
        sample_rate,
        track
            .codec_params
            .channels
            .map(|c| c.count())
            .unwrap_or_default()
    );

    Ok(AudioStream {
        format,
        decoder,
        track_id,
        sample_rate,
    })
}

/// Decode every packet of the selected track, averaging channels
fn read_mono(stream: &mut AudioStream, path: &Path) -> Result<Vec<f32>> {
    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match stream.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => {
                return Err(BeatkeyError::decode_error(
                    path,
                    format!("Failed to read packet: {}", e),
                ));
            }
        };

        if packet.track_id() != stream.track_id {
            continue;
        }

        let decoded = match stream.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                trace!("Skipping corrupted frame: {}", e);
                continue;
            }
            Err(e) => {
                return Err(BeatkeyError::decode_error(path, format!("Decode error: {}", e)));
            }
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut buffer = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend(to_mono(buffer.samples(), channels));
    }

    Ok(samples)
}

/// Resample a waveform to `to_rate`
///
/// Uses rubato's FFT resampler, which band-limits before downsampling. The
/// resampler's output delay is trimmed from the front and the input is
/// flushed with silence, so sample positions (and beat times) line up with
/// the source. Falls back to linear interpolation if rubato cannot be set up
/// or fails.
pub fn resample(waveform: &Waveform, to_rate: u32) -> Waveform {
    let from_rate = waveform.sample_rate;
    if from_rate == to_rate || waveform.is_empty() {
        return Waveform {
            samples: waveform.samples.clone(),
            sample_rate: if waveform.is_empty() { to_rate } else { from_rate },
        };
    }

    let samples = &waveform.samples;
    let linear = || Waveform {
        samples: resample_linear(samples, from_rate, to_rate),
        sample_rate: to_rate,
    };

    let mut resampler =
        match FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 1) {
            Ok(r) => r,
            Err(e) => {
                debug!("Rubato initialization failed ({}), using linear fallback", e);
                return linear();
            }
        };

    let chunk_in = resampler.input_frames_next();
    let delay = resampler.output_delay();
    let expected = (samples.len() as f64 * to_rate as f64 / from_rate as f64).ceil() as usize;
    let mut output = Vec::with_capacity(delay + expected + resampler.output_frames_next());

    // Past the end of the input the chunks are pure silence
    let mut position = 0;
    while output.len() < delay + expected {
        let start = position.min(samples.len());
        let end = (position + chunk_in).min(samples.len());
        let mut input = samples[start..end].to_vec();
        input.resize(chunk_in, 0.0);
        let channels = vec![input];

        match resampler.process(&channels, None) {
            Ok(resampled) => match resampled.first() {
                Some(channel) if !channel.is_empty() => output.extend_from_slice(channel),
                _ => break,
            },
            Err(e) => {
                debug!("Rubato processing error ({}), using linear fallback", e);
                return linear();
            }
        }
        position += chunk_in;
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);

    Waveform {
        samples: output,
        sample_rate: to_rate,
    }
}

/// Linear interpolation resampler, may alias
fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let step = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / step) as usize;
    let last = samples.len() - 1;

    (0..output_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            if idx < last {
                samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
            } else {
                samples[idx.min(last)]
            }
        })
        .collect()
}
