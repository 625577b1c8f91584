//! Decoder seam and the Symphonia implementation.
//!
//! The player pulls decoded chunks on its own thread, so decoding is synchronous: one
//! `next_chunk` call reads from the track stream until a packet decodes.

use anyhow::{Context, Result, anyhow};
use soundline_types::Track;
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::reader::TrackReader;

/// Audio decoder pulling from a [`TrackReader`].
pub trait Decoder {
    fn spec(&self) -> SignalSpec;
    /// Next run of interleaved `f32` samples; `Ok(None)` at end of data.
    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>>;
    fn duration_ms(&self) -> Option<u64>;
    /// Byte granularity that stream seeks must respect.
    fn byte_alignment(&self) -> u64 {
        4
    }
    /// Re-synchronize after the player moved the stream to byte `pos` of `len`.
    fn resync(&mut self, pos: u64, len: u64) -> Result<()>;
}

/// Builds a decoder for each track.
pub trait DecoderFactory: Send + Sync {
    fn open(&self, reader: TrackReader, track: &Track) -> Result<Box<dyn Decoder>>;
}

/// Probes the container with Symphonia, using the URL extension as a hint.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaFactory;

impl DecoderFactory for SymphoniaFactory {
    fn open(&self, reader: TrackReader, track: &Track) -> Result<Box<dyn Decoder>> {
        let mut hint = Hint::new();
        if let Some(ext) = infer_ext_from_url(&track.url) {
            hint.with_extension(&ext);
        }
        let decoder = SymphoniaDecoder::open(reader, hint)
            .with_context(|| format!("probe {}", track.url))?;
        Ok(Box::new(decoder))
    }
}

pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    spec: SignalSpec,
    duration_ms: Option<u64>,
}

impl SymphoniaDecoder {
    pub fn open(reader: TrackReader, hint: Hint) -> Result<Self> {
        let mss = MediaSourceStream::new(Box::new(reader), MediaSourceStreamOptions::default());
        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let codec_params: CodecParameters = track.codec_params.clone();
        let track_id = track.id;

        let channels = codec_params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?;
        let rate = codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;
        let spec = SignalSpec::new(rate, channels);

        let decoder =
            symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;
        let codec = codec_name_from_params(&codec_params);
        let duration_ms = duration_ms_from_codec_params(&codec_params);
        tracing::debug!(
            codec = codec.as_deref().unwrap_or("unknown"),
            bits = ?codec_params.bits_per_sample.or(codec_params.bits_per_coded_sample),
            rate_hz = rate,
            channels = channels.count(),
            duration_ms = ?duration_ms,
            "decoder opened"
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            spec,
            duration_ms,
        })
    }
}

impl Decoder for SymphoniaDecoder {
    fn spec(&self) -> SignalSpec {
        self.spec
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let mut buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
                    buf.copy_interleaved_ref(decoded);
                    return Ok(Some(buf.samples().to_vec()));
                }
                Err(SymphoniaError::DecodeError(msg)) => {
                    tracing::debug!(msg, "skipping undecodable packet");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    /// Containers are seeked by time; the byte offset is mapped through the duration.
    fn resync(&mut self, pos: u64, len: u64) -> Result<()> {
        let Some(duration_ms) = self.duration_ms.filter(|_| len > 0) else {
            self.decoder.reset();
            return Ok(());
        };
        if pos >= len {
            return Ok(());
        }
        let target_ms = (duration_ms as f64 * pos as f64 / len as f64) as u64;
        let time = Time::new(target_ms / 1000, (target_ms % 1000) as f64 / 1000.0);
        self.format
            .seek(
                SeekMode::Coarse,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .with_context(|| format!("seek to {target_ms} ms"))?;
        self.decoder.reset();
        Ok(())
    }
}

/// Best-effort file extension from a URL path, ignoring query and fragment.
pub fn infer_ext_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::*;

    #[test]
    fn duration_ms_needs_nonzero_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_ms_from_codec_params(&params).is_none());
        params.sample_rate = Some(44_100);
        params.n_frames = Some(441_000);
        assert_eq!(duration_ms_from_codec_params(&params), Some(10_000));
    }

    #[test]
    fn codec_names() {
        let mut params = CodecParameters::new();
        assert!(codec_name_from_params(&params).is_none());
        params.codec = CODEC_TYPE_MP3;
        assert_eq!(codec_name_from_params(&params).as_deref(), Some("MP3"));
    }

    #[test]
    fn infer_ext_from_url_handles_query_and_case() {
        assert_eq!(
            infer_ext_from_url("https://x/tracks/01.FLAC?sig=abc").as_deref(),
            Some("flac")
        );
        assert_eq!(
            infer_ext_from_url("http://x/a.mp3#t=1").as_deref(),
            Some("mp3")
        );
        assert_eq!(infer_ext_from_url("http://x/stream"), None);
        assert_eq!(infer_ext_from_url("http://x/a.b/stream"), None);
    }
}
