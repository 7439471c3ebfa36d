use std::io::Cursor;

use serde::{Deserialize, Serialize};

use super::webm::{Block, WebmMuxer, MAX_BLOCK_OFFSET_MS};
use crate::audio::AudioFrame;
use crate::error::RecorderError;

/// Container the recorder writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    #[default]
    Webm,
    Wav,
}

impl ContainerFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerFormat::Webm => "audio/webm;codecs=pcm",
            ContainerFormat::Wav => "audio/wav",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Webm => "webm",
            ContainerFormat::Wav => "wav",
        }
    }

    pub fn encoder(&self, sample_rate: u32, channels: u16) -> Box<dyn ChunkEncoder> {
        match self {
            ContainerFormat::Webm => Box::new(WebmEncoder::new(sample_rate, channels)),
            ContainerFormat::Wav => Box::new(PcmEncoder),
        }
    }

    /// Join recorded chunks into the final file
    pub fn assemble(
        &self,
        sample_rate: u32,
        channels: u16,
        chunks: &[Vec<u8>],
    ) -> Result<Vec<u8>, RecorderError> {
        match self {
            ContainerFormat::Webm => Ok(chunks.concat()),
            ContainerFormat::Wav => wav_from_pcm(sample_rate, channels, chunks),
        }
    }
}

/// Turns the frames of one timeslice into a data chunk
pub trait ChunkEncoder: Send {
    /// May return an empty chunk when there is nothing to emit
    fn encode(&mut self, frames: &[AudioFrame]) -> Result<Vec<u8>, RecorderError>;

    /// Trailing bytes once recording ends
    fn finish(&mut self) -> Result<Vec<u8>, RecorderError>;
}

/// Emits the WebM header with the first chunk, then one cluster per chunk
pub struct WebmEncoder {
    muxer: WebmMuxer,
    sample_rate: u32,
    channels: u16,
    header_written: bool,
    samples_written: u64,
}

impl WebmEncoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            muxer: WebmMuxer::new(sample_rate, channels),
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            header_written: false,
            samples_written: 0,
        }
    }

    fn position_ms(&self) -> u64 {
        self.samples_written * 1000 / (self.sample_rate as u64 * self.channels as u64)
    }

    fn take_header(&mut self) -> Vec<u8> {
        if self.header_written {
            return Vec::new();
        }
        self.header_written = true;
        self.muxer.header()
    }
}

impl ChunkEncoder for WebmEncoder {
    fn encode(&mut self, frames: &[AudioFrame]) -> Result<Vec<u8>, RecorderError> {
        let mut out = self.take_header();

        let mut cluster_start = self.position_ms();
        let mut blocks: Vec<Block<'_>> = Vec::new();
        let mut positions = Vec::with_capacity(frames.len());

        for frame in frames {
            if frame.sample_rate != self.sample_rate || frame.channels != self.channels {
                return Err(RecorderError::Encode(format!(
                    "frame format {}Hz/{}ch does not match recorder {}Hz/{}ch",
                    frame.sample_rate, frame.channels, self.sample_rate, self.channels
                )));
            }
            positions.push(self.position_ms());
            self.samples_written += frame.samples.len() as u64;
        }

        for (frame, &position) in frames.iter().zip(&positions) {
            if position - cluster_start > MAX_BLOCK_OFFSET_MS {
                out.extend(self.muxer.cluster(cluster_start, &blocks));
                blocks.clear();
                cluster_start = position;
            }
            blocks.push(Block {
                offset_ms: position - cluster_start,
                samples: &frame.samples,
            });
        }

        if !blocks.is_empty() {
            out.extend(self.muxer.cluster(cluster_start, &blocks));
        }

        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<u8>, RecorderError> {
        // A recording with no data still yields a parseable file
        Ok(self.take_header())
    }
}

/// Raw little-endian PCM chunks; the WAV header is added on assembly
pub struct PcmEncoder;

impl ChunkEncoder for PcmEncoder {
    fn encode(&mut self, frames: &[AudioFrame]) -> Result<Vec<u8>, RecorderError> {
        Ok(frames
            .iter()
            .flat_map(|frame| frame.samples.iter())
            .flat_map(|sample| sample.to_le_bytes())
            .collect())
    }

    fn finish(&mut self) -> Result<Vec<u8>, RecorderError> {
        Ok(Vec::new())
    }
}

fn wav_from_pcm(sample_rate: u32, channels: u16, chunks: &[Vec<u8>]) -> Result<Vec<u8>, RecorderError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| RecorderError::Encode(format!("failed to start WAV: {}", e)))?;

        for chunk in chunks {
            for pair in chunk.chunks_exact(2) {
                writer
                    .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                    .map_err(|e| RecorderError::Encode(format!("failed to write sample: {}", e)))?;
            }
        }

        writer
            .finalize()
            .map_err(|e| RecorderError::Encode(format!("failed to finalize WAV: {}", e)))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioStreamSource;

    fn frame(value: i16, len: usize) -> AudioFrame {
        AudioFrame {
            samples: vec![value; len],
            sample_rate: 48000,
            channels: 1,
            timestamp_ms: 0,
            source: AudioStreamSource::Mixed,
        }
    }

    #[test]
    fn test_webm_header_only_once() {
        let mut encoder = WebmEncoder::new(48000, 1);

        let first = encoder.encode(&[frame(1, 960)]).unwrap();
        let second = encoder.encode(&[frame(1, 960)]).unwrap();

        assert_eq!(&first[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        assert_eq!(&second[..4], &[0x1F, 0x43, 0xB6, 0x75]);
        assert!(encoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_webm_empty_slice_after_header_is_empty() {
        let mut encoder = WebmEncoder::new(48000, 1);
        assert!(!encoder.encode(&[]).unwrap().is_empty());
        assert!(encoder.encode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_webm_unused_encoder_still_emits_header() {
        let mut encoder = WebmEncoder::new(48000, 1);
        let tail = encoder.finish().unwrap();
        assert_eq!(&tail[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
    }

    #[test]
    fn test_webm_rejects_mismatched_format() {
        let mut encoder = WebmEncoder::new(48000, 1);
        let mut wrong = frame(0, 4);
        wrong.sample_rate = 44100;

        assert!(matches!(encoder.encode(&[wrong]), Err(RecorderError::Encode(_))));
    }

    #[test]
    fn test_wav_assembly() {
        let mut encoder = PcmEncoder;
        let chunks = vec![
            encoder.encode(&[frame(7, 480)]).unwrap(),
            encoder.encode(&[frame(-7, 480)]).unwrap(),
        ];

        let bytes = ContainerFormat::Wav.assemble(48000, 1, &chunks).unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 48000);

        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 960);
        assert_eq!(samples[0], 7);
        assert_eq!(samples[959], -7);
    }

    #[test]
    fn test_format_metadata() {
        assert_eq!(ContainerFormat::Webm.mime_type(), "audio/webm;codecs=pcm");
        assert_eq!(ContainerFormat::Wav.extension(), "wav");
        assert_eq!(ContainerFormat::default(), ContainerFormat::Webm);
    }
}
