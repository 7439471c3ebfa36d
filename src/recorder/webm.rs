//! Minimal live-style WebM muxer for 16-bit PCM audio
//!
//! The header declares a Segment of unknown size, so the header followed by
//! any number of clusters is a playable file. Chunks can be emitted one
//! cluster at a time and simply concatenated.

const EBML: u32 = 0x1A45_DFA3;
const EBML_VERSION: u32 = 0x4286;
const EBML_READ_VERSION: u32 = 0x42F7;
const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
const DOC_TYPE: u32 = 0x4282;
const DOC_TYPE_VERSION: u32 = 0x4287;
const DOC_TYPE_READ_VERSION: u32 = 0x4285;

const SEGMENT: u32 = 0x1853_8067;
const INFO: u32 = 0x1549_A966;
const TIMECODE_SCALE: u32 = 0x2A_D7B1;
const MUXING_APP: u32 = 0x4D80;
const WRITING_APP: u32 = 0x5741;

const TRACKS: u32 = 0x1654_AE6B;
const TRACK_ENTRY: u32 = 0xAE;
const TRACK_NUMBER: u32 = 0xD7;
const TRACK_UID: u32 = 0x73C5;
const TRACK_TYPE: u32 = 0x83;
const CODEC_ID: u32 = 0x86;
const AUDIO: u32 = 0xE1;
const SAMPLING_FREQUENCY: u32 = 0xB5;
const CHANNELS: u32 = 0x9F;
const BIT_DEPTH: u32 = 0x6264;

const CLUSTER: u32 = 0x1F43_B675;
const TIMECODE: u32 = 0xE7;
const SIMPLE_BLOCK: u32 = 0xA3;

/// Size marker meaning "unknown", used for the live Segment
const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

const TRACK_TYPE_AUDIO: u64 = 2;
const PCM_CODEC: &str = "A_PCM/INT/LIT";

/// SimpleBlock timecodes are signed 16-bit offsets from the cluster
pub const MAX_BLOCK_OFFSET_MS: u64 = i16::MAX as u64;

/// Encode an EBML variable-length size
pub fn encode_vint(value: u64) -> Vec<u8> {
    for len in 1..=8u32 {
        // All-ones is reserved for "unknown"
        let max = (1u64 << (7 * len)) - 1;
        if value < max {
            let marked = value | (1u64 << (7 * len));
            return marked.to_be_bytes()[(8 - len as usize)..].to_vec();
        }
    }
    // Beyond 2^56; never produced for audio blocks
    UNKNOWN_SIZE.to_vec()
}

fn encode_id(id: u32) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(3);
    bytes[skip..].to_vec()
}

fn encode_uint(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    bytes[skip..].to_vec()
}

fn element(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = encode_id(id);
    out.extend(encode_vint(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

fn uint_element(id: u32, value: u64) -> Vec<u8> {
    element(id, &encode_uint(value))
}

fn string_element(id: u32, value: &str) -> Vec<u8> {
    element(id, value.as_bytes())
}

fn float_element(id: u32, value: f64) -> Vec<u8> {
    element(id, &value.to_be_bytes())
}

/// One block of interleaved samples placed on the cluster timeline
#[derive(Debug, Clone, Copy)]
pub struct Block<'a> {
    pub offset_ms: u64,
    pub samples: &'a [i16],
}

#[derive(Debug, Clone)]
pub struct WebmMuxer {
    sample_rate: u32,
    channels: u16,
}

impl WebmMuxer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// EBML header, open Segment, Info and Tracks
    pub fn header(&self) -> Vec<u8> {
        let mut ebml = Vec::new();
        ebml.extend(uint_element(EBML_VERSION, 1));
        ebml.extend(uint_element(EBML_READ_VERSION, 1));
        ebml.extend(uint_element(EBML_MAX_ID_LENGTH, 4));
        ebml.extend(uint_element(EBML_MAX_SIZE_LENGTH, 8));
        ebml.extend(string_element(DOC_TYPE, "webm"));
        ebml.extend(uint_element(DOC_TYPE_VERSION, 4));
        ebml.extend(uint_element(DOC_TYPE_READ_VERSION, 2));

        let mut info = Vec::new();
        info.extend(uint_element(TIMECODE_SCALE, 1_000_000));
        info.extend(string_element(MUXING_APP, env!("CARGO_PKG_NAME")));
        info.extend(string_element(WRITING_APP, env!("CARGO_PKG_NAME")));

        let mut audio = Vec::new();
        audio.extend(float_element(SAMPLING_FREQUENCY, self.sample_rate as f64));
        audio.extend(uint_element(CHANNELS, self.channels as u64));
        audio.extend(uint_element(BIT_DEPTH, 16));

        let mut track = Vec::new();
        track.extend(uint_element(TRACK_NUMBER, 1));
        track.extend(uint_element(TRACK_UID, 1));
        track.extend(uint_element(TRACK_TYPE, TRACK_TYPE_AUDIO));
        track.extend(string_element(CODEC_ID, PCM_CODEC));
        track.extend(element(AUDIO, &audio));

        let mut out = element(EBML, &ebml);
        out.extend(encode_id(SEGMENT));
        out.extend_from_slice(&UNKNOWN_SIZE);
        out.extend(element(INFO, &info));
        out.extend(element(TRACKS, &element(TRACK_ENTRY, &track)));
        out
    }

    /// A Cluster at `timecode_ms` holding one SimpleBlock per block.
    ///
    /// Block offsets must not exceed [`MAX_BLOCK_OFFSET_MS`].
    pub fn cluster(&self, timecode_ms: u64, blocks: &[Block<'_>]) -> Vec<u8> {
        let mut payload = uint_element(TIMECODE, timecode_ms);

        for block in blocks {
            let offset = block.offset_ms.min(MAX_BLOCK_OFFSET_MS) as i16;
            let mut body = Vec::with_capacity(4 + block.samples.len() * 2);
            body.extend(encode_vint(1)); // track number
            body.extend_from_slice(&offset.to_be_bytes());
            body.push(0x80); // keyframe
            for sample in block.samples {
                body.extend_from_slice(&sample.to_le_bytes());
            }
            payload.extend(element(SIMPLE_BLOCK, &body));
        }

        element(CLUSTER, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vint_lengths() {
        assert_eq!(encode_vint(0), vec![0x80]);
        assert_eq!(encode_vint(1), vec![0x81]);
        assert_eq!(encode_vint(126), vec![0xFE]);
        // 127 would be all ones in one byte, so it takes two
        assert_eq!(encode_vint(127), vec![0x40, 0x7F]);
        assert_eq!(encode_vint(300), vec![0x41, 0x2C]);
    }

    #[test]
    fn test_id_and_uint_are_minimal() {
        assert_eq!(encode_id(TIMECODE), vec![0xE7]);
        assert_eq!(encode_id(TIMECODE_SCALE), vec![0x2A, 0xD7, 0xB1]);
        assert_eq!(encode_id(EBML), vec![0x1A, 0x45, 0xDF, 0xA3]);
        assert_eq!(encode_uint(0), vec![0x00]);
        assert_eq!(encode_uint(1_000_000), vec![0x0F, 0x42, 0x40]);
    }

    #[test]
    fn test_header_layout() {
        let header = WebmMuxer::new(48000, 1).header();

        assert_eq!(&header[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        let text = String::from_utf8_lossy(&header);
        assert!(text.contains("webm"));
        assert!(text.contains(PCM_CODEC));

        let segment = header
            .windows(4)
            .position(|w| w == [0x18, 0x53, 0x80, 0x67])
            .unwrap();
        assert_eq!(&header[segment + 4..segment + 12], &UNKNOWN_SIZE);
    }

    #[test]
    fn test_cluster_blocks() {
        let muxer = WebmMuxer::new(48000, 1);
        let samples = [1i16, -1];
        let cluster = muxer.cluster(
            2000,
            &[Block {
                offset_ms: 20,
                samples: &samples,
            }],
        );

        assert_eq!(&cluster[..4], &[0x1F, 0x43, 0xB6, 0x75]);
        // Cluster size, then Timecode 2000
        assert_eq!(&cluster[5..9], &[0xE7, 0x82, 0x07, 0xD0]);
        // SimpleBlock: track 1, offset 20, keyframe, two LE samples
        assert_eq!(
            &cluster[9..],
            &[0xA3, 0x88, 0x81, 0x00, 0x14, 0x80, 0x01, 0x00, 0xFF, 0xFF]
        );
    }
}
