// Sample conversion helpers for device-rate capture
//
// Devices rarely deliver exactly the graph's format, so captured buffers are
// converted to i16, folded to the target channel count, resampled, and cut
// into fixed-size frames before they reach a track.

/// Convert an f32 sample in [-1.0, 1.0] to i16
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Convert a u16 sample (offset binary) to i16
pub fn u16_to_i16(sample: u16) -> i16 {
    (sample as i32 - 32768) as i16
}

/// Fold interleaved audio to mono by averaging channels
pub fn to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|chunk| {
            let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Duplicate a mono signal into `channels` interleaved channels
pub fn from_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .iter()
        .flat_map(|&s| std::iter::repeat(s).take(channels as usize))
        .collect()
}

/// Linear-interpolation resampler for a mono signal
///
/// Keeps fractional position across calls so consecutive device buffers
/// resample without seams.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    ratio: f64,
    position: f64,
    last: Option<i16>,
}

impl LinearResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            ratio: source_rate as f64 / target_rate as f64,
            position: 0.0,
            last: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        (self.ratio - 1.0).abs() < f64::EPSILON
    }

    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if self.is_passthrough() || input.is_empty() {
            return input.to_vec();
        }

        // Prepend the previous buffer's last sample so interpolation spans the seam
        let mut source = Vec::with_capacity(input.len() + 1);
        if let Some(last) = self.last {
            source.push(last);
        }
        source.extend_from_slice(input);

        let mut output = Vec::with_capacity((input.len() as f64 / self.ratio) as usize + 1);
        while self.position + 1.0 < source.len() as f64 {
            let index = self.position.floor() as usize;
            let frac = self.position - index as f64;
            let a = source[index] as f64;
            let b = source[index + 1] as f64;
            output.push((a + (b - a) * frac).round() as i16);
            self.position += self.ratio;
        }

        // Rebase position onto the sample we keep for the next call
        self.position -= (source.len() - 1) as f64;
        self.last = source.last().copied();

        output
    }
}

/// Accumulates samples and hands out fixed-size frames
#[derive(Debug, Default)]
pub struct FrameChunker {
    frame_len: usize,
    pending: Vec<i16>,
}

impl FrameChunker {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len: frame_len.max(1),
            pending: Vec::with_capacity(frame_len * 2),
        }
    }

    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_len {
            let rest = self.pending.split_off(self.frame_len);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_mono_averages_channels() {
        let mono = to_mono(&[100, 300, -200, 200], 2);
        assert_eq!(mono, vec![200, 0]);
    }

    #[test]
    fn test_from_mono_duplicates() {
        assert_eq!(from_mono(&[1, 2], 2), vec![1, 1, 2, 2]);
    }

    #[test]
    fn test_resampler_halves_length() {
        let mut resampler = LinearResampler::new(32000, 16000);
        let out = resampler.process(&vec![1000i16; 3200]);
        assert!((out.len() as i64 - 1600).abs() <= 1, "got {}", out.len());
        assert!(out.iter().all(|&s| s == 1000));
    }

    #[test]
    fn test_resampler_is_continuous_across_calls() {
        let mut resampler = LinearResampler::new(48000, 16000);
        let mut total = 0;
        for _ in 0..10 {
            total += resampler.process(&vec![0i16; 480]).len();
        }
        assert!((total as i64 - 1600).abs() <= 1, "got {}", total);
    }

    #[test]
    fn test_chunker_emits_full_frames_only() {
        let mut chunker = FrameChunker::new(4);
        assert!(chunker.push(&[1, 2, 3]).is_empty());
        let frames = chunker.push(&[4, 5, 6, 7, 8, 9]);
        assert_eq!(frames, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
    }

    #[test]
    fn test_sample_conversions() {
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(u16_to_i16(32768), 0);
        assert_eq!(u16_to_i16(0), i16::MIN);
    }
}
