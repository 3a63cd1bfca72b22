//! Mixes the local microphone and every subscribed remote audio track into
//! one mono stream at the encoder's sample rate.

use tracing::debug;

use crate::transport::AudioTap;

pub const MIX_SAMPLE_RATE: u32 = 48_000;

pub struct MixedAudioSource {
    taps: Vec<Box<dyn AudioTap>>,
    sample_rate: u32,
}

impl MixedAudioSource {
    pub fn new(taps: Vec<Box<dyn AudioTap>>, sample_rate: u32) -> Self {
        debug!("Mixing {} audio tracks at {}Hz", taps.len(), sample_rate);
        Self { taps, sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn track_count(&self) -> usize {
        self.taps.len()
    }

    /// Drains every tap, converts each to the output rate and sums them.
    pub fn pull(&mut self) -> Vec<f32> {
        let target = self.sample_rate;
        let sources: Vec<Vec<f32>> = self
            .taps
            .iter_mut()
            .map(|tap| {
                let rate = tap.sample_rate();
                resample(&tap.read(), rate, target)
            })
            .collect();
        mix(&sources)
    }
}

/// Sums the sources sample by sample, zero-padding the short ones. The
/// result is scaled down only when its peak would clip.
pub fn mix(sources: &[Vec<f32>]) -> Vec<f32> {
    let len = sources.iter().map(Vec::len).max().unwrap_or(0);
    let mut mixed = vec![0.0f32; len];
    for source in sources {
        for (out, sample) in mixed.iter_mut().zip(source) {
            *out += sample;
        }
    }

    let peak = mixed.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
    if peak > 1.0 {
        mixed.iter_mut().for_each(|s| *s /= peak);
    }
    mixed
}

/// Linear-interpolation resampler. Good enough for speech.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let step = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (samples.len() as u64 * u64::from(to_rate)).div_ceil(u64::from(from_rate)) as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            samples[idx] + (samples[next] - samples[idx]) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tone {
        rate: u32,
        chunks: Vec<Vec<f32>>,
    }

    impl AudioTap for Tone {
        fn sample_rate(&self) -> u32 {
            self.rate
        }

        fn read(&mut self) -> Vec<f32> {
            if self.chunks.is_empty() {
                Vec::new()
            } else {
                self.chunks.remove(0)
            }
        }
    }

    #[test]
    fn test_mix_pads_shorter_sources() {
        let mixed = mix(&[vec![0.25, 0.25], vec![0.25, 0.25, 0.25, 0.25]]);
        assert_eq!(mixed, vec![0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn test_mix_scales_only_when_clipping() {
        let quiet = mix(&[vec![0.2], vec![0.3]]);
        assert!((quiet[0] - 0.5).abs() < 1e-6);

        let loud = mix(&[vec![0.9, -0.4], vec![0.9, 0.0]]);
        assert!((loud[0] - 1.0).abs() < 1e-6);
        assert!(loud.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_mix_nothing() {
        assert!(mix(&[]).is_empty());
        assert!(mix(&[Vec::new(), Vec::new()]).is_empty());
    }

    #[test]
    fn test_resample_lengths() {
        let samples: Vec<f32> = (0..48).map(|i| i as f32).collect();
        assert_eq!(resample(&samples, 48_000, 16_000).len(), 16);
        assert_eq!(resample(&samples[..16], 16_000, 48_000).len(), 48);
        assert_eq!(resample(&samples, 48_000, 48_000), samples);
    }

    #[test]
    fn test_pull_brings_taps_to_common_rate() {
        let taps: Vec<Box<dyn AudioTap>> = vec![
            Box::new(Tone {
                rate: 48_000,
                chunks: vec![vec![0.1; 480]],
            }),
            Box::new(Tone {
                rate: 16_000,
                chunks: vec![vec![0.1; 160]],
            }),
        ];
        let mut source = MixedAudioSource::new(taps, MIX_SAMPLE_RATE);
        let first = source.pull();
        assert_eq!(first.len(), 480);
        assert!((first[0] - 0.2).abs() < 1e-6);

        assert!(source.pull().is_empty());
    }
}
