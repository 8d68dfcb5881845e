//! PCM gain processing and the capture-device gain policy

use crate::audio::format::AudioFormat;
use crate::config::EngineConfig;

/// Multiply every little-endian i16 sample in `buf` by `gain`, truncating
/// to integer and clamping to the signed 16-bit range, in place. A trailing
/// odd byte is left untouched.
///
/// Callers skip the call entirely when `gain == 1.0`.
pub fn apply_gain(buf: &mut [u8], gain: f32) {
    for chunk in buf.chunks_exact_mut(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        let boosted = (sample as f32 * gain) as i32;
        let clamped = boosted.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        chunk.copy_from_slice(&clamped.to_le_bytes());
    }
}

/// Channel/gain policy for a capture device.
///
/// Microphone-named devices are typically much quieter than loopback
/// sources, so they get forced mono capture and a 2x boost. Everything else
/// keeps the caller's channel count at unity gain. Re-evaluated on every
/// source switch.
pub fn capture_policy(config: &EngineConfig, device_name: &str, format: AudioFormat) -> (AudioFormat, f32) {
    if config.is_microphone_name(device_name) {
        (format.with_channels(1), 2.0)
    } else {
        (format, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn samples_of(buf: &[u8]) -> Vec<i16> {
        buf.chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    fn buf_of(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn unity_gain_is_identity() {
        let original = buf_of(&[0, 1, -1, 1000, -32768, 32767]);
        let mut buf = original.clone();
        apply_gain(&mut buf, 1.0);
        assert_eq!(buf, original);
    }

    #[test]
    fn doubling_clamps_at_range_edges() {
        let mut buf = buf_of(&[100, -100, 20_000, -20_000, 32_767, -32_768]);
        apply_gain(&mut buf, 2.0);
        assert_eq!(samples_of(&buf), vec![200, -200, 32_767, -32_768, 32_767, -32_768]);
    }

    #[test]
    fn fractional_gain_truncates() {
        let mut buf = buf_of(&[3, -3]);
        apply_gain(&mut buf, 0.5);
        // (3 * 0.5) as i32 == 1, (-3 * 0.5) as i32 == -1
        assert_eq!(samples_of(&buf), vec![1, -1]);
    }

    #[test]
    fn trailing_odd_byte_untouched() {
        let mut buf = vec![0x10, 0x27, 0x42];
        apply_gain(&mut buf, 2.0);
        assert_eq!(buf[2], 0x42);
    }

    #[test]
    fn microphone_device_forces_mono_boost() {
        let cfg = EngineConfig::default();
        let stereo = AudioFormat::default();
        let (fmt, gain) = capture_policy(&cfg, "Microphone (Realtek)", stereo);
        assert_eq!(fmt.channels, 1);
        assert_eq!(gain, 2.0);
    }

    #[test]
    fn loopback_device_keeps_caller_settings() {
        let cfg = EngineConfig::default();
        let stereo = AudioFormat::default();
        let (fmt, gain) = capture_policy(&cfg, "Stereo Mix", stereo);
        assert_eq!(fmt.channels, 2);
        assert_eq!(gain, 1.0);
    }

    proptest! {
        #[test]
        fn output_always_in_i16_range(samples in proptest::collection::vec(any::<i16>(), 0..256), gain in -8.0f32..8.0) {
            let mut buf = buf_of(&samples);
            apply_gain(&mut buf, gain);
            // Decoding back can never overflow i16 by construction; verify
            // the clamp by recomputing expected values.
            for (out, sample) in samples_of(&buf).iter().zip(samples.iter()) {
                let expected = ((*sample as f32 * gain) as i32).clamp(-32768, 32767) as i16;
                prop_assert_eq!(*out, expected);
            }
        }
    }
}
