//! Conversion of raw ADS1298 frames into physical values.

use exg_types::{frame_len, DecodedSample, FrameError, StatusWord};

/// Reference voltage used for scaling, in volts
pub const REFERENCE_VOLTAGE: f64 = 5.0;

/// Channel gain; every channel runs at 12x and this is not configurable
pub const GAIN: f64 = 12.0;

/// Volts per LSB: (VREF / gain) / 2^24
pub const SCALE_TO_VOLTS: f64 = (REFERENCE_VOLTAGE / GAIN) / (1u32 << 24) as f64;

/// Bits 23..20 of a valid status word
pub const STATUS_SYNC_PATTERN: u32 = 0b1100;

/// Convert 24-bit big-endian two's-complement data to a sign-extended i32.
pub fn decode_signed_24(bytes: &[u8]) -> Result<i32, FrameError> {
    match bytes {
        [msb, mid, lsb] => Ok(ch_sample_to_raw(*msb, *mid, *lsb)),
        _ => Err(FrameError::InvalidLength { expected: 3, actual: bytes.len() }),
    }
}

fn ch_sample_to_raw(msb: u8, mid: u8, lsb: u8) -> i32 {
    let raw_value = ((msb as u32) << 16) | ((mid as u32) << 8) | (lsb as u32);
    ((raw_value as i32) << 8) >> 8
}

/// Scale a raw ADC code to volts.
pub fn to_physical(raw: i32) -> f64 {
    raw as f64 * SCALE_TO_VOLTS
}

/// Split the status word into its sync sentinel and lead-off flags.
pub fn decode_status_word(status_word: u32) -> StatusWord {
    let status_word = status_word & 0xFF_FFFF;
    StatusWord {
        in_sync: status_word >> 20 == STATUS_SYNC_PATTERN,
        lead_off_positive: ((status_word >> 12) & 0xFF) as u8,
        lead_off_negative: ((status_word >> 4) & 0xFF) as u8,
    }
}

/// Decode one frame: a 3-byte status word followed by one 3-byte sample per channel.
pub fn decode_frame(bytes: &[u8], channel_count: usize) -> Result<DecodedSample, FrameError> {
    let expected = frame_len(channel_count);
    if bytes.len() != expected {
        return Err(FrameError::InvalidLength { expected, actual: bytes.len() });
    }

    let status_word = ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32;
    let status = decode_status_word(status_word);
    if !status.in_sync {
        return Err(FrameError::OutOfSync { status_word });
    }

    let channel_values = bytes[3..]
        .chunks_exact(3)
        .map(|group| to_physical(ch_sample_to_raw(group[0], group[1], group[2])))
        .collect();

    Ok(DecodedSample {
        lead_off_positive: status.lead_off_positive,
        lead_off_negative: status.lead_off_negative,
        channel_values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_reference_values() {
        assert_eq!(decode_signed_24(&[0x00, 0x00, 0x01]), Ok(1));
        assert_eq!(decode_signed_24(&[0xFF, 0xFF, 0xFF]), Ok(-1));
        assert_eq!(decode_signed_24(&[0x7F, 0xFF, 0xFF]), Ok((1 << 23) - 1));
        assert_eq!(decode_signed_24(&[0x80, 0x00, 0x00]), Ok(-(1 << 23)));
    }

    #[test]
    fn rejects_wrong_byte_count() {
        assert_eq!(
            decode_signed_24(&[0x00, 0x01]),
            Err(FrameError::InvalidLength { expected: 3, actual: 2 })
        );
        assert!(decode_signed_24(&[0, 0, 0, 0]).is_err());
    }

    #[test]
    fn status_word_sentinel() {
        let status = decode_status_word(0xC0_0000);
        assert!(status.in_sync);
        assert_eq!(status.lead_off_positive, 0);
        assert_eq!(status.lead_off_negative, 0);

        assert!(!decode_status_word(0x00_0000).in_sync);
        assert!(!decode_status_word(0xD0_0000).in_sync);
    }

    #[test]
    fn status_word_lead_off_bits() {
        // LOFF_STATP in bits 19..12, LOFF_STATN in bits 11..4
        let status = decode_status_word(0xCA_5C30);
        assert!(status.in_sync);
        assert_eq!(status.lead_off_positive, 0xA5);
        assert_eq!(status.lead_off_negative, 0xC3);
    }

    #[test]
    fn frame_channels_keep_input_order() {
        let frame = [
            0xC0, 0x00, 0x00, // status
            0x00, 0x00, 0x01, // ch1 = 1
            0xFF, 0xFF, 0xFF, // ch2 = -1
            0x00, 0x00, 0x02, // ch3 = 2
        ];
        let sample = decode_frame(&frame, 3).unwrap();
        assert_eq!(sample.channel_count(), 3);
        assert_eq!(sample.channel_values, vec![to_physical(1), to_physical(-1), to_physical(2)]);
    }

    #[test]
    fn frame_out_of_sync_is_an_error() {
        let frame = [0u8; 9];
        assert_eq!(decode_frame(&frame, 2), Err(FrameError::OutOfSync { status_word: 0 }));
    }

    #[test]
    fn scale_matches_gain_twelve_with_five_volt_reference() {
        let full_scale = to_physical(1 << 23);
        assert!((full_scale - 5.0 / 12.0 / 2.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn sign_follows_msb(b0 in any::<u8>(), b1 in any::<u8>(), b2 in any::<u8>()) {
            let value = decode_signed_24(&[b0, b1, b2]).unwrap();
            if b0 & 0x80 == 0 {
                prop_assert!((0..=(1 << 23) - 1).contains(&value));
            } else {
                prop_assert!((-(1 << 23)..=-1).contains(&value));
            }
        }

        #[test]
        fn to_physical_is_linear(x in -(1i32 << 22)..(1i32 << 22)) {
            let doubled = to_physical(2 * x);
            let twice = 2.0 * to_physical(x);
            prop_assert!((doubled - twice).abs() <= 1e-12);
        }

        #[test]
        fn wrong_frame_length_always_fails(channels in 1usize..=8, len in 0usize..40) {
            prop_assume!(len != 3 + 3 * channels);
            let frame = vec![0xC0u8; len];
            let is_invalid_length = matches!(
                decode_frame(&frame, channels),
                Err(FrameError::InvalidLength { .. })
            );
            prop_assert!(is_invalid_length);
        }
    }
}
