#[cfg(test)]
mod proptest_codec {
    use crate::codec::tests::{reply, ScriptedChannel};
    use crate::codec::*;
    use crate::error::{ProtocolViolation, ScaleError};
    use crate::reading::WeightReading;
    use proptest::prelude::*;

    fn decode(frame: &[u8]) -> Result<WeightReading, ScaleError> {
        let mut channel = ScriptedChannel::replying(&reply(frame));
        exchange(&mut channel, FrameLimits::default())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(2000))]

        // Property: hundredths that fit the six character field decode exactly
        #[test]
        fn fractional_weights_decode(
            hundredths in -9_999i64..=99_999,
            unstable in any::<bool>(),
        ) {
            let weight = hundredths as f64 / 100.0;
            let frame = encode_frame(WeightReading { weight, unstable }).unwrap();
            let reading = decode(&frame).unwrap();
            prop_assert!((reading.weight - weight).abs() < 1e-9, "{} != {}", reading.weight, weight);
            prop_assert_eq!(reading.unstable, unstable);
        }

        // Property: one-decimal negatives down to -999.9 fill the field and decode
        #[test]
        fn negative_tenths_decode(
            tenths in -9_999i64..=-1_000,
            unstable in any::<bool>(),
        ) {
            let weight = tenths as f64 / 10.0;
            let field = format!("{:>6.1}", weight);
            prop_assert_eq!(field.len(), 6);

            let mut frame = vec![STX, if unstable { UNSTABLE } else { STABLE }, b'-'];
            frame.extend_from_slice(field.as_bytes());
            frame.extend_from_slice(b"kg");
            frame.push(ETX);

            let reading = decode(&frame).unwrap();
            prop_assert!((reading.weight - weight).abs() < 1e-9, "{} != {}", reading.weight, weight);
            prop_assert_eq!(reading.unstable, unstable);
        }

        // Property: whole weights up to the display limit decode exactly
        #[test]
        fn whole_weights_decode(
            weight in -99_999i64..=999_999,
            unstable in any::<bool>(),
        ) {
            let weight = weight as f64;
            let frame = encode_frame(WeightReading { weight, unstable }).unwrap();
            let reading = decode(&frame).unwrap();
            prop_assert_eq!(reading.weight, weight);
            prop_assert_eq!(reading.unstable, unstable);
        }

        // Property: any acknowledge other than ACK ends the exchange after one read
        #[test]
        fn wrong_acknowledge_rejected(ack in any::<u8>().prop_filter("not ACK", |b| *b != ACK)) {
            let mut channel = ScriptedChannel::replying(&[ack, STX, STABLE, b' ', b'1', ETX]);
            let result = exchange(&mut channel, FrameLimits::default());
            prop_assert_eq!(
                result,
                Err(ScaleError::Protocol(ProtocolViolation::UnexpectedAcknowledge { received: ack }))
            );
            prop_assert_eq!(channel.reads, 1);
            prop_assert_eq!(channel.written, vec![ENQ]);
        }

        // Property: noise without STX never scans past the preamble budget
        #[test]
        fn preamble_scan_is_bounded(
            noise in proptest::collection::vec(any::<u8>().prop_filter("not STX", |b| *b != STX), 25..200),
        ) {
            let mut channel = ScriptedChannel::replying(&reply(&noise));
            let result = exchange(&mut channel, FrameLimits::default());
            prop_assert_eq!(
                result,
                Err(ScaleError::Protocol(ProtocolViolation::FrameStartNotFound { scanned: 25 }))
            );
            prop_assert_eq!(channel.reads, 26);
        }
    }
}
