//! End-to-end packet scenarios against the public API.

use lhe_codec::{
    DownsampleMode, EncoderConfig, EncoderFlags, Error, LheDecoder, LheEncoder, PixelFormat,
    ProtectedRectangle, YuvFrame,
};

fn textured_frame(width: usize, height: usize, pixel_format: PixelFormat) -> YuvFrame {
    let mut frame = YuvFrame::new(width, height, pixel_format);
    for plane in 0..3 {
        let (plane_w, plane_h) = frame.plane_dimensions(plane);
        let samples = frame.plane_mut(plane);
        for y in 0..plane_h {
            for x in 0..plane_w {
                let value = 30 + 11 * x + 5 * y + ((x / 3 + y / 5) % 7) * 17 + plane * 40;
                samples[y * plane_w + x] = (value % 255) as u8 + 1;
            }
        }
    }
    frame
}

#[test]
fn constant_basic_frame_roundtrips_exactly() {
    let mut config = EncoderConfig::new(8, 8, PixelFormat::Yuv420);
    config.flags = EncoderFlags::FORCE_BASIC;
    config.quality_level = 25;
    let mut encoder = LheEncoder::new(config).unwrap();

    let mut frame = YuvFrame::new(8, 8, PixelFormat::Yuv420);
    frame.fill(128, 128);

    let packet = encoder.encode_frame(&frame).unwrap().unwrap();
    let decoded = LheDecoder::new().decode_frame(&packet).unwrap();
    assert_eq!(decoded, frame);
}

#[test]
fn basic_reconstructions_match_bit_exactly() {
    let mut config = EncoderConfig::new(48, 32, PixelFormat::Yuv422);
    config.flags = EncoderFlags::FORCE_BASIC;
    let mut encoder = LheEncoder::new(config).unwrap();
    let frame = textured_frame(48, 32, PixelFormat::Yuv422);

    let packet = encoder.encode_frame(&frame).unwrap().unwrap();
    let decoded = LheDecoder::new().decode_frame(&packet).unwrap();

    for plane in 0..3 {
        assert_eq!(
            decoded.plane(plane),
            encoder.reconstruction(plane),
            "plane {plane} must match the encoder model"
        );
    }
}

#[test]
fn basic_checkerboard_roundtrips_to_the_encoder_model() {
    let mut config = EncoderConfig::new(8, 8, PixelFormat::Yuv444);
    config.flags = EncoderFlags::FORCE_BASIC;
    config.quality_level = 99;
    let mut encoder = LheEncoder::new(config).unwrap();

    let mut frame = YuvFrame::new(8, 8, PixelFormat::Yuv444);
    for plane in 0..3 {
        let samples = frame.plane_mut(plane);
        for y in 0..8 {
            for x in 0..8 {
                samples[y * 8 + x] = if (x + y) % 2 == 0 { 255 } else { 0 };
            }
        }
    }

    let packet = encoder.encode_frame(&frame).unwrap().unwrap();
    let decoded = LheDecoder::new().decode_frame(&packet).unwrap();
    for plane in 0..3 {
        assert_eq!(decoded.plane(plane), encoder.reconstruction(plane));
    }
}

#[test]
fn advanced_references_match_bit_exactly() {
    for down_mode in [
        DownsampleMode::Sps,
        DownsampleMode::Avg,
        DownsampleMode::SpsTwoPass,
        DownsampleMode::AvgSps,
    ] {
        for ql in [0u8, 50, 99] {
            let mut config = EncoderConfig::new(64, 64, PixelFormat::Yuv420);
            config.quality_level = ql;
            config.down_mode = down_mode;
            let mut encoder = LheEncoder::new(config).unwrap();
            let frame = textured_frame(64, 64, PixelFormat::Yuv420);

            let packet = encoder.encode_frame(&frame).unwrap().unwrap();
            let mut decoder = LheDecoder::new();
            let decoded = decoder.decode_frame(&packet).unwrap();
            assert_eq!(decoded.width(), 64);
            assert_eq!(decoded.height(), 64);

            for plane in 0..3 {
                assert_eq!(
                    decoder.reference(plane).unwrap(),
                    encoder.reference(plane),
                    "down mode {down_mode:?}, ql {ql}, plane {plane}"
                );
            }
        }
    }
}

#[test]
fn static_video_decodes_to_identical_frames() {
    let mut config = EncoderConfig::new(16, 16, PixelFormat::Yuv444);
    config.block_gop = 30;
    let mut encoder = LheEncoder::new(config).unwrap();
    // Flat content is coded exactly by the intra frame, so the delta
    // frame carries no residual at all and reproduces it bit for bit.
    let mut frame = YuvFrame::new(16, 16, PixelFormat::Yuv444);
    frame.fill(100, 140);

    let intra = encoder.encode_frame(&frame).unwrap().unwrap();
    let delta = encoder.encode_frame(&frame).unwrap().unwrap();

    let mut decoder = LheDecoder::new();
    let first = decoder.decode_frame(&intra).unwrap();
    let second = decoder.decode_frame(&delta).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, frame);

    for plane in 0..3 {
        assert_eq!(decoder.reference(plane).unwrap(), encoder.reference(plane));
    }
}

#[test]
fn static_textured_video_stays_in_lockstep() {
    let mut config = EncoderConfig::new(16, 16, PixelFormat::Yuv444);
    config.block_gop = 30;
    let mut encoder = LheEncoder::new(config).unwrap();
    let frame = textured_frame(16, 16, PixelFormat::Yuv444);

    let intra = encoder.encode_frame(&frame).unwrap().unwrap();
    let delta = encoder.encode_frame(&frame).unwrap().unwrap();

    let mut decoder = LheDecoder::new();
    decoder.decode_frame(&intra).unwrap();
    decoder.decode_frame(&delta).unwrap();
    for plane in 0..3 {
        assert_eq!(decoder.reference(plane).unwrap(), encoder.reference(plane));
    }
}

#[test]
fn moving_video_stays_in_lockstep() {
    let mut config = EncoderConfig::new(32, 32, PixelFormat::Yuv420);
    config.block_gop = 4;
    let mut encoder = LheEncoder::new(config).unwrap();
    let mut decoder = LheDecoder::new();

    for step in 0..10usize {
        let mut frame = YuvFrame::new(32, 32, PixelFormat::Yuv420);
        for plane in 0..3 {
            let (plane_w, plane_h) = frame.plane_dimensions(plane);
            let samples = frame.plane_mut(plane);
            for y in 0..plane_h {
                for x in 0..plane_w {
                    let value = 20 + ((x + step * 3) % plane_w) * 7 + y * 3;
                    samples[y * plane_w + x] = (value % 255) as u8 + 1;
                }
            }
        }
        let packet = encoder.encode_frame(&frame).unwrap().unwrap();
        decoder.decode_frame(&packet).unwrap();
        for plane in 0..3 {
            assert_eq!(
                decoder.reference(plane).unwrap(),
                encoder.reference(plane),
                "frame {step}, plane {plane}"
            );
        }
    }
}

#[test]
fn protected_rectangle_pins_the_transmitted_mesh() {
    let mut config = EncoderConfig::new(64, 64, PixelFormat::Yuv444);
    config.flags = EncoderFlags::PR_METRICS;
    config.rectangles.push(ProtectedRectangle {
        x_ini: 16,
        x_fin: 32,
        y_ini: 16,
        y_fin: 32,
        protection: true,
        active: true,
    });
    config.rectangles_ttl = 0;
    let mut encoder = LheEncoder::new(config).unwrap();

    let mut frame = YuvFrame::new(64, 64, PixelFormat::Yuv444);
    frame.fill(128, 128);
    let packet = encoder.encode_frame(&frame).unwrap().unwrap();

    let mesh = encoder.pr_metrics().expect("metrics were requested");
    // 64x64 tiles into 8x8 blocks; nodes 2..=4 sit on the rectangle.
    for node in 2..=4 {
        assert_eq!(mesh.x_index(node, node), 4);
        assert_eq!(mesh.y_index(node, node), 4);
    }
    assert_eq!(mesh.x_index(0, 0), 0);

    // A fully protected region is coded without downsampling, so the
    // decoded flat interior is exact.
    let decoded = LheDecoder::new().decode_frame(&packet).unwrap();
    for y in 20..28 {
        for x in 20..28 {
            assert_eq!(decoded.plane(0)[y * 64 + x], 128);
        }
    }
}

#[test]
fn delta_without_reference_is_rejected() {
    let mut config = EncoderConfig::new(16, 16, PixelFormat::Yuv444);
    config.block_gop = 8;
    let mut encoder = LheEncoder::new(config).unwrap();
    let frame = textured_frame(16, 16, PixelFormat::Yuv444);
    let _intra = encoder.encode_frame(&frame).unwrap().unwrap();
    let delta = encoder.encode_frame(&frame).unwrap().unwrap();

    let mut decoder = LheDecoder::new();
    assert_eq!(
        decoder.decode_frame(&delta),
        Err(Error::DeltaWithoutReference)
    );
}

#[test]
fn corrupted_intra_poisons_following_deltas() {
    let mut config = EncoderConfig::new(16, 16, PixelFormat::Yuv444);
    config.block_gop = 8;
    let mut encoder = LheEncoder::new(config).unwrap();
    let frame = textured_frame(16, 16, PixelFormat::Yuv444);
    let intra = encoder.encode_frame(&frame).unwrap().unwrap();
    let delta = encoder.encode_frame(&frame).unwrap().unwrap();

    let mut decoder = LheDecoder::new();
    decoder.decode_frame(&intra).unwrap();

    // A truncated second intra fails, which must invalidate the
    // reference for the delta that follows.
    let failed = decoder.decode_frame(&intra[..8]);
    assert!(failed.is_err());
    assert_eq!(
        decoder.decode_frame(&delta),
        Err(Error::DeltaWithoutReference)
    );

    // A fresh intra restores the stream.
    decoder.decode_frame(&intra).unwrap();
}

#[test]
fn truncated_large_header_fails_before_decoding() {
    let mut config = EncoderConfig::new(1024, 1024, PixelFormat::Yuv420);
    config.flags = EncoderFlags::FORCE_BASIC;
    let mut encoder = LheEncoder::new(config).unwrap();
    let mut frame = YuvFrame::new(1024, 1024, PixelFormat::Yuv420);
    frame.fill(77, 77);
    let packet = encoder.encode_frame(&frame).unwrap().unwrap();

    let mut decoder = LheDecoder::new();
    assert_eq!(
        decoder.decode_frame(&packet[..100]),
        Err(Error::Truncated)
    );
}

#[test]
fn packets_decode_as_an_independent_sequence() {
    let mut config = EncoderConfig::new(16, 16, PixelFormat::Yuv444);
    config.block_gop = 8;
    let mut encoder = LheEncoder::new(config).unwrap();
    let mut frame = YuvFrame::new(16, 16, PixelFormat::Yuv444);
    frame.fill(64, 96);

    // Every packet is byte-aligned, so a file is a plain
    // concatenation; packet lengths come from the container layer.
    let first = encoder.encode_frame(&frame).unwrap().unwrap();
    let second = encoder.encode_frame(&frame).unwrap().unwrap();
    assert!(!first.is_empty() && !second.is_empty());

    let mut decoder = LheDecoder::new();
    let a = decoder.decode_frame(&first).unwrap();
    let b = decoder.decode_frame(&second).unwrap();
    assert_eq!(a, b);
}
