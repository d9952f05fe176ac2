// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the color packet processor

mod common;

use common::{
    ColorCounters, DECODES_AS_JPEG, DECODES_AS_NOTHING, DECODES_AS_PRORES, Deliveries,
    FakeColorAccelerator,
};
use kinect_pipeline::constants::{COLOR_HEIGHT, COLOR_WIDTH};
use kinect_pipeline::media::decoders::ColorCodec;
use kinect_pipeline::processors::CodecState;
use kinect_pipeline::{
    ColorConfig, ColorPacket, ColorPacketProcessor, Frame, FrameAccess, FrameFormat, FrameType,
    PipelineError,
};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

fn cpu_config() -> ColorConfig {
    ColorConfig {
        prefer_texture_cache: false,
        ..ColorConfig::default()
    }
}

fn processor(accelerator: FakeColorAccelerator, config: &ColorConfig) -> ColorPacketProcessor {
    ColorPacketProcessor::new(Box::new(accelerator), config)
}

fn packet(sequence: u32, marker: u8) -> ColorPacket {
    ColorPacket::new(sequence, sequence + 100, vec![marker, 0xd8, 0xff]).with_exposure(
        16.0, 1.5, 2.2,
    )
}

#[test]
fn test_primary_decode_delivers_one_frame() {
    let counters = ColorCounters::default();
    let mut processor = processor(FakeColorAccelerator::new(&counters), &cpu_config());
    assert!(processor.is_available());
    assert_eq!(processor.session_codec(), Some(ColorCodec::Jpeg));

    let kept = Arc::new(Mutex::new(Vec::<Frame>::new()));
    let deliveries = Deliveries::default();
    processor.set_frame_listener(deliveries.listener(true, Arc::clone(&kept)));

    processor.process(&packet(3, DECODES_AS_JPEG)).unwrap();

    assert_eq!(deliveries.kinds(), vec![FrameType::Color]);
    assert_eq!(counters.attempts(), vec![ColorCodec::Jpeg]);
    assert_eq!(processor.codec_state(), CodecState::Primary);

    let kept = kept.lock().unwrap();
    let frame = &kept[0];
    assert_eq!(frame.width(), COLOR_WIDTH);
    assert_eq!(frame.height(), COLOR_HEIGHT);
    assert_eq!(frame.bytes_per_pixel(), 4);
    assert_eq!(frame.format, FrameFormat::Bgrx);
    assert_eq!(frame.access(), FrameAccess::CpuLocked);
    assert_eq!(frame.data().map(<[u8]>::len), Some(frame.byte_len()));
    assert_eq!(frame.sequence, 3);
    assert_eq!(frame.timestamp, 103);

    let exposure = frame.exposure.unwrap();
    assert_eq!(exposure.exposure, 16.0);
    assert_eq!(exposure.gain, 1.5);
    assert_eq!(exposure.gamma, 2.2);
}

#[test]
fn test_fallback_to_secondary_is_sticky() {
    let counters = ColorCounters::default();
    let mut processor = processor(FakeColorAccelerator::new(&counters), &cpu_config());
    let deliveries = Deliveries::default();
    processor.set_frame_listener(deliveries.listener(false, Arc::default()));

    processor.process(&packet(0, DECODES_AS_PRORES)).unwrap();
    assert_eq!(
        counters.attempts(),
        vec![ColorCodec::Jpeg, ColorCodec::ProRes422]
    );
    assert_eq!(processor.codec_state(), CodecState::Secondary);
    assert_eq!(processor.session_codec(), Some(ColorCodec::ProRes422));
    assert_eq!(deliveries.len(), 1);

    processor.process(&packet(1, DECODES_AS_PRORES)).unwrap();
    assert_eq!(
        counters.attempts(),
        vec![
            ColorCodec::Jpeg,
            ColorCodec::ProRes422,
            ColorCodec::ProRes422
        ]
    );
    assert_eq!(deliveries.len(), 2);
}

#[test]
fn test_total_failure_emits_nothing_and_resets_codec() {
    let counters = ColorCounters::default();
    let mut processor = processor(FakeColorAccelerator::new(&counters), &cpu_config());
    let deliveries = Deliveries::default();
    processor.set_frame_listener(deliveries.listener(false, Arc::default()));

    let err = processor
        .process(&packet(0, DECODES_AS_NOTHING))
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::DecodeFailure {
            codec: ColorCodec::ProRes422,
            ..
        }
    ));
    assert_eq!(deliveries.len(), 0);
    assert_eq!(
        counters.attempts(),
        vec![ColorCodec::Jpeg, ColorCodec::ProRes422]
    );
    assert_eq!(processor.codec_state(), CodecState::Primary);
    assert_eq!(processor.session_codec(), None);
    assert_eq!(counters.sessions.live(), 0);

    // The next packet starts from JPEG again
    processor.process(&packet(1, DECODES_AS_JPEG)).unwrap();
    assert_eq!(counters.attempts().last(), Some(&ColorCodec::Jpeg));
    assert_eq!(deliveries.len(), 1);
}

#[test]
fn test_secondary_failure_does_not_fall_back_again() {
    let counters = ColorCounters::default();
    let mut processor = processor(FakeColorAccelerator::new(&counters), &cpu_config());
    let deliveries = Deliveries::default();
    processor.set_frame_listener(deliveries.listener(false, Arc::default()));

    processor.process(&packet(0, DECODES_AS_PRORES)).unwrap();
    let before = counters.attempts().len();

    // Sticky ProRes fails on a JPEG payload; no second retry in this call
    assert!(processor.process(&packet(1, DECODES_AS_JPEG)).is_err());
    assert_eq!(counters.attempts().len(), before + 1);
    assert_eq!(processor.codec_state(), CodecState::Primary);

    processor.process(&packet(2, DECODES_AS_JPEG)).unwrap();
    assert_eq!(deliveries.len(), 2);
}

#[test]
fn test_secondary_setup_failure_reports_decode_failure() {
    let counters = ColorCounters::default();
    let mut accelerator = FakeColorAccelerator::new(&counters);
    accelerator.broken_codec = Some(ColorCodec::ProRes422);
    let mut processor = processor(accelerator, &cpu_config());
    let deliveries = Deliveries::default();
    processor.set_frame_listener(deliveries.listener(false, Arc::default()));

    let err = processor
        .process(&packet(0, DECODES_AS_PRORES))
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::DecodeFailure {
            codec: ColorCodec::ProRes422,
            ..
        }
    ));
    assert_eq!(deliveries.len(), 0);
    assert_eq!(processor.codec_state(), CodecState::Primary);
    assert!(processor.is_available());
}

#[test]
fn test_primary_setup_failure_is_retried() {
    let counters = ColorCounters::default();
    let mut accelerator = FakeColorAccelerator::new(&counters);
    accelerator.broken_codec = Some(ColorCodec::Jpeg);
    let mut processor = processor(accelerator, &cpu_config());
    assert!(processor.is_available());
    assert_eq!(processor.session_codec(), None);

    let deliveries = Deliveries::default();
    processor.set_frame_listener(deliveries.listener(false, Arc::default()));

    processor.process(&packet(0, DECODES_AS_PRORES)).unwrap();
    assert_eq!(counters.attempts(), vec![ColorCodec::ProRes422]);
    assert_eq!(deliveries.len(), 1);
}

#[test]
fn test_texture_cache_frames_are_gpu_backed() {
    let counters = ColorCounters::default();
    let mut accelerator = FakeColorAccelerator::new(&counters);
    accelerator.with_texture_cache = true;
    let mut processor = processor(accelerator, &ColorConfig::default());
    assert!(processor.has_texture_cache());

    let kept = Arc::new(Mutex::new(Vec::<Frame>::new()));
    processor.set_frame_listener(Deliveries::default().listener(true, Arc::clone(&kept)));
    processor.process(&packet(0, DECODES_AS_JPEG)).unwrap();

    {
        let kept = kept.lock().unwrap();
        assert_eq!(kept[0].access(), FrameAccess::GpuTexture);
        assert!(kept[0].data().is_none());
    }
    assert_eq!(counters.textures.live(), 1);
    assert_eq!(counters.locks.live(), 0);

    kept.lock().unwrap().clear();
    assert_eq!(counters.textures.live(), 0);
    assert_eq!(counters.buffers.live(), 0);
}

#[test]
fn test_missing_texture_cache_falls_back_to_cpu() {
    let counters = ColorCounters::default();
    let mut processor = processor(FakeColorAccelerator::new(&counters), &ColorConfig::default());
    assert!(!processor.has_texture_cache());

    let kept = Arc::new(Mutex::new(Vec::<Frame>::new()));
    processor.set_frame_listener(Deliveries::default().listener(true, Arc::clone(&kept)));
    processor.process(&packet(0, DECODES_AS_JPEG)).unwrap();

    assert_eq!(kept.lock().unwrap()[0].access(), FrameAccess::CpuLocked);
    assert_eq!(counters.locks.live(), 1);
}

#[test]
fn test_declined_frame_is_released_immediately() {
    let counters = ColorCounters::default();
    let mut processor = processor(FakeColorAccelerator::new(&counters), &cpu_config());
    let deliveries = Deliveries::default();
    processor.set_frame_listener(deliveries.listener(false, Arc::default()));

    processor.process(&packet(0, DECODES_AS_JPEG)).unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(counters.buffers.live(), 0);
    assert_eq!(counters.locks.live(), 0);
}

#[test]
fn test_no_listener_skips_decoding() {
    let counters = ColorCounters::default();
    let mut processor = processor(FakeColorAccelerator::new(&counters), &cpu_config());

    assert_eq!(processor.process(&packet(0, DECODES_AS_JPEG)), Ok(()));
    assert!(counters.attempts().is_empty());
}

#[test]
fn test_every_handle_released_once() {
    let counters = ColorCounters::default();
    let kept = Arc::new(Mutex::new(Vec::<Frame>::new()));
    {
        let mut accelerator = FakeColorAccelerator::new(&counters);
        accelerator.with_texture_cache = true;
        let mut processor = processor(accelerator, &ColorConfig::default());
        processor.set_frame_listener(Deliveries::default().listener(true, Arc::clone(&kept)));

        let markers = [
            DECODES_AS_JPEG,
            DECODES_AS_PRORES,
            DECODES_AS_NOTHING,
            DECODES_AS_JPEG,
            DECODES_AS_PRORES,
        ];
        for (sequence, marker) in markers.into_iter().enumerate() {
            let _ = processor.process(&packet(sequence as u32, marker));
        }
        assert_eq!(counters.sessions.live(), 1);
        assert_eq!(counters.caches.live(), 1);
    }

    // Frames handed to the listener outlive the processor
    assert_eq!(kept.lock().unwrap().len(), 4);
    assert_eq!(counters.sessions.live(), 0);
    assert_eq!(counters.caches.live(), 0);

    kept.lock().unwrap().clear();
    assert!(counters.all_released());
    assert_eq!(counters.buffers.acquired(), 4);
    assert_eq!(counters.textures.acquired(), 4);
    assert!(counters.sessions.acquired() >= 3);
}

#[test]
fn test_failed_lock_drops_frame_and_releases_buffer() {
    let counters = ColorCounters::default();
    let mut processor = processor(FakeColorAccelerator::new(&counters), &cpu_config());
    let deliveries = Deliveries::default();
    processor.set_frame_listener(deliveries.listener(false, Arc::default()));

    counters.fail_lock.store(true, Ordering::SeqCst);
    assert!(matches!(
        processor.process(&packet(0, DECODES_AS_JPEG)),
        Err(PipelineError::ResourceCreation(_))
    ));
    assert_eq!(deliveries.len(), 0);
    assert_eq!(counters.buffers.acquired(), 1);
    assert_eq!(counters.buffers.released(), 1);
    assert_eq!(counters.locks.acquired(), 0);
    // The decode itself worked, so the codec choice stands
    assert_eq!(processor.codec_state(), CodecState::Primary);
    assert_eq!(processor.session_codec(), Some(ColorCodec::Jpeg));

    counters.fail_lock.store(false, Ordering::SeqCst);
    processor.process(&packet(1, DECODES_AS_JPEG)).unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(counters.buffers.live(), 0);
    assert_eq!(counters.locks.live(), 0);
}
