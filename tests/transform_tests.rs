// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the single-slot pass-through transform

use frame_provider::backends::camera::types::{FormatDescriptor, FrameData, Ratio};
use frame_provider::backends::camera::{AcquisitionLoop, DeviceSession, FormatSelector};
use frame_provider::backends::virtual_camera::{SimulatedDevice, SimulatedProvider};
use frame_provider::media::VideoSubtype;
use frame_provider::pipelines::{
    FixedIllumination, InputStatus, MediaTransform, OutputStatus, PassThroughTransform, Sample,
    TransformMessage, TransformState, illumination_source,
};
use frame_provider::{IlluminationMode, ProviderError};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn yuy2() -> FormatDescriptor {
    FormatDescriptor::video(VideoSubtype::Yuy2, 640, 480, Ratio::from_int(30))
}

fn transform(mode: IlluminationMode) -> PassThroughTransform {
    let upstream = vec![
        FormatDescriptor::video(VideoSubtype::Mjpg, 640, 480, Ratio::from_int(30)),
        yuy2(),
    ];
    PassThroughTransform::new(Box::new(upstream), illumination_source(mode))
}

fn sample(tag: u8) -> Sample {
    Sample::single(FrameData::from(vec![tag; 16]), Duration::from_millis(tag as u64))
}

#[test]
fn test_full_cycle() {
    let mut stage = transform(IlluminationMode::Alternating);
    assert_eq!(stage.state(), TransformState::NoTypesSet);
    assert_eq!(stage.submit(0, sample(1)), Err(ProviderError::TypesNotSet));

    stage.set_input_type(0, &yuy2(), false).unwrap();
    assert_eq!(stage.current_output_type(0), Ok(yuy2()));
    assert_eq!(stage.state(), TransformState::Empty);

    stage.submit(0, sample(1)).unwrap();
    assert_eq!(stage.state(), TransformState::Holding);
    assert_eq!(stage.input_status(0), Ok(InputStatus::NotAccepting));
    assert_eq!(stage.output_status(), OutputStatus::SampleReady);
    assert_eq!(stage.submit(0, sample(2)), Err(ProviderError::SlotOccupied));

    let out = stage.produce_output().unwrap();
    assert_eq!(&out.buffers[0][..], &[1u8; 16]);
    assert_eq!(out.timestamp, Duration::from_millis(1));
    assert_eq!(out.illumination_active, Some(true));
    assert_eq!(stage.produce_output().unwrap_err(), ProviderError::NeedsMoreInput);
}

#[test]
fn test_payload_is_not_copied() {
    let mut stage = transform(IlluminationMode::AlwaysOn);
    stage.set_input_type(0, &yuy2(), false).unwrap();

    let data = FrameData::from(vec![9u8; 32]);
    stage
        .submit(0, Sample::single(data.clone(), Duration::ZERO))
        .unwrap();
    let out = stage.produce_output().unwrap();
    assert!(out.buffers[0].ptr_eq(&data));
}

#[test]
fn test_tags_alternate_across_samples() {
    let mut stage = transform(IlluminationMode::Alternating);
    stage.set_input_type(0, &yuy2(), false).unwrap();

    let tags: Vec<Option<bool>> = (0..4)
        .map(|i| {
            stage.submit(0, sample(i)).unwrap();
            stage.produce_output().unwrap().illumination_active
        })
        .collect();
    assert_eq!(tags, vec![Some(true), Some(false), Some(true), Some(false)]);
}

#[test]
fn test_fixed_illumination() {
    let mut stage = PassThroughTransform::new(Box::new(vec![yuy2()]), Box::new(FixedIllumination(false)));
    stage.set_input_type(0, &yuy2(), false).unwrap();
    for i in 0..3 {
        stage.submit(0, sample(i)).unwrap();
        assert_eq!(stage.produce_output().unwrap().illumination_active, Some(false));
    }
}

#[test]
fn test_multi_buffer_sample_rejected() {
    let mut stage = transform(IlluminationMode::AlwaysOn);
    stage.set_input_type(0, &yuy2(), false).unwrap();

    let mut two = sample(1);
    two.buffers.push(FrameData::from(vec![2u8; 4]));
    assert_eq!(stage.submit(0, two), Err(ProviderError::TooManyBuffers));
    assert_eq!(stage.state(), TransformState::Empty);
}

#[test]
fn test_only_allow_listed_types_offered() {
    let mut stage = transform(IlluminationMode::Alternating);
    assert_eq!(stage.available_input_type(0, 0), Ok(yuy2()));
    assert_eq!(
        stage.available_output_type(0, 1),
        Err(ProviderError::NoMoreTypes)
    );
    assert_eq!(
        stage.available_input_type(1, 0),
        Err(ProviderError::InvalidStream)
    );

    let mjpg = FormatDescriptor::video(VideoSubtype::Mjpg, 640, 480, Ratio::from_int(30));
    assert_eq!(
        stage.set_input_type(0, &mjpg, true),
        Err(ProviderError::InvalidMediaType)
    );
}

#[test]
fn test_flush_and_messages() {
    let mut stage = transform(IlluminationMode::Alternating);
    stage.set_input_type(0, &yuy2(), false).unwrap();
    stage.submit(0, sample(1)).unwrap();

    stage.process_message(TransformMessage::Flush).unwrap();
    assert_eq!(stage.output_status(), OutputStatus::Empty);
    assert_eq!(stage.input_status(0), Ok(InputStatus::AcceptData));

    assert!(stage.process_message(TransformMessage::BeginStreaming).is_ok());
    assert!(stage.process_message(TransformMessage::EndOfStream).is_ok());
    assert!(matches!(
        stage.process_message(TransformMessage::SetDeviceManager),
        Err(ProviderError::NotSupported(_))
    ));
}

#[test]
fn test_stream_info_after_negotiation() {
    let mut stage = transform(IlluminationMode::Alternating);
    assert_eq!(stage.output_stream_info(0), Err(ProviderError::TypesNotSet));

    stage.set_output_type(0, &yuy2(), false).unwrap();
    let input = stage.input_stream_info(0).unwrap();
    let output = stage.output_stream_info(0).unwrap();
    assert!(input.whole_samples && input.single_sample_per_buffer);
    assert!(!input.provides_samples);
    assert!(output.fixed_sample_size && output.provides_samples);
    assert_eq!(stage.stream_count(), (1, 1));
}

#[test]
fn test_captured_frame_passes_through_unchanged() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let provider = SimulatedProvider::single(
        SimulatedDevice::new("sim0").with_read_delay(Duration::from_millis(2)),
    );
    let session =
        Arc::new(DeviceSession::open(&provider, "sim0", &FormatSelector::default()).unwrap());
    let format = session.format();
    let acquisition = AcquisitionLoop::builder(session)
        .runtime(rt.handle().clone())
        .build()
        .unwrap();

    acquisition.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    let frame = loop {
        if let Some(frame) = acquisition.current_frame() {
            break frame;
        }
        assert!(Instant::now() < deadline, "no frame captured");
        std::thread::sleep(Duration::from_millis(5));
    };
    acquisition.stop(true).unwrap();

    let mut stage = PassThroughTransform::new(
        Box::new(vec![format]),
        illumination_source(IlluminationMode::Alternating),
    );
    stage.set_input_type(0, &format, false).unwrap();

    let input = Sample::from(frame.clone());
    assert_eq!(input.illumination_active, None);
    stage.submit(0, input).unwrap();
    let out = stage.produce_output().unwrap();

    assert_eq!(out.buffers.len(), 1);
    assert!(out.buffers[0].ptr_eq(&frame.data));
    assert_eq!(out.timestamp, frame.timestamp);
    assert_eq!(out.illumination_active, Some(true));
}
