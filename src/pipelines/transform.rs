// SPDX-License-Identifier: GPL-3.0-only

//! Single-slot pass-through transform
//!
//! Sits downstream of the capture stream and relays one sample at a time,
//! tagging each with the illumination state of the emitter. The stage never
//! touches pixel data.
//!
//! ```text
//!              submit                produce_output
//!  ┌──────────┐  ok   ┌──────────┐  tagged sample  ┌──────────┐
//!  │  Empty   │ ────▶ │ Holding  │ ──────────────▶ │  Empty   │
//!  └──────────┘       └──────────┘                 └──────────┘
//!        ▲                  │ flush
//!        └──────────────────┘
//! ```
//!
//! Before both types are negotiated the stage is in `NoTypesSet` and rejects
//! input. Output and input types are always identical.

use crate::backends::camera::types::{FormatDescriptor, Frame, FrameData};
use crate::constants::IlluminationMode;
use crate::errors::{ProviderError, ProviderResult};
use std::time::Duration;
use tracing::{debug, trace};

/// Unit of work flowing through the stage
#[derive(Debug, Clone)]
pub struct Sample {
    /// Physical buffers; the stage accepts exactly one
    pub buffers: Vec<FrameData>,
    pub timestamp: Duration,
    /// Attribute set by the stage on output
    pub illumination_active: Option<bool>,
}

impl Sample {
    pub fn single(buffer: FrameData, timestamp: Duration) -> Self {
        Self {
            buffers: vec![buffer],
            timestamp,
            illumination_active: None,
        }
    }
}

impl From<Frame> for Sample {
    fn from(frame: Frame) -> Self {
        Self {
            buffers: vec![frame.data],
            timestamp: frame.timestamp,
            illumination_active: frame.tags.illumination_active,
        }
    }
}

/// Where the stage gets its candidate types from
pub trait MediaTypeSource: Send {
    /// Upstream output type at `index` on `stream`; `Err(NoMoreTypes)` past
    /// the end
    fn output_available_type(&self, stream: u32, index: u32) -> ProviderResult<FormatDescriptor>;
}

impl MediaTypeSource for Vec<FormatDescriptor> {
    fn output_available_type(&self, stream: u32, index: u32) -> ProviderResult<FormatDescriptor> {
        if stream != 0 {
            return Err(ProviderError::InvalidStream);
        }
        self.get(index as usize)
            .copied()
            .ok_or(ProviderError::NoMoreTypes)
    }
}

/// Reports whether the illuminator was lit for the sample being emitted
pub trait IlluminationSource: Send {
    fn next_state(&mut self) -> bool;
}

/// Toggles on every call, starting with lit
#[derive(Debug, Default)]
pub struct AlternatingIllumination {
    lit: bool,
}

impl IlluminationSource for AlternatingIllumination {
    fn next_state(&mut self) -> bool {
        self.lit = !self.lit;
        self.lit
    }
}

/// Always reports the same state
#[derive(Debug, Clone, Copy)]
pub struct FixedIllumination(pub bool);

impl IlluminationSource for FixedIllumination {
    fn next_state(&mut self) -> bool {
        self.0
    }
}

/// Build the illumination source for a configured mode
pub fn illumination_source(mode: IlluminationMode) -> Box<dyn IlluminationSource> {
    match mode {
        IlluminationMode::Alternating => Box::new(AlternatingIllumination::default()),
        IlluminationMode::AlwaysOn => Box::new(FixedIllumination(true)),
        IlluminationMode::AlwaysOff => Box::new(FixedIllumination(false)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformState {
    NoTypesSet,
    Empty,
    Holding,
}

/// Minimum and maximum stream counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    pub min_inputs: u32,
    pub max_inputs: u32,
    pub min_outputs: u32,
    pub max_outputs: u32,
}

/// Buffer requirements of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamInfo {
    pub whole_samples: bool,
    pub single_sample_per_buffer: bool,
    pub fixed_sample_size: bool,
    /// Stage allocates its own output samples
    pub provides_samples: bool,
    pub sample_size: u32,
    pub alignment: u32,
    pub max_latency: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStatus {
    AcceptData,
    NotAccepting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    SampleReady,
    Empty,
}

/// Pipeline control messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMessage {
    /// Discard any held sample
    Flush,
    /// Stop accepting input until pending output is consumed
    Drain,
    /// Hand over a GPU device manager
    SetDeviceManager,
    BeginStreaming,
    EndStreaming,
    StartOfStream,
    EndOfStream,
}

/// Single-input, single-output media stage
pub trait MediaTransform: Send {
    // ===== Streams =====

    fn stream_limits(&self) -> StreamLimits;

    /// (inputs, outputs)
    fn stream_count(&self) -> (u32, u32);

    fn input_stream_info(&self, stream: u32) -> ProviderResult<StreamInfo>;

    fn output_stream_info(&self, stream: u32) -> ProviderResult<StreamInfo>;

    // ===== Types =====

    fn available_input_type(&mut self, stream: u32, index: u32)
    -> ProviderResult<FormatDescriptor>;

    fn available_output_type(
        &mut self,
        stream: u32,
        index: u32,
    ) -> ProviderResult<FormatDescriptor>;

    /// Negotiate the input type; with `test_only` only validate it
    fn set_input_type(
        &mut self,
        stream: u32,
        media_type: &FormatDescriptor,
        test_only: bool,
    ) -> ProviderResult<()>;

    /// Negotiate the output type; with `test_only` only validate it
    fn set_output_type(
        &mut self,
        stream: u32,
        media_type: &FormatDescriptor,
        test_only: bool,
    ) -> ProviderResult<()>;

    fn current_input_type(&self, stream: u32) -> ProviderResult<FormatDescriptor>;

    fn current_output_type(&self, stream: u32) -> ProviderResult<FormatDescriptor>;

    // ===== Data flow =====

    fn input_status(&self, stream: u32) -> ProviderResult<InputStatus>;

    fn output_status(&self) -> OutputStatus;

    /// Hand one sample to the stage
    fn submit(&mut self, stream: u32, sample: Sample) -> ProviderResult<()>;

    /// Take the held sample back out, tagged
    fn produce_output(&mut self) -> ProviderResult<Sample>;

    /// Discard any held sample
    fn flush(&mut self);

    fn process_message(&mut self, message: TransformMessage) -> ProviderResult<()>;
}

/// Pass-through implementation of [`MediaTransform`]
pub struct PassThroughTransform {
    upstream: Box<dyn MediaTypeSource>,
    illumination: Box<dyn IlluminationSource>,
    /// Allow-listed upstream types; indices never change once assigned
    candidates: Vec<FormatDescriptor>,
    upstream_cursor: u32,
    upstream_exhausted: bool,
    input_type: Option<FormatDescriptor>,
    output_type: Option<FormatDescriptor>,
    held: Option<Sample>,
}

impl PassThroughTransform {
    pub fn new(
        upstream: Box<dyn MediaTypeSource>,
        illumination: Box<dyn IlluminationSource>,
    ) -> Self {
        Self {
            upstream,
            illumination,
            candidates: Vec::new(),
            upstream_cursor: 0,
            upstream_exhausted: false,
            input_type: None,
            output_type: None,
            held: None,
        }
    }

    pub fn state(&self) -> TransformState {
        match (&self.input_type, &self.output_type, &self.held) {
            (Some(_), Some(_), Some(_)) => TransformState::Holding,
            (Some(_), Some(_), None) => TransformState::Empty,
            _ => TransformState::NoTypesSet,
        }
    }

    fn check_stream(stream: u32) -> ProviderResult<()> {
        if stream == 0 {
            Ok(())
        } else {
            Err(ProviderError::InvalidStream)
        }
    }

    /// Pull one more upstream type into the candidate list.
    /// Returns `false` once upstream is exhausted.
    fn pull_upstream(&mut self) -> ProviderResult<bool> {
        if self.upstream_exhausted {
            return Ok(false);
        }
        match self.upstream.output_available_type(0, self.upstream_cursor) {
            Ok(media_type) => {
                self.upstream_cursor += 1;
                let allowed = media_type.subtype.is_pass_through_supported();
                if allowed && !self.candidates.contains(&media_type) {
                    trace!(index = self.candidates.len(), media_type = %media_type, "Added candidate type");
                    self.candidates.push(media_type);
                }
                Ok(true)
            }
            Err(ProviderError::NoMoreTypes) => {
                self.upstream_exhausted = true;
                debug!(count = self.candidates.len(), "Upstream types exhausted");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn candidate(&mut self, stream: u32, index: u32) -> ProviderResult<FormatDescriptor> {
        Self::check_stream(stream)?;
        while self.candidates.len() <= index as usize {
            if !self.pull_upstream()? {
                return Err(ProviderError::NoMoreTypes);
            }
        }
        Ok(self.candidates[index as usize])
    }

    /// Find the candidate matching `media_type` on major kind, subtype and
    /// frame size, returning the full candidate
    fn match_candidate(&mut self, media_type: &FormatDescriptor) -> ProviderResult<FormatDescriptor> {
        let matches = |c: &FormatDescriptor| {
            c.major == media_type.major
                && c.subtype == media_type.subtype
                && c.width == media_type.width
                && c.height == media_type.height
        };

        let mut checked = 0;
        loop {
            if let Some(found) = self.candidates[checked..].iter().find(|c| matches(c)) {
                return Ok(*found);
            }
            checked = self.candidates.len();
            if !self.pull_upstream()? {
                return Err(ProviderError::InvalidMediaType);
            }
        }
    }
}

impl MediaTransform for PassThroughTransform {
    fn stream_limits(&self) -> StreamLimits {
        StreamLimits {
            min_inputs: 1,
            max_inputs: 1,
            min_outputs: 1,
            max_outputs: 1,
        }
    }

    fn stream_count(&self) -> (u32, u32) {
        (1, 1)
    }

    fn input_stream_info(&self, stream: u32) -> ProviderResult<StreamInfo> {
        Self::check_stream(stream)?;
        if self.input_type.is_none() {
            return Err(ProviderError::TypesNotSet);
        }
        Ok(StreamInfo {
            whole_samples: true,
            single_sample_per_buffer: true,
            ..StreamInfo::default()
        })
    }

    fn output_stream_info(&self, stream: u32) -> ProviderResult<StreamInfo> {
        Self::check_stream(stream)?;
        if self.output_type.is_none() {
            return Err(ProviderError::TypesNotSet);
        }
        Ok(StreamInfo {
            whole_samples: true,
            single_sample_per_buffer: true,
            fixed_sample_size: true,
            provides_samples: true,
            ..StreamInfo::default()
        })
    }

    fn available_input_type(
        &mut self,
        stream: u32,
        index: u32,
    ) -> ProviderResult<FormatDescriptor> {
        self.candidate(stream, index)
    }

    fn available_output_type(
        &mut self,
        stream: u32,
        index: u32,
    ) -> ProviderResult<FormatDescriptor> {
        self.candidate(stream, index)
    }

    fn set_input_type(
        &mut self,
        stream: u32,
        media_type: &FormatDescriptor,
        test_only: bool,
    ) -> ProviderResult<()> {
        Self::check_stream(stream)?;
        let full = self.match_candidate(media_type)?;
        if !test_only {
            debug!(media_type = %full, "Pass-through types set");
            self.input_type = Some(full);
            self.output_type = Some(full);
        }
        Ok(())
    }

    fn set_output_type(
        &mut self,
        stream: u32,
        media_type: &FormatDescriptor,
        test_only: bool,
    ) -> ProviderResult<()> {
        self.set_input_type(stream, media_type, test_only)
    }

    fn current_input_type(&self, stream: u32) -> ProviderResult<FormatDescriptor> {
        Self::check_stream(stream)?;
        self.input_type.ok_or(ProviderError::TypesNotSet)
    }

    fn current_output_type(&self, stream: u32) -> ProviderResult<FormatDescriptor> {
        Self::check_stream(stream)?;
        self.output_type.ok_or(ProviderError::TypesNotSet)
    }

    fn input_status(&self, stream: u32) -> ProviderResult<InputStatus> {
        Self::check_stream(stream)?;
        Ok(if self.held.is_none() {
            InputStatus::AcceptData
        } else {
            InputStatus::NotAccepting
        })
    }

    fn output_status(&self) -> OutputStatus {
        if self.held.is_some() {
            OutputStatus::SampleReady
        } else {
            OutputStatus::Empty
        }
    }

    fn submit(&mut self, stream: u32, sample: Sample) -> ProviderResult<()> {
        Self::check_stream(stream)?;
        if self.input_type.is_none() || self.output_type.is_none() {
            return Err(ProviderError::TypesNotSet);
        }
        if self.held.is_some() {
            return Err(ProviderError::SlotOccupied);
        }
        match sample.buffers.len() {
            0 => return Err(ProviderError::EmptySample),
            1 => {}
            _ => return Err(ProviderError::TooManyBuffers),
        }
        self.held = Some(sample);
        Ok(())
    }

    fn produce_output(&mut self) -> ProviderResult<Sample> {
        let mut sample = self.held.take().ok_or(ProviderError::NeedsMoreInput)?;
        sample.illumination_active = Some(self.illumination.next_state());
        Ok(sample)
    }

    fn flush(&mut self) {
        if self.held.take().is_some() {
            debug!("Flushed held sample");
        }
    }

    fn process_message(&mut self, message: TransformMessage) -> ProviderResult<()> {
        match message {
            TransformMessage::Flush => {
                self.flush();
                Ok(())
            }
            TransformMessage::SetDeviceManager => {
                Err(ProviderError::NotSupported("device manager".to_string()))
            }
            // Already single-sample, draining needs no work
            TransformMessage::Drain
            | TransformMessage::BeginStreaming
            | TransformMessage::EndStreaming
            | TransformMessage::StartOfStream
            | TransformMessage::EndOfStream => Ok(()),
        }
    }
}

impl std::fmt::Debug for PassThroughTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassThroughTransform")
            .field("state", &self.state())
            .field("candidates", &self.candidates.len())
            .field("upstream_exhausted", &self.upstream_exhausted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::Ratio;
    use crate::media::formats::VideoSubtype;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fmt(subtype: VideoSubtype, width: u32) -> FormatDescriptor {
        FormatDescriptor::video(subtype, width, width * 3 / 4, Ratio::from_int(30))
    }

    /// Upstream that counts how far it has been read
    struct CountingSource {
        types: Vec<FormatDescriptor>,
        reads: Arc<AtomicU32>,
    }

    impl MediaTypeSource for CountingSource {
        fn output_available_type(&self, stream: u32, index: u32) -> ProviderResult<FormatDescriptor> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.types.output_available_type(stream, index)
        }
    }

    fn transform(types: Vec<FormatDescriptor>) -> PassThroughTransform {
        PassThroughTransform::new(Box::new(types), Box::new(AlternatingIllumination::default()))
    }

    #[test]
    fn test_compressed_types_filtered() {
        let mut t = transform(vec![
            fmt(VideoSubtype::Mjpg, 640),
            fmt(VideoSubtype::Yuy2, 640),
            fmt(VideoSubtype::H264, 640),
            fmt(VideoSubtype::Nv12, 640),
        ]);
        assert_eq!(t.available_output_type(0, 0).unwrap().subtype, VideoSubtype::Yuy2);
        assert_eq!(t.available_output_type(0, 1).unwrap().subtype, VideoSubtype::Nv12);
        assert_eq!(t.available_output_type(0, 2), Err(ProviderError::NoMoreTypes));
        assert_eq!(t.available_input_type(1, 0), Err(ProviderError::InvalidStream));
    }

    #[test]
    fn test_candidates_pulled_lazily() {
        let reads = Arc::new(AtomicU32::new(0));
        let source = CountingSource {
            types: vec![
                fmt(VideoSubtype::Yuy2, 640),
                fmt(VideoSubtype::Yuy2, 320),
                fmt(VideoSubtype::Nv12, 640),
            ],
            reads: Arc::clone(&reads),
        };
        let mut t = PassThroughTransform::new(Box::new(source), Box::new(FixedIllumination(true)));

        let first = t.available_output_type(0, 0).unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        // Index 0 is stable across later pulls
        t.available_output_type(0, 2).unwrap();
        assert_eq!(t.available_output_type(0, 0).unwrap(), first);
        assert_eq!(reads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_set_type_test_only_does_not_change_state() {
        let mut t = transform(vec![fmt(VideoSubtype::Yuy2, 640)]);
        t.set_input_type(0, &fmt(VideoSubtype::Yuy2, 640), true).unwrap();
        assert_eq!(t.state(), TransformState::NoTypesSet);
        assert_eq!(t.current_input_type(0), Err(ProviderError::TypesNotSet));
    }

    #[test]
    fn test_set_output_sets_both() {
        let mut t = transform(vec![fmt(VideoSubtype::Nv12, 640)]);
        let mut requested = fmt(VideoSubtype::Nv12, 640);
        requested.frame_rate = Ratio::from_int(15);
        t.set_output_type(0, &requested, false).unwrap();

        // Adopts the full candidate, not the request
        let current = t.current_input_type(0).unwrap();
        assert_eq!(current.frame_rate, Ratio::from_int(30));
        assert_eq!(t.current_output_type(0).unwrap(), current);
        assert_eq!(t.state(), TransformState::Empty);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut t = transform(vec![fmt(VideoSubtype::Nv12, 640)]);
        assert_eq!(
            t.set_input_type(0, &fmt(VideoSubtype::Yuy2, 640), false),
            Err(ProviderError::InvalidMediaType)
        );
    }

    #[test]
    fn test_zero_buffers_rejected() {
        let mut t = transform(vec![fmt(VideoSubtype::Yuy2, 640)]);
        t.set_input_type(0, &fmt(VideoSubtype::Yuy2, 640), false).unwrap();
        let empty = Sample {
            buffers: Vec::new(),
            timestamp: Duration::ZERO,
            illumination_active: None,
        };
        assert_eq!(t.submit(0, empty), Err(ProviderError::EmptySample));
    }

    #[test]
    fn test_status_tracks_slot() {
        let mut t = transform(vec![fmt(VideoSubtype::Yuy2, 640)]);
        t.set_input_type(0, &fmt(VideoSubtype::Yuy2, 640), false).unwrap();
        assert_eq!(t.input_status(0), Ok(InputStatus::AcceptData));
        assert_eq!(t.output_status(), OutputStatus::Empty);

        t.submit(0, Sample::single(FrameData::from(vec![1u8]), Duration::ZERO))
            .unwrap();
        assert_eq!(t.input_status(0), Ok(InputStatus::NotAccepting));
        assert_eq!(t.output_status(), OutputStatus::SampleReady);

        t.process_message(TransformMessage::Flush).unwrap();
        assert_eq!(t.output_status(), OutputStatus::Empty);
    }

    #[test]
    fn test_alternating_illumination_starts_lit() {
        let mut source = AlternatingIllumination::default();
        assert!(source.next_state());
        assert!(!source.next_state());
        assert!(source.next_state());
    }

    #[test]
    fn test_device_manager_message_unsupported() {
        let mut t = transform(Vec::new());
        assert!(matches!(
            t.process_message(TransformMessage::SetDeviceManager),
            Err(ProviderError::NotSupported(_))
        ));
        assert_eq!(t.process_message(TransformMessage::Drain), Ok(()));
    }
}
