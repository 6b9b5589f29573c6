// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer capture pipeline
//!
//! Builds a launch description that ends in an appsink named `mysink`, feeds
//! every decoded sample to a [`FrameSink`] from the streaming thread, and
//! drives the PLAYING/NULL transitions for the camera session.

use crate::backends::ring::FrameSink;
use crate::backends::types::{FrameLayout, SourceType};
use crate::config::Config;
use crate::constants::{pipeline, timing};
use crate::errors::{CaptureError, CaptureResult};
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Something that pushes frames into a [`FrameSink`] once started
///
/// Implemented by [`GstSource`]; tests substitute a manual source.
pub trait FrameSource: Send {
    /// Begin delivering frames
    fn start(&mut self) -> CaptureResult<()>;

    /// Stop delivering frames; no callback runs after this returns
    fn stop(&mut self) -> CaptureResult<()>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// Default launch description for a source at the requested size
pub fn launch_description(config: &Config) -> String {
    if let Some(launch) = config.launch.as_deref().filter(|l| !l.trim().is_empty()) {
        return launch.to_string();
    }

    match config.source {
        SourceType::Onboard => format!(
            "nvarguscamerasrc ! video/x-raw(memory:NVMM), width=(int){}, height=(int){}, \
             format=(string)NV12 ! nvvidconv ! video/x-raw, format=(string)NV12 ! \
             appsink name={}",
            config.width,
            config.height,
            pipeline::APPSINK_NAME
        ),
        SourceType::External { device } => format!(
            "v4l2src device=/dev/video{} ! video/x-raw, width=(int){}, height=(int){} ! \
             videoconvert ! video/x-raw, format=RGB ! appsink name={}",
            device,
            config.width,
            config.height,
            pipeline::APPSINK_NAME
        ),
    }
}

/// Frame geometry from negotiated video info, including strides
pub fn frame_layout_from_info(info: &VideoInfo) -> Option<FrameLayout> {
    FrameLayout::from_video_info(info.width(), info.height(), info.stride(), info.offset())
}

/// Frame geometry from caps
///
/// Prefers full video info; falls back to the bare `width`/`height` fields
/// for caps `VideoInfo` cannot parse.
pub fn frame_layout_from_caps(caps: &gstreamer::CapsRef) -> Option<FrameLayout> {
    if let Ok(info) = VideoInfo::from_caps(caps) {
        return frame_layout_from_info(&info);
    }

    let structure = caps.structure(0)?;
    let width = structure.get::<i32>("width").ok()?;
    let height = structure.get::<i32>("height").ok()?;
    if width <= 0 || height <= 0 {
        return None;
    }
    Some(FrameLayout::packed(width as u32, height as u32))
}

/// Log everything queued on the bus, returning the first error
fn drain_bus(bus: &gstreamer::Bus) -> Option<String> {
    let mut first_error = None;

    while let Some(msg) = bus.pop() {
        match msg.view() {
            gstreamer::MessageView::Error(err) => {
                error!(
                    error = %err.error(),
                    debug = ?err.debug(),
                    source = ?err.src().map(|s| s.name()),
                    "GStreamer error"
                );
                if first_error.is_none() {
                    first_error = Some(err.error().to_string());
                }
            }
            gstreamer::MessageView::Warning(w) => {
                warn!(
                    warning = %w.error(),
                    debug = ?w.debug(),
                    "GStreamer warning"
                );
            }
            gstreamer::MessageView::StateChanged(s) => {
                debug!(
                    source = ?s.src().map(|s| s.name()),
                    old = ?s.old(),
                    current = ?s.current(),
                    pending = ?s.pending(),
                    "State changed"
                );
            }
            gstreamer::MessageView::Eos(_) => debug!("End of stream"),
            _ => debug!(kind = ?msg.type_(), "Bus message"),
        }
    }

    first_error
}

/// GStreamer pipeline ending in an appsink that publishes into a [`FrameSink`]
pub struct GstSource {
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
    bus: gstreamer::Bus,
    description: String,
}

impl GstSource {
    /// Parse the launch description and wire the appsink to `sink`
    ///
    /// The pipeline stays in NULL until [`FrameSource::start`].
    pub fn new(config: &Config, sink: Arc<dyn FrameSink>) -> CaptureResult<Self> {
        gstreamer::init()?;

        let description = launch_description(config);
        info!(launch = %description, source = %config.source, "Creating capture pipeline");

        let pipeline = gstreamer::parse::launch(&description)?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| {
                CaptureError::Pipeline("launch description did not produce a pipeline".to_string())
            })?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| CaptureError::Pipeline("pipeline has no bus".to_string()))?;

        let appsink = pipeline
            .by_name(pipeline::APPSINK_NAME)
            .ok_or_else(|| {
                CaptureError::Pipeline(format!(
                    "no element named '{}' in pipeline",
                    pipeline::APPSINK_NAME
                ))
            })?
            .dynamic_cast::<AppSink>()
            .map_err(|_| {
                CaptureError::Pipeline(format!("'{}' is not an appsink", pipeline::APPSINK_NAME))
            })?;

        appsink.set_property("sync", false);
        appsink.set_property("max-buffers", pipeline::MAX_BUFFERS);
        appsink.set_property("drop", true);
        appsink.set_property("enable-last-sample", false);

        let mut frame_num: u64 = 0;
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let frame = frame_num;
                    frame_num += 1;

                    let sample = appsink.pull_sample().map_err(|e| {
                        debug!(frame, error = ?e, "Failed to pull sample");
                        gstreamer::FlowError::Eos
                    })?;

                    let Some(buffer) = sample.buffer() else {
                        if frame % timing::FRAME_LOG_INTERVAL == 0 {
                            warn!(frame, "Sample without buffer, skipping");
                        }
                        return Ok(gstreamer::FlowSuccess::Ok);
                    };

                    let map = buffer.map_readable().map_err(|e| {
                        error!(frame, error = ?e, "Failed to map buffer");
                        gstreamer::FlowError::Error
                    })?;

                    // Missing or unusable caps reach the sink as a 0x0 frame and
                    // are dropped and counted there
                    let layout = sample
                        .caps()
                        .and_then(frame_layout_from_caps)
                        .unwrap_or_else(|| FrameLayout::packed(0, 0));

                    if frame % timing::FRAME_LOG_INTERVAL == 0 {
                        debug!(
                            frame,
                            layout = %layout,
                            bytes = map.as_slice().len(),
                            "Sample received"
                        );
                    }

                    sink.on_frame_ready(map.as_slice(), layout);
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .new_preroll(|appsink| {
                    if let Ok(sample) = appsink.pull_preroll() {
                        debug!(caps = ?sample.caps(), "Preroll sample");
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .eos(|_| info!("Capture pipeline reached end of stream"))
                .build(),
        );

        Ok(Self {
            pipeline,
            appsink,
            bus,
            description,
        })
    }

    /// Poll until the pipeline reports PLAYING, an error, or the budget runs out
    fn wait_for_playing(&self) -> CaptureResult<()> {
        let deadline = Instant::now() + timing::OPEN_ASYNC_BUDGET;

        while Instant::now() < deadline {
            if let Some(err) = drain_bus(&self.bus) {
                return Err(CaptureError::Pipeline(err));
            }

            let (result, current, pending) = self.pipeline.state(gstreamer::ClockTime::ZERO);
            result?;
            if current == gstreamer::State::Playing {
                debug!("Pipeline reached PLAYING");
                return Ok(());
            }

            debug!(current = ?current, pending = ?pending, "Waiting for PLAYING");
            thread::sleep(timing::OPEN_SETTLE);
        }

        warn!(
            budget_ms = timing::OPEN_ASYNC_BUDGET.as_millis() as u64,
            "Pipeline still transitioning to PLAYING"
        );
        Ok(())
    }
}

impl FrameSource for GstSource {
    fn start(&mut self) -> CaptureResult<()> {
        info!("Setting capture pipeline to PLAYING");

        let change = self.pipeline.set_state(gstreamer::State::Playing);
        let change = match change {
            Ok(change) => change,
            Err(e) => {
                drain_bus(&self.bus);
                let _ = self.pipeline.set_state(gstreamer::State::Null);
                return Err(CaptureError::Pipeline(format!(
                    "failed to set pipeline to PLAYING: {}",
                    e
                )));
            }
        };

        if change == gstreamer::StateChangeSuccess::Async {
            debug!("Asynchronous state change, polling bus");
            if let Err(e) = self.wait_for_playing() {
                let _ = self.pipeline.set_state(gstreamer::State::Null);
                return Err(e);
            }
        }

        drain_bus(&self.bus);
        thread::sleep(timing::OPEN_SETTLE);
        drain_bus(&self.bus);
        Ok(())
    }

    fn stop(&mut self) -> CaptureResult<()> {
        info!("Stopping capture pipeline");
        self.pipeline.set_state(gstreamer::State::Null)?;
        thread::sleep(timing::CLOSE_SETTLE);
        drain_bus(&self.bus);
        Ok(())
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

impl Drop for GstSource {
    fn drop(&mut self) {
        debug!("Dropping capture pipeline");
        self.appsink
            .set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}
