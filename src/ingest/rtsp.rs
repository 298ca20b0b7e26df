//! RTSP backend for `StreamUrlSource`, built on GStreamer.
//!
//! Pipeline: `rtspsrc ! decodebin ! videoconvert ! appsink` with RGB caps and a
//! single-buffer, drop-oldest appsink, so every read sees the newest frame.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;

use super::stream::{StreamConfig, StreamStats};
use crate::frame::Frame;

pub(crate) struct GstreamerRtspSource {
    config: StreamConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    connected: bool,
    frame_count: u64,
    last_error: Option<String>,
}

impl GstreamerRtspSource {
    pub(crate) fn new(config: StreamConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            config,
            pipeline,
            appsink,
            connected: false,
            frame_count: 0,
            last_error: None,
        })
    }

    pub(crate) fn url(&self) -> &str {
        &self.config.url
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected && self.last_error.is_none()
    }

    /// Start playing and wait for the first decoded sample (live sources do
    /// not preroll).
    pub(crate) fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        let timeout = gstreamer::ClockTime::from_mseconds(self.config.connect_timeout.as_millis() as u64);
        self.appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| anyhow!("RTSP stream produced no frame within {:?}", self.config.connect_timeout))?;
        self.connected = true;
        self.last_error = None;
        log::info!("StreamUrlSource: connected to {} (rtsp)", self.config.url);
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Frame> {
        self.poll_bus();
        if let Some(err) = &self.last_error {
            self.connected = false;
            return Err(anyhow!("{}", err));
        }

        let timeout = gstreamer::ClockTime::from_mseconds(
            self.config.connect_timeout.max(Duration::from_millis(500)).as_millis() as u64,
        );
        let sample = self
            .appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| anyhow!("RTSP stream stalled"))?;

        let frame = sample_to_frame(&sample)?;
        self.frame_count += 1;
        Ok(frame)
    }

    pub(crate) fn stats(&self) -> StreamStats {
        StreamStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

impl Drop for GstreamerRtspSource {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("StreamUrlSource: failed to stop RTSP pipeline: {}", err);
        }
    }
}

fn sample_to_frame(sample: &gstreamer::Sample) -> Result<Frame> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("RTSP buffer shorter than frame")?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            pixels.extend_from_slice(
                data.get(start..end)
                    .context("RTSP buffer row is out of bounds")?,
            );
        }
        pixels
    };

    Ok(Frame::from_rgb(pixels, width, height)?)
}
