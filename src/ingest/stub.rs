//! Stub frame source.
//!
//! `stub://` sources never touch hardware. They either replay a scripted list
//! of frames (tests) or generate a synthetic scene forever (demos, default
//! configuration).

use std::collections::VecDeque;

use crate::error::CaptureError;
use crate::frame::Frame;

use super::FrameSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Readiness {
    Ready,
    /// Becomes ready once `wait_until_ready` is called.
    AfterWait,
    Never,
}

/// Scripted or synthetic frame source.
pub struct StubSource {
    name: String,
    readiness: Readiness,
    frames: VecDeque<Frame>,
    synthetic: Option<SyntheticScene>,
    frames_read: u64,
    waits: u64,
}

impl StubSource {
    /// Replay `frames` in order, then report a disconnect.
    pub fn from_frames(name: &str, frames: Vec<Frame>) -> Self {
        Self {
            name: name.to_string(),
            readiness: Readiness::Ready,
            frames: frames.into(),
            synthetic: None,
            frames_read: 0,
            waits: 0,
        }
    }

    /// Generate a synthetic scene of the given size, forever.
    pub fn synthetic(name: &str, width: u32, height: u32) -> Self {
        Self {
            name: name.to_string(),
            readiness: Readiness::Ready,
            frames: VecDeque::new(),
            synthetic: Some(SyntheticScene::new(width, height)),
            frames_read: 0,
            waits: 0,
        }
    }

    /// Start unready; the first `wait_until_ready` flips the source to ready.
    pub fn starting_unready(mut self) -> Self {
        self.readiness = Readiness::AfterWait;
        self
    }

    /// Never become ready.
    pub fn never_ready(mut self) -> Self {
        self.readiness = Readiness::Never;
        self
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// How many times a caller had to wait for readiness.
    pub fn waits(&self) -> u64 {
        self.waits
    }
}

impl FrameSource for StubSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.readiness == Readiness::Ready
    }

    fn wait_until_ready(&mut self) -> Result<(), CaptureError> {
        self.waits += 1;
        match self.readiness {
            Readiness::Ready => Ok(()),
            Readiness::AfterWait => {
                log::debug!("StubSource: {} became ready", self.name);
                self.readiness = Readiness::Ready;
                Ok(())
            }
            Readiness::Never => Err(CaptureError::NoFrameAvailable(self.name.clone())),
        }
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if !self.is_ready() {
            return Err(CaptureError::SourceUnavailable(format!(
                "{} is not ready",
                self.name
            )));
        }
        let frame = match self.frames.pop_front() {
            Some(frame) => frame,
            None => match self.synthetic.as_mut() {
                Some(scene) => scene.next_frame()?,
                None => {
                    return Err(CaptureError::SourceUnavailable(format!(
                        "{} has no more frames",
                        self.name
                    )))
                }
            },
        };
        self.frames_read += 1;
        Ok(frame)
    }
}

/// Moving gradient with a scene change every 50 frames.
struct SyntheticScene {
    width: u32,
    height: u32,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticScene {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let pixel_count = self.width as usize * self.height as usize * 3;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        Frame::from_rgb(pixels, self.width, self.height)
    }
}
