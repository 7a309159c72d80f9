//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Abstract interfaces to the two external model backends. Concrete
//! implementations (an in-process ONNX model, an HTTP-backed service) are
//! integration surfaces owned by the caller, not this crate — the specific
//! vision-model wire format is out of scope here.

use async_trait::async_trait;

use super::Detection;
use crate::error::PipelineError;
use crate::frame::FrameRef;

#[derive(Debug, Clone, Default)]
pub struct DetectOptions {
    pub classes: Option<Vec<String>>,
    pub min_confidence: f32,
    pub nms_iou: f32,
}

#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(
        &self,
        frame: &FrameRef,
        options: &DetectOptions,
    ) -> Result<Vec<Detection>, PipelineError>;
}

#[derive(Debug, Clone)]
pub struct DescribeOptions {
    pub timeout_ms: u64,
    pub max_tokens: u32,
}

#[async_trait]
pub trait VisionLanguage: Send + Sync {
    async fn describe_image(
        &self,
        frame: &FrameRef,
        prompt: &str,
        options: &DescribeOptions,
    ) -> Result<String, PipelineError>;
}
