// Sample workflow: capture -> review -> upload

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use tracing::info;

use super::Command;
use featureflow::{
    Core, Event, Feature, FeatureContext, FeatureFlowConfig, ProgressEvent, ResponseData,
    StateEvent, StateMachine,
};

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub frames: u32,
}

#[derive(Debug, Clone)]
pub struct Photo {
    pub frames: u32,
    pub bytes: usize,
}

#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub url: String,
    pub bytes: usize,
}

impl ResponseData for UploadReceipt {}

const BYTES_PER_FRAME: usize = 4096;
const FRAME_INTERVAL: Duration = Duration::from_millis(5);

pub struct Capture;

#[async_trait]
impl Feature for Capture {
    type Input = CaptureRequest;
    type Output = Photo;

    async fn process(&self, input: CaptureRequest, ctx: FeatureContext<Photo>) {
        for frame in 1..=input.frames {
            tokio::time::sleep(FRAME_INTERVAL).await;
            ctx.emit_response_data(ProgressEvent::new(frame, input.frames));
            ctx.result_event(
                Photo {
                    frames: frame,
                    bytes: frame as usize * BYTES_PER_FRAME,
                },
                Event::Progress,
            );
        }
        ctx.result_event(
            Photo {
                frames: input.frames,
                bytes: input.frames as usize * BYTES_PER_FRAME,
            },
            Event::Success,
        );
    }
}

pub struct Review {
    reject: bool,
}

#[async_trait]
impl Feature for Review {
    type Input = Photo;
    type Output = Photo;

    async fn process(&self, photo: Photo, ctx: FeatureContext<Photo>) {
        let event = if self.reject || photo.frames == 0 {
            Event::Fail
        } else {
            Event::Success
        };
        ctx.result_event(photo, event);
    }
}

pub struct Upload;

#[async_trait]
impl Feature for Upload {
    type Input = Photo;
    type Output = UploadReceipt;

    async fn process(&self, photo: Photo, ctx: FeatureContext<UploadReceipt>) {
        let receipt = UploadReceipt {
            url: format!("memory://uploads/{}-frames", photo.frames),
            bytes: photo.bytes,
        };
        ctx.emit_response_data(receipt.clone());
        ctx.result_event(receipt, Event::Success);
    }
}

/// Register the sample graph on `machine`.
pub fn register_demo(machine: &StateMachine, reject: bool) {
    machine.register(|registry| {
        registry.connect(|| Capture, move || Review { reject }).after(Event::Success);
        registry.connect(move || Review { reject }, || Upload).after(Event::Success);
    });
}

pub struct DemoCommand {
    pub config: FeatureFlowConfig,
    pub frames: u32,
    pub fail: bool,
    pub json: bool,
}

impl DemoCommand {
    pub fn new(config: FeatureFlowConfig) -> Self {
        Self {
            config,
            frames: 3,
            fail: false,
            json: false,
        }
    }

    pub fn with_frames(mut self, frames: u32) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_failure(mut self, fail: bool) -> Self {
        self.fail = fail;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    fn print_event(&self, event: &StateEvent, correlation_id: &str) -> Result<()> {
        if self.json {
            let line = json!({
                "correlation_id": correlation_id,
                "state": event.state().short_name(),
                "event": event.event().to_string(),
                "frames": event.payload::<Photo>().map(|photo| photo.frames),
            });
            println!("{}", serde_json::to_string(&line)?);
        } else {
            println!("  {event}");
        }
        Ok(())
    }
}

impl Command for DemoCommand {
    async fn execute(&self) -> Result<()> {
        let core = Core::new(self.config.clone());
        let machine = core.state_machine()?;
        register_demo(&machine, self.fail);

        let mut run = machine.start_with::<Capture>(CaptureRequest {
            frames: self.frames,
        })?;
        let correlation_id = run.correlation_id().to_string();
        if !self.json {
            println!("🚀 Starting workflow {correlation_id}");
        }

        let mut rejected = None;
        while let Some(event) = run.next().await {
            self.print_event(&event, &correlation_id)?;
            if event.event() == Event::Fail {
                rejected = Some(event);
                break;
            }
        }
        drop(run);

        let stats = machine.metrics().get_stats();
        if self.config.observability.metrics_enabled {
            machine.metrics().log_stats();
        }
        core.shutdown();

        if let Some(event) = rejected {
            bail!("Workflow stopped: {} rejected the capture", event.state());
        }

        let receipt = machine.subscribe_to_response::<UploadReceipt>().next().await;
        if self.json {
            let summary = json!({
                "correlation_id": correlation_id,
                "uploaded": receipt.as_ref().map(|receipt| receipt.url.clone()),
                "stats": stats,
            });
            println!("{}", serde_json::to_string(&summary)?);
        } else {
            if let Some(receipt) = &receipt {
                println!("✅ Uploaded {} bytes to {}", receipt.bytes, receipt.url);
            }
            println!(
                "📊 {} activations, {} transitions, {} forwarded events",
                stats.activations, stats.transitions, stats.forwarded_events
            );
        }
        info!(%correlation_id, "Demo workflow finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use featureflow::complete_event;

    #[tokio::test]
    async fn test_demo_workflow_completes_at_upload() {
        let machine = StateMachine::new();
        register_demo(&machine, false);

        let run = machine
            .start_with::<Capture>(CaptureRequest { frames: 2 })
            .unwrap();
        let complete = complete_event(run).await.unwrap();

        assert!(complete.state().is::<Upload>());
        assert_eq!(
            complete.payload::<UploadReceipt>().unwrap().url,
            "memory://uploads/2-frames"
        );
    }

    #[tokio::test]
    async fn test_rejected_review_is_forwarded() {
        let machine = StateMachine::new();
        register_demo(&machine, true);

        let mut run = machine
            .start_with::<Capture>(CaptureRequest { frames: 1 })
            .unwrap();
        let mut events = Vec::new();
        while let Some(event) = run.next().await {
            let done = event.event() == Event::Fail;
            events.push((event.state().short_name(), event.event()));
            if done {
                break;
            }
        }

        assert_eq!(
            events,
            vec![
                ("Capture", Event::Progress),
                ("Capture", Event::Success),
                ("Review", Event::Fail),
            ]
        );
    }
}
