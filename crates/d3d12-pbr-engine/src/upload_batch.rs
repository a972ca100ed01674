use crate::backend::Backend;
use crate::backend::CommandAllocator;
use crate::backend::CommandList;
use crate::backend::RenderDevice;
use crate::backend::WaitOutcome;
use crate::command_queue::CommandQueue;
use crate::error::EngineResult;
use crate::error::GpuError;
use tracing::debug;

/// Fence value covering one batch of uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[must_use]
pub struct UploadToken(pub u64);

impl UploadToken {
    pub fn is_complete<B: Backend>(self, queue: &CommandQueue<B>) -> bool {
        queue.completed_value() >= self.0
    }

    /// Blocks until the batch has executed. Staging buffers may be discarded afterwards.
    pub fn wait<B: Backend>(self, queue: &CommandQueue<B>) -> EngineResult<()> {
        match queue.wait(self.0, None)? {
            WaitOutcome::Reached => Ok(()),
            WaitOutcome::TimedOut => Err(GpuError::DeviceHung { value: self.0 }.into()),
        }
    }
}

/// Records one-shot copies on a borrowed command list with an allocator of its own.
pub struct UploadBatch<B: Backend> {
    allocator: B::CommandAllocator,
    recording: bool,
    last: Option<UploadToken>,
}

impl<B: Backend> UploadBatch<B> {
    pub fn create(device: &B::Device) -> EngineResult<Self> {
        Ok(Self {
            allocator: device.create_command_allocator()?,
            recording: false,
            last: None,
        })
    }

    pub fn begin(&mut self, queue: &CommandQueue<B>, list: &mut B::CommandList) -> EngineResult<()> {
        if self.recording {
            return Err(GpuError::InvalidArgument("upload batch is already recording").into());
        }
        // The allocator may still back the previous batch.
        if let Some(token) = self.last {
            token.wait(queue)?;
        }
        self.allocator.reset()?;
        list.reset(&self.allocator, None)?;
        self.recording = true;
        Ok(())
    }

    /// Submits everything recorded since `begin`.
    pub fn end(&mut self, queue: &mut CommandQueue<B>, list: &mut B::CommandList) -> EngineResult<UploadToken> {
        if !self.recording {
            return Err(GpuError::InvalidArgument("upload batch was not begun").into());
        }
        self.recording = false;
        list.close()?;
        queue.execute(&[&*list])?;
        let token = UploadToken(queue.signal()?);
        debug!("Submitted upload batch behind fence {}", token.0);
        self.last = Some(token);
        Ok(token)
    }

    /// Closes `list` without submitting it. Resources recorded into it may be dropped right away.
    pub fn abort(&mut self, list: &mut B::CommandList) -> EngineResult<()> {
        if !self.recording {
            return Ok(());
        }
        self.recording = false;
        list.close()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }
}
