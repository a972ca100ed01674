use crate::backend::Backend;
use crate::backend::RenderDevice;
use crate::backend::SubmissionQueue;
use crate::backend::WaitOutcome;
use crate::error::EngineResult;
use std::time::Duration;
use tracing::error;
use tracing::trace;

/// The direct queue and its fence.
///
/// Fence values handed out by [`CommandQueue::signal`] start at 1 and strictly increase;
/// 0 means "never submitted".
pub struct CommandQueue<B: Backend> {
    queue: B::Queue,
    next_fence: u64,
}

impl<B: Backend> CommandQueue<B> {
    pub fn init(device: &B::Device) -> EngineResult<Self> {
        Ok(Self {
            queue: device.create_command_queue()?,
            next_fence: 1,
        })
    }

    /// Enqueues a signal of the next fence value and returns it.
    pub fn signal(&mut self) -> EngineResult<u64> {
        let value = self.next_fence;
        self.queue.signal(value)?;
        self.next_fence += 1;
        trace!("Signaled fence {}", value);
        Ok(value)
    }

    /// Returns immediately if the fence already passed `value`.
    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> EngineResult<WaitOutcome> {
        if value == 0 || self.queue.completed_value() >= value {
            return Ok(WaitOutcome::Reached);
        }
        trace!("Waiting for fence {}", value);
        self.queue.wait_for(value, timeout)
    }

    pub fn execute(&self, lists: &[&B::CommandList]) -> EngineResult<()> {
        if lists.is_empty() {
            return Ok(());
        }
        self.queue.execute(lists)
    }

    /// Blocks until every submission so far has finished.
    pub fn flush(&mut self) -> EngineResult<()> {
        let value = self.signal()?;
        self.wait(value, None)?;
        Ok(())
    }

    pub fn completed_value(&self) -> u64 {
        self.queue.completed_value()
    }

    pub fn last_signaled(&self) -> u64 {
        self.next_fence - 1
    }

    pub fn is_idle(&self) -> bool {
        self.completed_value() >= self.last_signaled()
    }

    pub fn raw(&self) -> &B::Queue {
        &self.queue
    }
}

impl<B: Backend> Drop for CommandQueue<B> {
    fn drop(&mut self) {
        if !self.is_idle() {
            if let Err(e) = self.flush() {
                error!("Failed to drain the command queue: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::GpuEvent;
    use crate::backend::headless::Headless;
    use crate::backend::headless::SimulatedGpu;

    #[test]
    fn signals_are_strictly_increasing_from_one() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        let mut queue = CommandQueue::<Headless>::init(&gpu.device())?;
        let values: Vec<u64> = (0..5).map(|_| queue.signal()).collect::<EngineResult<_>>()?;
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
        assert_eq!(queue.last_signaled(), 5);
        Ok(())
    }

    #[test]
    fn reached_values_do_not_block() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        let mut queue = CommandQueue::<Headless>::init(&gpu.device())?;
        let value = queue.signal()?;
        assert_eq!(queue.wait(value, None)?, WaitOutcome::Reached);
        assert_eq!(queue.wait(0, None)?, WaitOutcome::Reached);
        assert!(
            !gpu.events()
                .iter()
                .any(|event| matches!(event, GpuEvent::Waited { .. }))
        );
        Ok(())
    }

    #[test]
    fn timeout_is_reported() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        gpu.set_stalled(true);
        let mut queue = CommandQueue::<Headless>::init(&gpu.device())?;
        let value = queue.signal()?;
        assert_eq!(
            queue.wait(value, Some(Duration::from_millis(1)))?,
            WaitOutcome::TimedOut
        );
        gpu.set_stalled(false);
        queue.flush()?;
        assert!(queue.is_idle());
        Ok(())
    }

    #[test]
    fn waits_after_a_timeout_still_check_the_fence() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        gpu.set_lag(8);
        gpu.set_stalled(true);
        let mut queue = CommandQueue::<Headless>::init(&gpu.device())?;
        let first = queue.signal()?;
        let timeout = Some(Duration::from_millis(1));
        assert_eq!(queue.wait(first, timeout)?, WaitOutcome::TimedOut);
        let second = queue.signal()?;
        assert_eq!(queue.wait(second, timeout)?, WaitOutcome::TimedOut);
        assert_eq!(queue.completed_value(), 0);

        gpu.set_stalled(false);
        assert_eq!(queue.wait(second, None)?, WaitOutcome::Reached);
        assert!(queue.completed_value() >= second);
        Ok(())
    }

    #[test]
    fn flush_drains_a_lagging_gpu() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        gpu.set_lag(8);
        let mut queue = CommandQueue::<Headless>::init(&gpu.device())?;
        for _ in 0..4 {
            queue.signal()?;
        }
        assert_eq!(queue.completed_value(), 0);
        queue.flush()?;
        assert_eq!(queue.completed_value(), 5);
        Ok(())
    }
}
