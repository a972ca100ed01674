use crate::backend::Backend;
use crate::backend::CommandAllocator;
use crate::backend::CommandList;
use crate::backend::RenderDevice;
use crate::backend::WaitOutcome;
use crate::command_queue::CommandQueue;
use crate::constant_buffer::ConstantBlock;
use crate::descriptor_pool::DescriptorPool;
use crate::error::EngineResult;
use crate::error::GpuError;
use crate::shader_constants::DisplayConstants;
use crate::shader_constants::LightingConstants;
use crate::shader_constants::SceneConstants;
use crate::shader_constants::TransformConstants;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No GPU work references this slot.
    Idle,
    /// The CPU is recording commands and writing constants.
    Recording,
    /// Commands are queued behind `fence_value`.
    Submitted,
}

/// Per-swap-chain-buffer command memory and constants.
pub struct FrameResource<B: Backend> {
    allocator: B::CommandAllocator,
    scene: ConstantBlock<B, SceneConstants>,
    lighting: ConstantBlock<B, LightingConstants>,
    display: ConstantBlock<B, DisplayConstants>,
    transforms: Vec<ConstantBlock<B, TransformConstants>>,
    fence_value: u64,
    state: FrameState,
}

impl<B: Backend> FrameResource<B> {
    pub fn init(
        device: &B::Device,
        pool: &Arc<DescriptorPool<B>>,
        transform_count: usize,
        display: DisplayConstants,
    ) -> EngineResult<Self> {
        let allocator = device.create_command_allocator()?;
        let scene = ConstantBlock::init(device, pool, SceneConstants::default())?;
        let lighting = ConstantBlock::init(device, pool, LightingConstants::default())?;
        let display = ConstantBlock::init(device, pool, display)?;
        let mut frame = Self {
            allocator,
            scene,
            lighting,
            display,
            transforms: Vec::new(),
            fence_value: 0,
            state: FrameState::Idle,
        };
        frame.add_transforms(device, pool, transform_count)?;
        Ok(frame)
    }

    pub fn add_transforms(
        &mut self,
        device: &B::Device,
        pool: &Arc<DescriptorPool<B>>,
        count: usize,
    ) -> EngineResult<()> {
        for _ in 0..count {
            self.transforms
                .push(ConstantBlock::init(device, pool, TransformConstants::default())?);
        }
        Ok(())
    }

    /// Reclaims the slot's command memory and reopens `list` on it.
    ///
    /// Refuses to touch the allocator while the GPU has not reached this slot's fence.
    pub fn begin_frame(
        &mut self,
        queue: &CommandQueue<B>,
        list: &mut B::CommandList,
        pipeline: Option<&B::PipelineState>,
    ) -> EngineResult<()> {
        if self.state == FrameState::Recording {
            return Err(GpuError::FrameOutOfOrder {
                call: "FrameResource::begin_frame",
                phase: "recording",
            }
            .into());
        }
        if queue.completed_value() < self.fence_value {
            return Err(GpuError::FrameOutOfOrder {
                call: "FrameResource::begin_frame",
                phase: "still in flight",
            }
            .into());
        }
        self.allocator.reset()?;
        list.reset(&self.allocator, pipeline)?;
        self.state = FrameState::Recording;
        Ok(())
    }

    /// Stamps the fence value the queue returned for this slot's submission.
    pub fn end_frame(&mut self, fence_value: u64) {
        debug_assert!(fence_value > self.fence_value);
        self.fence_value = fence_value;
        self.state = FrameState::Submitted;
    }

    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn allocator(&self) -> &B::CommandAllocator {
        &self.allocator
    }

    pub fn scene(&self) -> &ConstantBlock<B, SceneConstants> {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut ConstantBlock<B, SceneConstants> {
        &mut self.scene
    }

    pub fn lighting(&self) -> &ConstantBlock<B, LightingConstants> {
        &self.lighting
    }

    pub fn lighting_mut(&mut self) -> &mut ConstantBlock<B, LightingConstants> {
        &mut self.lighting
    }

    pub fn display(&self) -> &ConstantBlock<B, DisplayConstants> {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut ConstantBlock<B, DisplayConstants> {
        &mut self.display
    }

    pub fn transforms(&self) -> &[ConstantBlock<B, TransformConstants>] {
        &self.transforms
    }

    pub fn transforms_mut(&mut self) -> &mut [ConstantBlock<B, TransformConstants>] {
        &mut self.transforms
    }
}

/// One [`FrameResource`] per swap-chain buffer. Enforces wait-before-reset.
pub struct FrameRing<B: Backend> {
    frames: Vec<FrameResource<B>>,
}

impl<B: Backend> FrameRing<B> {
    pub fn init(
        device: &B::Device,
        pool: &Arc<DescriptorPool<B>>,
        frame_count: u32,
        transforms_per_frame: usize,
        display: DisplayConstants,
    ) -> EngineResult<Self> {
        if frame_count == 0 {
            return Err(GpuError::InvalidArgument("frame count must be non-zero").into());
        }
        let frames = (0..frame_count)
            .map(|_| FrameResource::init(device, pool, transforms_per_frame, display))
            .collect::<EngineResult<Vec<_>>>()?;
        debug!("Created {} frame resources", frames.len());
        Ok(Self { frames })
    }

    /// Blocks until slot `index`'s previous submission has finished, then begins recording on it.
    ///
    /// A wait that outlasts `timeout` is reported as a hung device.
    pub fn begin(
        &mut self,
        index: usize,
        queue: &CommandQueue<B>,
        list: &mut B::CommandList,
        pipeline: Option<&B::PipelineState>,
        timeout: Option<Duration>,
    ) -> EngineResult<&mut FrameResource<B>> {
        let frame_count = self.frames.len();
        let frame = self.frames.get_mut(index).ok_or(GpuError::InvalidArgument(
            "frame index exceeds the number of frame resources",
        ))?;
        let fence_value = frame.fence_value();
        if fence_value != 0 {
            trace!("Frame slot {}/{} waits for fence {}", index, frame_count, fence_value);
            if queue.wait(fence_value, timeout)? == WaitOutcome::TimedOut {
                return Err(GpuError::DeviceHung { value: fence_value }.into());
            }
        }
        frame.begin_frame(queue, list, pipeline)?;
        Ok(frame)
    }

    pub fn get(&self, index: usize) -> Option<&FrameResource<B>> {
        self.frames.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut FrameResource<B>> {
        self.frames.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn fence_values(&self) -> Vec<u64> {
        self.frames.iter().map(FrameResource::fence_value).collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FrameResource<B>> {
        self.frames.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DescriptorKind;
    use crate::backend::headless::Headless;
    use crate::backend::headless::SimulatedGpu;
    use crate::backend::headless::Violation;

    #[test]
    fn begin_refuses_an_in_flight_slot() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        gpu.set_lag(4);
        let device = gpu.device();
        let pool = DescriptorPool::create(&device, DescriptorKind::CbvSrvUav, 16, true)?;
        let mut queue = CommandQueue::<Headless>::init(&device)?;
        let mut frame = FrameResource::init(&device, &pool, 1, DisplayConstants::default())?;
        let mut list = device.create_command_list(frame.allocator())?;

        frame.begin_frame(&queue, &mut list, None)?;
        list.close()?;
        queue.execute(&[&list])?;
        frame.end_frame(queue.signal()?);

        let error = frame.begin_frame(&queue, &mut list, None).unwrap_err();
        assert!(matches!(
            error.gpu_error(),
            Some(GpuError::FrameOutOfOrder { .. })
        ));
        assert!(
            !gpu.violations()
                .iter()
                .any(|v| matches!(v, Violation::AllocatorResetInFlight { .. }))
        );

        queue.wait(frame.fence_value(), None)?;
        frame.begin_frame(&queue, &mut list, None)?;
        assert_eq!(frame.state(), FrameState::Recording);
        list.close()?;
        Ok(())
    }

    #[test]
    fn slot_constants_are_distinct_buffers() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        let device = gpu.device();
        let pool = DescriptorPool::create(&device, DescriptorKind::CbvSrvUav, 64, true)?;
        let ring = FrameRing::<Headless>::init(&device, &pool, 3, 2, DisplayConstants::default())?;
        let mut addresses = std::collections::BTreeSet::new();
        for index in 0..ring.len() {
            let frame = ring.get(index).unwrap();
            assert!(addresses.insert(frame.scene().gpu_address()));
            assert!(addresses.insert(frame.lighting().gpu_address()));
            assert!(addresses.insert(frame.display().gpu_address()));
            for transform in frame.transforms() {
                assert!(addresses.insert(transform.gpu_address()));
            }
        }
        // scene, lighting, display and two transforms per slot
        assert_eq!(pool.free_count(), 64 - 3 * 5);
        Ok(())
    }

    #[test]
    fn partial_init_failure_releases_everything() {
        let gpu = SimulatedGpu::new();
        let device = gpu.device();
        let pool = DescriptorPool::create(&device, DescriptorKind::CbvSrvUav, 64, true).unwrap();
        // Room for two slots' worth of 256-byte buffers, not three.
        gpu.set_memory_budget(Some(256 * 9));
        let result = FrameRing::<Headless>::init(&device, &pool, 3, 1, DisplayConstants::default());
        assert!(result.is_err());
        assert_eq!(pool.free_count(), 64);
        assert_eq!(gpu.live_resource_count(), 0);
    }
}
