//! A simulated GPU timeline.
//!
//! Submissions, fence signals and waits are recorded in order and retired lazily: a signal
//! completes once more than `lag` newer signals are queued behind it, or when someone waits
//! on it. Misuse the real driver would turn into undefined behaviour is recorded as a
//! [`Violation`] instead.

mod objects;

pub use objects::HeadlessAllocator;
pub use objects::HeadlessCommandList;
pub use objects::HeadlessDevice;
pub use objects::HeadlessHeap;
pub use objects::HeadlessPipeline;
pub use objects::HeadlessQueue;
pub use objects::HeadlessResource;
pub use objects::HeadlessRootSignature;
pub use objects::HeadlessSwapChain;

use crate::backend::Backend;
use crate::backend::CpuDescriptorHandle;
use crate::backend::GpuDescriptorHandle;
use crate::backend::ResourceState;
use crate::backend::ViewDesc;
use crate::display::DisplayInfo;
use crate::display::MonitorId;
use crate::error::EngineResult;
use crate::error::GpuError;
use parking_lot::Mutex;
use parking_lot::MutexGuard;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Bytes appended past the end of every allocation and filled with [`CANARY_BYTE`].
pub const CANARY_LEN: usize = 64;
pub const CANARY_BYTE: u8 = 0xA5;

pub struct Headless;

impl Backend for Headless {
    type Device = HeadlessDevice;
    type Surface = ();
    type Resource = HeadlessResource;
    type DescriptorHeap = HeadlessHeap;
    type CommandAllocator = HeadlessAllocator;
    type CommandList = HeadlessCommandList;
    type Queue = HeadlessQueue;
    type SwapChain = HeadlessSwapChain;
    type RootSignature = HeadlessRootSignature;
    type PipelineState = HeadlessPipeline;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuEvent {
    Executed { allocator: u64 },
    Signaled { value: u64 },
    Completed { value: u64 },
    Waited { value: u64, completed_before: u64 },
    AllocatorReset { allocator: u64, completed: u64 },
    Presented { buffer: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    AllocatorResetInFlight { allocator: u64 },
    ListResetWhileRecording { list: u64 },
    ExecutedWhileRecording { list: u64 },
    NonMonotonicSignal { value: u64, last: u64 },
    ResourceReleasedInFlight { resource: u64 },
    StateMismatch {
        resource: u64,
        expected: ResourceState,
        actual: ResourceState,
    },
    DrawWithoutPipeline { list: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorRecord {
    pub view: ViewDesc,
    pub resource: Option<u64>,
}

/// What one executed command list bound and drew.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionRecord {
    pub allocator: u64,
    pub draws: u32,
    pub root_constant_buffers: Vec<(u32, u64)>,
    pub root_tables: Vec<(u32, GpuDescriptorHandle)>,
    pub render_targets: Vec<CpuDescriptorHandle>,
}

pub(crate) struct ResourceMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// The allocation is plain bytes owned by this struct; access is raw-pointer based like
// mapped GPU memory.
unsafe impl Send for ResourceMemory {}
unsafe impl Sync for ResourceMemory {}

impl ResourceMemory {
    fn new(size: usize) -> Self {
        let mut bytes = vec![0u8; size + CANARY_LEN];
        bytes[size..].fill(CANARY_BYTE);
        let boxed = bytes.into_boxed_slice();
        let len = boxed.len();
        let ptr = NonNull::from(Box::leak(boxed)).cast::<u8>();
        Self { ptr, len }
    }

    pub(crate) fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub(crate) fn usable_len(&self) -> usize {
        self.len - CANARY_LEN
    }

    pub(crate) fn snapshot(&self) -> Vec<u8> {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }.to_vec()
    }

    fn copy_from(&self, dest_offset: usize, src: &ResourceMemory, src_offset: usize, len: usize) {
        let len = len
            .min(self.usable_len().saturating_sub(dest_offset))
            .min(src.usable_len().saturating_sub(src_offset));
        unsafe {
            std::ptr::copy(
                src.ptr.as_ptr().add(src_offset),
                self.ptr.as_ptr().add(dest_offset),
                len,
            );
        }
    }
}

impl Drop for ResourceMemory {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        drop(unsafe { Box::from_raw(slice) });
    }
}

pub(crate) enum PendingCopy {
    Linear {
        dest: Arc<ResourceMemory>,
        src: Arc<ResourceMemory>,
        size: u64,
    },
    Texture {
        dest: Arc<ResourceMemory>,
        src: Arc<ResourceMemory>,
        offset: u64,
        row_bytes: u32,
        row_pitch: u32,
        rows: u32,
    },
}

impl PendingCopy {
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            PendingCopy::Linear { dest, src, size } => PendingCopy::Linear {
                dest: dest.clone(),
                src: src.clone(),
                size: *size,
            },
            PendingCopy::Texture {
                dest,
                src,
                offset,
                row_bytes,
                row_pitch,
                rows,
            } => PendingCopy::Texture {
                dest: dest.clone(),
                src: src.clone(),
                offset: *offset,
                row_bytes: *row_bytes,
                row_pitch: *row_pitch,
                rows: *rows,
            },
        }
    }

    fn apply(&self) {
        match self {
            PendingCopy::Linear { dest, src, size } => dest.copy_from(0, src, 0, *size as usize),
            PendingCopy::Texture {
                dest,
                src,
                offset,
                row_bytes,
                row_pitch,
                rows,
            } => {
                for row in 0..*rows as usize {
                    dest.copy_from(
                        row * *row_bytes as usize,
                        src,
                        *offset as usize + row * *row_pitch as usize,
                        *row_bytes as usize,
                    );
                }
            }
        }
    }
}

pub(crate) struct Submission {
    pub(crate) record: SubmissionRecord,
    pub(crate) resources: HashSet<u64>,
    pub(crate) copies: Vec<PendingCopy>,
}

enum TimelineOp {
    Execute(Submission),
    Signal(u64),
}

pub(crate) struct GpuState {
    next_id: u64,
    next_address: u64,
    completed: u64,
    last_signaled: u64,
    lag: usize,
    stalled: bool,
    present_step: u32,
    timeline: VecDeque<TimelineOp>,
    events: Vec<GpuEvent>,
    violations: Vec<Violation>,
    submissions: Vec<SubmissionRecord>,
    memory_budget: Option<u64>,
    allocated_bytes: u64,
    live_resources: HashMap<u64, u64>,
    resource_states: HashMap<u64, ResourceState>,
    descriptors: HashMap<usize, DescriptorRecord>,
    display: DisplayInfo,
    monitor: Option<MonitorId>,
}

impl GpuState {
    pub(crate) fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn completed_value(&self) -> u64 {
        self.completed
    }

    pub(crate) fn allocate(&mut self, size: u64, state: ResourceState) -> EngineResult<(u64, u64)> {
        if let Some(budget) = self.memory_budget {
            if self.allocated_bytes + size > budget {
                return Err(GpuError::OutOfDeviceMemory.into());
            }
        }
        let id = self.next_id();
        let address = self.next_address;
        // Placed resources are 64 KiB aligned.
        self.next_address += size.div_ceil(0x1_0000).max(1) * 0x1_0000;
        self.allocated_bytes += size;
        self.live_resources.insert(id, size);
        self.resource_states.insert(id, state);
        Ok((id, address))
    }

    pub(crate) fn release(&mut self, id: u64) {
        if let Some(size) = self.live_resources.remove(&id) {
            self.allocated_bytes -= size;
        }
        self.resource_states.remove(&id);
        let in_flight = self.timeline.iter().any(|op| match op {
            TimelineOp::Execute(submission) => submission.resources.contains(&id),
            TimelineOp::Signal(_) => false,
        });
        if in_flight {
            self.violations
                .push(Violation::ResourceReleasedInFlight { resource: id });
        }
    }

    pub(crate) fn violate(&mut self, violation: Violation) {
        tracing::warn!("Simulated GPU violation: {:?}", violation);
        self.violations.push(violation);
    }

    pub(crate) fn record_event(&mut self, event: GpuEvent) {
        trace!("{:?}", event);
        self.events.push(event);
    }

    pub(crate) fn allocator_in_flight(&self, allocator: u64) -> bool {
        self.timeline.iter().any(|op| match op {
            TimelineOp::Execute(submission) => submission.record.allocator == allocator,
            TimelineOp::Signal(_) => false,
        })
    }

    pub(crate) fn write_descriptor(&mut self, handle: CpuDescriptorHandle, record: DescriptorRecord) {
        self.descriptors.insert(handle.0, record);
    }

    pub(crate) fn copy_descriptor(&mut self, dest: CpuDescriptorHandle, src: CpuDescriptorHandle) {
        match self.descriptors.get(&src.0).cloned() {
            Some(record) => {
                self.descriptors.insert(dest.0, record);
            }
            None => {
                self.descriptors.remove(&dest.0);
            }
        }
    }

    /// Applies the transitions of a submission in order and checks each `before` state.
    pub(crate) fn apply_transitions(&mut self, transitions: &[(u64, ResourceState, ResourceState)]) {
        for &(resource, before, after) in transitions {
            let actual = self
                .resource_states
                .get(&resource)
                .copied()
                .unwrap_or(ResourceState::Common);
            if normalize(actual) != normalize(before) {
                self.violate(Violation::StateMismatch {
                    resource,
                    expected: before,
                    actual,
                });
            }
            self.resource_states.insert(resource, after);
        }
    }

    pub(crate) fn enqueue(&mut self, submission: Submission) {
        self.record_event(GpuEvent::Executed {
            allocator: submission.record.allocator,
        });
        self.timeline.push_back(TimelineOp::Execute(submission));
    }

    pub(crate) fn signal(&mut self, value: u64) {
        if value <= self.last_signaled {
            self.violate(Violation::NonMonotonicSignal {
                value,
                last: self.last_signaled,
            });
        }
        self.last_signaled = self.last_signaled.max(value);
        self.record_event(GpuEvent::Signaled { value });
        self.timeline.push_back(TimelineOp::Signal(value));
        if !self.stalled {
            while self.pending_signals() > self.lag {
                self.retire_next_signal();
            }
        }
    }

    fn pending_signals(&self) -> usize {
        self.timeline
            .iter()
            .filter(|op| matches!(op, TimelineOp::Signal(_)))
            .count()
    }

    /// Retires everything up to and including the oldest queued signal.
    fn retire_next_signal(&mut self) -> bool {
        while let Some(op) = self.timeline.pop_front() {
            match op {
                TimelineOp::Execute(submission) => {
                    for copy in &submission.copies {
                        copy.apply();
                    }
                    self.submissions.push(submission.record);
                }
                TimelineOp::Signal(value) => {
                    self.completed = self.completed.max(value);
                    self.record_event(GpuEvent::Completed { value });
                    return true;
                }
            }
        }
        false
    }

    pub(crate) fn wait_for(&mut self, value: u64, timeout: Option<Duration>) -> EngineResult<bool> {
        let completed_before = self.completed;
        if self.completed >= value {
            self.record_event(GpuEvent::Waited {
                value,
                completed_before,
            });
            return Ok(true);
        }
        if value > self.last_signaled {
            return Err(GpuError::FenceNeverSignaled {
                value,
                last: self.last_signaled,
            }
            .into());
        }
        if self.stalled {
            return match timeout {
                Some(_) => Ok(false),
                None => Err(GpuError::DeviceHung { value }.into()),
            };
        }
        while self.completed < value && self.retire_next_signal() {}
        self.record_event(GpuEvent::Waited {
            value,
            completed_before,
        });
        Ok(true)
    }

    pub(crate) fn present(&mut self, buffer: u32) -> u32 {
        self.record_event(GpuEvent::Presented { buffer });
        self.present_step
    }

    pub(crate) fn display(&self) -> DisplayInfo {
        self.display
    }

    pub(crate) fn monitor(&self) -> Option<MonitorId> {
        self.monitor
    }
}

fn normalize(state: ResourceState) -> ResourceState {
    match state {
        ResourceState::Present => ResourceState::Common,
        other => other,
    }
}

/// Shared handle to one simulated GPU. Clones observe the same timeline.
#[derive(Clone)]
pub struct SimulatedGpu {
    state: Arc<Mutex<GpuState>>,
}

impl Default for SimulatedGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedGpu {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GpuState {
                next_id: 0,
                next_address: 0x1_0000,
                completed: 0,
                last_signaled: 0,
                lag: 0,
                stalled: false,
                present_step: 1,
                timeline: VecDeque::new(),
                events: Vec::new(),
                violations: Vec::new(),
                submissions: Vec::new(),
                memory_budget: None,
                allocated_bytes: 0,
                live_resources: HashMap::new(),
                resource_states: HashMap::new(),
                descriptors: HashMap::new(),
                display: DisplayInfo::sdr(),
                monitor: Some(MonitorId(1)),
            })),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, GpuState> {
        self.state.lock()
    }

    pub fn device(&self) -> HeadlessDevice {
        HeadlessDevice::new(self.clone())
    }

    /// How many signals may stay queued before the oldest completes on its own.
    pub fn set_lag(&self, lag: usize) {
        self.lock().lag = lag;
    }

    /// A stalled GPU retires nothing; waits time out or report a hung device.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// How far the back-buffer index moves per present.
    pub fn set_present_step(&self, step: u32) {
        self.lock().present_step = step;
    }

    pub fn set_memory_budget(&self, budget: Option<u64>) {
        self.lock().memory_budget = budget;
    }

    pub fn set_display(&self, display: DisplayInfo) {
        self.lock().display = display;
    }

    pub fn set_monitor(&self, monitor: Option<MonitorId>) {
        self.lock().monitor = monitor;
    }

    /// Retires every queued submission and signal.
    pub fn drain(&self) {
        let mut state = self.lock();
        while state.retire_next_signal() {}
    }

    pub fn completed_value(&self) -> u64 {
        self.lock().completed
    }

    pub fn last_signaled(&self) -> u64 {
        self.lock().last_signaled
    }

    pub fn events(&self) -> Vec<GpuEvent> {
        self.lock().events.clone()
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.lock().violations.clone()
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.lock().submissions.clone()
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.lock().allocated_bytes
    }

    pub fn live_resource_count(&self) -> usize {
        self.lock().live_resources.len()
    }

    pub fn resource_state(&self, resource: u64) -> Option<ResourceState> {
        self.lock().resource_states.get(&resource).copied()
    }

    pub fn descriptor(&self, handle: CpuDescriptorHandle) -> Option<DescriptorRecord> {
        self.lock().descriptors.get(&handle.0).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CommandAllocator;
    use crate::backend::CommandList;
    use crate::backend::MemoryKind;
    use crate::backend::RenderDevice;
    use crate::backend::SubmissionQueue;

    #[test]
    fn signals_retire_behind_the_lag() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        gpu.set_lag(1);
        let queue = gpu.device().create_command_queue()?;
        queue.signal(1)?;
        assert_eq!(gpu.completed_value(), 0);
        queue.signal(2)?;
        assert_eq!(gpu.completed_value(), 1);
        assert_eq!(queue.wait_for(2, None)?, crate::backend::WaitOutcome::Reached);
        assert_eq!(gpu.completed_value(), 2);
        Ok(())
    }

    #[test]
    fn stalled_gpu_times_out_or_hangs() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        gpu.set_stalled(true);
        let queue = gpu.device().create_command_queue()?;
        queue.signal(1)?;
        assert_eq!(
            queue.wait_for(1, Some(Duration::from_millis(5)))?,
            crate::backend::WaitOutcome::TimedOut
        );
        let error = queue.wait_for(1, None).unwrap_err();
        assert_eq!(error.gpu_error(), Some(&GpuError::DeviceHung { value: 1 }));
        Ok(())
    }

    #[test]
    fn waiting_on_an_unsignaled_value_is_an_error() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        let queue = gpu.device().create_command_queue()?;
        let error = queue.wait_for(3, None).unwrap_err();
        assert_eq!(
            error.gpu_error(),
            Some(&GpuError::FenceNeverSignaled { value: 3, last: 0 })
        );
        Ok(())
    }

    #[test]
    fn resetting_an_in_flight_allocator_is_flagged() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        gpu.set_stalled(true);
        let device = gpu.device();
        let queue = device.create_command_queue()?;
        let allocator = device.create_command_allocator()?;
        let mut list = device.create_command_list(&allocator)?;
        list.reset(&allocator, None)?;
        list.close()?;
        queue.execute(&[&list])?;
        queue.signal(1)?;
        allocator.reset()?;
        assert!(matches!(
            gpu.violations().as_slice(),
            [Violation::AllocatorResetInFlight { .. }]
        ));
        Ok(())
    }

    #[test]
    fn copies_land_when_the_fence_completes() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        gpu.set_lag(1);
        let device = gpu.device();
        let queue = device.create_command_queue()?;
        let allocator = device.create_command_allocator()?;
        let mut list = device.create_command_list(&allocator)?;
        let staging = device.create_buffer(MemoryKind::Upload, 4, ResourceState::GenericRead)?;
        let target = device.create_buffer(MemoryKind::DeviceLocal, 4, ResourceState::CopyDest)?;
        let mapped = crate::backend::GpuResource::map(&staging)?;
        unsafe { std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), mapped.as_ptr(), 4) };

        list.reset(&allocator, None)?;
        list.copy_buffer(&target, &staging, 4);
        list.close()?;
        queue.execute(&[&list])?;
        queue.signal(1)?;
        assert_eq!(&target.contents()[..4], &[0, 0, 0, 0]);
        queue.wait_for(1, None)?;
        assert_eq!(&target.contents()[..4], &[1, 2, 3, 4]);
        assert!(gpu.violations().is_empty());
        Ok(())
    }

    #[test]
    fn releasing_a_resource_the_gpu_still_reads_is_flagged() -> EngineResult<()> {
        let gpu = SimulatedGpu::new();
        gpu.set_lag(4);
        let device = gpu.device();
        let queue = device.create_command_queue()?;
        let allocator = device.create_command_allocator()?;
        let mut list = device.create_command_list(&allocator)?;
        let staging = device.create_buffer(MemoryKind::Upload, 16, ResourceState::GenericRead)?;
        let target = device.create_buffer(MemoryKind::DeviceLocal, 16, ResourceState::CopyDest)?;
        let staging_id = staging.id();
        list.reset(&allocator, None)?;
        list.copy_buffer(&target, &staging, 16);
        list.close()?;
        queue.execute(&[&list])?;
        queue.signal(1)?;
        drop(staging);
        assert_eq!(
            gpu.violations(),
            vec![Violation::ResourceReleasedInFlight {
                resource: staging_id
            }]
        );
        Ok(())
    }
}
