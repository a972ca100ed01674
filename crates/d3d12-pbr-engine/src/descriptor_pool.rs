use crate::backend::Backend;
use crate::backend::CpuDescriptorHandle;
use crate::backend::DescriptorHeap;
use crate::backend::DescriptorKind;
use crate::backend::GpuDescriptorHandle;
use crate::backend::RenderDevice;
use crate::error::EngineResult;
use crate::error::GpuError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Fixed-capacity slot allocator over one descriptor heap.
///
/// Every index in `0..capacity` is either on the free list or owned by exactly one caller.
/// Allocation and release are serialized by a single lock so setup and teardown may run from
/// different call paths.
pub struct DescriptorPool<B: Backend> {
    heap: B::DescriptorHeap,
    kind: DescriptorKind,
    capacity: u32,
    cpu_start: CpuDescriptorHandle,
    gpu_start: Option<GpuDescriptorHandle>,
    stride: u32,
    slots: Mutex<Slots>,
}

struct Slots {
    /// Popped from the back.
    free: Vec<u32>,
    allocated: Vec<bool>,
}

impl<B: Backend> DescriptorPool<B> {
    pub fn create(
        device: &B::Device,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> EngineResult<Arc<Self>> {
        if capacity == 0 {
            return Err(GpuError::InvalidArgument("descriptor pool capacity must be non-zero").into());
        }
        let heap = device.create_descriptor_heap(kind, capacity, shader_visible)?;
        debug!(
            "Created {:?} descriptor pool with {} slots (shader visible: {})",
            kind, capacity, shader_visible
        );
        Ok(Arc::new(Self {
            kind,
            capacity,
            cpu_start: heap.cpu_start(),
            gpu_start: heap.gpu_start(),
            stride: heap.increment_size(),
            heap,
            slots: Mutex::new(Slots {
                free: (0..capacity).rev().collect(),
                allocated: vec![false; capacity as usize],
            }),
        }))
    }

    pub fn allocate(&self) -> Result<u32, GpuError> {
        let mut slots = self.slots.lock();
        let index = slots.free.pop().ok_or(GpuError::DescriptorPoolExhausted {
            capacity: self.capacity,
        })?;
        slots.allocated[index as usize] = true;
        Ok(index)
    }

    /// Reserves `count` consecutive slots and returns the first.
    pub fn linear_allocate_range(&self, count: u32) -> Result<u32, GpuError> {
        if count == 0 {
            return Err(GpuError::InvalidArgument("cannot allocate an empty descriptor range"));
        }
        if count == 1 {
            return self.allocate();
        }
        let mut slots = self.slots.lock();
        if (slots.free.len() as u32) < count {
            return Err(GpuError::NoContiguousRange { count });
        }
        // Descending order keeps `allocate` handing out the lowest index.
        slots.free.sort_unstable_by(|a, b| b.cmp(a));
        let run = count as usize;
        let start = slots
            .free
            .windows(run)
            .rposition(|window| window[0] - window[run - 1] == count - 1)
            .ok_or(GpuError::NoContiguousRange { count })?;
        let base = slots.free[start + run - 1];
        slots.free.drain(start..start + run);
        for index in base..base + count {
            slots.allocated[index as usize] = true;
        }
        Ok(base)
    }

    pub fn free(&self, index: u32) -> Result<(), GpuError> {
        self.free_range(index, 1)
    }

    /// Rejects the whole range, leaving the pool untouched, if any slot in it is not live.
    pub fn free_range(&self, base: u32, count: u32) -> Result<(), GpuError> {
        let end = base.checked_add(count).filter(|end| *end <= self.capacity);
        let Some(end) = end else {
            return Err(GpuError::DescriptorOutOfRange {
                index: base.saturating_add(count.saturating_sub(1)),
                capacity: self.capacity,
            });
        };
        let mut slots = self.slots.lock();
        if let Some(index) = (base..end).find(|index| !slots.allocated[*index as usize]) {
            return Err(GpuError::DescriptorDoubleFree { index });
        }
        for index in base..end {
            slots.allocated[index as usize] = false;
            slots.free.push(index);
        }
        Ok(())
    }

    pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
        debug_assert!(index < self.capacity);
        self.cpu_start.offset(index, self.stride)
    }

    /// Only shader-visible pools have GPU handles.
    pub fn gpu_handle(&self, index: u32) -> Option<GpuDescriptorHandle> {
        debug_assert!(index < self.capacity);
        self.gpu_start.map(|start| start.offset(index, self.stride))
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn free_count(&self) -> u32 {
        self.slots.lock().free.len() as u32
    }

    pub fn is_allocated(&self, index: u32) -> bool {
        self.slots
            .lock()
            .allocated
            .get(index as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn is_shader_visible(&self) -> bool {
        self.gpu_start.is_some()
    }

    pub fn heap(&self) -> &B::DescriptorHeap {
        &self.heap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::Headless;
    use crate::backend::headless::SimulatedGpu;
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::BTreeSet;

    fn pool(capacity: u32) -> Arc<DescriptorPool<Headless>> {
        let gpu = SimulatedGpu::new();
        DescriptorPool::<Headless>::create(&gpu.device(), DescriptorKind::CbvSrvUav, capacity, true)
            .unwrap()
    }

    fn brute_force_run(live: &BTreeSet<u32>, capacity: u32, count: u32) -> bool {
        (0..=capacity.saturating_sub(count)).any(|base| (base..base + count).all(|i| !live.contains(&i)))
    }

    #[test]
    fn handles_are_base_plus_index_times_stride() {
        let pool = pool(8);
        let stride = pool.heap().increment_size() as usize;
        let base = pool.cpu_handle(0).0;
        assert_eq!(pool.cpu_handle(5).0, base + 5 * stride);
        let gpu_base = pool.gpu_handle(0).unwrap().0;
        assert_eq!(pool.gpu_handle(3).unwrap().0, gpu_base + 3 * stride as u64);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let pool = pool(2);
        assert_eq!(pool.allocate(), Ok(0));
        assert_eq!(pool.allocate(), Ok(1));
        assert_eq!(
            pool.allocate(),
            Err(GpuError::DescriptorPoolExhausted { capacity: 2 })
        );
    }

    #[test]
    fn double_free_and_out_of_range_are_rejected() {
        let pool = pool(4);
        let index = pool.allocate().unwrap();
        assert_eq!(pool.free(index), Ok(()));
        assert_eq!(pool.free(index), Err(GpuError::DescriptorDoubleFree { index }));
        assert_eq!(
            pool.free(9),
            Err(GpuError::DescriptorOutOfRange {
                index: 9,
                capacity: 4
            })
        );
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn zero_length_range_is_rejected() {
        let pool = pool(4);
        assert!(matches!(
            pool.linear_allocate_range(0),
            Err(GpuError::InvalidArgument(_))
        ));
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn fragmented_pool_reports_no_run() {
        let pool = pool(6);
        let indices: Vec<u32> = (0..6).map(|_| pool.allocate().unwrap()).collect();
        for index in indices.iter().step_by(2) {
            pool.free(*index).unwrap();
        }
        assert_eq!(pool.free_count(), 3);
        assert_eq!(
            pool.linear_allocate_range(2),
            Err(GpuError::NoContiguousRange { count: 2 })
        );
        assert_eq!(pool.free_count(), 3);
    }

    #[test]
    fn exclusivity_holds_under_random_traffic() {
        let pool = pool(64);
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut live = BTreeSet::new();
        for _ in 0..10_000 {
            if rng.gen_bool(0.55) {
                if let Ok(index) = pool.allocate() {
                    assert!(live.insert(index), "index {index} handed out twice");
                } else {
                    assert_eq!(live.len(), 64);
                }
            } else if let Some(&index) = live.iter().nth(rng.gen_range(0..live.len().max(1))) {
                live.remove(&index);
                pool.free(index).unwrap();
            }
            assert_eq!(pool.free_count() as usize + live.len(), 64);
        }
    }

    #[test]
    fn ranges_match_a_brute_force_checker() {
        const CAPACITY: u32 = 48;
        let pool = pool(CAPACITY);
        let mut rng = StdRng::seed_from_u64(42);
        let mut live = BTreeSet::new();
        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for _ in 0..5_000 {
            if rng.gen_bool(0.5) || ranges.is_empty() {
                let count = rng.gen_range(1..=6);
                let expected = brute_force_run(&live, CAPACITY, count);
                match pool.linear_allocate_range(count) {
                    Ok(base) => {
                        assert!(expected);
                        for index in base..base + count {
                            assert!(live.insert(index), "slot {index} was not free");
                            assert!(pool.is_allocated(index));
                        }
                        ranges.push((base, count));
                    }
                    Err(error) => {
                        assert!(!expected, "missed a run of {count}");
                        assert!(matches!(
                            error,
                            GpuError::NoContiguousRange { .. } | GpuError::DescriptorPoolExhausted { .. }
                        ));
                    }
                }
            } else {
                let (base, count) = ranges.swap_remove(rng.gen_range(0..ranges.len()));
                pool.free_range(base, count).unwrap();
                for index in base..base + count {
                    live.remove(&index);
                }
            }
            assert_eq!(pool.free_count() as usize + live.len(), CAPACITY as usize);
        }
    }

    #[test]
    fn concurrent_callers_never_share_a_slot() {
        let pool = pool(4096);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    let mut mine = Vec::new();
                    for round in 0..2_000 {
                        if round % 3 == 2 {
                            if let Some(index) = mine.pop() {
                                pool.free(index).unwrap();
                            }
                        } else {
                            mine.push(pool.allocate().unwrap());
                        }
                    }
                    mine
                })
            })
            .collect();
        let mut seen = BTreeSet::new();
        for handle in handles {
            for index in handle.join().unwrap() {
                assert!(seen.insert(index));
            }
        }
        assert_eq!(pool.free_count() as usize + seen.len(), 4096);
    }
}
