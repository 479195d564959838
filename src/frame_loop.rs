//! Per-tick frame protocol and swapchain recreation.
//!
//! `FrameLoop` holds the bookkeeping (frame slot index, swapchain
//! generation, dirty state) and drives a `FrameBackend` through
//! the strict order of GPU operations. The Vulkan backend lives
//! in `renderer`; anything else implementing the trait can stand
//! in for it.

use crate::{config::MAX_FRAMES_IN_FLIGHT, error::RenderError};

use vulkanalia::{prelude::v1_0::*, VkResult};
use anyhow::{anyhow, Result};
use log::*;

/// The GPU operations a frame is made of, in the order the loop
/// issues them.
pub trait FrameBackend {
    fn wait_idle(&mut self) -> Result<()>;

    fn destroy_pipeline(&mut self);

    fn destroy_render_targets(&mut self);

    fn destroy_swapchain(&mut self);

    /// The extent a swapchain built now for `requested` would get.
    /// Zero while the surface is minimised.
    fn surface_extent(&mut self, requested: vk::Extent2D) -> Result<vk::Extent2D>;

    /// Builds a swapchain for `requested` and returns the extent
    /// actually chosen.
    fn create_swapchain(&mut self, requested: vk::Extent2D) -> Result<vk::Extent2D>;

    fn create_render_targets(&mut self, generation: u64) -> Result<()>;

    fn create_pipeline(&mut self) -> Result<()>;

    /// Replaces the semaphores and fence of `slot`, fence
    /// signaled. Only called while the device is idle.
    fn recycle_sync(&mut self, slot: usize) -> Result<()>;

    /// Blocks until the GPU is done with `slot`.
    fn wait_for_slot(&mut self, slot: usize) -> VkResult<()>;

    fn acquire_image(&mut self, slot: usize) -> VkResult<(u32, vk::SuccessCode)>;

    /// Unsignals the fence of `slot` ahead of its submission.
    fn reset_slot(&mut self, slot: usize) -> VkResult<()>;

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;

    fn submit(&mut self, slot: usize) -> VkResult<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> VkResult<vk::SuccessCode>;
}

/// Where the current tick is in the frame protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presented,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SwapchainPhase {
    Uninitialized,
    Built,
    /// Built, but no longer matching the surface.
    Dirty,
}

/// How a tick ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and handed to the presentation
    /// engine.
    Presented,
    /// The swapchain must be rebuilt but the window has no area;
    /// nothing was done.
    Deferred,
    /// The swapchain went out of date during the frame.
    OutOfDate,
    /// A driver call failed; the frame was skipped and the
    /// slot will be rebuilt.
    Dropped,
}

/// Running totals since creation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub ticks: u64,
    pub acquires: u64,
    pub submits: u64,
    pub presents: u64,
    pub out_of_date: u64,
    pub dropped: u64,
    pub deferred: u64,
    pub recreations: u64,
}

pub fn is_degenerate(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

pub struct FrameLoop {
    frame: usize,
    phase: FramePhase,
    swapchain: SwapchainPhase,
    requested: vk::Extent2D,
    extent: vk::Extent2D,
    generation: u64,
    stale: [bool; MAX_FRAMES_IN_FLIGHT],
    stats: FrameStats,
}

impl FrameLoop {
    pub fn new(requested: vk::Extent2D) -> Self {
        Self {
            frame: 0,
            phase: FramePhase::Idle,
            swapchain: SwapchainPhase::Uninitialized,
            requested,
            extent: vk::Extent2D::default(),
            generation: 0,
            stale: [false; MAX_FRAMES_IN_FLIGHT],
            stats: FrameStats::default(),
        }
    }

    pub fn frame_index(&self) -> usize {
        self.frame
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn swapchain_phase(&self) -> SwapchainPhase {
        self.swapchain
    }

    /// Extent of the swapchain currently built.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn requested_extent(&self) -> vk::Extent2D {
        self.requested
    }

    /// Number of swapchain builds so far, starting at 1 for the
    /// first one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Records the new window size. The swapchain is rebuilt at
    /// the start of the next tick, or later if the size is
    /// degenerate.
    pub fn notify_resize(&mut self, width: u32, height: u32) {
        self.requested = vk::Extent2D { width, height };
        self.invalidate();
        debug!("Resize requested to {}x{}.", width, height);
    }

    /// Builds the swapchain for the first time. Does nothing if
    /// the requested extent is degenerate; the first tick with a
    /// usable size builds it instead.
    pub fn build(&mut self, backend: &mut impl FrameBackend) -> Result<()> {
        if !self.can_build(backend)? {
            debug!("Initial swapchain build deferred, window has no area.");
            return Ok(());
        }

        self.rebuild(backend)
    }

    /// Runs one tick: rebuilds the swapchain if needed, then
    /// renders one frame into the current slot.
    pub fn tick(&mut self, backend: &mut impl FrameBackend) -> Result<FrameOutcome> {
        self.stats.ticks += 1;

        if self.swapchain != SwapchainPhase::Built {
            if !self.can_build(backend)? {
                self.stats.deferred += 1;
                return Ok(FrameOutcome::Deferred);
            }

            self.rebuild(backend)?;
        }

        let slot = self.frame;
        let outcome = self.run_frame(backend, slot);

        // A frame that never got an image leaves its slot unused,
        // so the next tick takes the same slot again.
        if matches!(
            self.phase,
            FramePhase::Recording | FramePhase::Submitted | FramePhase::Presented
        ) {
            self.frame = (self.frame + 1) % MAX_FRAMES_IN_FLIGHT;
        }
        self.phase = FramePhase::Idle;

        outcome
    }

    /// Destroys everything that depends on the swapchain.
    pub fn teardown(&mut self, backend: &mut impl FrameBackend) -> Result<()> {
        if self.swapchain == SwapchainPhase::Uninitialized {
            return Ok(());
        }

        backend.wait_idle()?;
        backend.destroy_pipeline();
        backend.destroy_render_targets();
        backend.destroy_swapchain();
        self.swapchain = SwapchainPhase::Uninitialized;

        Ok(())
    }

    /// Whether both the window and the surface have an area. The
    /// surface can still report zero after a non-zero resize.
    fn can_build(&self, backend: &mut impl FrameBackend) -> Result<bool> {
        if is_degenerate(self.requested) {
            return Ok(false);
        }

        Ok(!is_degenerate(backend.surface_extent(self.requested)?))
    }

    fn invalidate(&mut self) {
        if self.swapchain == SwapchainPhase::Built {
            self.swapchain = SwapchainPhase::Dirty;
        }
    }

    fn rebuild(&mut self, backend: &mut impl FrameBackend) -> Result<()> {
        let recreating = self.swapchain != SwapchainPhase::Uninitialized;

        // Teardown waits for the device, so recycling stale sync
        // objects afterwards cannot race the GPU.
        self.teardown(backend)?;

        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            if self.stale[slot] {
                backend.recycle_sync(slot)?;
                self.stale[slot] = false;
            }
        }

        self.extent = backend.create_swapchain(self.requested)?;
        self.generation += 1;
        backend.create_render_targets(self.generation)?;
        backend.create_pipeline()?;
        self.swapchain = SwapchainPhase::Built;

        if recreating {
            self.stats.recreations += 1;
            info!(
                "Swapchain recreated ({}x{}, generation {}).",
                self.extent.width, self.extent.height, self.generation,
            );
        }

        Ok(())
    }

    fn run_frame(&mut self, backend: &mut impl FrameBackend, slot: usize) -> Result<FrameOutcome> {
        backend.wait_for_slot(slot).map_err(|e| fatal("fence wait", e))?;

        self.phase = FramePhase::Acquiring;
        self.stats.acquires += 1;
        let image_index = match backend.acquire_image(slot) {
            Ok((index, vk::SuccessCode::SUBOPTIMAL_KHR)) => {
                self.invalidate();
                index
            },
            Ok((index, _)) => index,
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => {
                // Nothing was signaled and the fence is still
                // set, so the slot is clean for its next turn.
                self.invalidate();
                self.stats.out_of_date += 1;
                return Ok(FrameOutcome::OutOfDate);
            },
            Err(error) => return self.drop_frame(slot, "image acquire", error),
        };

        self.phase = FramePhase::Recording;
        if let Err(error) = backend.record(slot, image_index) {
            return match error.downcast_ref::<vk::ErrorCode>() {
                Some(&code) => self.drop_frame(slot, "recording", code),
                None => {
                    self.stale[slot] = true;
                    self.invalidate();
                    Err(error.context("recording"))
                },
            };
        }

        // Only unsignal the fence once the frame is certain to
        // be submitted, otherwise the next wait on it never
        // returns.
        backend.reset_slot(slot).map_err(|e| fatal("fence reset", e))?;

        if let Err(error) = backend.submit(slot) {
            return self.drop_frame(slot, "submit", error);
        }
        self.phase = FramePhase::Submitted;
        self.stats.submits += 1;

        let result = backend.present(slot, image_index);
        self.phase = FramePhase::Presented;
        self.stats.presents += 1;

        match result {
            Ok(vk::SuccessCode::SUBOPTIMAL_KHR) => {
                self.invalidate();
                Ok(FrameOutcome::Presented)
            },
            Ok(_) => Ok(FrameOutcome::Presented),
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => {
                self.invalidate();
                self.stats.out_of_date += 1;
                Ok(FrameOutcome::OutOfDate)
            },
            Err(error) => self.drop_frame(slot, "present", error),
        }
    }

    fn drop_frame(
        &mut self,
        slot: usize,
        stage: &'static str,
        error: vk::ErrorCode,
    ) -> Result<FrameOutcome> {
        if error == vk::ErrorCode::DEVICE_LOST {
            return Err(anyhow!(RenderError::DeviceLost(stage)));
        }

        warn!("Dropping frame in slot {}, {} failed: {}.", slot, stage, error);
        self.stale[slot] = true;
        self.stats.dropped += 1;

        // A swapchain image may have been acquired and never
        // presented; a new swapchain is the simplest way out.
        self.invalidate();
        Ok(FrameOutcome::Dropped)
    }
}

fn fatal(stage: &'static str, error: vk::ErrorCode) -> anyhow::Error {
    if error == vk::ErrorCode::DEVICE_LOST {
        anyhow!(RenderError::DeviceLost(stage))
    } else {
        anyhow!(error).context(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    /// Counts calls and answers every acquire and present with
    /// SUCCESS.
    #[derive(Default)]
    struct Counting {
        swapchains: u32,
        pipelines: u32,
        recycled: Vec<usize>,
        reset: Vec<usize>,
    }

    impl FrameBackend for Counting {
        fn wait_idle(&mut self) -> Result<()> { Ok(()) }
        fn destroy_pipeline(&mut self) {}
        fn destroy_render_targets(&mut self) {}
        fn destroy_swapchain(&mut self) {}
        fn surface_extent(&mut self, requested: vk::Extent2D) -> Result<vk::Extent2D> {
            Ok(requested)
        }
        fn create_swapchain(&mut self, requested: vk::Extent2D) -> Result<vk::Extent2D> {
            self.swapchains += 1;
            Ok(requested)
        }
        fn create_render_targets(&mut self, _: u64) -> Result<()> { Ok(()) }
        fn create_pipeline(&mut self) -> Result<()> {
            self.pipelines += 1;
            Ok(())
        }
        fn recycle_sync(&mut self, slot: usize) -> Result<()> {
            self.recycled.push(slot);
            Ok(())
        }
        fn wait_for_slot(&mut self, _: usize) -> VkResult<()> { Ok(()) }
        fn acquire_image(&mut self, slot: usize) -> VkResult<(u32, vk::SuccessCode)> {
            Ok((slot as u32, vk::SuccessCode::SUCCESS))
        }
        fn reset_slot(&mut self, slot: usize) -> VkResult<()> {
            self.reset.push(slot);
            Ok(())
        }
        fn record(&mut self, _: usize, _: u32) -> Result<()> { Ok(()) }
        fn submit(&mut self, _: usize) -> VkResult<()> { Ok(()) }
        fn present(&mut self, _: usize, _: u32) -> VkResult<vk::SuccessCode> {
            Ok(vk::SuccessCode::SUCCESS)
        }
    }

    #[test]
    fn frame_index_cycles_through_slots() {
        let mut backend = Counting::default();
        let mut frames = FrameLoop::new(extent(800, 600));
        frames.build(&mut backend).unwrap();

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(frames.frame_index());
            assert_eq!(frames.tick(&mut backend).unwrap(), FrameOutcome::Presented);
        }

        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
        assert_eq!(backend.reset, vec![0, 1, 0, 1, 0]);
        assert_eq!(frames.phase(), FramePhase::Idle);
    }

    #[test]
    fn build_creates_generation_one() {
        let mut backend = Counting::default();
        let mut frames = FrameLoop::new(extent(800, 600));
        assert_eq!(frames.swapchain_phase(), SwapchainPhase::Uninitialized);

        frames.build(&mut backend).unwrap();
        assert_eq!(frames.swapchain_phase(), SwapchainPhase::Built);
        assert_eq!(frames.generation(), 1);
        assert_eq!(frames.extent(), extent(800, 600));
        assert_eq!(frames.stats().recreations, 0);
    }

    #[test]
    fn degenerate_initial_size_defers_build() {
        let mut backend = Counting::default();
        let mut frames = FrameLoop::new(extent(0, 600));
        frames.build(&mut backend).unwrap();

        assert_eq!(frames.tick(&mut backend).unwrap(), FrameOutcome::Deferred);
        assert_eq!(backend.swapchains, 0);

        frames.notify_resize(640, 480);
        assert_eq!(frames.tick(&mut backend).unwrap(), FrameOutcome::Presented);
        assert_eq!(backend.swapchains, 1);
        assert_eq!(frames.generation(), 1);
    }

    #[test]
    fn resize_before_build_keeps_uninitialized() {
        let mut frames = FrameLoop::new(extent(800, 600));
        frames.notify_resize(1024, 768);
        assert_eq!(frames.swapchain_phase(), SwapchainPhase::Uninitialized);
        assert_eq!(frames.requested_extent(), extent(1024, 768));
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut backend = Counting::default();
        let mut frames = FrameLoop::new(extent(800, 600));
        frames.build(&mut backend).unwrap();

        frames.teardown(&mut backend).unwrap();
        frames.teardown(&mut backend).unwrap();
        assert_eq!(frames.swapchain_phase(), SwapchainPhase::Uninitialized);
    }

    #[test]
    fn degenerate_extents() {
        assert!(is_degenerate(extent(0, 0)));
        assert!(is_degenerate(extent(0, 10)));
        assert!(is_degenerate(extent(10, 0)));
        assert!(!is_degenerate(extent(1, 1)));
    }

    #[test]
    fn fatal_maps_device_lost() {
        let error = fatal("fence wait", vk::ErrorCode::DEVICE_LOST);
        assert!(matches!(
            error.downcast_ref::<RenderError>(),
            Some(RenderError::DeviceLost("fence wait"))
        ));

        let error = fatal("fence reset", vk::ErrorCode::OUT_OF_HOST_MEMORY);
        assert!(error.downcast_ref::<RenderError>().is_none());
    }
}
