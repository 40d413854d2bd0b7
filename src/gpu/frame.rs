use super::{Driver, GPUError, Result};
use crate::utils::PerFrame;

/// A native object whose release waits for the GPU to finish with it.
pub(crate) enum Staged<D: Driver> {
    Texture(D::Texture),
    Buffer(D::Buffer),
    Shader(D::Shader),
    Pipeline(D::Pipeline),
    AccelerationStructure(D::AccelerationStructure),
}

impl<D: Driver> Staged<D> {
    fn release(self, driver: &mut D) {
        match self {
            Staged::Texture(t) => driver.destroy_texture(t),
            Staged::Buffer(b) => driver.destroy_buffer(b),
            Staged::Shader(s) => driver.destroy_shader(s),
            Staged::Pipeline(p) => driver.destroy_pipeline(p),
            Staged::AccelerationStructure(a) => driver.destroy_acceleration_structure(a),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Recording,
    Submitted,
}

pub(crate) struct Frame<D: Driver> {
    commands: D::CommandList,
    state: FrameState,
    staging: Vec<Staged<D>>,
}

impl<D: Driver> Frame<D> {
    fn wait(&mut self, driver: &mut D) -> Result<bool> {
        if self.state != FrameState::Submitted {
            return Ok(false);
        }
        driver.wait(&mut self.commands)?;
        self.state = FrameState::Idle;
        Ok(true)
    }

    fn release_staging(&mut self, driver: &mut D) -> u64 {
        debug_assert_ne!(self.state, FrameState::Submitted);
        let count = self.staging.len() as u64;
        for obj in self.staging.drain(..) {
            obj.release(driver);
        }
        count
    }
}

/// Work done while recycling frame slots.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Recycled {
    pub fence_waits: u64,
    pub released: u64,
}

impl std::ops::AddAssign for Recycled {
    fn add_assign(&mut self, rhs: Self) {
        self.fence_waits += rhs.fence_waits;
        self.released += rhs.released;
    }
}

/// Ring of in-flight frames: one command list, fence and deferred
/// destruction queue per slot.
pub(crate) struct FrameRing<D: Driver> {
    frames: PerFrame<Frame<D>>,
    frame_number: u64,
}

impl<D: Driver> FrameRing<D> {
    pub fn new(driver: &mut D, count: usize) -> Result<Self> {
        let frames = PerFrame::try_from_fn(count, |i| {
            Ok::<_, GPUError>(Frame {
                commands: driver.create_command_list(i)?,
                state: FrameState::Idle,
                staging: Vec::new(),
            })
        })?;
        Ok(Self {
            frames,
            frame_number: 0,
        })
    }

    pub fn index(&self) -> usize {
        self.frames.curr_idx()
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn state(&self) -> FrameState {
        self.frames.curr().state
    }

    pub fn commands(&mut self) -> &mut D::CommandList {
        let frame = self.frames.curr_mut();
        assert_eq!(
            frame.state,
            FrameState::Recording,
            "recording into a frame that is not open"
        );
        &mut frame.commands
    }

    pub fn stage(&mut self, obj: Staged<D>) {
        self.frames.curr_mut().staging.push(obj);
    }

    pub fn pending(&self) -> u64 {
        let mut count = 0;
        for i in 0..self.frames.len() {
            count += self.frames.get(i).staging.len() as u64;
        }
        count
    }

    pub fn begin(&mut self, driver: &mut D) -> Result<()> {
        let frame = self.frames.curr_mut();
        assert_eq!(frame.state, FrameState::Idle, "frame begun twice");
        driver.begin(&mut frame.commands)?;
        frame.state = FrameState::Recording;
        log::trace!("frame {} recording in slot {}", self.frame_number, self.index());
        Ok(())
    }

    pub fn submit(&mut self, driver: &mut D, present: bool) -> Result<()> {
        let frame = self.frames.curr_mut();
        assert_eq!(frame.state, FrameState::Recording, "submitting a frame that is not recording");
        driver.submit(&mut frame.commands, present)?;
        frame.state = FrameState::Submitted;
        Ok(())
    }

    /// Moves to the next slot: waits for its previous submission, opens it
    /// for recording and only then releases what it deferred.
    pub fn advance(&mut self, driver: &mut D) -> Result<Recycled> {
        self.frames.advance_next_frame();
        self.frame_number += 1;
        let frame = self.frames.curr_mut();
        let waited = frame.wait(driver)?;
        self.begin(driver)?;
        let released = self.frames.curr_mut().release_staging(driver);
        if released > 0 {
            log::trace!("released {} deferred objects from slot {}", released, self.index());
        }
        Ok(Recycled {
            fence_waits: waited as u64,
            released,
        })
    }

    /// Waits for every submitted slot and releases all deferred objects.
    pub fn wait_all(&mut self, driver: &mut D) -> Result<Recycled> {
        let mut recycled = Recycled::default();
        for i in 0..self.frames.len() {
            let frame = self.frames.get_mut(i);
            recycled.fence_waits += frame.wait(driver)? as u64;
            recycled.released += frame.release_staging(driver);
        }
        Ok(recycled)
    }

    pub fn destroy(&mut self, driver: &mut D) -> Result<()> {
        self.wait_all(driver)?;
        for frame in self.frames.drain() {
            driver.destroy_command_list(frame.commands);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDriver;
    use crate::gpu::BufferKind;

    #[test]
    fn staged_objects_wait_for_their_slot_to_come_around() {
        let mut driver = SoftwareDriver::new(4, 4);
        let mut ring = FrameRing::new(&mut driver, 2).unwrap();
        ring.begin(&mut driver).unwrap();
        assert_eq!(ring.state(), FrameState::Recording);

        let buffer = driver.create_buffer(BufferKind::Vertex, 16).unwrap();
        ring.stage(Staged::Buffer(buffer));
        ring.submit(&mut driver, false).unwrap();

        let first = ring.advance(&mut driver).unwrap();
        assert_eq!(first, Recycled::default());
        assert_eq!((ring.index(), ring.pending()), (1, 1));

        ring.submit(&mut driver, false).unwrap();
        let second = ring.advance(&mut driver).unwrap();
        assert_eq!(
            second,
            Recycled {
                fence_waits: 1,
                released: 1
            }
        );
        assert_eq!((ring.index(), ring.frame_number(), ring.pending()), (0, 2, 0));
        ring.destroy(&mut driver).unwrap();
    }

    #[test]
    fn wait_all_releases_every_slot() {
        let mut driver = SoftwareDriver::new(4, 4);
        let mut ring = FrameRing::new(&mut driver, 3).unwrap();
        ring.begin(&mut driver).unwrap();
        for _ in 0..2 {
            let buffer = driver.create_buffer(BufferKind::Uniform, 64).unwrap();
            ring.stage(Staged::Buffer(buffer));
        }
        ring.submit(&mut driver, false).unwrap();

        let recycled = ring.wait_all(&mut driver).unwrap();
        assert_eq!(recycled.fence_waits, 1);
        assert_eq!(recycled.released, 2);
        assert_eq!(ring.state(), FrameState::Idle);
        ring.destroy(&mut driver).unwrap();
    }
}
