/// Fixed ring of per-frame values, one per frame in flight.
pub struct PerFrame<T> {
    frames: Vec<T>,
    curr_frame: usize,
}

impl<T> PerFrame<T> {
    pub fn try_from_fn<F, E>(num_frames: usize, mut make: F) -> Result<Self, E>
    where
        F: FnMut(usize) -> Result<T, E>,
    {
        assert!(num_frames > 0, "at least one frame slot is required");
        let mut frames = Vec::with_capacity(num_frames);
        for i in 0..num_frames {
            frames.push(make(i)?);
        }
        Ok(Self {
            frames,
            curr_frame: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn curr(&self) -> &T {
        &self.frames[self.curr_frame]
    }

    pub fn curr_mut(&mut self) -> &mut T {
        &mut self.frames[self.curr_frame]
    }

    pub fn curr_idx(&self) -> usize {
        self.curr_frame
    }

    pub fn get(&self, idx: usize) -> &T {
        &self.frames[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut T {
        &mut self.frames[idx]
    }

    pub fn advance_next_frame(&mut self) {
        self.curr_frame = (self.curr_frame + 1) % self.frames.len();
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, T> {
        self.curr_frame = 0;
        self.frames.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_wraps() {
        let mut ring = PerFrame::try_from_fn(3, |i| Ok::<_, ()>(i * 10)).unwrap();
        assert_eq!(*ring.curr(), 0);
        ring.advance_next_frame();
        ring.advance_next_frame();
        assert_eq!(*ring.curr(), 20);
        ring.advance_next_frame();
        assert_eq!(ring.curr_idx(), 0);
    }

    #[test]
    fn construction_stops_at_first_error() {
        let mut built = 0;
        let ring = PerFrame::try_from_fn(4, |i| {
            built += 1;
            if i == 1 {
                Err("slot 1")
            } else {
                Ok(i)
            }
        });
        assert_eq!(ring.err(), Some("slot 1"));
        assert_eq!(built, 2);
    }
}
