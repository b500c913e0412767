/// Which cell buffer the next compute pass reads from. The other one is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    A,
    B,
}

impl Source {
    pub fn flipped(self) -> Source {
        match self {
            Source::A => Source::B,
            Source::B => Source::A,
        }
    }

    pub fn destination(self) -> Source {
        self.flipped()
    }
}

/// Host-side per-frame bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameState {
    source: Source,
    whole_time: u32,
    timestep: u32,
}

impl FrameState {
    pub fn new(timestep: u32) -> Self {
        Self {
            source: Source::A,
            whole_time: 0,
            timestep: timestep.max(1),
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// True once the buffers have swapped roles, i.e. when B is the source.
    pub fn flipped(&self) -> bool {
        self.source == Source::B
    }

    pub fn whole_time(&self) -> u32 {
        self.whole_time
    }

    pub fn timestep(&self) -> u32 {
        self.timestep
    }

    pub fn set_timestep(&mut self, timestep: u32) {
        self.timestep = timestep.max(1);
        self.whole_time %= self.timestep;
    }

    /// Called once per submitted tick.
    pub fn advance(&mut self) {
        self.source = self.source.flipped();
        self.whole_time = (self.whole_time + 1) % self.timestep;
    }

    /// Back to the post-allocation state; the timestep is a parameter and survives.
    pub fn reset(&mut self) {
        self.source = Source::A;
        self.whole_time = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_alternates_every_tick() {
        let mut frame = FrameState::new(1);
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(frame.source());
            frame.advance();
        }
        use Source::*;
        assert_eq!(seen, [A, B, A, B, A]);
    }

    #[test]
    fn whole_time_wraps_at_timestep() {
        let mut frame = FrameState::new(3);
        let mut seen = Vec::new();
        for _ in 0..7 {
            frame.advance();
            seen.push(frame.whole_time());
        }
        assert_eq!(seen, [1, 2, 0, 1, 2, 0, 1]);
    }

    #[test]
    fn shrinking_timestep_rewraps() {
        let mut frame = FrameState::new(10);
        for _ in 0..7 {
            frame.advance();
        }
        frame.set_timestep(4);
        assert_eq!(frame.whole_time(), 3);
        frame.set_timestep(0);
        assert_eq!(frame.timestep(), 1);
        assert_eq!(frame.whole_time(), 0);
    }

    #[test]
    fn reset_keeps_timestep() {
        let mut frame = FrameState::new(5);
        frame.advance();
        frame.reset();
        assert_eq!(frame, FrameState::new(5));
        assert!(!frame.flipped());
    }
}
