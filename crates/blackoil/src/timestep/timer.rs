/// Simulated time within one report step.
#[derive(Clone, Debug, PartialEq)]
pub struct SubStepTimer {
    start: f64,
    end: f64,
    time: f64,
    steps: usize,
}

impl SubStepTimer {
    pub fn new(start: f64, length: f64) -> Self {
        SubStepTimer {
            start,
            end: start + length,
            time: start,
            steps: 0,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Time advanced since the start of the report step.
    pub fn elapsed(&self) -> f64 {
        self.time - self.start
    }

    pub fn remaining(&self) -> f64 {
        self.end - self.time
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn done(&self) -> bool {
        self.time >= self.end
    }

    /// The sub-step to take when `dt` is proposed: the remainder if `1.05·dt` would reach
    /// past it, half the remainder if `1.5·dt` would, `dt` otherwise.
    pub fn step_length(&self, dt: f64) -> f64 {
        let remaining = self.remaining();
        if 1.05 * dt > remaining {
            remaining
        } else if 1.5 * dt > remaining {
            0.5 * remaining
        } else {
            dt
        }
    }

    /// Moves the clock forward; a step covering the remainder lands exactly on the end.
    pub fn advance(&mut self, dt: f64) {
        if dt >= self.remaining() {
            self.time = self.end;
        } else {
            self.time += dt;
        }
        self.steps += 1;
    }
}
