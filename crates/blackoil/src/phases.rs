//! Phase enumeration and the mapping from canonical phases to active positions.

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::Error;

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Water = 0,
    Oil = 1,
    Gas = 2,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Water, Phase::Oil, Phase::Gas];

    /// Canonical index (water 0, oil 1, gas 2).
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Water => "water",
            Phase::Oil => "oil",
            Phase::Gas => "gas",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which phases take part in a run, and where each one sits among the active phases.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseUsage {
    active: [bool; 3],
    pos: [Option<usize>; 3],
    num_phases: usize,
}

impl PhaseUsage {
    /// Accepted sets are {water}, {oil}, {gas}, {water, oil}, {oil, gas} and {water, oil, gas}.
    pub fn new(water: bool, oil: bool, gas: bool) -> Result<Self, Error> {
        let active = [water, oil, gas];
        let num_phases = active.iter().filter(|&&a| a).count();
        if num_phases == 0 {
            return Err(Error::Config("no active phase".into()));
        }
        if water && gas && !oil {
            return Err(Error::Config(
                "the water-gas phase set is not supported".into(),
            ));
        }
        let mut pos = [None; 3];
        let mut next = 0;
        for (i, &a) in active.iter().enumerate() {
            if a {
                pos[i] = Some(next);
                next += 1;
            }
        }
        Ok(PhaseUsage {
            active,
            pos,
            num_phases,
        })
    }

    pub fn three_phase() -> Self {
        PhaseUsage {
            active: [true; 3],
            pos: [Some(0), Some(1), Some(2)],
            num_phases: 3,
        }
    }

    pub fn water_oil() -> Self {
        PhaseUsage {
            active: [true, true, false],
            pos: [Some(0), Some(1), None],
            num_phases: 2,
        }
    }

    pub fn oil_gas() -> Self {
        PhaseUsage {
            active: [false, true, true],
            pos: [None, Some(0), Some(1)],
            num_phases: 2,
        }
    }

    pub fn single(phase: Phase) -> Self {
        let mut active = [false; 3];
        let mut pos = [None; 3];
        active[phase.index()] = true;
        pos[phase.index()] = Some(0);
        PhaseUsage {
            active,
            pos,
            num_phases: 1,
        }
    }

    pub fn num_phases(&self) -> usize {
        self.num_phases
    }

    pub fn is_active(&self, phase: Phase) -> bool {
        self.active[phase.index()]
    }

    /// Position of `phase` among the active phases.
    pub fn pos(&self, phase: Phase) -> Option<usize> {
        self.pos[phase.index()]
    }

    /// Like [`PhaseUsage::pos`], failing with `PhaseNotPresent`.
    pub fn position(&self, phase: Phase) -> Result<usize, Error> {
        self.pos(phase).ok_or(Error::PhaseNotPresent(phase))
    }

    pub fn active_phases(&self) -> Vec<Phase> {
        Phase::ALL
            .iter()
            .copied()
            .filter(|&p| self.is_active(p))
            .collect()
    }

    /// Canonical phase at active position `pos`.
    pub fn phase_at(&self, pos: usize) -> Option<Phase> {
        Phase::ALL.iter().copied().find(|&p| self.pos(p) == Some(pos))
    }

    /// Number of primary variables per cell.
    pub fn num_cell_vars(&self) -> usize {
        self.num_phases
    }

    /// Index of the water saturation among the cell variables.
    pub fn sw_var(&self) -> Option<usize> {
        (self.is_active(Phase::Water) && self.num_phases > 1).then_some(1)
    }

    /// Index of the composite hydrocarbon variable (`S_g`, `R_s` or `R_v`).
    pub fn x_var(&self) -> Option<usize> {
        (self.is_active(Phase::Oil) && self.is_active(Phase::Gas)).then_some(self.num_phases - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions() {
        let pu = PhaseUsage::new(false, true, true).unwrap();
        assert_eq!(pu, PhaseUsage::oil_gas());
        assert_eq!(pu.pos(Phase::Oil), Some(0));
        assert_eq!(pu.pos(Phase::Gas), Some(1));
        assert_eq!(pu.sw_var(), None);
        assert_eq!(pu.x_var(), Some(1));
        assert!(matches!(
            pu.position(Phase::Water),
            Err(Error::PhaseNotPresent(Phase::Water))
        ));
    }

    #[test]
    fn test_variable_slots() {
        let pu = PhaseUsage::three_phase();
        assert_eq!(pu.sw_var(), Some(1));
        assert_eq!(pu.x_var(), Some(2));
        assert_eq!(pu.phase_at(2), Some(Phase::Gas));

        let pu = PhaseUsage::water_oil();
        assert_eq!(pu.sw_var(), Some(1));
        assert_eq!(pu.x_var(), None);

        let pu = PhaseUsage::single(Phase::Water);
        assert_eq!(pu.num_cell_vars(), 1);
        assert_eq!(pu.sw_var(), None);
    }

    #[test]
    fn test_rejected_sets() {
        assert!(PhaseUsage::new(false, false, false).is_err());
        assert!(PhaseUsage::new(true, false, true).is_err());
    }
}
