//! Well descriptions, well state initialisation and control switching.
//!
//! The AD well equations live in [`equations`], the hydrostatic connection pressure drops in
//! [`density`].

pub mod density;
pub mod equations;
mod vfp;

use ad::AdMatrix;
use nalgebra::DVector;
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

pub use vfp::{FloType, VfpTable};

use crate::{
    phases::{Phase, PhaseUsage},
    state::{ReservoirState, WellState},
    Error,
};

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WellType {
    Injector,
    Producer,
}

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Perforation {
    pub cell: usize,
    /// connection transmissibility factor
    pub well_index: f64,
    pub depth: f64,
}

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlKind {
    Bhp,
    /// sum of the selected phase surface rates
    SurfaceRate,
    /// total reservoir volume rate
    ReservoirRate,
    /// tubing-head pressure through VFP table `table`
    Thp { table: usize },
    /// injection of `fraction` of the reservoir voidage of the producers of the well's group
    GroupVoidage { fraction: f64 },
}

/// A constraint of a well. Rate targets are magnitudes.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct WellControl {
    pub kind: ControlKind,
    pub target: f64,
    /// canonical phases counted by a surface rate control
    pub phases: [bool; 3],
}

impl WellControl {
    pub fn bhp(target: f64) -> Self {
        WellControl {
            kind: ControlKind::Bhp,
            target,
            phases: [false; 3],
        }
    }

    pub fn surface_rate(target: f64, phases: &[Phase]) -> Self {
        let mut sel = [false; 3];
        for p in phases {
            sel[p.index()] = true;
        }
        WellControl {
            kind: ControlKind::SurfaceRate,
            target,
            phases: sel,
        }
    }

    pub fn reservoir_rate(target: f64) -> Self {
        WellControl {
            kind: ControlKind::ReservoirRate,
            target,
            phases: [true; 3],
        }
    }

    pub fn thp(target: f64, table: usize) -> Self {
        WellControl {
            kind: ControlKind::Thp { table },
            target,
            phases: [false; 3],
        }
    }

    pub fn group_voidage(fraction: f64) -> Self {
        WellControl {
            kind: ControlKind::GroupVoidage { fraction },
            target: 0.0,
            phases: [true; 3],
        }
    }

    fn is_pressure(&self) -> bool {
        matches!(self.kind, ControlKind::Bhp | ControlKind::Thp { .. })
    }
}

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct WellSpec {
    pub name: String,
    pub well_type: WellType,
    /// depth the bottom-hole pressure refers to
    pub ref_depth: f64,
    pub perforations: Vec<Perforation>,
    /// the first control is active initially
    pub controls: Vec<WellControl>,
    /// surface volume fractions of the injected fluid
    pub injection_composition: [f64; 3],
    pub group: Option<String>,
}

impl WellSpec {
    pub fn producer(name: &str, ref_depth: f64) -> Self {
        WellSpec {
            name: name.to_string(),
            well_type: WellType::Producer,
            ref_depth,
            perforations: Vec::new(),
            controls: Vec::new(),
            injection_composition: [0.0; 3],
            group: None,
        }
    }

    pub fn injector(name: &str, ref_depth: f64, phase: Phase) -> Self {
        let mut composition = [0.0; 3];
        composition[phase.index()] = 1.0;
        WellSpec {
            well_type: WellType::Injector,
            injection_composition: composition,
            ..WellSpec::producer(name, ref_depth)
        }
    }

    pub fn perforate(mut self, cell: usize, well_index: f64, depth: f64) -> Self {
        self.perforations.push(Perforation {
            cell,
            well_index,
            depth,
        });
        self
    }

    pub fn with_control(mut self, control: WellControl) -> Self {
        self.controls.push(control);
        self
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn is_injector(&self) -> bool {
        self.well_type == WellType::Injector
    }
}

/// The wells of a run with their perforation topology.
#[derive(Clone, Debug)]
pub struct Wells {
    specs: Vec<WellSpec>,
    vfp: Vec<VfpTable>,
    perf_cells: Vec<usize>,
    perf_well: Vec<usize>,
    perf_offsets: Vec<usize>,
    well_index: DVector<f64>,
    perf_depth: DVector<f64>,
    /// `nperf × nw`, copies well values to their perforations
    to_perfs: AdMatrix,
    /// `nw × nperf`, sums perforation values per well
    sum_perfs: AdMatrix,
}

impl Wells {
    pub fn new(specs: Vec<WellSpec>, vfp: Vec<VfpTable>, num_cells: usize) -> Result<Self, Error> {
        let infeasible = |w: &WellSpec, reason: String| Error::WellControlInfeasible {
            well: w.name.clone(),
            reason,
        };
        let mut perf_cells = Vec::new();
        let mut perf_well = Vec::new();
        let mut perf_offsets = vec![0];
        let mut wi = Vec::new();
        let mut depth = Vec::new();
        for (w, spec) in specs.iter().enumerate() {
            if spec.controls.is_empty() {
                return Err(infeasible(spec, "no controls".into()));
            }
            if spec.perforations.is_empty() {
                return Err(infeasible(spec, "no perforations".into()));
            }
            for c in &spec.controls {
                match c.kind {
                    ControlKind::Thp { table } if table >= vfp.len() => {
                        return Err(infeasible(spec, format!("missing VFP table {table}")));
                    }
                    ControlKind::GroupVoidage { .. } if spec.group.is_none() => {
                        return Err(infeasible(spec, "voidage control outside a group".into()));
                    }
                    ControlKind::GroupVoidage { fraction } if fraction.is_nan() || fraction < 0.0 => {
                        return Err(infeasible(spec, format!("voidage fraction {fraction}")));
                    }
                    _ if !c.target.is_finite() || c.target < 0.0 => {
                        return Err(infeasible(spec, format!("control target {}", c.target)));
                    }
                    _ => {}
                }
            }
            if spec.is_injector() && spec.injection_composition.iter().sum::<f64>() <= 0.0 {
                return Err(infeasible(spec, "empty injection composition".into()));
            }
            for perf in &spec.perforations {
                if perf.cell >= num_cells {
                    return Err(infeasible(spec, format!("perforation in missing cell {}", perf.cell)));
                }
                perf_cells.push(perf.cell);
                perf_well.push(w);
                wi.push(perf.well_index);
                depth.push(perf.depth);
            }
            perf_offsets.push(perf_cells.len());
        }
        let nw = specs.len();
        let np = perf_cells.len();
        let triplets: Vec<(usize, usize, f64)> =
            perf_well.iter().enumerate().map(|(k, &w)| (k, w, 1.0)).collect();
        let to_perfs = AdMatrix::from_triplets(np, nw, &triplets);
        Ok(Wells {
            sum_perfs: to_perfs.transpose(),
            to_perfs,
            specs,
            vfp,
            perf_cells,
            perf_well,
            perf_offsets,
            well_index: DVector::from_vec(wi),
            perf_depth: DVector::from_vec(depth),
        })
    }

    pub fn none() -> Self {
        Wells {
            specs: Vec::new(),
            vfp: Vec::new(),
            perf_cells: Vec::new(),
            perf_well: Vec::new(),
            perf_offsets: vec![0],
            well_index: DVector::zeros(0),
            perf_depth: DVector::zeros(0),
            to_perfs: AdMatrix::zeros(0, 0),
            sum_perfs: AdMatrix::zeros(0, 0),
        }
    }

    pub fn num_wells(&self) -> usize {
        self.specs.len()
    }

    pub fn num_perforations(&self) -> usize {
        self.perf_cells.len()
    }

    pub fn specs(&self) -> &[WellSpec] {
        &self.specs
    }

    pub fn vfp(&self, table: usize) -> Option<&VfpTable> {
        self.vfp.get(table)
    }

    pub fn perf_cells(&self) -> &[usize] {
        &self.perf_cells
    }

    /// Owning well of every perforation.
    pub fn perf_well(&self) -> &[usize] {
        &self.perf_well
    }

    pub fn perf_range(&self, w: usize) -> std::ops::Range<usize> {
        self.perf_offsets[w]..self.perf_offsets[w + 1]
    }

    pub fn well_index(&self) -> &DVector<f64> {
        &self.well_index
    }

    pub fn perf_depth(&self) -> &DVector<f64> {
        &self.perf_depth
    }

    pub fn to_perfs(&self) -> &AdMatrix {
        &self.to_perfs
    }

    pub fn sum_perfs(&self) -> &AdMatrix {
        &self.sum_perfs
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.specs.iter().position(|s| s.name == name)
    }

    /// Initial well state: pressure controlled wells start at their target, the others at the
    /// pressure of their first perforated cell; rate controlled wells start at their target.
    pub fn initial_state(&self, pu: &PhaseUsage, state: &ReservoirState) -> Result<WellState, Error> {
        let nw = self.num_wells();
        let np = pu.num_phases();
        let mut ws = WellState {
            bhp: DVector::zeros(nw),
            surface_rates: DVector::zeros(np * nw),
            perf_rates: DVector::zeros(np * self.num_perforations()),
            perf_pressures: DVector::zeros(self.num_perforations()),
            current_control: vec![0; nw],
        };
        for (w, spec) in self.specs.iter().enumerate() {
            let p_cell = state.pressure[self.perf_cells[self.perf_offsets[w]]];
            ws.bhp[w] = if spec.is_injector() {
                1.01 * p_cell
            } else {
                0.99 * p_cell
            };
            self.apply_control_target(pu, &mut ws, w, None)?;
            for k in self.perf_range(w) {
                ws.perf_pressures[k] = ws.bhp[w];
            }
        }
        Ok(ws)
    }

    /// Moves the well unknowns of `w` onto the target of its current control. `voidage` is the
    /// target of a group voidage control when known.
    fn apply_control_target(
        &self,
        pu: &PhaseUsage,
        ws: &mut WellState,
        w: usize,
        voidage: Option<f64>,
    ) -> Result<(), Error> {
        let spec = &self.specs[w];
        let ctrl = &spec.controls[ws.current_control[w]];
        let sign = if spec.is_injector() { 1.0 } else { -1.0 };
        let phases = pu.active_phases();
        match ctrl.kind {
            ControlKind::Bhp => ws.bhp[w] = ctrl.target,
            ControlKind::Thp { table } => {
                let t = self.vfp(table).ok_or_else(|| Error::WellControlInfeasible {
                    well: spec.name.clone(),
                    reason: format!("missing VFP table {table}"),
                })?;
                ws.bhp[w] = t.bhp(t.flo(&canonical_rates(pu, ws, w)), ctrl.target).0;
            }
            ControlKind::SurfaceRate | ControlKind::ReservoirRate | ControlKind::GroupVoidage { .. } => {
                let target = match ctrl.kind {
                    ControlKind::GroupVoidage { .. } => voidage.unwrap_or(0.0),
                    _ => ctrl.target,
                };
                let selected: Vec<bool> = phases
                    .iter()
                    .map(|p| match ctrl.kind {
                        ControlKind::SurfaceRate => ctrl.phases[p.index()],
                        _ => true,
                    })
                    .collect();
                let current: f64 = (0..phases.len())
                    .filter(|&i| selected[i])
                    .map(|i| ws.rate(i, w))
                    .sum();
                if current.abs() > 0.0 && current * sign > 0.0 {
                    // keep the phase split, scale to the target
                    let scale = sign * target / current;
                    for i in 0..phases.len() {
                        let q = ws.rate(i, w);
                        ws.set_rate(i, w, q * scale);
                    }
                } else {
                    let weights: Vec<f64> = phases
                        .iter()
                        .zip(&selected)
                        .map(|(p, &s)| {
                            let wgt = if spec.is_injector() {
                                spec.injection_composition[p.index()]
                            } else {
                                1.0
                            };
                            if s {
                                wgt
                            } else {
                                0.0
                            }
                        })
                        .collect();
                    let total: f64 = weights.iter().sum();
                    if total > 0.0 {
                        for (i, wgt) in weights.iter().enumerate() {
                            ws.set_rate(i, w, sign * target * wgt / total);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Checks every well against all its constraints and switches to the most violated one.
    ///
    /// `reservoir_rate[w]` converts the surface rates of well `w` into its reservoir volume
    /// rate (positive into the reservoir) and `voidage[w]` is the group voidage target of `w`.
    /// Returns the number of wells that switched. A second call without a change of the state
    /// switches nothing.
    pub fn update_controls(
        &self,
        pu: &PhaseUsage,
        ws: &mut WellState,
        reservoir_rate: &[[f64; 3]],
        voidage: &[f64],
    ) -> Result<usize, Error> {
        let mut switched = 0;
        for (w, spec) in self.specs.iter().enumerate() {
            let current = ws.current_control[w];
            let rates = canonical_rates(pu, ws, w);
            let mut worst: Option<(usize, f64)> = None;
            for (i, ctrl) in spec.controls.iter().enumerate() {
                if i == current {
                    continue;
                }
                let v = self.violation(spec, ctrl, ws.bhp[w], &rates, &reservoir_rate[w], voidage[w]);
                if v > 0.0 && worst.map_or(true, |(_, wv)| v > wv) {
                    worst = Some((i, v));
                }
            }
            if let Some((i, v)) = worst {
                log::warn!(
                    "well {}: switching control {:?} -> {:?} (violation {:.3e})",
                    spec.name,
                    spec.controls[current].kind,
                    spec.controls[i].kind,
                    v
                );
                ws.current_control[w] = i;
                self.apply_control_target(pu, ws, w, Some(voidage[w]))?;
                switched += 1;
            }
        }
        Ok(switched)
    }

    /// Relative violation of `ctrl`, positive when broken.
    fn violation(
        &self,
        spec: &WellSpec,
        ctrl: &WellControl,
        bhp: f64,
        rates: &[f64; 3],
        reservoir_rate: &[f64; 3],
        voidage: f64,
    ) -> f64 {
        let injector = spec.is_injector();
        if ctrl.is_pressure() {
            let limit = match ctrl.kind {
                ControlKind::Thp { table } => match self.vfp(table) {
                    Some(t) => t.bhp(t.flo(rates), ctrl.target).0,
                    None => return 0.0,
                },
                _ => ctrl.target,
            };
            let excess = if injector { bhp - limit } else { limit - bhp };
            return excess / limit.abs().max(f64::MIN_POSITIVE);
        }
        let (value, target) = match ctrl.kind {
            ControlKind::SurfaceRate => (
                Phase::ALL
                    .iter()
                    .filter(|p| ctrl.phases[p.index()])
                    .map(|p| rates[p.index()])
                    .sum::<f64>(),
                ctrl.target,
            ),
            ControlKind::ReservoirRate => (reservoir_rate.iter().sum::<f64>(), ctrl.target),
            _ => (reservoir_rate.iter().sum::<f64>(), voidage),
        };
        // rates flow in the direction of the well type
        let magnitude = if injector { value } else { -value };
        (magnitude - target) / target.abs().max(f64::MIN_POSITIVE)
    }
}

/// Rates of well `w` in canonical phase order.
pub fn canonical_rates(pu: &PhaseUsage, ws: &WellState, w: usize) -> [f64; 3] {
    let mut q = [0.0; 3];
    for p in Phase::ALL {
        if let Some(i) = pu.pos(p) {
            q[p.index()] = ws.rate(i, w);
        }
    }
    q
}
