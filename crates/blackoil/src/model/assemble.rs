//! Residual assembly: accumulation, connection fluxes and the well equations.

use ad::{subset, subset_vec, superset, AutoDiffBlock};
use linear::LinearSystem;
use nalgebra::DVector;

use super::{convergence::average_inverse_fvf, BlackoilModel};
use crate::{
    ops::{multiphase_selectors, UpwindSelector},
    phases::Phase,
    primary::{cell_values, PrimaryMasks},
    state::{HydroCarbonState, WellState},
    wells::{
        canonical_rates,
        density::{connection_pressure_drops, PerfFluid},
        equations::{
            control_residual, flux_residual, perforation_rates, reservoir_coefficients,
            wellbore_mix, PerfInputs,
        },
        ControlKind,
    },
    Error,
};

type Adb = AutoDiffBlock;

/// Cell unknowns as expressions, saturations in canonical order.
pub(crate) struct SolutionState {
    pub p: Adb,
    pub sat: [Adb; 3],
    pub rs: Adb,
    pub rv: Adb,
}

/// Phase quantities per active phase position.
pub(crate) struct PhaseProps {
    pub pressure: Vec<Adb>,
    pub b: Vec<Adb>,
    pub mob: Vec<Adb>,
    pub rho: Vec<Adb>,
}

/// Residual of the last assembly.
#[derive(Clone, Debug)]
pub(crate) struct Residual {
    /// mass balance per active phase, surface volume per second
    pub mass: Vec<Adb>,
    pub well_flux: Option<Adb>,
    pub well_control: Option<Adb>,
    pub control_scale: DVector<f64>,
}

impl Default for Residual {
    fn default() -> Self {
        Residual {
            mass: Vec::new(),
            well_flux: None,
            well_control: None,
            control_scale: DVector::zeros(0),
        }
    }
}

/// Per-well conversion to reservoir volumes and group voidage targets.
#[derive(Clone, Debug, Default)]
pub(crate) struct WellTargets {
    pub coefficients: Vec<[f64; 3]>,
    pub voidage: Vec<f64>,
}

impl WellTargets {
    /// Reservoir volume rates per canonical phase, positive into the reservoir.
    pub fn reservoir_rates(&self, model: &BlackoilModel, ws: &WellState) -> Vec<[f64; 3]> {
        self.coefficients
            .iter()
            .enumerate()
            .map(|(w, coef)| {
                let q = canonical_rates(&model.pu, ws, w);
                [coef[0] * q[0], coef[1] * q[1], coef[2] * q[2]]
            })
            .collect()
    }
}

pub(crate) struct WellEquations {
    /// production positive surface rates per active phase and perforation
    pub cq_s: Vec<Adb>,
    pub flux: Adb,
    pub control: Adb,
    pub control_scale: DVector<f64>,
    pub cdp: DVector<f64>,
}

impl BlackoilModel {
    fn saturated(&self) -> Vec<bool> {
        self.state
            .hydrocarbon_state
            .iter()
            .map(|&h| h == HydroCarbonState::GasAndOil)
            .collect()
    }

    /// Saturations and ratios from the cell variables `vars` (pressure first).
    pub(crate) fn solution_state(&self, vars: &[Adb]) -> Result<SolutionState, Error> {
        let pu = self.pu;
        let nc = self.cells.len();
        let zeros = || Adb::constant(DVector::zeros(nc));
        let p = vars[0].clone();
        let sw = match pu.sw_var() {
            Some(v) => vars[v].clone(),
            None if pu.is_active(Phase::Water) => Adb::constant(DVector::from_element(nc, 1.0)),
            None => zeros(),
        };
        let (so, sg, rs, rv) = match pu.x_var() {
            Some(v) => {
                let masks = PrimaryMasks::new(&self.state);
                let x = &vars[v];
                let so_init = 1.0 - &sw;
                let sg = x
                    .try_mul_const(&masks.is_sg)?
                    .try_add(&so_init.try_mul_const(&masks.is_rv)?)?;
                let so = so_init.try_sub(&sg)?;
                let rs = if self.props.has_dissolved_gas() {
                    let sat = self.props.rs_sat(&p, &self.cells)?;
                    let not_rs = masks.is_rs.map(|m| 1.0 - m);
                    x.try_mul_const(&masks.is_rs)?
                        .try_add(&sat.try_mul_const(&not_rs)?)?
                } else {
                    Adb::constant(self.state.rs.clone())
                };
                let rv = if self.props.has_vaporized_oil() {
                    let sat = self.props.rv_sat(&p, &self.cells)?;
                    let not_rv = masks.is_rv.map(|m| 1.0 - m);
                    x.try_mul_const(&masks.is_rv)?
                        .try_add(&sat.try_mul_const(&not_rv)?)?
                } else {
                    Adb::constant(self.state.rv.clone())
                };
                (so, sg, rs, rv)
            }
            None => {
                let rest = 1.0 - &sw;
                let so = if pu.is_active(Phase::Oil) {
                    rest.clone()
                } else {
                    zeros()
                };
                let sg = if pu.is_active(Phase::Gas) && !pu.is_active(Phase::Oil) {
                    rest
                } else {
                    zeros()
                };
                (
                    so,
                    sg,
                    Adb::constant(self.state.rs.clone()),
                    Adb::constant(self.state.rv.clone()),
                )
            }
        };
        Ok(SolutionState {
            p,
            sat: [sw, so, sg],
            rs,
            rv,
        })
    }

    pub(crate) fn phase_props(&self, s: &SolutionState) -> Result<PhaseProps, Error> {
        let pu = self.pu;
        let cells = &self.cells;
        let saturated = self.saturated();
        let [sw, so, sg] = &s.sat;
        let kr = self.props.relperm(sw, so, sg, cells)?;
        let pc = self.props.cap_press(sw, so, sg, cells)?;
        let tm = self.props.trans_mult(&s.p, cells)?;
        let mut rho_s: [DVector<f64>; 3] = std::array::from_fn(|_| DVector::zeros(cells.len()));
        for phase in pu.active_phases() {
            rho_s[phase.index()] = self.props.surface_density(phase, cells)?;
        }
        let (w, o, g) = (Phase::Water.index(), Phase::Oil.index(), Phase::Gas.index());

        let np = pu.num_phases();
        let mut pp = PhaseProps {
            pressure: Vec::with_capacity(np),
            b: Vec::with_capacity(np),
            mob: Vec::with_capacity(np),
            rho: Vec::with_capacity(np),
        };
        for phase in pu.active_phases() {
            let i = phase.index();
            let press = s.p.try_add(&pc[i])?;
            let (b, mu) = match phase {
                Phase::Water => (
                    self.props.b_wat(&press, cells)?,
                    self.props.mu_wat(&press, cells)?,
                ),
                Phase::Oil => (
                    self.props.b_oil(&press, &s.rs, &saturated, cells)?,
                    self.props.mu_oil(&press, &s.rs, &saturated, cells)?,
                ),
                Phase::Gas => (
                    self.props.b_gas(&press, &s.rv, &saturated, cells)?,
                    self.props.mu_gas(&press, &s.rv, &saturated, cells)?,
                ),
            };
            let mob = kr[i].try_div(&mu)?.try_mul(&tm)?;
            let rho = match phase {
                Phase::Oil if pu.is_active(Phase::Gas) => b.try_mul(
                    &s.rs
                        .try_mul_const(&rho_s[g])?
                        .try_add(&Adb::constant(rho_s[o].clone()))?,
                )?,
                Phase::Gas if pu.is_active(Phase::Oil) => b.try_mul(
                    &s.rv
                        .try_mul_const(&rho_s[o])?
                        .try_add(&Adb::constant(rho_s[g].clone()))?,
                )?,
                Phase::Water => b.try_mul_const(&rho_s[w])?,
                _ => b.try_mul_const(&rho_s[i])?,
            };
            pp.pressure.push(press);
            pp.b.push(b);
            pp.mob.push(mob);
            pp.rho.push(rho);
        }
        Ok(pp)
    }

    /// Surface volume of each component held in the pores, per active phase position.
    pub(crate) fn accumulation(&self, s: &SolutionState, pp: &PhaseProps) -> Result<Vec<Adb>, Error> {
        let pu = self.pu;
        let pvm = self
            .props
            .pore_mult(&s.p, &self.cells)?
            .try_mul_const(self.disc.pore_volume())?;
        let [sw, so, sg] = &s.sat;
        let mut acc = Vec::with_capacity(pu.num_phases());
        for (i, phase) in pu.active_phases().into_iter().enumerate() {
            let term = match phase {
                Phase::Water => pp.b[i].try_mul(sw)?,
                Phase::Oil => {
                    let mut t = pp.b[i].try_mul(so)?;
                    if let Some(g) = pu.pos(Phase::Gas) {
                        t = t.try_add(&s.rv.try_mul(&pp.b[g])?.try_mul(sg)?)?;
                    }
                    t
                }
                Phase::Gas => {
                    let mut t = pp.b[i].try_mul(sg)?;
                    if let Some(o) = pu.pos(Phase::Oil) {
                        t = t.try_add(&s.rs.try_mul(&pp.b[o])?.try_mul(so)?)?;
                    }
                    t
                }
            };
            acc.push(pvm.try_mul(&term)?);
        }
        Ok(acc)
    }

    /// Removes the threshold pressure from a potential difference; below the threshold nothing
    /// flows.
    fn apply_threshold(&self, dp: Adb) -> Result<Adb, Error> {
        let th = match (&self.threshold, self.config.use_threshold_pressure) {
            (Some(th), true) => th,
            _ => return Ok(dp),
        };
        let v = dp.value();
        let keep = DVector::from_fn(v.len(), |f, _| if v[f].abs() > th[f] { 1.0 } else { 0.0 });
        let shift = DVector::from_fn(v.len(), |f, _| v[f].signum() * th[f]);
        Ok(dp.try_sub(&Adb::constant(shift))?.try_mul_const(&keep)?)
    }

    /// Surface volume fluxes per active phase over every connection, left to right.
    pub(crate) fn phase_fluxes(&self, s: &SolutionState, pp: &PhaseProps) -> Result<Vec<Adb>, Error> {
        let pu = self.pu;
        let np = pu.num_phases();
        let ops = self.disc.operators();
        let geo = self.disc.geology();
        let trans = geo.transmissibility();
        let gdz = geo.gravity_potential();

        let mut dp = Vec::with_capacity(np);
        for i in 0..np {
            let head = pp.pressure[i].try_left_mul(&ops.ngrad)?.try_sub(
                &pp.rho[i]
                    .try_left_mul(&ops.caver)?
                    .try_mul_const(gdz)?,
            )?;
            dp.push(self.apply_threshold(head)?);
        }

        let selectors: Vec<UpwindSelector> = if self.config.use_multiphase_upwind {
            let head: Vec<DVector<f64>> = dp.iter().map(|d| d.value().clone()).collect();
            let mob: Vec<DVector<f64>> = pp.mob.iter().map(|m| m.value().clone()).collect();
            multiphase_selectors(ops, &head, &mob, trans)?
        } else {
            dp.iter()
                .map(|d| UpwindSelector::new(ops, d.value()))
                .collect::<Result<_, _>>()?
        };

        let mut flux = Vec::with_capacity(np);
        for i in 0..np {
            let up = selectors[i].select(&pp.b[i].try_mul(&pp.mob[i])?)?;
            flux.push(up.try_mul(&dp[i].try_mul_const(trans)?)?);
        }
        if let (Some(o), Some(g)) = (pu.pos(Phase::Oil), pu.pos(Phase::Gas)) {
            let (f_o, f_g) = (flux[o].clone(), flux[g].clone());
            if self.props.has_dissolved_gas() {
                flux[g] = flux[g].try_add(&selectors[o].select(&s.rs)?.try_mul(&f_o)?)?;
            }
            if self.props.has_vaporized_oil() {
                flux[o] = flux[o].try_add(&selectors[g].select(&s.rv)?.try_mul(&f_g)?)?;
            }
        }
        Ok(flux)
    }

    /// Reservoir volume coefficients per well from the fluid averaged over its perforated cells,
    /// and the group voidage target of every voidage controlled well.
    pub(crate) fn well_targets(&self, s: &SolutionState, pp: &PhaseProps) -> WellTargets {
        let pu = self.pu;
        let wells = &self.wells;
        let perf = wells.perf_cells();
        let nw = wells.num_wells();
        let mut coefficients = Vec::with_capacity(nw);
        for w in 0..nw {
            let range = wells.perf_range(w);
            let n = range.len().max(1) as f64;
            let avg = |v: &DVector<f64>| range.clone().map(|k| v[perf[k]]).sum::<f64>() / n;
            let mut b = [0.0; 3];
            for phase in pu.active_phases() {
                if let Some(i) = pu.pos(phase) {
                    b[phase.index()] = avg(pp.b[i].value());
                }
            }
            coefficients.push(reservoir_coefficients(
                &pu,
                &b,
                avg(s.rs.value()),
                avg(s.rv.value()),
            ));
        }

        let mut voidage = vec![0.0; nw];
        for (w, spec) in wells.specs().iter().enumerate() {
            let Some(fraction) = spec.controls.iter().find_map(|c| match c.kind {
                ControlKind::GroupVoidage { fraction } => Some(fraction),
                _ => None,
            }) else {
                continue;
            };
            let produced: f64 = wells
                .specs()
                .iter()
                .enumerate()
                .filter(|(_, o)| !o.is_injector() && o.group == spec.group)
                .map(|(p, _)| {
                    let q = canonical_rates(&pu, &self.well_state, p);
                    -(0..3).map(|ph| coefficients[p][ph] * q[ph]).sum::<f64>()
                })
                .sum();
            voidage[w] = fraction * produced.max(0.0);
        }
        WellTargets {
            coefficients,
            voidage,
        }
    }

    /// Perforation rates and well equations for the well unknowns `qs` and `bhp`.
    pub(crate) fn well_equations(
        &self,
        s: &SolutionState,
        pp: &PhaseProps,
        qs: &Adb,
        bhp: &Adb,
        targets: &WellTargets,
    ) -> Result<WellEquations, Error> {
        let pu = self.pu;
        let wells = &self.wells;
        let ws = &self.well_state;
        let perf = wells.perf_cells();
        let nperf = perf.len();

        let mut b_perf: [DVector<f64>; 3] = std::array::from_fn(|_| DVector::zeros(nperf));
        let mut cell_rho = DVector::zeros(nperf);
        let mut surface_density: [DVector<f64>; 3] =
            std::array::from_fn(|_| DVector::zeros(nperf));
        for phase in Phase::ALL {
            let Some(i) = pu.pos(phase) else {
                continue;
            };
            b_perf[phase.index()] = subset_vec(pp.b[i].value(), perf);
            let s_perf = subset_vec(s.sat[phase.index()].value(), perf);
            cell_rho += s_perf.component_mul(&subset_vec(pp.rho[i].value(), perf));
            surface_density[phase.index()] = self.props.surface_density(phase, perf)?;
        }
        let rs_perf = subset_vec(s.rs.value(), perf);
        let rv_perf = subset_vec(s.rv.value(), perf);
        let fluid = PerfFluid {
            b: &b_perf,
            rs: &rs_perf,
            rv: &rv_perf,
            surface_density: &surface_density,
            cell_density: &cell_rho,
        };
        let cdp = connection_pressure_drops(
            wells,
            &pu,
            &ws.perf_rates,
            &fluid,
            self.disc.geology().gravity(),
        );

        let inp = PerfInputs {
            p: subset(&s.p, perf)?,
            mob: pp
                .mob
                .iter()
                .map(|m| subset(m, perf))
                .collect::<Result<_, _>>()?,
            b: pp.b.iter().map(|b| subset(b, perf)).collect::<Result<_, _>>()?,
            rs: subset(&s.rs, perf)?,
            rv: subset(&s.rv, perf)?,
        };
        let mix = wellbore_mix(wells, &pu, ws);
        let cq_s = perforation_rates(
            wells,
            &pu,
            &inp,
            bhp,
            &cdp,
            &mix,
            self.props.has_dissolved_gas(),
            self.props.has_vaporized_oil(),
        )?;
        let flux = flux_residual(wells, qs, &cq_s)?;
        let (control, control_scale) = control_residual(
            wells,
            &pu,
            ws,
            qs,
            bhp,
            &targets.coefficients,
            &targets.voidage,
        )?;
        Ok(WellEquations {
            cq_s,
            flux,
            control,
            control_scale,
            cdp,
        })
    }

    /// Evaluates every fluid quantity of the current state without derivatives.
    pub(crate) fn constant_props(&self) -> Result<(SolutionState, PhaseProps), Error> {
        let vars: Vec<Adb> = cell_values(&self.pu, &self.state)
            .into_iter()
            .map(Adb::constant)
            .collect();
        let s = self.solution_state(&vars)?;
        let pp = self.phase_props(&s)?;
        Ok((s, pp))
    }

    /// Assembles the residual and Jacobian at the current iterate.
    pub(crate) fn assemble(&mut self) -> Result<(), Error> {
        let pu = self.pu;
        let np = pu.num_phases();
        let nc = self.cells.len();
        let nv = pu.num_cell_vars();
        let nw = self.wells.num_wells();

        let mut values = cell_values(&pu, &self.state);
        if nw > 0 {
            values.push(self.well_state.surface_rates.clone());
            values.push(self.well_state.bhp.clone());
        }
        let vars = Adb::variables(values);
        let s = self.solution_state(&vars[..nv])?;
        let pp = self.phase_props(&s)?;
        let acc = self.accumulation(&s, &pp)?;
        let flux = self.phase_fluxes(&s, &pp)?;

        let div = &self.disc.operators().div;
        let mut mass = Vec::with_capacity(np);
        for i in 0..np {
            let r = acc[i]
                .try_sub(&Adb::constant(self.acc0[i].clone()))?
                .scale(1.0 / self.dt)
                .try_add(&flux[i].try_left_mul(div)?)?;
            mass.push(r);
        }
        self.fluxes = flux.iter().map(|f| f.value().clone()).collect();

        self.b_avg = pp
            .b
            .iter()
            .map(|b| average_inverse_fvf(b.value(), &*self.comm))
            .collect();
        self.equation_scale = if self.config.update_equations_scaling {
            self.b_avg.clone()
        } else {
            pu.active_phases()
                .iter()
                .map(|p| self.config.fixed_equation_scaling[p.index()])
                .collect()
        };

        if nw == 0 {
            self.residual = Residual {
                mass,
                ..Default::default()
            };
            return Ok(());
        }

        let targets = self.well_targets(&s, &pp);
        let eqs = self.well_equations(&s, &pp, &vars[nv], &vars[nv + 1], &targets)?;
        let perf = self.wells.perf_cells();
        for (r, cq) in mass.iter_mut().zip(&eqs.cq_s) {
            *r = r.try_add(&superset(cq, perf, nc)?)?;
        }

        let nperf = perf.len();
        let ws = &mut self.well_state;
        for (i, cq) in eqs.cq_s.iter().enumerate() {
            ws.perf_rates.rows_mut(i * nperf, nperf).copy_from(cq.value());
        }
        ws.perf_pressures = self.wells.to_perfs().mul_vec(&ws.bhp)? + &eqs.cdp;

        self.residual = Residual {
            mass,
            well_flux: Some(eqs.flux),
            well_control: Some(eqs.control),
            control_scale: eqs.control_scale,
        };
        self.targets = targets;
        Ok(())
    }

    /// The scaled Newton system of the last assembly.
    pub(crate) fn linear_system(&self) -> Result<LinearSystem, Error> {
        let mut eqs: Vec<Adb> = self
            .residual
            .mass
            .iter()
            .zip(&self.equation_scale)
            .map(|(r, &scale)| r.scale(scale))
            .collect();
        if let (Some(flux), Some(control)) = (&self.residual.well_flux, &self.residual.well_control) {
            eqs.push(flux.clone());
            eqs.push(control.clone());
        }
        Ok(LinearSystem::from_equations(&eqs, self.pu.num_cell_vars())?)
    }
}
