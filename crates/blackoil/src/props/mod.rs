//! Cellwise fluid and rock property evaluation on AD expressions.
//!
//! Every evaluator takes AD inputs and the list of cells the entries belong to (for the region
//! lookup) and returns an expression whose Jacobian is the pointwise derivative chained with
//! the Jacobians of the inputs.

mod pvt;
mod rock_comp;
mod satfunc;
mod table;

use ad::AutoDiffBlock;
use nalgebra::DVector;
use rayon::prelude::*;

pub use pvt::{GasPvt, OilPvt, PvtTables, WaterPvt};
pub use rock_comp::RockCompressibility;
pub use satfunc::{Corey, RelPermEval, SaturationFunctions};
pub use table::Table1D;

use crate::{
    phases::{Phase, PhaseUsage},
    rock::RockProps,
    Error,
};

type Adb = AutoDiffBlock;

pub trait FluidProps: Send + Sync {
    fn phase_usage(&self) -> &PhaseUsage;

    /// Surface density of `phase` for each of `cells`.
    fn surface_density(&self, phase: Phase, cells: &[usize]) -> Result<DVector<f64>, Error>;

    fn has_dissolved_gas(&self) -> bool;

    fn has_vaporized_oil(&self) -> bool;

    fn mu_wat(&self, p: &Adb, cells: &[usize]) -> Result<Adb, Error>;

    fn mu_oil(&self, p: &Adb, rs: &Adb, saturated: &[bool], cells: &[usize]) -> Result<Adb, Error>;

    fn mu_gas(&self, p: &Adb, rv: &Adb, saturated: &[bool], cells: &[usize]) -> Result<Adb, Error>;

    fn b_wat(&self, p: &Adb, cells: &[usize]) -> Result<Adb, Error>;

    fn b_oil(&self, p: &Adb, rs: &Adb, saturated: &[bool], cells: &[usize]) -> Result<Adb, Error>;

    fn b_gas(&self, p: &Adb, rv: &Adb, saturated: &[bool], cells: &[usize]) -> Result<Adb, Error>;

    /// Saturated dissolved gas-oil ratio.
    fn rs_sat(&self, p: &Adb, cells: &[usize]) -> Result<Adb, Error>;

    /// Saturated vaporized oil-gas ratio.
    fn rv_sat(&self, p: &Adb, cells: &[usize]) -> Result<Adb, Error>;

    /// Relative permeabilities in canonical phase order; inactive phases are zero.
    fn relperm(&self, sw: &Adb, so: &Adb, sg: &Adb, cells: &[usize]) -> Result<[Adb; 3], Error>;

    /// Phase pressure offsets from the oil pressure in canonical order (oil is always zero).
    fn cap_press(&self, sw: &Adb, so: &Adb, sg: &Adb, cells: &[usize]) -> Result<[Adb; 3], Error>;

    /// Pore volume multiplier.
    fn pore_mult(&self, p: &Adb, cells: &[usize]) -> Result<Adb, Error>;

    /// Transmissibility multiplier.
    fn trans_mult(&self, p: &Adb, cells: &[usize]) -> Result<Adb, Error>;
}

/// Evaluates `f` for every entry in parallel, keeping entry order.
fn eval_par<F>(n: usize, f: F) -> (DVector<f64>, DVector<f64>, DVector<f64>)
where
    F: Fn(usize) -> (f64, f64, f64) + Sync + Send,
{
    let out: Vec<(f64, f64, f64)> = (0..n).into_par_iter().map(f).collect();
    (
        DVector::from_iterator(n, out.iter().map(|e| e.0)),
        DVector::from_iterator(n, out.iter().map(|e| e.1)),
        DVector::from_iterator(n, out.iter().map(|e| e.2)),
    )
}

/// `f(x, y)` from its value and partial derivatives.
fn chain2(
    x: &Adb,
    y: &Adb,
    (v, dx, dy): (DVector<f64>, DVector<f64>, DVector<f64>),
) -> Result<Adb, Error> {
    let zeros = DVector::zeros(v.len());
    Ok(x.compose(v, &dx)?.try_add(&y.compose(zeros, &dy)?)?)
}

fn check_len(op: &'static str, x: &Adb, cells: &[usize]) -> Result<(), Error> {
    if x.size() != cells.len() {
        return Err(ad::Error::ShapeMismatch {
            op,
            lhs: (cells.len(), 1),
            rhs: (x.size(), 1),
        }
        .into());
    }
    Ok(())
}

/// Table based black-oil properties with PVT and saturation regions.
#[derive(Clone, Debug)]
pub struct BlackoilProps {
    pu: PhaseUsage,
    pvt: Vec<PvtTables>,
    satfunc: Vec<SaturationFunctions>,
    rock_comp: Option<RockCompressibility>,
    pvt_region: Vec<usize>,
    sat_region: Vec<usize>,
}

impl BlackoilProps {
    pub fn new(
        pu: PhaseUsage,
        pvt: Vec<PvtTables>,
        satfunc: Vec<SaturationFunctions>,
        rock: &dyn RockProps,
    ) -> Result<Self, Error> {
        if pvt.is_empty() || satfunc.is_empty() {
            return Err(Error::Props("at least one PVT and one saturation region required".into()));
        }
        for (r, t) in pvt.iter().enumerate() {
            let missing = [
                (Phase::Water, t.water.is_none()),
                (Phase::Oil, t.oil.is_none()),
                (Phase::Gas, t.gas.is_none()),
            ]
            .into_iter()
            .find(|&(ph, none)| pu.is_active(ph) && none);
            if let Some((ph, _)) = missing {
                return Err(Error::Props(format!("PVT region {r} has no {ph} table")));
            }
        }
        let n = rock.num_cells();
        let pvt_region: Vec<usize> = (0..n).map(|c| rock.pvt_region(c)).collect();
        let sat_region: Vec<usize> = (0..n).map(|c| rock.sat_region(c)).collect();
        if let Some(c) = pvt_region.iter().position(|&r| r >= pvt.len()) {
            return Err(Error::Props(format!("cell {c} refers to a missing PVT region")));
        }
        if let Some(c) = sat_region.iter().position(|&r| r >= satfunc.len()) {
            return Err(Error::Props(format!("cell {c} refers to a missing saturation region")));
        }
        Ok(BlackoilProps {
            pu,
            pvt,
            satfunc,
            rock_comp: None,
            pvt_region,
            sat_region,
        })
    }

    pub fn with_rock_compressibility(mut self, rc: RockCompressibility) -> Self {
        self.rock_comp = Some(rc);
        self
    }

    fn tables(&self, c: usize) -> &PvtTables {
        &self.pvt[self.pvt_region[c]]
    }

    fn sat(&self, c: usize) -> &SaturationFunctions {
        &self.satfunc[self.sat_region[c]]
    }

    fn water(&self, c: usize) -> Result<&WaterPvt, Error> {
        self.tables(c)
            .water
            .as_ref()
            .filter(|_| self.pu.is_active(Phase::Water))
            .ok_or(Error::PhaseNotPresent(Phase::Water))
    }

    fn oil(&self, c: usize) -> Result<&OilPvt, Error> {
        self.tables(c)
            .oil
            .as_ref()
            .filter(|_| self.pu.is_active(Phase::Oil))
            .ok_or(Error::PhaseNotPresent(Phase::Oil))
    }

    fn gas(&self, c: usize) -> Result<&GasPvt, Error> {
        self.tables(c)
            .gas
            .as_ref()
            .filter(|_| self.pu.is_active(Phase::Gas))
            .ok_or(Error::PhaseNotPresent(Phase::Gas))
    }

    /// Fails unless `phase` is active and every region in `cells` has its table.
    fn require(&self, phase: Phase, cells: &[usize]) -> Result<(), Error> {
        for &c in cells {
            match phase {
                Phase::Water => self.water(c).map(|_| ())?,
                Phase::Oil => self.oil(c).map(|_| ())?,
                Phase::Gas => self.gas(c).map(|_| ())?,
            }
        }
        if !self.pu.is_active(phase) {
            return Err(Error::PhaseNotPresent(phase));
        }
        Ok(())
    }

    /// Evaluates a water property given as `(value, dp)` per cell.
    fn water_prop<F>(&self, p: &Adb, cells: &[usize], f: F) -> Result<Adb, Error>
    where
        F: Fn(&WaterPvt, f64) -> (f64, f64) + Sync,
    {
        check_len("water property", p, cells)?;
        self.require(Phase::Water, cells)?;
        let pv = p.value();
        let (v, dp, _) = eval_par(cells.len(), |k| {
            self.water(cells[k])
                .map_or((f64::NAN, 0.0, 0.0), |t| {
                    let (v, d) = f(t, pv[k]);
                    (v, d, 0.0)
                })
        });
        Ok(p.compose(v, &dp)?)
    }

    fn oil_prop<F>(&self, p: &Adb, rs: &Adb, sat: &[bool], cells: &[usize], f: F) -> Result<Adb, Error>
    where
        F: Fn(&OilPvt, f64, f64, bool) -> pvt::Eval + Sync,
    {
        check_len("oil property", p, cells)?;
        check_len("oil property", rs, cells)?;
        self.require(Phase::Oil, cells)?;
        let (pv, rv) = (p.value(), rs.value());
        let vals = eval_par(cells.len(), |k| {
            self.oil(cells[k]).map_or((f64::NAN, 0.0, 0.0), |t| {
                f(t, pv[k], rv[k], sat.get(k).copied().unwrap_or(true))
            })
        });
        chain2(p, rs, vals)
    }

    fn gas_prop<F>(&self, p: &Adb, rv: &Adb, sat: &[bool], cells: &[usize], f: F) -> Result<Adb, Error>
    where
        F: Fn(&GasPvt, f64, f64, bool) -> pvt::Eval + Sync,
    {
        check_len("gas property", p, cells)?;
        check_len("gas property", rv, cells)?;
        self.require(Phase::Gas, cells)?;
        let (pv, rvv) = (p.value(), rv.value());
        let vals = eval_par(cells.len(), |k| {
            self.gas(cells[k]).map_or((f64::NAN, 0.0, 0.0), |t| {
                f(t, pv[k], rvv[k], sat.get(k).copied().unwrap_or(true))
            })
        });
        chain2(p, rv, vals)
    }

    fn saturation_values(sw: &Adb, so: &Adb, sg: &Adb, k: usize) -> [f64; 3] {
        [sw.value()[k], so.value()[k], sg.value()[k]]
    }
}

impl FluidProps for BlackoilProps {
    fn phase_usage(&self) -> &PhaseUsage {
        &self.pu
    }

    fn surface_density(&self, phase: Phase, cells: &[usize]) -> Result<DVector<f64>, Error> {
        self.require(phase, cells)?;
        Ok(DVector::from_iterator(
            cells.len(),
            cells
                .iter()
                .map(|&c| self.tables(c).surface_density[phase.index()]),
        ))
    }

    fn has_dissolved_gas(&self) -> bool {
        self.pu.is_active(Phase::Gas)
            && self
                .pvt
                .iter()
                .any(|t| t.oil.as_ref().is_some_and(|o| o.has_dissolved_gas()))
    }

    fn has_vaporized_oil(&self) -> bool {
        self.pu.is_active(Phase::Oil)
            && self
                .pvt
                .iter()
                .any(|t| t.gas.as_ref().is_some_and(|g| g.has_vaporized_oil()))
    }

    fn mu_wat(&self, p: &Adb, cells: &[usize]) -> Result<Adb, Error> {
        self.water_prop(p, cells, |t, p| t.mu(p))
    }

    fn mu_oil(&self, p: &Adb, rs: &Adb, saturated: &[bool], cells: &[usize]) -> Result<Adb, Error> {
        self.oil_prop(p, rs, saturated, cells, |t, p, r, s| t.mu(p, r, s))
    }

    fn mu_gas(&self, p: &Adb, rv: &Adb, saturated: &[bool], cells: &[usize]) -> Result<Adb, Error> {
        self.gas_prop(p, rv, saturated, cells, |t, p, r, s| t.mu(p, r, s))
    }

    fn b_wat(&self, p: &Adb, cells: &[usize]) -> Result<Adb, Error> {
        self.water_prop(p, cells, |t, p| t.b(p))
    }

    fn b_oil(&self, p: &Adb, rs: &Adb, saturated: &[bool], cells: &[usize]) -> Result<Adb, Error> {
        self.oil_prop(p, rs, saturated, cells, |t, p, r, s| t.b(p, r, s))
    }

    fn b_gas(&self, p: &Adb, rv: &Adb, saturated: &[bool], cells: &[usize]) -> Result<Adb, Error> {
        self.gas_prop(p, rv, saturated, cells, |t, p, r, s| t.b(p, r, s))
    }

    fn rs_sat(&self, p: &Adb, cells: &[usize]) -> Result<Adb, Error> {
        check_len("rs_sat", p, cells)?;
        self.require(Phase::Oil, cells)?;
        let pv = p.value();
        let (v, dp, _) = eval_par(cells.len(), |k| {
            self.oil(cells[k]).map_or((f64::NAN, 0.0, 0.0), |t| {
                let (v, d) = t.rs_sat(pv[k]);
                (v, d, 0.0)
            })
        });
        Ok(p.compose(v, &dp)?)
    }

    fn rv_sat(&self, p: &Adb, cells: &[usize]) -> Result<Adb, Error> {
        check_len("rv_sat", p, cells)?;
        self.require(Phase::Gas, cells)?;
        let pv = p.value();
        let (v, dp, _) = eval_par(cells.len(), |k| {
            self.gas(cells[k]).map_or((f64::NAN, 0.0, 0.0), |t| {
                let (v, d) = t.rv_sat(pv[k]);
                (v, d, 0.0)
            })
        });
        Ok(p.compose(v, &dp)?)
    }

    fn relperm(&self, sw: &Adb, so: &Adb, sg: &Adb, cells: &[usize]) -> Result<[Adb; 3], Error> {
        for s in [sw, so, sg] {
            check_len("relperm", s, cells)?;
        }
        let n = cells.len();
        let evals: Vec<RelPermEval> = (0..n)
            .into_par_iter()
            .map(|k| {
                self.sat(cells[k])
                    .relperm(&self.pu, Self::saturation_values(sw, so, sg, k))
            })
            .collect();
        let sats = [sw, so, sg];
        let mut kr: [Adb; 3] = std::array::from_fn(|_| Adb::constant(DVector::zeros(n)));
        for i in 0..3 {
            let v = DVector::from_iterator(n, evals.iter().map(|e| e.kr[i]));
            let mut acc = Adb::constant(v);
            for (j, s) in sats.iter().enumerate() {
                let d = DVector::from_iterator(n, evals.iter().map(|e| e.dkr[i][j]));
                if d.iter().any(|&x| x != 0.0) {
                    acc = acc.try_add(&s.compose(DVector::zeros(n), &d)?)?;
                }
            }
            kr[i] = acc;
        }
        Ok(kr)
    }

    fn cap_press(&self, sw: &Adb, so: &Adb, sg: &Adb, cells: &[usize]) -> Result<[Adb; 3], Error> {
        for s in [sw, so, sg] {
            check_len("cap_press", s, cells)?;
        }
        let n = cells.len();
        let evals: Vec<([f64; 3], [f64; 3])> = (0..n)
            .into_par_iter()
            .map(|k| {
                self.sat(cells[k])
                    .pressure_offsets(Self::saturation_values(sw, so, sg, k))
            })
            .collect();
        let sats = [sw, so, sg];
        let mut pc: [Adb; 3] = std::array::from_fn(|_| Adb::constant(DVector::zeros(n)));
        for i in 0..3 {
            let v = DVector::from_iterator(n, evals.iter().map(|e| e.0[i]));
            let d = DVector::from_iterator(n, evals.iter().map(|e| e.1[i]));
            pc[i] = sats[i].compose(v, &d)?;
        }
        Ok(pc)
    }

    fn pore_mult(&self, p: &Adb, _cells: &[usize]) -> Result<Adb, Error> {
        match &self.rock_comp {
            None => Ok(Adb::constant(DVector::from_element(p.size(), 1.0))),
            Some(rc) => {
                let (v, d): (Vec<f64>, Vec<f64>) = p.value().iter().map(|&x| rc.pore_mult(x)).unzip();
                Ok(p.compose(DVector::from_vec(v), &DVector::from_vec(d))?)
            }
        }
    }

    fn trans_mult(&self, p: &Adb, _cells: &[usize]) -> Result<Adb, Error> {
        match &self.rock_comp {
            None => Ok(Adb::constant(DVector::from_element(p.size(), 1.0))),
            Some(rc) => {
                let (v, d): (Vec<f64>, Vec<f64>) = p.value().iter().map(|&x| rc.trans_mult(x)).unzip();
                Ok(p.compose(DVector::from_vec(v), &DVector::from_vec(d))?)
            }
        }
    }
}
