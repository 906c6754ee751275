use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

use nalgebra::DVector;
use nalgebra_sparse::csr::CsrMatrix;

use crate::{AdMatrix, Error};

/// A vector-valued quantity together with its derivatives with respect to every block of
/// primary variables.
///
/// `jac[b]` has one row per value and one column per variable of block `b`. Constants may be
/// stored without any Jacobian blocks; they act as zero derivatives whenever combined with an
/// expression that has them.
#[derive(Clone, Debug, PartialEq)]
pub struct AutoDiffBlock {
    val: DVector<f64>,
    jac: Vec<AdMatrix>,
}

impl AutoDiffBlock {
    /// A constant without Jacobian blocks.
    pub fn constant(val: DVector<f64>) -> Self {
        AutoDiffBlock {
            val,
            jac: Vec::new(),
        }
    }

    /// A constant with explicit zero blocks matching `pattern`.
    pub fn constant_with_pattern(val: DVector<f64>, pattern: &[usize]) -> Self {
        let n = val.len();
        AutoDiffBlock {
            val,
            jac: pattern.iter().map(|&m| AdMatrix::zeros(n, m)).collect(),
        }
    }

    /// The independent variable occupying block `index` of `pattern`.
    pub fn variable(index: usize, val: DVector<f64>, pattern: &[usize]) -> Result<Self, Error> {
        let n = val.len();
        match pattern.get(index) {
            None => Err(Error::IndexOutOfRange {
                index,
                len: pattern.len(),
            }),
            Some(&m) if m != n => Err(Error::shape("variable", (n, 1), (m, 1))),
            Some(_) => Ok(AutoDiffBlock {
                val,
                jac: pattern
                    .iter()
                    .enumerate()
                    .map(|(b, &m)| {
                        if b == index {
                            AdMatrix::identity(n)
                        } else {
                            AdMatrix::zeros(n, m)
                        }
                    })
                    .collect(),
            }),
        }
    }

    /// Creates one independent variable per value vector, the block pattern being given by the
    /// vector lengths.
    pub fn variables(values: Vec<DVector<f64>>) -> Vec<Self> {
        let pattern: Vec<usize> = values.iter().map(|v| v.len()).collect();
        values
            .into_iter()
            .enumerate()
            .map(|(b, val)| {
                let n = val.len();
                AutoDiffBlock {
                    val,
                    jac: pattern
                        .iter()
                        .enumerate()
                        .map(|(k, &m)| {
                            if k == b {
                                AdMatrix::identity(n)
                            } else {
                                AdMatrix::zeros(n, m)
                            }
                        })
                        .collect(),
                }
            })
            .collect()
    }

    /// An expression with arbitrary Jacobian blocks, which must all have `val.len()` rows.
    pub fn function(val: DVector<f64>, jac: Vec<AdMatrix>) -> Result<Self, Error> {
        if let Some(j) = jac.iter().find(|j| j.nrows() != val.len()) {
            return Err(Error::shape("function", (val.len(), 1), j.dims()));
        }
        Ok(AutoDiffBlock { val, jac })
    }

    pub fn size(&self) -> usize {
        self.val.len()
    }

    pub fn num_blocks(&self) -> usize {
        self.jac.len()
    }

    pub fn block_pattern(&self) -> Vec<usize> {
        self.jac.iter().map(|j| j.ncols()).collect()
    }

    pub fn value(&self) -> &DVector<f64> {
        &self.val
    }

    pub fn derivative(&self) -> &[AdMatrix] {
        &self.jac
    }

    pub fn into_parts(self) -> (DVector<f64>, Vec<AdMatrix>) {
        (self.val, self.jac)
    }

    /// `true` if every Jacobian block is structurally zero.
    pub fn is_constant(&self) -> bool {
        self.jac.iter().all(|j| j.is_zero())
    }

    fn check_size(&self, rhs: &Self, op: &'static str) -> Result<(), Error> {
        if self.size() != rhs.size() {
            return Err(Error::shape(op, (self.size(), 1), (rhs.size(), 1)));
        }
        Ok(())
    }

    /// Applies `f` blockwise, substituting zero blocks for a side without Jacobians.
    fn combine<F>(&self, rhs: &Self, f: F) -> Result<Vec<AdMatrix>, Error>
    where
        F: Fn(&AdMatrix, &AdMatrix) -> Result<AdMatrix, Error>,
    {
        match (self.jac.is_empty(), rhs.jac.is_empty()) {
            (true, true) => Ok(Vec::new()),
            (false, true) => self
                .jac
                .iter()
                .map(|j| f(j, &AdMatrix::zeros(rhs.size(), j.ncols())))
                .collect(),
            (true, false) => rhs
                .jac
                .iter()
                .map(|j| f(&AdMatrix::zeros(self.size(), j.ncols()), j))
                .collect(),
            (false, false) => {
                if self.jac.len() != rhs.jac.len() {
                    return Err(Error::BlockPattern {
                        lhs: self.jac.len(),
                        rhs: rhs.jac.len(),
                    });
                }
                self.jac
                    .iter()
                    .zip(rhs.jac.iter())
                    .map(|(a, b)| f(a, b))
                    .collect()
            }
        }
    }

    pub fn try_add(&self, rhs: &Self) -> Result<Self, Error> {
        self.check_size(rhs, "add")?;
        Ok(AutoDiffBlock {
            val: &self.val + &rhs.val,
            jac: self.combine(rhs, |a, b| a.try_add(b))?,
        })
    }

    pub fn try_sub(&self, rhs: &Self) -> Result<Self, Error> {
        self.check_size(rhs, "sub")?;
        Ok(AutoDiffBlock {
            val: &self.val - &rhs.val,
            jac: self.combine(rhs, |a, b| a.try_sub(b))?,
        })
    }

    /// Elementwise product.
    pub fn try_mul(&self, rhs: &Self) -> Result<Self, Error> {
        self.check_size(rhs, "mul")?;
        let jac = self.combine(rhs, |ja, jb| {
            ja.scale_rows(&rhs.val)?
                .try_add(&jb.scale_rows(&self.val)?)
        })?;
        Ok(AutoDiffBlock {
            val: self.val.component_mul(&rhs.val),
            jac,
        })
    }

    /// Elementwise quotient. Fails if any entry of `rhs` is exactly zero.
    pub fn try_div(&self, rhs: &Self) -> Result<Self, Error> {
        self.check_size(rhs, "div")?;
        if let Some(index) = rhs.val.iter().position(|&v| v == 0.0) {
            return Err(Error::DivisionByZero { index });
        }
        let inv = rhs.val.map(|v| 1.0 / v);
        let ratio = self.val.component_mul(&inv);
        let dnum = inv.clone();
        let dden = -ratio.component_mul(&inv);
        let jac = self.combine(rhs, |ja, jb| {
            ja.scale_rows(&dnum)?.try_add(&jb.scale_rows(&dden)?)
        })?;
        Ok(AutoDiffBlock { val: ratio, jac })
    }

    /// Left-multiplication by a (typically sparse operator) matrix.
    pub fn try_left_mul(&self, m: &AdMatrix) -> Result<Self, Error> {
        let val = m.mul_vec(&self.val)?;
        let jac = self
            .jac
            .iter()
            .map(|j| m.try_mul(j))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AutoDiffBlock { val, jac })
    }

    /// Elementwise product with a constant vector.
    pub fn try_mul_const(&self, c: &DVector<f64>) -> Result<Self, Error> {
        if c.len() != self.size() {
            return Err(Error::shape("mul_const", (self.size(), 1), (c.len(), 1)));
        }
        Ok(AutoDiffBlock {
            val: self.val.component_mul(c),
            jac: self
                .jac
                .iter()
                .map(|j| j.scale_rows(c))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    pub fn scale(&self, alpha: f64) -> Self {
        AutoDiffBlock {
            val: &self.val * alpha,
            jac: self.jac.iter().map(|j| j.scale(alpha)).collect(),
        }
    }

    pub fn add_scalar(&self, alpha: f64) -> Self {
        AutoDiffBlock {
            val: self.val.add_scalar(alpha),
            jac: self.jac.clone(),
        }
    }

    /// Chain rule for a cellwise function `g`: given `g(self)` and `g'(self)`, returns the
    /// expression with value `g(self)` and Jacobians `diag(g'(self)) * J`.
    pub fn compose(&self, val: DVector<f64>, dval: &DVector<f64>) -> Result<Self, Error> {
        if val.len() != self.size() || dval.len() != self.size() {
            return Err(Error::shape("compose", (self.size(), 1), (val.len(), dval.len())));
        }
        Ok(AutoDiffBlock {
            val,
            jac: self
                .jac
                .iter()
                .map(|j| j.scale_rows(dval))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    /// Applies a scalar function and its derivative elementwise.
    pub fn map<F, DF>(&self, f: F, df: DF) -> Result<Self, Error>
    where
        F: Fn(f64) -> f64,
        DF: Fn(f64) -> f64,
    {
        self.compose(self.val.map(f), &self.val.map(df))
    }

    /// The values with derivatives dropped.
    pub fn detached(&self) -> Self {
        AutoDiffBlock::constant(self.val.clone())
    }

    /// Concatenates all Jacobian blocks horizontally into one matrix whose columns follow the
    /// full primary-variable vector.
    pub fn collapse_jacs(&self) -> Result<CsrMatrix<f64>, Error> {
        let blocks: Vec<&AdMatrix> = self.jac.iter().collect();
        if blocks.is_empty() {
            return Ok(CsrMatrix::zeros(self.size(), 0));
        }
        AdMatrix::hstack(&blocks)
    }
}

macro_rules! forward_binop {
    ($tr:ident, $method:ident, $try:ident) => {
        impl<'a> $tr<&'a AutoDiffBlock> for &'a AutoDiffBlock {
            type Output = AutoDiffBlock;

            fn $method(self, rhs: &'a AutoDiffBlock) -> AutoDiffBlock {
                self.$try(rhs).unwrap_or_else(|e| panic!("{e}"))
            }
        }

        impl $tr<AutoDiffBlock> for AutoDiffBlock {
            type Output = AutoDiffBlock;

            fn $method(self, rhs: AutoDiffBlock) -> AutoDiffBlock {
                (&self).$method(&rhs)
            }
        }

        impl<'a> $tr<&'a AutoDiffBlock> for AutoDiffBlock {
            type Output = AutoDiffBlock;

            fn $method(self, rhs: &'a AutoDiffBlock) -> AutoDiffBlock {
                (&self).$method(rhs)
            }
        }

        impl<'a> $tr<AutoDiffBlock> for &'a AutoDiffBlock {
            type Output = AutoDiffBlock;

            fn $method(self, rhs: AutoDiffBlock) -> AutoDiffBlock {
                self.$method(&rhs)
            }
        }
    };
}

forward_binop!(Add, add, try_add);
forward_binop!(Sub, sub, try_sub);
forward_binop!(Mul, mul, try_mul);
forward_binop!(Div, div, try_div);

impl Add<f64> for &AutoDiffBlock {
    type Output = AutoDiffBlock;

    fn add(self, rhs: f64) -> AutoDiffBlock {
        self.add_scalar(rhs)
    }
}

impl Sub<f64> for &AutoDiffBlock {
    type Output = AutoDiffBlock;

    fn sub(self, rhs: f64) -> AutoDiffBlock {
        self.add_scalar(-rhs)
    }
}

impl Sub<&AutoDiffBlock> for f64 {
    type Output = AutoDiffBlock;

    fn sub(self, rhs: &AutoDiffBlock) -> AutoDiffBlock {
        rhs.scale(-1.0).add_scalar(self)
    }
}

impl Mul<f64> for &AutoDiffBlock {
    type Output = AutoDiffBlock;

    fn mul(self, rhs: f64) -> AutoDiffBlock {
        self.scale(rhs)
    }
}

impl Mul<&AutoDiffBlock> for f64 {
    type Output = AutoDiffBlock;

    fn mul(self, rhs: &AutoDiffBlock) -> AutoDiffBlock {
        rhs.scale(self)
    }
}

impl Div<f64> for &AutoDiffBlock {
    type Output = AutoDiffBlock;

    fn div(self, rhs: f64) -> AutoDiffBlock {
        self.scale(1.0 / rhs)
    }
}

impl Mul<&AutoDiffBlock> for &AdMatrix {
    type Output = AutoDiffBlock;

    fn mul(self, rhs: &AutoDiffBlock) -> AutoDiffBlock {
        rhs.try_left_mul(self).unwrap_or_else(|e| panic!("{e}"))
    }
}

impl Neg for &AutoDiffBlock {
    type Output = AutoDiffBlock;

    fn neg(self) -> AutoDiffBlock {
        self.scale(-1.0)
    }
}

impl Neg for AutoDiffBlock {
    type Output = AutoDiffBlock;

    fn neg(self) -> AutoDiffBlock {
        self.scale(-1.0)
    }
}

impl AddAssign<&AutoDiffBlock> for AutoDiffBlock {
    fn add_assign(&mut self, rhs: &AutoDiffBlock) {
        *self = (&*self).add(rhs);
    }
}
