use core::fmt::Display;
use core::ops::{Add, BitAnd, Div, Mul, Rem, Shr};

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::RangeId;

/// Integer index arithmetic over range values.
///
/// Every constructor folds constants eagerly, so an expression built only from literals is always
/// a [`Expr::Const`]. Layout functions rely on this: evaluating one on a literal lane yields a
/// literal position without an interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// A literal.
    Const(u32),
    /// The current value of a range.
    Range(RangeId),
    /// A binary operation.
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// Operators available in index expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Mul,
    Div,
    Rem,
    Shr,
    BitAnd,
}

impl BinaryOp {
    fn apply(&self, lhs: u32, rhs: u32) -> Option<u32> {
        match self {
            BinaryOp::Add => lhs.checked_add(rhs),
            BinaryOp::Mul => lhs.checked_mul(rhs),
            BinaryOp::Div => lhs.checked_div(rhs),
            BinaryOp::Rem => lhs.checked_rem(rhs),
            BinaryOp::Shr => lhs.checked_shr(rhs),
            BinaryOp::BitAnd => Some(lhs & rhs),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
        }
    }
}

impl Expr {
    pub fn constant(value: u32) -> Self {
        Expr::Const(value)
    }

    pub fn range(id: RangeId) -> Self {
        Expr::Range(id)
    }

    /// The literal value, if the expression folded to one.
    pub fn as_const(&self) -> Option<u32> {
        match self {
            Expr::Const(value) => Some(*value),
            _ => None,
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        if let (Some(l), Some(r)) = (lhs.as_const(), rhs.as_const()) {
            if let Some(value) = op.apply(l, r) {
                return Expr::Const(value);
            }
        }

        match (op, lhs.as_const(), rhs.as_const()) {
            (BinaryOp::Add, Some(0), _) => return rhs,
            (BinaryOp::Add, _, Some(0)) => return lhs,
            (BinaryOp::Mul, Some(0), _) | (BinaryOp::Mul, _, Some(0)) => return Expr::Const(0),
            (BinaryOp::Mul, Some(1), _) => return rhs,
            (BinaryOp::Mul, _, Some(1)) => return lhs,
            (BinaryOp::Div, _, Some(1)) | (BinaryOp::Shr, _, Some(0)) => return lhs,
            (BinaryOp::Rem, _, Some(1)) => return Expr::Const(0),
            (BinaryOp::Div | BinaryOp::Rem | BinaryOp::Shr | BinaryOp::BitAnd, Some(0), _) => {
                return Expr::Const(0);
            }
            _ => {}
        }

        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Evaluate with the given range values. Returns `None` when a range is unbound or the
    /// arithmetic overflows or divides by zero.
    pub fn eval<F: Fn(RangeId) -> Option<u32>>(&self, values: &F) -> Option<u32> {
        match self {
            Expr::Const(value) => Some(*value),
            Expr::Range(id) => values(*id),
            Expr::Binary { op, lhs, rhs } => op.apply(lhs.eval(values)?, rhs.eval(values)?),
        }
    }

    /// Substitute a literal for one range and fold.
    pub fn bind(&self, id: RangeId, value: u32) -> Expr {
        match self {
            Expr::Range(current) if *current == id => Expr::Const(value),
            Expr::Const(_) | Expr::Range(_) => self.clone(),
            Expr::Binary { op, lhs, rhs } => {
                Expr::binary(*op, lhs.bind(id, value), rhs.bind(id, value))
            }
        }
    }

    /// All ranges referenced by the expression, in first-use order.
    pub fn ranges(&self) -> Vec<RangeId> {
        let mut out = Vec::new();
        self.collect_ranges(&mut out);
        out
    }

    fn collect_ranges(&self, out: &mut Vec<RangeId>) {
        match self {
            Expr::Const(_) => {}
            Expr::Range(id) => {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_ranges(out);
                rhs.collect_ranges(out);
            }
        }
    }
}

impl From<u32> for Expr {
    fn from(value: u32) -> Self {
        Expr::Const(value)
    }
}

impl From<&Expr> for Expr {
    fn from(value: &Expr) -> Self {
        value.clone()
    }
}

impl From<RangeId> for Expr {
    fn from(value: RangeId) -> Self {
        Expr::Range(value)
    }
}

macro_rules! impl_binary {
    ($trait:ident, $func:ident, $op:expr) => {
        impl<R: Into<Expr>> $trait<R> for Expr {
            type Output = Expr;

            fn $func(self, rhs: R) -> Expr {
                Expr::binary($op, self, rhs.into())
            }
        }

        impl<R: Into<Expr>> $trait<R> for &Expr {
            type Output = Expr;

            fn $func(self, rhs: R) -> Expr {
                Expr::binary($op, self.clone(), rhs.into())
            }
        }
    };
}

impl_binary!(Add, add, BinaryOp::Add);
impl_binary!(Mul, mul, BinaryOp::Mul);
impl_binary!(Div, div, BinaryOp::Div);
impl_binary!(Rem, rem, BinaryOp::Rem);
impl_binary!(Shr, shr, BinaryOp::Shr);
impl_binary!(BitAnd, bitand, BinaryOp::BitAnd);

impl Display for Expr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Expr::Const(value) => write!(f, "{value}"),
            Expr::Range(id) => write!(f, "{id}"),
            Expr::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_fold() {
        let expr = (Expr::constant(13) >> 2u32) * 8u32 + (Expr::constant(13) & 3u32);

        assert_eq!(expr, Expr::Const(3 * 8 + 1));
    }

    #[test]
    fn identities_keep_ranges_untouched() {
        let r = Expr::range(RangeId(4));

        assert_eq!(&r + 0u32, r);
        assert_eq!(&r * 1u32, r);
        assert_eq!(&r * 0u32, Expr::Const(0));
        assert_eq!(&r % 1u32, Expr::Const(0));
    }

    #[test]
    fn eval_and_bind_agree() {
        let tid = RangeId(1);
        let expr = (Expr::range(tid) / 32u32) % 4u32 * 16u32 + Expr::range(tid) % 32u32;

        for value in [0, 31, 32, 77, 127] {
            let evaluated = expr.eval(&|id| (id == tid).then_some(value));
            assert_eq!(evaluated, expr.bind(tid, value).as_const());
        }
        assert_eq!(expr.ranges(), alloc::vec![tid]);
    }

    #[test]
    fn unbound_range_does_not_evaluate() {
        let expr = Expr::range(RangeId(0)) + 1u32;

        assert_eq!(expr.eval(&|_| None), None);
    }
}
