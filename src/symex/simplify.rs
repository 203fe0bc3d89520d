//! Expression simplifier.
//!
//! Rewrites expression trees into a smaller canonical form: constants fold,
//! identities collapse, shifts and bit tests are pushed towards the leaves
//! and register slice reads are canonicalized into sub-register variables.
//! Structural equality of two simplified trees then doubles as semantic
//! equality, which is how the optimizer decides value-preservation
//! questions (see [`expr_equals`]).
//!
//! # Cache
//!
//! Results are memoized in a process-wide concurrent cache keyed by the
//! input tree. The cache holds plain expression trees, so it never dangles;
//! it must still be purged through [`purge_simplifier_cache`] at natural
//! region boundaries to bound its footprint. The symbolic rewrite pass does
//! this after every block.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;

use crate::symex::expr::{sign_extend, width_mask};
use crate::symex::{Expr, ExprRef, MathOp, Variable};

/// Upper bound on top-level rule applications per node. Reaching it means a
/// rule pair oscillates; the current form is returned as-is.
const MAX_RULE_APPLICATIONS: usize = 32;

type Cache = DashMap<(ExprRef, bool), ExprRef, FxBuildHasher>;

static CACHE: OnceLock<Cache> = OnceLock::new();

fn cache() -> &'static Cache {
    CACHE.get_or_init(|| DashMap::with_hasher(FxBuildHasher))
}

/// Drops every memoized simplification.
///
/// Must be called whenever a consumer invalidates the context its cached
/// queries were made under; the symbolic rewrite pass purges at the end of
/// every rewritten block.
pub fn purge_simplifier_cache() {
    if let Some(c) = CACHE.get() {
        c.clear();
    }
}

/// Simplifies an expression.
///
/// `aggressive` additionally distributes shifts and bit tests over bitwise
/// operators and canonicalizes low-bit masks into resize chains; it produces
/// the most canonical form at a higher rewrite cost.
#[must_use]
pub fn simplify(expr: &ExprRef, aggressive: bool) -> ExprRef {
    match &**expr {
        Expr::Const { .. } | Expr::Var { .. } => return Arc::clone(expr),
        _ => {}
    }
    if let Some(hit) = cache().get(&(Arc::clone(expr), aggressive)) {
        return hit.value().clone();
    }

    // Children first, then the node itself to a local fixed point.
    let mut current = match &**expr {
        Expr::Unary { op, src, width } => {
            let src_s = simplify(src, aggressive);
            if Arc::ptr_eq(&src_s, src) {
                Arc::clone(expr)
            } else {
                Arc::new(Expr::Unary {
                    op: *op,
                    src: src_s,
                    width: *width,
                })
            }
        }
        Expr::Binary {
            op,
            lhs,
            rhs,
            width,
        } => {
            let lhs_s = simplify(lhs, aggressive);
            let rhs_s = simplify(rhs, aggressive);
            if Arc::ptr_eq(&lhs_s, lhs) && Arc::ptr_eq(&rhs_s, rhs) {
                Arc::clone(expr)
            } else {
                Arc::new(Expr::Binary {
                    op: *op,
                    lhs: lhs_s,
                    rhs: rhs_s,
                    width: *width,
                })
            }
        }
        Expr::Const { .. } | Expr::Var { .. } => unreachable!(),
    };

    for _ in 0..MAX_RULE_APPLICATIONS {
        if let Some(value) = current.value() {
            current = Expr::constant(value, current.width());
            break;
        }
        match apply_rules(&current, aggressive) {
            Some(next) => current = next,
            None => break,
        }
    }

    cache().insert((Arc::clone(expr), aggressive), Arc::clone(&current));
    current
}

/// Compares two expressions for semantic equality.
///
/// Both sides are aggressively simplified and compared structurally; a
/// `false` result therefore means "not provably equal".
#[must_use]
pub fn expr_equals(a: &ExprRef, b: &ExprRef) -> bool {
    simplify(a, true) == simplify(b, true)
}

/// Splits an expression into a base and a folded constant displacement.
///
/// Peels `base + c` and `base - c` shells, accumulating the signed
/// displacement. Returns the expression itself with a zero displacement when
/// no constant term is present.
#[must_use]
pub fn extract_displacement(expr: &ExprRef) -> (ExprRef, i64) {
    let mut base = Arc::clone(expr);
    let mut offset = 0i64;
    loop {
        let next = match &*base {
            Expr::Binary {
                op: MathOp::Add,
                lhs,
                rhs,
                ..
            } => {
                if let Some(c) = rhs.as_constant() {
                    offset = offset.wrapping_add(sign_extend(c, rhs.width()) as i64);
                    Arc::clone(lhs)
                } else if let Some(c) = lhs.as_constant() {
                    offset = offset.wrapping_add(sign_extend(c, lhs.width()) as i64);
                    Arc::clone(rhs)
                } else {
                    break;
                }
            }
            Expr::Binary {
                op: MathOp::Sub,
                lhs,
                rhs,
                ..
            } => {
                if let Some(c) = rhs.as_constant() {
                    offset = offset.wrapping_sub(sign_extend(c, rhs.width()) as i64);
                    Arc::clone(lhs)
                } else {
                    break;
                }
            }
            _ => break,
        };
        base = next;
    }
    (base, offset)
}

fn bin(op: MathOp, lhs: ExprRef, rhs: ExprRef, width: u32) -> ExprRef {
    Arc::new(Expr::Binary {
        op,
        lhs,
        rhs,
        width,
    })
}

fn apply_rules(expr: &ExprRef, aggressive: bool) -> Option<ExprRef> {
    match &**expr {
        Expr::Unary { op, src, width } => unary_rules(*op, src, *width),
        Expr::Binary {
            op,
            lhs,
            rhs,
            width,
        } => binary_rules(*op, lhs, rhs, *width, aggressive),
        Expr::Const { .. } | Expr::Var { .. } => None,
    }
}

fn unary_rules(op: MathOp, src: &ExprRef, width: u32) -> Option<ExprRef> {
    match op {
        MathOp::Neg | MathOp::Not => {
            if let Expr::Unary {
                op: inner_op,
                src: inner,
                ..
            } = &**src
            {
                if *inner_op == op {
                    return Some(Arc::clone(inner));
                }
            }
            None
        }
        MathOp::UCast | MathOp::Cast => cast_rules(op, src, width),
        _ => None,
    }
}

fn cast_rules(op: MathOp, src: &ExprRef, width: u32) -> Option<ExprRef> {
    if width == src.width() {
        return Some(Arc::clone(src));
    }

    // A truncated register read is a slice read.
    if width < src.width() {
        if let Expr::Var {
            var: Variable::Register(reg),
        } = &**src
        {
            return Some(Expr::register(reg.select(width, reg.bit_offset)));
        }
    }

    // Collapse cast chains.
    if let Expr::Unary {
        op: inner_op @ (MathOp::UCast | MathOp::Cast),
        src: inner,
        width: inner_width,
    } = &**src
    {
        let source_width = inner.width();
        if width <= (*inner_width).min(source_width) {
            // Truncating below both the source and the inner cast width
            // keeps only bits that came straight from the source.
            return Some(Expr::resize(inner, width, false));
        }
        if source_width < width && width <= *inner_width {
            // Still within the inner extension: one cast suffices.
            return Some(Expr::resize(inner, width, *inner_op == MathOp::Cast));
        }
        // Re-extending past a genuine extension (never past a truncation).
        if *inner_width > source_width {
            match (op, inner_op) {
                (MathOp::UCast, MathOp::UCast) | (MathOp::Cast, MathOp::UCast) => {
                    // Zero extension also cleared the sign bit.
                    return Some(Expr::resize(inner, width, false));
                }
                (MathOp::Cast, MathOp::Cast) => return Some(Expr::resize(inner, width, true)),
                _ => {}
            }
        }
    }

    // A sign extension whose sign bit is provably clear is a zero extension.
    if op == MathOp::Cast && width > src.width() {
        let sw = src.width();
        if sw < 64 && src.possible_bits() & (1u64 << (sw - 1)) == 0 {
            return Some(Expr::resize(src, width, false));
        }
    }
    None
}

/// Recognizes expressions whose value is a zero-extended register slice.
fn as_reg_slice(expr: &ExprRef) -> Option<crate::arch::RegisterDesc> {
    match &**expr {
        Expr::Var {
            var: Variable::Register(reg),
        } => Some(*reg),
        Expr::Unary {
            op: MathOp::UCast,
            src,
            ..
        } => match &**src {
            Expr::Var {
                var: Variable::Register(reg),
            } => Some(*reg),
            _ => None,
        },
        _ => None,
    }
}

/// Attempts `lo | (hi << c)  =>  concatenated register slice`.
fn concat_rule(lo: &ExprRef, shifted: &ExprRef, width: u32) -> Option<ExprRef> {
    let Expr::Binary {
        op: MathOp::Shl,
        lhs: hi,
        rhs: amount,
        ..
    } = &**shifted
    else {
        return None;
    };
    let shift = u32::try_from(amount.value()?).ok()?;
    let lo_slice = as_reg_slice(lo)?;
    let hi_slice = as_reg_slice(hi)?;
    if lo_slice.id() != hi_slice.id()
        || lo_slice.bit_count != shift
        || hi_slice.bit_offset != lo_slice.bit_offset + shift
    {
        return None;
    }
    let combined = lo_slice.select(lo_slice.bit_count + hi_slice.bit_count, lo_slice.bit_offset);
    if !combined.is_valid() || combined.bit_count > width {
        return None;
    }
    Some(Expr::resize(&Expr::register(combined), width, false))
}

#[allow(clippy::too_many_lines)]
fn binary_rules(
    op: MathOp,
    lhs: &ExprRef,
    rhs: &ExprRef,
    width: u32,
    aggressive: bool,
) -> Option<ExprRef> {
    let mask = width_mask(width);

    // Constants belong on the right of commutative operators.
    if op.is_commutative() && lhs.is_constant() && !rhs.is_constant() {
        return Some(bin(op, Arc::clone(rhs), Arc::clone(lhs), width));
    }

    // x - c  =>  x + (-c), so displacement chains have a single shape.
    if op == MathOp::Sub {
        if let Some(c) = rhs.as_constant() {
            return Some(bin(
                MathOp::Add,
                Arc::clone(lhs),
                Expr::constant(c.wrapping_neg(), width),
                width,
            ));
        }
    }

    // Rules on identical operands.
    if lhs == rhs {
        match op {
            MathOp::Sub | MathOp::Xor => return Some(Expr::constant(0, width)),
            MathOp::And | MathOp::Or => return Some(Arc::clone(lhs)),
            MathOp::Eq | MathOp::SLe | MathOp::SGe | MathOp::ULe | MathOp::UGe => {
                return Some(Expr::constant(1, 1))
            }
            MathOp::Ne | MathOp::SLt | MathOp::SGt | MathOp::ULt | MathOp::UGt => {
                return Some(Expr::constant(0, 1))
            }
            _ => {}
        }
    }

    let c = rhs.as_constant();
    match op {
        MathOp::Add => {
            if c == Some(0) {
                return Some(Arc::clone(lhs));
            }
            if let (Some(c), Expr::Binary {
                op: MathOp::Add,
                lhs: x,
                rhs: c1,
                ..
            }) = (c, &**lhs)
            {
                if let Some(c1) = c1.as_constant() {
                    return Some(bin(
                        MathOp::Add,
                        Arc::clone(x),
                        Expr::constant(c1.wrapping_add(c), width),
                        width,
                    ));
                }
            }
        }
        MathOp::Mul | MathOp::IMul => {
            if c == Some(0) {
                return Some(Expr::constant(0, width));
            }
            if c == Some(1) {
                return Some(Arc::clone(lhs));
            }
        }
        MathOp::Div | MathOp::IDiv => {
            if c == Some(1) {
                return Some(Arc::clone(lhs));
            }
        }
        MathOp::Rem | MathOp::IRem => {
            if c == Some(1) {
                return Some(Expr::constant(0, width));
            }
        }
        MathOp::And => {
            if c == Some(0) {
                return Some(Expr::constant(0, width));
            }
            if c == Some(mask) {
                return Some(Arc::clone(lhs));
            }
            if let Some(c) = c {
                if lhs.possible_bits() & !c == 0 {
                    return Some(Arc::clone(lhs));
                }
                if let Expr::Binary {
                    op: MathOp::And,
                    lhs: x,
                    rhs: c1,
                    ..
                } = &**lhs
                {
                    if let Some(c1) = c1.as_constant() {
                        return Some(bin(
                            MathOp::And,
                            Arc::clone(x),
                            Expr::constant(c1 & c, width),
                            width,
                        ));
                    }
                }
                // A low-bit mask is a truncate-extend chain in disguise.
                if aggressive && c != 0 && c.wrapping_add(1).is_power_of_two() {
                    let bits = c.trailing_ones();
                    let truncated = simplify(&Expr::resize(lhs, bits, false), aggressive);
                    return Some(Expr::resize(&truncated, width, false));
                }
            }
        }
        MathOp::Or => {
            if c == Some(0) {
                return Some(Arc::clone(lhs));
            }
            if c == Some(mask) {
                return Some(Expr::constant(mask, width));
            }
            if let (Some(c), Expr::Binary {
                op: MathOp::Or,
                lhs: x,
                rhs: c1,
                ..
            }) = (c, &**lhs)
            {
                if let Some(c1) = c1.as_constant() {
                    return Some(bin(
                        MathOp::Or,
                        Arc::clone(x),
                        Expr::constant(c1 | c, width),
                        width,
                    ));
                }
            }
            // Adjacent register slices merge back into one read.
            if let Some(merged) = concat_rule(lhs, rhs, width) {
                return Some(merged);
            }
            if let Some(merged) = concat_rule(rhs, lhs, width) {
                return Some(merged);
            }
        }
        MathOp::Xor => {
            if c == Some(0) {
                return Some(Arc::clone(lhs));
            }
            if c == Some(mask) {
                return Some(Expr::unary(MathOp::Not, Arc::clone(lhs)));
            }
        }
        MathOp::Shl => {
            if let Some(c) = c {
                if c == 0 {
                    return Some(Arc::clone(lhs));
                }
                if c >= u64::from(width) {
                    return Some(Expr::constant(0, width));
                }
                if let Expr::Binary {
                    op: MathOp::Shl,
                    lhs: x,
                    rhs: c1,
                    ..
                } = &**lhs
                {
                    if let Some(c1) = c1.as_constant() {
                        return Some(bin(
                            MathOp::Shl,
                            Arc::clone(x),
                            Expr::constant(c1.saturating_add(c), 8),
                            width,
                        ));
                    }
                }
            }
        }
        MathOp::Shr => {
            if let Some(c) = c.map(|c| c.min(u64::from(u32::MAX)) as u32) {
                if let Some(result) = shr_rules(lhs, c, width, aggressive) {
                    return Some(result);
                }
            }
        }
        MathOp::BitTest => {
            if let Some(index) = c.map(|c| c.min(u64::from(u32::MAX)) as u32) {
                if let Some(result) = bit_test_rules(lhs, index, aggressive) {
                    return Some(result);
                }
            }
        }
        _ => {}
    }
    None
}

fn shr_rules(lhs: &ExprRef, c: u32, width: u32, aggressive: bool) -> Option<ExprRef> {
    if c == 0 {
        return Some(Arc::clone(lhs));
    }
    if c >= width || lhs.possible_bits() >> c == 0 {
        return Some(Expr::constant(0, width));
    }
    match &**lhs {
        // A shifted register read is a slice read.
        Expr::Var {
            var: Variable::Register(reg),
        } if c < reg.bit_count => {
            let slice = reg.select(reg.bit_count - c, reg.bit_offset + c);
            Some(Expr::resize(&Expr::register(slice), width, false))
        }
        Expr::Binary {
            op: MathOp::Shr,
            lhs: x,
            rhs: c1,
            ..
        } => {
            let c1 = c1.as_constant()?;
            Some(bin(
                MathOp::Shr,
                Arc::clone(x),
                Expr::constant(c1.saturating_add(u64::from(c)), 8),
                width,
            ))
        }
        Expr::Binary {
            op: MathOp::Shl,
            lhs: x,
            rhs: c1,
            ..
        } if c1.value() == Some(u64::from(c)) => {
            // (x << c) >> c keeps the low bits.
            Some(simplify(
                &bin(
                    MathOp::And,
                    Arc::clone(x),
                    Expr::constant(width_mask(width - c), width),
                    width,
                ),
                aggressive,
            ))
        }
        Expr::Unary {
            op: MathOp::UCast,
            src,
            ..
        } if aggressive && c < src.width() => {
            let shifted = simplify(
                &bin(
                    MathOp::Shr,
                    Arc::clone(src),
                    Expr::constant(u64::from(c), 8),
                    src.width(),
                ),
                aggressive,
            );
            Some(Expr::resize(&shifted, width, false))
        }
        Expr::Binary {
            op: op @ (MathOp::Or | MathOp::Xor | MathOp::And),
            lhs: a,
            rhs: b,
            ..
        } if aggressive => {
            let amount = Expr::constant(u64::from(c), 8);
            let a = simplify(
                &bin(MathOp::Shr, Arc::clone(a), Arc::clone(&amount), width),
                aggressive,
            );
            let b = simplify(&bin(MathOp::Shr, Arc::clone(b), amount, width), aggressive);
            Some(bin(*op, a, b, width))
        }
        _ => None,
    }
}

fn bit_test_rules(lhs: &ExprRef, index: u32, aggressive: bool) -> Option<ExprRef> {
    if index >= lhs.width() || lhs.possible_bits() & (1u64 << index) == 0 {
        return Some(Expr::constant(0, 1));
    }
    match &**lhs {
        // A register bit is a single-bit slice.
        Expr::Var {
            var: Variable::Register(reg),
        } => Some(Expr::register(reg.select(1, reg.bit_offset + index))),
        Expr::Unary {
            op: MathOp::UCast,
            src,
            ..
        } => {
            if index < src.width() {
                Some(Expr::bit(src, index))
            } else {
                Some(Expr::constant(0, 1))
            }
        }
        Expr::Unary {
            op: MathOp::Cast,
            src,
            ..
        } => {
            let effective = index.min(src.width() - 1);
            Some(Expr::bit(src, effective))
        }
        Expr::Binary {
            op: MathOp::Shl,
            lhs: x,
            rhs: amount,
            ..
        } => {
            let amount = u32::try_from(amount.value()?).ok()?;
            if index >= amount {
                Some(Expr::bit(x, index - amount))
            } else {
                Some(Expr::constant(0, 1))
            }
        }
        Expr::Binary {
            op: MathOp::Shr,
            lhs: x,
            rhs: amount,
            ..
        } => {
            let amount = u32::try_from(amount.value()?).ok()?;
            Some(Expr::bit(x, index + amount))
        }
        Expr::Binary {
            op: op @ (MathOp::Or | MathOp::Xor | MathOp::And),
            lhs: a,
            rhs: b,
            ..
        } if aggressive => {
            let a = simplify(&Expr::bit(a, index), aggressive);
            let b = simplify(&Expr::bit(b, index), aggressive);
            Some(bin(*op, a, b, 1))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::RegisterDesc;

    fn c(v: u64, w: u32) -> ExprRef {
        Expr::constant(v, w)
    }

    fn reg(id: u64) -> RegisterDesc {
        RegisterDesc::virt(id, 64)
    }

    fn var(id: u64) -> ExprRef {
        Expr::register(reg(id))
    }

    #[test]
    fn test_constant_folding() {
        let e = Expr::binary(
            Expr::binary(c(2, 64), MathOp::Mul, c(21, 64)),
            MathOp::Add,
            c(0, 64),
        );
        assert_eq!(simplify(&e, false), c(42, 64));
    }

    #[test]
    fn test_identities() {
        let v = var(0);
        for (op, ident) in [
            (MathOp::Add, 0u64),
            (MathOp::Mul, 1),
            (MathOp::Or, 0),
            (MathOp::Xor, 0),
            (MathOp::Shl, 0),
            (MathOp::Shr, 0),
        ] {
            let e = Expr::binary(v.clone(), op, c(ident, 64));
            assert_eq!(simplify(&e, false), v, "{op:?} identity");
        }
        let e = Expr::binary(v.clone(), MathOp::And, c(u64::MAX, 64));
        assert_eq!(simplify(&e, false), v);
        let e = Expr::binary(v.clone(), MathOp::Xor, v.clone());
        assert_eq!(simplify(&e, false), c(0, 64));
    }

    #[test]
    fn test_const_normalizes_right() {
        let e = Expr::binary(c(5, 64), MathOp::Add, var(0));
        let s = simplify(&e, false);
        match &*s {
            Expr::Binary { op, rhs, .. } => {
                assert_eq!(*op, MathOp::Add);
                assert_eq!(rhs.as_constant(), Some(5));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn test_sub_becomes_add() {
        let e = Expr::binary(var(0), MathOp::Sub, c(8, 64));
        let (base, disp) = extract_displacement(&simplify(&e, true));
        assert_eq!(base, var(0));
        assert_eq!(disp, -8);
    }

    #[test]
    fn test_add_chain_folds() {
        let e = Expr::binary(
            Expr::binary(var(0), MathOp::Add, c(8, 64)),
            MathOp::Add,
            c(16, 64),
        );
        let (base, disp) = extract_displacement(&simplify(&e, true));
        assert_eq!(base, var(0));
        assert_eq!(disp, 24);
    }

    #[test]
    fn test_known_zero_mask_drops() {
        // (x & 0xff) >> 8 is provably zero.
        let e = Expr::binary(
            Expr::binary(var(0), MathOp::And, c(0xff, 64)),
            MathOp::Shr,
            c(8, 8),
        );
        assert_eq!(simplify(&e, true), c(0, 64));
    }

    #[test]
    fn test_shift_of_register_is_slice() {
        let e = Expr::binary(var(3), MathOp::Shr, c(8, 8));
        let s = simplify(&e, true);
        assert_eq!(
            s,
            Expr::resize(&Expr::register(reg(3).select(56, 8)), 64, false)
        );
    }

    #[test]
    fn test_slice_concat() {
        // zx(lo) | (zx(hi) << 8) == zx(full 16-bit read)
        let r = reg(7);
        let lo = Expr::resize(&Expr::register(r.select(8, 0)), 16, false);
        let hi = Expr::resize(&Expr::register(r.select(8, 8)), 16, false);
        let e = Expr::binary(
            lo,
            MathOp::Or,
            Expr::binary(hi, MathOp::Shl, c(8, 8)),
        );
        assert_eq!(simplify(&e, true), Expr::register(r.select(16, 0)));
    }

    #[test]
    fn test_composition_matches_whole_read() {
        // Composing the two halves of a register compares equal to reading
        // the register at once.
        let r = reg(7);
        let lo = Expr::resize(&Expr::register(r.select(8, 0)), 16, false);
        let hi = Expr::resize(&Expr::register(r.select(8, 8)), 16, false);
        let composed = Expr::binary(
            lo,
            MathOp::Or,
            Expr::binary(hi, MathOp::Shl, c(8, 8)),
        );
        let whole = Expr::register(r.select(16, 0));
        assert!(expr_equals(&composed, &whole));
        // And the high half of the composition matches a shifted whole read.
        let composed_high = Expr::binary(composed, MathOp::Shr, c(8, 8));
        let whole_high = Expr::binary(whole, MathOp::Shr, c(8, 8));
        assert!(expr_equals(&composed_high, &whole_high));
    }

    #[test]
    fn test_bit_test_canonicalization() {
        let flags = RegisterDesc::flags_reg();
        let e = Expr::bit(&Expr::register(flags), 6);
        assert_eq!(simplify(&e, true), Expr::register(flags.select(1, 6)));

        // Bit of a shifted value maps through the shift.
        let e = Expr::bit(
            &Expr::binary(Expr::register(flags), MathOp::Shl, c(2, 8)),
            1,
        );
        assert_eq!(simplify(&e, true), c(0, 1));
    }

    #[test]
    fn test_low_mask_is_truncation() {
        let e = Expr::binary(var(0), MathOp::And, c(1, 64));
        let s = simplify(&e, true);
        assert_eq!(
            s,
            Expr::resize(&Expr::register(reg(0).select(1, 0)), 64, false)
        );
    }

    #[test]
    fn test_cache_purge() {
        let e = Expr::binary(var(0), MathOp::Add, c(0, 64));
        let _ = simplify(&e, false);
        purge_simplifier_cache();
        assert_eq!(simplify(&e, false), var(0));
    }

    #[test]
    fn test_double_negation() {
        let e = Expr::unary(MathOp::Neg, Expr::unary(MathOp::Neg, var(1)));
        assert_eq!(simplify(&e, false), var(1));
        let e = Expr::unary(MathOp::Not, Expr::unary(MathOp::Not, var(1)));
        assert_eq!(simplify(&e, false), var(1));
    }

    #[test]
    fn test_cast_chain() {
        // Truncating an extension sees through to the source.
        let x = Expr::register(reg(0).select(8, 0));
        let widened = Expr::resize(&x, 64, false);
        let narrowed = Expr::resize(&widened, 8, false);
        assert_eq!(simplify(&narrowed, false), x);
    }
}
