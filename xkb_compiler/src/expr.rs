//! Expression resolution.
//!
//! The section compilers call into these small resolvers to coerce AST
//! expressions into booleans, integers, levels, groups, strings, keysyms
//! and modifier masks. Resolution failures return `None`; the caller
//! decides the diagnostic and whether it is fatal.

use std::rc::Rc;

use xkb_core::message::MessageCode;
use xkb_core::mods::{ModIndex, ModKind, ModMask, ModSet, MOD_REAL_MASK_ALL};
use xkb_core::{log_err, log_warn, Atom, Context, Keysym};

use crate::ast::{BinOp, Expr, UnOp};

pub const MAX_GROUPS: u32 = xkb_core::MAX_GROUPS as u32;

/// Splits a left-hand side into `(element, field, array index)`.
pub fn resolve_lhs<'e>(
    ctx: &Context,
    expr: &'e Expr,
) -> Option<(Option<Rc<str>>, Rc<str>, Option<&'e Expr>)> {
    match expr {
        Expr::Ident(atom) => Some((None, ctx.atom_text(*atom), None)),
        Expr::FieldRef { element, field } => {
            Some((Some(ctx.atom_text(*element)), ctx.atom_text(*field), None))
        }
        Expr::ArrayRef {
            element,
            field,
            entry,
        } => Some((
            (*element).map(|e| ctx.atom_text(e)),
            ctx.atom_text(*field),
            Some(entry),
        )),
        _ => None,
    }
}

pub fn resolve_string(ctx: &Context, expr: &Expr) -> Option<Atom> {
    let _ = ctx;
    match expr {
        Expr::String(atom) => Some(*atom),
        _ => None,
    }
}

pub fn resolve_boolean(ctx: &Context, expr: &Expr) -> Option<bool> {
    match expr {
        Expr::Boolean(b) => Some(*b),
        Expr::Ident(atom) => {
            let text = ctx.atom_text(*atom);
            match &*text.to_ascii_lowercase() {
                "true" | "yes" | "on" => Some(true),
                "false" | "no" | "off" => Some(false),
                _ => None,
            }
        }
        Expr::Unary {
            op: UnOp::Not | UnOp::Invert,
            expr,
        } => resolve_boolean(ctx, expr).map(|b| !b),
        _ => None,
    }
}

pub fn resolve_integer(ctx: &Context, expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Integer(v) => Some(*v),
        Expr::Unary { op, expr } => {
            let v = resolve_integer(ctx, expr)?;
            match op {
                UnOp::Negate => Some(-v),
                UnOp::UnaryPlus => Some(v),
                UnOp::Invert => Some(!v),
                UnOp::Not => None,
            }
        }
        Expr::Binary { op, left, right } => {
            let l = resolve_integer(ctx, left)?;
            let r = resolve_integer(ctx, right)?;
            match op {
                BinOp::Add => l.checked_add(r),
                BinOp::Subtract => l.checked_sub(r),
                BinOp::Multiply => l.checked_mul(r),
                BinOp::Divide => {
                    if r == 0 {
                        log_err!(
                            ctx,
                            Some(MessageCode::InvalidValue),
                            "cannot divide by zero"
                        );
                        return None;
                    }
                    Some(l / r)
                }
                BinOp::Assign => None,
            }
        }
        _ => None,
    }
}

/// A shift level: `LevelN` or an integer, one-based in the source,
/// zero-based in the result.
pub fn resolve_level(ctx: &Context, expr: &Expr) -> Option<u32> {
    let value = match expr {
        Expr::Ident(atom) => {
            let text = ctx.atom_text(*atom);
            let lower = text.to_ascii_lowercase();
            lower.strip_prefix("level")?.parse::<i64>().ok()?
        }
        _ => resolve_integer(ctx, expr)?,
    };
    if value < 1 {
        log_err!(
            ctx,
            Some(MessageCode::UnsupportedShiftLevel),
            "shift level {} is out of range",
            value
        );
        return None;
    }
    Some((value - 1) as u32)
}

/// A layout: `GroupN` or an integer in `1..=4`, zero-based in the
/// result.
pub fn resolve_group(ctx: &Context, expr: &Expr) -> Option<u32> {
    let value = match expr {
        Expr::Ident(atom) => {
            let text = ctx.atom_text(*atom);
            let lower = text.to_ascii_lowercase();
            lower.strip_prefix("group")?.parse::<i64>().ok()?
        }
        _ => resolve_integer(ctx, expr)?,
    };
    if !(1..=i64::from(MAX_GROUPS)).contains(&value) {
        log_err!(
            ctx,
            Some(MessageCode::UnsupportedGroupIndex),
            "group index {} is out of range (1..{})",
            value,
            MAX_GROUPS
        );
        return None;
    }
    Some((value - 1) as u32)
}

pub fn resolve_keysym(ctx: &Context, expr: &Expr) -> Option<Keysym> {
    match expr {
        Expr::Ident(atom) => {
            let text = ctx.atom_text(*atom);
            Keysym::from_name(&text)
        }
        Expr::Integer(v) if (0..=9).contains(v) => Some(Keysym(0x30 + *v as u32)),
        Expr::Integer(v) if (0..=i64::from(Keysym::MAX)).contains(v) => Some(Keysym(*v as u32)),
        _ => None,
    }
}

/// Resolves a single identifier against a lookup table,
/// case-insensitively.
pub fn resolve_enum<T: Copy>(ctx: &Context, expr: &Expr, lookup: &[(&str, T)]) -> Option<T> {
    let Expr::Ident(atom) = expr else {
        return None;
    };
    let text = ctx.atom_text(*atom);
    lookup
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(&text))
        .map(|&(_, value)| value)
}

/// Resolves a mask expression (`A+B`, `A-B`, `~A`, names from `lookup`,
/// integers).
pub fn resolve_mask_lookup(ctx: &Context, expr: &Expr, lookup: &[(&str, u32)]) -> Option<u32> {
    match expr {
        Expr::Ident(atom) => {
            let text = ctx.atom_text(*atom);
            lookup
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&text))
                .map(|&(_, value)| value)
        }
        Expr::Integer(v) => u32::try_from(*v).ok(),
        Expr::Binary {
            op: BinOp::Add,
            left,
            right,
        } => Some(resolve_mask_lookup(ctx, left, lookup)? | resolve_mask_lookup(ctx, right, lookup)?),
        Expr::Binary {
            op: BinOp::Subtract,
            left,
            right,
        } => {
            Some(resolve_mask_lookup(ctx, left, lookup)? & !resolve_mask_lookup(ctx, right, lookup)?)
        }
        Expr::Unary {
            op: UnOp::Invert,
            expr,
        } => Some(!resolve_mask_lookup(ctx, expr, lookup)?),
        _ => None,
    }
}

fn real_mod_bit(name: &str) -> Option<ModMask> {
    Some(match &*name.to_ascii_lowercase() {
        "shift" => 1 << 0,
        "lock" => 1 << 1,
        "control" | "ctrl" => 1 << 2,
        "mod1" => 1 << 3,
        "mod2" => 1 << 4,
        "mod3" => 1 << 5,
        "mod4" => 1 << 6,
        "mod5" => 1 << 7,
        "none" => 0,
        "all" => MOD_REAL_MASK_ALL,
        _ => return None,
    })
}

/// The index of a single named modifier.
pub fn resolve_mod_index(
    ctx: &Context,
    mods: &ModSet,
    kind: Option<ModKind>,
    expr: &Expr,
) -> Option<ModIndex> {
    let Expr::Ident(atom) = expr else {
        return None;
    };
    mods.mod_index(*atom, kind).or_else(|| {
        log_err!(
            ctx,
            Some(MessageCode::UndeclaredVirtualModifier),
            "no modifier named \"{}\" is declared",
            ctx.atom_text(*atom)
        );
        None
    })
}

/// A modifier mask over the declared modifiers: real names, virtual
/// names (when permitted by `kind`), `none`, `all`, `+`/`-` arithmetic
/// and `~` complement.
pub fn resolve_mod_mask(
    ctx: &Context,
    mods: &ModSet,
    kind: Option<ModKind>,
    expr: &Expr,
) -> Option<ModMask> {
    match expr {
        Expr::Ident(atom) => {
            let text = ctx.atom_text(*atom);
            if let Some(bit) = real_mod_bit(&text) {
                if kind != Some(ModKind::Virtual) {
                    return Some(bit);
                }
            }
            if let Some(idx) = mods.mod_index(*atom, kind) {
                return Some(1 << idx);
            }
            log_err!(
                ctx,
                Some(MessageCode::UndeclaredVirtualModifier),
                "modifier mask refers to undeclared modifier \"{}\"",
                text
            );
            None
        }
        Expr::Integer(v) => {
            let mask = u32::try_from(*v).ok()?;
            if mask & !MOD_REAL_MASK_ALL != 0 {
                log_warn!(
                    ctx,
                    Some(MessageCode::UnsupportedModifierMask),
                    "numeric modifier mask 0x{:x} has bits outside the real modifiers",
                    mask
                );
            }
            Some(mask & MOD_REAL_MASK_ALL)
        }
        Expr::Binary {
            op: BinOp::Add,
            left,
            right,
        } => Some(resolve_mod_mask(ctx, mods, kind, left)? | resolve_mod_mask(ctx, mods, kind, right)?),
        Expr::Binary {
            op: BinOp::Subtract,
            left,
            right,
        } => {
            Some(resolve_mod_mask(ctx, mods, kind, left)? & !resolve_mod_mask(ctx, mods, kind, right)?)
        }
        Expr::Unary {
            op: UnOp::Invert,
            expr,
        } => Some(!resolve_mod_mask(ctx, mods, kind, expr)?),
        _ => None,
    }
}

/// A pointer button: `default`, `buttonN` or an integer.
pub fn resolve_button(ctx: &Context, expr: &Expr) -> Option<i64> {
    const BUTTONS: &[(&str, u32)] = &[
        ("default", 0),
        ("button1", 1),
        ("button2", 2),
        ("button3", 3),
        ("button4", 4),
        ("button5", 5),
    ];
    if let Some(v) = resolve_enum(ctx, expr, BUTTONS) {
        return Some(i64::from(v));
    }
    resolve_integer(ctx, expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xkb_core::ContextFlags;

    fn ctx() -> Context {
        Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES)
    }

    fn ident(ctx: &Context, name: &str) -> Expr {
        Expr::Ident(ctx.atom_intern(name))
    }

    #[test]
    fn test_resolve_boolean() {
        let ctx = ctx();
        assert_eq!(resolve_boolean(&ctx, &ident(&ctx, "Yes")), Some(true));
        assert_eq!(resolve_boolean(&ctx, &ident(&ctx, "off")), Some(false));
        assert_eq!(resolve_boolean(&ctx, &Expr::Boolean(true)), Some(true));
        assert_eq!(
            resolve_boolean(
                &ctx,
                &Expr::Unary {
                    op: UnOp::Not,
                    expr: Box::new(ident(&ctx, "True"))
                }
            ),
            Some(false)
        );
        assert_eq!(resolve_boolean(&ctx, &ident(&ctx, "maybe")), None);
    }

    #[test]
    fn test_resolve_level_and_group() {
        let ctx = ctx();
        assert_eq!(resolve_level(&ctx, &ident(&ctx, "Level2")), Some(1));
        assert_eq!(resolve_level(&ctx, &Expr::Integer(1)), Some(0));
        assert_eq!(resolve_level(&ctx, &Expr::Integer(0)), None);
        assert_eq!(resolve_group(&ctx, &ident(&ctx, "Group4")), Some(3));
        assert_eq!(resolve_group(&ctx, &Expr::Integer(5)), None);
    }

    #[test]
    fn test_resolve_mod_mask_real() {
        let ctx = ctx();
        let mods = ModSet::new_with_real_mods(&ctx);
        let expr = Expr::Binary {
            op: BinOp::Add,
            left: Box::new(ident(&ctx, "Shift")),
            right: Box::new(ident(&ctx, "Control")),
        };
        assert_eq!(resolve_mod_mask(&ctx, &mods, None, &expr), Some(0b101));
        assert_eq!(
            resolve_mod_mask(&ctx, &mods, None, &ident(&ctx, "all")),
            Some(0xff)
        );
        assert_eq!(
            resolve_mod_mask(&ctx, &mods, None, &ident(&ctx, "none")),
            Some(0)
        );
    }

    #[test]
    fn test_resolve_mod_mask_virtual() {
        let ctx = ctx();
        let mut mods = ModSet::new_with_real_mods(&ctx);
        let numlock = ctx.atom_intern("NumLock");
        let idx = mods.add_virtual(numlock, 0).unwrap();
        assert_eq!(
            resolve_mod_mask(&ctx, &mods, None, &ident(&ctx, "NumLock")),
            Some(1 << idx)
        );
        // Undeclared names fail.
        assert_eq!(
            resolve_mod_mask(&ctx, &mods, None, &ident(&ctx, "Hyper")),
            None
        );
    }

    #[test]
    fn test_resolve_mask_subtract() {
        let ctx = ctx();
        let mods = ModSet::new_with_real_mods(&ctx);
        let expr = Expr::Binary {
            op: BinOp::Subtract,
            left: Box::new(ident(&ctx, "all")),
            right: Box::new(ident(&ctx, "Lock")),
        };
        assert_eq!(resolve_mod_mask(&ctx, &mods, None, &expr), Some(0xff & !0b10));
    }

    #[test]
    fn test_resolve_integer_arithmetic() {
        let ctx = ctx();
        let expr = Expr::Binary {
            op: BinOp::Add,
            left: Box::new(Expr::Integer(7)),
            right: Box::new(Expr::Unary {
                op: UnOp::Negate,
                expr: Box::new(Expr::Integer(3)),
            }),
        };
        assert_eq!(resolve_integer(&ctx, &expr), Some(4));
    }

    #[test]
    fn test_resolve_lhs() {
        let ctx = ctx();
        let expr = Expr::ArrayRef {
            element: Some(ctx.atom_intern("key")),
            field: ctx.atom_intern("symbols"),
            entry: Box::new(ident(&ctx, "Group1")),
        };
        let (elem, field, index) = resolve_lhs(&ctx, &expr).unwrap();
        assert_eq!(elem.as_deref(), Some("key"));
        assert_eq!(&*field, "symbols");
        assert!(index.is_some());
    }
}
