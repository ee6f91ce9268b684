//! `virtual_modifiers` statement handling.

use xkb_core::message::MessageCode;
use xkb_core::mods::{ModKind, ModSet};
use xkb_core::{log_err, log_warn, Context};

use crate::ast::{MergeMode, VModDef};
use crate::expr;

/// Declares one virtual modifier, optionally with an explicit mapping to
/// real modifiers. Returns false on error.
pub fn handle_vmod_def(
    ctx: &Context,
    mods: &mut ModSet,
    def: &VModDef,
    merge: MergeMode,
) -> bool {
    let merge = def.merge.resolve(merge);

    let mapping = match &def.value {
        Some(expr) => {
            match expr::resolve_mod_mask(ctx, mods, Some(ModKind::Real), expr) {
                Some(mask) => mask,
                None => {
                    log_err!(
                        ctx,
                        Some(MessageCode::InvalidRealModifier),
                        "declaration of virtual modifier \"{}\" maps to a non-real modifier",
                        ctx.atom_text(def.name)
                    );
                    return false;
                }
            }
        }
        None => 0,
    };

    if let Some(idx) = mods.mod_index(def.name, None) {
        let existing = &mut mods.mods[idx as usize];
        if existing.kind == ModKind::Real {
            log_err!(
                ctx,
                Some(MessageCode::InvalidOperation),
                "cannot declare a virtual modifier named like the real modifier \"{}\"",
                ctx.atom_text(def.name)
            );
            return false;
        }
        if def.value.is_some() && existing.mapping != mapping {
            if merge.clobbers() {
                log_warn!(
                    ctx,
                    Some(MessageCode::ConflictingModmap),
                    "virtual modifier \"{}\" remapped from 0x{:x} to 0x{:x}",
                    ctx.atom_text(def.name),
                    existing.mapping,
                    mapping
                );
                existing.mapping = mapping;
            }
        }
        return true;
    }

    if mods.add_virtual(def.name, mapping).is_none() {
        log_err!(
            ctx,
            Some(MessageCode::InvalidOperation),
            "too many virtual modifiers; \"{}\" ignored",
            ctx.atom_text(def.name)
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use xkb_core::{ContextFlags, Keymap};

    #[test]
    fn test_declaration_and_remapping() {
        let ctx =
            Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES);
        let mut mods = Keymap::new(ctx.clone()).mods;
        let name = ctx.atom_intern("NumLock");

        let def = VModDef {
            merge: MergeMode::Default,
            name,
            value: None,
        };
        assert!(handle_vmod_def(&ctx, &mut mods, &def, MergeMode::Override));
        let idx = mods.mod_index(name, Some(ModKind::Virtual)).unwrap();
        assert_eq!(mods.mods[idx as usize].mapping, 0);

        // Explicit mapping via a second declaration.
        let def = VModDef {
            merge: MergeMode::Default,
            name,
            value: Some(crate::ast::Expr::Ident(ctx.atom_intern("Mod2"))),
        };
        assert!(handle_vmod_def(&ctx, &mut mods, &def, MergeMode::Override));
        assert_eq!(mods.mods[idx as usize].mapping, 1 << 4);
    }

    #[test]
    fn test_real_modifier_name_rejected() {
        let ctx =
            Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES);
        let mut mods = Keymap::new(ctx.clone()).mods;
        let def = VModDef {
            merge: MergeMode::Default,
            name: ctx.atom_intern("Shift"),
            value: None,
        };
        assert!(!handle_vmod_def(&ctx, &mut mods, &def, MergeMode::Override));
    }
}
