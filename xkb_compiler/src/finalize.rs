//! Keymap finalization.
//!
//! Runs after the four section compilers: applies the compat
//! interpretations to keys without explicit actions, binds indicators to
//! the virtual modifiers their interpretations claim, and projects every
//! stored modifier mask onto real modifiers.

use xkb_core::action::apply_modmap_lookup;
use xkb_core::keymap::ExplicitComponents;
use xkb_core::mods::{ModKind, MOD_INVALID};
use xkb_core::{Action, Context, Keymap, SymInterpret};

/// Finds the first interpretation matching a key's keysym and modmap at
/// one level.
fn find_interp<'a>(
    interps: &'a [SymInterpret],
    sym: xkb_core::Keysym,
    modmap: u32,
    level: usize,
) -> Option<&'a SymInterpret> {
    interps.iter().find(|interp| {
        if !interp.sym.is_no_symbol() && interp.sym != sym {
            return false;
        }
        // Interpretations restricted to level one match other levels
        // only with an empty modmap.
        let mods = if interp.level_one_only && level != 0 {
            0
        } else {
            modmap
        };
        interp.match_op.matches(interp.mods.mods, mods)
    })
}

fn apply_interps(keymap: &mut Keymap) {
    let interps = keymap.sym_interprets.clone();
    for key in &mut keymap.keys {
        if key.name == xkb_core::ATOM_NONE || key.explicit.contains(ExplicitComponents::INTERP) {
            continue;
        }
        let modmap = key.modmap;
        let mut vmodmap = 0;
        let mut repeats = None;

        for group in &mut key.groups {
            for (level_idx, level) in group.levels.iter_mut().enumerate() {
                // Only levels producing exactly one keysym take default
                // actions.
                let [sym] = level.syms.as_slice() else {
                    continue;
                };
                let Some(interp) = find_interp(&interps, *sym, modmap, level_idx) else {
                    continue;
                };
                if interp.action != Action::None {
                    level.actions = vec![interp.action];
                }
                if interp.virtual_mod != MOD_INVALID {
                    vmodmap |= 1 << interp.virtual_mod;
                }
                if interp.repeat {
                    repeats = Some(true);
                }
            }
        }

        if !key.explicit.contains(ExplicitComponents::VMODMAP) {
            key.vmodmap |= vmodmap;
        }
        if !key.explicit.contains(ExplicitComponents::REPEAT) {
            if let Some(repeats) = repeats {
                key.repeats = repeats;
            }
        }
    }
}

/// Indicators watching only modifiers inherit the virtual modifier of an
/// interpretation whose action sets one of the same modifiers.
fn bind_indicators(keymap: &mut Keymap) {
    let interps = &keymap.sym_interprets;
    for led in keymap.leds.iter_mut().flatten() {
        if led.which_mods.is_empty()
            || !led.which_groups.is_empty()
            || led.groups != 0
            || led.ctrls != 0
            || led.mods.mods == 0
        {
            continue;
        }
        for interp in interps {
            let Some(mods) = interp.action.mods() else {
                continue;
            };
            if mods.mods & led.mods.mods != 0 && interp.virtual_mod != MOD_INVALID {
                led.mods.mods |= 1 << interp.virtual_mod;
            }
        }
    }
}

/// Computes the virtual-to-real projections and fills in every stored
/// effective mask.
fn resolve_virtual_mods(keymap: &mut Keymap) {
    // Each virtual modifier projects onto the union of the modmaps of
    // the keys claiming it, on top of any explicit mapping.
    for (i, m) in keymap.mods.mods.iter_mut().enumerate() {
        if m.kind != ModKind::Virtual {
            continue;
        }
        let bit = 1u32 << i;
        for key in &keymap.keys {
            if key.vmodmap & bit != 0 {
                m.mapping |= key.modmap;
            }
        }
    }

    let mods = keymap.mods.clone();

    for ty in &mut keymap.types {
        mods.resolve(&mut ty.mods);
        for entry in &mut ty.entries {
            mods.resolve(&mut entry.mods);
            mods.resolve(&mut entry.preserve);
        }
    }

    for interp in &mut keymap.sym_interprets {
        mods.resolve(&mut interp.mods);
        if let Some(action_mods) = interp.action.mods_mut() {
            mods.resolve(action_mods);
        }
    }

    for led in keymap.leds.iter_mut().flatten() {
        mods.resolve(&mut led.mods);
    }

    for key in &mut keymap.keys {
        let modmap = key.modmap;
        for group in &mut key.groups {
            for level in &mut group.levels {
                for action in &mut level.actions {
                    apply_modmap_lookup(action, modmap);
                    if let Some(action_mods) = action.mods_mut() {
                        mods.resolve(action_mods);
                    }
                }
            }
        }
    }
}

/// Derives the fields that depend on several sections at once. Called
/// once, after keycodes, types, compat and symbols have been compiled.
pub fn finalize_keymap(_ctx: &Context, keymap: &mut Keymap) {
    apply_interps(keymap);
    bind_indicators(keymap);
    resolve_virtual_mods(keymap);
}

#[cfg(test)]
mod tests {
    use super::*;
    use xkb_core::keymap::{MatchOperation, StateComponent};
    use xkb_core::mods::Mods;
    use xkb_core::ActionFlags;
    use xkb_core::{ContextFlags, Keysym};

    use crate::ast::MergeMode;
    use crate::compat::compile_compat;
    use crate::keycodes::compile_keycodes;
    use crate::parser;
    use crate::symbols::compile_symbols;
    use crate::types::compile_key_types;

    fn compile_full(keycodes: &str, types: &str, compat: &str, symbols: &str) -> Keymap {
        let ctx =
            Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES);
        let mut keymap = Keymap::new(ctx.clone());
        let mut parse = |src: &str| {
            parser::parse_string(&ctx, src.as_bytes(), "(test)")
                .unwrap()
                .remove(0)
        };
        compile_keycodes(&ctx, &parse(keycodes), &mut keymap, MergeMode::Override).unwrap();
        compile_key_types(&ctx, &parse(types), &mut keymap, MergeMode::Override).unwrap();
        compile_compat(&ctx, &parse(compat), &mut keymap, MergeMode::Override).unwrap();
        compile_symbols(&ctx, &parse(symbols), &mut keymap, MergeMode::Override).unwrap();
        finalize_keymap(&ctx, &mut keymap);
        keymap
    }

    fn test_keymap() -> Keymap {
        compile_full(
            r#"xkb_keycodes {
                <LFSH> = 50;
                <NMLK> = 77;
                <AD01> = 24;
                indicator 1 = "Num Lock";
            };"#,
            r#"xkb_types {
                virtual_modifiers NumLock;
                type "ONE_LEVEL" { modifiers = none; };
                type "ALPHABETIC" {
                    modifiers = Shift+Lock;
                    map[Shift] = Level2;
                    map[Lock] = Level2;
                };
                type "KEYPAD" {
                    modifiers = Shift+NumLock;
                    map[Shift] = Level2;
                    map[NumLock] = Level2;
                };
            };"#,
            r#"xkb_compatibility {
                virtual_modifiers NumLock;
                interpret Shift_L+AnyOf(all) {
                    action= SetMods(modifiers=modMapMods);
                };
                interpret Num_Lock+AnyOf(all) {
                    virtualModifier= NumLock;
                    action= LockMods(modifiers=NumLock);
                };
                interpret Any+AnyOf(all) {
                    action= SetMods(modifiers=modMapMods);
                };
                indicator "Num Lock" {
                    whichModState= Locked;
                    modifiers= NumLock;
                };
            };"#,
            r#"xkb_symbols {
                key <LFSH> { [ Shift_L ] };
                key <NMLK> { [ Num_Lock ] };
                key <AD01> { [ q, Q ] };
                modifier_map Shift { Shift_L };
                modifier_map Mod2 { Num_Lock };
            };"#,
        )
    }

    #[test]
    fn test_interps_assign_actions() {
        let keymap = test_keymap();
        let kc = keymap.key_by_name("LFSH").unwrap();
        let key = keymap.key(kc).unwrap();
        let action = key.groups[0].levels[0].action();
        let Action::ModSet { mods, .. } = action else {
            panic!("expected SetMods, got {action:?}");
        };
        // modMapMods resolved through the key's modmap.
        assert_eq!(mods.mask, 1);
    }

    #[test]
    fn test_vmod_mapping_from_claiming_key() {
        let keymap = test_keymap();
        let numlock = keymap.mod_get_index("NumLock").unwrap();
        assert_eq!(keymap.mods.mods[numlock as usize].mapping, 1 << 4);
        // The KEYPAD type mask resolves through the projection.
        let keypad = keymap
            .types
            .iter()
            .find(|t| &*keymap.context().atom_text(t.name) == "KEYPAD")
            .unwrap();
        assert_eq!(keypad.mods.mask, 1 | (1 << 4));
    }

    #[test]
    fn test_lock_action_carries_resolved_mask() {
        let keymap = test_keymap();
        let kc = keymap.key_by_name("NMLK").unwrap();
        let key = keymap.key(kc).unwrap();
        let Action::ModLock { mods, .. } = key.groups[0].levels[0].action() else {
            panic!("expected LockMods");
        };
        assert_eq!(mods.mask, 1 << 4);
        // The claiming key records its virtual modifier.
        let numlock = keymap.mod_get_index("NumLock").unwrap();
        assert_eq!(key.vmodmap, 1 << numlock);
    }

    #[test]
    fn test_indicator_bound_to_virtual_modifier() {
        let keymap = test_keymap();
        let led = keymap.leds[0].as_ref().unwrap();
        assert_eq!(led.which_mods, StateComponent::MODS_LOCKED);
        // The LED mask resolves to the real projection of NumLock.
        assert_eq!(led.mods.mask, 1 << 4);
    }

    #[test]
    fn test_explicit_actions_win_over_interps() {
        let keymap = compile_full(
            r#"xkb_keycodes { <LFSH> = 50; };"#,
            r#"xkb_types { type "ONE_LEVEL" { modifiers = none; }; };"#,
            r#"xkb_compatibility {
                interpret Shift_L+AnyOf(all) { action= SetMods(modifiers=Shift); };
            };"#,
            r#"xkb_symbols {
                key <LFSH> {
                    symbols[Group1]= [ Shift_L ],
                    actions[Group1]= [ LockMods(modifiers=Lock) ]
                };
            };"#,
        );
        let kc = keymap.key_by_name("LFSH").unwrap();
        let key = keymap.key(kc).unwrap();
        assert!(matches!(
            key.groups[0].levels[0].action(),
            Action::ModLock { .. }
        ));
    }

    #[test]
    fn test_interp_repeat_applies_without_explicit_flag() {
        let keymap = compile_full(
            r#"xkb_keycodes { <AD01> = 24; <AD02> = 25; };"#,
            r#"xkb_types {
                type "ALPHABETIC" {
                    modifiers = Shift+Lock;
                    map[Shift] = Level2;
                };
            };"#,
            r#"xkb_compatibility {
                interpret Any+AnyOfOrNone(all) { repeat= True; action= NoAction(); };
            };"#,
            r#"xkb_symbols {
                key <AD01> { [ q, Q ] };
                key <AD02> { repeat= No, [ w, W ] };
            };"#,
        );
        assert!(keymap.key_repeats(keymap.key_by_name("AD01").unwrap()));
        // The explicit repeat flag is preserved.
        assert!(!keymap.key_repeats(keymap.key_by_name("AD02").unwrap()));
    }

    #[test]
    fn test_match_op_semantics() {
        let interp = SymInterpret {
            sym: Keysym::from_name("Caps_Lock").unwrap(),
            match_op: MatchOperation::Exactly,
            mods: Mods::new(2),
            action: Action::ModLock {
                flags: ActionFlags::empty(),
                mods: Mods::real(2),
            },
            ..SymInterpret::default()
        };
        let interps = vec![interp];
        let caps = Keysym::from_name("Caps_Lock").unwrap();
        assert!(find_interp(&interps, caps, 2, 0).is_some());
        assert!(find_interp(&interps, caps, 3, 0).is_none());
        assert!(find_interp(&interps, Keysym::from_name("q").unwrap(), 2, 0).is_none());
    }
}
