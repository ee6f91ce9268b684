//! Canonical text form of a compiled keymap.
//!
//! The output mirrors the input grammar: one `xkb_keymap { ... }` block
//! containing the four component sections. Feeding the result back into
//! the compiler yields a keymap with the same observable behavior;
//! bit-for-bit round-trips are not a goal.

use std::fmt::Write;

use xkb_core::action::{Action, ActionFlags};
use xkb_core::keymap::{Key, LayoutIndex, MatchOperation, StateComponent};
use xkb_core::mods::{ModKind, MOD_INVALID};
use xkb_core::{Keymap, Keysym, ATOM_NONE};

use crate::text::{control_mask_text, led_state_text, mod_mask_text};

const SYMBOL_PADDING: usize = 15;
const ACTION_PADDING: usize = 30;

/// Serializes `keymap` into its canonical text form.
pub fn keymap_as_string(keymap: &Keymap) -> String {
    let mut buf = String::with_capacity(4096);
    write_keymap(keymap, &mut buf);
    buf
}

fn write_keymap(keymap: &Keymap, buf: &mut String) {
    buf.push_str("xkb_keymap {\n");
    write_keycodes(keymap, buf);
    write_types(keymap, buf);
    write_compat(keymap, buf);
    write_symbols(keymap, buf);
    buf.push_str("};\n");
}

fn section_header(buf: &mut String, kind: &str, name: Option<&str>) {
    match name {
        Some(name) => {
            let _ = writeln!(buf, "{kind} \"{name}\" {{");
        }
        None => {
            let _ = writeln!(buf, "{kind} {{");
        }
    }
}

fn key_name_text(keymap: &Keymap, atom: u32) -> String {
    format!("<{}>", keymap.context().atom_text(atom))
}

fn write_keycodes(keymap: &Keymap, buf: &mut String) {
    section_header(buf, "xkb_keycodes", keymap.keycodes_section_name.as_deref());

    // Anything below 8 or above 255 upsets traditional consumers; widen
    // the advertised bounds.
    let _ = writeln!(buf, "\tminimum = {};", keymap.min_key_code.min(8));
    let _ = writeln!(buf, "\tmaximum = {};", keymap.max_key_code.max(255));

    for key in keymap.iter_keys() {
        let _ = writeln!(
            buf,
            "\t{:<20} = {};",
            key_name_text(keymap, key.name),
            key.keycode
        );
    }

    for (idx, led) in keymap.leds.iter().enumerate() {
        if let Some(led) = led {
            if led.name != ATOM_NONE {
                let _ = writeln!(
                    buf,
                    "\tindicator {} = \"{}\";",
                    idx + 1,
                    keymap.context().atom_text(led.name)
                );
            }
        }
    }

    for alias in &keymap.key_aliases {
        let _ = writeln!(
            buf,
            "\talias {:<14} = {};",
            key_name_text(keymap, alias.alias),
            key_name_text(keymap, alias.real)
        );
    }

    buf.push_str("};\n\n");
}

fn write_vmods(keymap: &Keymap, buf: &mut String) {
    let mut first = true;
    for m in &keymap.mods.mods {
        if m.kind != ModKind::Virtual {
            continue;
        }
        if first {
            buf.push_str("\tvirtual_modifiers ");
        } else {
            buf.push(',');
        }
        buf.push_str(&keymap.context().atom_text(m.name));
        first = false;
    }
    if !first {
        buf.push_str(";\n\n");
    }
}

fn write_types(keymap: &Keymap, buf: &mut String) {
    section_header(buf, "xkb_types", keymap.types_section_name.as_deref());
    write_vmods(keymap, buf);

    let ctx = keymap.context();
    for ty in &keymap.types {
        let _ = writeln!(buf, "\ttype \"{}\" {{", ctx.atom_text(ty.name));
        let _ = writeln!(
            buf,
            "\t\tmodifiers= {};",
            mod_mask_text(ctx, &keymap.mods, ty.mods.mods)
        );

        for entry in &ty.entries {
            // Base-level entries without preserve info restate the
            // default.
            if entry.level == 0 && entry.preserve.mods == 0 {
                continue;
            }
            let mods = mod_mask_text(ctx, &keymap.mods, entry.mods.mods);
            let _ = writeln!(buf, "\t\tmap[{}]= {};", mods, entry.level + 1);
            if entry.preserve.mods != 0 {
                let _ = writeln!(
                    buf,
                    "\t\tpreserve[{}]= {};",
                    mods,
                    mod_mask_text(ctx, &keymap.mods, entry.preserve.mods)
                );
            }
        }

        for (n, name) in ty.level_names.iter().enumerate() {
            if *name != ATOM_NONE {
                let _ = writeln!(
                    buf,
                    "\t\tlevel_name[{}]= \"{}\";",
                    n + 1,
                    ctx.atom_text(*name)
                );
            }
        }

        buf.push_str("\t};\n");
    }

    buf.push_str("};\n\n");
}

fn affect_lock_text(flags: ActionFlags, show_both: bool) -> &'static str {
    let no_lock = flags.contains(ActionFlags::LOCK_NO_LOCK);
    let no_unlock = flags.contains(ActionFlags::LOCK_NO_UNLOCK);
    match (no_lock, no_unlock) {
        (false, false) => {
            if show_both {
                ",affect=both"
            } else {
                ""
            }
        }
        (false, true) => ",affect=lock",
        (true, false) => ",affect=unlock",
        (true, true) => ",affect=neither",
    }
}

fn action_text(keymap: &Keymap, action: &Action) -> String {
    let ctx = keymap.context();
    match *action {
        Action::None => "NoAction()".to_owned(),

        Action::ModSet { flags, mods }
        | Action::ModLatch { flags, mods }
        | Action::ModLock { flags, mods } => {
            let (name, is_lock) = match action {
                Action::ModSet { .. } => ("SetMods", false),
                Action::ModLatch { .. } => ("LatchMods", false),
                _ => ("LockMods", true),
            };
            let args = if flags.contains(ActionFlags::MODS_LOOKUP_MODMAP) {
                "modMapMods".to_owned()
            } else {
                mod_mask_text(ctx, &keymap.mods, mods.mods)
            };
            let clear = if !is_lock && flags.contains(ActionFlags::LOCK_CLEAR) {
                ",clearLocks"
            } else {
                ""
            };
            let latch = if !is_lock && flags.contains(ActionFlags::LATCH_TO_LOCK) {
                ",latchToLock"
            } else {
                ""
            };
            let affect = if is_lock { affect_lock_text(flags, false) } else { "" };
            format!("{name}(modifiers={args}{clear}{latch}{affect})")
        }

        Action::GroupSet { flags, group }
        | Action::GroupLatch { flags, group }
        | Action::GroupLock { flags, group } => {
            let (name, is_lock) = match action {
                Action::GroupSet { .. } => ("SetGroup", false),
                Action::GroupLatch { .. } => ("LatchGroup", false),
                _ => ("LockGroup", true),
            };
            let absolute = flags.contains(ActionFlags::ABSOLUTE_SWITCH);
            let sign = if !absolute && group > 0 { "+" } else { "" };
            let value = if absolute { group + 1 } else { group };
            let clear = if !is_lock && flags.contains(ActionFlags::LOCK_CLEAR) {
                ",clearLocks"
            } else {
                ""
            };
            let latch = if !is_lock && flags.contains(ActionFlags::LATCH_TO_LOCK) {
                ",latchToLock"
            } else {
                ""
            };
            format!("{name}(group={sign}{value}{clear}{latch})")
        }

        Action::Terminate => "Terminate()".to_owned(),

        Action::PtrMove { flags, x, y } => {
            let sx = if !flags.contains(ActionFlags::ABSOLUTE_X) && x >= 0 { "+" } else { "" };
            let sy = if !flags.contains(ActionFlags::ABSOLUTE_Y) && y >= 0 { "+" } else { "" };
            let accel = if flags.contains(ActionFlags::NO_ACCELERATION) {
                ",!accel"
            } else {
                ""
            };
            format!("MovePtr(x={sx}{x},y={sy}{y}{accel})")
        }

        Action::PtrButton { flags, button, count } => {
            let _ = flags;
            let mut out = String::from("PtrBtn(button=");
            if (1..=5).contains(&button) {
                let _ = write!(out, "{button}");
            } else {
                out.push_str("default");
            }
            if count != 0 {
                let _ = write!(out, ",count={count}");
            }
            out.push(')');
            out
        }

        Action::PtrLock { flags, button } => {
            let mut out = String::from("LockPtrBtn(button=");
            if (1..=5).contains(&button) {
                let _ = write!(out, "{button}");
            } else {
                out.push_str("default");
            }
            out.push_str(affect_lock_text(flags, true));
            out.push(')');
            out
        }

        Action::PtrDefault { flags, value } => {
            let sign = if !flags.contains(ActionFlags::ABSOLUTE_SWITCH) && value >= 0 {
                "+"
            } else {
                ""
            };
            format!("SetPtrDflt(affect=button,button={sign}{value})")
        }

        Action::SwitchScreen { flags, screen } => {
            let sign = if !flags.contains(ActionFlags::ABSOLUTE_SWITCH) && screen >= 0 {
                "+"
            } else {
                ""
            };
            let same = if flags.contains(ActionFlags::SAME_SCREEN) { "" } else { "!" };
            format!("SwitchScreen(screen={sign}{screen},{same}same)")
        }

        Action::CtrlSet { flags, ctrls } | Action::CtrlLock { flags, ctrls } => {
            let (name, is_lock) = match action {
                Action::CtrlSet { .. } => ("SetControls", false),
                _ => ("LockControls", true),
            };
            let affect = if is_lock { affect_lock_text(flags, false) } else { "" };
            format!("{name}(controls={}{affect})", control_mask_text(ctrls))
        }

        Action::Private { ty, data } => {
            format!(
                "Private(type=0x{:02x},data[0]=0x{:02x},data[1]=0x{:02x},data[2]=0x{:02x},\
                 data[3]=0x{:02x},data[4]=0x{:02x},data[5]=0x{:02x},data[6]=0x{:02x})",
                ty, data[0], data[1], data[2], data[3], data[4], data[5], data[6]
            )
        }
    }
}

fn match_op_text(op: MatchOperation) -> &'static str {
    match op {
        MatchOperation::NoneOf => "NoneOf",
        MatchOperation::AnyOfOrNone => "AnyOfOrNone",
        MatchOperation::AnyOf => "AnyOf",
        MatchOperation::AllOf => "AllOf",
        MatchOperation::Exactly => "Exactly",
    }
}

fn write_compat(keymap: &Keymap, buf: &mut String) {
    section_header(buf, "xkb_compatibility", keymap.compat_section_name.as_deref());
    write_vmods(keymap, buf);

    // Reset the implicit defaults so the dump is self-contained.
    buf.push_str("\tinterpret.useModMapMods= AnyLevel;\n");
    buf.push_str("\tinterpret.repeat= False;\n");

    let ctx = keymap.context();
    for si in &keymap.sym_interprets {
        let sym = if si.sym.is_no_symbol() {
            "Any".to_owned()
        } else {
            si.sym.name()
        };
        let _ = writeln!(
            buf,
            "\tinterpret {}+{}({}) {{",
            sym,
            match_op_text(si.match_op),
            mod_mask_text(ctx, &keymap.mods, si.mods.mods)
        );

        if si.virtual_mod != MOD_INVALID {
            if let Some(name) = keymap.mods.mod_name(si.virtual_mod) {
                let _ = writeln!(buf, "\t\tvirtualModifier= {};", ctx.atom_text(name));
            }
        }
        if si.level_one_only {
            buf.push_str("\t\tuseModMapMods=level1;\n");
        }
        if si.repeat {
            buf.push_str("\t\trepeat= True;\n");
        }
        let _ = writeln!(buf, "\t\taction= {};", action_text(keymap, &si.action));
        buf.push_str("\t};\n");
    }

    for led in keymap.leds.iter().flatten() {
        if led.which_groups.is_empty()
            && led.groups == 0
            && led.which_mods.is_empty()
            && led.mods.mods == 0
            && led.ctrls == 0
        {
            continue;
        }
        let _ = writeln!(buf, "\tindicator \"{}\" {{", ctx.atom_text(led.name));
        if !led.which_groups.is_empty() {
            if led.which_groups != StateComponent::LAYOUT_EFFECTIVE {
                let _ = writeln!(
                    buf,
                    "\t\twhichGroupState= {};",
                    led_state_text(led.which_groups, false)
                );
            }
            let _ = writeln!(buf, "\t\tgroups= 0x{:02x};", led.groups);
        }
        if !led.which_mods.is_empty() {
            if led.which_mods != StateComponent::MODS_EFFECTIVE {
                let _ = writeln!(
                    buf,
                    "\t\twhichModState= {};",
                    led_state_text(led.which_mods, true)
                );
            }
            let _ = writeln!(
                buf,
                "\t\tmodifiers= {};",
                mod_mask_text(ctx, &keymap.mods, led.mods.mods)
            );
        }
        if led.ctrls != 0 {
            let _ = writeln!(buf, "\t\tcontrols= {};", control_mask_text(led.ctrls));
        }
        buf.push_str("\t};\n");
    }

    buf.push_str("};\n\n");
}

fn sym_text(sym: Keysym) -> String {
    if sym.is_no_symbol() {
        "NoSymbol".to_owned()
    } else {
        sym.name()
    }
}

fn write_keysyms(buf: &mut String, key: &Key, group: LayoutIndex, padding: usize) {
    let levels = &key.groups[group as usize].levels;
    for (i, level) in levels.iter().enumerate() {
        if i != 0 {
            buf.push_str(", ");
        }
        match level.syms.as_slice() {
            [] => {
                let _ = write!(buf, "{:>padding$}", "NoSymbol");
            }
            [sym] => {
                let _ = write!(buf, "{:>padding$}", sym_text(*sym));
            }
            syms => {
                let mut joined = String::from("{ ");
                for (s, sym) in syms.iter().enumerate() {
                    if s != 0 {
                        joined.push_str(", ");
                    }
                    joined.push_str(&sym_text(*sym));
                }
                joined.push_str(" }");
                let _ = write!(buf, "{joined:>padding$}");
            }
        }
    }
}

fn write_key_actions(keymap: &Keymap, buf: &mut String, key: &Key, group: LayoutIndex) {
    let levels = &key.groups[group as usize].levels;
    for (i, level) in levels.iter().enumerate() {
        if i != 0 {
            buf.push_str(", ");
        }
        match level.actions.as_slice() {
            [] => {
                let _ = write!(buf, "{:>ACTION_PADDING$}", "NoAction()");
            }
            [action] => {
                let _ = write!(buf, "{:>ACTION_PADDING$}", action_text(keymap, action));
            }
            actions => {
                let mut joined = String::from("{ ");
                for (a, action) in actions.iter().enumerate() {
                    if a != 0 {
                        joined.push_str(", ");
                    }
                    joined.push_str(&action_text(keymap, action));
                }
                joined.push_str(" }");
                let _ = write!(buf, "{joined:>ACTION_PADDING$}");
            }
        }
    }
}

fn write_key(keymap: &Keymap, buf: &mut String, key: &Key) {
    use xkb_core::keymap::{ExplicitComponents, RangeExceedType};

    let ctx = keymap.context();
    let _ = write!(buf, "\tkey {:<20} {{", key_name_text(keymap, key.name));

    let mut simple = true;
    let explicit_types = key.groups.iter().any(|g| g.explicit_type);
    let multi_type = key
        .groups
        .iter()
        .any(|g| g.key_type != key.groups[0].key_type);

    if explicit_types {
        simple = false;
        if multi_type {
            for (g, group) in key.groups.iter().enumerate() {
                if !group.explicit_type {
                    continue;
                }
                let name = keymap.types[group.key_type].name;
                let _ = write!(buf, "\n\t\ttype[Group{}]= \"{}\",", g + 1, ctx.atom_text(name));
            }
        } else {
            let name = keymap.types[key.groups[0].key_type].name;
            let _ = write!(buf, "\n\t\ttype= \"{}\",", ctx.atom_text(name));
        }
    }

    // With explicit actions no interpretation runs on this key, so the
    // fields interpretations would fill are spelled out too.
    let show_actions = key.explicit.contains(ExplicitComponents::INTERP);

    if key.explicit.contains(ExplicitComponents::REPEAT) || show_actions {
        buf.push_str(if key.repeats {
            "\n\t\trepeat= Yes,"
        } else {
            "\n\t\trepeat= No,"
        });
        simple = false;
    }

    if key.vmodmap != 0 && (key.explicit.contains(ExplicitComponents::VMODMAP) || show_actions) {
        let _ = write!(
            buf,
            "\n\t\tvirtualMods= {},",
            mod_mask_text(ctx, &keymap.mods, key.vmodmap)
        );
    }

    match key.out_of_range_group_action {
        RangeExceedType::Saturate => buf.push_str("\n\t\tgroupsClamp,"),
        RangeExceedType::Redirect => {
            let _ = write!(
                buf,
                "\n\t\tgroupsRedirect= Group{},",
                key.out_of_range_group_number + 1
            );
        }
        RangeExceedType::Wrap => {}
    }

    if key.num_groups() > 1 || show_actions {
        simple = false;
    }

    if simple {
        buf.push_str("\t[ ");
        write_keysyms(buf, key, 0, SYMBOL_PADDING);
        buf.push_str(" ] };\n");
    } else {
        let padding = if show_actions { ACTION_PADDING } else { SYMBOL_PADDING };
        for g in 0..key.num_groups() {
            if g != 0 {
                buf.push(',');
            }
            let _ = write!(buf, "\n\t\tsymbols[Group{}]= [ ", g + 1);
            write_keysyms(buf, key, g, padding);
            buf.push_str(" ]");
            if show_actions {
                let _ = write!(buf, ",\n\t\tactions[Group{}]= [ ", g + 1);
                write_key_actions(keymap, buf, key, g);
                buf.push_str(" ]");
            }
        }
        buf.push_str("\n\t};\n");
    }
}

fn write_symbols(keymap: &Keymap, buf: &mut String) {
    section_header(buf, "xkb_symbols", keymap.symbols_section_name.as_deref());

    let ctx = keymap.context();
    let mut any_names = false;
    for (g, name) in keymap.group_names.iter().enumerate() {
        if *name != ATOM_NONE {
            let _ = writeln!(buf, "\tname[Group{}]=\"{}\";", g + 1, ctx.atom_text(*name));
            any_names = true;
        }
    }
    if any_names {
        buf.push('\n');
    }

    for key in keymap.iter_keys() {
        if key.num_groups() > 0 {
            write_key(keymap, buf, key);
        }
    }

    for (i, m) in keymap.mods.mods.iter().enumerate() {
        let mut had_any = false;
        for key in keymap.iter_keys() {
            if key.modmap & (1 << i) != 0 {
                if !had_any {
                    let _ = write!(buf, "\tmodifier_map {} {{ ", ctx.atom_text(m.name));
                } else {
                    buf.push_str(", ");
                }
                buf.push_str(&key_name_text(keymap, key.name));
                had_any = true;
            }
        }
        if had_any {
            buf.push_str(" };\n");
        }
    }

    buf.push_str("};\n\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::MergeMode;
    use crate::compat::compile_compat;
    use crate::finalize::finalize_keymap;
    use crate::keycodes::compile_keycodes;
    use crate::parser;
    use crate::symbols::compile_symbols;
    use crate::types::compile_key_types;
    use xkb_core::{Context, ContextFlags};

    fn small_keymap() -> Keymap {
        let ctx =
            Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES);
        let mut keymap = Keymap::new(ctx.clone());
        let mut parse = |src: &str| {
            parser::parse_string(&ctx, src.as_bytes(), "(test)")
                .unwrap()
                .remove(0)
        };
        compile_keycodes(
            &ctx,
            &parse(r#"xkb_keycodes "test" { <LFSH> = 50; <AD01> = 24; indicator 1 = "Caps Lock"; };"#),
            &mut keymap,
            MergeMode::Override,
        )
        .unwrap();
        compile_key_types(
            &ctx,
            &parse(
                r#"xkb_types {
                    type "ONE_LEVEL" { modifiers = none; };
                    type "ALPHABETIC" {
                        modifiers = Shift+Lock;
                        map[Shift] = Level2;
                        map[Lock] = Level2;
                        preserve[Lock] = Lock;
                    };
                };"#,
            ),
            &mut keymap,
            MergeMode::Override,
        )
        .unwrap();
        compile_compat(
            &ctx,
            &parse(
                r#"xkb_compatibility {
                    interpret Shift_L+AnyOf(all) { action= SetMods(modifiers=Shift); };
                    indicator "Caps Lock" { whichModState= Locked; modifiers= Lock; };
                };"#,
            ),
            &mut keymap,
            MergeMode::Override,
        )
        .unwrap();
        compile_symbols(
            &ctx,
            &parse(
                r#"xkb_symbols {
                    name[Group1]= "English (US)";
                    key <LFSH> { [ Shift_L ] };
                    key <AD01> { [ q, Q ] };
                    modifier_map Shift { <LFSH> };
                };"#,
            ),
            &mut keymap,
            MergeMode::Override,
        )
        .unwrap();
        finalize_keymap(&ctx, &mut keymap);
        keymap
    }

    #[test]
    fn test_sections_present_in_order() {
        let text = keymap_as_string(&small_keymap());
        let kc = text.find("xkb_keycodes").unwrap();
        let ty = text.find("xkb_types").unwrap();
        let cp = text.find("xkb_compatibility").unwrap();
        let sy = text.find("xkb_symbols").unwrap();
        assert!(text.starts_with("xkb_keymap {\n"));
        assert!(kc < ty && ty < cp && cp < sy);
        assert!(text.ends_with("};\n"));
    }

    #[test]
    fn test_keycodes_content() {
        let text = keymap_as_string(&small_keymap());
        assert!(text.contains("minimum = 8;"));
        assert!(text.contains("maximum = 255;"));
        assert!(text.contains("<LFSH>"));
        assert!(text.contains("= 50;"));
        assert!(text.contains("indicator 1 = \"Caps Lock\";"));
    }

    #[test]
    fn test_types_content() {
        let text = keymap_as_string(&small_keymap());
        assert!(text.contains("type \"ALPHABETIC\""));
        assert!(text.contains("modifiers= Shift+Lock;"));
        assert!(text.contains("map[Shift]= 2;"));
        assert!(text.contains("preserve[Lock]= Lock;"));
    }

    #[test]
    fn test_compat_and_symbols_content() {
        let text = keymap_as_string(&small_keymap());
        assert!(text.contains("interpret Shift_L+AnyOf(all) {"));
        assert!(text.contains("action= SetMods(modifiers=Shift);"));
        assert!(text.contains("whichModState= Locked;"));
        assert!(text.contains("name[Group1]=\"English (US)\";"));
        assert!(text.contains("modifier_map Shift { <LFSH> };"));
        assert!(text.contains('q'));
    }

    #[test]
    fn test_round_trip_reparses(){
        let text = keymap_as_string(&small_keymap());
        let ctx =
            Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES);
        let files = parser::parse_string(&ctx, text.as_bytes(), "(dump)").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].sections.len(), 4);
    }
}
