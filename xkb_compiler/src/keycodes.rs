//! Keycodes section compiler.
//!
//! Assigns numeric keycodes to key names, collects aliases and indicator
//! names, and sizes the keymap's dense key array.

use std::collections::BTreeMap;

use xkb_core::keymap::{Key, KeyAlias, Keycode, Led, KEYCODE_MAX, MAX_LEDS};
use xkb_core::message::MessageCode;
use xkb_core::{log_err, log_vrb, log_warn, Atom, CompileError, Context, Keymap};

use crate::ast::{Decl, FileType, IncludeStmt, KeyAliasDef, KeycodeDef, LedNameDef, MergeMode, VarDef, XkbFile};
use crate::expr;
use crate::include::{self, IncludeState};

const MAX_ERRORS: usize = 10;

#[derive(Debug, Clone)]
struct AliasInfo {
    alias: Atom,
    real: Atom,
}

#[derive(Debug, Clone)]
struct LedNameInfo {
    name: Atom,
    virtual_: bool,
}

#[derive(Default)]
struct KeycodesInfo {
    name: Option<String>,
    error_count: usize,
    key_names: BTreeMap<Keycode, Atom>,
    aliases: Vec<AliasInfo>,
    /// Zero-based indicator slots.
    led_names: BTreeMap<u32, LedNameInfo>,
}

impl KeycodesInfo {
    fn find_name(&self, name: Atom) -> Option<Keycode> {
        self.key_names
            .iter()
            .find(|&(_, &n)| n == name)
            .map(|(&kc, _)| kc)
    }
}

fn add_key_name(
    ctx: &Context,
    info: &mut KeycodesInfo,
    kc: Keycode,
    name: Atom,
    merge: MergeMode,
    report: bool,
) -> bool {
    // The same name moving between keycodes.
    if let Some(old_kc) = info.find_name(name) {
        if old_kc == kc {
            log_vrb!(
                ctx,
                4,
                Some(MessageCode::DuplicateEntry),
                "key <{}> is defined twice with the same keycode {}",
                ctx.atom_text(name),
                kc
            );
            return true;
        }
        if merge.clobbers() {
            if report {
                log_warn!(
                    ctx,
                    Some(MessageCode::ConflictingKeyName),
                    "key name <{}> assigned to multiple keycodes; using {}, ignoring {}",
                    ctx.atom_text(name),
                    kc,
                    old_kc
                );
            }
            info.key_names.remove(&old_kc);
        } else {
            if report {
                log_warn!(
                    ctx,
                    Some(MessageCode::ConflictingKeyName),
                    "key name <{}> assigned to multiple keycodes; using {}, ignoring {}",
                    ctx.atom_text(name),
                    old_kc,
                    kc
                );
            }
            return true;
        }
    }

    // Another name on the same keycode.
    if let Some(&old_name) = info.key_names.get(&kc) {
        if old_name == name {
            return true;
        }
        let (winner, loser) = if merge.clobbers() {
            (name, old_name)
        } else {
            (old_name, name)
        };
        if report {
            log_warn!(
                ctx,
                Some(MessageCode::ConflictingKeyName),
                "multiple names for keycode {}; using <{}>, ignoring <{}>",
                kc,
                ctx.atom_text(winner),
                ctx.atom_text(loser)
            );
        }
        info.key_names.insert(kc, winner);
        return true;
    }

    info.key_names.insert(kc, name);
    true
}

fn handle_keycode_def(
    ctx: &Context,
    info: &mut KeycodesInfo,
    def: &KeycodeDef,
    merge: MergeMode,
) -> bool {
    if !(0..=i64::from(KEYCODE_MAX)).contains(&def.value) {
        log_err!(
            ctx,
            Some(MessageCode::InvalidValue),
            "keycode {} for key <{}> is out of range",
            def.value,
            ctx.atom_text(def.name)
        );
        return false;
    }
    add_key_name(
        ctx,
        info,
        def.value as Keycode,
        def.name,
        def.merge.resolve(merge),
        true,
    )
}

fn handle_alias_def(
    ctx: &Context,
    info: &mut KeycodesInfo,
    def: &KeyAliasDef,
    merge: MergeMode,
) -> bool {
    let merge = def.merge.resolve(merge);
    if let Some(old) = info.aliases.iter_mut().find(|a| a.alias == def.alias) {
        if old.real == def.real {
            log_vrb!(
                ctx,
                4,
                Some(MessageCode::DuplicateEntry),
                "alias of <{}> is defined twice",
                ctx.atom_text(def.alias)
            );
            return true;
        }
        let (winner, loser) = if merge.clobbers() {
            (def.real, old.real)
        } else {
            (old.real, def.real)
        };
        log_warn!(
            ctx,
            Some(MessageCode::ConflictingKeyName),
            "multiple definitions of alias <{}>; using <{}>, ignoring <{}>",
            ctx.atom_text(def.alias),
            ctx.atom_text(winner),
            ctx.atom_text(loser)
        );
        old.real = winner;
        return true;
    }
    info.aliases.push(AliasInfo {
        alias: def.alias,
        real: def.real,
    });
    true
}

fn handle_led_name_def(
    ctx: &Context,
    info: &mut KeycodesInfo,
    def: &LedNameDef,
    merge: MergeMode,
) -> bool {
    let merge = def.merge.resolve(merge);
    if !(1..=MAX_LEDS as u32).contains(&def.ndx) {
        log_err!(
            ctx,
            Some(MessageCode::InvalidValue),
            "illegal indicator index {}; must be in the range 1..{}",
            def.ndx,
            MAX_LEDS
        );
        return false;
    }
    let Some(name) = expr::resolve_string(ctx, &def.name) else {
        log_err!(
            ctx,
            Some(MessageCode::WrongFieldType),
            "indicator names must be strings; name for indicator {} ignored",
            def.ndx
        );
        return false;
    };
    let ndx = def.ndx - 1;
    if let Some(old) = info.led_names.get(&ndx) {
        if old.name != name {
            let (winner, loser) = if merge.clobbers() {
                (name, old.name)
            } else {
                (old.name, name)
            };
            log_warn!(
                ctx,
                Some(MessageCode::DuplicateEntry),
                "multiple names for indicator {}; using \"{}\", ignoring \"{}\"",
                def.ndx,
                ctx.atom_text(winner),
                ctx.atom_text(loser)
            );
            if !merge.clobbers() {
                return true;
            }
        }
    }
    info.led_names.insert(
        ndx,
        LedNameInfo {
            name,
            virtual_: def.virtual_,
        },
    );
    true
}

fn handle_var_def(ctx: &Context, def: &VarDef) -> bool {
    let Some(name) = &def.name else {
        return false;
    };
    let Some((_, field, _)) = expr::resolve_lhs(ctx, name) else {
        return false;
    };
    // The bounds are computed from the defined keys; the declarations
    // are accepted and ignored.
    if field.eq_ignore_ascii_case("minimum") || field.eq_ignore_ascii_case("maximum") {
        return true;
    }
    log_err!(
        ctx,
        Some(MessageCode::UnknownField),
        "unknown field \"{}\" in a keycodes section",
        field
    );
    false
}

fn merge_included(
    ctx: &Context,
    into: &mut KeycodesInfo,
    from: KeycodesInfo,
    merge: MergeMode,
) {
    if from.error_count > 0 {
        into.error_count += from.error_count;
        return;
    }
    if into.name.is_none() {
        into.name = from.name;
    }
    for (kc, name) in from.key_names {
        add_key_name(ctx, into, kc, name, merge, false);
    }
    for alias in from.aliases {
        let def = KeyAliasDef {
            merge,
            alias: alias.alias,
            real: alias.real,
        };
        handle_alias_def(ctx, into, &def, merge);
    }
    for (ndx, led) in from.led_names {
        if let Some(old) = into.led_names.get(&ndx) {
            if old.name != led.name && !merge.clobbers() {
                continue;
            }
        }
        into.led_names.insert(ndx, led);
    }
}

fn handle_include(
    ctx: &Context,
    info: &mut KeycodesInfo,
    state: &mut IncludeState,
    stmt: &IncludeStmt,
) -> Result<(), CompileError> {
    let groups = include::parse_include_stmt(ctx, &stmt.stmt, stmt.merge)?;
    let mut included = KeycodesInfo {
        name: Some(stmt.stmt.clone()),
        ..KeycodesInfo::default()
    };
    for group in &groups {
        let next = include::with_include_frame(ctx, state, group, |state| {
            let file = include::load_include_section(ctx, group, FileType::Keycodes)?;
            let mut next = KeycodesInfo::default();
            handle_keycodes_file(ctx, &mut next, &file, group.merge, state)?;
            Ok::<_, CompileError>(next)
        })??;
        merge_included(ctx, &mut included, next, group.merge);
    }
    merge_included(ctx, info, included, groups[0].merge);
    Ok(())
}

fn handle_keycodes_file(
    ctx: &Context,
    info: &mut KeycodesInfo,
    file: &XkbFile,
    merge: MergeMode,
    state: &mut IncludeState,
) -> Result<(), CompileError> {
    info.name = Some(file.name.clone());
    for stmt in &file.defs {
        let ok = match stmt {
            Decl::Include(inc) => {
                handle_include(ctx, info, state, inc)?;
                true
            }
            Decl::Keycode(def) => handle_keycode_def(ctx, info, def, merge),
            Decl::KeyAlias(def) => handle_alias_def(ctx, info, def, merge),
            Decl::LedName(def) => handle_led_name_def(ctx, info, def, merge),
            Decl::Var(def) => handle_var_def(ctx, def),
            _ => {
                log_err!(
                    ctx,
                    Some(MessageCode::WrongStatementType),
                    "keycodes sections may not contain this statement; ignored"
                );
                false
            }
        };
        if !ok {
            info.error_count += 1;
        }
        if info.error_count > MAX_ERRORS {
            log_err!(
                ctx,
                Some(MessageCode::InvalidXkbSyntax),
                "abandoning keycodes file \"{}\"",
                file.name
            );
            return Err(CompileError::TooManyErrors {
                kind: "keycodes",
                name: file.name.clone(),
                count: info.error_count,
            });
        }
    }
    Ok(())
}

fn copy_to_keymap(ctx: &Context, info: KeycodesInfo, keymap: &mut Keymap) {
    if let (Some(&min), Some(&max)) = (
        info.key_names.keys().next(),
        info.key_names.keys().next_back(),
    ) {
        keymap.min_key_code = min;
        keymap.max_key_code = max;
    }

    keymap.keys = (keymap.min_key_code..=keymap.max_key_code)
        .map(|kc| Key {
            keycode: kc,
            ..Key::default()
        })
        .collect();
    for (&kc, &name) in &info.key_names {
        keymap.keys[(kc - keymap.min_key_code) as usize].name = name;
    }

    for alias in &info.aliases {
        if info.find_name(alias.alias).is_some() {
            log_warn!(
                ctx,
                Some(MessageCode::IllegalKeycodeAlias),
                "alias <{}> has the same name as a real key; alias ignored",
                ctx.atom_text(alias.alias)
            );
            continue;
        }
        if info.find_name(alias.real).is_none() {
            log_vrb!(
                ctx,
                5,
                Some(MessageCode::UndefinedKeycode),
                "alias <{}> points to the undefined key <{}>; alias ignored",
                ctx.atom_text(alias.alias),
                ctx.atom_text(alias.real)
            );
            continue;
        }
        keymap.key_aliases.push(KeyAlias {
            alias: alias.alias,
            real: alias.real,
        });
    }

    if let Some((&last, _)) = info.led_names.iter().next_back() {
        keymap.leds.resize_with(last as usize + 1, || None);
    }
    for (ndx, led) in info.led_names {
        // The virtual flag only matters for serialization; LED behavior
        // is defined by the compat section.
        let _ = led.virtual_;
        keymap.leds[ndx as usize] = Some(Led {
            name: led.name,
            ..Led::default()
        });
    }

    keymap.keycodes_section_name = info.name;
}

/// Compiles a keycodes section into the keymap.
pub fn compile_keycodes(
    ctx: &Context,
    file: &XkbFile,
    keymap: &mut Keymap,
    merge: MergeMode,
) -> Result<(), CompileError> {
    let mut info = KeycodesInfo::default();
    let mut state = IncludeState::new();
    handle_keycodes_file(ctx, &mut info, file, merge, &mut state)?;
    if info.error_count > 0 {
        return Err(CompileError::SectionFailed { kind: "keycodes" });
    }
    copy_to_keymap(ctx, info, keymap);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use xkb_core::ContextFlags;

    fn compile(src: &str) -> Keymap {
        let ctx =
            Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES);
        let mut files = parser::parse_string(&ctx, src.as_bytes(), "(test)").unwrap();
        let mut keymap = Keymap::new(ctx.clone());
        compile_keycodes(&ctx, &files.remove(0), &mut keymap, MergeMode::Override).unwrap();
        keymap
    }

    #[test]
    fn test_basic_keycodes() {
        let keymap = compile(
            r#"xkb_keycodes "test" {
                minimum = 8;
                maximum = 255;
                <ESC> = 9;
                <AD01> = 24;
                alias <LatQ> = <AD01>;
                indicator 1 = "Caps Lock";
            };"#,
        );
        assert_eq!(keymap.min_key_code, 9);
        assert_eq!(keymap.max_key_code, 24);
        assert_eq!(keymap.key_by_name("ESC"), Some(9));
        assert_eq!(keymap.key_by_name("AD01"), Some(24));
        assert_eq!(keymap.key_by_name("LatQ"), Some(24));
        assert!(keymap.key(10).is_none(), "gap keycodes stay undefined");
        assert_eq!(keymap.num_leds(), 1);
        assert_eq!(keymap.led_get_index("Caps Lock"), Some(0));
        assert_eq!(keymap.keycodes_section_name.as_deref(), Some("test"));
    }

    #[test]
    fn test_conflicting_names_override() {
        let keymap = compile(
            r#"xkb_keycodes {
                <A> = 10;
                <B> = 10;
            };"#,
        );
        assert_eq!(keymap.key_by_name("B"), Some(10));
        assert_eq!(keymap.key_by_name("A"), None);
    }

    #[test]
    fn test_alias_to_real_key_name_dropped() {
        let keymap = compile(
            r#"xkb_keycodes {
                <A> = 10;
                <B> = 11;
                alias <A> = <B>;
            };"#,
        );
        // The alias would shadow a real key.
        assert!(keymap.key_aliases.is_empty());
    }

    #[test]
    fn test_alias_to_undefined_key_dropped() {
        let keymap = compile(
            r#"xkb_keycodes {
                <A> = 10;
                alias <C> = <MISSING>;
            };"#,
        );
        assert!(keymap.key_aliases.is_empty());
    }

    #[test]
    fn test_out_of_range_keycode_fails() {
        let ctx =
            Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES);
        let src = br#"xkb_keycodes { <A> = 0xffffffff; };"#;
        let mut files = parser::parse_string(&ctx, src, "(test)").unwrap();
        let mut keymap = Keymap::new(ctx.clone());
        let err = compile_keycodes(&ctx, &files.remove(0), &mut keymap, MergeMode::Override);
        assert!(err.is_err());
    }
}
