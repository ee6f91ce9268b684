//! Key types section compiler.
//!
//! Builds the table of key types: per-type modifier masks, map entries
//! taking modifier combinations to shift levels, preserve entries and
//! level names.

use xkb_core::keymap::{KeyType, KeyTypeEntry, LevelIndex};
use xkb_core::message::MessageCode;
use xkb_core::mods::{ModMask, ModSet, Mods};
use xkb_core::{log_err, log_vrb, log_warn, Atom, CompileError, Context, Keymap, ATOM_NONE};

use crate::ast::{Decl, FileType, IncludeStmt, KeyTypeDef, MergeMode, VarDef, XkbFile};
use crate::expr;
use crate::include::{self, IncludeState};
use crate::text::mod_mask_text;
use crate::vmod;

const MAX_ERRORS: usize = 10;

#[derive(Debug, Clone, Default)]
struct KeyTypeInfo {
    merge: MergeMode,
    name: Atom,
    mods_defined: bool,
    mods: ModMask,
    num_levels: LevelIndex,
    entries: Vec<KeyTypeEntry>,
    level_names: Vec<Atom>,
}

struct KeyTypesInfo {
    name: Option<String>,
    error_count: usize,
    types: Vec<KeyTypeInfo>,
    mods: ModSet,
}

impl KeyTypesInfo {
    fn new(mods: ModSet) -> Self {
        Self {
            name: None,
            error_count: 0,
            types: Vec::new(),
            mods,
        }
    }

    fn find_type(&mut self, name: Atom) -> Option<&mut KeyTypeInfo> {
        self.types.iter_mut().find(|t| t.name == name)
    }
}

fn add_key_type(ctx: &Context, info: &mut KeyTypesInfo, new: KeyTypeInfo, same_file: bool) {
    if let Some(old) = info.find_type(new.name) {
        if new.merge.clobbers() {
            if same_file || ctx.log_verbosity() > 9 {
                log_warn!(
                    ctx,
                    Some(MessageCode::ConflictingKeyTypeDefinitions),
                    "multiple definitions of the {} key type; earlier definition ignored",
                    ctx.atom_text(new.name)
                );
            }
            *old = new;
        } else {
            if same_file {
                log_vrb!(
                    ctx,
                    4,
                    Some(MessageCode::ConflictingKeyTypeDefinitions),
                    "multiple definitions of the {} key type; later definition ignored",
                    ctx.atom_text(new.name)
                );
            }
        }
        return;
    }
    info.types.push(new);
}

fn set_modifiers(
    ctx: &Context,
    info: &KeyTypesInfo,
    ty: &mut KeyTypeInfo,
    array_ndx: Option<&crate::ast::Expr>,
    value: &crate::ast::Expr,
) -> bool {
    if array_ndx.is_some() {
        log_warn!(
            ctx,
            None,
            "the modifiers field of a key type is not an array; illegal subscript ignored"
        );
    }
    let Some(mods) = expr::resolve_mod_mask(ctx, &info.mods, None, value) else {
        log_err!(
            ctx,
            Some(MessageCode::UnsupportedModifierMask),
            "key type mask field must be a modifier mask; key type definition ignored"
        );
        return false;
    };
    if ty.mods_defined {
        log_warn!(
            ctx,
            None,
            "multiple modifier mask definitions for key type {}; using {}, ignoring {}",
            ctx.atom_text(ty.name),
            mod_mask_text(ctx, &info.mods, ty.mods),
            mod_mask_text(ctx, &info.mods, mods)
        );
        return false;
    }
    ty.mods = mods;
    true
}

fn add_map_entry(
    ctx: &Context,
    info: &KeyTypesInfo,
    ty: &mut KeyTypeInfo,
    new: KeyTypeEntry,
    clobber: bool,
    report: bool,
) -> bool {
    if let Some(old) = ty.entries.iter_mut().find(|e| e.mods.mods == new.mods.mods) {
        if report && old.level != new.level {
            log_warn!(
                ctx,
                Some(MessageCode::ConflictingKeyTypeMapEntry),
                "multiple map entries for {} in {}; using {}, ignoring {}",
                mod_mask_text(ctx, &info.mods, new.mods.mods),
                ctx.atom_text(ty.name),
                (if clobber { new.level } else { old.level }) + 1,
                (if clobber { old.level } else { new.level }) + 1
            );
        } else {
            log_vrb!(
                ctx,
                10,
                Some(MessageCode::ConflictingKeyTypeMapEntry),
                "multiple occurrences of map[{}]= {} in {}; ignored",
                mod_mask_text(ctx, &info.mods, new.mods.mods),
                new.level + 1,
                ctx.atom_text(ty.name)
            );
            return true;
        }
        if clobber {
            if new.level >= ty.num_levels {
                ty.num_levels = new.level + 1;
            }
            old.level = new.level;
        }
        return true;
    }

    if new.level >= ty.num_levels {
        ty.num_levels = new.level + 1;
    }
    ty.entries.push(new);
    true
}

fn set_map_entry(
    ctx: &Context,
    info: &KeyTypesInfo,
    ty: &mut KeyTypeInfo,
    array_ndx: Option<&crate::ast::Expr>,
    value: &crate::ast::Expr,
) -> bool {
    let Some(array_ndx) = array_ndx else {
        log_err!(
            ctx,
            Some(MessageCode::ExpectedArrayEntry),
            "the map entry field of key type {} must be an array",
            ctx.atom_text(ty.name)
        );
        return false;
    };
    let Some(mut mods) = expr::resolve_mod_mask(ctx, &info.mods, None, array_ndx) else {
        log_err!(
            ctx,
            Some(MessageCode::UnsupportedModifierMask),
            "map entry index of key type {} must be a modifier mask",
            ctx.atom_text(ty.name)
        );
        return false;
    };

    if mods & !ty.mods != 0 {
        log_vrb!(
            ctx,
            1,
            Some(MessageCode::UndeclaredModifiersInKeyType),
            "map entry for modifiers not used by type {}; using {} instead of {}",
            ctx.atom_text(ty.name),
            mod_mask_text(ctx, &info.mods, mods & ty.mods),
            mod_mask_text(ctx, &info.mods, mods)
        );
        mods &= ty.mods;
    }

    let Some(level) = expr::resolve_level(ctx, value) else {
        log_err!(
            ctx,
            Some(MessageCode::UnsupportedShiftLevel),
            "level specifications in a key type must be integer; ignoring malformed level"
        );
        return false;
    };

    let entry = KeyTypeEntry {
        level,
        mods: Mods::new(mods),
        preserve: Mods::default(),
    };
    add_map_entry(ctx, info, ty, entry, true, true)
}

fn add_preserve(
    ctx: &Context,
    info: &KeyTypesInfo,
    ty: &mut KeyTypeInfo,
    mods: ModMask,
    preserve: ModMask,
) -> bool {
    for entry in &mut ty.entries {
        if entry.mods.mods != mods {
            continue;
        }
        // An entry without a previous preserve takes the new one.
        if entry.preserve.mods == 0 {
            entry.preserve.mods = preserve;
            return true;
        }
        if entry.preserve.mods == preserve {
            log_vrb!(
                ctx,
                10,
                Some(MessageCode::DuplicateEntry),
                "identical definitions for preserve[{}] in {}; ignored",
                mod_mask_text(ctx, &info.mods, mods),
                ctx.atom_text(ty.name)
            );
            return true;
        }
        log_vrb!(
            ctx,
            1,
            Some(MessageCode::ConflictingKeyTypePreserveEntries),
            "multiple definitions for preserve[{}] in {}; using {}, ignoring {}",
            mod_mask_text(ctx, &info.mods, mods),
            ctx.atom_text(ty.name),
            mod_mask_text(ctx, &info.mods, preserve),
            mod_mask_text(ctx, &info.mods, entry.preserve.mods)
        );
        entry.preserve.mods = preserve;
        return true;
    }

    // preserve[] preceded the matching map[]; create the entry at level
    // one, the map statement may override the level later.
    ty.entries.push(KeyTypeEntry {
        level: 0,
        mods: Mods::new(mods),
        preserve: Mods::new(preserve),
    });
    true
}

fn set_preserve(
    ctx: &Context,
    info: &KeyTypesInfo,
    ty: &mut KeyTypeInfo,
    array_ndx: Option<&crate::ast::Expr>,
    value: &crate::ast::Expr,
) -> bool {
    let Some(array_ndx) = array_ndx else {
        log_err!(
            ctx,
            Some(MessageCode::ExpectedArrayEntry),
            "the preserve entry field of key type {} must be an array",
            ctx.atom_text(ty.name)
        );
        return false;
    };
    let Some(mut mods) = expr::resolve_mod_mask(ctx, &info.mods, None, array_ndx) else {
        log_err!(
            ctx,
            Some(MessageCode::UnsupportedModifierMask),
            "preserve entry index of key type {} must be a modifier mask",
            ctx.atom_text(ty.name)
        );
        return false;
    };

    if mods & !ty.mods != 0 {
        let before = mod_mask_text(ctx, &info.mods, mods);
        mods &= ty.mods;
        log_vrb!(
            ctx,
            1,
            Some(MessageCode::UndeclaredModifiersInKeyType),
            "preserve entry for modifiers not used by the {} type; index {} converted to {}",
            ctx.atom_text(ty.name),
            before,
            mod_mask_text(ctx, &info.mods, mods)
        );
    }

    let Some(mut preserve) = expr::resolve_mod_mask(ctx, &info.mods, None, value) else {
        log_err!(
            ctx,
            Some(MessageCode::UnsupportedModifierMask),
            "preserve value in a key type is not a modifier mask; ignoring preserve[{}] in {}",
            mod_mask_text(ctx, &info.mods, mods),
            ctx.atom_text(ty.name)
        );
        return false;
    };

    if preserve & !mods != 0 {
        let before = mod_mask_text(ctx, &info.mods, preserve);
        preserve &= mods;
        log_vrb!(
            ctx,
            1,
            Some(MessageCode::IllegalKeyTypePreserveResult),
            "illegal value for preserve[{}] in type {}; converted {} to {}",
            mod_mask_text(ctx, &info.mods, mods),
            ctx.atom_text(ty.name),
            before,
            mod_mask_text(ctx, &info.mods, preserve)
        );
    }

    add_preserve(ctx, info, ty, mods, preserve)
}

fn add_level_name(
    ctx: &Context,
    ty: &mut KeyTypeInfo,
    level: LevelIndex,
    name: Atom,
    clobber: bool,
) -> bool {
    let level = level as usize;
    if level >= ty.level_names.len() {
        ty.level_names.resize(level + 1, ATOM_NONE);
    } else if ty.level_names[level] == name {
        log_vrb!(
            ctx,
            10,
            Some(MessageCode::DuplicateEntry),
            "duplicate names for level {} of key type {}; ignored",
            level + 1,
            ctx.atom_text(ty.name)
        );
        return true;
    } else if ty.level_names[level] != ATOM_NONE {
        let (winner, loser) = if clobber {
            (name, ty.level_names[level])
        } else {
            (ty.level_names[level], name)
        };
        log_vrb!(
            ctx,
            1,
            Some(MessageCode::ConflictingKeyTypeLevelNames),
            "multiple names for level {} of key type {}; using {}, ignoring {}",
            level + 1,
            ctx.atom_text(ty.name),
            ctx.atom_text(winner),
            ctx.atom_text(loser)
        );
        if !clobber {
            return true;
        }
    }
    ty.level_names[level] = name;
    true
}

fn set_level_name(
    ctx: &Context,
    ty: &mut KeyTypeInfo,
    array_ndx: Option<&crate::ast::Expr>,
    value: &crate::ast::Expr,
) -> bool {
    let Some(array_ndx) = array_ndx else {
        log_err!(
            ctx,
            Some(MessageCode::ExpectedArrayEntry),
            "the level name field of key type {} must be an array",
            ctx.atom_text(ty.name)
        );
        return false;
    };
    let Some(level) = expr::resolve_level(ctx, array_ndx) else {
        log_err!(
            ctx,
            Some(MessageCode::UnsupportedShiftLevel),
            "level name index of key type {} must be an integer",
            ctx.atom_text(ty.name)
        );
        return false;
    };
    let Some(name) = expr::resolve_string(ctx, value) else {
        log_err!(
            ctx,
            Some(MessageCode::WrongFieldType),
            "non-string name for level {} in key type {}; ignored",
            level + 1,
            ctx.atom_text(ty.name)
        );
        return false;
    };
    add_level_name(ctx, ty, level, name, true)
}

fn handle_key_type_body(
    ctx: &Context,
    info: &KeyTypesInfo,
    ty: &mut KeyTypeInfo,
    body: &[VarDef],
) -> bool {
    let mut ok = true;
    for def in body {
        let Some(name) = &def.name else {
            ok = false;
            continue;
        };
        let Some((elem, field, array_ndx)) = expr::resolve_lhs(ctx, name) else {
            ok = false;
            continue;
        };
        if let Some(elem) = elem {
            log_err!(
                ctx,
                Some(MessageCode::GlobalDefaultsWrongScope),
                "cannot set global defaults for \"{}\" within a key type statement; \
                 assignment to \"{}.{}\" ignored",
                elem,
                elem,
                field
            );
            ok = false;
            continue;
        }
        let field_ok = match &*field.to_ascii_lowercase() {
            "modifiers" => set_modifiers(ctx, info, ty, array_ndx, &def.value),
            "map" => set_map_entry(ctx, info, ty, array_ndx, &def.value),
            "preserve" => set_preserve(ctx, info, ty, array_ndx, &def.value),
            "levelname" | "level_name" => set_level_name(ctx, ty, array_ndx, &def.value),
            _ => {
                log_err!(
                    ctx,
                    Some(MessageCode::UnknownField),
                    "unknown field {} in key type {}; definition ignored",
                    field,
                    ctx.atom_text(ty.name)
                );
                false
            }
        };
        if field.eq_ignore_ascii_case("modifiers") && field_ok {
            ty.mods_defined = true;
        }
        ok &= field_ok;
    }
    ok
}

fn handle_key_type_def(
    ctx: &Context,
    info: &mut KeyTypesInfo,
    def: &KeyTypeDef,
    merge: MergeMode,
) -> bool {
    let mut ty = KeyTypeInfo {
        merge: def.merge.resolve(merge),
        name: def.name,
        mods_defined: false,
        mods: 0,
        num_levels: 1,
        entries: Vec::new(),
        level_names: Vec::new(),
    };
    if !handle_key_type_body(ctx, info, &mut ty, &def.body) {
        return false;
    }
    add_key_type(ctx, info, ty, true);
    true
}

fn merge_included(ctx: &Context, into: &mut KeyTypesInfo, from: KeyTypesInfo, merge: MergeMode) {
    if from.error_count > 0 {
        into.error_count += from.error_count;
        return;
    }
    into.mods = from.mods;
    if into.name.is_none() {
        into.name = from.name;
    }
    if into.types.is_empty() {
        into.types = from.types;
    } else {
        for mut ty in from.types {
            ty.merge = if merge == MergeMode::Default {
                ty.merge
            } else {
                merge
            };
            add_key_type(ctx, into, ty, false);
        }
    }
}

fn handle_include(
    ctx: &Context,
    info: &mut KeyTypesInfo,
    state: &mut IncludeState,
    stmt: &IncludeStmt,
) -> Result<(), CompileError> {
    let groups = include::parse_include_stmt(ctx, &stmt.stmt, stmt.merge)?;
    let mut included = KeyTypesInfo::new(info.mods.clone());
    included.name = Some(stmt.stmt.clone());
    for group in &groups {
        let mods = included.mods.clone();
        let next = include::with_include_frame(ctx, state, group, |state| {
            let file = include::load_include_section(ctx, group, FileType::Types)?;
            let mut next = KeyTypesInfo::new(mods);
            handle_key_types_file(ctx, &mut next, &file, group.merge, state)?;
            Ok::<_, CompileError>(next)
        })??;
        merge_included(ctx, &mut included, next, group.merge);
    }
    merge_included(ctx, info, included, groups[0].merge);
    Ok(())
}

fn handle_key_types_file(
    ctx: &Context,
    info: &mut KeyTypesInfo,
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
            Decl::KeyType(def) => handle_key_type_def(ctx, info, def, merge),
            Decl::VMod(def) => vmod::handle_vmod_def(ctx, &mut info.mods, def, merge),
            Decl::Var(_) => {
                log_err!(
                    ctx,
                    Some(MessageCode::WrongStatementType),
                    "support for changing the default type has been removed; statement ignored"
                );
                true
            }
            _ => {
                log_err!(
                    ctx,
                    Some(MessageCode::WrongStatementType),
                    "key type files may not include other declarations; ignored"
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
                "abandoning keytypes file \"{}\"",
                file.name
            );
            return Err(CompileError::TooManyErrors {
                kind: "keytypes",
                name: file.name.clone(),
                count: info.error_count,
            });
        }
    }
    Ok(())
}

fn copy_to_keymap(ctx: &Context, info: KeyTypesInfo, keymap: &mut Keymap) {
    if info.types.is_empty() {
        // Without any types, a default unnamed one-level type serves all
        // keys.
        keymap.types.push(KeyType {
            name: ctx.atom_intern("default"),
            mods: Mods::default(),
            num_levels: 1,
            entries: Vec::new(),
            level_names: Vec::new(),
        });
    } else {
        for ty in info.types {
            // Entries mapping to the base level without a preserve mask
            // restate the implicit default and are dropped.
            let entries = ty
                .entries
                .into_iter()
                .filter(|e| e.level != 0 || e.preserve.mods != 0)
                .collect();
            keymap.types.push(KeyType {
                name: ty.name,
                mods: Mods::new(ty.mods),
                num_levels: ty.num_levels,
                entries,
                level_names: ty.level_names,
            });
        }
    }
    keymap.types_section_name = info.name;
    keymap.mods = info.mods;
}

/// Compiles a key types section into the keymap.
pub fn compile_key_types(
    ctx: &Context,
    file: &XkbFile,
    keymap: &mut Keymap,
    merge: MergeMode,
) -> Result<(), CompileError> {
    let mut info = KeyTypesInfo::new(keymap.mods.clone());
    let mut state = IncludeState::new();
    handle_key_types_file(ctx, &mut info, file, merge, &mut state)?;
    if info.error_count > 0 {
        return Err(CompileError::SectionFailed { kind: "keytypes" });
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
        compile_key_types(&ctx, &files.remove(0), &mut keymap, MergeMode::Override).unwrap();
        keymap
    }

    #[test]
    fn test_basic_type() {
        let keymap = compile(
            r#"xkb_types "basic" {
                virtual_modifiers LevelThree;
                type "THREE_LEVEL" {
                    modifiers = Shift+LevelThree;
                    map[None] = Level1;
                    map[Shift] = Level2;
                    map[LevelThree] = Level3;
                    level_name[Level1] = "Base";
                    level_name[Level2] = "Shift";
                    level_name[Level3] = "Alt Base";
                };
            };"#,
        );
        assert_eq!(keymap.types.len(), 1);
        let ty = &keymap.types[0];
        let ctx = keymap.context();
        assert_eq!(&*ctx.atom_text(ty.name), "THREE_LEVEL");
        assert_eq!(ty.num_levels, 3);
        // The None entry restates the implicit base mapping and is
        // dropped.
        assert_eq!(ty.entries.len(), 2);
        let vmod_bit = 1 << 8;
        assert_eq!(ty.mods.mods, 1 | vmod_bit);
        assert_eq!(keymap.mods.num_mods(), 9);
    }

    #[test]
    fn test_map_entry_outside_type_mods_is_clipped() {
        let keymap = compile(
            r#"xkb_types {
                type "T" {
                    modifiers = Shift;
                    map[Shift+Control] = Level2;
                };
            };"#,
        );
        let ty = &keymap.types[0];
        assert_eq!(ty.entries.len(), 1);
        assert_eq!(ty.entries[0].mods.mods, 1, "Control clipped out");
    }

    #[test]
    fn test_preserve_subset_enforced() {
        let keymap = compile(
            r#"xkb_types {
                type "T" {
                    modifiers = Shift+Control;
                    map[Shift+Control] = Level2;
                    preserve[Shift+Control] = Shift+Lock;
                };
            };"#,
        );
        let ty = &keymap.types[0];
        assert_eq!(ty.entries[0].preserve.mods, 1, "Lock clipped from preserve");
    }

    #[test]
    fn test_preserve_before_map_creates_entry() {
        let keymap = compile(
            r#"xkb_types {
                type "T" {
                    modifiers = Control;
                    preserve[Control] = Control;
                    map[Control] = Level2;
                };
            };"#,
        );
        let ty = &keymap.types[0];
        assert_eq!(ty.entries.len(), 1);
        assert_eq!(ty.entries[0].level, 1);
        assert_eq!(ty.entries[0].preserve.mods, 4);
    }

    #[test]
    fn test_duplicate_type_override_wins() {
        let keymap = compile(
            r#"xkb_types {
                type "T" { modifiers = Shift; map[Shift] = Level2; };
                type "T" { modifiers = Control; map[Control] = Level2; };
            };"#,
        );
        assert_eq!(keymap.types.len(), 1);
        assert_eq!(keymap.types[0].mods.mods, 4);
    }

    #[test]
    fn test_empty_types_get_default() {
        let keymap = compile(r#"xkb_types {};"#);
        assert_eq!(keymap.types.len(), 1);
        assert_eq!(keymap.types[0].num_levels, 1);
    }
}
