//! Symbols section compiler.
//!
//! Populates the per-key group arrays of levels (keysyms and actions),
//! the modifier map, and the per-key repeat/virtual-modifier/type
//! assignments.

use std::collections::BTreeMap;

use arrayvec::ArrayVec;

use xkb_core::action::Action;
use xkb_core::keymap::{
    ExplicitComponents, Group, Keycode, LayoutIndex, Level, RangeExceedType, MAX_GROUPS,
};
use xkb_core::message::MessageCode;
use xkb_core::mods::{ModIndex, ModKind, ModMask, ModSet};
use xkb_core::{
    log_err, log_vrb, log_warn, Atom, CompileError, Context, Keymap, Keysym, ATOM_NONE,
};

use crate::action::ActionsInfo;
use crate::ast::{
    Decl, Expr, FileType, IncludeStmt, MergeMode, ModMapDef, SymbolsDef, VarDef, XkbFile,
};
use crate::expr;
use crate::include::{self, IncludeState};
use crate::vmod;

const MAX_ERRORS: usize = 10;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct GroupField: u8 {
        const SYMS = 1 << 0;
        const ACTS = 1 << 1;
        const TYPE = 1 << 2;
    }
}

#[derive(Debug, Clone, Default)]
struct LevelInfo {
    syms: Vec<Keysym>,
    actions: Vec<Action>,
}

#[derive(Debug, Clone, Default)]
struct GroupInfo {
    defined: GroupField,
    levels: Vec<LevelInfo>,
    type_name: Atom,
}

impl GroupInfo {
    fn is_empty(&self) -> bool {
        self.defined.is_empty()
    }
}

#[derive(Debug, Clone)]
struct KeyInfo {
    merge: MergeMode,
    name: Atom,
    groups: ArrayVec<GroupInfo, MAX_GROUPS>,
    default_type: Atom,
    repeat: Option<bool>,
    vmodmap: ModMask,
    vmodmap_defined: bool,
    out_of_range_group_action: Option<RangeExceedType>,
    out_of_range_group_number: LayoutIndex,
}

impl Default for KeyInfo {
    fn default() -> Self {
        Self {
            merge: MergeMode::Default,
            name: ATOM_NONE,
            groups: ArrayVec::new(),
            default_type: ATOM_NONE,
            repeat: None,
            vmodmap: 0,
            vmodmap_defined: false,
            out_of_range_group_action: None,
            out_of_range_group_number: 0,
        }
    }
}

impl KeyInfo {
    fn group_mut(&mut self, group: usize) -> &mut GroupInfo {
        while self.groups.len() <= group {
            self.groups.push(GroupInfo::default());
        }
        &mut self.groups[group]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModMapKey {
    Name(Atom),
    Sym(Keysym),
}

#[derive(Debug, Clone)]
struct ModMapEntry {
    merge: MergeMode,
    modifier: ModIndex,
    key: ModMapKey,
}

struct SymbolsInfo {
    name: Option<String>,
    error_count: usize,
    keys: Vec<KeyInfo>,
    modmaps: Vec<ModMapEntry>,
    group_names: BTreeMap<usize, Atom>,
    explicit_group: Option<u32>,
    default_key: KeyInfo,
    actions: ActionsInfo,
    mods: ModSet,
}

impl SymbolsInfo {
    fn new(mods: ModSet) -> Self {
        Self {
            name: None,
            error_count: 0,
            keys: Vec::new(),
            modmaps: Vec::new(),
            group_names: BTreeMap::new(),
            explicit_group: None,
            default_key: KeyInfo::default(),
            actions: ActionsInfo::new(),
            mods,
        }
    }
}

fn set_syms(
    ctx: &Context,
    key: &mut KeyInfo,
    group: usize,
    value: &Expr,
    clobber: bool,
) -> bool {
    let levels: Vec<Vec<Keysym>> = match value {
        Expr::KeysymList(levels) => levels.clone(),
        Expr::EmptyList => Vec::new(),
        _ => {
            log_err!(
                ctx,
                Some(MessageCode::WrongFieldType),
                "symbols for key <{}> must be a keysym list",
                ctx.atom_text(key.name)
            );
            return false;
        }
    };

    let key_name = key.name;
    let gi = key.group_mut(group);
    if gi.defined.contains(GroupField::SYMS) {
        log_warn!(
            ctx,
            Some(MessageCode::ConflictingKeySymbolsEntry),
            "symbols for key <{}>, group {} redefined; using {} definition",
            ctx.atom_text(key_name),
            group + 1,
            if clobber { "last" } else { "first" }
        );
        if !clobber {
            return true;
        }
    }
    gi.defined |= GroupField::SYMS;
    if gi.levels.len() < levels.len() {
        gi.levels.resize(levels.len(), LevelInfo::default());
    }
    for (level, syms) in levels.into_iter().enumerate() {
        // A lone NoSymbol denotes an empty level.
        let syms = if syms == [Keysym::NO_SYMBOL] { Vec::new() } else { syms };
        gi.levels[level].syms = syms;
    }
    true
}

fn set_actions(
    ctx: &Context,
    info: &SymbolsInfo,
    key: &mut KeyInfo,
    group: usize,
    value: &Expr,
    clobber: bool,
) -> bool {
    let decls: &[crate::ast::ActionDecl] = match value {
        Expr::ActionList(decls) => decls,
        Expr::EmptyList => &[],
        _ => {
            log_err!(
                ctx,
                Some(MessageCode::WrongFieldType),
                "actions for key <{}> must be an action list",
                ctx.atom_text(key.name)
            );
            return false;
        }
    };

    let mut actions = Vec::with_capacity(decls.len());
    for decl in decls {
        match info.actions.handle_action_def(ctx, &info.mods, decl) {
            Some(action) => actions.push(action),
            None => return false,
        }
    }

    let key_name = key.name;
    let gi = key.group_mut(group);
    if gi.defined.contains(GroupField::ACTS) {
        log_warn!(
            ctx,
            Some(MessageCode::ConflictingKeyAction),
            "actions for key <{}>, group {} redefined; using {} definition",
            ctx.atom_text(key_name),
            group + 1,
            if clobber { "last" } else { "first" }
        );
        if !clobber {
            return true;
        }
    }
    gi.defined |= GroupField::ACTS;
    if gi.levels.len() < actions.len() {
        gi.levels.resize(actions.len(), LevelInfo::default());
    }
    for (level, action) in actions.into_iter().enumerate() {
        gi.levels[level].actions = match action {
            Action::None => Vec::new(),
            other => vec![other],
        };
    }
    true
}

fn set_symbols_field(
    ctx: &Context,
    info: &SymbolsInfo,
    key: &mut KeyInfo,
    field: &str,
    array_ndx: Option<&Expr>,
    value: &Expr,
) -> bool {
    let clobber = key.merge.clobbers();
    match &*field.to_ascii_lowercase() {
        "symbols" => {
            let Some(ndx) = array_ndx else {
                log_err!(
                    ctx,
                    Some(MessageCode::ExpectedArrayEntry),
                    "symbols field of key <{}> requires a group index",
                    ctx.atom_text(key.name)
                );
                return false;
            };
            let Some(group) = expr::resolve_group(ctx, ndx) else {
                return false;
            };
            set_syms(ctx, key, group as usize, value, clobber)
        }
        "actions" => {
            let Some(ndx) = array_ndx else {
                log_err!(
                    ctx,
                    Some(MessageCode::ExpectedArrayEntry),
                    "actions field of key <{}> requires a group index",
                    ctx.atom_text(key.name)
                );
                return false;
            };
            let Some(group) = expr::resolve_group(ctx, ndx) else {
                return false;
            };
            set_actions(ctx, info, key, group as usize, value, clobber)
        }
        "type" => {
            let Some(name) = expr::resolve_string(ctx, value) else {
                log_err!(
                    ctx,
                    Some(MessageCode::WrongFieldType),
                    "the type field of key <{}> must be a string",
                    ctx.atom_text(key.name)
                );
                return false;
            };
            match array_ndx {
                Some(ndx) => {
                    let Some(group) = expr::resolve_group(ctx, ndx) else {
                        return false;
                    };
                    let gi = key.group_mut(group as usize);
                    gi.type_name = name;
                    gi.defined |= GroupField::TYPE;
                    true
                }
                None => {
                    key.default_type = name;
                    true
                }
            }
        }
        "vmods" | "virtualmods" | "virtualmodifiers" => {
            match expr::resolve_mod_mask(ctx, &info.mods, Some(ModKind::Virtual), value) {
                Some(mask) => {
                    key.vmodmap = mask;
                    key.vmodmap_defined = true;
                    true
                }
                None => {
                    log_err!(
                        ctx,
                        Some(MessageCode::UnsupportedModifierMask),
                        "virtual modifiers of key <{}> must be a virtual modifier mask",
                        ctx.atom_text(key.name)
                    );
                    false
                }
            }
        }
        "repeat" | "repeats" | "repeating" => {
            if let Expr::Ident(atom) = value {
                if ctx.atom_text(*atom).eq_ignore_ascii_case("default") {
                    key.repeat = None;
                    return true;
                }
            }
            match expr::resolve_boolean(ctx, value) {
                Some(b) => {
                    key.repeat = Some(b);
                    true
                }
                None => {
                    log_err!(
                        ctx,
                        Some(MessageCode::WrongFieldType),
                        "the repeat field of key <{}> must be a boolean",
                        ctx.atom_text(key.name)
                    );
                    false
                }
            }
        }
        "locking" | "lock" => expr::resolve_boolean(ctx, value).is_some(),
        "groupswrap" | "wrapgroups" => match expr::resolve_boolean(ctx, value) {
            Some(b) => {
                key.out_of_range_group_action = Some(if b {
                    RangeExceedType::Wrap
                } else {
                    RangeExceedType::Saturate
                });
                true
            }
            None => false,
        },
        "groupsclamp" | "clampgroups" => match expr::resolve_boolean(ctx, value) {
            Some(b) => {
                key.out_of_range_group_action = Some(if b {
                    RangeExceedType::Saturate
                } else {
                    RangeExceedType::Wrap
                });
                true
            }
            None => false,
        },
        "groupsredirect" | "redirectgroups" => match expr::resolve_group(ctx, value) {
            Some(group) => {
                key.out_of_range_group_action = Some(RangeExceedType::Redirect);
                key.out_of_range_group_number = group;
                true
            }
            None => false,
        },
        "overlay" | "overlay1" | "overlay2" | "allownone" => {
            log_vrb!(
                ctx,
                5,
                Some(MessageCode::UnsupportedSymbolsField),
                "legacy field \"{}\" of key <{}> is not supported; ignored",
                field,
                ctx.atom_text(key.name)
            );
            true
        }
        _ => {
            log_err!(
                ctx,
                Some(MessageCode::UnknownField),
                "unknown field \"{}\" in a symbol map for key <{}>",
                field,
                ctx.atom_text(key.name)
            );
            false
        }
    }
}

fn merge_groups(ctx: &Context, key_name: Atom, into: &mut GroupInfo, from: GroupInfo, clobber: bool) {
    if into.is_empty() {
        *into = from;
        return;
    }
    if from.is_empty() {
        return;
    }

    if from.defined.contains(GroupField::TYPE) {
        if into.defined.contains(GroupField::TYPE) && into.type_name != from.type_name {
            log_warn!(
                ctx,
                Some(MessageCode::ConflictingKeyTypeMergingGroups),
                "conflicting key types merging groups of <{}>; using {}",
                ctx.atom_text(key_name),
                if clobber { "last" } else { "first" }
            );
        }
        if clobber || !into.defined.contains(GroupField::TYPE) {
            into.type_name = from.type_name;
            into.defined |= GroupField::TYPE;
        }
    }

    let merge_levels = |into: &mut GroupInfo, from: &GroupInfo, which: GroupField| {
        if into.levels.len() < from.levels.len() {
            into.levels.resize(from.levels.len(), LevelInfo::default());
        }
        for (level, from_level) in from.levels.iter().enumerate() {
            if which == GroupField::SYMS {
                into.levels[level].syms = from_level.syms.clone();
            } else {
                into.levels[level].actions = from_level.actions.clone();
            }
        }
    };

    if from.defined.contains(GroupField::SYMS) {
        if into.defined.contains(GroupField::SYMS) {
            log_warn!(
                ctx,
                Some(MessageCode::ConflictingKeySymbol),
                "conflicting symbols merging groups of <{}>; using {}",
                ctx.atom_text(key_name),
                if clobber { "last" } else { "first" }
            );
            if clobber {
                merge_levels(into, &from, GroupField::SYMS);
            }
        } else {
            merge_levels(into, &from, GroupField::SYMS);
            into.defined |= GroupField::SYMS;
        }
    }
    if from.defined.contains(GroupField::ACTS) {
        if into.defined.contains(GroupField::ACTS) {
            log_warn!(
                ctx,
                Some(MessageCode::ConflictingKeyAction),
                "conflicting actions merging groups of <{}>; using {}",
                ctx.atom_text(key_name),
                if clobber { "last" } else { "first" }
            );
            if clobber {
                merge_levels(into, &from, GroupField::ACTS);
            }
        } else {
            merge_levels(into, &from, GroupField::ACTS);
            into.defined |= GroupField::ACTS;
        }
    }
}

fn merge_keys(ctx: &Context, into: &mut KeyInfo, from: KeyInfo) {
    let clobber = from.merge.clobbers();

    if from.merge == MergeMode::Replace {
        *into = from;
        return;
    }

    for (g, from_group) in from.groups.into_iter().enumerate() {
        merge_groups(ctx, into.name, into.group_mut(g), from_group, clobber);
    }

    if from.default_type != ATOM_NONE && (clobber || into.default_type == ATOM_NONE) {
        into.default_type = from.default_type;
    }
    if let Some(repeat) = from.repeat {
        if into.repeat.is_some() && into.repeat != Some(repeat) {
            log_vrb!(
                ctx,
                4,
                Some(MessageCode::ConflictingKeyFields),
                "conflicting repeat flags for <{}>; using {}",
                ctx.atom_text(into.name),
                if clobber { "last" } else { "first" }
            );
        }
        if clobber || into.repeat.is_none() {
            into.repeat = Some(repeat);
        }
    }
    if from.vmodmap_defined {
        if clobber || !into.vmodmap_defined {
            into.vmodmap = from.vmodmap;
            into.vmodmap_defined = true;
        }
    }
    if let Some(action) = from.out_of_range_group_action {
        if clobber || into.out_of_range_group_action.is_none() {
            into.out_of_range_group_action = Some(action);
            into.out_of_range_group_number = from.out_of_range_group_number;
        }
    }
}

fn add_key_symbols(ctx: &Context, info: &mut SymbolsInfo, key: KeyInfo) {
    if let Some(old) = info.keys.iter_mut().find(|k| k.name == key.name) {
        merge_keys(ctx, old, key);
        return;
    }
    info.keys.push(key);
}

fn handle_symbols_def(
    ctx: &Context,
    info: &mut SymbolsInfo,
    def: &SymbolsDef,
    merge: MergeMode,
) -> bool {
    let mut key = info.default_key.clone();
    key.merge = def.merge.resolve(merge);
    key.name = def.key_name;

    // Bare bracketed lists assign successive groups.
    let mut implicit_group = 0usize;

    let mut ok = true;
    for var in &def.body {
        match &var.name {
            None => {
                if implicit_group >= MAX_GROUPS {
                    log_err!(
                        ctx,
                        Some(MessageCode::UnsupportedGroupIndex),
                        "too many groups of symbols for key <{}>; extra definitions ignored",
                        ctx.atom_text(key.name)
                    );
                    ok = false;
                    continue;
                }
                let clobber = key.merge.clobbers();
                ok &= match &var.value {
                    Expr::ActionList(_) => {
                        set_actions(ctx, info, &mut key, implicit_group, &var.value, clobber)
                    }
                    _ => set_syms(ctx, &mut key, implicit_group, &var.value, clobber),
                };
                implicit_group += 1;
            }
            Some(name) => {
                let Some((elem, field, ndx)) = expr::resolve_lhs(ctx, name) else {
                    ok = false;
                    continue;
                };
                if elem.is_some() {
                    log_err!(
                        ctx,
                        Some(MessageCode::GlobalDefaultsWrongScope),
                        "cannot set global defaults inside a key statement"
                    );
                    ok = false;
                    continue;
                }
                ok &= set_symbols_field(ctx, info, &mut key, &field, ndx, &var.value);
            }
        }
    }
    if !ok {
        return false;
    }

    if let Some(explicit) = info.explicit_group {
        let nonbase: Vec<_> = key
            .groups
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, g)| !g.is_empty())
            .map(|(i, _)| i)
            .collect();
        if !nonbase.is_empty() {
            log_warn!(
                ctx,
                Some(MessageCode::MultipleGroupsAtOnce),
                "key <{}> defines several groups, but the include statement targets group {}; \
                 other groups ignored",
                ctx.atom_text(key.name),
                explicit + 1
            );
        }
        let base = key.groups.first().cloned().unwrap_or_default();
        key.groups.clear();
        key.group_mut(explicit as usize);
        key.groups[explicit as usize] = base;
    }

    add_key_symbols(ctx, info, key);
    true
}

fn handle_mod_map_def(ctx: &Context, info: &mut SymbolsInfo, def: &ModMapDef, merge: MergeMode) -> bool {
    let merge = def.merge.resolve(merge);
    let text = ctx.atom_text(def.modifier);
    if text.eq_ignore_ascii_case("none") {
        // Explicitly unmapped.
        return true;
    }
    let Some(modifier) = info.mods.mod_index(def.modifier, Some(ModKind::Real)) else {
        log_err!(
            ctx,
            Some(MessageCode::InvalidModmapEntry),
            "illegal modifier map definition; mapping for non-modifier \"{}\" ignored",
            text
        );
        return false;
    };

    let mut ok = true;
    for key_expr in &def.keys {
        let key = match key_expr {
            Expr::KeyName(atom) => ModMapKey::Name(*atom),
            Expr::Ident(atom) => {
                let name = ctx.atom_text(*atom);
                match Keysym::from_name(&name) {
                    Some(sym) => ModMapKey::Sym(sym),
                    None => {
                        log_warn!(
                            ctx,
                            Some(MessageCode::UnrecognizedKeysym),
                            "unrecognized keysym \"{}\" in a modifier map; ignored",
                            name
                        );
                        continue;
                    }
                }
            }
            _ => {
                ok = false;
                continue;
            }
        };

        if let Some(old) = info
            .modmaps
            .iter_mut()
            .find(|e| e.key == key && e.modifier != modifier)
        {
            let clobber = merge.clobbers();
            log_warn!(
                ctx,
                Some(MessageCode::ConflictingModmap),
                "conflicting modifier map entries; using {} definition",
                if clobber { "last" } else { "first" }
            );
            if clobber {
                old.modifier = modifier;
            }
            continue;
        }
        info.modmaps.push(ModMapEntry {
            merge,
            modifier,
            key,
        });
    }
    ok
}

fn handle_global_var(ctx: &Context, info: &mut SymbolsInfo, def: &VarDef) -> bool {
    let Some(name) = &def.name else {
        return false;
    };
    let Some((elem, field, ndx)) = expr::resolve_lhs(ctx, name) else {
        return false;
    };

    if let Some(elem) = elem {
        if elem.eq_ignore_ascii_case("key") {
            let mut default_key = std::mem::take(&mut info.default_key);
            let ok = set_symbols_field(ctx, info, &mut default_key, &field, ndx, &def.value);
            info.default_key = default_key;
            return ok;
        }
        let mods = info.mods.clone();
        if let Some(ok) =
            info.actions
                .set_default_field(ctx, &mods, &elem, &field, ndx, &def.value)
        {
            return ok;
        }
        log_err!(
            ctx,
            Some(MessageCode::UnknownField),
            "unknown global element \"{}\" in a symbols section",
            elem
        );
        return false;
    }

    match &*field.to_ascii_lowercase() {
        "name" => {
            let Some(ndx) = ndx else {
                log_warn!(
                    ctx,
                    Some(MessageCode::MissingSymbolsGroupNameIndex),
                    "group name definition is missing its group index; ignored"
                );
                return true;
            };
            let Some(mut group) = expr::resolve_group(ctx, ndx) else {
                return false;
            };
            let Some(name) = expr::resolve_string(ctx, &def.value) else {
                log_err!(
                    ctx,
                    Some(MessageCode::WrongFieldType),
                    "group names must be strings"
                );
                return false;
            };
            // A file included with an explicit layout index renames that
            // layout through its base group name; names for other groups
            // make no sense there.
            if let Some(explicit) = info.explicit_group {
                if group != 0 {
                    log_warn!(
                        ctx,
                        Some(MessageCode::NonBaseGroupName),
                        "the name of group {} was defined, but the include statement targets \
                         group {}; group name ignored",
                        group + 1,
                        explicit + 1
                    );
                    return true;
                }
                group = explicit;
            }
            info.group_names.insert(group as usize, name);
            true
        }
        "groupswrap" | "wrapgroups" | "groupsclamp" | "clampgroups" | "groupsredirect"
        | "redirectgroups" => {
            let mut default_key = std::mem::take(&mut info.default_key);
            let ok = set_symbols_field(ctx, info, &mut default_key, &field, ndx, &def.value);
            info.default_key = default_key;
            ok
        }
        _ => {
            log_err!(
                ctx,
                Some(MessageCode::UnknownField),
                "unknown global field \"{}\" in a symbols section",
                field
            );
            false
        }
    }
}

fn merge_included(ctx: &Context, into: &mut SymbolsInfo, from: SymbolsInfo, merge: MergeMode) {
    if from.error_count > 0 {
        into.error_count += from.error_count;
        return;
    }
    into.mods = from.mods;
    if into.name.is_none() {
        into.name = from.name;
    }
    for (group, name) in from.group_names {
        into.group_names.entry(group).or_insert(name);
        if merge.clobbers() {
            into.group_names.insert(group, name);
        }
    }
    for mut key in from.keys {
        key.merge = if merge == MergeMode::Default { key.merge } else { merge };
        add_key_symbols(ctx, into, key);
    }
    for mut entry in from.modmaps {
        entry.merge = if merge == MergeMode::Default { entry.merge } else { merge };
        if let Some(old) = into
            .modmaps
            .iter_mut()
            .find(|e| e.key == entry.key && e.modifier != entry.modifier)
        {
            if entry.merge.clobbers() {
                old.modifier = entry.modifier;
            }
            continue;
        }
        if !into.modmaps.iter().any(|e| e.key == entry.key && e.modifier == entry.modifier) {
            into.modmaps.push(entry);
        }
    }
}

fn handle_include(
    ctx: &Context,
    info: &mut SymbolsInfo,
    state: &mut IncludeState,
    stmt: &IncludeStmt,
) -> Result<(), CompileError> {
    let groups = include::parse_include_stmt(ctx, &stmt.stmt, stmt.merge)?;
    let mut included = SymbolsInfo::new(info.mods.clone());
    included.name = Some(stmt.stmt.clone());
    for group in &groups {
        let mods = included.mods.clone();
        let next = include::with_include_frame(ctx, state, group, |state| {
            let file = include::load_include_section(ctx, group, FileType::Symbols)?;
            let mut next = SymbolsInfo::new(mods);
            next.explicit_group = group.explicit_group;
            handle_symbols_file(ctx, &mut next, &file, group.merge, state)?;
            Ok::<_, CompileError>(next)
        })??;
        merge_included(ctx, &mut included, next, group.merge);
    }
    merge_included(ctx, info, included, groups[0].merge);
    Ok(())
}

fn handle_symbols_file(
    ctx: &Context,
    info: &mut SymbolsInfo,
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
            Decl::Symbols(def) => handle_symbols_def(ctx, info, def, merge),
            Decl::Var(def) => handle_global_var(ctx, info, def),
            Decl::VMod(def) => vmod::handle_vmod_def(ctx, &mut info.mods, def, merge),
            Decl::ModMap(def) => handle_mod_map_def(ctx, info, def, merge),
            _ => {
                log_err!(
                    ctx,
                    Some(MessageCode::WrongStatementType),
                    "symbols sections may not contain this statement; ignored"
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
                "abandoning symbols file \"{}\"",
                file.name
            );
            return Err(CompileError::TooManyErrors {
                kind: "symbols",
                name: file.name.clone(),
                count: info.error_count,
            });
        }
    }
    Ok(())
}

/// Picks a standard type name matching the populated levels of a group.
fn find_automatic_type(levels: &[LevelInfo]) -> Option<&'static str> {
    let width = levels.len();
    let single = |level: usize| -> Option<Keysym> {
        match levels.get(level).map(|l| l.syms.as_slice()) {
            Some([sym]) => Some(*sym),
            _ => None,
        }
    };
    let alpha = |lower: usize, upper: usize| {
        matches!((single(lower), single(upper)),
                 (Some(l), Some(u)) if l.is_lowercase() && u.is_uppercase())
    };
    let keypad = |level: usize| single(level).is_some_and(Keysym::is_keypad);

    match width {
        0 | 1 => Some("ONE_LEVEL"),
        2 => {
            if alpha(0, 1) {
                Some("ALPHABETIC")
            } else if keypad(0) || keypad(1) {
                Some("KEYPAD")
            } else {
                Some("TWO_LEVEL")
            }
        }
        3 | 4 => {
            if alpha(0, 1) {
                if alpha(2, 3) {
                    Some("FOUR_LEVEL_ALPHABETIC")
                } else {
                    Some("FOUR_LEVEL_SEMIALPHABETIC")
                }
            } else if keypad(0) || keypad(1) {
                Some("FOUR_LEVEL_KEYPAD")
            } else {
                Some("FOUR_LEVEL")
            }
        }
        _ => None,
    }
}

fn find_type_index(keymap: &Keymap, name: Atom) -> Option<usize> {
    keymap.types.iter().position(|t| t.name == name)
}

fn find_key_by_atom(keymap: &Keymap, atom: Atom) -> Option<Keycode> {
    let real = keymap
        .key_aliases
        .iter()
        .find(|a| a.alias == atom)
        .map_or(atom, |a| a.real);
    keymap.iter_keys().find(|k| k.name == real).map(|k| k.keycode)
}

fn find_key_for_symbol(keymap: &Keymap, sym: Keysym) -> Option<Keycode> {
    keymap
        .iter_keys()
        .find(|k| {
            k.groups
                .first()
                .and_then(|g| g.levels.first())
                .is_some_and(|l| l.syms == [sym])
        })
        .map(|k| k.keycode)
}

fn copy_symbols_to_keymap(ctx: &Context, info: SymbolsInfo, keymap: &mut Keymap) {
    keymap.mods = info.mods;
    keymap.symbols_section_name = info.name;

    for key_info in &info.keys {
        let Some(kc) = find_key_by_atom(keymap, key_info.name) else {
            log_vrb!(
                ctx,
                5,
                Some(MessageCode::UndefinedKeycode),
                "symbols defined for unknown key <{}>; definition ignored",
                ctx.atom_text(key_info.name)
            );
            continue;
        };

        let num_groups = key_info
            .groups
            .iter()
            .enumerate()
            .filter(|(_, g)| !g.is_empty())
            .map(|(i, _)| i + 1)
            .max()
            .unwrap_or(0);

        let mut groups = Vec::with_capacity(num_groups);
        for g in 0..num_groups {
            let empty = GroupInfo::default();
            let gi = key_info.groups.get(g).unwrap_or(&empty);

            // Resolve the group's key type: explicit name, else the
            // key-wide default, else infer one from the symbols.
            let explicit_name = if gi.defined.contains(GroupField::TYPE) {
                Some(gi.type_name)
            } else if key_info.default_type != ATOM_NONE {
                Some(key_info.default_type)
            } else {
                None
            };
            let (type_index, explicit_type) = match explicit_name {
                Some(name) => match find_type_index(keymap, name) {
                    Some(idx) => (idx, true),
                    None => {
                        log_warn!(
                            ctx,
                            Some(MessageCode::UndefinedKeyType),
                            "the type \"{}\" for key <{}>, group {} was not defined; \
                             using the default type",
                            ctx.atom_text(name),
                            ctx.atom_text(key_info.name),
                            g + 1
                        );
                        (0, false)
                    }
                },
                None => {
                    let inferred = find_automatic_type(&gi.levels);
                    let idx = inferred
                        .map(|n| ctx.atom_intern(n))
                        .and_then(|n| find_type_index(keymap, n));
                    match idx {
                        Some(idx) => (idx, false),
                        None => {
                            log_warn!(
                                ctx,
                                Some(MessageCode::CannotInferKeyType),
                                "could not find an automatic type for key <{}>, group {}; \
                                 using the default type",
                                ctx.atom_text(key_info.name),
                                g + 1
                            );
                            (0, false)
                        }
                    }
                }
            };

            let num_levels = keymap.types[type_index].num_levels as usize;
            if gi.levels.len() > num_levels {
                log_warn!(
                    ctx,
                    Some(MessageCode::ExtraSymbolsIgnored),
                    "type \"{}\" of key <{}> has {} levels, but the group has {}; \
                     extra symbols ignored",
                    ctx.atom_text(keymap.types[type_index].name),
                    ctx.atom_text(key_info.name),
                    num_levels,
                    gi.levels.len()
                );
            }

            let mut levels = Vec::with_capacity(num_levels);
            for level in 0..num_levels {
                let li = gi.levels.get(level);
                levels.push(Level {
                    syms: li.map(|l| l.syms.clone()).unwrap_or_default(),
                    actions: li.map(|l| l.actions.clone()).unwrap_or_default(),
                });
            }

            groups.push(Group {
                key_type: type_index,
                explicit_type,
                levels,
            });
        }

        let explicit_actions = key_info
            .groups
            .iter()
            .any(|g| g.defined.contains(GroupField::ACTS));

        let Some(key) = keymap.key_mut(kc) else { continue };
        key.groups = groups;
        if explicit_actions {
            key.explicit |= ExplicitComponents::INTERP;
        }
        if let Some(repeat) = key_info.repeat {
            key.repeats = repeat;
            key.explicit |= ExplicitComponents::REPEAT;
        }
        if key_info.vmodmap_defined {
            key.vmodmap = key_info.vmodmap;
            key.explicit |= ExplicitComponents::VMODMAP;
        }
        if let Some(action) = key_info.out_of_range_group_action {
            key.out_of_range_group_action = action;
            key.out_of_range_group_number = key_info.out_of_range_group_number;
        }
    }

    keymap.num_groups = keymap
        .iter_keys()
        .map(|k| k.num_groups())
        .max()
        .unwrap_or(0);

    let last_named = info.group_names.keys().next_back().copied();
    let names_len = last_named
        .map(|g| g + 1)
        .unwrap_or(0)
        .max(keymap.num_groups as usize);
    keymap.group_names = vec![ATOM_NONE; names_len];
    for (group, name) in info.group_names {
        keymap.group_names[group] = name;
    }

    // Modifier map entries; keysym entries bind to the key producing the
    // keysym in the base position.
    for entry in info.modmaps {
        let kc = match entry.key {
            ModMapKey::Name(atom) => {
                let Some(kc) = find_key_by_atom(keymap, atom) else {
                    log_vrb!(
                        ctx,
                        5,
                        Some(MessageCode::UndefinedKeycode),
                        "modmap entry for unknown key <{}>; ignored",
                        ctx.atom_text(atom)
                    );
                    continue;
                };
                kc
            }
            ModMapKey::Sym(sym) => {
                let Some(kc) = find_key_for_symbol(keymap, sym) else {
                    log_vrb!(
                        ctx,
                        5,
                        Some(MessageCode::UnresolvedKeymapSymbol),
                        "modmap entry for keysym \"{}\" matches no key; ignored",
                        sym.name()
                    );
                    continue;
                };
                kc
            }
        };
        if let Some(key) = keymap.key_mut(kc) {
            key.modmap |= 1 << entry.modifier;
        }
    }
}

/// Compiles a symbols section into the keymap.
pub fn compile_symbols(
    ctx: &Context,
    file: &XkbFile,
    keymap: &mut Keymap,
    merge: MergeMode,
) -> Result<(), CompileError> {
    let mut info = SymbolsInfo::new(keymap.mods.clone());
    let mut state = IncludeState::new();
    handle_symbols_file(ctx, &mut info, file, merge, &mut state)?;
    if info.error_count > 0 {
        return Err(CompileError::SectionFailed { kind: "symbols" });
    }
    copy_symbols_to_keymap(ctx, info, keymap);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycodes::compile_keycodes;
    use crate::parser;
    use crate::types::compile_key_types;
    use xkb_core::ContextFlags;

    const KEYCODES: &str = r#"xkb_keycodes {
        <LFSH> = 50;
        <AD01> = 24;
        <AD02> = 25;
        <KP7> = 79;
    };"#;

    const TYPES: &str = r#"xkb_types {
        virtual_modifiers NumLock;
        type "ONE_LEVEL" { modifiers = none; };
        type "TWO_LEVEL" { modifiers = Shift; map[Shift] = Level2; };
        type "ALPHABETIC" {
            modifiers = Shift+Lock;
            map[Shift] = Level2;
            map[Lock] = Level2;
        };
        type "KEYPAD" { modifiers = Shift+NumLock; map[Shift] = Level2; map[NumLock] = Level2; };
    };"#;

    fn compile(symbols: &str) -> Keymap {
        let ctx =
            Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES);
        let mut keymap = Keymap::new(ctx.clone());
        let mut parse = |src: &str| {
            parser::parse_string(&ctx, src.as_bytes(), "(test)")
                .unwrap()
                .remove(0)
        };
        compile_keycodes(&ctx, &parse(KEYCODES), &mut keymap, MergeMode::Override).unwrap();
        compile_key_types(&ctx, &parse(TYPES), &mut keymap, MergeMode::Override).unwrap();
        compile_symbols(&ctx, &parse(symbols), &mut keymap, MergeMode::Override).unwrap();
        keymap
    }

    fn sym(name: &str) -> Keysym {
        Keysym::from_name(name).unwrap()
    }

    #[test]
    fn test_shorthand_list_and_type_inference() {
        let keymap = compile(r#"xkb_symbols "us" { key <AD01> { [ q, Q ] }; };"#);
        let kc = keymap.key_by_name("AD01").unwrap();
        let key = keymap.key(kc).unwrap();
        assert_eq!(key.num_groups(), 1);
        // Lower/upper pair infers the alphabetic type.
        let ty = keymap.key_type(key, 0).unwrap();
        assert_eq!(&*keymap.context().atom_text(ty.name), "ALPHABETIC");
        assert_eq!(keymap.key_get_syms_by_level(kc, 0, 0), &[sym("q")]);
        assert_eq!(keymap.key_get_syms_by_level(kc, 0, 1), &[sym("Q")]);
    }

    #[test]
    fn test_keypad_inference() {
        let keymap = compile(r#"xkb_symbols { key <KP7> { [ KP_Home, KP_7 ] }; };"#);
        let kc = keymap.key_by_name("KP7").unwrap();
        let key = keymap.key(kc).unwrap();
        let ty = keymap.key_type(key, 0).unwrap();
        assert_eq!(&*keymap.context().atom_text(ty.name), "KEYPAD");
    }

    #[test]
    fn test_explicit_type_and_padding() {
        let keymap = compile(
            r#"xkb_symbols {
                key <AD01> { type[Group1]= "TWO_LEVEL", symbols[Group1]= [ a ] };
            };"#,
        );
        let kc = keymap.key_by_name("AD01").unwrap();
        // The group is padded up to the type's two levels.
        assert_eq!(keymap.num_levels_for_key(kc, 0), 2);
        assert!(keymap.key_get_syms_by_level(kc, 0, 1).is_empty());
        let key = keymap.key(kc).unwrap();
        assert!(key.groups[0].explicit_type);
    }

    #[test]
    fn test_two_groups_and_group_names() {
        let keymap = compile(
            r#"xkb_symbols {
                name[Group1]= "English (US)";
                name[Group2]= "German";
                key <AD01> { [ q, Q ], [ q, at ] };
            };"#,
        );
        assert_eq!(keymap.num_layouts(), 2);
        assert_eq!(keymap.layout_get_index("German"), Some(1));
        let kc = keymap.key_by_name("AD01").unwrap();
        assert_eq!(keymap.key_get_syms_by_level(kc, 1, 1), &[sym("at")]);
    }

    #[test]
    fn test_modmap_by_name_and_sym() {
        let keymap = compile(
            r#"xkb_symbols {
                key <LFSH> { [ Shift_L ] };
                key <AD01> { [ q, Q ] };
                modifier_map Shift { <LFSH>, q };
            };"#,
        );
        let shift_kc = keymap.key_by_name("LFSH").unwrap();
        assert_eq!(keymap.key(shift_kc).unwrap().modmap, 1);
        let q_kc = keymap.key_by_name("AD01").unwrap();
        assert_eq!(keymap.key(q_kc).unwrap().modmap, 1);
    }

    #[test]
    fn test_explicit_fields() {
        let keymap = compile(
            r#"xkb_symbols {
                key <AD01> {
                    repeat= No,
                    virtualMods= NumLock,
                    symbols[Group1]= [ q, Q ],
                    actions[Group1]= [ NoAction(), SetMods(modifiers=Shift) ]
                };
            };"#,
        );
        let kc = keymap.key_by_name("AD01").unwrap();
        let key = keymap.key(kc).unwrap();
        assert!(key.explicit.contains(ExplicitComponents::REPEAT));
        assert!(key.explicit.contains(ExplicitComponents::VMODMAP));
        assert!(key.explicit.contains(ExplicitComponents::INTERP));
        assert!(!key.repeats);
        assert_eq!(key.vmodmap, 1 << 8);
        assert!(key.groups[0].levels[0].actions.is_empty());
        assert_eq!(key.groups[0].levels[1].actions.len(), 1);
    }

    #[test]
    fn test_merge_modes_on_keys() {
        let keymap = compile(
            r#"xkb_symbols {
                key <AD01> { [ a, A ] };
                augment key <AD01> { [ b, B ] };
                key <AD02> { [ c, C ] };
                override key <AD02> { [ d, D ] };
            };"#,
        );
        let a = keymap.key_by_name("AD01").unwrap();
        assert_eq!(keymap.key_get_syms_by_level(a, 0, 0), &[sym("a")]);
        let c = keymap.key_by_name("AD02").unwrap();
        assert_eq!(keymap.key_get_syms_by_level(c, 0, 0), &[sym("d")]);
    }

    #[test]
    fn test_replace_resets_key() {
        let keymap = compile(
            r#"xkb_symbols {
                key <AD01> { repeat= No, [ a, A ] };
                replace key <AD01> { [ q ] };
            };"#,
        );
        let kc = keymap.key_by_name("AD01").unwrap();
        let key = keymap.key(kc).unwrap();
        assert_eq!(key.num_groups(), 1);
        assert_eq!(keymap.num_levels_for_key(kc, 0), 1);
        assert_eq!(keymap.key_get_syms_by_level(kc, 0, 0), &[sym("q")]);
        assert!(!key.explicit.contains(ExplicitComponents::REPEAT));
    }

    #[test]
    fn test_symbols_for_unknown_key_ignored() {
        let keymap = compile(r#"xkb_symbols { key <XXXX> { [ x ] }; };"#);
        assert_eq!(keymap.num_groups, 0);
    }

    #[test]
    fn test_extra_symbols_truncated() {
        let keymap = compile(
            r#"xkb_symbols {
                key <AD01> { type[Group1]= "ONE_LEVEL", symbols[Group1]= [ a, A, b ] };
            };"#,
        );
        let kc = keymap.key_by_name("AD01").unwrap();
        assert_eq!(keymap.num_levels_for_key(kc, 0), 1);
    }
}
