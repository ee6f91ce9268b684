//! Compatibility section compiler.
//!
//! Collects the ordered list of symbol interpretations and the indicator
//! map definitions. Interpretations are sorted most specific first when
//! copied into the keymap; the finalizer walks that list to assign
//! default actions to keys.

use xkb_core::keymap::{Led, MatchOperation, StateComponent, SymInterpret, MAX_LEDS};
use xkb_core::message::MessageCode;
use xkb_core::mods::{ModKind, ModSet, Mods, MOD_REAL_MASK_ALL};
use xkb_core::{log_err, log_vrb, log_warn, CompileError, Context, Keymap, Keysym};

use crate::action::ActionsInfo;
use crate::ast::{Decl, Expr, FileType, IncludeStmt, InterpDef, LedMapDef, MergeMode, VarDef, XkbFile};
use crate::expr;
use crate::include::{self, IncludeState};
use crate::text::{CTRL_MASK_NAMES, GROUP_COMPONENT_MASK_NAMES, GROUP_MASK_NAMES, MOD_COMPONENT_MASK_NAMES};
use crate::vmod;

const MAX_ERRORS: usize = 10;

const MATCH_OPERATION_NAMES: &[(&str, MatchOperation)] = &[
    ("noneof", MatchOperation::NoneOf),
    ("anyofornone", MatchOperation::AnyOfOrNone),
    ("anyof", MatchOperation::AnyOf),
    ("allof", MatchOperation::AllOf),
    ("exactly", MatchOperation::Exactly),
];

#[derive(Clone)]
struct SymInterpInfo {
    merge: MergeMode,
    interp: SymInterpret,
}

#[derive(Clone)]
struct LedInfo {
    merge: MergeMode,
    led: Led,
}

struct CompatInfo {
    name: Option<String>,
    error_count: usize,
    default_interp: SymInterpret,
    interps: Vec<SymInterpInfo>,
    default_led: Led,
    leds: Vec<LedInfo>,
    actions: ActionsInfo,
    mods: ModSet,
}

impl CompatInfo {
    fn new(mods: ModSet) -> Self {
        Self {
            name: None,
            error_count: 0,
            default_interp: SymInterpret::default(),
            interps: Vec::new(),
            default_led: Led::default(),
            leds: Vec::new(),
            actions: ActionsInfo::new(),
            mods,
        }
    }
}

/// Resolves the `sym+pred(mods)` match part of an interpret statement.
fn resolve_state_and_predicate(
    ctx: &Context,
    info: &CompatInfo,
    expr: Option<&Expr>,
) -> Option<(MatchOperation, u32)> {
    let Some(expr) = expr else {
        return Some((MatchOperation::AnyOfOrNone, MOD_REAL_MASK_ALL));
    };

    let mut pred = MatchOperation::Exactly;
    let mut mask_expr = expr;
    match expr {
        Expr::Action(decl) => {
            let name = ctx.atom_text(decl.name);
            let found = MATCH_OPERATION_NAMES
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(&name));
            match (found, decl.args.len()) {
                (Some(&(_, op)), 1) => {
                    pred = op;
                    mask_expr = &decl.args[0];
                }
                _ => {
                    log_err!(
                        ctx,
                        Some(MessageCode::InvalidExpressionType),
                        "unknown interpretation predicate \"{}\"",
                        name
                    );
                    return None;
                }
            }
        }
        Expr::Ident(atom) => {
            if ctx.atom_text(*atom).eq_ignore_ascii_case("any") {
                return Some((MatchOperation::AnyOf, MOD_REAL_MASK_ALL));
            }
        }
        _ => {}
    }

    expr::resolve_mod_mask(ctx, &info.mods, Some(ModKind::Real), mask_expr)
        .map(|mods| (pred, mods))
}

fn set_interp_field(
    ctx: &Context,
    info: &CompatInfo,
    interp: &mut SymInterpret,
    field: &str,
    value: &Expr,
) -> bool {
    match &*field.to_ascii_lowercase() {
        "action" => {
            let Expr::Action(decl) = value else {
                log_err!(
                    ctx,
                    Some(MessageCode::WrongFieldType),
                    "the action field of an interpretation must be an action definition"
                );
                return false;
            };
            match info.actions.handle_action_def(ctx, &info.mods, decl) {
                Some(action) => {
                    interp.action = action;
                    true
                }
                None => false,
            }
        }
        "virtualmodifier" | "virtualmod" => {
            match expr::resolve_mod_index(ctx, &info.mods, Some(ModKind::Virtual), value) {
                Some(idx) => {
                    interp.virtual_mod = idx;
                    true
                }
                None => false,
            }
        }
        "repeat" => match expr::resolve_boolean(ctx, value) {
            Some(b) => {
                interp.repeat = b;
                true
            }
            None => {
                log_err!(
                    ctx,
                    Some(MessageCode::WrongFieldType),
                    "the repeat field of an interpretation must be a boolean"
                );
                false
            }
        },
        "locking" => {
            // Legacy server-side locking behavior; accepted and ignored.
            expr::resolve_boolean(ctx, value).is_some()
        }
        "usemodmap" | "usemodmapmods" => {
            const USE_MOD_MAP_VALUES: &[(&str, bool)] =
                &[("levelone", true), ("level1", true), ("anylevel", false), ("any", false)];
            match expr::resolve_enum(ctx, value, USE_MOD_MAP_VALUES)
                .or_else(|| expr::resolve_boolean(ctx, value))
            {
                Some(level_one_only) => {
                    interp.level_one_only = level_one_only;
                    true
                }
                None => {
                    log_err!(
                        ctx,
                        Some(MessageCode::InvalidValue),
                        "useModMapMods must be \"LevelOne\" or \"AnyLevel\""
                    );
                    false
                }
            }
        }
        _ => {
            log_err!(
                ctx,
                Some(MessageCode::UnknownField),
                "unknown field \"{}\" in a symbol interpretation",
                field
            );
            false
        }
    }
}

fn add_interp(ctx: &Context, info: &mut CompatInfo, new: SymInterpInfo, same_file: bool) {
    if let Some(old) = info.interps.iter_mut().find(|si| {
        si.interp.sym == new.interp.sym
            && si.interp.mods.mods == new.interp.mods.mods
            && si.interp.match_op == new.interp.match_op
    }) {
        let clobber = new.merge.clobbers();
        if same_file || ctx.log_verbosity() > 9 {
            log_warn!(
                ctx,
                Some(MessageCode::DuplicateEntry),
                "multiple interpretations of \"{}\"; using {} definition",
                new.interp.sym.name(),
                if clobber { "last" } else { "first" }
            );
        }
        if clobber {
            *old = new;
        }
        return;
    }
    info.interps.push(new);
}

fn handle_interp_def(
    ctx: &Context,
    info: &mut CompatInfo,
    def: &InterpDef,
    merge: MergeMode,
) -> bool {
    let Some((match_op, mods)) = resolve_state_and_predicate(ctx, info, def.match_expr.as_ref())
    else {
        log_err!(
            ctx,
            Some(MessageCode::InvalidExpressionType),
            "couldn't determine the modifiers and predicate of an interpretation; ignored"
        );
        return false;
    };

    let mut si = SymInterpInfo {
        merge: def.merge.resolve(merge),
        interp: info.default_interp.clone(),
    };
    si.interp.sym = def.sym.unwrap_or(Keysym::NO_SYMBOL);
    si.interp.match_op = match_op;
    si.interp.mods = Mods::new(mods);

    for var in &def.body {
        let Some(name) = &var.name else {
            return false;
        };
        let Some((elem, field, _)) = expr::resolve_lhs(ctx, name) else {
            return false;
        };
        if elem.is_some() {
            log_err!(
                ctx,
                Some(MessageCode::GlobalDefaultsWrongScope),
                "cannot set defaults inside an interpretation body"
            );
            return false;
        }
        if !set_interp_field(ctx, info, &mut si.interp, &field, &var.value) {
            return false;
        }
    }

    add_interp(ctx, info, si, true);
    true
}

fn set_led_field(
    ctx: &Context,
    info: &CompatInfo,
    led: &mut Led,
    field: &str,
    value: &Expr,
) -> bool {
    match &*field.to_ascii_lowercase() {
        "modifiers" | "mods" => {
            match expr::resolve_mod_mask(ctx, &info.mods, None, value) {
                Some(mods) => {
                    led.mods = Mods::new(mods);
                    true
                }
                None => false,
            }
        }
        "groups" => match expr::resolve_mask_lookup(ctx, value, GROUP_MASK_NAMES) {
            Some(groups) => {
                led.groups = groups;
                true
            }
            None => false,
        },
        "controls" | "ctrls" => match expr::resolve_mask_lookup(ctx, value, CTRL_MASK_NAMES) {
            Some(ctrls) => {
                led.ctrls = ctrls;
                true
            }
            None => false,
        },
        "whichmodstate" | "whichmodifierstate" => {
            match expr::resolve_mask_lookup(ctx, value, MOD_COMPONENT_MASK_NAMES) {
                Some(which) => {
                    led.which_mods = StateComponent::from_bits_truncate(which);
                    true
                }
                None => false,
            }
        }
        "whichgroupstate" => {
            match expr::resolve_mask_lookup(ctx, value, GROUP_COMPONENT_MASK_NAMES) {
                Some(which) => {
                    led.which_groups = StateComponent::from_bits_truncate(which);
                    true
                }
                None => false,
            }
        }
        "allowexplicit" | "index" | "driveskbd" | "driveskeyboard" | "leddriveskbd" => {
            // Accepted for compatibility; no effect on the compiled map.
            true
        }
        _ => {
            log_err!(
                ctx,
                Some(MessageCode::UnknownField),
                "unknown field \"{}\" in an indicator map",
                field
            );
            false
        }
    }
}

fn add_led(ctx: &Context, info: &mut CompatInfo, new: LedInfo, same_file: bool) {
    if let Some(old) = info.leds.iter_mut().find(|li| li.led.name == new.led.name) {
        let clobber = new.merge.clobbers();
        if same_file || ctx.log_verbosity() > 9 {
            log_warn!(
                ctx,
                Some(MessageCode::DuplicateEntry),
                "map for indicator \"{}\" redefined; using {} definition",
                ctx.atom_text(new.led.name),
                if clobber { "last" } else { "first" }
            );
        }
        if clobber {
            *old = new;
        }
        return;
    }
    if info.leds.len() >= MAX_LEDS {
        log_err!(
            ctx,
            Some(MessageCode::InvalidValue),
            "too many indicators; map for \"{}\" ignored",
            ctx.atom_text(new.led.name)
        );
        return;
    }
    info.leds.push(new);
}

fn handle_led_map_def(
    ctx: &Context,
    info: &mut CompatInfo,
    def: &LedMapDef,
    merge: MergeMode,
) -> bool {
    let mut led = info.default_led.clone();
    led.name = def.name;

    let mut ok = true;
    for var in &def.body {
        let Some(name) = &var.name else {
            ok = false;
            continue;
        };
        let Some((elem, field, _)) = expr::resolve_lhs(ctx, name) else {
            ok = false;
            continue;
        };
        if elem.is_some() {
            ok = false;
            continue;
        }
        ok &= set_led_field(ctx, info, &mut led, &field, &var.value);
    }
    if !ok {
        return false;
    }

    add_led(
        ctx,
        info,
        LedInfo {
            merge: def.merge.resolve(merge),
            led,
        },
        true,
    );
    true
}

fn handle_global_var(ctx: &Context, info: &mut CompatInfo, def: &VarDef) -> bool {
    let Some(name) = &def.name else {
        return false;
    };
    let Some((elem, field, ndx)) = expr::resolve_lhs(ctx, name) else {
        return false;
    };
    let Some(elem) = elem else {
        log_err!(
            ctx,
            Some(MessageCode::UnknownField),
            "global field \"{}\" is unknown in a compatibility map",
            field
        );
        return false;
    };

    if elem.eq_ignore_ascii_case("interpret") {
        let mut interp = info.default_interp.clone();
        if !set_interp_field(ctx, info, &mut interp, &field, &def.value) {
            return false;
        }
        info.default_interp = interp;
        return true;
    }
    if elem.eq_ignore_ascii_case("indicator") {
        let mut led = info.default_led.clone();
        if !set_led_field(ctx, info, &mut led, &field, &def.value) {
            return false;
        }
        info.default_led = led;
        return true;
    }
    // ActionName.field = value; adjusts the action defaults.
    let mods = info.mods.clone();
    if let Some(ok) = info
        .actions
        .set_default_field(ctx, &mods, &elem, &field, ndx, &def.value)
    {
        return ok;
    }
    log_err!(
        ctx,
        Some(MessageCode::UnknownField),
        "unknown global element \"{}\" in a compatibility map",
        elem
    );
    false
}

fn merge_included(ctx: &Context, into: &mut CompatInfo, from: CompatInfo, merge: MergeMode) {
    if from.error_count > 0 {
        into.error_count += from.error_count;
        return;
    }
    into.mods = from.mods;
    if into.name.is_none() {
        into.name = from.name;
    }
    for mut si in from.interps {
        si.merge = if merge == MergeMode::Default { si.merge } else { merge };
        add_interp(ctx, into, si, false);
    }
    for mut li in from.leds {
        li.merge = if merge == MergeMode::Default { li.merge } else { merge };
        add_led(ctx, into, li, false);
    }
}

fn handle_include(
    ctx: &Context,
    info: &mut CompatInfo,
    state: &mut IncludeState,
    stmt: &IncludeStmt,
) -> Result<(), CompileError> {
    let groups = include::parse_include_stmt(ctx, &stmt.stmt, stmt.merge)?;
    let mut included = CompatInfo::new(info.mods.clone());
    included.name = Some(stmt.stmt.clone());
    for group in &groups {
        let mods = included.mods.clone();
        let next = include::with_include_frame(ctx, state, group, |state| {
            let file = include::load_include_section(ctx, group, FileType::Compat)?;
            let mut next = CompatInfo::new(mods);
            handle_compat_file(ctx, &mut next, &file, group.merge, state)?;
            Ok::<_, CompileError>(next)
        })??;
        merge_included(ctx, &mut included, next, group.merge);
    }
    merge_included(ctx, info, included, groups[0].merge);
    Ok(())
}

fn handle_compat_file(
    ctx: &Context,
    info: &mut CompatInfo,
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
            Decl::Interp(def) => handle_interp_def(ctx, info, def, merge),
            Decl::LedMap(def) => handle_led_map_def(ctx, info, def, merge),
            Decl::Var(def) => handle_global_var(ctx, info, def),
            Decl::VMod(def) => vmod::handle_vmod_def(ctx, &mut info.mods, def, merge),
            Decl::GroupCompat(def) => {
                log_vrb!(
                    ctx,
                    10,
                    None,
                    "legacy group compatibility statement for group {} ignored",
                    def.group + 1
                );
                true
            }
            _ => {
                log_err!(
                    ctx,
                    Some(MessageCode::WrongStatementType),
                    "compatibility maps may not contain this statement; ignored"
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
                "abandoning compatibility map \"{}\"",
                file.name
            );
            return Err(CompileError::TooManyErrors {
                kind: "compat",
                name: file.name.clone(),
                count: info.error_count,
            });
        }
    }
    Ok(())
}

fn copy_to_keymap(ctx: &Context, info: CompatInfo, keymap: &mut Keymap) {
    // Most specific first: more required modifiers, then a specific
    // keysym over the wildcard; declaration order breaks remaining ties.
    let mut interps: Vec<SymInterpret> = info.interps.into_iter().map(|si| si.interp).collect();
    interps.sort_by_key(|si| {
        (
            std::cmp::Reverse(si.mods.mods.count_ones()),
            std::cmp::Reverse(u32::from(si.sym != Keysym::NO_SYMBOL)),
        )
    });
    keymap.sym_interprets = interps;

    for li in info.leds {
        let mut led = li.led;
        // Definitions naming a state but not the components to watch
        // default to the effective state.
        if led.mods.mods != 0 && led.which_mods.is_empty() {
            led.which_mods = StateComponent::MODS_EFFECTIVE;
        }
        if led.groups != 0 && led.which_groups.is_empty() {
            led.which_groups = StateComponent::LAYOUT_EFFECTIVE;
        }

        if let Some(slot) = keymap
            .leds
            .iter_mut()
            .find(|l| l.as_ref().is_some_and(|l| l.name == led.name))
        {
            *slot = Some(led);
        } else if let Some(slot) = keymap.leds.iter_mut().find(|l| l.is_none()) {
            *slot = Some(led);
        } else if keymap.leds.len() < MAX_LEDS {
            keymap.leds.push(Some(led));
        } else {
            log_warn!(
                ctx,
                Some(MessageCode::InvalidValue),
                "no free slot for indicator \"{}\"; ignored",
                ctx.atom_text(led.name)
            );
        }
    }

    keymap.compat_section_name = info.name;
    keymap.mods = info.mods;
}

/// Compiles a compatibility section into the keymap.
pub fn compile_compat(
    ctx: &Context,
    file: &XkbFile,
    keymap: &mut Keymap,
    merge: MergeMode,
) -> Result<(), CompileError> {
    let mut info = CompatInfo::new(keymap.mods.clone());
    let mut state = IncludeState::new();
    handle_compat_file(ctx, &mut info, file, merge, &mut state)?;
    if info.error_count > 0 {
        return Err(CompileError::SectionFailed { kind: "compat" });
    }
    copy_to_keymap(ctx, info, keymap);
    Ok(())
}
