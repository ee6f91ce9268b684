//! Resolution of action declarations.
//!
//! Turns `SetMods(modifiers=Shift,clearLocks)`-style declarations into
//! [`Action`] values. Each compiler keeps an [`ActionsInfo`] so that
//! statements like `latchMods.latchToLock= True;` adjust the defaults
//! used by subsequent declarations in the same section.

use std::collections::HashMap;

use xkb_core::action::{Action, ActionFlags};
use xkb_core::message::MessageCode;
use xkb_core::mods::{ModSet, Mods};
use xkb_core::{log_err, log_warn, Context};

use crate::ast::{ActionDecl, BinOp, Expr, UnOp};
use crate::expr;
use crate::text::CTRL_MASK_NAMES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ActionKind {
    None,
    ModSet,
    ModLatch,
    ModLock,
    GroupSet,
    GroupLatch,
    GroupLock,
    PtrMove,
    PtrButton,
    PtrLock,
    PtrDefault,
    Terminate,
    SwitchScreen,
    CtrlSet,
    CtrlLock,
    Private,
}

fn kind_from_name(name: &str) -> Option<ActionKind> {
    Some(match &*name.to_ascii_lowercase() {
        "noaction" | "none" => ActionKind::None,
        "setmods" => ActionKind::ModSet,
        "latchmods" => ActionKind::ModLatch,
        "lockmods" => ActionKind::ModLock,
        "setgroup" => ActionKind::GroupSet,
        "latchgroup" => ActionKind::GroupLatch,
        "lockgroup" => ActionKind::GroupLock,
        "moveptr" | "movepointer" => ActionKind::PtrMove,
        "ptrbtn" | "pointerbutton" => ActionKind::PtrButton,
        "lockptrbtn" | "lockpointerbutton" | "lockptrbutton" | "lockpointerbtn" => {
            ActionKind::PtrLock
        }
        "setptrdflt" | "setpointerdefault" => ActionKind::PtrDefault,
        "terminate" | "terminateserver" => ActionKind::Terminate,
        "switchscreen" => ActionKind::SwitchScreen,
        "setcontrols" => ActionKind::CtrlSet,
        "lockcontrols" => ActionKind::CtrlLock,
        "private" => ActionKind::Private,
        _ => return None,
    })
}

fn is_legacy_action(name: &str) -> bool {
    matches!(
        &*name.to_ascii_lowercase(),
        "redirectkey"
            | "redirect"
            | "isolock"
            | "devbtn"
            | "devicebtn"
            | "lockdevbtn"
            | "lockdevicebtn"
            | "devval"
            | "deviceval"
            | "devicevaluator"
            | "messageaction"
            | "message"
            | "actionmessage"
    )
}

fn template(kind: ActionKind) -> Action {
    let flags = ActionFlags::empty();
    match kind {
        ActionKind::None => Action::None,
        ActionKind::ModSet => Action::ModSet {
            flags,
            mods: Mods::default(),
        },
        ActionKind::ModLatch => Action::ModLatch {
            flags,
            mods: Mods::default(),
        },
        ActionKind::ModLock => Action::ModLock {
            flags,
            mods: Mods::default(),
        },
        ActionKind::GroupSet => Action::GroupSet { flags, group: 0 },
        ActionKind::GroupLatch => Action::GroupLatch { flags, group: 0 },
        ActionKind::GroupLock => Action::GroupLock { flags, group: 0 },
        ActionKind::PtrMove => Action::PtrMove { flags, x: 0, y: 0 },
        ActionKind::PtrButton => Action::PtrButton {
            flags,
            button: 0,
            count: 1,
        },
        ActionKind::PtrLock => Action::PtrLock { flags, button: 0 },
        ActionKind::PtrDefault => Action::PtrDefault { flags, value: 1 },
        ActionKind::Terminate => Action::Terminate,
        ActionKind::SwitchScreen => Action::SwitchScreen { flags, screen: 0 },
        ActionKind::CtrlSet => Action::CtrlSet { flags, ctrls: 0 },
        ActionKind::CtrlLock => Action::CtrlLock { flags, ctrls: 0 },
        ActionKind::Private => Action::Private {
            ty: 0,
            data: [0; 7],
        },
    }
}

/// Per-section action defaults plus declaration resolution.
pub struct ActionsInfo {
    defaults: HashMap<ActionKind, Action>,
}

impl ActionsInfo {
    pub fn new() -> Self {
        Self {
            defaults: HashMap::new(),
        }
    }

    fn default_for(&self, kind: ActionKind) -> Action {
        self.defaults.get(&kind).copied().unwrap_or_else(|| template(kind))
    }

    /// Resolves an action declaration; `None` counts as an error for the
    /// caller.
    pub fn handle_action_def(
        &self,
        ctx: &Context,
        mods: &ModSet,
        decl: &ActionDecl,
    ) -> Option<Action> {
        let name = ctx.atom_text(decl.name);
        let Some(kind) = kind_from_name(&name) else {
            if is_legacy_action(&name) {
                log_warn!(
                    ctx,
                    Some(MessageCode::UnsupportedLegacyAction),
                    "legacy action \"{}\" is not supported; treated as NoAction",
                    name
                );
                return Some(Action::None);
            }
            log_err!(
                ctx,
                Some(MessageCode::UnknownActionType),
                "unknown action \"{}\"",
                name
            );
            return None;
        };

        let mut action = self.default_for(kind);
        for arg in &decl.args {
            let (field, index, value) = split_arg(arg);
            let Some((field, index)) = field_of(ctx, field, index) else {
                log_err!(
                    ctx,
                    Some(MessageCode::WrongFieldType),
                    "invalid argument in action \"{}\"",
                    name
                );
                return None;
            };
            if !apply_field(ctx, mods, &mut action, &field, index, value) {
                return None;
            }
        }
        Some(action)
    }

    /// Applies a `ActionName.field = value;` default statement. Returns
    /// false when the element is not an action name.
    pub fn set_default_field(
        &mut self,
        ctx: &Context,
        mods: &ModSet,
        element: &str,
        field: &str,
        index: Option<&Expr>,
        value: &Expr,
    ) -> Option<bool> {
        let kind = kind_from_name(element)?;
        let mut action = self.default_for(kind);
        let ok = apply_field(ctx, mods, &mut action, field, index, value);
        if ok {
            self.defaults.insert(kind, action);
        }
        Some(ok)
    }
}

impl Default for ActionsInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits an action argument into (field expr, index, value).
fn split_arg(arg: &Expr) -> (&Expr, Option<&Expr>, &Expr) {
    match arg {
        Expr::Binary {
            op: BinOp::Assign,
            left,
            right,
        } => (left, None, right),
        Expr::Unary {
            op: UnOp::Not,
            expr,
        } => (expr, None, &FALSE),
        other => (other, None, &TRUE),
    }
}

static TRUE: Expr = Expr::Boolean(true);
static FALSE: Expr = Expr::Boolean(false);

fn field_of<'e>(
    ctx: &Context,
    field: &'e Expr,
    index: Option<&'e Expr>,
) -> Option<(String, Option<&'e Expr>)> {
    match field {
        Expr::Ident(atom) => Some((ctx.atom_text(*atom).to_ascii_lowercase(), index)),
        Expr::ArrayRef {
            element: None,
            field,
            entry,
        } => Some((ctx.atom_text(*field).to_ascii_lowercase(), Some(entry))),
        _ => None,
    }
}

/// `affect=` values for lock-style actions.
const AFFECT_NAMES: &[(&str, ActionFlags)] = &[
    ("lock", ActionFlags::LOCK_NO_UNLOCK),
    ("unlock", ActionFlags::LOCK_NO_LOCK),
    ("both", ActionFlags::empty()),
    ("neither", ActionFlags::LOCK_NO_LOCK.union(ActionFlags::LOCK_NO_UNLOCK)),
];

fn apply_affect(ctx: &Context, flags: &mut ActionFlags, value: &Expr) -> bool {
    match expr::resolve_enum(ctx, value, AFFECT_NAMES) {
        Some(affect) => {
            flags.remove(ActionFlags::LOCK_NO_LOCK | ActionFlags::LOCK_NO_UNLOCK);
            *flags |= affect;
            true
        }
        None => {
            log_err!(
                ctx,
                Some(MessageCode::InvalidValue),
                "affect field must be one of lock, unlock, both, neither"
            );
            false
        }
    }
}

fn apply_flag(
    ctx: &Context,
    flags: &mut ActionFlags,
    flag: ActionFlags,
    value: &Expr,
) -> bool {
    match expr::resolve_boolean(ctx, value) {
        Some(set) => {
            flags.set(flag, set);
            true
        }
        None => {
            log_err!(
                ctx,
                Some(MessageCode::WrongFieldType),
                "action flag field must be a boolean"
            );
            false
        }
    }
}

/// Signed coordinate/offset fields keep their relative flavor when the
/// value is written with an explicit sign.
fn is_signed(value: &Expr) -> bool {
    matches!(
        value,
        Expr::Unary {
            op: UnOp::Negate | UnOp::UnaryPlus,
            ..
        }
    )
}

fn apply_field(
    ctx: &Context,
    mods: &ModSet,
    action: &mut Action,
    field: &str,
    index: Option<&Expr>,
    value: &Expr,
) -> bool {
    match action {
        Action::ModSet { flags, mods: amods }
        | Action::ModLatch { flags, mods: amods }
        | Action::ModLock { flags, mods: amods } => match field {
            "modifiers" | "mods" => {
                if let Expr::Ident(atom) = value {
                    let text = ctx.atom_text(*atom).to_ascii_lowercase();
                    if text == "usemodmapmods" || text == "modmapmods" {
                        flags.insert(ActionFlags::MODS_LOOKUP_MODMAP);
                        return true;
                    }
                }
                match expr::resolve_mod_mask(ctx, mods, None, value) {
                    Some(mask) => {
                        flags.remove(ActionFlags::MODS_LOOKUP_MODMAP);
                        *amods = Mods::new(mask);
                        true
                    }
                    None => false,
                }
            }
            "clearlocks" => apply_flag(ctx, flags, ActionFlags::LOCK_CLEAR, value),
            "latchtolock" => apply_flag(ctx, flags, ActionFlags::LATCH_TO_LOCK, value),
            "affect" => apply_affect(ctx, flags, value),
            _ => unknown_field(ctx, "modifier action", field),
        },

        Action::GroupSet { flags, group }
        | Action::GroupLatch { flags, group }
        | Action::GroupLock { flags, group } => match field {
            "group" => {
                if is_signed(value) {
                    flags.remove(ActionFlags::ABSOLUTE_SWITCH);
                    match expr::resolve_integer(ctx, value) {
                        Some(v) => {
                            *group = v as i32;
                            true
                        }
                        None => false,
                    }
                } else {
                    flags.insert(ActionFlags::ABSOLUTE_SWITCH);
                    match expr::resolve_group(ctx, value) {
                        Some(v) => {
                            *group = v as i32;
                            true
                        }
                        None => false,
                    }
                }
            }
            "clearlocks" => apply_flag(ctx, flags, ActionFlags::LOCK_CLEAR, value),
            "latchtolock" => apply_flag(ctx, flags, ActionFlags::LATCH_TO_LOCK, value),
            _ => unknown_field(ctx, "group action", field),
        },

        Action::PtrMove { flags, x, y } => match field {
            "x" | "y" => {
                let absolute = !is_signed(value);
                let Some(v) = expr::resolve_integer(ctx, value) else {
                    return false;
                };
                if field == "x" {
                    flags.set(ActionFlags::ABSOLUTE_X, absolute);
                    *x = v as i16;
                } else {
                    flags.set(ActionFlags::ABSOLUTE_Y, absolute);
                    *y = v as i16;
                }
                true
            }
            "accel" | "accelerate" | "repeat" => {
                match expr::resolve_boolean(ctx, value) {
                    Some(accel) => {
                        flags.set(ActionFlags::NO_ACCELERATION, !accel);
                        true
                    }
                    None => false,
                }
            }
            _ => unknown_field(ctx, "pointer motion action", field),
        },

        Action::PtrButton { flags, button, count } => match field {
            "button" => match expr::resolve_button(ctx, value) {
                Some(v) if (0..=5).contains(&v) => {
                    *button = v as u8;
                    true
                }
                _ => invalid_value(ctx, "button must be in the range 0..5"),
            },
            "count" => match expr::resolve_integer(ctx, value) {
                Some(v) if (0..=255).contains(&v) => {
                    *count = v as u8;
                    true
                }
                _ => invalid_value(ctx, "count must be in the range 0..255"),
            },
            "affect" => {
                let mut f = *flags;
                let ok = apply_affect(ctx, &mut f, value);
                *flags = f;
                ok
            }
            _ => unknown_field(ctx, "pointer button action", field),
        },

        Action::PtrLock { flags, button } => match field {
            "button" => match expr::resolve_button(ctx, value) {
                Some(v) if (0..=5).contains(&v) => {
                    *button = v as u8;
                    true
                }
                _ => invalid_value(ctx, "button must be in the range 0..5"),
            },
            "affect" => apply_affect(ctx, flags, value),
            _ => unknown_field(ctx, "pointer lock action", field),
        },

        Action::PtrDefault { flags, value: dflt } => match field {
            "affect" => {
                if let Expr::Ident(atom) = value {
                    let text = ctx.atom_text(*atom).to_ascii_lowercase();
                    if text == "button" || text == "defaultbutton" {
                        return true;
                    }
                }
                invalid_value(ctx, "affect field of SetPtrDflt must be \"button\"")
            }
            "button" | "value" => {
                let absolute = !is_signed(value);
                let Some(v) = expr::resolve_integer(ctx, value) else {
                    return false;
                };
                flags.set(ActionFlags::ABSOLUTE_SWITCH, absolute);
                *dflt = v as i8;
                true
            }
            _ => unknown_field(ctx, "pointer default action", field),
        },

        Action::SwitchScreen { flags, screen } => match field {
            "screen" => {
                let absolute = !is_signed(value);
                let Some(v) = expr::resolve_integer(ctx, value) else {
                    return false;
                };
                flags.set(ActionFlags::ABSOLUTE_SWITCH, absolute);
                *screen = v as i8;
                true
            }
            "same" | "sameserver" => apply_flag(ctx, flags, ActionFlags::SAME_SCREEN, value),
            _ => unknown_field(ctx, "screen switch action", field),
        },

        Action::CtrlSet { flags, ctrls } | Action::CtrlLock { flags, ctrls } => match field {
            "controls" | "ctrls" => {
                match expr::resolve_mask_lookup(ctx, value, CTRL_MASK_NAMES) {
                    Some(mask) => {
                        *ctrls = mask;
                        true
                    }
                    None => invalid_value(ctx, "controls field must be a controls mask"),
                }
            }
            "affect" => apply_affect(ctx, flags, value),
            _ => unknown_field(ctx, "controls action", field),
        },

        Action::Private { ty, data } => match field {
            "type" => match expr::resolve_integer(ctx, value) {
                Some(v) if (0..=255).contains(&v) => {
                    *ty = v as u8;
                    true
                }
                _ => invalid_value(ctx, "private action type must be in the range 0..255"),
            },
            "data" => match index {
                None => {
                    let Some(atom) = expr::resolve_string(ctx, value) else {
                        return invalid_value(ctx, "private action data must be a string");
                    };
                    let text = ctx.atom_text(atom);
                    let bytes = text.as_bytes();
                    if bytes.len() > data.len() {
                        return invalid_value(ctx, "private action data is at most 7 bytes");
                    }
                    data.fill(0);
                    data[..bytes.len()].copy_from_slice(bytes);
                    true
                }
                Some(ndx) => {
                    let Some(i) = expr::resolve_integer(ctx, ndx) else {
                        return false;
                    };
                    if !(0..7).contains(&i) {
                        return invalid_value(ctx, "private action data index must be in 0..7");
                    }
                    match expr::resolve_integer(ctx, value) {
                        Some(v) if (0..=255).contains(&v) => {
                            data[i as usize] = v as u8;
                            true
                        }
                        _ => invalid_value(ctx, "private action data bytes must be in 0..255"),
                    }
                }
            },
            _ => unknown_field(ctx, "private action", field),
        },

        Action::None | Action::Terminate => {
            // No fields to set.
            unknown_field(ctx, "action", field)
        }
    }
}

fn unknown_field(ctx: &Context, what: &str, field: &str) -> bool {
    log_err!(
        ctx,
        Some(MessageCode::UnknownField),
        "field \"{}\" is unknown for a {}",
        field,
        what
    );
    false
}

fn invalid_value(ctx: &Context, message: &str) -> bool {
    log_err!(ctx, Some(MessageCode::InvalidValue), "{}", message);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use xkb_core::{ContextFlags, Keymap};

    fn parse_actions(ctx: &Context, text: &str) -> Vec<ActionDecl> {
        let src = format!("xkb_symbols {{ key <A> {{ actions[Group1]= {text} }}; }};");
        let mut files = parser::parse_string(ctx, src.as_bytes(), "(test)").unwrap();
        let file = files.remove(0);
        let crate::ast::Decl::Symbols(sym) = file.defs.into_iter().next().unwrap() else {
            panic!("expected symbols")
        };
        let Expr::ActionList(actions) = sym.body.into_iter().next().unwrap().value else {
            panic!("expected action list")
        };
        actions
    }

    fn setup() -> (Context, ModSet) {
        let ctx =
            Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES);
        let mods = Keymap::new(ctx.clone()).mods;
        (ctx, mods)
    }

    #[test]
    fn test_set_mods_with_flags() {
        let (ctx, mods) = setup();
        let info = ActionsInfo::new();
        let decls = parse_actions(&ctx, "[ SetMods(modifiers=Shift+Lock,clearLocks) ]");
        let action = info.handle_action_def(&ctx, &mods, &decls[0]).unwrap();
        let Action::ModSet { flags, mods } = action else {
            panic!("expected ModSet")
        };
        assert!(flags.contains(ActionFlags::LOCK_CLEAR));
        assert_eq!(mods.mods, 0b11);
    }

    #[test]
    fn test_modmap_lookup_mods() {
        let (ctx, mods) = setup();
        let info = ActionsInfo::new();
        let decls = parse_actions(&ctx, "[ SetMods(modifiers=modMapMods) ]");
        let Action::ModSet { flags, .. } = info.handle_action_def(&ctx, &mods, &decls[0]).unwrap()
        else {
            panic!("expected ModSet")
        };
        assert!(flags.contains(ActionFlags::MODS_LOOKUP_MODMAP));
    }

    #[test]
    fn test_group_relative_and_absolute() {
        let (ctx, mods) = setup();
        let info = ActionsInfo::new();
        let decls = parse_actions(&ctx, "[ SetGroup(group=+1), LockGroup(group=2) ]");
        let Action::GroupSet { flags, group } =
            info.handle_action_def(&ctx, &mods, &decls[0]).unwrap()
        else {
            panic!("expected GroupSet")
        };
        assert!(!flags.contains(ActionFlags::ABSOLUTE_SWITCH));
        assert_eq!(group, 1);
        let Action::GroupLock { flags, group } =
            info.handle_action_def(&ctx, &mods, &decls[1]).unwrap()
        else {
            panic!("expected GroupLock")
        };
        assert!(flags.contains(ActionFlags::ABSOLUTE_SWITCH));
        assert_eq!(group, 1, "absolute groups are zero-based internally");
    }

    #[test]
    fn test_defaults_adjusted_by_statement() {
        let (ctx, mods) = setup();
        let mut info = ActionsInfo::new();
        let value = Expr::Boolean(true);
        assert_eq!(
            info.set_default_field(&ctx, &mods, "latchmods", "latchtolock", None, &value),
            Some(true)
        );
        let decls = parse_actions(&ctx, "[ LatchMods(modifiers=Shift) ]");
        let Action::ModLatch { flags, .. } =
            info.handle_action_def(&ctx, &mods, &decls[0]).unwrap()
        else {
            panic!("expected ModLatch")
        };
        assert!(flags.contains(ActionFlags::LATCH_TO_LOCK));
    }

    #[test]
    fn test_unknown_action_fails() {
        let (ctx, mods) = setup();
        let info = ActionsInfo::new();
        let decls = parse_actions(&ctx, "[ FlyToTheMoon() ]");
        assert!(info.handle_action_def(&ctx, &mods, &decls[0]).is_none());
    }

    #[test]
    fn test_legacy_action_is_noop() {
        let (ctx, mods) = setup();
        let info = ActionsInfo::new();
        let decls = parse_actions(&ctx, "[ RedirectKey() ]");
        assert_eq!(
            info.handle_action_def(&ctx, &mods, &decls[0]),
            Some(Action::None)
        );
    }

    #[test]
    fn test_private_action_data() {
        let (ctx, mods) = setup();
        let info = ActionsInfo::new();
        let decls = parse_actions(&ctx, r#"[ Private(type=0x42,data="abc") ]"#);
        let Action::Private { ty, data } = info.handle_action_def(&ctx, &mods, &decls[0]).unwrap()
        else {
            panic!("expected Private")
        };
        assert_eq!(ty, 0x42);
        assert_eq!(&data[..3], b"abc");
        assert_eq!(data[3..], [0; 4]);
    }

    #[test]
    fn test_terminate() {
        let (ctx, mods) = setup();
        let info = ActionsInfo::new();
        let decls = parse_actions(&ctx, "[ Terminate() ]");
        assert_eq!(
            info.handle_action_def(&ctx, &mods, &decls[0]),
            Some(Action::Terminate)
        );
    }
}
