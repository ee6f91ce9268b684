//! Key actions.
//!
//! An action describes what a key does to the keyboard state when pressed
//! or released. The `Private` variant carries an opaque payload for
//! server-defined actions.

use crate::mods::{ModMask, Mods};

bitflags::bitflags! {
    /// Behavior flags shared by the action variants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ActionFlags: u16 {
        /// Clear matching locked modifiers on release.
        const LOCK_CLEAR = 1 << 0;
        /// Pressing the latching key twice locks instead of latching.
        const LATCH_TO_LOCK = 1 << 1;
        /// A lock action that never locks.
        const LOCK_NO_LOCK = 1 << 2;
        /// A lock action that never unlocks.
        const LOCK_NO_UNLOCK = 1 << 3;
        /// Take the modifiers from the key's modmap instead of a literal
        /// mask.
        const MODS_LOOKUP_MODMAP = 1 << 4;
        /// The group value is absolute rather than relative.
        const ABSOLUTE_SWITCH = 1 << 5;
        /// The x coordinate is absolute.
        const ABSOLUTE_X = 1 << 6;
        /// The y coordinate is absolute.
        const ABSOLUTE_Y = 1 << 7;
        /// Disable pointer acceleration.
        const NO_ACCELERATION = 1 << 8;
        /// Keep the pointer on the same screen.
        const SAME_SCREEN = 1 << 9;
    }
}

/// What a key does at one (group, level) position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    #[default]
    None,
    ModSet {
        flags: ActionFlags,
        mods: Mods,
    },
    ModLatch {
        flags: ActionFlags,
        mods: Mods,
    },
    ModLock {
        flags: ActionFlags,
        mods: Mods,
    },
    GroupSet {
        flags: ActionFlags,
        group: i32,
    },
    GroupLatch {
        flags: ActionFlags,
        group: i32,
    },
    GroupLock {
        flags: ActionFlags,
        group: i32,
    },
    PtrMove {
        flags: ActionFlags,
        x: i16,
        y: i16,
    },
    PtrButton {
        flags: ActionFlags,
        button: u8,
        count: u8,
    },
    PtrLock {
        flags: ActionFlags,
        button: u8,
    },
    PtrDefault {
        flags: ActionFlags,
        value: i8,
    },
    Terminate,
    SwitchScreen {
        flags: ActionFlags,
        screen: i8,
    },
    CtrlSet {
        flags: ActionFlags,
        ctrls: u32,
    },
    CtrlLock {
        flags: ActionFlags,
        ctrls: u32,
    },
    Private {
        ty: u8,
        data: [u8; 7],
    },
}

impl Action {
    /// Whether this action changes the modifier components.
    pub fn is_mod_action(&self) -> bool {
        matches!(
            self,
            Action::ModSet { .. } | Action::ModLatch { .. } | Action::ModLock { .. }
        )
    }

    /// Whether this action changes the layout components.
    pub fn is_group_action(&self) -> bool {
        matches!(
            self,
            Action::GroupSet { .. } | Action::GroupLatch { .. } | Action::GroupLock { .. }
        )
    }

    /// The declared modifier mask of a modifier action.
    pub fn mods(&self) -> Option<Mods> {
        match self {
            Action::ModSet { mods, .. }
            | Action::ModLatch { mods, .. }
            | Action::ModLock { mods, .. } => Some(*mods),
            _ => None,
        }
    }

    /// Mutable access to the mask of a modifier action, for mask
    /// resolution during finalization.
    pub fn mods_mut(&mut self) -> Option<&mut Mods> {
        match self {
            Action::ModSet { mods, .. }
            | Action::ModLatch { mods, .. }
            | Action::ModLock { mods, .. } => Some(mods),
            _ => None,
        }
    }

    /// Whether a pending modifier or group latch is broken by this
    /// action occurring on another key.
    pub fn breaks_latch(&self) -> bool {
        matches!(
            self,
            Action::None
                | Action::PtrButton { .. }
                | Action::PtrLock { .. }
                | Action::CtrlSet { .. }
                | Action::CtrlLock { .. }
                | Action::SwitchScreen { .. }
                | Action::Terminate
        )
    }
}

/// Replaces a modifier action's literal mask with the key's modmap when
/// the lookup flag is set.
pub fn apply_modmap_lookup(action: &mut Action, modmap: ModMask) {
    if let Action::ModSet { flags, mods }
    | Action::ModLatch { flags, mods }
    | Action::ModLock { flags, mods } = action
    {
        if flags.contains(ActionFlags::MODS_LOOKUP_MODMAP) {
            *mods = Mods::real(modmap);
        }
    }
}
