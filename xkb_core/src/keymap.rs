//! The compiled keymap data model.
//!
//! A [`Keymap`] is immutable once compilation has finished; the runtime
//! only reads it. Keys reference key types by index into the keymap's
//! type table, so the model contains no cycles.

use std::rc::Rc;

use crate::action::Action;
use crate::atom::{Atom, ATOM_NONE};
use crate::context::Context;
use crate::keysym::Keysym;
use crate::mods::{ModIndex, ModMask, ModSet, Mods, MOD_INVALID};

pub type Keycode = u32;
pub type LayoutIndex = u32;
pub type LevelIndex = u32;
pub type LedIndex = u32;

/// Reserved invalid keycode.
pub const KEYCODE_INVALID: Keycode = 0xffff_ffff;
/// Largest legal keycode.
pub const KEYCODE_MAX: Keycode = 0xffff_fffe;

pub const LAYOUT_INVALID: LayoutIndex = 0xffff_ffff;
pub const LEVEL_INVALID: LevelIndex = 0xffff_ffff;
pub const LED_INVALID: LedIndex = 0xffff_ffff;

/// At most four layouts per key.
pub const MAX_GROUPS: usize = 4;
/// At most 32 indicators.
pub const MAX_LEDS: usize = 32;

bitflags::bitflags! {
    /// State components, used to address the modifier/layout triples and
    /// to describe which state bits drive an indicator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StateComponent: u32 {
        const MODS_DEPRESSED = 1 << 0;
        const MODS_LATCHED = 1 << 1;
        const MODS_LOCKED = 1 << 2;
        const MODS_EFFECTIVE = 1 << 3;
        const LAYOUT_DEPRESSED = 1 << 4;
        const LAYOUT_LATCHED = 1 << 5;
        const LAYOUT_LOCKED = 1 << 6;
        const LAYOUT_EFFECTIVE = 1 << 7;
        const LEDS = 1 << 8;
    }
}

/// One row of a key type's modifier-to-level table.
#[derive(Debug, Clone, Default)]
pub struct KeyTypeEntry {
    pub level: LevelIndex,
    pub mods: Mods,
    /// Modifiers that participate in level selection but are not
    /// consumed.
    pub preserve: Mods,
}

/// Maps active modifiers to shift levels.
#[derive(Debug, Clone)]
pub struct KeyType {
    pub name: Atom,
    pub mods: Mods,
    pub num_levels: LevelIndex,
    pub entries: Vec<KeyTypeEntry>,
    pub level_names: Vec<Atom>,
}

impl KeyType {
    /// The entry selected by `active_mods` (already masked by
    /// `self.mods.mask`), or `None` for the implicit level-0 mapping.
    pub fn entry_for_mods(&self, active_mods: ModMask) -> Option<&KeyTypeEntry> {
        self.entries.iter().find(|entry| {
            // Entries whose declared mods failed to resolve to anything
            // are dormant.
            !(entry.mods.mods != 0 && entry.mods.mask == 0) && entry.mods.mask == active_mods
        })
    }

    /// The shift level selected by `active_mods`.
    pub fn level_for_mods(&self, active_mods: ModMask) -> LevelIndex {
        self.entry_for_mods(active_mods).map_or(0, |e| e.level)
    }
}

/// The symbols and actions a key produces at one shift level.
#[derive(Debug, Clone, Default)]
pub struct Level {
    pub syms: Vec<Keysym>,
    pub actions: Vec<Action>,
}

impl Level {
    /// The single action of this level, if any.
    pub fn action(&self) -> Action {
        self.actions.first().copied().unwrap_or(Action::None)
    }
}

/// One layout of a key.
#[derive(Debug, Clone)]
pub struct Group {
    /// Index into [`Keymap::types`].
    pub key_type: usize,
    /// Whether the type was assigned explicitly in the source.
    pub explicit_type: bool,
    pub levels: Vec<Level>,
}

bitflags::bitflags! {
    /// Per-key fields that were given explicitly and must not be
    /// overwritten by compat interpretations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExplicitComponents: u8 {
        const INTERP = 1 << 0;
        const VMODMAP = 1 << 1;
        const REPEAT = 1 << 2;
    }
}

/// Policy for layout indices beyond a key's group count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangeExceedType {
    #[default]
    Wrap,
    Saturate,
    Redirect,
}

#[derive(Debug, Clone, Default)]
pub struct Key {
    pub keycode: Keycode,
    pub name: Atom,
    pub explicit: ExplicitComponents,
    /// Real modifiers bound to this key through the modmap.
    pub modmap: ModMask,
    /// Virtual modifier bits claimed by this key.
    pub vmodmap: ModMask,
    pub repeats: bool,
    pub out_of_range_group_action: RangeExceedType,
    pub out_of_range_group_number: LayoutIndex,
    pub groups: Vec<Group>,
}

impl Key {
    pub fn num_groups(&self) -> LayoutIndex {
        self.groups.len() as LayoutIndex
    }
}

/// A key name alias.
#[derive(Debug, Clone)]
pub struct KeyAlias {
    pub alias: Atom,
    pub real: Atom,
}

/// How an interpretation's modifiers must relate to a key's modmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchOperation {
    NoneOf,
    #[default]
    AnyOfOrNone,
    AnyOf,
    AllOf,
    Exactly,
}

impl MatchOperation {
    pub fn matches(self, wanted: ModMask, present: ModMask) -> bool {
        match self {
            MatchOperation::NoneOf => wanted & present == 0,
            MatchOperation::AnyOfOrNone => present == 0 || wanted & present != 0,
            MatchOperation::AnyOf => wanted & present != 0,
            MatchOperation::AllOf => wanted & present == wanted,
            MatchOperation::Exactly => wanted == present,
        }
    }
}

/// A compat rule assigning a default action to keys producing a keysym.
#[derive(Debug, Clone)]
pub struct SymInterpret {
    /// [`Keysym::NO_SYMBOL`] matches any keysym.
    pub sym: Keysym,
    pub match_op: MatchOperation,
    pub mods: Mods,
    /// Virtual modifier claimed by matching keys; [`MOD_INVALID`] if
    /// none.
    pub virtual_mod: ModIndex,
    pub action: Action,
    pub level_one_only: bool,
    pub repeat: bool,
}

impl Default for SymInterpret {
    fn default() -> Self {
        Self {
            sym: Keysym::NO_SYMBOL,
            match_op: MatchOperation::AnyOfOrNone,
            mods: Mods::default(),
            virtual_mod: MOD_INVALID,
            action: Action::None,
            level_one_only: false,
            repeat: false,
        }
    }
}

/// An indicator definition: which state bits turn the LED on.
#[derive(Debug, Clone, Default)]
pub struct Led {
    pub name: Atom,
    pub which_groups: StateComponent,
    /// Mask of layout indices.
    pub groups: u32,
    pub which_mods: StateComponent,
    pub mods: Mods,
    pub ctrls: u32,
}

/// A compiled keyboard description.
///
/// Immutable after construction; shared with [`State`](crate::State)
/// through `Rc`.
#[derive(Debug)]
pub struct Keymap {
    ctx: Context,
    pub mods: ModSet,
    pub types: Vec<KeyType>,
    pub sym_interprets: Vec<SymInterpret>,
    pub min_key_code: Keycode,
    pub max_key_code: Keycode,
    /// Dense key array indexed by `keycode - min_key_code`; gaps carry
    /// [`ATOM_NONE`] names.
    pub keys: Vec<Key>,
    pub key_aliases: Vec<KeyAlias>,
    pub num_groups: LayoutIndex,
    pub group_names: Vec<Atom>,
    pub leds: Vec<Option<Led>>,
    pub keycodes_section_name: Option<String>,
    pub types_section_name: Option<String>,
    pub compat_section_name: Option<String>,
    pub symbols_section_name: Option<String>,
}

impl Keymap {
    pub fn new(ctx: Context) -> Self {
        let mods = ModSet::new_with_real_mods(&ctx);
        Self {
            ctx,
            mods,
            types: Vec::new(),
            sym_interprets: Vec::new(),
            min_key_code: 8,
            max_key_code: 255,
            keys: Vec::new(),
            key_aliases: Vec::new(),
            num_groups: 0,
            group_names: Vec::new(),
            leds: Vec::new(),
            keycodes_section_name: None,
            types_section_name: None,
            compat_section_name: None,
            symbols_section_name: None,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The key at `kc`, if the keymap defines one.
    pub fn key(&self, kc: Keycode) -> Option<&Key> {
        if kc < self.min_key_code || kc > self.max_key_code {
            return None;
        }
        let key = self.keys.get((kc - self.min_key_code) as usize)?;
        (key.name != ATOM_NONE).then_some(key)
    }

    pub fn key_mut(&mut self, kc: Keycode) -> Option<&mut Key> {
        if kc < self.min_key_code || kc > self.max_key_code {
            return None;
        }
        let key = self.keys.get_mut((kc - self.min_key_code) as usize)?;
        (key.name != ATOM_NONE).then_some(key)
    }

    /// All defined keys.
    pub fn iter_keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter().filter(|k| k.name != ATOM_NONE)
    }

    pub fn min_keycode(&self) -> Keycode {
        self.min_key_code
    }

    pub fn max_keycode(&self) -> Keycode {
        self.max_key_code
    }

    /* Modifiers. */

    pub fn num_mods(&self) -> usize {
        self.mods.num_mods()
    }

    pub fn mod_get_name(&self, idx: ModIndex) -> Option<Rc<str>> {
        let atom = self.mods.mod_name(idx)?;
        Some(self.ctx.atom_text(atom))
    }

    pub fn mod_get_index(&self, name: &str) -> Option<ModIndex> {
        let atom = self.ctx.atom_lookup(name);
        if atom == ATOM_NONE {
            return None;
        }
        self.mods.mod_index(atom, None)
    }

    /* Layouts. */

    pub fn num_layouts(&self) -> LayoutIndex {
        self.num_groups
    }

    pub fn layout_get_name(&self, layout: LayoutIndex) -> Option<Rc<str>> {
        let atom = *self.group_names.get(layout as usize)?;
        (atom != ATOM_NONE).then(|| self.ctx.atom_text(atom))
    }

    pub fn layout_get_index(&self, name: &str) -> Option<LayoutIndex> {
        let atom = self.ctx.atom_lookup(name);
        if atom == ATOM_NONE {
            return None;
        }
        self.group_names
            .iter()
            .position(|&n| n == atom)
            .map(|i| i as LayoutIndex)
    }

    /* Indicators. */

    pub fn num_leds(&self) -> usize {
        self.leds.len()
    }

    pub fn led_get_name(&self, idx: LedIndex) -> Option<Rc<str>> {
        let led = self.leds.get(idx as usize)?.as_ref()?;
        Some(self.ctx.atom_text(led.name))
    }

    pub fn led_get_index(&self, name: &str) -> Option<LedIndex> {
        let atom = self.ctx.atom_lookup(name);
        if atom == ATOM_NONE {
            return None;
        }
        self.leds
            .iter()
            .position(|led| led.as_ref().is_some_and(|l| l.name == atom))
            .map(|i| i as LedIndex)
    }

    /* Keys. */

    pub fn key_get_name(&self, kc: Keycode) -> Option<Rc<str>> {
        self.key(kc).map(|k| self.ctx.atom_text(k.name))
    }

    /// Finds a key by name, resolving aliases.
    pub fn key_by_name(&self, name: &str) -> Option<Keycode> {
        let mut atom = self.ctx.atom_lookup(name);
        if atom == ATOM_NONE {
            return None;
        }
        if let Some(alias) = self.key_aliases.iter().find(|a| a.alias == atom) {
            atom = alias.real;
        }
        self.iter_keys().find(|k| k.name == atom).map(|k| k.keycode)
    }

    pub fn num_layouts_for_key(&self, kc: Keycode) -> LayoutIndex {
        self.key(kc).map_or(0, Key::num_groups)
    }

    pub fn num_levels_for_key(&self, kc: Keycode, layout: LayoutIndex) -> LevelIndex {
        self.key(kc)
            .and_then(|k| k.groups.get(layout as usize))
            .map_or(0, |g| g.levels.len() as LevelIndex)
    }

    /// The keysyms produced at an explicit (layout, level) position.
    pub fn key_get_syms_by_level(
        &self,
        kc: Keycode,
        layout: LayoutIndex,
        level: LevelIndex,
    ) -> &[Keysym] {
        self.key(kc)
            .and_then(|k| k.groups.get(layout as usize))
            .and_then(|g| g.levels.get(level as usize))
            .map_or(&[], |l| l.syms.as_slice())
    }

    pub fn key_repeats(&self, kc: Keycode) -> bool {
        self.key(kc).is_some_and(|k| k.repeats)
    }

    /// The key type governing `key`'s `layout`.
    pub fn key_type(&self, key: &Key, layout: LayoutIndex) -> Option<&KeyType> {
        let group = key.groups.get(layout as usize)?;
        self.types.get(group.key_type)
    }
}

/// Brings a layout index into a key's legal range, honoring the key's
/// out-of-range policy.
pub fn wrap_group_into_range(
    group: i32,
    num_groups: LayoutIndex,
    wrap: RangeExceedType,
    redirect: LayoutIndex,
) -> LayoutIndex {
    if num_groups == 0 {
        return LAYOUT_INVALID;
    }
    if (0..num_groups as i32).contains(&group) {
        return group as LayoutIndex;
    }
    match wrap {
        RangeExceedType::Redirect => {
            if redirect >= num_groups {
                0
            } else {
                redirect
            }
        }
        RangeExceedType::Saturate => {
            if group < 0 {
                0
            } else {
                num_groups - 1
            }
        }
        RangeExceedType::Wrap => {
            let n = num_groups as i32;
            // Modulus with the sign of the divisor.
            (((group % n) + n) % n) as LayoutIndex
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextFlags;

    fn ctx() -> Context {
        Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES)
    }

    fn simple_keymap() -> Keymap {
        let ctx = ctx();
        let mut keymap = Keymap::new(ctx.clone());
        keymap.min_key_code = 8;
        keymap.max_key_code = 12;
        keymap.types.push(KeyType {
            name: ctx.atom_intern("TWO_LEVEL"),
            mods: Mods::real(1),
            num_levels: 2,
            entries: vec![KeyTypeEntry {
                level: 1,
                mods: Mods::real(1),
                preserve: Mods::default(),
            }],
            level_names: vec![ctx.atom_intern("Base"), ctx.atom_intern("Shift")],
        });
        keymap.keys = (8..=12)
            .map(|kc| Key {
                keycode: kc,
                ..Key::default()
            })
            .collect();
        let key = &mut keymap.keys[2];
        key.name = ctx.atom_intern("AD01");
        key.groups.push(Group {
            key_type: 0,
            explicit_type: false,
            levels: vec![
                Level {
                    syms: vec![Keysym::from_name("q").unwrap()],
                    actions: vec![],
                },
                Level {
                    syms: vec![Keysym::from_name("Q").unwrap()],
                    actions: vec![],
                },
            ],
        });
        keymap.num_groups = 1;
        keymap.key_aliases.push(KeyAlias {
            alias: ctx.atom_intern("LatQ"),
            real: ctx.atom_intern("AD01"),
        });
        keymap
    }

    #[test]
    fn test_key_lookup_bounds() {
        let keymap = simple_keymap();
        assert!(keymap.key(10).is_some());
        assert!(keymap.key(9).is_none(), "gap keys are undefined");
        assert!(keymap.key(7).is_none());
        assert!(keymap.key(13).is_none());
        assert!(keymap.key(KEYCODE_INVALID).is_none());
    }

    #[test]
    fn test_key_by_name_resolves_aliases() {
        let keymap = simple_keymap();
        assert_eq!(keymap.key_by_name("AD01"), Some(10));
        assert_eq!(keymap.key_by_name("LatQ"), Some(10));
        assert_eq!(keymap.key_by_name("AE01"), None);
    }

    #[test]
    fn test_syms_by_level() {
        let keymap = simple_keymap();
        assert_eq!(
            keymap.key_get_syms_by_level(10, 0, 0),
            &[Keysym::from_name("q").unwrap()]
        );
        assert_eq!(
            keymap.key_get_syms_by_level(10, 0, 1),
            &[Keysym::from_name("Q").unwrap()]
        );
        assert!(keymap.key_get_syms_by_level(10, 1, 0).is_empty());
        assert!(keymap.key_get_syms_by_level(42, 0, 0).is_empty());
    }

    #[test]
    fn test_type_entry_selection() {
        let keymap = simple_keymap();
        let ty = &keymap.types[0];
        assert_eq!(ty.level_for_mods(0), 0);
        assert_eq!(ty.level_for_mods(1), 1);
        // Unlisted combinations map to the base level.
        assert_eq!(ty.level_for_mods(4), 0);
    }

    #[test]
    fn test_wrap_group_into_range() {
        use RangeExceedType::*;
        assert_eq!(wrap_group_into_range(1, 2, Wrap, 0), 1);
        assert_eq!(wrap_group_into_range(5, 2, Wrap, 0), 1);
        assert_eq!(wrap_group_into_range(-1, 2, Wrap, 0), 1);
        assert_eq!(wrap_group_into_range(5, 2, Saturate, 0), 1);
        assert_eq!(wrap_group_into_range(-3, 2, Saturate, 0), 0);
        assert_eq!(wrap_group_into_range(5, 3, Redirect, 2), 2);
        assert_eq!(wrap_group_into_range(5, 3, Redirect, 7), 0);
        assert_eq!(wrap_group_into_range(0, 0, Wrap, 0), LAYOUT_INVALID);
    }

    #[test]
    fn test_match_operation() {
        use MatchOperation::*;
        assert!(NoneOf.matches(0b01, 0b10));
        assert!(!NoneOf.matches(0b01, 0b01));
        assert!(AnyOfOrNone.matches(0b01, 0));
        assert!(AnyOfOrNone.matches(0b01, 0b01));
        assert!(!AnyOfOrNone.matches(0b01, 0b10));
        assert!(AnyOf.matches(0b11, 0b10));
        assert!(!AnyOf.matches(0b01, 0));
        assert!(AllOf.matches(0b11, 0b111));
        assert!(!AllOf.matches(0b11, 0b01));
        assert!(Exactly.matches(0b11, 0b11));
        assert!(!Exactly.matches(0b11, 0b111));
    }

    #[test]
    fn test_mod_queries() {
        let keymap = simple_keymap();
        assert_eq!(keymap.num_mods(), 8);
        assert_eq!(keymap.mod_get_index("Shift"), Some(0));
        assert_eq!(keymap.mod_get_name(2).as_deref(), Some("Control"));
        assert_eq!(keymap.mod_get_index("NumLock"), None);
    }
}
