//! Keyboard state machine.
//!
//! A [`State`] consumes key up/down events against an immutable
//! [`Keymap`] and tracks the depressed/latched/locked modifier and layout
//! components, the derived effective values, and the indicator states.
//!
//! Action processing uses one live filter per depressed action key, so
//! that latch breaking, latch-to-lock promotion and the lock/unlock flags
//! compose correctly across interleaved keys. A pending latch is applied
//! to the key press that breaks it and cleared when the following event
//! is processed.

use std::rc::Rc;

use crate::action::{Action, ActionFlags};
use crate::keymap::{
    wrap_group_into_range, Keycode, Keymap, LayoutIndex, LedIndex, LevelIndex, RangeExceedType,
    StateComponent, LAYOUT_INVALID, LEVEL_INVALID,
};
use crate::keysym::Keysym;
use crate::mods::{ModIndex, ModMask, MAX_MODS};

/// Direction of a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Components {
    base_mods: ModMask,
    latched_mods: ModMask,
    locked_mods: ModMask,
    mods: ModMask,
    base_group: i32,
    latched_group: i32,
    locked_group: i32,
    group: LayoutIndex,
    leds: u32,
}

/// Progress of a latching key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Latch {
    /// The latching key is held down.
    KeyDown,
    /// Released without interruption; the latch is armed.
    Pending,
    /// The latch was used by a key press and clears on the next event.
    Consumed,
    /// Another key was pressed while the latching key was held.
    NoLatch,
}

#[derive(Debug, Clone, Copy)]
enum FilterKind {
    ModSet,
    ModLatch { latch: Latch },
    ModLock { prev_locked: ModMask },
    GroupSet { prev_base: i32 },
    GroupLatch { latch: Latch, prev_base: i32 },
    GroupLock,
}

#[derive(Debug, Clone, Copy)]
struct Filter {
    kind: FilterKind,
    key: Keycode,
    action: Action,
    refcnt: u32,
    active: bool,
}

/// Mutable keyboard state derived from a [`Keymap`].
pub struct State {
    keymap: Rc<Keymap>,
    components: Components,
    /// Number of depressed keys contributing each modifier bit.
    mod_key_count: [i16; MAX_MODS],
    set_mods: ModMask,
    clear_mods: ModMask,
    filters: Vec<Filter>,
}

impl State {
    pub fn new(keymap: Rc<Keymap>) -> Self {
        let mut state = Self {
            keymap,
            components: Components::default(),
            mod_key_count: [0; MAX_MODS],
            set_mods: 0,
            clear_mods: 0,
            filters: Vec::new(),
        };
        state.update_derived();
        state
    }

    pub fn keymap(&self) -> &Rc<Keymap> {
        &self.keymap
    }

    /* Event processing. */

    /// Processes one key event. Returns the state components that
    /// changed.
    pub fn update_key(&mut self, kc: Keycode, direction: KeyDirection) -> StateComponent {
        let Some(key) = self.keymap.key(kc) else {
            return StateComponent::empty();
        };
        let modmap = key.modmap;
        let prev = self.components;
        self.set_mods = 0;
        self.clear_mods = 0;

        let actions = self.key_actions(kc);

        let mut send = true;
        for i in 0..self.filters.len() {
            if !self.filters[i].active {
                continue;
            }
            send &= self.filter_apply(i, kc, &actions, direction);
        }

        if send && direction == KeyDirection::Down {
            for action in &actions {
                self.filter_new(kc, *action);
            }
            // Keys carrying modmap bits without a modifier action still
            // track their modifiers while depressed.
            if modmap != 0 && !actions.iter().any(Action::is_mod_action) {
                self.filter_new(
                    kc,
                    Action::ModSet {
                        flags: ActionFlags::empty(),
                        mods: crate::mods::Mods::real(modmap),
                    },
                );
            }
        }

        self.apply_mod_changes();
        self.update_derived();
        self.changed_components(&prev)
    }

    /// Overwrites the state components from serialized values, as sent by
    /// display servers. This path is lossy: latch bookkeeping is not
    /// restored.
    pub fn update_mask(
        &mut self,
        base_mods: ModMask,
        latched_mods: ModMask,
        locked_mods: ModMask,
        base_layout: LayoutIndex,
        latched_layout: LayoutIndex,
        locked_layout: LayoutIndex,
    ) -> StateComponent {
        let prev = self.components;

        let valid = if self.keymap.num_mods() >= MAX_MODS {
            !0
        } else {
            (1u32 << self.keymap.num_mods()) - 1
        };
        self.components.base_mods = base_mods & valid;
        self.components.latched_mods = latched_mods & valid;
        self.components.locked_mods = locked_mods & valid;
        self.components.base_group = base_layout as i32;
        self.components.latched_group = latched_layout as i32;
        self.components.locked_group = locked_layout as i32;

        self.update_derived();
        self.changed_components(&prev)
    }

    /* Queries. */

    /// The layout active for `kc`, after applying the key's out-of-range
    /// policy.
    pub fn key_get_layout(&self, kc: Keycode) -> LayoutIndex {
        let Some(key) = self.keymap.key(kc) else {
            return LAYOUT_INVALID;
        };
        wrap_group_into_range(
            self.components.group as i32,
            key.num_groups(),
            key.out_of_range_group_action,
            key.out_of_range_group_number,
        )
    }

    /// The shift level active for `kc` within `layout`.
    pub fn key_get_level(&self, kc: Keycode, layout: LayoutIndex) -> LevelIndex {
        let Some(key) = self.keymap.key(kc) else {
            return LEVEL_INVALID;
        };
        let Some(ty) = self.keymap.key_type(key, layout) else {
            return LEVEL_INVALID;
        };
        ty.level_for_mods(self.components.mods & ty.mods.mask)
    }

    /// The keysyms produced by `kc` in the current state.
    pub fn key_get_syms(&self, kc: Keycode) -> &[Keysym] {
        let layout = self.key_get_layout(kc);
        if layout == LAYOUT_INVALID {
            return &[];
        }
        let level = self.key_get_level(kc, layout);
        if level == LEVEL_INVALID {
            return &[];
        }
        self.keymap.key_get_syms_by_level(kc, layout, level)
    }

    /// The single keysym produced by `kc`, or [`Keysym::NO_SYMBOL`] when
    /// the key produces none or several.
    pub fn key_get_one_sym(&self, kc: Keycode) -> Keysym {
        match self.key_get_syms(kc) {
            [sym] => *sym,
            _ => Keysym::NO_SYMBOL,
        }
    }

    /// Serializes the requested modifier components into a mask.
    pub fn serialize_mods(&self, components: StateComponent) -> ModMask {
        let mut mask = 0;
        if components.contains(StateComponent::MODS_EFFECTIVE) {
            return self.components.mods;
        }
        if components.contains(StateComponent::MODS_DEPRESSED) {
            mask |= self.components.base_mods;
        }
        if components.contains(StateComponent::MODS_LATCHED) {
            mask |= self.components.latched_mods;
        }
        if components.contains(StateComponent::MODS_LOCKED) {
            mask |= self.components.locked_mods;
        }
        mask
    }

    /// Serializes the requested layout components into an index.
    pub fn serialize_layout(&self, components: StateComponent) -> LayoutIndex {
        if components.contains(StateComponent::LAYOUT_EFFECTIVE) {
            return self.components.group;
        }
        let mut layout = 0i32;
        if components.contains(StateComponent::LAYOUT_DEPRESSED) {
            layout += self.components.base_group;
        }
        if components.contains(StateComponent::LAYOUT_LATCHED) {
            layout += self.components.latched_group;
        }
        if components.contains(StateComponent::LAYOUT_LOCKED) {
            layout += self.components.locked_group;
        }
        layout as LayoutIndex
    }

    pub fn mod_index_is_active(&self, idx: ModIndex, components: StateComponent) -> bool {
        if idx as usize >= self.keymap.num_mods() {
            return false;
        }
        self.serialize_mods(components) & (1 << idx) != 0
    }

    pub fn mod_name_is_active(&self, name: &str, components: StateComponent) -> bool {
        self.keymap
            .mod_get_index(name)
            .is_some_and(|idx| self.mod_index_is_active(idx, components))
    }

    pub fn layout_index_is_active(&self, layout: LayoutIndex, components: StateComponent) -> bool {
        let mut active = false;
        if components.contains(StateComponent::LAYOUT_EFFECTIVE) {
            active |= self.components.group == layout;
        }
        if components.contains(StateComponent::LAYOUT_DEPRESSED) {
            active |= self.components.base_group == layout as i32;
        }
        if components.contains(StateComponent::LAYOUT_LATCHED) {
            active |= self.components.latched_group == layout as i32;
        }
        if components.contains(StateComponent::LAYOUT_LOCKED) {
            active |= self.components.locked_group == layout as i32;
        }
        active
    }

    pub fn layout_name_is_active(&self, name: &str, components: StateComponent) -> bool {
        self.keymap
            .layout_get_index(name)
            .is_some_and(|layout| self.layout_index_is_active(layout, components))
    }

    pub fn led_index_is_active(&self, idx: LedIndex) -> bool {
        (idx as usize) < self.keymap.num_leds() && self.components.leds & (1 << idx) != 0
    }

    pub fn led_name_is_active(&self, name: &str) -> bool {
        self.keymap
            .led_get_index(name)
            .is_some_and(|idx| self.led_index_is_active(idx))
    }

    /// The modifiers consumed by level selection for `kc`.
    pub fn key_get_consumed_mods(&self, kc: Keycode) -> ModMask {
        let layout = self.key_get_layout(kc);
        if layout == LAYOUT_INVALID {
            return 0;
        }
        let Some(key) = self.keymap.key(kc) else {
            return 0;
        };
        let Some(ty) = self.keymap.key_type(key, layout) else {
            return 0;
        };
        let entry = ty.entry_for_mods(self.components.mods & ty.mods.mask);
        let preserve = entry.map_or(0, |e| e.preserve.mask);
        ty.mods.mask & !preserve
    }

    pub fn mod_index_is_consumed(&self, kc: Keycode, idx: ModIndex) -> bool {
        self.key_get_consumed_mods(kc) & (1 << idx) != 0
    }

    /// Removes the modifiers consumed by `kc` from `mask`.
    pub fn mod_mask_remove_consumed(&self, kc: Keycode, mask: ModMask) -> ModMask {
        mask & !self.key_get_consumed_mods(kc)
    }

    /* Internals. */

    /// The actions of `kc` at the currently active (layout, level).
    fn key_actions(&self, kc: Keycode) -> Vec<Action> {
        let layout = self.key_get_layout(kc);
        if layout == LAYOUT_INVALID {
            return Vec::new();
        }
        let level = self.key_get_level(kc, layout);
        if level == LEVEL_INVALID {
            return Vec::new();
        }
        let Some(key) = self.keymap.key(kc) else {
            return Vec::new();
        };
        key.groups
            .get(layout as usize)
            .and_then(|g| g.levels.get(level as usize))
            .map(|l| l.actions.clone())
            .unwrap_or_default()
    }

    fn filter_new(&mut self, kc: Keycode, action: Action) {
        let kind = match action {
            Action::ModSet { mods, .. } => {
                self.set_mods |= mods.mask;
                FilterKind::ModSet
            }
            Action::ModLatch { mods, .. } => {
                self.set_mods |= mods.mask;
                FilterKind::ModLatch { latch: Latch::KeyDown }
            }
            Action::ModLock { flags, mods } => {
                let prev_locked = self.components.locked_mods & mods.mask;
                self.set_mods |= mods.mask;
                if !flags.contains(ActionFlags::LOCK_NO_LOCK) {
                    self.components.locked_mods |= mods.mask;
                }
                FilterKind::ModLock { prev_locked }
            }
            Action::GroupSet { flags, group } => {
                let prev_base = self.components.base_group;
                if flags.contains(ActionFlags::ABSOLUTE_SWITCH) {
                    self.components.base_group = group;
                } else {
                    self.components.base_group += group;
                }
                FilterKind::GroupSet { prev_base }
            }
            Action::GroupLatch { flags, group } => {
                let prev_base = self.components.base_group;
                if flags.contains(ActionFlags::ABSOLUTE_SWITCH) {
                    self.components.base_group = group;
                } else {
                    self.components.base_group += group;
                }
                FilterKind::GroupLatch { latch: Latch::KeyDown, prev_base }
            }
            Action::GroupLock { flags, group } => {
                if flags.contains(ActionFlags::ABSOLUTE_SWITCH) {
                    self.components.locked_group = group;
                } else {
                    self.components.locked_group += group;
                }
                FilterKind::GroupLock
            }
            _ => return,
        };

        let filter = Filter {
            kind,
            key: kc,
            action,
            refcnt: 1,
            active: true,
        };
        match self.filters.iter_mut().find(|f| !f.active) {
            Some(slot) => *slot = filter,
            None => self.filters.push(filter),
        }
    }

    /// Runs one filter against an event. Returns `false` when the event
    /// is consumed and must not spawn new filters.
    fn filter_apply(
        &mut self,
        idx: usize,
        kc: Keycode,
        actions: &[Action],
        direction: KeyDirection,
    ) -> bool {
        let mut filter = self.filters[idx];
        let send = match filter.kind {
            FilterKind::ModSet => self.filter_mod_set(&mut filter, kc, direction),
            FilterKind::ModLatch { .. } => self.filter_mod_latch(&mut filter, kc, actions, direction),
            FilterKind::ModLock { .. } => self.filter_mod_lock(&mut filter, kc, direction),
            FilterKind::GroupSet { .. } => self.filter_group_set(&mut filter, kc, direction),
            FilterKind::GroupLatch { .. } => {
                self.filter_group_latch(&mut filter, kc, actions, direction)
            }
            FilterKind::GroupLock => self.filter_group_lock(&mut filter, kc, direction),
        };
        self.filters[idx] = filter;
        send
    }

    fn filter_mod_set(&mut self, filter: &mut Filter, kc: Keycode, direction: KeyDirection) -> bool {
        let Action::ModSet { flags, mods } = &mut filter.action else {
            return true;
        };
        if kc != filter.key {
            // Any intervening key cancels clearing locks on release.
            flags.remove(ActionFlags::LOCK_CLEAR);
            return true;
        }
        match direction {
            KeyDirection::Down => {
                filter.refcnt += 1;
                false
            }
            KeyDirection::Up => {
                filter.refcnt -= 1;
                if filter.refcnt > 0 {
                    return false;
                }
                self.clear_mods |= mods.mask;
                if flags.contains(ActionFlags::LOCK_CLEAR) {
                    self.components.locked_mods &= !mods.mask;
                }
                filter.active = false;
                true
            }
        }
    }

    fn filter_mod_lock(&mut self, filter: &mut Filter, kc: Keycode, direction: KeyDirection) -> bool {
        let FilterKind::ModLock { prev_locked } = filter.kind else {
            return true;
        };
        let Action::ModLock { flags, mods } = filter.action else {
            return true;
        };
        if kc != filter.key {
            return true;
        }
        match direction {
            KeyDirection::Down => {
                filter.refcnt += 1;
                false
            }
            KeyDirection::Up => {
                filter.refcnt -= 1;
                if filter.refcnt > 0 {
                    return false;
                }
                self.clear_mods |= mods.mask;
                if !flags.contains(ActionFlags::LOCK_NO_UNLOCK) {
                    // Toggle: unlock only the bits that were locked
                    // before this press.
                    self.components.locked_mods &= !prev_locked;
                }
                filter.active = false;
                true
            }
        }
    }

    fn filter_mod_latch(
        &mut self,
        filter: &mut Filter,
        kc: Keycode,
        actions: &[Action],
        direction: KeyDirection,
    ) -> bool {
        let FilterKind::ModLatch { mut latch } = filter.kind else {
            return true;
        };
        let Action::ModLatch { flags, mods } = filter.action else {
            return true;
        };

        let mut send = true;
        match (direction, latch) {
            (_, Latch::Consumed) => {
                // The latch was spent on the previous key press.
                self.components.latched_mods &= !mods.mask;
                filter.active = false;
            }
            (KeyDirection::Down, Latch::Pending) => {
                let same_latch = actions.iter().any(|a| {
                    matches!(a, Action::ModLatch { flags: f, mods: m }
                             if *f == flags && m.mask == mods.mask)
                });
                if same_latch {
                    // Re-pressing the latch key promotes it.
                    self.components.latched_mods &= !mods.mask;
                    filter.key = kc;
                    filter.refcnt = 1;
                    if flags.contains(ActionFlags::LATCH_TO_LOCK) {
                        filter.action = Action::ModLock { flags, mods };
                        filter.kind = FilterKind::ModLock {
                            prev_locked: self.components.locked_mods & mods.mask,
                        };
                        self.set_mods |= mods.mask;
                        self.components.locked_mods |= mods.mask;
                    } else {
                        filter.action = Action::ModSet {
                            flags: ActionFlags::empty(),
                            mods,
                        };
                        filter.kind = FilterKind::ModSet;
                        self.set_mods |= mods.mask;
                    }
                    send = false;
                } else {
                    let breaks = actions.is_empty() || actions.iter().any(Action::breaks_latch);
                    if breaks {
                        // The latch applies to this key press and is
                        // cleared once the press has been processed.
                        latch = Latch::Consumed;
                    }
                }
            }
            (KeyDirection::Down, Latch::KeyDown) if kc != filter.key => {
                // Another key pressed while ours is held: no latch.
                latch = Latch::NoLatch;
            }
            (KeyDirection::Down, _) if kc == filter.key => {
                send = false;
            }
            (KeyDirection::Up, _) if kc == filter.key => {
                let locked_all =
                    self.components.locked_mods & mods.mask == mods.mask && mods.mask != 0;
                if latch == Latch::NoLatch
                    || (flags.contains(ActionFlags::LOCK_CLEAR) && locked_all)
                {
                    self.clear_mods |= mods.mask;
                    self.components.locked_mods &= !mods.mask;
                    filter.active = false;
                } else {
                    latch = Latch::Pending;
                    self.clear_mods |= mods.mask;
                    self.components.latched_mods |= mods.mask;
                }
            }
            _ => {}
        }

        // Leave promoted filters (now ModSet/ModLock) untouched.
        if filter.active && matches!(filter.kind, FilterKind::ModLatch { .. }) {
            filter.kind = FilterKind::ModLatch { latch };
        }
        send
    }

    fn filter_group_set(&mut self, filter: &mut Filter, kc: Keycode, direction: KeyDirection) -> bool {
        let FilterKind::GroupSet { prev_base } = filter.kind else {
            return true;
        };
        let Action::GroupSet { flags, .. } = filter.action else {
            return true;
        };
        if kc != filter.key {
            return true;
        }
        match direction {
            KeyDirection::Down => {
                filter.refcnt += 1;
                false
            }
            KeyDirection::Up => {
                filter.refcnt -= 1;
                if filter.refcnt > 0 {
                    return false;
                }
                self.components.base_group = prev_base;
                if flags.contains(ActionFlags::LOCK_CLEAR) {
                    self.components.locked_group = 0;
                }
                filter.active = false;
                true
            }
        }
    }

    fn filter_group_lock(&mut self, filter: &mut Filter, kc: Keycode, direction: KeyDirection) -> bool {
        if kc != filter.key {
            return true;
        }
        match direction {
            KeyDirection::Down => {
                filter.refcnt += 1;
                false
            }
            KeyDirection::Up => {
                filter.refcnt -= 1;
                if filter.refcnt > 0 {
                    return false;
                }
                filter.active = false;
                true
            }
        }
    }

    fn filter_group_latch(
        &mut self,
        filter: &mut Filter,
        kc: Keycode,
        actions: &[Action],
        direction: KeyDirection,
    ) -> bool {
        let FilterKind::GroupLatch { mut latch, prev_base } = filter.kind else {
            return true;
        };
        let Action::GroupLatch { flags, group } = filter.action else {
            return true;
        };

        let mut send = true;
        match (direction, latch) {
            (_, Latch::Consumed) => {
                self.components.latched_group -= group;
                filter.active = false;
            }
            (KeyDirection::Down, Latch::Pending) => {
                let same_latch = actions.iter().any(|a| {
                    matches!(a, Action::GroupLatch { flags: f, group: g }
                             if *f == flags && *g == group)
                });
                if same_latch {
                    self.components.latched_group -= group;
                    filter.key = kc;
                    filter.refcnt = 1;
                    if flags.contains(ActionFlags::LATCH_TO_LOCK) {
                        filter.action = Action::GroupLock { flags, group };
                        filter.kind = FilterKind::GroupLock;
                        if flags.contains(ActionFlags::ABSOLUTE_SWITCH) {
                            self.components.locked_group = group;
                        } else {
                            self.components.locked_group += group;
                        }
                    } else {
                        filter.action = Action::GroupSet { flags, group };
                        filter.kind = FilterKind::GroupSet {
                            prev_base: self.components.base_group,
                        };
                        if flags.contains(ActionFlags::ABSOLUTE_SWITCH) {
                            self.components.base_group = group;
                        } else {
                            self.components.base_group += group;
                        }
                    }
                    send = false;
                } else {
                    let breaks = actions.is_empty() || actions.iter().any(Action::breaks_latch);
                    if breaks {
                        latch = Latch::Consumed;
                    }
                }
            }
            (KeyDirection::Down, Latch::KeyDown) if kc != filter.key => {
                latch = Latch::NoLatch;
            }
            (KeyDirection::Down, _) if kc == filter.key => {
                send = false;
            }
            (KeyDirection::Up, _) if kc == filter.key => {
                if latch == Latch::NoLatch {
                    self.components.base_group = prev_base;
                    filter.active = false;
                } else {
                    latch = Latch::Pending;
                    self.components.base_group = prev_base;
                    self.components.latched_group += group;
                }
            }
            _ => {}
        }

        if filter.active && matches!(filter.kind, FilterKind::GroupLatch { .. }) {
            filter.kind = FilterKind::GroupLatch { latch, prev_base };
        }
        send
    }

    /// Folds the set/clear masks gathered during an event into the base
    /// modifiers, counting how many depressed keys hold each bit.
    fn apply_mod_changes(&mut self) {
        for i in 0..MAX_MODS {
            let bit = 1u32 << i;
            if self.set_mods & bit != 0 {
                self.mod_key_count[i] += 1;
                self.components.base_mods |= bit;
            }
            if self.clear_mods & bit != 0 {
                self.mod_key_count[i] -= 1;
                if self.mod_key_count[i] <= 0 {
                    self.components.base_mods &= !bit;
                    self.mod_key_count[i] = 0;
                }
            }
        }
        self.set_mods = 0;
        self.clear_mods = 0;
    }

    fn update_derived(&mut self) {
        self.components.mods = self.components.base_mods
            | self.components.latched_mods
            | self.components.locked_mods;

        let num_groups = self.keymap.num_groups;

        let wrapped = wrap_group_into_range(
            self.components.locked_group,
            num_groups,
            RangeExceedType::Wrap,
            0,
        );
        self.components.locked_group = if wrapped == LAYOUT_INVALID { 0 } else { wrapped as i32 };

        let total = self.components.base_group
            + self.components.latched_group
            + self.components.locked_group;
        let wrapped = wrap_group_into_range(total, num_groups, RangeExceedType::Wrap, 0);
        self.components.group = if wrapped == LAYOUT_INVALID { 0 } else { wrapped };

        self.led_update_all();
    }

    fn led_update_all(&mut self) {
        let mut leds = 0u32;
        for (i, led) in self.keymap.leds.iter().enumerate() {
            let Some(led) = led else { continue };
            let mut active = false;

            if !led.which_groups.is_empty() && led.groups != 0 {
                let mut group_mask = 0u32;
                if led.which_groups.contains(StateComponent::LAYOUT_EFFECTIVE) {
                    group_mask |= 1 << self.components.group;
                }
                if led.which_groups.contains(StateComponent::LAYOUT_DEPRESSED)
                    && (0..32).contains(&self.components.base_group)
                {
                    group_mask |= 1 << self.components.base_group;
                }
                if led.which_groups.contains(StateComponent::LAYOUT_LATCHED)
                    && (0..32).contains(&self.components.latched_group)
                {
                    group_mask |= 1 << self.components.latched_group;
                }
                if led.which_groups.contains(StateComponent::LAYOUT_LOCKED)
                    && (0..32).contains(&self.components.locked_group)
                {
                    group_mask |= 1 << self.components.locked_group;
                }
                active |= led.groups & group_mask != 0;
            }

            if !led.which_mods.is_empty() && led.mods.mask != 0 {
                let mut mod_mask = 0;
                if led.which_mods.contains(StateComponent::MODS_EFFECTIVE) {
                    mod_mask |= self.components.mods;
                }
                if led.which_mods.contains(StateComponent::MODS_DEPRESSED) {
                    mod_mask |= self.components.base_mods;
                }
                if led.which_mods.contains(StateComponent::MODS_LATCHED) {
                    mod_mask |= self.components.latched_mods;
                }
                if led.which_mods.contains(StateComponent::MODS_LOCKED) {
                    mod_mask |= self.components.locked_mods;
                }
                active |= led.mods.mask & mod_mask != 0;
            }

            // Controls are not modeled in the state; a controls-only
            // indicator never lights up here.

            if active {
                leds |= 1 << i;
            }
        }
        self.components.leds = leds;
    }

    fn changed_components(&self, prev: &Components) -> StateComponent {
        let cur = &self.components;
        let mut changed = StateComponent::empty();
        if cur.base_mods != prev.base_mods {
            changed |= StateComponent::MODS_DEPRESSED;
        }
        if cur.latched_mods != prev.latched_mods {
            changed |= StateComponent::MODS_LATCHED;
        }
        if cur.locked_mods != prev.locked_mods {
            changed |= StateComponent::MODS_LOCKED;
        }
        if cur.mods != prev.mods {
            changed |= StateComponent::MODS_EFFECTIVE;
        }
        if cur.base_group != prev.base_group {
            changed |= StateComponent::LAYOUT_DEPRESSED;
        }
        if cur.latched_group != prev.latched_group {
            changed |= StateComponent::LAYOUT_LATCHED;
        }
        if cur.locked_group != prev.locked_group {
            changed |= StateComponent::LAYOUT_LOCKED;
        }
        if cur.group != prev.group {
            changed |= StateComponent::LAYOUT_EFFECTIVE;
        }
        if cur.leds != prev.leds {
            changed |= StateComponent::LEDS;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextFlags};
    use crate::keymap::{Group, Key, KeyType, KeyTypeEntry, Led, Level};
    use crate::mods::{Mods, MOD_IDX_LOCK, MOD_IDX_SHIFT};

    const KC_SHIFT: Keycode = 10;
    const KC_CAPS: Keycode = 11;
    const KC_Q: Keycode = 12;
    const KC_W: Keycode = 13;
    const KC_LATCH: Keycode = 14;
    const KC_GRP: Keycode = 15;

    fn sym(name: &str) -> Keysym {
        Keysym::from_name(name).unwrap()
    }

    /// A hand-built keymap: Shift key, Caps lock, latching Shift, a group
    /// lock key, and q/w letter keys with two layouts on q.
    fn test_keymap() -> Rc<Keymap> {
        let ctx = Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES);
        let mut keymap = Keymap::new(ctx.clone());
        keymap.min_key_code = 8;
        keymap.max_key_code = 20;

        let shift_mask = 1 << MOD_IDX_SHIFT;
        let lock_mask = 1 << MOD_IDX_LOCK;

        keymap.types.push(KeyType {
            name: ctx.atom_intern("ONE_LEVEL"),
            mods: Mods::default(),
            num_levels: 1,
            entries: vec![],
            level_names: vec![],
        });
        keymap.types.push(KeyType {
            name: ctx.atom_intern("ALPHABETIC"),
            mods: Mods::real(shift_mask | lock_mask),
            num_levels: 2,
            entries: vec![
                KeyTypeEntry {
                    level: 1,
                    mods: Mods::real(shift_mask),
                    preserve: Mods::default(),
                },
                KeyTypeEntry {
                    level: 1,
                    mods: Mods::real(lock_mask),
                    preserve: Mods::default(),
                },
            ],
            level_names: vec![],
        });

        keymap.keys = (8..=20)
            .map(|kc| Key {
                keycode: kc,
                ..Key::default()
            })
            .collect();

        let one_level = |syms: Vec<Keysym>, actions: Vec<Action>| Group {
            key_type: 0,
            explicit_type: false,
            levels: vec![Level { syms, actions }],
        };
        let alphabetic = |lower: Keysym, upper: Keysym| Group {
            key_type: 1,
            explicit_type: false,
            levels: vec![
                Level { syms: vec![lower], actions: vec![] },
                Level { syms: vec![upper], actions: vec![] },
            ],
        };

        let set = |kc: Keycode,
                   keymap: &mut Keymap,
                   name: &str,
                   groups: Vec<Group>,
                   modmap: ModMask| {
            let idx = (kc - keymap.min_key_code) as usize;
            keymap.keys[idx].name = ctx.atom_intern(name);
            keymap.keys[idx].groups = groups;
            keymap.keys[idx].modmap = modmap;
        };

        set(
            KC_SHIFT,
            &mut keymap,
            "LFSH",
            vec![one_level(
                vec![sym("Shift_L")],
                vec![Action::ModSet {
                    flags: ActionFlags::empty(),
                    mods: Mods::real(shift_mask),
                }],
            )],
            shift_mask,
        );
        set(
            KC_CAPS,
            &mut keymap,
            "CAPS",
            vec![one_level(
                vec![sym("Caps_Lock")],
                vec![Action::ModLock {
                    flags: ActionFlags::empty(),
                    mods: Mods::real(lock_mask),
                }],
            )],
            lock_mask,
        );
        set(
            KC_LATCH,
            &mut keymap,
            "LTCH",
            vec![one_level(
                vec![sym("ISO_Level2_Latch")],
                vec![Action::ModLatch {
                    flags: ActionFlags::LATCH_TO_LOCK,
                    mods: Mods::real(shift_mask),
                }],
            )],
            shift_mask,
        );
        set(
            KC_GRP,
            &mut keymap,
            "GRPL",
            vec![one_level(
                vec![sym("ISO_Next_Group")],
                vec![Action::GroupLock {
                    flags: ActionFlags::empty(),
                    group: 1,
                }],
            )],
            0,
        );
        set(
            KC_Q,
            &mut keymap,
            "AD01",
            vec![alphabetic(sym("q"), sym("Q")), alphabetic(sym("at"), sym("numbersign"))],
            0,
        );
        set(KC_W, &mut keymap, "AD02", vec![alphabetic(sym("w"), sym("W"))], 0);

        keymap.num_groups = 2;
        keymap.group_names = vec![ctx.atom_intern("English (US)"), ctx.atom_intern("German")];

        keymap.leds.push(Some(Led {
            name: ctx.atom_intern("Caps Lock"),
            which_mods: StateComponent::MODS_LOCKED,
            mods: Mods::real(lock_mask),
            ..Led::default()
        }));

        Rc::new(keymap)
    }

    #[test]
    fn test_plain_key_press() {
        let state = State::new(test_keymap());
        assert_eq!(state.key_get_one_sym(KC_Q), sym("q"));
    }

    #[test]
    fn test_shift_depressed_selects_level_two() {
        let mut state = State::new(test_keymap());
        state.update_key(KC_SHIFT, KeyDirection::Down);
        assert_eq!(state.key_get_one_sym(KC_Q), sym("Q"));
        assert!(state.mod_name_is_active("Shift", StateComponent::MODS_DEPRESSED));

        state.update_key(KC_SHIFT, KeyDirection::Up);
        assert_eq!(state.key_get_one_sym(KC_Q), sym("q"));
        assert_eq!(state.serialize_mods(StateComponent::MODS_EFFECTIVE), 0);
    }

    #[test]
    fn test_caps_lock_toggles() {
        let mut state = State::new(test_keymap());
        state.update_key(KC_CAPS, KeyDirection::Down);
        state.update_key(KC_CAPS, KeyDirection::Up);
        assert!(state.mod_name_is_active("Lock", StateComponent::MODS_LOCKED));
        assert_eq!(state.key_get_one_sym(KC_Q), sym("Q"));
        assert!(state.led_name_is_active("Caps Lock"));

        state.update_key(KC_CAPS, KeyDirection::Down);
        state.update_key(KC_CAPS, KeyDirection::Up);
        assert!(!state.mod_name_is_active("Lock", StateComponent::MODS_LOCKED));
        assert!(!state.led_name_is_active("Caps Lock"));
    }

    #[test]
    fn test_latch_applies_to_next_key_only() {
        let mut state = State::new(test_keymap());
        state.update_key(KC_LATCH, KeyDirection::Down);
        state.update_key(KC_LATCH, KeyDirection::Up);
        assert!(state.mod_name_is_active("Shift", StateComponent::MODS_LATCHED));

        // The latch applies to this press...
        state.update_key(KC_Q, KeyDirection::Down);
        assert_eq!(state.key_get_one_sym(KC_Q), sym("Q"));
        state.update_key(KC_Q, KeyDirection::Up);

        // ...and is spent afterwards.
        state.update_key(KC_W, KeyDirection::Down);
        assert_eq!(state.key_get_one_sym(KC_W), sym("w"));
        assert!(!state.mod_name_is_active("Shift", StateComponent::MODS_LATCHED));
    }

    #[test]
    fn test_latch_broken_by_simultaneous_press() {
        let mut state = State::new(test_keymap());
        state.update_key(KC_LATCH, KeyDirection::Down);
        state.update_key(KC_Q, KeyDirection::Down);
        assert_eq!(state.key_get_one_sym(KC_Q), sym("Q"));
        state.update_key(KC_Q, KeyDirection::Up);
        state.update_key(KC_LATCH, KeyDirection::Up);
        // Used as a plain modifier; nothing remains latched.
        assert_eq!(state.serialize_mods(StateComponent::MODS_LATCHED), 0);
        assert_eq!(state.serialize_mods(StateComponent::MODS_EFFECTIVE), 0);
    }

    #[test]
    fn test_latch_to_lock_promotion() {
        let mut state = State::new(test_keymap());
        state.update_key(KC_LATCH, KeyDirection::Down);
        state.update_key(KC_LATCH, KeyDirection::Up);
        state.update_key(KC_LATCH, KeyDirection::Down);
        assert!(state.mod_name_is_active("Shift", StateComponent::MODS_LOCKED));
        assert!(!state.mod_name_is_active("Shift", StateComponent::MODS_LATCHED));
        state.update_key(KC_LATCH, KeyDirection::Up);
        // Re-latching does not unlock.
        assert!(state.mod_name_is_active("Shift", StateComponent::MODS_LOCKED));
    }

    #[test]
    fn test_group_lock() {
        let mut state = State::new(test_keymap());
        assert_eq!(state.key_get_one_sym(KC_Q), sym("q"));
        state.update_key(KC_GRP, KeyDirection::Down);
        state.update_key(KC_GRP, KeyDirection::Up);
        assert_eq!(state.serialize_layout(StateComponent::LAYOUT_EFFECTIVE), 1);
        assert_eq!(state.key_get_one_sym(KC_Q), sym("at"));
        // The one-layout key wraps back to its only group.
        assert_eq!(state.key_get_one_sym(KC_W), sym("w"));
    }

    #[test]
    fn test_update_mask_wraps_layout() {
        let mut state = State::new(test_keymap());
        state.update_mask(0, 0, 0, 0, 0, 5);
        // 5 mod 2 = 1.
        assert_eq!(state.serialize_layout(StateComponent::LAYOUT_EFFECTIVE), 1);
    }

    #[test]
    fn test_update_mask_round_trip() {
        let mut state = State::new(test_keymap());
        state.update_key(KC_CAPS, KeyDirection::Down);
        state.update_key(KC_CAPS, KeyDirection::Up);
        state.update_key(KC_SHIFT, KeyDirection::Down);
        state.update_key(KC_GRP, KeyDirection::Down);
        state.update_key(KC_GRP, KeyDirection::Up);

        let mut copy = State::new(test_keymap());
        copy.update_mask(
            state.serialize_mods(StateComponent::MODS_DEPRESSED),
            state.serialize_mods(StateComponent::MODS_LATCHED),
            state.serialize_mods(StateComponent::MODS_LOCKED),
            state.serialize_layout(StateComponent::LAYOUT_DEPRESSED),
            state.serialize_layout(StateComponent::LAYOUT_LATCHED),
            state.serialize_layout(StateComponent::LAYOUT_LOCKED),
        );
        assert_eq!(
            copy.serialize_mods(StateComponent::MODS_EFFECTIVE),
            state.serialize_mods(StateComponent::MODS_EFFECTIVE)
        );
        assert_eq!(
            copy.serialize_layout(StateComponent::LAYOUT_EFFECTIVE),
            state.serialize_layout(StateComponent::LAYOUT_EFFECTIVE)
        );
    }

    #[test]
    fn test_invalid_keycode_is_noop() {
        let mut state = State::new(test_keymap());
        assert_eq!(state.update_key(200, KeyDirection::Down), StateComponent::empty());
        assert!(state.key_get_syms(200).is_empty());
        assert_eq!(state.key_get_one_sym(200), Keysym::NO_SYMBOL);
    }

    #[test]
    fn test_consumed_mods() {
        let mut state = State::new(test_keymap());
        state.update_key(KC_SHIFT, KeyDirection::Down);
        let shift = 1 << MOD_IDX_SHIFT;
        let mod1 = 1 << crate::mods::MOD_IDX_MOD1;
        assert!(state.mod_index_is_consumed(KC_Q, MOD_IDX_SHIFT));
        assert_eq!(state.mod_mask_remove_consumed(KC_Q, shift | mod1), mod1);
        // The shift key itself is one-level; nothing is consumed.
        assert!(!state.mod_index_is_consumed(KC_SHIFT, MOD_IDX_SHIFT));
    }

    #[test]
    fn test_two_shift_keys_overlap() {
        // Two keys holding the same modifier: releasing one keeps it.
        let keymap = test_keymap();
        let mut state = State::new(keymap);
        state.update_key(KC_SHIFT, KeyDirection::Down);
        state.update_key(KC_LATCH, KeyDirection::Down);
        state.update_key(KC_SHIFT, KeyDirection::Up);
        assert!(state.mod_name_is_active("Shift", StateComponent::MODS_DEPRESSED));
        state.update_key(KC_LATCH, KeyDirection::Up);
        assert!(!state.mod_name_is_active("Shift", StateComponent::MODS_DEPRESSED));
    }

    #[test]
    fn test_changed_components_reported() {
        let mut state = State::new(test_keymap());
        let changed = state.update_key(KC_SHIFT, KeyDirection::Down);
        assert!(changed.contains(StateComponent::MODS_DEPRESSED));
        assert!(changed.contains(StateComponent::MODS_EFFECTIVE));
        let changed = state.update_key(KC_Q, KeyDirection::Down);
        assert_eq!(changed, StateComponent::empty());
    }
}
