//! Real and virtual modifiers.
//!
//! A modifier is an index in `0..32`. The first eight are the fixed real
//! modifiers (Shift, Lock, Control, Mod1..Mod5); the rest are virtual,
//! named by the keymap, and project onto a real mask once the keymap is
//! finalized.

use crate::atom::Atom;
use crate::context::Context;

pub type ModMask = u32;
pub type ModIndex = u32;

/// Sentinel for "no modifier".
pub const MOD_INVALID: ModIndex = 0xffff_ffff;

pub const NUM_REAL_MODS: usize = 8;
pub const MAX_MODS: usize = 32;

pub const MOD_IDX_SHIFT: ModIndex = 0;
pub const MOD_IDX_LOCK: ModIndex = 1;
pub const MOD_IDX_CONTROL: ModIndex = 2;
pub const MOD_IDX_MOD1: ModIndex = 3;
pub const MOD_IDX_MOD2: ModIndex = 4;
pub const MOD_IDX_MOD3: ModIndex = 5;
pub const MOD_IDX_MOD4: ModIndex = 6;
pub const MOD_IDX_MOD5: ModIndex = 7;

/// Mask of all real modifiers.
pub const MOD_REAL_MASK_ALL: ModMask = 0xff;

const REAL_MOD_NAMES: [&str; NUM_REAL_MODS] = [
    "Shift", "Lock", "Control", "Mod1", "Mod2", "Mod3", "Mod4", "Mod5",
];

/// A modifier mask as declared in the source (`mods`, possibly containing
/// virtual bits) together with its projection onto real modifiers
/// (`mask`, filled during finalization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mods {
    pub mods: ModMask,
    pub mask: ModMask,
}

impl Mods {
    /// A declared mask whose projection is not yet computed.
    pub fn new(mods: ModMask) -> Self {
        Self { mods, mask: 0 }
    }

    /// A mask of real modifiers only; declared and effective forms agree.
    pub fn real(mask: ModMask) -> Self {
        Self { mods: mask, mask }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModKind {
    Real,
    Virtual,
}

/// One named modifier. For virtual modifiers `mapping` holds the real
/// mask the modifier projects onto; for real modifiers it is the
/// modifier's own bit.
#[derive(Debug, Clone)]
pub struct Mod {
    pub name: Atom,
    pub kind: ModKind,
    pub mapping: ModMask,
}

/// Ordered set of the keymap's modifiers; the first eight entries are
/// always the real modifiers.
#[derive(Debug, Clone, Default)]
pub struct ModSet {
    pub mods: Vec<Mod>,
}

impl ModSet {
    /// A mod set seeded with the eight real modifiers.
    pub fn new_with_real_mods(ctx: &Context) -> Self {
        let mods = REAL_MOD_NAMES
            .iter()
            .enumerate()
            .map(|(i, name)| Mod {
                name: ctx.atom_intern(name),
                kind: ModKind::Real,
                mapping: 1 << i,
            })
            .collect();
        Self { mods }
    }

    pub fn num_mods(&self) -> usize {
        self.mods.len()
    }

    /// Finds a modifier by name, optionally restricted to one kind.
    pub fn mod_index(&self, name: Atom, kind: Option<ModKind>) -> Option<ModIndex> {
        self.mods
            .iter()
            .position(|m| m.name == name && kind.map_or(true, |k| m.kind == k))
            .map(|i| i as ModIndex)
    }

    pub fn mod_name(&self, idx: ModIndex) -> Option<Atom> {
        self.mods.get(idx as usize).map(|m| m.name)
    }

    /// Declares a virtual modifier, returning its index. Re-declaring an
    /// existing name returns the existing index; `None` when all 32
    /// indices are taken.
    pub fn add_virtual(&mut self, name: Atom, mapping: ModMask) -> Option<ModIndex> {
        if let Some(idx) = self.mod_index(name, None) {
            if mapping != 0 {
                self.mods[idx as usize].mapping |= mapping;
            }
            return Some(idx);
        }
        if self.mods.len() >= MAX_MODS {
            return None;
        }
        self.mods.push(Mod {
            name,
            kind: ModKind::Virtual,
            mapping,
        });
        Some((self.mods.len() - 1) as ModIndex)
    }

    /// Projects a declared mask onto real modifiers: real bits pass
    /// through, virtual bits are replaced by their mapping. Bits beyond
    /// the declared modifiers are dropped.
    pub fn resolve_mask(&self, mods: ModMask) -> ModMask {
        let mut mask = 0;
        for (i, m) in self.mods.iter().enumerate() {
            if mods & (1 << i) != 0 {
                mask |= match m.kind {
                    ModKind::Real => 1 << i,
                    ModKind::Virtual => m.mapping,
                };
            }
        }
        mask
    }

    /// Fills in the effective mask of `mods`.
    pub fn resolve(&self, mods: &mut Mods) {
        mods.mask = self.resolve_mask(mods.mods);
    }
}
