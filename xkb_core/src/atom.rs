//! Interned identifier strings.
//!
//! Every identifier, key name and section string that survives parsing is
//! interned into a per-context table and handled as a 32-bit [`Atom`]
//! afterwards. Handle 0 is reserved for "no atom".

use std::rc::Rc;

/// Handle into a context's atom table. `0` denotes the absent atom.
pub type Atom = u32;

/// The absent atom.
pub const ATOM_NONE: Atom = 0;

const INITIAL_SLOTS: usize = 128;

/// Insert-only string interner.
///
/// Open addressing with linear probing over a power-of-two slot array; a
/// secondary dense vector maps atom handles back to their string bytes in
/// O(1). Handles are stable for the lifetime of the table.
pub struct AtomTable {
    /// Probing slots; `0` marks an empty slot, any other value is an atom.
    slots: Vec<Atom>,
    /// Reverse mapping, indexed by atom. Index 0 holds the empty string.
    strings: Vec<Rc<str>>,
}

impl AtomTable {
    pub fn new() -> Self {
        Self {
            slots: vec![ATOM_NONE; INITIAL_SLOTS],
            strings: vec![Rc::from("")],
        }
    }

    /// FNV-1a over the string bytes.
    fn hash(bytes: &[u8]) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for &b in bytes {
            h ^= u64::from(b);
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        h
    }

    /// Interns `s`, returning its handle. Repeated calls with the same
    /// string return the same handle.
    pub fn intern(&mut self, s: &str) -> Atom {
        let mask = self.slots.len() - 1;
        let mut idx = (Self::hash(s.as_bytes()) as usize) & mask;
        loop {
            let atom = self.slots[idx];
            if atom == ATOM_NONE {
                break;
            }
            if &*self.strings[atom as usize] == s {
                return atom;
            }
            idx = (idx + 1) & mask;
        }

        let atom = self.strings.len() as Atom;
        self.strings.push(Rc::from(s));
        self.slots[idx] = atom;

        // Keep the load factor below 3/4.
        if self.strings.len() * 4 > self.slots.len() * 3 {
            self.grow();
        }
        atom
    }

    /// Looks up `s` without inserting it. Returns [`ATOM_NONE`] when the
    /// string has never been interned.
    pub fn lookup(&self, s: &str) -> Atom {
        let mask = self.slots.len() - 1;
        let mut idx = (Self::hash(s.as_bytes()) as usize) & mask;
        loop {
            let atom = self.slots[idx];
            if atom == ATOM_NONE {
                return ATOM_NONE;
            }
            if &*self.strings[atom as usize] == s {
                return atom;
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Returns the string for `atom`, or `None` for [`ATOM_NONE`] and
    /// out-of-range handles.
    pub fn text(&self, atom: Atom) -> Option<Rc<str>> {
        if atom == ATOM_NONE {
            return None;
        }
        self.strings.get(atom as usize).cloned()
    }

    /// Number of interned strings, excluding the reserved handle 0.
    pub fn len(&self) -> usize {
        self.strings.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn grow(&mut self) {
        let new_len = self.slots.len() * 2;
        let mask = new_len - 1;
        let mut slots = vec![ATOM_NONE; new_len];
        for (i, s) in self.strings.iter().enumerate().skip(1) {
            let mut idx = (Self::hash(s.as_bytes()) as usize) & mask;
            while slots[idx] != ATOM_NONE {
                idx = (idx + 1) & mask;
            }
            slots[idx] = i as Atom;
        }
        self.slots = slots;
    }
}

impl Default for AtomTable {
    fn default() -> Self {
        Self::new()
    }
}
