//! xkb_core - Keymap data model and keyboard state machine
//!
//! This crate holds everything the runtime needs once a keymap has been
//! compiled: the context (atom table, include paths, log filter), keysyms
//! and their names, the immutable [`Keymap`] model, and the mutable
//! [`State`] machine that maps key events to symbols, modifier masks,
//! layouts and indicator states.
//!
//! The compilation pipeline itself lives in the `xkb_compiler` crate.

#[macro_use]
pub mod macros;

pub mod action;
pub mod atom;
pub mod context;
pub mod error;
pub mod keymap;
pub mod keysym;
pub mod message;
pub mod mods;
pub mod state;

// Re-export the types making up the public surface.
pub use action::{Action, ActionFlags};
pub use atom::{Atom, ATOM_NONE};
pub use context::{Context, ContextFlags, LogLevel};
pub use error::CompileError;
pub use keymap::{
    Group, Key, KeyAlias, KeyType, KeyTypeEntry, Keycode, Keymap, LayoutIndex, Led, LedIndex,
    Level, LevelIndex, MatchOperation, RangeExceedType, StateComponent, SymInterpret,
    KEYCODE_INVALID, KEYCODE_MAX, MAX_GROUPS, MAX_LEDS,
};
pub use keysym::Keysym;
pub use mods::{Mod, ModIndex, ModKind, ModMask, ModSet, Mods, MOD_INVALID};
pub use state::{KeyDirection, State};
