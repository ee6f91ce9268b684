//! Parse tree for the XKB text grammar.
//!
//! The tree is an owned tagged-variant structure: an [`XkbFile`] owns its
//! statements, statements own their expressions. Identifier and string
//! payloads are interned atoms; no node points outside its file.

use xkb_core::{Atom, Keysym};

/// The kind of a source file or section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Keycodes,
    Types,
    Compat,
    Symbols,
    Geometry,
    Keymap,
    Rules,
}

impl FileType {
    pub fn label(self) -> &'static str {
        match self {
            FileType::Keycodes => "xkb_keycodes",
            FileType::Types => "xkb_types",
            FileType::Compat => "xkb_compatibility_map",
            FileType::Symbols => "xkb_symbols",
            FileType::Geometry => "xkb_geometry",
            FileType::Keymap => "xkb_keymap",
            FileType::Rules => "rules",
        }
    }

    /// The include-path subdirectory searched for this file type.
    pub fn include_dir(self) -> &'static str {
        match self {
            FileType::Keycodes => "keycodes",
            FileType::Types => "types",
            FileType::Compat => "compat",
            FileType::Symbols => "symbols",
            FileType::Geometry => "geometry",
            FileType::Keymap => "keymap",
            FileType::Rules => "rules",
        }
    }
}

bitflags::bitflags! {
    /// Section header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MapFlags: u16 {
        const DEFAULT = 1 << 0;
        const PARTIAL = 1 << 1;
        const HIDDEN = 1 << 2;
        const ALPHANUMERIC_KEYS = 1 << 3;
        const MODIFIER_KEYS = 1 << 4;
        const KEYPAD_KEYS = 1 << 5;
        const FUNCTION_KEYS = 1 << 6;
        const ALTERNATE_GROUP = 1 << 7;
    }
}

/// Conflict policy when two fragments define the same entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Use the statement's own mode, else the outer one.
    #[default]
    Default,
    Augment,
    Override,
    Replace,
}

impl MergeMode {
    /// Resolves a statement-level mode against the enclosing one.
    pub fn resolve(self, outer: MergeMode) -> MergeMode {
        match self {
            MergeMode::Default => outer,
            other => other,
        }
    }

    /// Whether the incoming definition wins on conflict.
    pub fn clobbers(self) -> bool {
        matches!(self, MergeMode::Default | MergeMode::Override | MergeMode::Replace)
    }
}

/// A parsed file or section.
#[derive(Debug)]
pub struct XkbFile {
    pub file_type: FileType,
    pub name: String,
    pub flags: MapFlags,
    /// Statements of a component section.
    pub defs: Vec<Decl>,
    /// Child sections of a keymap file.
    pub sections: Vec<XkbFile>,
}

impl XkbFile {
    pub fn new(file_type: FileType, name: String, flags: MapFlags) -> Self {
        Self {
            file_type,
            name,
            flags,
            defs: Vec::new(),
            sections: Vec::new(),
        }
    }
}

/// A top-level statement inside a section.
#[derive(Debug)]
pub enum Decl {
    Include(IncludeStmt),
    Keycode(KeycodeDef),
    KeyAlias(KeyAliasDef),
    Var(VarDef),
    KeyType(KeyTypeDef),
    Interp(InterpDef),
    VMod(VModDef),
    Symbols(SymbolsDef),
    ModMap(ModMapDef),
    GroupCompat(GroupCompatDef),
    LedMap(LedMapDef),
    LedName(LedNameDef),
}

/// `include "pc+us(basic):2"`; the raw statement is split by the include
/// resolver.
#[derive(Debug)]
pub struct IncludeStmt {
    pub merge: MergeMode,
    pub stmt: String,
}

/// `<name> = keycode;`
#[derive(Debug)]
pub struct KeycodeDef {
    pub merge: MergeMode,
    pub name: Atom,
    pub value: i64,
}

/// `alias <alias> = <real>;`
#[derive(Debug)]
pub struct KeyAliasDef {
    pub merge: MergeMode,
    pub alias: Atom,
    pub real: Atom,
}

/// A field assignment. `name` is `None` for the bare bracketed lists in
/// key bodies; a bare flag parses with a `Boolean` value.
#[derive(Debug)]
pub struct VarDef {
    pub merge: MergeMode,
    pub name: Option<Expr>,
    pub value: Expr,
}

/// `type "NAME" { ... };`
#[derive(Debug)]
pub struct KeyTypeDef {
    pub merge: MergeMode,
    pub name: Atom,
    pub body: Vec<VarDef>,
}

/// `interpret sym+match(mods) { ... };`
#[derive(Debug)]
pub struct InterpDef {
    pub merge: MergeMode,
    /// `None` for the wildcard `Any`.
    pub sym: Option<Keysym>,
    pub match_expr: Option<Expr>,
    pub body: Vec<VarDef>,
}

/// One name out of a `virtual_modifiers` statement.
#[derive(Debug)]
pub struct VModDef {
    pub merge: MergeMode,
    pub name: Atom,
    pub value: Option<Expr>,
}

/// `key <NAME> { ... };`
#[derive(Debug)]
pub struct SymbolsDef {
    pub merge: MergeMode,
    pub key_name: Atom,
    pub body: Vec<VarDef>,
}

/// `modifier_map Mod1 { <LALT>, Alt_L };`
#[derive(Debug)]
pub struct ModMapDef {
    pub merge: MergeMode,
    pub modifier: Atom,
    pub keys: Vec<Expr>,
}

/// Legacy `group N = ...;` statements, parsed and ignored.
#[derive(Debug)]
pub struct GroupCompatDef {
    pub merge: MergeMode,
    pub group: u32,
    pub def: Expr,
}

/// `indicator "Name" { ... };`
#[derive(Debug)]
pub struct LedMapDef {
    pub merge: MergeMode,
    pub name: Atom,
    pub body: Vec<VarDef>,
}

/// `[virtual] indicator N = "Name";`
#[derive(Debug)]
pub struct LedNameDef {
    pub merge: MergeMode,
    pub ndx: u32,
    pub name: Expr,
    pub virtual_: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Assign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Negate,
    Invert,
    UnaryPlus,
}

/// An expression node.
#[derive(Debug)]
pub enum Expr {
    Ident(Atom),
    String(Atom),
    Boolean(bool),
    Integer(i64),
    /// Floats only exist for error reporting; the value is discarded.
    Float,
    KeyName(Atom),
    FieldRef {
        element: Atom,
        field: Atom,
    },
    ArrayRef {
        element: Option<Atom>,
        field: Atom,
        entry: Box<Expr>,
    },
    Action(ActionDecl),
    ActionList(Vec<ActionDecl>),
    /// Keysyms per level; a level may carry several keysyms.
    KeysymList(Vec<Vec<Keysym>>),
    /// `[]`, ambiguous between keysym and action lists.
    EmptyList,
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
}

/// `Name(arg, field=value, !flag)`
#[derive(Debug)]
pub struct ActionDecl {
    pub name: Atom,
    pub args: Vec<Expr>,
}
