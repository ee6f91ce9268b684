//! xkb_compiler - Compilation of textual XKB keyboard descriptions
//!
//! Turns an RMLVO name tuple, a keymap text buffer or a keymap file into
//! an immutable [`Keymap`]. The pipeline: the rules engine expands RMLVO
//! names into component include expressions, the include resolver and
//! parser produce one tree per component, and the four section compilers
//! plus the finalizer fold them into the keymap.

use std::path::Path;

use xkb_core::message::MessageCode;
use xkb_core::{log_err, log_warn, CompileError, Context, Keymap};

pub mod action;
pub mod ast;
pub mod compat;
pub mod expr;
pub mod finalize;
pub mod include;
pub mod keycodes;
pub mod parser;
pub mod rules;
pub mod scanner;
pub mod serialize;
pub mod symbols;
pub mod text;
pub mod types;
pub mod vmod;

use ast::{Decl, FileType, IncludeStmt, MapFlags, MergeMode, XkbFile};

pub use rules::{ComponentNames, RuleNames};
pub use serialize::keymap_as_string;

/// The supported keymap text formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeymapFormat {
    #[default]
    TextV1,
}

bitflags::bitflags! {
    /// Flags for keymap compilation. None are currently defined; the
    /// type reserves space in the API.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CompileFlags: u32 {}
}

/// The RMLVO names used when a field is empty or unset, taking the
/// `XKB_DEFAULT_*` environment into account.
pub fn default_rule_names(ctx: &Context) -> RuleNames {
    let get = |var: &str, fallback: &str| ctx.getenv(var).unwrap_or_else(|| fallback.to_owned());
    RuleNames {
        rules: get("XKB_DEFAULT_RULES", "evdev"),
        model: get("XKB_DEFAULT_MODEL", "pc105"),
        layout: get("XKB_DEFAULT_LAYOUT", "us"),
        variant: get("XKB_DEFAULT_VARIANT", ""),
        options: get("XKB_DEFAULT_OPTIONS", ""),
    }
}

fn resolve_names(ctx: &Context, names: &RuleNames) -> RuleNames {
    let defaults = default_rule_names(ctx);
    let pick = |given: &str, fallback: String| {
        if given.is_empty() {
            fallback
        } else {
            given.to_owned()
        }
    };
    RuleNames {
        rules: pick(&names.rules, defaults.rules),
        model: pick(&names.model, defaults.model),
        layout: pick(&names.layout, defaults.layout),
        // Variant and options legitimately stay empty.
        variant: names.variant.clone(),
        options: names.options.clone(),
    }
}

/// Compiles a keymap from RMLVO names resolved through a rules file.
pub fn compile_keymap_from_names(
    ctx: &Context,
    names: &RuleNames,
    _format: KeymapFormat,
    _flags: CompileFlags,
) -> Result<Keymap, CompileError> {
    let resolved = resolve_names(ctx, names);
    let components = rules::components_from_rules(ctx, &resolved)?;
    compile_keymap_from_components(ctx, &components)
}

/// Compiles a keymap from the four component include expressions.
pub fn compile_keymap_from_components(
    ctx: &Context,
    components: &ComponentNames,
) -> Result<Keymap, CompileError> {
    let mut file = XkbFile::new(FileType::Keymap, String::new(), MapFlags::empty());
    for (file_type, stmt) in [
        (FileType::Keycodes, &components.keycodes),
        (FileType::Types, &components.types),
        (FileType::Compat, &components.compat),
        (FileType::Symbols, &components.symbols),
    ] {
        let mut section = XkbFile::new(file_type, String::new(), MapFlags::empty());
        section.defs.push(Decl::Include(IncludeStmt {
            merge: MergeMode::Default,
            stmt: stmt.clone(),
        }));
        file.sections.push(section);
    }
    compile_keymap_file(ctx, &file)
}

/// Compiles a keymap from a full keymap text.
pub fn compile_keymap_from_string(
    ctx: &Context,
    input: &str,
    _format: KeymapFormat,
    _flags: CompileFlags,
) -> Result<Keymap, CompileError> {
    let files = parser::parse_string(ctx, input.as_bytes(), "(input string)")?;
    let Some(file) = files.into_iter().find(|f| f.file_type == FileType::Keymap) else {
        log_err!(
            ctx,
            Some(MessageCode::KeymapCompilationFailed),
            "failed to parse input xkb string: no xkb_keymap block found"
        );
        return Err(CompileError::MissingSection {
            section: "xkb_keymap",
        });
    };
    compile_keymap_file(ctx, &file)
}

/// Compiles a keymap from a file on disk.
pub fn compile_keymap_from_file(
    ctx: &Context,
    path: &Path,
    format: KeymapFormat,
    flags: CompileFlags,
) -> Result<Keymap, CompileError> {
    let contents = std::fs::read(path)?;
    let input = String::from_utf8_lossy(&contents);
    compile_keymap_from_string(ctx, &input, format, flags)
}

/// Compiles a parsed keymap file: one section of each kind, in any
/// order, compiled keycodes first and symbols last.
fn compile_keymap_file(ctx: &Context, file: &XkbFile) -> Result<Keymap, CompileError> {
    let mut sections: [Option<&XkbFile>; 4] = [None; 4];
    for section in &file.sections {
        let slot = match section.file_type {
            FileType::Keycodes => 0,
            FileType::Types => 1,
            FileType::Compat => 2,
            FileType::Symbols => 3,
            FileType::Geometry => {
                log_warn!(
                    ctx,
                    Some(MessageCode::UnsupportedGeometrySection),
                    "geometry sections are not supported; ignored"
                );
                continue;
            }
            _ => {
                log_err!(
                    ctx,
                    Some(MessageCode::WrongStatementType),
                    "cannot nest a {} inside a keymap",
                    section.file_type.label()
                );
                continue;
            }
        };
        if sections[slot].is_some() {
            log_warn!(
                ctx,
                Some(MessageCode::DuplicateEntry),
                "more than one {} section in the keymap; all sections after the first ignored",
                section.file_type.label()
            );
            continue;
        }
        sections[slot] = Some(section);
    }

    for (slot, name) in [
        (0, "xkb_keycodes"),
        (1, "xkb_types"),
        (2, "xkb_compatibility"),
        (3, "xkb_symbols"),
    ] {
        if sections[slot].is_none() {
            log_err!(
                ctx,
                Some(MessageCode::KeymapCompilationFailed),
                "required section {} missing from keymap",
                name
            );
            return Err(CompileError::MissingSection { section: name });
        }
    }

    let mut keymap = Keymap::new(ctx.clone());
    let result = (|| -> Result<(), CompileError> {
        keycodes::compile_keycodes(ctx, sections[0].unwrap(), &mut keymap, MergeMode::Override)?;
        types::compile_key_types(ctx, sections[1].unwrap(), &mut keymap, MergeMode::Override)?;
        compat::compile_compat(ctx, sections[2].unwrap(), &mut keymap, MergeMode::Override)?;
        symbols::compile_symbols(ctx, sections[3].unwrap(), &mut keymap, MergeMode::Override)?;
        Ok(())
    })();
    if let Err(err) = result {
        log_err!(
            ctx,
            Some(MessageCode::KeymapCompilationFailed),
            "failed to compile keymap: {}",
            err
        );
        return Err(err);
    }

    finalize::finalize_keymap(ctx, &mut keymap);
    Ok(keymap)
}
