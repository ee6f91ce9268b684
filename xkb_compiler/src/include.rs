//! Include statement resolution.
//!
//! Splits include expressions like `pc+us(dvorak):2|extras` into their
//! file groups, locates each file on the context's include path, parses
//! it and selects the requested section. Tracks the active include chain
//! to reject cycles and depth overruns.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use xkb_core::message::MessageCode;
use xkb_core::{log_err, log_vrb, log_warn, CompileError, Context};

use crate::ast::{FileType, MapFlags, MergeMode, XkbFile};
use crate::parser;

/// Hard cap on nested includes.
pub const INCLUDE_MAX_DEPTH: usize = 15;

/// One `file(map):group` group out of an include statement, together
/// with the merge mode introduced by its `+`/`|` separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeGroup {
    pub merge: MergeMode,
    pub file: String,
    pub map: Option<String>,
    /// Explicit layout index (`:2`), used only by the symbols compiler.
    pub explicit_group: Option<u32>,
}

/// Splits an include statement. The first group carries `initial_merge`
/// (the statement keyword); `+` switches to override and `|` to augment
/// for the groups they introduce.
pub fn parse_include_stmt(
    ctx: &Context,
    stmt: &str,
    initial_merge: MergeMode,
) -> Result<Vec<IncludeGroup>, CompileError> {
    let invalid = || {
        log_err!(
            ctx,
            Some(MessageCode::InvalidIncludeStatement),
            "invalid include statement \"{}\"",
            stmt
        );
        CompileError::InvalidIncludeStatement {
            stmt: stmt.to_owned(),
        }
    };

    let mut groups = Vec::new();
    let mut merge = initial_merge;
    let mut rest = stmt;
    while !rest.is_empty() {
        let (token, next_merge, next_rest) = match rest.find(['+', '|']) {
            Some(pos) => {
                let sep = rest.as_bytes()[pos];
                let next = if sep == b'+' {
                    MergeMode::Override
                } else {
                    MergeMode::Augment
                };
                (&rest[..pos], Some(next), &rest[pos + 1..])
            }
            None => (rest, None, ""),
        };

        if token.is_empty() {
            return Err(invalid());
        }

        // Split off the explicit group designator.
        let (token, explicit_group) = match token.split_once(':') {
            Some((head, group)) => {
                let Ok(group) = group.parse::<u32>() else {
                    return Err(invalid());
                };
                if !(1..=crate::expr::MAX_GROUPS).contains(&group) {
                    return Err(invalid());
                }
                (head, Some(group - 1))
            }
            None => (token, None),
        };

        // Split off the map, if any.
        let (file, map) = match token.split_once('(') {
            Some((file, map)) => {
                if file.is_empty() {
                    return Err(invalid());
                }
                let Some(map) = map.strip_suffix(')') else {
                    return Err(invalid());
                };
                (file, Some(map.to_owned()))
            }
            None => (token, None),
        };

        groups.push(IncludeGroup {
            merge,
            file: file.to_owned(),
            map,
            explicit_group,
        });

        match next_merge {
            Some(next) => merge = next,
            None => break,
        }
        rest = next_rest;
    }

    Ok(groups)
}

/// The active include chain, threaded through the section compilers.
#[derive(Debug, Default)]
pub struct IncludeState {
    stack: Vec<String>,
}

impl IncludeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Registers a file about to be processed; fails on cycles and on
    /// exceeding the depth cap.
    fn push(&mut self, ctx: &Context, file: &str) -> Result<(), CompileError> {
        if self.stack.len() >= INCLUDE_MAX_DEPTH {
            log_err!(
                ctx,
                Some(MessageCode::RecursiveInclude),
                "maximum include depth ({}) exceeded while processing \"{}\"",
                INCLUDE_MAX_DEPTH,
                file
            );
            return Err(CompileError::IncludeDepthExceeded {
                depth: INCLUDE_MAX_DEPTH,
            });
        }
        if self.stack.iter().any(|f| f == file) {
            log_err!(
                ctx,
                Some(MessageCode::RecursiveInclude),
                "include cycle: \"{}\" is already being processed ({})",
                file,
                self.stack.join(" -> ")
            );
            return Err(CompileError::RecursiveInclude {
                file: file.to_owned(),
                chain: self.stack.clone(),
            });
        }
        self.stack.push(file.to_owned());
        Ok(())
    }

    fn pop(&mut self) {
        self.stack.pop();
    }
}

/// Searches the include path for `name` under the subdirectory of
/// `file_type` and maps the first match. Absolute paths bypass the
/// search.
pub fn find_file_in_xkb_path(
    ctx: &Context,
    name: &str,
    file_type: FileType,
) -> Option<(PathBuf, Mmap)> {
    let map_at = |path: &Path| -> Option<Mmap> {
        let file = File::open(path).ok()?;
        // Component files are read-only for the compilation.
        unsafe { Mmap::map(&file) }.ok()
    };

    if Path::new(name).is_absolute() {
        let path = PathBuf::from(name);
        return map_at(&path).map(|m| (path, m));
    }

    for dir in ctx.include_paths() {
        let path = dir.join(file_type.include_dir()).join(name);
        if let Some(mapping) = map_at(&path) {
            log_vrb!(
                ctx,
                7,
                None,
                "resolved include \"{}\" to {}",
                name,
                path.display()
            );
            return Some((path, mapping));
        }
    }
    None
}

/// Runs `f` with the include chain extended by `group`'s file, so that
/// nested includes of the selected section see the full chain. The
/// nested section compilation must happen inside `f`.
pub fn with_include_frame<T>(
    ctx: &Context,
    state: &mut IncludeState,
    group: &IncludeGroup,
    f: impl FnOnce(&mut IncludeState) -> T,
) -> Result<T, CompileError> {
    state.push(ctx, &group.file)?;
    let result = f(state);
    state.pop();
    Ok(result)
}

/// Opens, parses and selects the section named by one include group.
pub fn load_include_section(
    ctx: &Context,
    group: &IncludeGroup,
    file_type: FileType,
) -> Result<XkbFile, CompileError> {
    let Some((path, mapping)) = find_file_in_xkb_path(ctx, &group.file, file_type) else {
        log_err!(
            ctx,
            Some(MessageCode::IncludedFileNotFound),
            "cannot find file \"{}\" for {} include; {} include paths searched",
            group.file,
            file_type.include_dir(),
            ctx.include_paths().len()
        );
        return Err(CompileError::IncludeNotFound {
            name: group.file.clone(),
            kind: file_type.include_dir(),
        });
    };

    let files = parser::parse_string(ctx, &mapping, &path.display().to_string())?;
    select_section(ctx, files, group, file_type)
}

/// Picks the section an include group refers to: the named map, else the
/// section flagged `default`, else the first one.
pub fn select_section(
    ctx: &Context,
    files: Vec<XkbFile>,
    group: &IncludeGroup,
    file_type: FileType,
) -> Result<XkbFile, CompileError> {
    let several = files.len() > 1;

    if let Some(map) = &group.map {
        for file in files {
            if file.file_type == file_type && &file.name == map {
                return Ok(file);
            }
        }
        log_err!(
            ctx,
            Some(MessageCode::InvalidIncludedFile),
            "no {} section named \"{}\" in file \"{}\"",
            file_type.label(),
            map,
            group.file
        );
        return Err(CompileError::NoMatchingSection {
            kind: file_type.label(),
            file: group.file.clone(),
            map: map.clone(),
        });
    }

    let mut fallback = None;
    for file in files {
        if file.file_type != file_type {
            continue;
        }
        if file.flags.contains(MapFlags::DEFAULT) {
            return Ok(file);
        }
        if fallback.is_none() {
            fallback = Some(file);
        }
    }

    match fallback {
        Some(file) => {
            if several {
                log_warn!(
                    ctx,
                    Some(MessageCode::MissingDefaultSection),
                    "no map in include statement, but \"{}\" contains several without a \
                     default; using the first defined map, \"{}\"",
                    group.file,
                    file.name
                );
            }
            Ok(file)
        }
        None => {
            log_err!(
                ctx,
                Some(MessageCode::InvalidIncludedFile),
                "included file \"{}\" contains no {} section",
                group.file,
                file_type.label()
            );
            Err(CompileError::NoMatchingSection {
                kind: file_type.label(),
                file: group.file.clone(),
                map: String::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xkb_core::ContextFlags;

    fn ctx() -> Context {
        Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES)
    }

    #[test]
    fn test_parse_single_file() {
        let ctx = ctx();
        let groups = parse_include_stmt(&ctx, "evdev", MergeMode::Default).unwrap();
        assert_eq!(
            groups,
            vec![IncludeGroup {
                merge: MergeMode::Default,
                file: "evdev".into(),
                map: None,
                explicit_group: None,
            }]
        );
    }

    #[test]
    fn test_parse_chain_with_maps_and_groups() {
        let ctx = ctx();
        let groups =
            parse_include_stmt(&ctx, "pc+us(dvorak):2|extras(nav)", MergeMode::Augment).unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].merge, MergeMode::Augment);
        assert_eq!(groups[0].file, "pc");
        assert_eq!(groups[1].merge, MergeMode::Override);
        assert_eq!(groups[1].map.as_deref(), Some("dvorak"));
        assert_eq!(groups[1].explicit_group, Some(1));
        assert_eq!(groups[2].merge, MergeMode::Augment);
        assert_eq!(groups[2].map.as_deref(), Some("nav"));
    }

    #[test]
    fn test_parse_invalid_statements() {
        let ctx = ctx();
        assert!(parse_include_stmt(&ctx, "", MergeMode::Default).is_err());
        assert!(parse_include_stmt(&ctx, "+us", MergeMode::Default).is_err());
        assert!(parse_include_stmt(&ctx, "(map)", MergeMode::Default).is_err());
        assert!(parse_include_stmt(&ctx, "us(broken", MergeMode::Default).is_err());
        assert!(parse_include_stmt(&ctx, "us:9", MergeMode::Default).is_err());
    }

    #[test]
    fn test_depth_cap() {
        let ctx = ctx();
        let mut state = IncludeState::new();
        for i in 0..INCLUDE_MAX_DEPTH {
            state.push(&ctx, &format!("file{i}")).unwrap();
        }
        let err = state.push(&ctx, "one-too-many").unwrap_err();
        assert!(matches!(err, CompileError::IncludeDepthExceeded { depth } if depth == 15));
    }

    #[test]
    fn test_cycle_detection() {
        let ctx = ctx();
        let mut state = IncludeState::new();
        state.push(&ctx, "a").unwrap();
        state.push(&ctx, "b").unwrap();
        let err = state.push(&ctx, "a").unwrap_err();
        match err {
            CompileError::RecursiveInclude { file, chain } => {
                assert_eq!(file, "a");
                assert_eq!(chain, vec!["a".to_owned(), "b".to_owned()]);
            }
            other => panic!("expected recursive include, got {other:?}"),
        }
    }

    #[test]
    fn test_select_section_prefers_default_flag() {
        let ctx = ctx();
        let files = vec![
            XkbFile::new(FileType::Symbols, "first".into(), MapFlags::empty()),
            XkbFile::new(FileType::Symbols, "second".into(), MapFlags::DEFAULT),
        ];
        let group = IncludeGroup {
            merge: MergeMode::Default,
            file: "f".into(),
            map: None,
            explicit_group: None,
        };
        let section = select_section(&ctx, files, &group, FileType::Symbols).unwrap();
        assert_eq!(section.name, "second");
    }

    #[test]
    fn test_select_section_by_name() {
        let ctx = ctx();
        let files = vec![
            XkbFile::new(FileType::Symbols, "first".into(), MapFlags::empty()),
            XkbFile::new(FileType::Symbols, "second".into(), MapFlags::empty()),
        ];
        let group = IncludeGroup {
            merge: MergeMode::Default,
            file: "f".into(),
            map: Some("second".into()),
            explicit_group: None,
        };
        let section = select_section(&ctx, files, &group, FileType::Symbols).unwrap();
        assert_eq!(section.name, "second");

        let files = vec![XkbFile::new(FileType::Symbols, "first".into(), MapFlags::empty())];
        let group = IncludeGroup {
            map: Some("missing".into()),
            ..group
        };
        assert!(select_section(&ctx, files, &group, FileType::Symbols).is_err());
    }
}
