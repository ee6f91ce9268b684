//! Compilation and runtime context.
//!
//! A [`Context`] owns the atom table, the include path list and the log
//! filter. It is a cheap-clone handle; clones share the same state. A
//! context and everything derived from it belong to a single thread.

use std::cell::{Cell, RefCell};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::atom::{Atom, AtomTable};
use crate::message::MessageCode;

bitflags::bitflags! {
    /// Flags affecting context construction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ContextFlags: u32 {
        /// Do not seed the include path with the default directories.
        const NO_DEFAULT_INCLUDES = 1 << 0;
        /// Ignore all environment variables.
        const NO_ENVIRONMENT_NAMES = 1 << 1;
        /// Use the plain environment even in privileged processes. The
        /// distinction from `secure_getenv` cannot be expressed portably
        /// here; the flag is accepted for API compatibility.
        const NO_SECURE_GETENV = 1 << 2;
    }
}

/// Severity of a log message. Lower values are more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum LogLevel {
    Critical = 10,
    Error = 20,
    Warning = 30,
    Info = 40,
    Debug = 50,
}

impl LogLevel {
    /// Parses a level name or numeric value, as accepted in
    /// `XKB_LOG_LEVEL`.
    pub fn parse(s: &str) -> Option<LogLevel> {
        if let Ok(n) = s.parse::<i32>() {
            return Some(match n {
                i32::MIN..=10 => LogLevel::Critical,
                11..=20 => LogLevel::Error,
                21..=30 => LogLevel::Warning,
                31..=40 => LogLevel::Info,
                _ => LogLevel::Debug,
            });
        }
        match s {
            s if s.eq_ignore_ascii_case("critical") => Some(LogLevel::Critical),
            s if s.eq_ignore_ascii_case("error") => Some(LogLevel::Error),
            s if s.eq_ignore_ascii_case("warning") => Some(LogLevel::Warning),
            s if s.eq_ignore_ascii_case("info") => Some(LogLevel::Info),
            s if s.eq_ignore_ascii_case("debug") => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

const DEFAULT_XKB_ROOT: &str = "/usr/share/X11/xkb";
const DEFAULT_XKB_EXTRA_PATH: &str = "/etc/xkb";

struct ContextInner {
    flags: ContextFlags,
    atoms: RefCell<AtomTable>,
    include_paths: RefCell<Vec<PathBuf>>,
    log_level: Cell<LogLevel>,
    log_verbosity: Cell<i32>,
}

/// Shared handle to the context state.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

impl Context {
    /// Creates a context. Unless suppressed by `flags`, the default
    /// include path is appended and `XKB_LOG_LEVEL` / `XKB_LOG_VERBOSITY`
    /// are consulted.
    pub fn new(flags: ContextFlags) -> Self {
        let ctx = Self {
            inner: Rc::new(ContextInner {
                flags,
                atoms: RefCell::new(AtomTable::new()),
                include_paths: RefCell::new(Vec::new()),
                log_level: Cell::new(LogLevel::Error),
                log_verbosity: Cell::new(0),
            }),
        };

        if let Some(level) = ctx.getenv("XKB_LOG_LEVEL").and_then(|v| LogLevel::parse(&v)) {
            ctx.set_log_level(level);
        }
        if let Some(vrb) = ctx.getenv("XKB_LOG_VERBOSITY").and_then(|v| v.parse().ok()) {
            ctx.set_log_verbosity(vrb);
        }

        if !flags.contains(ContextFlags::NO_DEFAULT_INCLUDES) {
            ctx.include_path_append_default();
        }
        ctx
    }

    /// Reads an environment variable, honoring
    /// [`ContextFlags::NO_ENVIRONMENT_NAMES`].
    pub fn getenv(&self, name: &str) -> Option<String> {
        if self.inner.flags.contains(ContextFlags::NO_ENVIRONMENT_NAMES) {
            return None;
        }
        env::var(name).ok()
    }

    pub fn flags(&self) -> ContextFlags {
        self.inner.flags
    }

    /* Atoms. */

    /// Interns `s` in the context's atom table.
    pub fn atom_intern(&self, s: &str) -> Atom {
        self.inner.atoms.borrow_mut().intern(s)
    }

    /// Looks up `s` without interning; [`ATOM_NONE`] when absent.
    pub fn atom_lookup(&self, s: &str) -> Atom {
        self.inner.atoms.borrow().lookup(s)
    }

    /// The string behind `atom`; empty for [`ATOM_NONE`] and unknown
    /// handles.
    pub fn atom_text(&self, atom: Atom) -> Rc<str> {
        self.inner
            .atoms
            .borrow()
            .text(atom)
            .unwrap_or_else(|| Rc::from(""))
    }

    /* Include paths. */

    /// Appends `path` to the include path if it is a readable directory.
    pub fn include_path_append(&self, path: &Path) -> bool {
        if !path.is_dir() {
            self.log_msg(
                LogLevel::Error,
                MessageCode::InvalidPath,
                format_args!("Include path \"{}\" is not a directory", path.display()),
            );
            return false;
        }
        self.inner.include_paths.borrow_mut().push(path.to_path_buf());
        true
    }

    /// Appends the default include directories, most specific first:
    /// `$XDG_CONFIG_HOME/xkb` (or `$HOME/.config/xkb`), `$HOME/.xkb`,
    /// `$XKB_CONFIG_EXTRA_PATH` (or the built-in extra path) and
    /// `$XKB_CONFIG_ROOT` (or the built-in root).
    pub fn include_path_append_default(&self) -> bool {
        let mut appended = false;

        let user_config = self
            .getenv("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| self.getenv("HOME").map(|h| PathBuf::from(h).join(".config")));
        if let Some(dir) = user_config {
            appended |= self.include_path_append(&dir.join("xkb"));
        }
        if let Some(home) = self.getenv("HOME") {
            appended |= self.include_path_append(&PathBuf::from(home).join(".xkb"));
        }

        let extra = self
            .getenv("XKB_CONFIG_EXTRA_PATH")
            .unwrap_or_else(|| DEFAULT_XKB_EXTRA_PATH.to_owned());
        appended |= self.include_path_append(Path::new(&extra));

        let root = self
            .getenv("XKB_CONFIG_ROOT")
            .unwrap_or_else(|| DEFAULT_XKB_ROOT.to_owned());
        appended |= self.include_path_append(Path::new(&root));

        appended
    }

    /// Removes all entries from the include path.
    pub fn include_path_clear(&self) {
        self.inner.include_paths.borrow_mut().clear();
    }

    /// Resets the include path to the default directories.
    pub fn include_path_reset_defaults(&self) -> bool {
        self.include_path_clear();
        self.include_path_append_default()
    }

    /// A snapshot of the current include path.
    pub fn include_paths(&self) -> Vec<PathBuf> {
        self.inner.include_paths.borrow().clone()
    }

    /* Logging. */

    pub fn log_level(&self) -> LogLevel {
        self.inner.log_level.get()
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.inner.log_level.set(level);
    }

    pub fn log_verbosity(&self) -> i32 {
        self.inner.log_verbosity.get()
    }

    /// Sets the verbosity for [`Context::log_vrb`] messages; useful range
    /// 0..=10.
    pub fn set_log_verbosity(&self, verbosity: i32) {
        self.inner.log_verbosity.set(verbosity.clamp(0, 10));
    }

    /// Emits a diagnostic through the `log` facade, prefixed with its
    /// message code. Filtered by the context log level.
    pub fn log_msg(
        &self,
        level: LogLevel,
        code: impl Into<Option<MessageCode>>,
        args: fmt::Arguments<'_>,
    ) {
        if level > self.log_level() {
            return;
        }
        let text = match code.into() {
            Some(code) => format!("[{code}] {args}"),
            None => format!("{args}"),
        };
        match level {
            LogLevel::Critical | LogLevel::Error => log::error!(target: "xkb", "{text}"),
            LogLevel::Warning => log::warn!(target: "xkb", "{text}"),
            LogLevel::Info => log::info!(target: "xkb", "{text}"),
            LogLevel::Debug => log::debug!(target: "xkb", "{text}"),
        }
    }

    /// Emits a verbose informational message, gated by the context
    /// verbosity rather than the log level.
    pub fn log_vrb(
        &self,
        verbosity: i32,
        code: impl Into<Option<MessageCode>>,
        args: fmt::Arguments<'_>,
    ) {
        if verbosity > self.log_verbosity() {
            return;
        }
        let text = match code.into() {
            Some(code) => format!("[{code}] {args}"),
            None => format!("{args}"),
        };
        log::debug!(target: "xkb", "{text}");
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("flags", &self.inner.flags)
            .field("include_paths", &self.inner.include_paths.borrow())
            .field("log_level", &self.inner.log_level.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::ATOM_NONE;

    fn test_ctx() -> Context {
        Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES)
    }

    #[test]
    fn test_atom_facade() {
        let ctx = test_ctx();
        let atom = ctx.atom_intern("AD01");
        assert_eq!(&*ctx.atom_text(atom), "AD01");
        assert_eq!(ctx.atom_lookup("AD01"), atom);
        assert_eq!(ctx.atom_lookup("AE01"), ATOM_NONE);
        assert_eq!(&*ctx.atom_text(ATOM_NONE), "");
    }

    #[test]
    fn test_clones_share_state() {
        let ctx = test_ctx();
        let clone = ctx.clone();
        let atom = ctx.atom_intern("shared");
        assert_eq!(clone.atom_lookup("shared"), atom);
        clone.set_log_level(LogLevel::Debug);
        assert_eq!(ctx.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_no_default_includes_leaves_path_empty() {
        let ctx = test_ctx();
        assert!(ctx.include_paths().is_empty());
    }

    #[test]
    fn test_include_path_append_rejects_non_directory() {
        let ctx = test_ctx();
        assert!(!ctx.include_path_append(Path::new("/nonexistent/xkb/path")));
        assert!(ctx.include_paths().is_empty());
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("ERROR"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("10"), Some(LogLevel::Critical));
        assert_eq!(LogLevel::parse("55"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("bogus"), None);
    }

    #[test]
    fn test_env_suppressed() {
        let ctx = test_ctx();
        assert_eq!(ctx.getenv("HOME"), None);
    }

    #[test]
    fn test_verbosity_clamped() {
        let ctx = test_ctx();
        ctx.set_log_verbosity(42);
        assert_eq!(ctx.log_verbosity(), 10);
    }
}
