//! Registry of diagnostic message codes.
//!
//! Every diagnostic the compiler or runtime can emit carries a stable
//! numeric identifier, rendered as an `[XKB-NNN]` prefix on the log line.
//! The numbers are part of the public diagnostic surface and must not be
//! reassigned.

use std::fmt;

/// Stable identifier of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageCode {
    /// Malformed number literal.
    MalformedNumberLiteral = 34,
    /// Conflicting "preserve" entries in a key type.
    ConflictingKeyTypePreserveEntries = 43,
    /// Unsupported modifier mask.
    UnsupportedModifierMask = 60,
    /// Expected an array entry, but the index is missing.
    ExpectedArrayEntry = 77,
    /// Invalid numeric keysym.
    InvalidNumericKeysym = 82,
    /// Illegal keycode alias with the name of a real key.
    IllegalKeycodeAlias = 101,
    /// Unrecognized keysym.
    UnrecognizedKeysym = 107,
    /// A virtual modifier is used before being declared.
    UndeclaredVirtualModifier = 123,
    /// The type of the statement is not allowed in the context.
    WrongStatementType = 150,
    /// The given path is invalid.
    InvalidPath = 161,
    /// Geometry sections are not supported.
    UnsupportedGeometrySection = 172,
    /// No key type could be inferred.
    CannotInferKeyType = 183,
    /// Invalid escape sequence in a string.
    InvalidEscapeSequence = 193,
    /// The result of a key type "preserve" entry must be a subset of its
    /// input modifiers.
    IllegalKeyTypePreserveResult = 195,
    /// Syntax error in the include statement.
    InvalidIncludeStatement = 203,
    /// A modmap entry is invalid.
    InvalidModmapEntry = 206,
    /// A group index is not supported.
    UnsupportedGroupIndex = 237,
    /// The name of a key type level is defined multiple times.
    ConflictingKeyTypeLevelNames = 239,
    /// Invalid statement setting default values.
    InvalidSetDefaultStatement = 254,
    /// Conflicting "map" entries in a type definition.
    ConflictingKeyTypeMapEntry = 266,
    /// Use of an undefined key type.
    UndefinedKeyType = 286,
    /// A keysym name has been deprecated.
    DeprecatedKeysymName = 302,
    /// A group name was defined for a group other than the first one.
    NonBaseGroupName = 305,
    /// A shift level is not supported.
    UnsupportedShiftLevel = 312,
    /// Could not find a file used in an include statement.
    IncludedFileNotFound = 338,
    /// Use of an operator that is unknown and thus unsupported.
    UnknownOperator = 345,
    /// Use of a legacy X11 action that is not supported.
    UnsupportedLegacyAction = 362,
    /// An entry is duplicated and will be ignored.
    DuplicateEntry = 378,
    /// Included files form a cycle, or the include depth was exceeded.
    RecursiveInclude = 386,
    /// Conflicting definitions of a key type.
    ConflictingKeyTypeDefinitions = 407,
    /// A global defaults statement is in a wrong scope.
    GlobalDefaultsWrongScope = 428,
    /// Missing default section in an included file.
    MissingDefaultSection = 433,
    /// Conflicting keysyms while merging keys.
    ConflictingKeySymbol = 461,
    /// The operation is invalid in the context.
    InvalidOperation = 478,
    /// Numeric keysym other than 0-9.
    NumericKeysym = 489,
    /// Extra symbols were ignored.
    ExtraSymbolsIgnored = 516,
    /// Conflicting definitions of a key name or alias.
    ConflictingKeyName = 523,
    /// Invalid file encoding.
    InvalidFileEncoding = 542,
    /// A field has not the expected type.
    WrongFieldType = 578,
    /// Cannot resolve a given (rules, model, layout, variant, options)
    /// configuration.
    CannotResolveRmlvo = 595,
    /// Invalid real modifier.
    InvalidRealModifier = 623,
    /// Unknown escape sequence in a string literal.
    UnknownCharEscapeSequence = 645,
    /// The target file of an include statement could not be processed.
    InvalidIncludedFile = 661,
    /// A level has a different number of keysyms and actions.
    IncompatibleActionsAndKeysymsCount = 693,
    /// A key defines multiple groups at once.
    MultipleGroupsAtOnce = 700,
    /// A legacy X11 symbol field is not supported.
    UnsupportedSymbolsField = 711,
    /// The XKB syntax is invalid and the file cannot be parsed.
    InvalidXkbSyntax = 769,
    /// Reference to an undefined keycode.
    UndefinedKeycode = 770,
    /// An expression has not the expected type.
    InvalidExpressionType = 784,
    /// A value is invalid and will be ignored.
    InvalidValue = 796,
    /// Conflicting modmap definitions.
    ConflictingModmap = 800,
    /// A field is unknown and will be ignored.
    UnknownField = 812,
    /// Keymap compilation failed.
    KeymapCompilationFailed = 822,
    /// Unknown action type.
    UnknownActionType = 844,
    /// Conflicting actions while merging keys.
    ConflictingKeyAction = 883,
    /// Conflicting key types while merging groups.
    ConflictingKeyTypeMergingGroups = 893,
    /// Conflicting symbols entry for a key.
    ConflictingKeySymbolsEntry = 901,
    /// Missing group index in a group name entry.
    MissingSymbolsGroupNameIndex = 903,
    /// Conflicting fields while merging keys.
    ConflictingKeyFields = 935,
    /// An identifier is used but is not built-in.
    InvalidIdentifier = 949,
    /// Use of a symbol not defined in the keymap.
    UnresolvedKeymapSymbol = 965,
    /// The rules syntax is invalid and the file cannot be parsed.
    InvalidRulesSyntax = 967,
    /// Some modifiers used in a key type "map" or "preserve" entry are not
    /// declared.
    UndeclaredModifiersInKeyType = 971,
}

impl MessageCode {
    /// The stable numeric identifier.
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XKB-{:03}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(MessageCode::MalformedNumberLiteral.code(), 34);
        assert_eq!(MessageCode::RecursiveInclude.code(), 386);
        assert_eq!(MessageCode::KeymapCompilationFailed.code(), 822);
        assert_eq!(MessageCode::UndeclaredModifiersInKeyType.code(), 971);
    }

    #[test]
    fn test_display_prefix() {
        assert_eq!(MessageCode::MalformedNumberLiteral.to_string(), "XKB-034");
        assert_eq!(MessageCode::KeymapCompilationFailed.to_string(), "XKB-822");
    }
}
