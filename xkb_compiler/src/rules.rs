//! RMLVO rules: expanding (rules, model, layout, variant, options) into
//! the keycodes/types/compat/symbols component names.
//!
//! A rules file is line oriented: mapping headers (`! model layout =
//! symbols`), group definitions (`! $pcmodels = pc101 pc105 ...`) and
//! rule lines matched against the most recent header. Rules fall into
//! three buckets (normal, append, option) applied in that order, with
//! wildcard matches deferred within each pass so exact matches win.

use xkb_core::message::MessageCode;
use xkb_core::{log_err, log_warn, CompileError, Context};

use crate::ast::FileType;
use crate::include::find_file_in_xkb_path;

/// The number of indexable layouts/variants.
const MAX_LAYOUTS: usize = 4;

/// The names the user supplies to select a keymap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleNames {
    pub rules: String,
    pub model: String,
    pub layout: String,
    pub variant: String,
    pub options: String,
}

/// The component include expressions a rules file resolves to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentNames {
    pub keycodes: String,
    pub types: String,
    pub compat: String,
    pub symbols: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Word {
    Model,
    Layout,
    Variant,
    Option,
    Keycodes,
    Symbols,
    Types,
    Compat,
    Geometry,
}

const WORD_NAMES: &[(&str, Word)] = &[
    ("model", Word::Model),
    ("layout", Word::Layout),
    ("variant", Word::Variant),
    ("option", Word::Option),
    ("keycodes", Word::Keycodes),
    ("symbols", Word::Symbols),
    ("types", Word::Types),
    ("compat", Word::Compat),
    ("geometry", Word::Geometry),
];

fn is_part(word: Word) -> bool {
    matches!(word, Word::Model | Word::Layout | Word::Variant | Word::Option)
}

#[derive(Debug, Default)]
struct Mapping {
    number: u32,
    entries: Vec<(Word, usize)>,
}

#[derive(Debug)]
struct GroupDef {
    name: String,
    words: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    Normal,
    Append,
    Option,
}

#[derive(Debug)]
struct Rule {
    number: u32,
    model: Option<String>,
    layout: Option<String>,
    layout_num: usize,
    variant: Option<String>,
    variant_num: usize,
    option: Option<String>,
    keycodes: Option<String>,
    symbols: Option<String>,
    types: Option<String>,
    compat: Option<String>,
    kind: RuleKind,
    pending: bool,
}

#[derive(Debug, Default)]
struct Rules {
    rules: Vec<Rule>,
    groups: Vec<GroupDef>,
}

/// Logical lines: `\` continues a line, `//` comments to end of line,
/// runs of whitespace collapse to single spaces, and `!` is only legal
/// at the start of a line.
fn read_lines(ctx: &Context, text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut line = String::new();
    let mut space_pending = false;
    let mut slash_pending = false;
    let mut in_comment = false;
    let mut discard = false;

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let mut ch = c;
        if ch == '\\' {
            match chars.next() {
                None => break,
                Some('\n') => {
                    in_comment = false;
                    ch = ' ';
                }
                Some(other) => ch = other,
            }
        }

        if ch == '\n' {
            if !line.is_empty() && !discard {
                out.push(std::mem::take(&mut line));
            }
            line.clear();
            space_pending = false;
            slash_pending = false;
            in_comment = false;
            discard = false;
            continue;
        }

        if in_comment || discard {
            continue;
        }

        if ch == '/' {
            if slash_pending {
                in_comment = true;
                slash_pending = false;
            } else {
                slash_pending = true;
            }
            continue;
        }
        if slash_pending {
            if space_pending {
                line.push(' ');
                space_pending = false;
            }
            line.push('/');
            slash_pending = false;
        }

        if ch.is_whitespace() {
            if !line.is_empty() {
                space_pending = true;
            }
            continue;
        }

        if ch == '!' && !line.is_empty() {
            log_warn!(
                ctx,
                Some(MessageCode::InvalidRulesSyntax),
                "the '!' is legal only at the start of a rules line; line ignored"
            );
            line.clear();
            discard = true;
            continue;
        }

        if space_pending {
            line.push(' ');
            space_pending = false;
        }
        line.push(ch);
    }
    if !line.is_empty() && !discard {
        out.push(line);
    }
    out
}

/// Parses a `[N]` index suffix. Returns the consumed byte count and the
/// index; index 0 when there is no bracket, `None` on a malformed or
/// empty bracket.
fn get_index(s: &str) -> (usize, Option<usize>) {
    let Some(rest) = s.strip_prefix('[') else {
        return (0, Some(0));
    };
    let Some(end) = rest.find(']') else {
        return (0, None);
    };
    match rest[..end].parse::<usize>() {
        Ok(n) => (end + 2, Some(n)),
        Err(_) => (0, None),
    }
}

fn match_mapping_line(ctx: &Context, line: &str, mapping: &mut Mapping) {
    let number = mapping.number;
    mapping.entries.clear();

    let mut has_part = false;
    let mut has_component = false;
    for tok in line[1..].split(' ') {
        if tok.is_empty() || tok == "=" {
            continue;
        }

        let Some(&(name, word)) = WORD_NAMES
            .iter()
            .find(|(name, _)| tok.starts_with(name))
        else {
            log_warn!(
                ctx,
                Some(MessageCode::InvalidRulesSyntax),
                "unknown component \"{}\" in a rules mapping; ignored",
                tok
            );
            continue;
        };

        let index = if tok.len() > name.len() {
            let (consumed, index) = get_index(&tok[name.len()..]);
            let valid = matches!(word, Word::Layout | Word::Variant)
                && consumed == tok.len() - name.len();
            match index {
                Some(n) if valid && (1..=MAX_LAYOUTS).contains(&n) => n,
                _ => {
                    log_warn!(
                        ctx,
                        Some(MessageCode::InvalidRulesSyntax),
                        "illegal index in \"{}\"; only layout and variant take an index 1..{}",
                        tok,
                        MAX_LAYOUTS
                    );
                    continue;
                }
            }
        } else {
            0
        };

        if mapping
            .entries
            .iter()
            .any(|&(w, i)| w == word && i == index)
        {
            log_warn!(
                ctx,
                Some(MessageCode::InvalidRulesSyntax),
                "component \"{}\" listed twice in a mapping; second definition ignored",
                tok
            );
            continue;
        }

        has_part |= is_part(word);
        has_component |= !is_part(word);
        mapping.entries.push((word, index));
    }

    if !has_part || !has_component {
        log_warn!(
            ctx,
            Some(MessageCode::InvalidRulesSyntax),
            "a mapping needs at least one MLVO part and one component; illegal mapping ignored"
        );
        mapping.entries.clear();
        mapping.number = number;
        return;
    }
    mapping.number = number + 1;
}

fn match_group_line(line: &str) -> Option<GroupDef> {
    let dollar = line.find('$')?;
    let rest = &line[dollar..];
    let space = rest.find(' ')?;
    let name = rest[..space].to_owned();
    let words: Vec<String> = rest[space..]
        .split(' ')
        .filter(|w| !w.is_empty() && *w != "=")
        .map(str::to_owned)
        .collect();
    if words.is_empty() {
        return None;
    }
    Some(GroupDef { name, words })
}

fn match_rule_line(ctx: &Context, line: &str, mapping: &Mapping) -> Option<Rule> {
    if mapping.entries.is_empty() {
        log_warn!(
            ctx,
            Some(MessageCode::InvalidRulesSyntax),
            "must have a mapping before the first line of data; line ignored"
        );
        return None;
    }

    let mut names: [Option<&str>; 9] = [None; 9];
    let mut append = false;
    let mut nread = 0usize;
    for tok in line.split(' ') {
        if tok.is_empty() || tok == "=" {
            continue;
        }
        if nread >= mapping.entries.len() {
            log_warn!(
                ctx,
                Some(MessageCode::InvalidRulesSyntax),
                "too many words on a rules line; extra word \"{}\" ignored",
                tok
            );
            continue;
        }
        names[mapping.entries[nread].0 as usize] = Some(tok);
        if tok.starts_with('+') || tok.starts_with('|') {
            append = true;
        }
        nread += 1;
    }

    if nread < mapping.entries.len() {
        log_warn!(
            ctx,
            Some(MessageCode::InvalidRulesSyntax),
            "too few words on a rules line; line ignored: {}",
            line
        );
        return None;
    }

    let get = |word: Word| names[word as usize].map(str::to_owned);
    let kind = if get(Word::Option).is_some() {
        RuleKind::Option
    } else if append {
        RuleKind::Append
    } else {
        RuleKind::Normal
    };

    let mut layout_num = 0;
    let mut variant_num = 0;
    for &(word, index) in &mapping.entries {
        if index != 0 {
            if word == Word::Layout {
                layout_num = index;
            }
            if word == Word::Variant {
                variant_num = index;
            }
        }
    }

    Some(Rule {
        number: mapping.number,
        model: get(Word::Model),
        layout: get(Word::Layout),
        layout_num,
        variant: get(Word::Variant),
        variant_num,
        option: get(Word::Option),
        keycodes: get(Word::Keycodes),
        symbols: get(Word::Symbols),
        types: get(Word::Types),
        compat: get(Word::Compat),
        kind,
        pending: false,
    })
}

fn load_rules(ctx: &Context, text: &str) -> Rules {
    let mut rules = Rules::default();
    let mut mapping = Mapping::default();

    for line in read_lines(ctx, text) {
        if !line.starts_with('!') {
            if let Some(rule) = match_rule_line(ctx, &line, &mapping) {
                rules.rules.push(rule);
            }
            continue;
        }
        let after = line[1..].trim_start();
        if after.starts_with('$') {
            if let Some(group) = match_group_line(&line) {
                rules.groups.push(group);
            }
            continue;
        }
        match_mapping_line(ctx, &line, &mut mapping);
    }
    rules
}

/// The MLVO values with layouts and variants split by index: a single
/// value sits at index 0, comma-separated ones at 1..=4.
#[derive(Debug, Default)]
struct MultiDefs {
    model: Option<String>,
    layout: [Option<String>; MAX_LAYOUTS + 1],
    variant: [Option<String>; MAX_LAYOUTS + 1],
    options: Option<String>,
}

fn squeeze_spaces(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn split_multi(value: &str, out: &mut [Option<String>; MAX_LAYOUTS + 1]) {
    if !value.contains(',') {
        out[0] = Some(value.to_owned());
        return;
    }
    let squeezed = squeeze_spaces(value);
    for (i, part) in squeezed.split(',').enumerate() {
        if i >= MAX_LAYOUTS {
            break;
        }
        out[i + 1] = Some(part.to_owned());
    }
}

fn make_multi_defs(names: &RuleNames) -> MultiDefs {
    let mut mdefs = MultiDefs::default();
    if !names.model.is_empty() {
        mdefs.model = Some(names.model.clone());
    }
    if !names.options.is_empty() {
        mdefs.options = Some(squeeze_spaces(&names.options));
    }
    if !names.layout.is_empty() {
        split_multi(&names.layout, &mut mdefs.layout);
    }
    if !names.variant.is_empty() {
        split_multi(&names.variant, &mut mdefs.variant);
    }
    mdefs
}

fn match_group_member(rules: &Rules, group_name: &str, name: &str) -> bool {
    rules
        .groups
        .iter()
        .find(|g| g.name == group_name)
        .is_some_and(|g| g.words.iter().any(|w| w == name))
}

fn match_one_of(haystack: &str, needle: &str) -> bool {
    haystack.split(',').any(|tok| tok == needle)
}

#[derive(Debug, Default)]
struct Components {
    keycodes: Option<String>,
    symbols: Option<String>,
    types: Option<String>,
    compat: Option<String>,
}

/// Sets the target if empty; values starting with `+` or `!` concatenate
/// instead.
fn apply(src: &Option<String>, dst: &mut Option<String>) {
    let Some(src) = src else { return };
    if src.starts_with('+') || src.starts_with('!') {
        match dst {
            Some(dst) => dst.push_str(src),
            None => *dst = Some(src.clone()),
        }
    } else if dst.is_none() {
        *dst = Some(src.clone());
    }
}

fn apply_rule(rule: &mut Rule, kccgst: &mut Components) {
    rule.pending = false;
    apply(&rule.keycodes, &mut kccgst.keycodes);
    apply(&rule.symbols, &mut kccgst.symbols);
    apply(&rule.types, &mut kccgst.types);
    apply(&rule.compat, &mut kccgst.compat);
}

/// Checks one rule against the MLVO values; returns the rule number on a
/// match (wildcards defer by marking the rule pending).
fn apply_rule_if_matches(
    rules_groups: &Rules,
    rule: &mut Rule,
    mdefs: &MultiDefs,
    kccgst: &mut Components,
) -> u32 {
    let mut pending = false;

    if let Some(model) = &rule.model {
        let Some(mmodel) = &mdefs.model else { return 0 };
        if model == "*" {
            pending = true;
        } else if model.starts_with('$') {
            if !match_group_member(rules_groups, model, mmodel) {
                return 0;
            }
        } else if model != mmodel {
            return 0;
        }
    }

    if let Some(option) = &rule.option {
        let Some(options) = &mdefs.options else { return 0 };
        if !match_one_of(options, option) {
            return 0;
        }
    }

    if let Some(layout) = &rule.layout {
        let Some(mlayout) = &mdefs.layout[rule.layout_num] else {
            return 0;
        };
        if layout == "*" {
            pending = true;
        } else if layout.starts_with('$') {
            if !match_group_member(rules_groups, layout, mlayout) {
                return 0;
            }
        } else if layout != mlayout {
            return 0;
        }
    }

    if let Some(variant) = &rule.variant {
        let Some(mvariant) = &mdefs.variant[rule.variant_num] else {
            return 0;
        };
        if variant == "*" {
            pending = true;
        } else if variant.starts_with('$') {
            if !match_group_member(rules_groups, variant, mvariant) {
                return 0;
            }
        } else if variant != mvariant {
            return 0;
        }
    }

    if pending {
        rule.pending = true;
    } else {
        // Exact match; apply immediately.
        apply_rule(rule, kccgst);
    }
    rule.number
}

fn apply_partial_matches(rules: &mut Rules, kccgst: &mut Components) {
    for rule in &mut rules.rules {
        if rule.pending {
            apply_rule(rule, kccgst);
        }
    }
}

fn apply_matching_rules(
    rules: &mut Rules,
    mdefs: &MultiDefs,
    kccgst: &mut Components,
    kind: RuleKind,
) {
    let mut skip = u32::MAX;
    // The group definitions are read-only during matching; take the
    // rules out to satisfy the borrow.
    let mut rule_list = std::mem::take(&mut rules.rules);
    for rule in &mut rule_list {
        if rule.kind != kind {
            continue;
        }
        // Within the non-option passes, at most one rule per mapping
        // applies; exact matches beat wildcards of the same mapping.
        if kind != RuleKind::Option && rule.number == skip {
            continue;
        }
        skip = apply_rule_if_matches(rules, rule, mdefs, kccgst);
    }
    rules.rules = rule_list;
}

/// Expands `%m`, `%l`, `%v` (with optional `[N]` index and optional
/// affix characters) against the MLVO values. The affix is emitted only
/// when the substituted value is non-empty.
fn substitute_vars(value: Option<String>, mdefs: &MultiDefs) -> Option<String> {
    let value = value?;
    if !value.contains('%') {
        return Some(value);
    }

    let bytes = value.as_bytes();
    let mut out = String::with_capacity(value.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i] as char);
            i += 1;
            continue;
        }
        i += 1;
        if i >= bytes.len() {
            break;
        }

        let mut prefix = None;
        let mut suffix = None;
        match bytes[i] {
            b'+' | b'|' | b'_' | b'-' => {
                prefix = Some(bytes[i] as char);
                i += 1;
            }
            b'(' => {
                prefix = Some('(');
                suffix = Some(')');
                i += 1;
            }
            _ => {}
        }
        if i >= bytes.len() {
            break;
        }

        let var = bytes[i];
        i += 1;
        let (consumed, ndx) = get_index(&value[i..]);
        i += consumed;
        let Some(ndx) = ndx else { continue };

        let replacement = match var {
            b'l' => mdefs.layout.get(ndx).and_then(Option::as_deref),
            b'v' => mdefs.variant.get(ndx).and_then(Option::as_deref),
            b'm' if ndx == 0 => mdefs.model.as_deref(),
            _ => None,
        };
        if let Some(repl) = replacement.filter(|r| !r.is_empty()) {
            if let Some(p) = prefix {
                out.push(p);
            }
            out.push_str(repl);
            if let Some(s) = suffix {
                out.push(s);
            }
        }

        if prefix == Some('(') && bytes.get(i) == Some(&b')') {
            i += 1;
        }
    }
    Some(out)
}

fn get_components(
    rules: &mut Rules,
    names: &RuleNames,
) -> Option<ComponentNames> {
    let mdefs = make_multi_defs(names);
    let mut kccgst = Components::default();

    for rule in &mut rules.rules {
        rule.pending = false;
    }

    for kind in [RuleKind::Normal, RuleKind::Append, RuleKind::Option] {
        apply_matching_rules(rules, &mdefs, &mut kccgst, kind);
        apply_partial_matches(rules, &mut kccgst);
    }

    let keycodes = substitute_vars(kccgst.keycodes, &mdefs)?;
    let symbols = substitute_vars(kccgst.symbols, &mdefs)?;
    let types = substitute_vars(kccgst.types, &mdefs)?;
    let compat = substitute_vars(kccgst.compat, &mdefs)?;

    if keycodes.is_empty() || symbols.is_empty() || types.is_empty() || compat.is_empty() {
        return None;
    }
    Some(ComponentNames {
        keycodes,
        types,
        compat,
        symbols,
    })
}

/// Resolves component names from a rules file found on the include path.
pub fn components_from_rules(
    ctx: &Context,
    names: &RuleNames,
) -> Result<ComponentNames, CompileError> {
    let Some((path, mapping)) = find_file_in_xkb_path(ctx, &names.rules, FileType::Rules) else {
        log_err!(
            ctx,
            Some(MessageCode::CannotResolveRmlvo),
            "could not find the rules file \"{}\" ({} include paths searched)",
            names.rules,
            ctx.include_paths().len()
        );
        return Err(CompileError::CannotResolveRmlvo {
            rules: names.rules.clone(),
        });
    };

    let text = String::from_utf8_lossy(&mapping);
    let mut rules = load_rules(ctx, &text);
    match get_components(&mut rules, names) {
        Some(components) => Ok(components),
        None => {
            log_err!(
                ctx,
                Some(MessageCode::CannotResolveRmlvo),
                "no components returned from the rules file \"{}\"",
                path.display()
            );
            Err(CompileError::CannotResolveRmlvo {
                rules: names.rules.clone(),
            })
        }
    }
}

/// Resolves component names from in-memory rules text.
pub fn components_from_rules_str(
    ctx: &Context,
    names: &RuleNames,
    text: &str,
) -> Result<ComponentNames, CompileError> {
    let mut rules = load_rules(ctx, text);
    get_components(&mut rules, names).ok_or_else(|| {
        log_err!(
            ctx,
            Some(MessageCode::CannotResolveRmlvo),
            "no components returned from the rules \"{}\"",
            names.rules
        );
        CompileError::CannotResolveRmlvo {
            rules: names.rules.clone(),
        }
    })
}
