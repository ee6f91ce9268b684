//! End-to-end compilation tests against a miniature on-disk data tree:
//! RMLVO resolution, include handling, merge modes and the runtime state
//! machine driving the compiled keymaps.

use std::fs;
use std::path::Path;
use std::rc::Rc;

use tempfile::TempDir;

use xkb_compiler::{
    compile_keymap_from_components, compile_keymap_from_names, compile_keymap_from_string,
    keymap_as_string, CompileFlags, ComponentNames, KeymapFormat, RuleNames,
};
use xkb_core::{
    CompileError, Context, ContextFlags, KeyDirection, Keymap, Keysym, State, StateComponent,
};

const KC_AD01: u32 = 24;
const KC_AD02: u32 = 25;
const KC_AC01: u32 = 38;
const KC_LFSH: u32 = 50;
const KC_LVL2: u32 = 92;
const KC_GRPK: u32 = 108;

fn write(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Builds a small but complete XKB data tree.
fn data_tree() -> TempDir {
    let tree = TempDir::new().unwrap();
    let root = tree.path();

    write(
        root,
        "rules/evdev",
        r#"
! model = keycodes
  * = evdev

! model = types
  * = complete

! model = compat
  * = complete

! model layout = symbols
  * * = pc+%l%(v)

! model layout[1] layout[2] = symbols
  * * * = pc+%l[1]%(v[1])+%l[2]%(v[2]):2
"#,
    );

    write(
        root,
        "keycodes/evdev",
        r#"
default xkb_keycodes "evdev" {
    minimum = 8;
    maximum = 255;
    <ESC>  = 9;
    <AD01> = 24;
    <AD02> = 25;
    <AC01> = 38;
    <LFSH> = 50;
    <LVL2> = 92;
    <GRPK> = 108;
    alias <LatQ> = <AD01>;
    indicator 1 = "Caps Lock";
};
"#,
    );

    write(
        root,
        "types/complete",
        r#"
default xkb_types "complete" {
    type "ONE_LEVEL" {
        modifiers = none;
        level_name[Level1] = "Any";
    };
    type "TWO_LEVEL" {
        modifiers = Shift;
        map[Shift] = Level2;
        level_name[Level1] = "Base";
        level_name[Level2] = "Shift";
    };
    type "ALPHABETIC" {
        modifiers = Shift+Lock;
        map[Shift] = Level2;
        map[Lock] = Level2;
        level_name[Level1] = "Base";
        level_name[Level2] = "Caps";
    };
};
"#,
    );

    write(
        root,
        "compat/complete",
        r#"
default xkb_compatibility "complete" {
    interpret.repeat= False;
    interpret Shift_L+AnyOf(all) {
        action= SetMods(modifiers=Shift);
    };
    interpret ISO_Level2_Latch+AnyOf(all) {
        action= LatchMods(modifiers=Shift,clearLocks,latchToLock);
    };
    interpret ISO_Next_Group+AnyOfOrNone(all) {
        action= LockGroup(group=+1);
    };
    interpret Any+AnyOf(all) {
        action= SetMods(modifiers=modMapMods);
    };
    indicator "Caps Lock" {
        whichModState= Locked;
        modifiers= Lock;
    };
};
"#,
    );

    write(
        root,
        "symbols/pc",
        r#"
default xkb_symbols "pc105" {
    key <ESC>  { [ Escape ] };
    key <LFSH> { [ Shift_L ] };
    key <LVL2> { [ ISO_Level2_Latch ] };
    key <GRPK> { [ ISO_Next_Group ] };
    modifier_map Shift { Shift_L };
};
"#,
    );

    write(
        root,
        "symbols/us",
        r#"
default xkb_symbols "basic" {
    name[Group1]= "English (US)";
    key <AD01> { [ q, Q ] };
    key <AD02> { [ w, W ] };
    key <AC01> { [ a, A ] };
};
"#,
    );

    write(
        root,
        "symbols/de",
        r#"
default xkb_symbols "basic" {
    name[Group1]= "German";
    key <AD01> { [ q, at ] };
    key <AD02> { [ w, W ] };
    key <AC01> { [ a, A ] };
};
"#,
    );

    tree
}

fn test_ctx(tree: &TempDir) -> Context {
    let ctx = Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES);
    assert!(ctx.include_path_append(tree.path()));
    ctx
}

fn compile_rmlvo(ctx: &Context, layout: &str, variant: &str) -> Keymap {
    let names = RuleNames {
        rules: "evdev".into(),
        model: "pc105".into(),
        layout: layout.into(),
        variant: variant.into(),
        options: String::new(),
    };
    compile_keymap_from_names(ctx, &names, KeymapFormat::TextV1, CompileFlags::empty())
        .expect("compilation failed")
}

fn sym(name: &str) -> Keysym {
    Keysym::from_name(name).unwrap()
}

#[test]
fn test_rmlvo_us_compiles_and_shifts() {
    let tree = data_tree();
    let ctx = test_ctx(&tree);
    let keymap = compile_rmlvo(&ctx, "us", "");

    assert!(keymap
        .types
        .iter()
        .any(|t| &*keymap.context().atom_text(t.name) == "ONE_LEVEL"));
    assert_eq!(keymap.key_by_name("AD01"), Some(KC_AD01));
    assert_eq!(keymap.key_by_name("LatQ"), Some(KC_AD01), "aliases resolve");
    assert_eq!(keymap.layout_get_name(0).as_deref(), Some("English (US)"));

    let mut state = State::new(Rc::new(keymap));
    assert_eq!(state.key_get_one_sym(KC_AD01), sym("q"));
    state.update_key(KC_LFSH, KeyDirection::Down);
    assert_eq!(state.key_get_one_sym(KC_AD01), sym("Q"));
    state.update_key(KC_LFSH, KeyDirection::Up);
    assert_eq!(state.key_get_one_sym(KC_AD01), sym("q"));
}

#[test]
fn test_modifier_latch() {
    let tree = data_tree();
    let ctx = test_ctx(&tree);
    let keymap = compile_rmlvo(&ctx, "us", "");
    let mut state = State::new(Rc::new(keymap));

    state.update_key(KC_LVL2, KeyDirection::Down);
    state.update_key(KC_LVL2, KeyDirection::Up);
    assert!(state.mod_name_is_active("Shift", StateComponent::MODS_LATCHED));

    // The latch applies to the next key press...
    state.update_key(KC_AD01, KeyDirection::Down);
    assert_eq!(state.key_get_one_sym(KC_AD01), sym("Q"));
    state.update_key(KC_AD01, KeyDirection::Up);

    // ...and is spent afterwards.
    state.update_key(KC_AD02, KeyDirection::Down);
    assert_eq!(state.key_get_one_sym(KC_AD02), sym("w"));
}

#[test]
fn test_group_lock_and_wrap() {
    let tree = data_tree();
    let ctx = test_ctx(&tree);
    let keymap = compile_rmlvo(&ctx, "us,de", "");
    assert_eq!(keymap.num_layouts(), 2);
    assert_eq!(keymap.layout_get_name(0).as_deref(), Some("English (US)"));
    assert_eq!(keymap.layout_get_name(1).as_deref(), Some("German"));

    let mut state = State::new(Rc::new(keymap));
    state.update_key(KC_GRPK, KeyDirection::Down);
    state.update_key(KC_GRPK, KeyDirection::Up);
    assert_eq!(state.serialize_layout(StateComponent::LAYOUT_EFFECTIVE), 1);
    state.update_key(KC_LFSH, KeyDirection::Down);
    assert_eq!(state.key_get_one_sym(KC_AD01), sym("at"));
}

#[test]
fn test_update_mask_wraps_out_of_range_layout() {
    let tree = data_tree();
    let ctx = test_ctx(&tree);
    let keymap = compile_rmlvo(&ctx, "us,de", "");
    let mut state = State::new(Rc::new(keymap));

    state.update_mask(0, 0, 0, 0, 0, 5);
    // 5 mod 2 layouts = 1.
    assert_eq!(state.serialize_layout(StateComponent::LAYOUT_EFFECTIVE), 1);
}

#[test]
fn test_include_cycle_is_fatal() {
    let tree = data_tree();
    write(
        tree.path(),
        "symbols/cycle_a",
        r#"xkb_symbols "a" { include "cycle_b" };"#,
    );
    write(
        tree.path(),
        "symbols/cycle_b",
        r#"xkb_symbols "b" { include "cycle_a" };"#,
    );
    let ctx = test_ctx(&tree);

    let err = compile_keymap_from_components(
        &ctx,
        &ComponentNames {
            keycodes: "evdev".into(),
            types: "complete".into(),
            compat: "complete".into(),
            symbols: "cycle_a".into(),
        },
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::RecursiveInclude { .. }));
}

#[test]
fn test_include_depth_cap() {
    let tree = data_tree();
    for i in 1..=16 {
        let body = if i == 16 {
            r#"xkb_symbols { key <AD01> { [ q ] }; };"#.to_owned()
        } else {
            format!(r#"xkb_symbols {{ include "chain_{}" }};"#, i + 1)
        };
        write(tree.path(), &format!("symbols/chain_{i}"), &body);
    }
    let ctx = test_ctx(&tree);
    let components = |symbols: &str| ComponentNames {
        keycodes: "evdev".into(),
        types: "complete".into(),
        compat: "complete".into(),
        symbols: symbols.into(),
    };

    // A chain of exactly the maximum depth compiles.
    compile_keymap_from_components(&ctx, &components("chain_2")).expect("depth 15 should work");
    // One more level fails.
    let err = compile_keymap_from_components(&ctx, &components("chain_1")).unwrap_err();
    assert!(matches!(err, CompileError::IncludeDepthExceeded { .. }));
}

#[test]
fn test_replace_merge_mode() {
    let tree = data_tree();
    write(
        tree.path(),
        "symbols/repl_over",
        r#"default xkb_symbols "o" { key <AC01> { [ q ] }; };"#,
    );
    let ctx = test_ctx(&tree);

    let keymap = compile_keymap_from_string(
        &ctx,
        r#"
        xkb_keymap {
            xkb_keycodes { include "evdev" };
            xkb_types { include "complete" };
            xkb_compatibility { include "complete" };
            xkb_symbols {
                include "us"
                replace "repl_over"
            };
        };
        "#,
        KeymapFormat::TextV1,
        CompileFlags::empty(),
    )
    .unwrap();

    // The replaced key has exactly one group with one level.
    assert_eq!(keymap.num_layouts_for_key(KC_AC01), 1);
    assert_eq!(keymap.num_levels_for_key(KC_AC01, 0), 1);
    assert_eq!(keymap.key_get_syms_by_level(KC_AC01, 0, 0), &[sym("q")]);
}

#[test]
fn test_duplicate_override_include_is_idempotent() {
    let tree = data_tree();
    let ctx = test_ctx(&tree);
    let components = |symbols: &str| ComponentNames {
        keycodes: "evdev".into(),
        types: "complete".into(),
        compat: "complete".into(),
        symbols: symbols.into(),
    };

    let once = compile_keymap_from_components(&ctx, &components("pc+us")).unwrap();
    let twice = compile_keymap_from_components(&ctx, &components("pc+us+us")).unwrap();
    assert_eq!(keymap_as_string(&once), keymap_as_string(&twice));
}

#[test]
fn test_consumed_modifiers() {
    let tree = data_tree();
    let ctx = test_ctx(&tree);
    let keymap = compile_rmlvo(&ctx, "us", "");
    let shift = keymap.mod_get_index("Shift").unwrap();
    let mod1 = keymap.mod_get_index("Mod1").unwrap();
    let mut state = State::new(Rc::new(keymap));

    state.update_key(KC_LFSH, KeyDirection::Down);
    assert!(state.mod_index_is_consumed(KC_AD01, shift));
    assert_eq!(
        state.mod_mask_remove_consumed(KC_AD01, (1 << shift) | (1 << mod1)),
        1 << mod1
    );
}

#[test]
fn test_missing_include_file_is_fatal() {
    let tree = data_tree();
    let ctx = test_ctx(&tree);
    let err = compile_keymap_from_components(
        &ctx,
        &ComponentNames {
            keycodes: "evdev".into(),
            types: "complete".into(),
            compat: "complete".into(),
            symbols: "no_such_layout".into(),
        },
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::IncludeNotFound { .. }));
}

#[test]
fn test_serialized_keymap_behaves_identically() {
    let tree = data_tree();
    let ctx = test_ctx(&tree);
    let keymap = compile_rmlvo(&ctx, "us", "");
    let text = keymap_as_string(&keymap);
    let reparsed =
        compile_keymap_from_string(&ctx, &text, KeymapFormat::TextV1, CompileFlags::empty())
            .expect("serialized keymap must compile");

    for keymap in [keymap, reparsed] {
        let mut state = State::new(Rc::new(keymap));
        let presses = [
            (KC_AD01, "q"),
            (KC_LFSH, "Shift_L"),
            (KC_AD01, "Q"),
            (KC_AD02, "W"),
        ];
        for (kc, expected) in presses {
            state.update_key(kc, KeyDirection::Down);
            assert_eq!(state.key_get_one_sym(kc), sym(expected), "key {kc}");
        }
    }
}

#[test]
fn test_invalid_keycodes_are_noops() {
    let tree = data_tree();
    let ctx = test_ctx(&tree);
    let keymap = compile_rmlvo(&ctx, "us", "");
    let max = keymap.max_keycode();
    let mut state = State::new(Rc::new(keymap));

    assert!(state.key_get_syms(max + 1).is_empty());
    assert_eq!(
        state.update_key(max + 1, KeyDirection::Down),
        StateComponent::empty()
    );
}

#[test]
fn test_caps_lock_indicator() {
    let tree = data_tree();
    write(
        tree.path(),
        "symbols/capslayout",
        r#"
default xkb_symbols "c" {
    key <AC01> { [ Caps_Lock ] };
    modifier_map Lock { Caps_Lock };
};
"#,
    );
    let mut compat = fs::read_to_string(tree.path().join("compat/complete")).unwrap();
    compat = compat.replace(
        "interpret Any+AnyOf(all) {",
        "interpret Caps_Lock+AnyOfOrNone(all) {\n        action= LockMods(modifiers=Lock);\n    };\n    interpret Any+AnyOf(all) {",
    );
    write(tree.path(), "compat/complete", &compat);

    let ctx = test_ctx(&tree);
    let keymap = compile_keymap_from_components(
        &ctx,
        &ComponentNames {
            keycodes: "evdev".into(),
            types: "complete".into(),
            compat: "complete".into(),
            symbols: "pc+capslayout".into(),
        },
    )
    .unwrap();
    assert_eq!(keymap.led_get_index("Caps Lock"), Some(0));

    let mut state = State::new(Rc::new(keymap));
    assert!(!state.led_name_is_active("Caps Lock"));
    state.update_key(KC_AC01, KeyDirection::Down);
    state.update_key(KC_AC01, KeyDirection::Up);
    assert!(state.led_name_is_active("Caps Lock"));
    state.update_key(KC_AC01, KeyDirection::Down);
    state.update_key(KC_AC01, KeyDirection::Up);
    assert!(!state.led_name_is_active("Caps Lock"));
}
