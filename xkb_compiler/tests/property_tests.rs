//! Property-based tests for the scanner, keysym conversions and the
//! serialized-state update path.

use std::rc::Rc;

use once_cell::sync::Lazy;
use proptest::prelude::*;

use xkb_compiler::{compile_keymap_from_string, keymap_as_string, CompileFlags, KeymapFormat};
use xkb_core::{Context, ContextFlags, Keysym, State, StateComponent};

const KEYMAP: &str = r#"
xkb_keymap {
    xkb_keycodes { <AD01> = 24; <LFSH> = 50; };
    xkb_types {
        type "ALPHABETIC" {
            modifiers = Shift+Lock;
            map[Shift] = Level2;
            map[Lock] = Level2;
        };
    };
    xkb_compatibility {
        interpret Shift_L+AnyOf(all) { action= SetMods(modifiers=Shift); };
    };
    xkb_symbols {
        key <AD01> { [ q, Q ] };
        key <LFSH> { [ Shift_L ] };
        modifier_map Shift { <LFSH> };
    };
};
"#;

static KEYMAP_TEXT: Lazy<String> = Lazy::new(|| {
    let ctx = Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES);
    let keymap =
        compile_keymap_from_string(&ctx, KEYMAP, KeymapFormat::TextV1, CompileFlags::empty())
            .expect("fixture must compile");
    keymap_as_string(&keymap)
});

fn fresh_state() -> State {
    let ctx = Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES);
    let keymap = compile_keymap_from_string(
        &ctx,
        &KEYMAP_TEXT,
        KeymapFormat::TextV1,
        CompileFlags::empty(),
    )
    .expect("fixture must recompile");
    State::new(Rc::new(keymap))
}

proptest! {
    #[test]
    fn test_keysym_char_round_trip(c in any::<char>()) {
        prop_assume!(!c.is_control());
        let sym = Keysym::from_char(c);
        prop_assert_eq!(sym.to_char(), Some(c));
    }

    #[test]
    fn test_keysym_name_round_trip(value in 0u32..=0x00ff_ffff) {
        let sym = Keysym(value);
        let name = sym.name();
        prop_assert_eq!(Keysym::from_name(&name), Some(sym), "name was {}", name);
    }

    #[test]
    fn test_scanner_accepts_identifier_soup(
        words in proptest::collection::vec("[a-z_][a-z0-9_]{0,12}", 1..20)
    ) {
        use xkb_compiler::scanner::{Scanner, Token};

        let ctx = Context::new(
            ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES,
        );
        let input = words.join(" ");
        let mut scanner = Scanner::new(&ctx, input.as_bytes(), "(prop)");
        let mut count = 0;
        loop {
            match scanner.next_token() {
                Ok(Token::End) => break,
                Ok(Token::Ident(_) | Token::Keyword(_)) => count += 1,
                Ok(other) => prop_assert!(false, "unexpected token {:?}", other),
                Err(err) => prop_assert!(false, "lex error {}", err),
            }
        }
        prop_assert_eq!(count, words.len());
    }

    #[test]
    fn test_update_mask_serialization_round_trip(
        base in 0u32..4,
        latched in 0u32..4,
        locked in 0u32..4,
        locked_layout in 0u32..8,
    ) {
        let mut state = fresh_state();
        state.update_mask(base, latched, locked, 0, 0, locked_layout);

        let mut copy = fresh_state();
        copy.update_mask(
            state.serialize_mods(StateComponent::MODS_DEPRESSED),
            state.serialize_mods(StateComponent::MODS_LATCHED),
            state.serialize_mods(StateComponent::MODS_LOCKED),
            state.serialize_layout(StateComponent::LAYOUT_DEPRESSED),
            state.serialize_layout(StateComponent::LAYOUT_LATCHED),
            state.serialize_layout(StateComponent::LAYOUT_LOCKED),
        );

        prop_assert_eq!(
            copy.serialize_mods(StateComponent::MODS_EFFECTIVE),
            state.serialize_mods(StateComponent::MODS_EFFECTIVE)
        );
        prop_assert_eq!(
            copy.serialize_layout(StateComponent::LAYOUT_EFFECTIVE),
            state.serialize_layout(StateComponent::LAYOUT_EFFECTIVE)
        );
    }
}
