//! Lookup tables and text renderers shared by the expression resolvers,
//! the compat compiler and the keymap serializer.

use xkb_core::keymap::StateComponent;
use xkb_core::mods::{ModMask, ModSet, MOD_REAL_MASK_ALL};
use xkb_core::Context;

/// `whichModState` values.
pub const MOD_COMPONENT_MASK_NAMES: &[(&str, u32)] = &[
    ("base", StateComponent::MODS_DEPRESSED.bits()),
    ("latched", StateComponent::MODS_LATCHED.bits()),
    ("locked", StateComponent::MODS_LOCKED.bits()),
    ("effective", StateComponent::MODS_EFFECTIVE.bits()),
    ("compat", StateComponent::MODS_EFFECTIVE.bits()),
    ("any", StateComponent::MODS_EFFECTIVE.bits()),
    ("none", 0),
];

/// `whichGroupState` values.
pub const GROUP_COMPONENT_MASK_NAMES: &[(&str, u32)] = &[
    ("base", StateComponent::LAYOUT_DEPRESSED.bits()),
    ("latched", StateComponent::LAYOUT_LATCHED.bits()),
    ("locked", StateComponent::LAYOUT_LOCKED.bits()),
    ("effective", StateComponent::LAYOUT_EFFECTIVE.bits()),
    ("any", StateComponent::LAYOUT_EFFECTIVE.bits()),
    ("none", 0),
];

/// `groups` masks in indicator definitions.
pub const GROUP_MASK_NAMES: &[(&str, u32)] = &[
    ("group1", 1 << 0),
    ("group2", 1 << 1),
    ("group3", 1 << 2),
    ("group4", 1 << 3),
    ("all", 0x0f),
    ("none", 0),
];

/// Names of the boolean controls, as used in `controls` masks and
/// control actions.
pub const CTRL_MASK_NAMES: &[(&str, u32)] = &[
    ("repeatkeys", 1 << 0),
    ("repeat", 1 << 0),
    ("autorepeat", 1 << 0),
    ("slowkeys", 1 << 1),
    ("bouncekeys", 1 << 2),
    ("stickykeys", 1 << 3),
    ("mousekeys", 1 << 4),
    ("mousekeysaccel", 1 << 5),
    ("accessxkeys", 1 << 6),
    ("accessxtimeout", 1 << 7),
    ("accessxfeedback", 1 << 8),
    ("audiblebell", 1 << 9),
    ("ignoregrouplock", 1 << 10),
    ("all", 0x7ff),
    ("none", 0),
    ("overlay1", 0),
    ("overlay2", 0),
];

fn lookup_render(lookup: &[(&'static str, u32)], value: u32) -> Option<&'static str> {
    lookup
        .iter()
        .find(|&&(_, v)| v == value)
        .map(|&(name, _)| name)
}

/// Canonical spelling of a control name for serialization.
fn ctrl_text(bit: u32) -> &'static str {
    match bit {
        0x001 => "RepeatKeys",
        0x002 => "SlowKeys",
        0x004 => "BounceKeys",
        0x008 => "StickyKeys",
        0x010 => "MouseKeys",
        0x020 => "MouseKeysAccel",
        0x040 => "AccessXKeys",
        0x080 => "AccessXTimeout",
        0x100 => "AccessXFeedback",
        0x200 => "AudibleBell",
        0x400 => "IgnoreGroupLock",
        _ => "Unknown",
    }
}

/// Renders a modifier mask as `Shift+Mod1+...`, using the declared
/// (possibly virtual) modifier names.
pub fn mod_mask_text(ctx: &Context, mods: &ModSet, mask: ModMask) -> String {
    if mask == 0 {
        return "none".to_owned();
    }
    if mask == MOD_REAL_MASK_ALL {
        return "all".to_owned();
    }
    let mut out = String::new();
    for (i, m) in mods.mods.iter().enumerate() {
        if mask & (1 << i) == 0 {
            continue;
        }
        if !out.is_empty() {
            out.push('+');
        }
        out.push_str(&ctx.atom_text(m.name));
    }
    out
}

/// Renders a state-component mask for `whichModState` /
/// `whichGroupState` fields.
pub fn led_state_text(which: StateComponent, for_mods: bool) -> String {
    let parts: &[(StateComponent, &str)] = if for_mods {
        &[
            (StateComponent::MODS_DEPRESSED, "Base"),
            (StateComponent::MODS_LATCHED, "Latched"),
            (StateComponent::MODS_LOCKED, "Locked"),
            (StateComponent::MODS_EFFECTIVE, "Effective"),
        ]
    } else {
        &[
            (StateComponent::LAYOUT_DEPRESSED, "Base"),
            (StateComponent::LAYOUT_LATCHED, "Latched"),
            (StateComponent::LAYOUT_LOCKED, "Locked"),
            (StateComponent::LAYOUT_EFFECTIVE, "Effective"),
        ]
    };
    let mut out = String::new();
    for &(bit, name) in parts {
        if which.contains(bit) {
            if !out.is_empty() {
                out.push('+');
            }
            out.push_str(name);
        }
    }
    if out.is_empty() {
        out.push_str("None");
    }
    out
}

/// Renders a group mask as `Group1+Group3`.
pub fn group_mask_text(mask: u32) -> String {
    if let Some(name) = lookup_render(GROUP_MASK_NAMES, mask) {
        // Capitalized canonical forms for the single names.
        if mask.count_ones() == 1 {
            return format!("Group{}", mask.trailing_zeros() + 1);
        }
        return name.to_owned();
    }
    let mut out = String::new();
    for i in 0..4 {
        if mask & (1 << i) != 0 {
            if !out.is_empty() {
                out.push('+');
            }
            out.push_str(&format!("Group{}", i + 1));
        }
    }
    out
}

/// Renders a controls mask as `RepeatKeys+SlowKeys`.
pub fn control_mask_text(mask: u32) -> String {
    if mask == 0 {
        return "none".to_owned();
    }
    if mask == 0x7ff {
        return "all".to_owned();
    }
    let mut out = String::new();
    for i in 0..11 {
        let bit = 1 << i;
        if mask & bit != 0 {
            if !out.is_empty() {
                out.push('+');
            }
            out.push_str(ctrl_text(bit));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use xkb_core::ContextFlags;

    #[test]
    fn test_mod_mask_text() {
        let ctx = Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES);
        let mods = ModSet::new_with_real_mods(&ctx);
        assert_eq!(mod_mask_text(&ctx, &mods, 0), "none");
        assert_eq!(mod_mask_text(&ctx, &mods, 0xff), "all");
        assert_eq!(mod_mask_text(&ctx, &mods, 0b101), "Shift+Control");
    }

    #[test]
    fn test_led_state_text() {
        assert_eq!(
            led_state_text(StateComponent::MODS_LOCKED, true),
            "Locked"
        );
        assert_eq!(
            led_state_text(
                StateComponent::MODS_DEPRESSED | StateComponent::MODS_LATCHED,
                true
            ),
            "Base+Latched"
        );
        assert_eq!(led_state_text(StateComponent::empty(), true), "None");
    }

    #[test]
    fn test_group_and_control_text() {
        assert_eq!(group_mask_text(0b1), "Group1");
        assert_eq!(group_mask_text(0b101), "Group1+Group3");
        assert_eq!(control_mask_text(0b11), "RepeatKeys+SlowKeys");
        assert_eq!(control_mask_text(0), "none");
    }
}
