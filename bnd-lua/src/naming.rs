//! Identifier rules shared by both resolvers and both backends.
//!
//! Every script-visible name is computed here exactly once, at resolve time,
//! and stored in the `ModuleSpec`.  Backends only read the stored names.

/// `event_type` -> `EventType`.  Empty segments vanish, so `_foo` -> `Foo`.
pub fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Remove `prefix` when present, otherwise return `name` unchanged.
pub fn strip_prefix<'a>(name: &'a str, prefix: &str) -> &'a str {
    name.strip_prefix(prefix).unwrap_or(name)
}

/// Remove the cosmetic `_t` suffix (`sapp_desc_t` -> `sapp_desc`).
pub fn strip_type_suffix(name: &str) -> &str {
    name.strip_suffix("_t").unwrap_or(name)
}

/// `CreateWorld` -> `create_world`, `linearDamping` -> `linear_damping`.
///
/// An underscore goes before an uppercase letter only when the previous
/// character is lowercase or a digit, so acronyms stay together
/// (`GetAABB` -> `get_aabb`).
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev: Option<char> = None;
    for c in s.chars() {
        if c.is_uppercase() && prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
            out.push('_');
        }
        out.extend(c.to_lowercase());
        prev = Some(c);
    }
    out
}

/// `staticBody` -> `STATIC_BODY`.
pub fn to_upper_snake_case(s: &str) -> String {
    to_snake_case(s).to_uppercase()
}

/// Script-side name of an enum item.
///
/// `SAPP_EVENTTYPE_KEY_DOWN` of enum `sapp_event_type` under prefix `sapp_`
/// becomes `KEY_DOWN`: the expected item prefix is the library prefix plus
/// the enum's own name with underscores removed.  Falls back to stripping
/// `ENUM_NAME_`, and finally returns the item untouched.  Both comparisons
/// ignore ASCII case.
pub fn enum_item_name<'a>(item: &'a str, enum_name: &str, prefix: &str) -> &'a str {
    let enum_upper = enum_name.to_uppercase();
    let prefix_upper = prefix.to_uppercase();
    let short = strip_prefix(&enum_upper, prefix_upper.trim_end_matches('_')).replace('_', "");
    let full_prefix = format!("{prefix_upper}{short}_");
    if let Some(rest) = strip_prefix_ignore_case(item, &full_prefix) {
        return rest;
    }
    let simple = format!("{enum_upper}_");
    if let Some(rest) = strip_prefix_ignore_case(item, &simple) {
        return rest;
    }
    item
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Module ids may contain dots; generated C symbols may not.
pub fn c_identifier(module_name: &str) -> String {
    module_name.replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pascal_case() {
        assert_eq!(to_pascal_case("event_type"), "EventType");
        assert_eq!(to_pascal_case("desc"), "Desc");
        assert_eq!(to_pascal_case("_hidden"), "Hidden");
    }

    #[test]
    fn snake_case() {
        assert_eq!(to_snake_case("CreateWorld"), "create_world");
        assert_eq!(to_snake_case("World_Step"), "world_step");
        assert_eq!(to_snake_case("linearDamping"), "linear_damping");
        assert_eq!(to_snake_case("GetAABB"), "get_aabb");
        assert_eq!(to_snake_case("vec2Length"), "vec2_length");
    }

    #[test]
    fn upper_snake_case() {
        assert_eq!(to_upper_snake_case("staticBody"), "STATIC_BODY");
    }

    #[test]
    fn enum_items() {
        assert_eq!(
            enum_item_name("SAPP_EVENTTYPE_KEY_DOWN", "sapp_event_type", "sapp_"),
            "KEY_DOWN"
        );
        assert_eq!(
            enum_item_name("SG_BACKEND_GLCORE", "sg_backend", "sg_"),
            "GLCORE"
        );
        assert_eq!(enum_item_name("OTHER", "sg_backend", "sg_"), "OTHER");
    }

    #[test]
    fn suffix_and_prefix() {
        assert_eq!(strip_type_suffix("sapp_desc_t"), "sapp_desc");
        assert_eq!(strip_type_suffix("sapp_desc"), "sapp_desc");
        assert_eq!(strip_prefix("sapp_desc", "sapp_"), "desc");
        assert_eq!(strip_prefix("other", "sapp_"), "other");
        assert_eq!(c_identifier("sokol.app"), "sokol_app");
    }
}
