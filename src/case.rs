//! Identifier case helpers: type names -> storage names, lenient relation lookup.

/// Convert a single identifier from camelCase/PascalCase to snake_case.
/// e.g. "UserGroup" -> "user_group", "createdAt" -> "created_at"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Normalized form used to compare identifiers that may arrive as `Children`,
/// `children` or `child_ren`-style spellings from query strings.
pub fn fold(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Last path segment of a Rust type name, without generic arguments.
/// e.g. "my_app::model::User" -> "User"
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_from_pascal() {
        assert_eq!(to_snake_case("UserGroup"), "user_group");
        assert_eq!(to_snake_case("user"), "user");
    }

    #[test]
    fn fold_ignores_case_and_underscores() {
        assert_eq!(fold("Children"), fold("children"));
        assert_eq!(fold("created_by"), fold("CreatedBy"));
    }

    #[test]
    fn short_type_name_strips_path() {
        struct Widget;
        assert_eq!(short_type_name::<Widget>(), "Widget");
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
    }
}
