//! Identifier collection from route, query and body.

use crate::error::AppError;

/// Union of all sources, first occurrence wins, empty ids skipped.
pub fn collect_ids<'a, Q, B>(route: Option<&'a str>, query: Q, body: B) -> Vec<String>
where
    Q: IntoIterator<Item = &'a str>,
    B: IntoIterator<Item = &'a str>,
{
    let mut out: Vec<String> = Vec::new();
    let all = route.into_iter().chain(query).chain(body);
    for id in all {
        let id = id.trim();
        if !id.is_empty() && !out.iter().any(|seen| seen == id) {
            out.push(id.to_string());
        }
    }
    out
}

/// Single identity for Update/Patch: the route parameter beats the body.
pub fn resolve_single_id(route: Option<&str>, body_id: &str) -> Result<String, AppError> {
    match route.filter(|r| !r.is_empty()) {
        Some(id) => Ok(id.to_string()),
        None if !body_id.is_empty() => Ok(body_id.to_string()),
        None => Err(AppError::Validation("missing identifier".into())),
    }
}

/// `id` query values, repeated or comma separated.
pub fn query_ids(pairs: &[(String, String)]) -> Vec<String> {
    pairs
        .iter()
        .filter(|(k, _)| k == "id")
        .flat_map(|(_, v)| v.split(','))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
