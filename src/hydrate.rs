//! Textual placeholder substitution
//!
//! Replaces `{{ key }}` tokens with values from an
//! [`Environment`](crate::env::Environment). Hydration runs on raw text
//! *before* structured parsing, so placeholders can appear anywhere in a
//! document - inside mapping keys as well as values.

use regex::Regex;

use crate::env::Environment;
use crate::error::ManifoldResult;

/// Replace each `{{ key }}` token with `env.get(key)`.
///
/// A key is any run of non-whitespace, non-brace characters. Reading a
/// key may trigger its plugin call the first time; an unbound key aborts
/// hydration with [`UnresolvedReference`](crate::error::ManifoldError::UnresolvedReference).
pub fn hydrate(text: &str, env: &Environment) -> ManifoldResult<String> {
    let token_re = Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("token pattern is a valid regex");

    let mut output = String::with_capacity(text.len());
    let mut last_end = 0;
    for caps in token_re.captures_iter(text) {
        let whole = caps.get(0).expect("capture 0 always exists");
        let key = &caps[1];
        output.push_str(&text[last_end..whole.start()]);
        output.push_str(&env.get(key)?);
        last_end = whole.end();
    }
    output.push_str(&text[last_end..]);
    Ok(output)
}
