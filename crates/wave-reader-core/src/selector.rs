//! Syntactic selector validation.
//!
//! Catches what can be rejected without a document: empty input,
//! unbalanced brackets or quotes, and dangling combinators. Whether the
//! selector matches anything is the page's call.

use thiserror::Error;

/// Selector validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("Selector is empty")]
    Empty,
    #[error("Invalid selector '{selector}': unbalanced '{delimiter}'")]
    Unbalanced { selector: String, delimiter: char },
    #[error("Invalid selector '{0}': dangling combinator")]
    DanglingCombinator(String),
    #[error("Invalid selector '{0}': empty entry in selector list")]
    EmptyListItem(String),
}

/// Validate a selector, returning it trimmed.
///
/// # Errors
/// Returns error if the selector is empty or malformed.
pub fn validate_selector(selector: &str) -> Result<&str, SelectorError> {
    let trimmed = selector.trim();
    if trimmed.is_empty() {
        return Err(SelectorError::Empty);
    }

    let mut stack = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut depth_zero_text = String::with_capacity(trimmed.len());

    for c in trimmed.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
            continue;
        }
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' | '(' => stack.push(c),
            ']' | ')' => {
                let open = if c == ']' { '[' } else { '(' };
                if stack.pop() != Some(open) {
                    return Err(SelectorError::Unbalanced {
                        selector: trimmed.to_string(),
                        delimiter: c,
                    });
                }
            }
            _ if stack.is_empty() => depth_zero_text.push(c),
            _ => {}
        }
    }

    if let Some(q) = quote {
        return Err(SelectorError::Unbalanced {
            selector: trimmed.to_string(),
            delimiter: q,
        });
    }
    if let Some(open) = stack.pop() {
        return Err(SelectorError::Unbalanced {
            selector: trimmed.to_string(),
            delimiter: open,
        });
    }

    for item in depth_zero_text.split(',') {
        let item = item.trim();
        if item.is_empty() {
            return Err(SelectorError::EmptyListItem(trimmed.to_string()));
        }
        if item.ends_with(['>', '+', '~']) || item.starts_with(['+', '~']) {
            return Err(SelectorError::DanglingCombinator(trimmed.to_string()));
        }
    }

    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_common_selectors() {
        for selector in [
            "p",
            " .article p ",
            "#main > p.lead",
            "div[data-x=\"a,b\"]",
            "li:nth-child(2n+1)",
            "h1, h2",
        ] {
            assert!(validate_selector(selector).is_ok(), "{selector}");
        }
        assert_eq!(validate_selector("  p  ").unwrap(), "p");
    }

    #[test]
    fn test_rejects_malformed_selectors() {
        assert_eq!(validate_selector("   "), Err(SelectorError::Empty));
        assert!(matches!(
            validate_selector("div[data-x"),
            Err(SelectorError::Unbalanced { delimiter: '[', .. })
        ));
        assert!(matches!(
            validate_selector("p)"),
            Err(SelectorError::Unbalanced { delimiter: ')', .. })
        ));
        assert!(matches!(
            validate_selector("div >"),
            Err(SelectorError::DanglingCombinator(_))
        ));
        assert!(matches!(
            validate_selector("h1,,h2"),
            Err(SelectorError::EmptyListItem(_))
        ));
    }
}
