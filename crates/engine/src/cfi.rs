//! Parsing of EPUB canonical fragment identifiers.
//!
//! Only the package-level part of a CFI is interpreted: the steps before the
//! first `!` indirection, which address the spine item. Everything after the
//! indirection is kept verbatim.
//!
//! ```text
//! epubcfi(/6/14[chap05ref]!/4/2/1:3)
//! epubcfi(/6/4!/4/2,/1:0,/1:12)
//! ```

use thiserror::Error;

/// Package-document step that holds the spine element.
const SPINE_STEP: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CfiError {
    #[error("empty cfi")]
    Empty,
    #[error("cfi has no indirection step")]
    MissingIndirection,
    #[error("invalid cfi step `{0}`")]
    InvalidStep(String),
    #[error("unbalanced `[` in cfi")]
    UnbalancedAssertion,
    #[error("cfi does not address a spine item")]
    NotSpineReference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub index: u32,
    pub assertion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cfi {
    package: Vec<Step>,
    /// Path inside the spine item's document, after the indirection.
    pub content_path: String,
    /// Range start/end relative to the content path, for range CFIs.
    pub range: Option<(String, String)>,
}

impl Cfi {
    pub fn parse(input: &str) -> Result<Self, CfiError> {
        let body = input.trim();
        let body = body
            .strip_prefix("epubcfi(")
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(body)
            .trim();
        if body.is_empty() {
            return Err(CfiError::Empty);
        }

        let (package, rest) = split_indirection(body)?;
        let package = parse_steps(package)?;
        if package.len() != 2 || package[0].index != SPINE_STEP {
            return Err(CfiError::NotSpineReference);
        }

        let parts = split_top_level(rest, ',');
        let (content_path, range) = match parts.as_slice() {
            [path] => (path.to_string(), None),
            [path, start, end] => (
                path.to_string(),
                Some((start.to_string(), end.to_string())),
            ),
            _ => return Err(CfiError::InvalidStep(rest.to_string())),
        };

        Ok(Self {
            package,
            content_path,
            range,
        })
    }

    /// Step value addressing the spine item (even; `2 * (index + 1)`).
    pub fn spine_position(&self) -> u32 {
        self.package[1].index
    }

    /// Zero-based index into the spine.
    pub fn spine_index(&self) -> usize {
        (self.spine_position() / 2).saturating_sub(1) as usize
    }

    pub fn spine_idref(&self) -> Option<&str> {
        self.package[1].assertion.as_deref()
    }

    pub fn is_range(&self) -> bool {
        self.range.is_some()
    }
}

/// Spine position of a locator, or `None` for anything malformed.
pub fn spine_position(locator: &str) -> Option<u32> {
    Cfi::parse(locator).ok().map(|cfi| cfi.spine_position())
}

fn split_indirection(body: &str) -> Result<(&str, &str), CfiError> {
    let mut depth = 0usize;
    for (idx, ch) in body.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.checked_sub(1).ok_or(CfiError::UnbalancedAssertion)?,
            '!' if depth == 0 => return Ok((&body[..idx], &body[idx + 1..])),
            _ => {}
        }
    }
    if depth != 0 {
        return Err(CfiError::UnbalancedAssertion);
    }
    Err(CfiError::MissingIndirection)
}

fn parse_steps(path: &str) -> Result<Vec<Step>, CfiError> {
    let Some(path) = path.strip_prefix('/') else {
        return Err(CfiError::InvalidStep(path.to_string()));
    };
    path.split('/').map(parse_step).collect()
}

fn parse_step(raw: &str) -> Result<Step, CfiError> {
    let (digits, assertion) = match raw.find('[') {
        Some(open) => {
            let close = raw
                .rfind(']')
                .filter(|&close| close > open && close == raw.len() - 1)
                .ok_or(CfiError::UnbalancedAssertion)?;
            (&raw[..open], Some(raw[open + 1..close].to_string()))
        }
        None => (raw, None),
    };
    let index = digits
        .parse::<u32>()
        .map_err(|_| CfiError::InvalidStep(raw.to_string()))?;
    Ok(Step { index, assertion })
}

fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in input.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&input[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_point_cfi() {
        let cfi = Cfi::parse("epubcfi(/6/14[chap05ref]!/4[body01]/10/2/1:3)").unwrap();
        assert_eq!(cfi.spine_position(), 14);
        assert_eq!(cfi.spine_index(), 6);
        assert_eq!(cfi.spine_idref(), Some("chap05ref"));
        assert_eq!(cfi.content_path, "/4[body01]/10/2/1:3");
        assert!(!cfi.is_range());
    }

    #[test]
    fn parses_range_cfi() {
        let cfi = Cfi::parse("epubcfi(/6/4!/4/2,/1:0,/1:12)").unwrap();
        assert_eq!(cfi.spine_position(), 4);
        assert_eq!(cfi.spine_index(), 1);
        assert_eq!(
            cfi.range,
            Some(("/1:0".to_string(), "/1:12".to_string()))
        );
    }

    #[test]
    fn accepts_unwrapped_paths() {
        assert_eq!(spine_position("/6/8!/4/2"), Some(8));
    }

    #[test]
    fn assertion_may_contain_separators() {
        let cfi = Cfi::parse("epubcfi(/6/2[a!b,c]!/4/2[x,y],/1:0,/1:2)").unwrap();
        assert_eq!(cfi.spine_idref(), Some("a!b,c"));
        assert_eq!(cfi.content_path, "/4/2[x,y]");
    }

    #[test]
    fn rejects_malformed_locators() {
        assert_eq!(Cfi::parse(""), Err(CfiError::Empty));
        assert_eq!(Cfi::parse("epubcfi()"), Err(CfiError::Empty));
        assert_eq!(Cfi::parse("/6/4/2"), Err(CfiError::MissingIndirection));
        assert_eq!(Cfi::parse("/4/4!/2"), Err(CfiError::NotSpineReference));
        assert_eq!(Cfi::parse("/6/4/6!/2"), Err(CfiError::NotSpineReference));
        assert!(matches!(Cfi::parse("/6/x!/2"), Err(CfiError::InvalidStep(_))));
        assert_eq!(Cfi::parse("/6/4[oops!/2"), Err(CfiError::UnbalancedAssertion));
        assert_eq!(spine_position("a plain text snippet"), None);
    }
}
