//! Boundary validation of owner/repo path segments.
//!
//! Applied before any lookup so malformed input never reaches the
//! store. Unicode letters are allowed; path metacharacters and
//! traversal sequences are not.

use super::error::{CoreError, InvalidInput};

const MAX_OWNER_CHARS: usize = 40;
const MAX_REPO_CHARS: usize = 100;
const FORBIDDEN: &[char] = &['/', '\\', '<', '>', ':', '|', '?', '*', '\0'];

/// Validate caller-supplied owner and repository name strings.
pub fn validate_owner_repo(owner: &str, repo: &str) -> Result<(), CoreError> {
    validate_segment("owner", owner, MAX_OWNER_CHARS)?;
    validate_segment("repo", repo, MAX_REPO_CHARS)?;
    Ok(())
}

fn validate_segment(field: &'static str, value: &str, max_chars: usize) -> Result<(), CoreError> {
    if value.is_empty() {
        return Err(InvalidInput {
            field,
            reason: "required".into(),
        }
        .into());
    }
    if value.chars().count() > max_chars {
        return Err(InvalidInput {
            field,
            reason: format!("too long (max {max_chars} characters)"),
        }
        .into());
    }
    if value.contains("..") {
        return Err(InvalidInput {
            field,
            reason: "path traversal sequence".into(),
        }
        .into());
    }
    if value.contains(FORBIDDEN) {
        return Err(InvalidInput {
            field,
            reason: "forbidden character".into(),
        }
        .into());
    }
    Ok(())
}
