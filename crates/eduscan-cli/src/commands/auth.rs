//! Auth commands - manage the stored access token

use anyhow::{Context, Result};
use eduscan_client::{CredentialStore, Identity};

use crate::output::OutputContext;

/// Store a token, optionally with the user it belongs to
pub fn set_token(
    store: &CredentialStore,
    token: &str,
    user: Option<&str>,
    ctx: &OutputContext,
) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        anyhow::bail!("Token must not be empty");
    }

    store
        .save(token, user.map(Identity::new))
        .with_context(|| format!("Failed to write {}", store.path().display()))?;
    ctx.success(&format!("Token saved to {}", store.path().display()));
    Ok(())
}

/// Show what is stored
pub fn status(store: &CredentialStore, ctx: &OutputContext) -> Result<()> {
    let stored = store
        .load()
        .with_context(|| format!("Failed to read {}", store.path().display()))?;

    let user = match (&stored.identity, store.identity()) {
        (Some(identity), Some(_)) => identity.username.clone(),
        (Some(identity), None) => format!("{} (stale)", identity.username),
        (None, _) => "-".to_string(),
    };

    ctx.print_kv(&[
        ("Credentials", store.path().display().to_string()),
        (
            "Token",
            stored
                .token
                .as_deref()
                .map(mask)
                .unwrap_or_else(|| "not set".to_string()),
        ),
        ("User", user),
        (
            "Cached",
            stored
                .cached_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        ),
    ]);
    Ok(())
}

/// Remove stored credentials
pub fn clear(store: &CredentialStore, ctx: &OutputContext) -> Result<()> {
    store
        .clear()
        .with_context(|| format!("Failed to remove {}", store.path().display()))?;
    ctx.success("Credentials cleared");
    Ok(())
}

/// Show only the first few characters of a token
fn mask(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    if token.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use eduscan_client::TokenSource;

    fn quiet() -> OutputContext {
        OutputContext::new(OutputFormat::Table, true, true)
    }

    #[test]
    fn test_set_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));

        set_token(&store, " abc123 ", Some("msmith"), &quiet()).unwrap();
        assert_eq!(store.token().as_deref(), Some("abc123"));
        assert_eq!(store.identity().unwrap().username, "msmith");
        status(&store, &quiet()).unwrap();

        clear(&store, &quiet()).unwrap();
        assert_eq!(store.token(), None);
    }

    #[test]
    fn test_empty_token_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));

        assert!(set_token(&store, "  ", None, &quiet()).is_err());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("abcdefgh"), "abcd****");
        assert_eq!(mask("abc"), "****");
    }
}
