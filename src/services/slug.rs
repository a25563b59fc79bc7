//! Slug generation
//!
//! Slugs use the alphabet `[a-z0-9-]`: every run of other characters
//! collapses to one hyphen and hyphens never lead or trail. Text with no
//! ASCII alphanumerics yields an empty slug; callers pick a fallback.

use anyhow::Result;
use std::future::Future;

/// Lower-case `text` and reduce it to the slug alphabet
pub fn generate_slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;

    for c in text.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(c);
            pending_hyphen = false;
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

/// Slug for a title-less memo
pub fn memo_slug() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("memo-{}", &id[..8])
}

/// Return `base` or the first of `base-2`, `base-3`, ... for which `exists`
/// answers false.
pub async fn unique_slug<F, Fut>(base: &str, mut exists: F) -> Result<String>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    if !exists(base.to_string()).await? {
        return Ok(base.to_string());
    }

    let mut n = 2u32;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !exists(candidate.clone()).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_slug() {
        assert_eq!(generate_slug("Hello World"), "hello-world");
        assert_eq!(generate_slug("  Rust & Axum: 2024!  "), "rust-axum-2024");
        assert_eq!(generate_slug("already-a-slug"), "already-a-slug");
        assert_eq!(generate_slug("a__b--c"), "a-b-c");
        assert_eq!(generate_slug("Crème Brûlée"), "cr-me-br-l-e");
    }

    #[test]
    fn test_generate_slug_can_be_empty() {
        assert_eq!(generate_slug(""), "");
        assert_eq!(generate_slug("!!!"), "");
        assert_eq!(generate_slug("日本語"), "");
    }

    #[test]
    fn test_memo_slug_shape() {
        let slug = memo_slug();
        assert!(slug.starts_with("memo-"));
        assert_eq!(slug.len(), 13);
        assert!(slug[5..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_unique_slug_appends_counter() {
        let taken: HashSet<String> = ["post", "post-2", "post-3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let taken = &taken;

        let slug = unique_slug("post", |s| async move { Ok(taken.contains(&s)) })
            .await
            .unwrap();
        assert_eq!(slug, "post-4");

        let slug = unique_slug("fresh", |s| async move { Ok(taken.contains(&s)) })
            .await
            .unwrap();
        assert_eq!(slug, "fresh");
    }

    #[tokio::test]
    async fn test_unique_slug_propagates_errors() {
        let result = unique_slug("x", |_| async { Err(anyhow::anyhow!("db down")) }).await;
        assert!(result.is_err());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;
        use regex::Regex;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(300))]

            #[test]
            fn property_slug_alphabet_and_idempotence(text in "\\PC{0,60}") {
                let slug = generate_slug(&text);
                let shape = Regex::new("^[a-z0-9]+(-[a-z0-9]+)*$").unwrap();
                prop_assert!(slug.is_empty() || shape.is_match(&slug));
                prop_assert_eq!(generate_slug(&slug), slug);
            }
        }
    }
}
