//! Image references and the tag encoding used for final and jumpstart images.
//!
//! ```text
//! <registry>/<app>-<deployment>-<distro>:latest
//! <registry>/<app>-<deployment>-<distro>:<version>
//! <registry>/<app>-<deployment>-<distro>:<YYYY.DDD>
//! <registry>/<app>-<deployment>-<distro>:<branch>
//! <registry>/<app>-<deployment>-<distro>-jumpstart:<YYYY.DDD>
//! ```

use chrono::NaiveDate;
use std::fmt;

/// Longest tag accepted by OCI registries.
const MAX_TAG_LEN: usize = 128;

/// A fully qualified image reference (`<name>:<tag>`).
///
/// # Examples
///
/// ```
/// use botimage_core::ImageRef;
///
/// let r = ImageRef::parse("quay.io/me/bot-dev-alpine:latest").unwrap();
/// assert_eq!(r.name(), "quay.io/me/bot-dev-alpine");
/// assert_eq!(r.tag(), "latest");
/// assert_eq!(r.to_string(), "quay.io/me/bot-dev-alpine:latest");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    name: String,
    tag: String,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Split `<name>:<tag>`, ignoring a `:` that belongs to a registry port.
    pub fn parse(reference: &str) -> Option<Self> {
        let (name, tag) = reference.rsplit_once(':')?;
        if name.is_empty() || tag.is_empty() || tag.contains('/') {
            return None;
        }
        Some(Self::new(name, tag))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Whether both references name the same local image.
    ///
    /// Local storage records a name without a registry domain as
    /// `localhost/<name>`, so `me/bot:1` and `localhost/me/bot:1` match.
    pub fn same_image(&self, other: &ImageRef) -> bool {
        self.tag == other.tag && qualified(&self.name) == qualified(&other.name)
    }
}

/// `name` with the implicit `localhost/` domain spelled out.
fn qualified(name: &str) -> std::borrow::Cow<'_, str> {
    let has_domain = match name.split_once('/') {
        Some((first, _)) => first.contains(['.', ':']) || first == "localhost",
        None => false,
    };
    if has_domain {
        std::borrow::Cow::Borrowed(name)
    } else {
        std::borrow::Cow::Owned(format!("localhost/{name}"))
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Derives every image name and tag for one deployment.
#[derive(Debug, Clone)]
pub struct ImageNaming {
    registry: String,
    app: String,
    deployment: String,
    distro: String,
}

impl ImageNaming {
    /// # Errors
    ///
    /// [`crate::Error::InvalidDeployment`] if `deployment` cannot be part of
    /// an image repository name (lowercase alphanumerics, `.`, `_`, `-`).
    pub fn new(
        registry: &str,
        app: &str,
        deployment: &str,
        distro: &str,
    ) -> crate::Result<Self> {
        validate_deployment(deployment)?;
        Ok(Self {
            registry: registry.trim_end_matches('/').to_owned(),
            app: app.to_owned(),
            deployment: deployment.to_owned(),
            distro: distro.to_owned(),
        })
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    /// `<registry>/<app>-<deployment>-<distro>`
    pub fn image_name(&self) -> String {
        format!(
            "{}/{}-{}-{}",
            self.registry, self.app, self.deployment, self.distro
        )
    }

    pub fn jumpstart_name(&self) -> String {
        format!("{}-jumpstart", self.image_name())
    }

    pub fn jumpstart_ref(&self, date: NaiveDate) -> ImageRef {
        ImageRef::new(self.jumpstart_name(), date_tag(date))
    }

    /// Name of the single working container used by a build session.
    pub fn container_name(&self) -> String {
        format!("{}-{}-build", self.app, self.deployment)
    }

    /// Tags applied to the final image, in push order.
    ///
    /// Duplicates (a branch named like the version, for instance) collapse
    /// into the first occurrence.
    pub fn final_refs(
        &self,
        version: &str,
        date: NaiveDate,
        branch: Option<&str>,
    ) -> Vec<ImageRef> {
        let name = self.image_name();
        let mut tags = vec![
            "latest".to_owned(),
            sanitize_tag(version),
            date_tag(date),
        ];
        if let Some(branch) = branch {
            tags.push(sanitize_tag(branch));
        }

        let mut refs: Vec<ImageRef> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !refs.iter().any(|r| r.tag == tag) {
                refs.push(ImageRef::new(name.clone(), tag));
            }
        }
        refs
    }
}

/// `YYYY.DDD`: year and zero-padded day of the year.
pub fn date_tag(date: NaiveDate) -> String {
    date.format("%Y.%j").to_string()
}

/// Map an arbitrary string onto the tag-safe charset `[A-Za-z0-9._-]`.
///
/// ```
/// use botimage_core::naming::sanitize_tag;
///
/// assert_eq!(sanitize_tag("feature/x y"), "feature_x_y");
/// assert_eq!(sanitize_tag("v1.2.0"), "v1.2.0");
/// ```
pub fn sanitize_tag(raw: &str) -> String {
    let mut tag: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // Tags may not start with a separator
    if tag.is_empty() || tag.starts_with(['.', '-']) {
        tag.insert(0, '_');
    }
    tag.truncate(MAX_TAG_LEN);
    tag
}

fn validate_deployment(name: &str) -> crate::Result<()> {
    let invalid = |reason| {
        Err(crate::Error::InvalidDeployment {
            name: name.to_owned(),
            reason,
        })
    };

    let Some(first) = name.chars().next() else {
        return invalid("must not be empty");
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return invalid("must start with a lowercase letter or digit");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
    {
        return invalid("only lowercase letters, digits, '.', '_' and '-' are allowed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naming() -> ImageNaming {
        ImageNaming::new("quay.io/andykluger/", "colorcodebot", "prod", "alpine").unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn image_name_joins_parts() {
        assert_eq!(
            naming().image_name(),
            "quay.io/andykluger/colorcodebot-prod-alpine"
        );
    }

    #[test]
    fn jumpstart_ref_is_date_keyed() {
        let r = naming().jumpstart_ref(day(2024, 2, 3));
        assert_eq!(
            r.to_string(),
            "quay.io/andykluger/colorcodebot-prod-alpine-jumpstart:2024.034"
        );
    }

    #[test]
    fn date_tag_pads_day_of_year() {
        assert_eq!(date_tag(day(2024, 1, 1)), "2024.001");
        assert_eq!(date_tag(day(2024, 12, 31)), "2024.366");
    }

    #[test]
    fn final_refs_with_branch() {
        let refs = naming().final_refs("v1.4-2-gabc123", day(2024, 3, 1), Some("feature/x y"));
        let tags: Vec<&str> = refs.iter().map(ImageRef::tag).collect();
        assert_eq!(tags, ["latest", "v1.4-2-gabc123", "2024.061", "feature_x_y"]);
    }

    #[test]
    fn final_refs_without_branch() {
        let refs = naming().final_refs("v1.4", day(2024, 3, 1), None);
        assert_eq!(refs.len(), 3);
    }

    #[test]
    fn final_refs_deduplicates() {
        let refs = naming().final_refs("main", day(2024, 3, 1), Some("main"));
        let tags: Vec<&str> = refs.iter().map(ImageRef::tag).collect();
        assert_eq!(tags, ["latest", "main", "2024.061"]);
    }

    #[test]
    fn parse_keeps_registry_port() {
        let r = ImageRef::parse("localhost:5000/bot:2024.010").unwrap();
        assert_eq!(r.name(), "localhost:5000/bot");
        assert_eq!(r.tag(), "2024.010");
        assert!(ImageRef::parse("localhost:5000/bot").is_none());
    }

    #[test]
    fn same_image_fills_in_local_domain() {
        let short = ImageRef::new("andykluger/colorcodebot-dev-alpine", "2026.288");
        let stored = ImageRef::parse("localhost/andykluger/colorcodebot-dev-alpine:2026.288").unwrap();
        assert!(short.same_image(&stored));
        assert!(stored.same_image(&short));
        assert!(ImageRef::new("bot", "1").same_image(&ImageRef::new("localhost/bot", "1")));

        assert!(!short.same_image(&ImageRef::new(stored.name(), "2026.289")));
        let remote = ImageRef::new("ghcr.io/andykluger/colorcodebot-dev-alpine", "2026.288");
        assert!(!short.same_image(&remote));
        let port = ImageRef::new("localhost:5000/andykluger/colorcodebot-dev-alpine", "2026.288");
        assert!(!short.same_image(&port));
    }

    #[test]
    fn sanitize_leading_separator() {
        assert_eq!(sanitize_tag("-rc"), "_-rc");
        assert_eq!(sanitize_tag(""), "_");
    }

    #[test]
    fn deployment_rejects_uppercase_and_spaces() {
        assert!(ImageNaming::new("r", "a", "Prod", "alpine").is_err());
        assert!(ImageNaming::new("r", "a", "my prod", "alpine").is_err());
        assert!(ImageNaming::new("r", "a", "", "alpine").is_err());
        assert!(ImageNaming::new("r", "a", "staging-2", "alpine").is_ok());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn sanitized_tag_is_tag_safe(raw in ".{0,200}") {
                let tag = sanitize_tag(&raw);
                prop_assert!(!tag.is_empty());
                prop_assert!(tag.len() <= MAX_TAG_LEN);
                prop_assert!(!tag.starts_with(['.', '-']));
                prop_assert!(tag
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));
            }

            #[test]
            fn safe_tags_are_unchanged(raw in "[A-Za-z0-9_][A-Za-z0-9._-]{0,60}") {
                prop_assert_eq!(sanitize_tag(&raw), raw);
            }
        }
    }
}
