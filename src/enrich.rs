//! Synthetic identity and static metadata for enriched story records.

use chrono::Utc;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

const SUFFIX_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_-";
const SUFFIX_LEN: usize = 10;

/// Derived identity for one story record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlBundle {
    /// The random id (with `_G` marker), exposed as the record's `uuid` field.
    pub nano_id: String,
    pub urlslug: String,
    pub canurl: String,
    pub canurl1: String,
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9-]").expect("valid regex"));

/// URL-safe slug base for a title: lowercase, whitespace runs to hyphens,
/// everything outside `[a-z0-9-]` stripped, surrounding hyphens trimmed.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let hyphenated = WHITESPACE.replace_all(&lowered, "-");
    NON_SLUG
        .replace_all(&hyphenated, "")
        .trim_matches('-')
        .to_string()
}

/// Slug plus canonical and AMP-style URLs. The random suffix keeps slugs of
/// identical titles globally distinct, so randomness comes from the caller.
pub fn generate_urls<R: Rng>(title: &str, rng: &mut R) -> UrlBundle {
    let mut suffix = String::with_capacity(SUFFIX_LEN + 2);
    for _ in 0..SUFFIX_LEN {
        let idx = rng.gen_range(0..SUFFIX_ALPHABET.len());
        suffix.push(SUFFIX_ALPHABET[idx] as char);
    }
    suffix.push_str("_G");

    let urlslug = format!("{}_{suffix}", slugify(title));
    UrlBundle {
        canurl: format!("https://suvichaar.org/stories/{urlslug}"),
        canurl1: format!("https://stories.suvichaar.org/{urlslug}.html"),
        nano_id: suffix,
        urlslug,
    }
}

/// Current UTC time with an explicit `+00:00` offset.
pub fn iso_utc_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S+00:00").to_string()
}

/// Fixed roster of publishing profiles; one is assigned per record.
pub const USER_PROFILES: [(&str, &str); 3] = [
    (
        "Mayank",
        "https://www.instagram.com/iamkrmayank?igsh=eW82NW1qbjh4OXY2&utm_source=qr",
    ),
    (
        "Onip",
        "https://www.instagram.com/onip.mathur/profilecard/?igsh=MW5zMm5qMXhybGNmdA==",
    ),
    ("Naman", "https://njnaman.in/"),
];

pub fn pick_user<R: Rng>(rng: &mut R) -> (&'static str, &'static str) {
    USER_PROFILES[rng.gen_range(0..USER_PROFILES.len())]
}

/// Static publisher metadata merged into every enriched record.
pub const STATIC_METADATA: [(&str, &str); 20] = [
    ("lang", "en-US"),
    ("storygeneratorname", "Suvichaar Board"),
    ("contenttype", "Article"),
    ("storygeneratorversion", "1.0.0"),
    ("sitename", "Suvichaar"),
    ("generatorplatform", "Suvichaar"),
    (
        "sitelogo96x96",
        "https://media.suvichaar.org/filters:resize/96x96/media/brandasset/suvichaariconblack.png",
    ),
    (
        "sitelogo32x32",
        "https://media.suvichaar.org/filters:resize/32x32/media/brandasset/suvichaariconblack.png",
    ),
    (
        "sitelogo192x192",
        "https://media.suvichaar.org/filters:resize/192x192/media/brandasset/suvichaariconblack.png",
    ),
    (
        "sitelogo144x144",
        "https://media.suvichaar.org/filters:resize/144x144/media/brandasset/suvichaariconblack.png",
    ),
    (
        "sitelogo92x92",
        "https://media.suvichaar.org/filters:resize/92x92/media/brandasset/suvichaariconblack.png",
    ),
    (
        "sitelogo180x180",
        "https://media.suvichaar.org/filters:resize/180x180/media/brandasset/suvichaariconblack.png",
    ),
    ("publisher", "Suvichaar"),
    (
        "publisherlogosrc",
        "https://media.suvichaar.org/media/brandasset/suvichaariconblack.png",
    ),
    ("gtagid", "G-2D5GXVRK1E"),
    ("organization", "Suvichaar"),
    ("publisherlogoalt", "Suvichaarlogo"),
    ("person", "person"),
    ("s11btntext", "Read More"),
    ("s10caption1", "Your daily dose of inspiration"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn slugify_strips_punctuation() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Rumi on   Love  "), "rumi-on-love");
        assert_eq!(slugify("100% Effort"), "100-effort");
        assert_eq!(slugify("MIXED Case\tTitle"), "mixed-case-title");
    }

    #[test]
    fn slug_matches_contract_pattern() {
        let mut rng = StdRng::seed_from_u64(7);
        let bundle = generate_urls("Hello, World!", &mut rng);
        let pattern = Regex::new(r"^hello-world_[A-Za-z0-9_-]{10}_G$").unwrap();
        assert!(
            pattern.is_match(&bundle.urlslug),
            "slug {} does not match",
            bundle.urlslug
        );
        assert_eq!(
            bundle.canurl,
            format!("https://suvichaar.org/stories/{}", bundle.urlslug)
        );
        assert_eq!(
            bundle.canurl1,
            format!("https://stories.suvichaar.org/{}.html", bundle.urlslug)
        );
        assert!(bundle.nano_id.ends_with("_G"));
    }

    #[test]
    fn repeated_titles_get_distinct_slugs() {
        let mut rng = StdRng::seed_from_u64(42);
        let slugs: HashSet<String> = (0..1000)
            .map(|_| generate_urls("Hello, World!", &mut rng).urlslug)
            .collect();
        assert_eq!(slugs.len(), 1000);
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let a = generate_urls("Same Title", &mut StdRng::seed_from_u64(1));
        let b = generate_urls("Same Title", &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
    }

    #[test]
    fn timestamp_has_explicit_offset() {
        let ts = iso_utc_now();
        assert!(ts.ends_with("+00:00"), "got {ts}");
        assert_eq!(ts.len(), "2026-01-01T00:00:00+00:00".len());
    }

    #[test]
    fn user_roster_is_fixed() {
        let mut rng = StdRng::seed_from_u64(3);
        let (user, profile) = pick_user(&mut rng);
        assert!(USER_PROFILES.iter().any(|(u, p)| *u == user && *p == profile));
    }
}
