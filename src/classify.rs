//! Content-type classification for attachments.
//!
//! An ordered suffix table is consulted first; the first matching rule wins.
//! Files no rule matches are sniffed from their leading bytes. Sniffing never
//! fails the upload: a read error degrades to [`DEFAULT_CONTENT_TYPE`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use crate::config::ClassifyConfig;
use crate::error::{DeployError, Result};

/// Content type for anything that cannot be identified.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Built-in suffix rules. Scripts, stylesheets and manifests are listed
/// because they are plain text and sniff as `text/plain`.
const BUILTIN_RULES: &[(&str, &str)] = &[
    (".js", "application/javascript"),
    (".mjs", "application/javascript"),
    (".css", "text/css"),
    (".html", "text/html"),
    (".htm", "text/html"),
    (".json", "application/json"),
    (".map", "application/json"),
    (".webmanifest", "application/manifest+json"),
    (".appcache", "text/cache-manifest"),
    (".manifest", "text/cache-manifest"),
    (".svg", "image/svg+xml"),
    (".xml", "application/xml"),
    (".md", "text/markdown"),
    (".csv", "text/csv"),
    (".txt", "text/plain"),
];

/// One suffix → content type mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeRule {
    /// Matched against the end of the lowercased file name. Kept lowercase
    /// by [`ContentTypeRule::new`] and [`ContentClassifier::new`].
    pub suffix: String,
    pub content_type: String,
}

impl ContentTypeRule {
    pub fn new(suffix: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into().to_lowercase(),
            content_type: content_type.into(),
        }
    }

    fn matches(&self, file_name: &str) -> bool {
        file_name.ends_with(self.suffix.as_str())
    }
}

/// The built-in rule table, in priority order.
pub fn builtin_rules() -> Vec<ContentTypeRule> {
    BUILTIN_RULES
        .iter()
        .map(|(suffix, ct)| ContentTypeRule::new(*suffix, *ct))
        .collect()
}

/// Return the content type of the first rule matching `path`, if any.
pub fn match_rules<'a>(rules: &'a [ContentTypeRule], path: &Path) -> Option<&'a str> {
    let file_name = path.file_name()?.to_string_lossy().to_lowercase();
    rules
        .iter()
        .find(|rule| rule.matches(&file_name))
        .map(|rule| rule.content_type.as_str())
}

/// Detects a content type from file contents.
#[async_trait]
pub trait ContentSniffer: Send + Sync {
    /// `Ok(None)` when the content is not recognized.
    async fn sniff(&self, path: &Path) -> Result<Option<String>>;
}

/// Magic-byte sniffer backed by `infer`, with a UTF-8 text heuristic.
#[derive(Debug, Clone)]
pub struct MagicSniffer {
    max_bytes: usize,
}

impl MagicSniffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes: max_bytes.max(1),
        }
    }
}

impl Default for MagicSniffer {
    fn default() -> Self {
        Self::new(8 * 1024)
    }
}

#[async_trait]
impl ContentSniffer for MagicSniffer {
    async fn sniff(&self, path: &Path) -> Result<Option<String>> {
        let degraded = |e: std::io::Error| DeployError::ClassificationDegraded {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let file = tokio::fs::File::open(path).await.map_err(degraded)?;
        let mut head = Vec::with_capacity(self.max_bytes);
        file.take(self.max_bytes as u64)
            .read_to_end(&mut head)
            .await
            .map_err(degraded)?;

        if let Some(kind) = infer::get(&head) {
            return Ok(Some(kind.mime_type().to_string()));
        }
        if looks_like_text(&head) {
            return Ok(Some("text/plain".to_string()));
        }
        Ok(None)
    }
}

/// Non-empty, NUL-free and valid UTF-8 (a sequence cut off at the end of the
/// sample is tolerated).
fn looks_like_text(head: &[u8]) -> bool {
    if head.is_empty() || head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}

/// Maps file paths to content types.
///
/// Results are memoized per path so a path classifies the same way for the
/// lifetime of the classifier.
pub struct ContentClassifier {
    rules: Vec<ContentTypeRule>,
    sniffer: Box<dyn ContentSniffer>,
    default_type: String,
    cache: Mutex<HashMap<PathBuf, String>>,
}

impl std::fmt::Debug for ContentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentClassifier")
            .field("rules", &self.rules.len())
            .field("default_type", &self.default_type)
            .finish_non_exhaustive()
    }
}

impl Default for ContentClassifier {
    fn default() -> Self {
        Self::new(
            builtin_rules(),
            Box::new(MagicSniffer::default()),
            DEFAULT_CONTENT_TYPE,
        )
    }
}

impl ContentClassifier {
    pub fn new(
        rules: Vec<ContentTypeRule>,
        sniffer: Box<dyn ContentSniffer>,
        default_type: impl Into<String>,
    ) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| ContentTypeRule::new(rule.suffix, rule.content_type))
            .collect();
        Self {
            rules,
            sniffer,
            default_type: default_type.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// User rules first, then the built-in table.
    pub fn from_config(config: &ClassifyConfig) -> Self {
        let mut rules = config.rules.clone();
        rules.extend(builtin_rules());
        Self::new(
            rules,
            Box::new(MagicSniffer::new(config.sniff_bytes)),
            config.default_content_type.clone(),
        )
    }

    /// Return the content type for `path`. Never fails.
    pub async fn classify(&self, path: &Path) -> String {
        if let Some(hit) = self.cached(path) {
            return hit;
        }

        let content_type = match match_rules(&self.rules, path) {
            Some(ct) => ct.to_string(),
            None => match self.sniffer.sniff(path).await {
                Ok(Some(ct)) => ct,
                Ok(None) => self.default_type.clone(),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        fallback = %self.default_type,
                        "Content sniffing failed"
                    );
                    self.default_type.clone()
                }
            },
        };

        tracing::debug!(path = %path.display(), content_type = %content_type, "Classified");
        self.remember(path, content_type)
    }

    fn cached(&self, path: &Path) -> Option<String> {
        let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.get(path).cloned()
    }

    /// Store the result unless another caller got there first; the first
    /// answer is the one every caller sees.
    fn remember(&self, path: &Path, content_type: String) -> String {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache
            .entry(path.to_path_buf())
            .or_insert(content_type)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSniffer {
        calls: Arc<AtomicUsize>,
        answer: Option<&'static str>,
    }

    #[async_trait]
    impl ContentSniffer for CountingSniffer {
        async fn sniff(&self, _path: &Path) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.map(str::to_string))
        }
    }

    fn counting(answer: Option<&'static str>) -> (ContentClassifier, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let sniffer = CountingSniffer {
            calls: calls.clone(),
            answer,
        };
        let classifier =
            ContentClassifier::new(builtin_rules(), Box::new(sniffer), DEFAULT_CONTENT_TYPE);
        (classifier, calls)
    }

    #[test]
    fn test_rule_table_first_match_wins() {
        let rules = vec![
            ContentTypeRule::new(".min.js", "text/x-minified"),
            ContentTypeRule::new(".js", "application/javascript"),
        ];
        assert_eq!(
            match_rules(&rules, Path::new("lib/jquery.min.js")),
            Some("text/x-minified")
        );
        assert_eq!(
            match_rules(&rules, Path::new("app.js")),
            Some("application/javascript")
        );
        assert_eq!(match_rules(&rules, Path::new("app.jsx")), None);
    }

    #[test]
    fn test_rule_match_is_case_insensitive() {
        let rules = builtin_rules();
        assert_eq!(match_rules(&rules, Path::new("STYLE.CSS")), Some("text/css"));
        assert_eq!(
            match_rules(&rules, Path::new("offline.appcache")),
            Some("text/cache-manifest")
        );
    }

    #[test]
    fn test_rule_suffix_lowercased_once() {
        let rule = ContentTypeRule::new(".JSX", "text/jsx");
        assert_eq!(rule.suffix, ".jsx");
        assert_eq!(
            match_rules(&[rule], Path::new("App.Jsx")),
            Some("text/jsx")
        );

        // Rules loaded from the config file skip `new`; the classifier
        // normalizes them.
        let loaded: ClassifyConfig = toml::from_str(
            r#"
            [[rules]]
            suffix = ".TMPL"
            content_type = "text/x-template"
            "#,
        )
        .unwrap();
        assert_eq!(loaded.rules[0].suffix, ".TMPL");
        let classifier = ContentClassifier::from_config(&loaded);
        assert_eq!(classifier.rules[0].suffix, ".tmpl");
        assert_eq!(
            match_rules(&classifier.rules, Path::new("page.tmpl")),
            Some("text/x-template")
        );
    }

    #[test]
    fn test_rules_match_file_name_only() {
        let rules = builtin_rules();
        assert_eq!(match_rules(&rules, Path::new("dir.js/blob")), None);
    }

    #[test]
    fn test_looks_like_text() {
        assert!(looks_like_text(b"hello world\n"));
        assert!(looks_like_text("héllo".as_bytes()));
        // Truncated multi-byte sequence at the end of the sample
        assert!(looks_like_text(&"é".as_bytes()[..1]));
        assert!(!looks_like_text(b"\x00\x01\x02"));
        assert!(!looks_like_text(&[0xff, 0xfe, 0x41, 0x42]));
        assert!(!looks_like_text(b""));
    }

    #[tokio::test]
    async fn test_rule_hit_skips_sniffer() {
        let (classifier, calls) = counting(Some("text/plain"));
        let ct = classifier.classify(Path::new("a.js")).await;
        assert_eq!(ct, "application/javascript");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unmatched_path_is_sniffed_once() {
        let (classifier, calls) = counting(Some("image/png"));
        let first = classifier.classify(Path::new("logo.bin")).await;
        let second = classifier.classify(Path::new("logo.bin")).await;
        assert_eq!(first, "image/png");
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unrecognized_content_uses_default() {
        let (classifier, _) = counting(None);
        let ct = classifier.classify(Path::new("c.bin")).await;
        assert_eq!(ct, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_sniff_failure_degrades() {
        let classifier = ContentClassifier::default();
        let ct = classifier
            .classify(Path::new("/definitely/not/here/blob.dat"))
            .await;
        assert_eq!(ct, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_magic_sniffer_detects_png_and_text() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("image.dat");
        std::fs::write(
            &png,
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0],
        )
        .unwrap();
        let text = dir.path().join("README");
        std::fs::write(&text, "plain words\n").unwrap();
        let binary = dir.path().join("c.bin");
        std::fs::write(&binary, [0u8, 159, 146, 150, 0, 1]).unwrap();

        let sniffer = MagicSniffer::default();
        assert_eq!(
            sniffer.sniff(&png).await.unwrap().as_deref(),
            Some("image/png")
        );
        assert_eq!(
            sniffer.sniff(&text).await.unwrap().as_deref(),
            Some("text/plain")
        );
        assert_eq!(sniffer.sniff(&binary).await.unwrap(), None);
    }

    #[test]
    fn test_user_rules_take_priority() {
        let config = ClassifyConfig {
            rules: vec![ContentTypeRule::new(".js", "text/javascript")],
            ..ClassifyConfig::default()
        };
        let classifier = ContentClassifier::from_config(&config);
        assert_eq!(
            match_rules(&classifier.rules, Path::new("a.js")),
            Some("text/javascript")
        );
    }
}
