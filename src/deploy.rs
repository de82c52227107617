//! Batch driver: turn a manifest into upload jobs and run them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::classify::ContentClassifier;
use crate::config::UploadConfig;
use crate::error::Result;
use crate::manifest::Manifest;
use crate::queue::{BatchReport, UploadQueue, DEFAULT_MAX_CONCURRENCY};
use crate::revision::RevisionTracker;
use crate::store::DocumentStore;
use crate::worker::{UploadJob, UploadWorker};

/// Knobs for one batch.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub max_concurrency: usize,
    /// Descend into subdirectories of listed directories.
    pub recursive: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            recursive: true,
        }
    }
}

impl From<&UploadConfig> for DeployOptions {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            recursive: config.recursive_directories,
        }
    }
}

/// Deploys manifests into one database.
pub struct Deployment {
    store: Arc<dyn DocumentStore>,
    classifier: Arc<ContentClassifier>,
    options: DeployOptions,
}

impl Deployment {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        classifier: Arc<ContentClassifier>,
        options: DeployOptions,
    ) -> Self {
        Self {
            store,
            classifier,
            options,
        }
    }

    /// Upload everything the manifest lists.
    ///
    /// Fails only when the document's starting revision cannot be read;
    /// per-file failures are in the report.
    pub async fn run(
        &self,
        manifest: &Manifest,
        progress: Option<&(dyn Fn(usize, usize) + Sync)>,
    ) -> Result<BatchReport> {
        if !manifest.description.is_empty() {
            tracing::info!(description = %manifest.description, "Deploying");
        }
        let jobs = collect_jobs(manifest, self.options.recursive);
        self.run_jobs(&manifest.document_name, jobs, progress).await
    }

    /// Upload `jobs` onto `document_id`, in order.
    pub async fn run_jobs(
        &self,
        document_id: &str,
        jobs: Vec<UploadJob>,
        progress: Option<&(dyn Fn(usize, usize) + Sync)>,
    ) -> Result<BatchReport> {
        let tracker = Arc::new(RevisionTracker::new(document_id));
        tracker.initialize(self.store.as_ref()).await?;

        tracing::info!(
            store = %self.store.describe(),
            document = document_id,
            jobs = jobs.len(),
            max_concurrency = self.options.max_concurrency,
            "Starting batch"
        );

        let worker = Arc::new(UploadWorker::new(
            self.store.clone(),
            tracker.clone(),
            self.classifier.clone(),
        ));
        let mut queue = UploadQueue::new(worker, self.options.max_concurrency);
        for job in jobs {
            // Outcomes are collected in the report.
            drop(queue.submit(job));
        }

        let mut report = queue.drain(progress).await;
        report.final_revision = Some(tracker.current().await);

        for failure in &report.failed {
            tracing::error!(
                path = %failure.job.path().display(),
                kind = failure.error.kind(),
                error = %failure.error,
                "Not uploaded"
            );
        }
        tracing::info!(
            document = document_id,
            uploaded = report.uploaded(),
            skipped = report.skipped,
            failed = report.failed.len(),
            "Batch finished"
        );
        Ok(report)
    }
}

/// Jobs for a manifest: listed attachments first, then directory contents.
///
/// A file reachable twice is uploaded once, judged by attachment name.
/// Paths without a usable attachment name and directories that cannot be
/// read are logged and skipped.
pub fn collect_jobs(manifest: &Manifest, recursive: bool) -> Vec<UploadJob> {
    let mut seen = HashSet::new();
    let mut jobs = Vec::new();
    let mut push = |path: PathBuf| {
        let job = UploadJob::new(path);
        let Some(name) = job.valid_attachment_name() else {
            tracing::warn!(
                path = %job.path().display(),
                name = %job.attachment_name(),
                "No usable attachment name, skipping"
            );
            return;
        };
        if seen.insert(name) {
            jobs.push(job);
        } else {
            tracing::debug!(path = %job.path().display(), "Duplicate file, skipped");
        }
    };

    for path in &manifest.attachments {
        push(path.clone());
    }
    for dir in &manifest.directories {
        match expand_directory(dir, recursive) {
            Ok(files) => {
                tracing::debug!(dir = %dir.display(), files = files.len(), "Directory expanded");
                files.into_iter().for_each(&mut push);
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Cannot list directory, skipping");
            }
        }
    }
    jobs
}

/// Regular files under `dir`, sorted by name at every level.
pub fn expand_directory(dir: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
    let meta = std::fs::metadata(dir)?;
    if !meta.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a directory",
        ));
    }

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .follow_links(true)
        .sort_by_file_name();

    let mut files = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Unreadable entry, skipping");
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_expand_directory_sorted_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.js"));
        touch(&dir.path().join("a.css"));
        touch(&dir.path().join("sub/c.html"));

        let files = expand_directory(dir.path(), true).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.css"),
                PathBuf::from("b.js"),
                PathBuf::from("sub/c.html"),
            ]
        );

        let flat = expand_directory(dir.path(), false).unwrap();
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn test_expand_missing_directory_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(expand_directory(&dir.path().join("nope"), true).is_err());
        touch(&dir.path().join("file.txt"));
        assert!(expand_directory(&dir.path().join("file.txt"), true).is_err());
    }

    #[test]
    fn test_collect_jobs_dedupes_and_skips_bad_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let static_dir = dir.path().join("static");
        touch(&static_dir.join("app.js"));
        touch(&static_dir.join("site.css"));

        let manifest = Manifest {
            document_name: "_design/app".into(),
            description: String::new(),
            attachments: vec![static_dir.join("site.css")],
            directories: vec![dir.path().join("missing"), static_dir.clone()],
        };
        let jobs = collect_jobs(&manifest, true);
        let paths: Vec<_> = jobs.iter().map(|j| j.path().to_path_buf()).collect();
        assert_eq!(paths, vec![static_dir.join("site.css"), static_dir.join("app.js")]);
    }

    #[test]
    fn test_collect_jobs_normalizes_and_rejects_names() {
        let manifest = Manifest {
            document_name: "_design/app".into(),
            description: String::new(),
            attachments: vec![
                PathBuf::from("shared/lib.js"),
                PathBuf::from("static/../shared/lib.js"),
                PathBuf::from("../shared/lib.js"),
                PathBuf::from("./"),
                PathBuf::from("index.html"),
            ],
            directories: vec![],
        };
        let jobs = collect_jobs(&manifest, true);
        let names: Vec<_> = jobs.iter().map(|j| j.attachment_name()).collect();
        assert_eq!(names, vec!["shared/lib.js", "index.html"]);
    }
}
