//! Attachment lifecycle coordination
//!
//! [`AttachmentEngine`] holds the immutable attribute registry, the storage
//! roots and the transformer; [`PendingChanges`] stages per-entity upload
//! and removal operations and is consumed exactly once by
//! [`AttachmentEngine::commit`].
//!
//! The commit ordering rules live here: uploads write the complete new
//! file set before anything at the previously stored path is deleted, so a
//! failure leaves the attribute on its old, valid state; removals clear
//! the field before deleting files, so a failed delete leaves orphaned
//! files on disk but never a stored path pointing at missing ones.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use fa_core::{AttachmentHost, AttachmentRoots, ValidationErrors};

use crate::config::{AttachmentConfig, AttachmentConfigError};
use crate::path::{FilePath, PathError};
use crate::pipeline;
use crate::storage::{DiskStore, StorageError};
use crate::transform::{TransformError, Transformer};
use crate::upload::UploadedFile;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Transformation failed for version {version:?}: {source}")]
    Transformation {
        version: String,
        #[source]
        source: TransformError,
    },
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error("Unknown attachment attribute: {0}")]
    UnknownAttribute(String),
    #[error("Unknown version {version:?} for attribute {attribute:?}")]
    UnknownVersion { attribute: String, version: String },
}

/// Per-attribute failures from [`AttachmentEngine::commit`] or
/// [`AttachmentEngine::destroy_all`].
///
/// One attribute's failure never blocks another attribute's processing;
/// everything that failed is collected here.
#[derive(Debug, Default, Error)]
#[error("Attachment processing failed for: {}", self.attribute_names())]
pub struct AttributeErrors {
    errors: BTreeMap<String, EngineError>,
}

impl AttributeErrors {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, attribute: &str) -> Option<&EngineError> {
        self.errors.get(attribute)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EngineError)> {
        self.errors.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn insert(&mut self, attribute: &str, error: EngineError) {
        self.errors.insert(attribute.to_string(), error);
    }

    fn attribute_names(&self) -> String {
        self.errors
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Staged attachment operations for one host entity instance.
///
/// Exclusively owned by the caller staging them; not meant to be shared
/// across concurrent saves of the same entity. Consumed by value at
/// commit, so a change set can never be committed twice and no staging is
/// possible afterwards.
#[derive(Debug, Default)]
pub struct PendingChanges {
    removals: BTreeSet<String>,
    uploads: BTreeMap<String, UploadedFile>,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a new file for the attribute. Last write wins, and an upload
    /// takes precedence over a removal staged for the same attribute.
    pub fn stage_upload(&mut self, attribute: impl Into<String>, file: UploadedFile) {
        self.uploads.insert(attribute.into(), file);
    }

    /// Flag the attribute's current file for deletion at commit.
    /// Idempotent.
    pub fn stage_removal(&mut self, attribute: impl Into<String>) {
        self.removals.insert(attribute.into());
    }

    pub fn is_clean(&self) -> bool {
        self.removals.is_empty() && self.uploads.is_empty()
    }

    pub fn staged_upload(&self, attribute: &str) -> Option<&UploadedFile> {
        self.uploads.get(attribute)
    }

    pub fn removal_staged(&self, attribute: &str) -> bool {
        self.removals.contains(attribute)
    }
}

/// Attachment path & versioning engine.
///
/// Constructed once at startup with the storage roots and the
/// transformation backend; attributes are registered afterwards and the
/// registry is immutable from then on.
pub struct AttachmentEngine {
    roots: AttachmentRoots,
    public: DiskStore,
    private: DiskStore,
    attributes: BTreeMap<String, AttachmentConfig>,
    transformer: Arc<dyn Transformer>,
}

impl AttachmentEngine {
    pub fn new(roots: AttachmentRoots, transformer: Arc<dyn Transformer>) -> Self {
        let public = DiskStore::new(roots.public_dir());
        let private = DiskStore::new(roots.private_dir());
        Self {
            roots,
            public,
            private,
            attributes: BTreeMap::new(),
            transformer,
        }
    }

    /// Register an attachment attribute. The configuration is validated
    /// here and immutable afterwards.
    pub fn attribute(
        &mut self,
        name: impl Into<String>,
        config: AttachmentConfig,
    ) -> Result<(), AttachmentConfigError> {
        let name = name.into();
        if name.is_empty() || name.contains(['.', '/', '\\']) {
            return Err(AttachmentConfigError::InvalidAttribute(name));
        }
        if self.attributes.contains_key(&name) {
            return Err(AttachmentConfigError::DuplicateAttribute(name));
        }
        config.validate()?;
        self.attributes.insert(name, config);
        Ok(())
    }

    pub fn config(&self, attribute: &str) -> Option<&AttachmentConfig> {
        self.attributes.get(attribute)
    }

    pub fn roots(&self) -> &AttachmentRoots {
        &self.roots
    }

    /// Pre-save validation for staged uploads: the size ceiling and, for
    /// image attributes, the delegated image check. Errors are keyed by
    /// attribute name; an attribute with errors is skipped by `commit`.
    #[instrument(skip_all)]
    pub async fn validate(&self, changes: &PendingChanges) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        for (attribute, upload) in &changes.uploads {
            self.validate_upload(attribute, upload, &mut errors).await;
        }
        errors
    }

    /// Commit staged changes against the host entity's field store.
    ///
    /// Removals not re-staged as uploads clear the field and delete every
    /// version file under both roots. Uploads resolve a fresh id, run the
    /// version pipeline, and only after the new files are written delete
    /// all versions at the previous stored path and update the field.
    /// Failures are collected per attribute; other attributes still
    /// commit.
    #[instrument(skip_all)]
    pub async fn commit<H: AttachmentHost>(
        &self,
        changes: PendingChanges,
        host: &mut H,
    ) -> Result<(), AttributeErrors> {
        let PendingChanges { removals, uploads } = changes;
        let mut failed = AttributeErrors::default();

        for attribute in &removals {
            if uploads.contains_key(attribute) {
                debug!(attribute = %attribute, "removal superseded by staged upload");
                continue;
            }
            if let Err(error) = self.remove_attribute(attribute, host).await {
                warn!(attribute = %attribute, %error, "removal failed");
                failed.insert(attribute, error);
            }
        }

        for (attribute, upload) in &uploads {
            if let Err(error) = self.commit_upload(attribute, upload, host).await {
                warn!(attribute = %attribute, %error, "upload commit failed");
                failed.insert(attribute, error);
            }
        }

        failed.into_result()
    }

    /// Delete every stored file for every configured attribute of the
    /// entity. Field values are left untouched; the entity is being
    /// discarded.
    #[instrument(skip_all)]
    pub async fn destroy_all<H: AttachmentHost>(&self, host: &H) -> Result<(), AttributeErrors> {
        let mut failed = AttributeErrors::default();

        for attribute in self.attributes.keys() {
            let Some(stored) = stored_value(host, attribute) else {
                continue;
            };
            let result = match FilePath::parse(&stored) {
                Ok(path) => self.delete_everywhere(&path).await,
                Err(e) => Err(e.into()),
            };
            if let Err(error) = result {
                warn!(attribute = %attribute, %error, "destroy failed");
                failed.insert(attribute, error);
            } else {
                info!(attribute = %attribute, path = %stored, "attachment destroyed");
            }
        }

        failed.into_result()
    }

    /// Browser URL for an attribute's stored file, or `None` when no file
    /// is attached. Version names are checked against the configuration.
    pub fn url<H: AttachmentHost>(
        &self,
        host: &H,
        attribute: &str,
        version: Option<&str>,
    ) -> Result<Option<String>, EngineError> {
        let config = self
            .attributes
            .get(attribute)
            .ok_or_else(|| EngineError::UnknownAttribute(attribute.to_string()))?;

        if let Some(v) = version {
            if !config.has_version(v) {
                return Err(EngineError::UnknownVersion {
                    attribute: attribute.to_string(),
                    version: v.to_string(),
                });
            }
        }

        match self.stored_path(host, attribute)? {
            Some(path) => Ok(Some(path.url(self.roots.url_prefix(), version))),
            None => Ok(None),
        }
    }

    /// Parsed stored path for an attribute, or `None` when no file is
    /// attached.
    pub fn stored_path<H: AttachmentHost>(
        &self,
        host: &H,
        attribute: &str,
    ) -> Result<Option<FilePath>, EngineError> {
        if !self.attributes.contains_key(attribute) {
            return Err(EngineError::UnknownAttribute(attribute.to_string()));
        }
        match stored_value(host, attribute) {
            Some(stored) => Ok(Some(FilePath::parse(&stored)?)),
            None => Ok(None),
        }
    }

    async fn remove_attribute<H: AttachmentHost>(
        &self,
        attribute: &str,
        host: &mut H,
    ) -> Result<(), EngineError> {
        let Some(stored) = stored_value(host, attribute) else {
            return Ok(());
        };
        let path = FilePath::parse(&stored)?;

        host.set_field(&field_name(attribute), None);
        self.delete_everywhere(&path).await?;

        info!(attribute = %attribute, path = %path, "attachment removed");
        Ok(())
    }

    async fn commit_upload<H: AttachmentHost>(
        &self,
        attribute: &str,
        upload: &UploadedFile,
        host: &mut H,
    ) -> Result<(), EngineError> {
        let config = self
            .attributes
            .get(attribute)
            .ok_or_else(|| EngineError::UnknownAttribute(attribute.to_string()))?;

        // An upload that fails validation must never reach the write path,
        // even when the host skipped the validation phase.
        let mut errors = ValidationErrors::new();
        self.validate_upload(attribute, upload, &mut errors).await;
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }

        let previous = stored_value(host, attribute)
            .map(|stored| FilePath::parse(&stored))
            .transpose()?;

        let file = FilePath::generate(
            config.base_dir_for(attribute),
            attribute,
            &host.identity(),
            upload.filename(),
        )?;

        let committed = match pipeline::materialize(
            &self.public,
            &self.private,
            self.transformer.as_ref(),
            config,
            &file,
            upload,
        )
        .await
        {
            Ok(committed) => committed,
            Err(error) => {
                // Roll back whatever the pipeline already wrote for the
                // fresh id; the previous files are untouched either way.
                if let Err(cleanup) = self.delete_everywhere(&file).await {
                    warn!(attribute = %attribute, %cleanup, "rollback cleanup failed");
                }
                return Err(error);
            }
        };

        if let Some(previous) = previous {
            self.delete_everywhere(&previous).await?;
        }
        host.set_field(&field_name(attribute), Some(committed.clone()));

        info!(attribute = %attribute, path = %committed, "attachment stored");
        Ok(())
    }

    async fn validate_upload(
        &self,
        attribute: &str,
        upload: &UploadedFile,
        errors: &mut ValidationErrors,
    ) {
        let Some(config) = self.attributes.get(attribute) else {
            errors.add(attribute, "is not a configured attachment attribute");
            return;
        };

        if let Some(max) = config.max_size {
            if upload.size() > max {
                errors.add(attribute, "file too large");
            }
        }

        if config.is_image && !self.check_image(upload).await {
            errors.add(attribute, "is not an image");
        }
    }

    /// The image check is path-based (it shells out to the backend), so
    /// the in-memory upload is spooled to a temp file first.
    async fn check_image(&self, upload: &UploadedFile) -> bool {
        match spool(upload) {
            Ok(tmp) => self.transformer.is_image(tmp.path()).await,
            Err(error) => {
                warn!(%error, "failed to spool upload for image check");
                false
            }
        }
    }

    async fn delete_everywhere(&self, path: &FilePath) -> Result<(), EngineError> {
        self.public.delete_all_versions(path).await?;
        self.private.delete_all_versions(path).await?;
        Ok(())
    }
}

fn field_name(attribute: &str) -> String {
    format!("{}_path", attribute)
}

fn stored_value<H: AttachmentHost>(host: &H, attribute: &str) -> Option<String> {
    host.field(&field_name(attribute))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn spool(upload: &UploadedFile) -> std::io::Result<tempfile::NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    let suffix = upload.extension().map(|e| format!(".{e}"));
    if let Some(suffix) = &suffix {
        builder.suffix(suffix.as_str());
    }
    let mut tmp = builder.tempfile()?;
    tmp.write_all(upload.data())?;
    tmp.flush()?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use fa_core::MemoryHost;

    use crate::config::{ImageOp, VersionSpec};

    /// Copies the original to the output slot; optionally reports uploads
    /// as non-images or fails every transform.
    struct TestTransformer {
        treat_as_image: bool,
        fail_transform: bool,
    }

    impl Default for TestTransformer {
        fn default() -> Self {
            Self {
                treat_as_image: true,
                fail_transform: false,
            }
        }
    }

    #[async_trait]
    impl Transformer for TestTransformer {
        async fn transform(
            &self,
            input: &Path,
            output: &Path,
            _spec: &VersionSpec,
        ) -> Result<(), TransformError> {
            if self.fail_transform {
                return Err(TransformError::Backend("refusing to transform".to_string()));
            }
            tokio::fs::copy(input, output)
                .await
                .map(|_| ())
                .map_err(|e| TransformError::Backend(e.to_string()))
        }

        async fn is_image(&self, _path: &Path) -> bool {
            self.treat_as_image
        }
    }

    /// Records whether a probed path still existed when transform ran.
    struct OrderingProbe {
        probed: PathBuf,
        present_during_transform: AtomicBool,
    }

    #[async_trait]
    impl Transformer for OrderingProbe {
        async fn transform(
            &self,
            input: &Path,
            output: &Path,
            _spec: &VersionSpec,
        ) -> Result<(), TransformError> {
            if self.probed.exists() {
                self.present_during_transform.store(true, Ordering::SeqCst);
            }
            tokio::fs::copy(input, output)
                .await
                .map(|_| ())
                .map_err(|e| TransformError::Backend(e.to_string()))
        }

        async fn is_image(&self, _path: &Path) -> bool {
            true
        }
    }

    fn roots(tmp: &TempDir) -> AttachmentRoots {
        AttachmentRoots::new(
            tmp.path().join("public"),
            tmp.path().join("private"),
            "/photo_data",
        )
        .unwrap()
    }

    fn engine(tmp: &TempDir, transformer: Arc<dyn Transformer>) -> AttachmentEngine {
        AttachmentEngine::new(roots(tmp), transformer)
    }

    fn versioned_config() -> AttachmentConfig {
        AttachmentConfig::image().version("small", VersionSpec::image([ImageOp::resize(10, 10)]))
    }

    fn upload(filename: &str, size: usize) -> UploadedFile {
        UploadedFile::new(filename, vec![0xAB; size])
    }

    #[test]
    fn test_attribute_registration_rules() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, Arc::new(TestTransformer::default()));

        engine.attribute("picture", versioned_config()).unwrap();

        assert!(matches!(
            engine.attribute("picture", AttachmentConfig::new()),
            Err(AttachmentConfigError::DuplicateAttribute(_))
        ));
        assert!(matches!(
            engine.attribute("bad/name", AttachmentConfig::new()),
            Err(AttachmentConfigError::InvalidAttribute(_))
        ));
        assert!(engine
            .attribute("broken", AttachmentConfig::new().max_size(0))
            .is_err());
    }

    #[tokio::test]
    async fn test_first_upload_without_versions() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, Arc::new(TestTransformer::default()));
        engine.attribute("document", AttachmentConfig::new()).unwrap();

        let mut host = MemoryHost::new(1);
        let mut changes = PendingChanges::new();
        changes.stage_upload("document", upload("notes.txt", 64));

        engine.commit(changes, &mut host).await.unwrap();

        let stored = host.field("document_path").unwrap().to_string();
        let path = FilePath::parse(&stored).unwrap();
        assert!(stored.starts_with("document/"));
        assert_eq!(path.ext(), ".txt");
        assert!(tmp.path().join("public").join(&stored).is_file());
        assert!(!tmp.path().join("private").join(&stored).exists());
    }

    // Configuration {versions: {"small"}, public_original: false}: the
    // original and the derived version are both public, the field holds
    // the unversioned path and the URL points at the derived file.
    #[tokio::test]
    async fn test_versioned_upload_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, Arc::new(TestTransformer::default()));
        engine.attribute("picture", versioned_config()).unwrap();

        let mut host = MemoryHost::new(7);
        let mut changes = PendingChanges::new();
        changes.stage_upload("picture", upload("cat.png", 2048));

        assert!(engine.validate(&changes).await.is_empty());
        engine.commit(changes, &mut host).await.unwrap();

        let stored = host.field("picture_path").unwrap().to_string();
        let path = FilePath::parse(&stored).unwrap();
        assert_eq!(path.ext(), ".png");

        let public = tmp.path().join("public");
        assert!(public.join(path.unversioned()).is_file());
        assert!(public.join(path.versioned("small")).is_file());
        assert!(!tmp.path().join("private").join(path.unversioned()).exists());

        assert_eq!(
            engine.url(&host, "picture", Some("small")).unwrap().unwrap(),
            format!("/photo_data/{}", path.versioned("small"))
        );
        assert_eq!(
            engine.url(&host, "picture", None).unwrap().unwrap(),
            format!("/photo_data/{}", path.unversioned())
        );
    }

    #[tokio::test]
    async fn test_private_original_placement() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, Arc::new(TestTransformer::default()));
        engine
            .attribute("picture", versioned_config().public_original(true))
            .unwrap();

        let mut host = MemoryHost::new(7);
        let mut changes = PendingChanges::new();
        changes.stage_upload("picture", upload("cat.png", 2048));

        engine.commit(changes, &mut host).await.unwrap();

        let path = engine.stored_path(&host, "picture").unwrap().unwrap();
        assert!(tmp.path().join("private").join(path.unversioned()).is_file());
        assert!(!tmp.path().join("public").join(path.unversioned()).exists());
        assert!(tmp.path().join("public").join(path.versioned("small")).is_file());
    }

    #[tokio::test]
    async fn test_replacement_writes_new_before_deleting_old() {
        let tmp = TempDir::new().unwrap();
        let mut first = engine(&tmp, Arc::new(TestTransformer::default()));
        first.attribute("picture", versioned_config()).unwrap();

        let mut host = MemoryHost::new(7);
        let mut changes = PendingChanges::new();
        changes.stage_upload("picture", upload("cat.png", 2048));
        first.commit(changes, &mut host).await.unwrap();

        let old = first.stored_path(&host, "picture").unwrap().unwrap();
        let old_abs = tmp.path().join("public").join(old.unversioned());

        let probe = Arc::new(OrderingProbe {
            probed: old_abs.clone(),
            present_during_transform: AtomicBool::new(false),
        });
        let mut second = engine(&tmp, probe.clone() as Arc<dyn Transformer>);
        second.attribute("picture", versioned_config()).unwrap();

        let mut changes = PendingChanges::new();
        changes.stage_upload("picture", upload("dog.jpg", 1024));
        second.commit(changes, &mut host).await.unwrap();

        let new = second.stored_path(&host, "picture").unwrap().unwrap();
        assert_ne!(new.file_id(), old.file_id());
        assert_eq!(new.ext(), ".jpg");

        // old files still existed while the new version was being derived
        assert!(probe.present_during_transform.load(Ordering::SeqCst));

        // and are gone now, along with every old version
        assert!(!old_abs.exists());
        assert!(!tmp.path().join("public").join(old.versioned("small")).exists());
        assert!(tmp.path().join("public").join(new.unversioned()).is_file());
        assert!(tmp.path().join("public").join(new.versioned("small")).is_file());
    }

    #[tokio::test]
    async fn test_transformation_failure_keeps_previous_state() {
        let tmp = TempDir::new().unwrap();
        let mut working = engine(&tmp, Arc::new(TestTransformer::default()));
        working
            .attribute(
                "picture",
                AttachmentConfig::image()
                    .version("thumb", VersionSpec::image([ImageOp::thumbnail(64, 64)])),
            )
            .unwrap();

        let mut host = MemoryHost::new(7);
        let mut changes = PendingChanges::new();
        changes.stage_upload("picture", upload("cat.png", 2048));
        working.commit(changes, &mut host).await.unwrap();

        let old = working.stored_path(&host, "picture").unwrap().unwrap();
        let stored_before = host.field("picture_path").unwrap().to_string();

        let mut broken = engine(
            &tmp,
            Arc::new(TestTransformer {
                treat_as_image: true,
                fail_transform: true,
            }),
        );
        broken
            .attribute(
                "picture",
                AttachmentConfig::image()
                    .version("thumb", VersionSpec::image([ImageOp::thumbnail(64, 64)])),
            )
            .unwrap();

        let mut changes = PendingChanges::new();
        changes.stage_upload("picture", upload("dog.png", 1024));
        let failed = broken.commit(changes, &mut host).await.unwrap_err();

        match failed.get("picture").unwrap() {
            EngineError::Transformation { version, .. } => assert_eq!(version, "thumb"),
            other => panic!("unexpected error: {other}"),
        }

        // previous field value and files are untouched
        assert_eq!(host.field("picture_path").unwrap(), stored_before);
        assert!(tmp.path().join("public").join(old.unversioned()).is_file());
        assert!(tmp.path().join("public").join(old.versioned("thumb")).is_file());

        // nothing from the aborted id lingers
        let day_dir = tmp.path().join("public").join(old.dir());
        let survivors: Vec<_> = std::fs::read_dir(day_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| !name.starts_with(old.file_id()))
            .collect();
        assert!(survivors.is_empty(), "orphaned files: {survivors:?}");
    }

    // Stage a removal against stored path 2024/01/01/abc.jpg: afterwards
    // nothing matching abc* remains under either root and the field is
    // empty.
    #[tokio::test]
    async fn test_removal_deletes_everything_and_clears_field() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, Arc::new(TestTransformer::default()));
        engine.attribute("picture", versioned_config()).unwrap();

        let abc = FilePath::parse("2024/01/01/abc.jpg").unwrap();
        let public = DiskStore::new(tmp.path().join("public"));
        let private = DiskStore::new(tmp.path().join("private"));
        public.write(&abc, None, b"original").await.unwrap();
        public.write(&abc, Some("small"), b"small").await.unwrap();
        private.write(&abc, None, b"private original").await.unwrap();

        let mut host = MemoryHost::new(7).with_field("picture_path", "2024/01/01/abc.jpg");
        let mut changes = PendingChanges::new();
        changes.stage_removal("picture");
        changes.stage_removal("picture"); // idempotent

        engine.commit(changes, &mut host).await.unwrap();

        assert_eq!(host.field("picture_path"), None);
        assert_eq!(public.delete_all_versions(&abc).await.unwrap(), 0);
        assert_eq!(private.delete_all_versions(&abc).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_removal_of_empty_attribute_is_noop() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, Arc::new(TestTransformer::default()));
        engine.attribute("picture", versioned_config()).unwrap();

        let mut host = MemoryHost::new(7);
        let mut changes = PendingChanges::new();
        changes.stage_removal("picture");

        engine.commit(changes, &mut host).await.unwrap();
        assert_eq!(host.field("picture_path"), None);
    }

    #[tokio::test]
    async fn test_upload_wins_over_removal() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, Arc::new(TestTransformer::default()));
        engine.attribute("picture", versioned_config()).unwrap();

        let abc = FilePath::parse("2024/01/01/abc.jpg").unwrap();
        let public = DiskStore::new(tmp.path().join("public"));
        public.write(&abc, None, b"old original").await.unwrap();

        let mut host = MemoryHost::new(7).with_field("picture_path", "2024/01/01/abc.jpg");
        let mut changes = PendingChanges::new();
        changes.stage_removal("picture");
        changes.stage_upload("picture", upload("new.png", 512));
        assert!(changes.removal_staged("picture"));
        assert!(changes.staged_upload("picture").is_some());

        engine.commit(changes, &mut host).await.unwrap();

        let new = engine.stored_path(&host, "picture").unwrap().unwrap();
        assert_ne!(new.file_id(), "abc");
        assert!(public.exists(&new, None).await);
        assert_eq!(public.delete_all_versions(&abc).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, Arc::new(TestTransformer::default()));
        engine
            .attribute("picture", versioned_config().max_size(10))
            .unwrap();

        let mut host = MemoryHost::new(7);
        let mut changes = PendingChanges::new();
        changes.stage_upload("picture", upload("big.png", 27));

        let errors = engine.validate(&changes).await;
        assert_eq!(errors.get("picture").unwrap(), ["file too large"]);

        let failed = engine.commit(changes, &mut host).await.unwrap_err();
        assert!(matches!(
            failed.get("picture").unwrap(),
            EngineError::Validation(_)
        ));
        assert_eq!(host.field("picture_path"), None);
        assert!(!tmp.path().join("public").exists());
        assert!(!tmp.path().join("private").exists());
    }

    #[tokio::test]
    async fn test_non_image_upload_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(
            &tmp,
            Arc::new(TestTransformer {
                treat_as_image: false,
                fail_transform: false,
            }),
        );
        engine.attribute("picture", versioned_config()).unwrap();

        let mut changes = PendingChanges::new();
        changes.stage_upload("picture", upload("fake.png", 128));

        let errors = engine.validate(&changes).await;
        assert_eq!(errors.get("picture").unwrap(), ["is not an image"]);
    }

    #[tokio::test]
    async fn test_attribute_failures_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, Arc::new(TestTransformer::default()));
        engine.attribute("picture", versioned_config()).unwrap();

        let mut host = MemoryHost::new(7);
        let mut changes = PendingChanges::new();
        changes.stage_upload("picture", upload("cat.png", 512));
        changes.stage_upload("unconfigured", upload("other.txt", 16));

        let failed = engine.commit(changes, &mut host).await.unwrap_err();

        assert!(matches!(
            failed.get("unconfigured").unwrap(),
            EngineError::UnknownAttribute(_)
        ));
        assert!(failed.get("picture").is_none());
        assert!(host.field("picture_path").is_some());
    }

    #[tokio::test]
    async fn test_destroy_all_leaves_fields() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, Arc::new(TestTransformer::default()));
        engine.attribute("picture", versioned_config()).unwrap();
        engine.attribute("avatar", AttachmentConfig::new()).unwrap();

        let mut host = MemoryHost::new(7);
        let mut changes = PendingChanges::new();
        changes.stage_upload("picture", upload("cat.png", 512));
        changes.stage_upload("avatar", upload("me.jpg", 256));
        engine.commit(changes, &mut host).await.unwrap();

        let picture = engine.stored_path(&host, "picture").unwrap().unwrap();
        let avatar = engine.stored_path(&host, "avatar").unwrap().unwrap();

        engine.destroy_all(&host).await.unwrap();

        let public = DiskStore::new(tmp.path().join("public"));
        assert!(!public.exists(&picture, None).await);
        assert!(!public.exists(&picture, Some("small")).await);
        assert!(!public.exists(&avatar, None).await);

        // fields untouched, the entity is being discarded anyway
        assert!(host.field("picture_path").is_some());
        assert!(host.field("avatar_path").is_some());
    }

    #[tokio::test]
    async fn test_url_accessors() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, Arc::new(TestTransformer::default()));
        engine.attribute("picture", versioned_config()).unwrap();

        let host = MemoryHost::new(7).with_field("picture_path", "photos/2024/01/01/abc.png");

        assert_eq!(
            engine.url(&host, "picture", None).unwrap().unwrap(),
            "/photo_data/photos/2024/01/01/abc.png"
        );
        assert_eq!(
            engine.url(&host, "picture", Some("small")).unwrap().unwrap(),
            "/photo_data/photos/2024/01/01/abc_small.png"
        );

        let empty = MemoryHost::new(8);
        assert_eq!(engine.url(&empty, "picture", None).unwrap(), None);

        assert!(matches!(
            engine.url(&host, "picture", Some("huge")),
            Err(EngineError::UnknownVersion { .. })
        ));
        assert!(matches!(
            engine.url(&host, "missing", None),
            Err(EngineError::UnknownAttribute(_))
        ));
    }

    #[tokio::test]
    async fn test_clean_changes_commit_is_noop() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, Arc::new(TestTransformer::default()));
        engine.attribute("picture", versioned_config()).unwrap();

        let changes = PendingChanges::new();
        assert!(changes.is_clean());

        let mut host = MemoryHost::new(7);
        engine.commit(changes, &mut host).await.unwrap();
        assert_eq!(host.field("picture_path"), None);
    }

    #[tokio::test]
    async fn test_transient_host_gets_unique_ids() {
        let tmp = TempDir::new().unwrap();
        let mut engine = engine(&tmp, Arc::new(TestTransformer::default()));
        engine.attribute("picture", AttachmentConfig::new()).unwrap();

        let mut a = MemoryHost::transient();
        let mut b = MemoryHost::transient();

        let mut changes = PendingChanges::new();
        changes.stage_upload("picture", upload("cat.png", 64));
        engine.commit(changes, &mut a).await.unwrap();

        let mut changes = PendingChanges::new();
        changes.stage_upload("picture", upload("cat.png", 64));
        engine.commit(changes, &mut b).await.unwrap();

        assert_ne!(a.field("picture_path"), b.field("picture_path"));
    }
}
