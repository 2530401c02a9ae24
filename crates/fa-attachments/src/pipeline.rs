//! Version materialization
//!
//! Writes the original into its public or private slot and derives every
//! configured version through the transformer, in declared order. No
//! cleanup happens here; rollback on failure is the engine's concern.

use tracing::debug;

use crate::config::AttachmentConfig;
use crate::engine::EngineError;
use crate::path::FilePath;
use crate::storage::DiskStore;
use crate::transform::Transformer;
use crate::upload::UploadedFile;

/// Write the original plus all configured versions for `file` and return
/// the unversioned relative path to persist on the host entity.
pub(crate) async fn materialize(
    public: &DiskStore,
    private: &DiskStore,
    transformer: &dyn Transformer,
    config: &AttachmentConfig,
    file: &FilePath,
    upload: &UploadedFile,
) -> Result<String, EngineError> {
    if !config.has_versions() {
        public.write(file, None, upload.data()).await?;
        return Ok(file.unversioned());
    }

    // With versions configured, public_original decides the original's
    // home: true keeps it private (no URL), false publishes it alongside
    // the derived versions.
    let original = if config.public_original {
        private.write(file, None, upload.data()).await?
    } else {
        public.write(file, None, upload.data()).await?
    };

    public.ensure_dir(file.dir()).await?;
    for (name, spec) in &config.versions {
        let output = public.absolute(file, Some(name));
        debug!(version = %name, output = %output.display(), "deriving version");
        transformer
            .transform(&original, &output, spec)
            .await
            .map_err(|source| EngineError::Transformation {
                version: name.clone(),
                source,
            })?;
    }

    Ok(file.unversioned())
}
