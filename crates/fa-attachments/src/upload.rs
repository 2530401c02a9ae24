//! Uploaded file handle
//!
//! The engine receives uploads as in-memory payloads; transport and form
//! handling live outside this crate.

use bytes::Bytes;

/// An uploaded file staged for an attachment attribute.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    filename: String,
    data: Bytes,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }

    /// Original filename as sent by the client; only its extension ends up
    /// in stored paths.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Extension of the original filename, without the dot
    pub fn extension(&self) -> Option<&str> {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
    }

    /// MIME type guessed from the original filename
    pub fn content_type(&self) -> String {
        mime_guess::from_path(&self.filename)
            .first_or_octet_stream()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_accessors() {
        let upload = UploadedFile::new("cat.png", Bytes::from_static(b"pretend png"));

        assert_eq!(upload.filename(), "cat.png");
        assert_eq!(upload.size(), 11);
        assert_eq!(upload.data(), b"pretend png");
    }

    #[test]
    fn test_extension() {
        assert_eq!(UploadedFile::new("cat.png", "").extension(), Some("png"));
        assert_eq!(UploadedFile::new("archive.tar.gz", "").extension(), Some("gz"));
        assert_eq!(UploadedFile::new("README", "").extension(), None);
    }

    #[test]
    fn test_content_type_guessing() {
        assert_eq!(UploadedFile::new("cat.png", "").content_type(), "image/png");
        assert_eq!(
            UploadedFile::new("unknown.zzz", "").content_type(),
            "application/octet-stream"
        );
    }
}
