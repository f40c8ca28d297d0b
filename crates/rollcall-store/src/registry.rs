//! Student registry: one row and one stored image per registered roll number.

use crate::db::{is_constraint_violation, Database};
use chrono::Local;
use image::ImageFormat;
use rollcall_core::{
    best_face, Embedding, ExtractError, FaceExtractor, Identity, IntakeError,
    RegistrationRequest, StudentRecord,
};
use rusqlite::{params, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("roll number {0} is already registered")]
    DuplicateRoll(String),
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("unreadable image: {0}")]
    CorruptImage(String),
    #[error("invalid registration: {0}")]
    Intake(#[from] IntakeError),
    #[error("embedding extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stored record for roll {roll} is corrupt: {reason}")]
    CorruptRecord { roll: String, reason: String },
    #[error("sqlite: {0}")]
    Db(#[from] rusqlite::Error),
}

/// One failed item of a bulk registration.
#[derive(Debug)]
pub struct BulkFailure {
    pub source: String,
    pub error: RegistryError,
}

/// Outcome of a bulk registration. Successes are already committed.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub registered: Vec<StudentRecord>,
    pub failed: Vec<BulkFailure>,
}

impl BulkReport {
    pub fn succeeded(&self) -> usize {
        self.registered.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}

/// Student registry backed by the `students` table and an image directory.
pub struct Registry<'db> {
    db: &'db Database,
    images_dir: PathBuf,
}

impl<'db> Registry<'db> {
    pub fn new(db: &'db Database, images_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            images_dir: images_dir.into(),
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Register one student.
    ///
    /// Rejects an existing roll before doing any work, extracts the embedding
    /// of the most confident face, then stores image and row together: the row
    /// is only committed once the image is on disk.
    pub fn register(
        &self,
        request: RegistrationRequest,
        extractor: &mut dyn FaceExtractor,
    ) -> Result<StudentRecord, RegistryError> {
        let identity = request.identity;

        if self.contains(&identity.roll)? {
            return Err(RegistryError::DuplicateRoll(identity.roll));
        }

        let extension = image_extension(&request.image)?;
        let gray = image::load_from_memory(&request.image)
            .map_err(|e| RegistryError::CorruptImage(e.to_string()))?
            .to_luma8();

        let faces = extractor.extract_faces(&gray)?;
        let face_count = faces.len();
        let face = best_face(faces).ok_or(RegistryError::NoFaceDetected)?;
        if face_count > 1 {
            tracing::warn!(
                roll = %identity.roll,
                faces = face_count,
                confidence = face.bbox.confidence,
                "several faces in registration image, using the most confident"
            );
        }

        let record = StudentRecord {
            id: uuid::Uuid::new_v4().to_string(),
            image_path: self.images_dir.join(format!("{}.{extension}", identity.roll)),
            identity,
            embedding: face.embedding,
            registered_at: Local::now().to_rfc3339(),
        };

        let txn = self.db.write_txn()?;
        let inserted = txn.execute(
            "INSERT INTO students (id, roll, name, image_path, embedding, model_version, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.identity.roll,
                record.identity.name,
                record.image_path.to_string_lossy(),
                encode_embedding(&record.embedding.values),
                record.embedding.model_version,
                record.registered_at,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(RegistryError::DuplicateRoll(record.identity.roll));
            }
            Err(e) => return Err(e.into()),
        }

        self.write_image(&record.image_path, &request.image)?;
        if let Err(e) = txn.commit() {
            let _ = std::fs::remove_file(&record.image_path);
            return Err(e.into());
        }

        tracing::info!(
            roll = %record.identity.roll,
            name = %record.identity.name,
            image = %record.image_path.display(),
            "student registered"
        );
        Ok(record)
    }

    /// Register every item independently; failures are collected, never fatal.
    pub fn register_bulk<I>(&self, items: I, extractor: &mut dyn FaceExtractor) -> BulkReport
    where
        I: IntoIterator<Item = (String, Result<RegistrationRequest, IntakeError>)>,
    {
        let mut report = BulkReport::default();

        for (source, request) in items {
            let result = request
                .map_err(RegistryError::from)
                .and_then(|req| self.register(req, extractor));

            match result {
                Ok(record) => report.registered.push(record),
                Err(error) => {
                    tracing::warn!(source = %source, error = %error, "bulk item rejected");
                    report.failed.push(BulkFailure { source, error });
                }
            }
        }

        tracing::info!(
            registered = report.succeeded(),
            failed = report.failure_count(),
            "bulk registration finished"
        );
        report
    }

    /// Bulk registration from named image blobs (`<roll>_<name>.<ext>`).
    pub fn register_named_blobs<I>(&self, blobs: I, extractor: &mut dyn FaceExtractor) -> BulkReport
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        let items = blobs.into_iter().map(|(name, bytes)| {
            let request = RegistrationRequest::from_named_blob(&name, bytes);
            (name, request)
        });
        self.register_bulk(items, extractor)
    }

    /// All registered students, ordered by roll.
    pub fn list(&self) -> Result<Vec<StudentRecord>, RegistryError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT id, roll, name, image_path, embedding, model_version, registered_at
             FROM students ORDER BY roll ASC",
        )?;
        let rows = stmt.query_map([], raw_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    pub fn get(&self, roll: &str) -> Result<Option<StudentRecord>, RegistryError> {
        let raw = self
            .db
            .conn()
            .query_row(
                "SELECT id, roll, name, image_path, embedding, model_version, registered_at
                 FROM students WHERE roll = ?1",
                [roll],
                raw_record,
            )
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    pub fn contains(&self, roll: &str) -> Result<bool, RegistryError> {
        let found = self
            .db
            .conn()
            .query_row("SELECT 1 FROM students WHERE roll = ?1", [roll], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn count(&self) -> Result<usize, RegistryError> {
        let n: i64 = self
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    fn write_image(&self, path: &Path, bytes: &[u8]) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(&self.images_dir).map_err(io_err)?;
        std::fs::write(path, bytes).map_err(io_err)
    }
}

/// File extension for the stored copy; only JPEG and PNG uploads are accepted.
fn image_extension(bytes: &[u8]) -> Result<&'static str, RegistryError> {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => Ok("jpg"),
        Ok(ImageFormat::Png) => Ok("png"),
        Ok(other) => Err(RegistryError::CorruptImage(format!(
            "unsupported image format {other:?} (expected JPEG or PNG)"
        ))),
        Err(e) => Err(RegistryError::CorruptImage(e.to_string())),
    }
}

/// Embedding as a little-endian f32 BLOB.
pub(crate) fn encode_embedding(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Row as read from SQLite, before validation.
struct RawRecord {
    id: String,
    roll: String,
    name: String,
    image_path: String,
    embedding: Vec<u8>,
    model_version: Option<String>,
    registered_at: String,
}

fn raw_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        roll: row.get(1)?,
        name: row.get(2)?,
        image_path: row.get(3)?,
        embedding: row.get(4)?,
        model_version: row.get(5)?,
        registered_at: row.get(6)?,
    })
}

impl RawRecord {
    fn into_record(self) -> Result<StudentRecord, RegistryError> {
        let corrupt = |reason: String| RegistryError::CorruptRecord {
            roll: self.roll.clone(),
            reason,
        };
        let values = decode_embedding(&self.embedding)
            .ok_or_else(|| corrupt(format!("embedding blob of {} bytes", self.embedding.len())))?;
        let identity = Identity::new(&self.roll, &self.name).map_err(|e| corrupt(e.to_string()))?;

        Ok(StudentRecord {
            id: self.id,
            identity,
            embedding: Embedding {
                values,
                model_version: self.model_version,
            },
            image_path: PathBuf::from(self.image_path),
            registered_at: self.registered_at,
        })
    }
}
