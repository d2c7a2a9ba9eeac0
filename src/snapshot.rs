//! Still image capture that takes the camera away from live viewers

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::pipeline::CameraSession;
use crate::store::{ImageStore, RecordId};
use crate::{CameraError, Result};

/// A persisted still image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    pub record: RecordId,
    pub location: PathBuf,
}

/// Captures single stills, preempting any live stream to do so.
///
/// A failed capture leaves neither a file nor a record behind. Viewers that
/// were cut off are expected to reconnect on their own.
pub struct SnapshotController {
    session: Arc<CameraSession>,
    store: Arc<dyn ImageStore>,
    output_dir: PathBuf,
}

impl SnapshotController {
    pub fn new(
        session: Arc<CameraSession>,
        store: Arc<dyn ImageStore>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session,
            store,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    #[instrument(skip(self))]
    pub fn capture(&self) -> Result<ImageHandle> {
        fs::create_dir_all(&self.output_dir).map_err(|e| {
            CameraError::CaptureFailed(format!(
                "output directory {}: {}",
                self.output_dir.display(),
                e
            ))
        })?;
        let location = self.output_dir.join(format!("{}.jpg", Uuid::new_v4()));

        debug!("Taking the camera for a snapshot");
        let captured = self
            .session
            .preempt_with(|device| device.capture_still(&location));

        if let Err(e) = captured {
            error!("Snapshot capture failed: {}", e);
            discard(&location);
            return Err(match e {
                CameraError::DeviceUnavailable(_) => e,
                other => CameraError::DeviceUnavailable(other.to_string()),
            });
        }

        let record = match self.store.save_image_record(&location.to_string_lossy()) {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to record snapshot {}: {}", location.display(), e);
                discard(&location);
                return Err(CameraError::CaptureFailed(e.to_string()));
            }
        };

        metrics::counter!("camwatch_snapshots_total").increment(1);
        info!("Snapshot {} saved to {}", record, location.display());
        Ok(ImageHandle { record, location })
    }

    /// Delete a snapshot record and its image file.
    pub fn delete(&self, record: RecordId) -> Result<bool> {
        let Some(removed) = self.store.delete_image_record(record)? else {
            warn!("Delete requested for unknown snapshot {}", record);
            return Ok(false);
        };

        debug!("Removing {}", removed.location);
        match fs::remove_file(&removed.location) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Snapshot file {} was already gone", removed.location);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }
}

fn discard(location: &Path) {
    match fs::remove_file(location) {
        Ok(()) => debug!("Removed partial snapshot {}", location.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", location.display(), e),
    }
}
