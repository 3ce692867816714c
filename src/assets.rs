use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::Local;
use image::{DynamicImage, ImageFormat};
use tracing::instrument;

use crate::{error::AssetError, AssetKind};

const RUN_DIR_PREFIX: &str = "DocLayout";

/// Persists cropped figures and tables.
pub trait AssetStore {
    /// Saves `image` as asset `number` of `kind`, returning where it landed.
    fn store(
        &mut self,
        kind: AssetKind,
        number: u32,
        image: &DynamicImage,
    ) -> Result<PathBuf, AssetError>;
}

/// Stores assets as PNG files under a fresh, timestamped run directory:
/// `<root>/DocLayout_<stamp>/{figures,tables}/<kind>_<n>_<millis>.png`.
///
/// Nothing is created until the first asset or export needs it.
#[derive(Debug)]
pub struct FsAssetStore {
    root: PathBuf,
    run_dir: Option<PathBuf>,
}

impl FsAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            run_dir: None,
        }
    }

    /// The run directory, created on first use.
    pub fn run_dir(&mut self) -> io::Result<&Path> {
        if self.run_dir.is_none() {
            self.run_dir = Some(create_run_dir(&self.root)?);
        }
        Ok(self.run_dir.as_deref().unwrap_or(&self.root))
    }

    /// The run directory if anything has been written yet.
    pub fn existing_run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }
}

impl AssetStore for FsAssetStore {
    #[instrument(level = "debug", skip(self, image))]
    fn store(
        &mut self,
        kind: AssetKind,
        number: u32,
        image: &DynamicImage,
    ) -> Result<PathBuf, AssetError> {
        let dir = self
            .run_dir()
            .map(|dir| dir.join(kind.dir_name()))
            .map_err(|source| AssetError::Io {
                path: self.root.clone(),
                source,
            })?;
        fs::create_dir_all(&dir).map_err(|source| AssetError::Io {
            path: dir.clone(),
            source,
        })?;

        let file_name = format!(
            "{}_{number}_{}.png",
            kind.file_prefix(),
            Local::now().timestamp_millis()
        );
        let path = dir.join(file_name);
        image
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|source| AssetError::Encode {
                path: path.clone(),
                source,
            })?;
        let path = fs::canonicalize(&path).unwrap_or(path);
        log::debug!("Saved {kind:?} {number} to {}", path.display());
        Ok(path)
    }
}

/// Creates a directory under `root` that no other run is using.
pub fn create_run_dir(root: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(root)?;
    let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f");
    let base = format!("{RUN_DIR_PREFIX}_{stamp}");
    let mut attempt = 0;
    loop {
        let name = match attempt {
            0 => base.clone(),
            n => format!("{base}_{n}"),
        };
        let candidate = root.join(name);
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(err) => return Err(err),
        }
    }
}
