use crate::error::BagError;
use crate::{algorithm, path, Algorithm, BagIt, ManifestKind};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;
use tracing::info;

impl BagIt {
    /// Write the content of `source` to a new tag file, outside `data/`
    ///
    /// `bagit.txt`, `bag-info.txt`, `fetch.txt` and manifests are written by [`BagIt::save()`]
    /// and cannot be added this way.
    pub async fn add_tag_file<R: AsyncRead + Unpin>(
        &mut self,
        source: R,
        path_in_bag: impl AsRef<Path>,
    ) -> Result<(), BagError> {
        self.add_file(ManifestKind::Tag, source, path_in_bag.as_ref())
            .await?;
        Ok(())
    }

    /// Copy a file or a whole directory as tag files, see [`BagIt::add_payload_file_from()`]
    pub async fn add_tag_file_from(
        &mut self,
        source: impl AsRef<Path>,
        path_in_bag: impl AsRef<Path>,
    ) -> Result<(), BagError> {
        self.add_file_from(ManifestKind::Tag, source.as_ref(), path_in_bag.as_ref())
            .await
    }

    /// Delete a tag file, and the directories left empty up to the bag directory
    pub async fn remove_tag_file(&mut self, path_in_bag: impl AsRef<Path>) -> Result<(), BagError> {
        self.remove_file(ManifestKind::Tag, path_in_bag.as_ref())
            .await
    }

    /// Track one more tag manifest algorithm
    ///
    /// It lists the same files as the other tag manifests. Without any, it lists the files the
    /// bag writes itself and every other tag file found on disk.
    pub async fn add_tag_manifest_algorithm(
        &mut self,
        algorithm: Algorithm,
        recompute: bool,
    ) -> Result<(), BagError> {
        let files = if self.tag_manifests.is_empty() {
            self.tag_files_on_disk().await?
        } else {
            self.tag_manifests.paths()
        };

        self.tag_manifests
            .add_algorithm(algorithm, files, recompute)
            .await?;

        info!(%algorithm, recompute, "added tag manifest algorithm");
        Ok(())
    }

    /// Stop tracking a tag manifest algorithm
    pub fn remove_tag_manifest_algorithm(&mut self, algorithm: &Algorithm) -> Result<(), BagError> {
        self.tag_manifests.remove_algorithm(algorithm)?;

        info!(%algorithm, "removed tag manifest algorithm");
        Ok(())
    }

    /// Control files and every file outside `data/`, except tag manifests
    async fn tag_files_on_disk(&self) -> Result<BTreeSet<PathBuf>, BagError> {
        let mut files = self.control_files().into_iter().collect::<BTreeSet<_>>();

        let data = self.data_dir();
        let found = path::walk_files(&self.base_dir)
            .await
            .map_err(BagError::io(&self.base_dir))?;

        files.extend(found.into_iter().filter(|file| {
            if file.starts_with(&data) {
                return false;
            }
            let is_top_level = file.parent() == Some(self.base_dir.as_path());
            let name = file
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();

            // Manifests of untracked payload algorithms are stale until the next save
            !(is_top_level
                && (name.starts_with(algorithm::TAG_MANIFEST_PREFIX)
                    || name.starts_with(algorithm::MANIFEST_PREFIX)))
        }));

        Ok(files)
    }
}
