//! Adding and removing files listed in payload or tag manifests

use crate::checksum::compute_checksums_file;
use crate::error::BagError;
use crate::{path, Algorithm, BagIt, Checksum, ManifestKind, Manifests};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;

impl BagIt {
    pub(crate) fn manifests(&self, kind: ManifestKind) -> &Manifests {
        match kind {
            ManifestKind::Payload => &self.payload_manifests,
            ManifestKind::Tag => &self.tag_manifests,
        }
    }

    fn manifests_mut(&mut self, kind: ManifestKind) -> &mut Manifests {
        match kind {
            ManifestKind::Payload => &mut self.payload_manifests,
            ManifestKind::Tag => &mut self.tag_manifests,
        }
    }

    /// Directory the files of `kind` live in, never deleted when pruning
    fn root(&self, kind: ManifestKind) -> PathBuf {
        match kind {
            ManifestKind::Payload => self.data_dir(),
            ManifestKind::Tag => self.base_dir.clone(),
        }
    }

    fn resolve(&self, kind: ManifestKind, path: &Path) -> Result<PathBuf, BagError> {
        match kind {
            ManifestKind::Payload => self.resolve_payload_path(path),
            ManifestKind::Tag => self.resolve_tag_path(path),
        }
    }

    /// Destination of an add must be free, on disk and as a fetch target
    fn check_destination(&self, destination: &Path) -> Result<(), BagError> {
        if destination.exists() {
            return Err(BagError::already_exists("file", destination));
        }
        if self.fetch_items.contains_path(destination) {
            return Err(BagError::already_exists("fetch item", destination));
        }
        Ok(())
    }

    async fn checksums(
        &self,
        kind: ManifestKind,
        file: &Path,
    ) -> Result<BTreeMap<Algorithm, Checksum>, BagError> {
        compute_checksums_file(file, &self.manifests(kind).algorithms())
            .await
            .map_err(BagError::checksum(file))
    }

    /// Write `source` to the new file at `path`, list it in the manifests of `kind`
    pub(crate) async fn add_file<R: AsyncRead + Unpin>(
        &mut self,
        kind: ManifestKind,
        mut source: R,
        path: &Path,
    ) -> Result<PathBuf, BagError> {
        let destination = self.resolve(kind, path)?;
        self.check_destination(&destination)?;

        write_new_file(&mut source, &destination).await?;

        let checksums = self.checksums(kind, &destination).await?;
        self.manifests_mut(kind).insert(&destination, &checksums);

        debug!(path = %destination.display(), ?kind, "added file");
        Ok(destination)
    }

    /// Copy the file or directory `source` to `path`, list the copies in the manifests of `kind`
    ///
    /// Directories are imported recursively. When one file cannot be added nothing is listed,
    /// but the files copied before it stay on disk.
    pub(crate) async fn add_file_from(
        &mut self,
        kind: ManifestKind,
        source: &Path,
        path: &Path,
    ) -> Result<(), BagError> {
        let metadata = fs::metadata(source).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BagError::not_found("source", source.display()),
            _ => BagError::io(source)(e),
        })?;

        if !metadata.is_dir() {
            let file = File::open(source).await.map_err(BagError::io(source))?;
            self.add_file(kind, file, path).await?;
            return Ok(());
        }

        let mut copied = Vec::new();
        let mut backlog = vec![(source.to_path_buf(), path.to_path_buf())];

        while let Some((directory, relative)) = backlog.pop() {
            let mut entries = fs::read_dir(&directory)
                .await
                .map_err(BagError::io(&directory))?;

            let mut children = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(BagError::io(&directory))?
            {
                children.push(entry);
            }
            children.sort_by_key(|entry| entry.file_name());

            for entry in children {
                let child_source = entry.path();
                let child_relative = relative.join(entry.file_name());
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(BagError::io(&child_source))?;

                if file_type.is_dir() {
                    backlog.push((child_source, child_relative));
                    continue;
                }

                let destination = self.resolve(kind, &child_relative)?;
                self.check_destination(&destination)?;

                let mut file = File::open(&child_source)
                    .await
                    .map_err(BagError::io(&child_source))?;
                write_new_file(&mut file, &destination).await?;

                let checksums = self.checksums(kind, &destination).await?;
                copied.push((destination, checksums));
            }
        }

        let manifests = self.manifests_mut(kind);
        for (destination, checksums) in &copied {
            manifests.insert(destination, checksums);
        }

        debug!(source = %source.display(), files = copied.len(), ?kind, "imported directory");
        Ok(())
    }

    /// Delete the file at `path`, forget it in the manifests of `kind`, prune empty directories
    pub(crate) async fn remove_file(
        &mut self,
        kind: ManifestKind,
        path: &Path,
    ) -> Result<(), BagError> {
        let target = self.resolve(kind, path)?;

        let metadata = match fs::metadata(&target).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BagError::not_found("file", target.display()))
            }
            Err(e) => return Err(BagError::io(&target)(e)),
        };
        if metadata.is_dir() {
            return Err(BagError::invalid(format!(
                "`{}` is a directory, only files can be removed",
                path.display()
            )));
        }

        fs::remove_file(&target)
            .await
            .map_err(BagError::io(&target))?;
        self.manifests_mut(kind).remove(&target);

        if let Some(parent) = target.parent() {
            path::prune_empty_directories(parent, &self.root(kind))
                .await
                .map_err(BagError::io(parent))?;
        }

        debug!(path = %target.display(), ?kind, "removed file");
        Ok(())
    }
}

/// Create `destination` and its parents, fails if the file exists
pub(crate) async fn write_new_file<R: AsyncRead + Unpin>(
    source: &mut R,
    destination: &Path,
) -> Result<u64, BagError> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(BagError::io(parent))?;
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => BagError::already_exists("file", destination),
            _ => BagError::io(destination)(e),
        })?;

    let written = tokio::io::copy(source, &mut file)
        .await
        .map_err(BagError::io(destination))?;
    file.flush().await.map_err(BagError::io(destination))?;

    Ok(written)
}

#[cfg(test)]
mod test {
    use super::write_new_file;
    use crate::error::BagError;

    #[tokio::test]
    async fn new_file_with_parents() {
        let directory = tempfile::tempdir().unwrap();
        let destination = directory.path().join("a/b/c.txt");

        let written = write_new_file(&mut &b"hello"[..], &destination)
            .await
            .unwrap();

        assert_eq!(written, 5);
        assert_eq!(tokio::fs::read(&destination).await.unwrap(), b"hello");
        assert!(matches!(
            write_new_file(&mut &b"again"[..], &destination).await,
            Err(BagError::AlreadyExists { what: "file", .. })
        ));
    }
}
