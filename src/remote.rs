use crate::checksum::compute_checksums_file;
use crate::error::{BagError, Mismatch};
use crate::fetch::validate_url;
use crate::metadata::file::FETCH_TXT;
use crate::{path, Algorithm, BagIt, Checksum, FetchItem};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, info, warn};
use url::Url;

const DOWNLOAD_FILE_NAME: &str = "download";

impl BagIt {
    /// Reference a remote file as payload, instead of storing it in `data/`
    ///
    /// The file is downloaded once to compute its checksums and length, then discarded.
    ///
    /// # Arguments
    ///
    /// * `url` - Location of the file, `http` or `https`
    /// * `path_in_data` - Path the file occupies once fetched, relative to `data/`
    pub async fn add_fetch_item(
        &mut self,
        url: Url,
        path_in_data: impl AsRef<Path>,
    ) -> Result<FetchItem, BagError> {
        validate_url(&url)?;
        let target = self.resolve_payload_path(path_in_data)?;
        if target.exists() {
            return Err(BagError::already_exists("file", target));
        }
        if self.fetch_items.contains_path(&target) {
            return Err(BagError::already_exists("fetch item", target));
        }

        let algorithms = self.payload_manifests.algorithms();
        let (length, checksums) = self.download_checksums(&url, algorithms).await?;

        let item = FetchItem::new(url, Some(length), target.clone());
        self.register_fetch_item(item.clone())?;
        self.payload_manifests.insert(&target, &checksums);

        info!(%item, length, "added fetch item");
        Ok(item)
    }

    /// Forget `item`, nothing happens if it is not registered
    pub fn remove_fetch_item(&mut self, item: &FetchItem) {
        if self.fetch_items.by_path(item.path()) == Some(item) {
            self.forget_fetch_target(item.path());
        }
    }

    /// Forget the first fetch item, in path order, referencing `url`
    pub fn remove_fetch_item_by_url(&mut self, url: &Url) -> Result<(), BagError> {
        let target = self.fetch_target_by_url(url)?;
        self.forget_fetch_target(&target);
        Ok(())
    }

    /// Forget the fetch item targeting `path_in_data`
    pub fn remove_fetch_item_by_path(
        &mut self,
        path_in_data: impl AsRef<Path>,
    ) -> Result<(), BagError> {
        let target = self.fetch_target_by_path(path_in_data)?;
        self.forget_fetch_target(&target);
        Ok(())
    }

    /// Download `item` to its place in `data/`, see [`BagIt::resolve_fetch_item_by_path()`]
    pub async fn resolve_fetch_item(&mut self, item: &FetchItem) -> Result<(), BagError> {
        if self.fetch_items.by_path(item.path()) != Some(item) {
            return Err(BagError::not_found("fetch item", item));
        }
        self.materialize(item.path().to_path_buf()).await
    }

    /// Download the first fetch item, in path order, referencing `url`
    pub async fn resolve_fetch_item_by_url(&mut self, url: &Url) -> Result<(), BagError> {
        let target = self.fetch_target_by_url(url)?;
        self.materialize(target).await
    }

    /// Download the fetch item targeting `path_in_data` to its place
    ///
    /// The content must match every payload manifest, otherwise it is discarded and the item
    /// stays registered. On success the file is a regular payload file and the item is gone.
    pub async fn resolve_fetch_item_by_path(
        &mut self,
        path_in_data: impl AsRef<Path>,
    ) -> Result<(), BagError> {
        let target = self.fetch_target_by_path(path_in_data)?;
        self.materialize(target).await
    }

    /// Turn a payload file into a fetch item: the file is deleted, its manifest entries stay
    pub async fn replace_file_with_fetch_item(
        &mut self,
        path_in_data: impl AsRef<Path>,
        url: Url,
    ) -> Result<FetchItem, BagError> {
        validate_url(&url)?;
        let target = self.resolve_payload_path(&path_in_data)?;

        let metadata = match fs::metadata(&target).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BagError::not_found("file", target.display()))
            }
            Err(e) => return Err(BagError::io(&target)(e)),
        };
        if metadata.is_dir() {
            return Err(BagError::invalid(format!(
                "`{}` is a directory, only files can be replaced",
                path_in_data.as_ref().display()
            )));
        }

        fs::remove_file(&target)
            .await
            .map_err(BagError::io(&target))?;
        if let Some(parent) = target.parent() {
            path::prune_empty_directories(parent, &self.data_dir())
                .await
                .map_err(BagError::io(parent))?;
        }

        let item = FetchItem::new(url, Some(metadata.len()), target);
        self.register_fetch_item(item.clone())?;

        info!(%item, "replaced file with fetch item");
        Ok(item)
    }

    fn fetch_target_by_url(&self, url: &Url) -> Result<PathBuf, BagError> {
        self.fetch_items
            .by_url(url)
            .map(|item| item.path().to_path_buf())
            .ok_or_else(|| BagError::not_found("fetch item", url))
    }

    fn fetch_target_by_path(&self, path_in_data: impl AsRef<Path>) -> Result<PathBuf, BagError> {
        let target = self.resolve_payload_path(&path_in_data)?;
        if !self.fetch_items.contains_path(&target) {
            return Err(BagError::not_found(
                "fetch item",
                path_in_data.as_ref().display(),
            ));
        }
        Ok(target)
    }

    fn register_fetch_item(&mut self, item: FetchItem) -> Result<(), BagError> {
        let was_empty = self.fetch_items.is_empty();
        self.fetch_items.insert(item)?;

        // fetch.txt only exists once written, its checksum is computed on save
        if was_empty {
            let fetch_file = self.base_dir.join(FETCH_TXT);
            for algorithm in self.tag_manifests.algorithms() {
                self.tag_manifests.put(&algorithm, fetch_file.clone(), None);
            }
        }
        Ok(())
    }

    /// Drop the item at `target` with its manifest entries
    fn forget_fetch_target(&mut self, target: &Path) {
        let Some(item) = self.fetch_items.remove(target) else {
            return;
        };
        self.payload_manifests.remove(target);

        for algorithm in self.payload_manifests.drop_empty_algorithms() {
            warn!(%algorithm, "payload manifest became empty, algorithm dropped");
            self.tag_manifests
                .remove(&self.base_dir.join(algorithm.manifest_file_name()));
        }

        self.forget_fetch_file_if_unused();
        info!(%item, "removed fetch item");
    }

    fn forget_fetch_file_if_unused(&mut self) {
        if self.fetch_items.is_empty() {
            self.tag_manifests.remove(&self.base_dir.join(FETCH_TXT));
        }
    }

    async fn materialize(&mut self, target: PathBuf) -> Result<(), BagError> {
        let Some(item) = self.fetch_items.by_path(&target).cloned() else {
            return Err(BagError::not_found("fetch item", target.display()));
        };
        if !path::is_strictly_under(&target, &self.data_dir()) {
            return Err(BagError::invalid(format!(
                "fetch item target `{}` is not inside the payload directory",
                target.display()
            )));
        }
        if target.exists() {
            return Err(BagError::already_exists("file", target));
        }

        // Same filesystem as the target, the download is moved in place
        let scratch = scratch_builder()
            .tempdir_in(&self.base_dir)
            .map_err(BagError::io(&self.base_dir))?;
        let downloaded = scratch.path().join(DOWNLOAD_FILE_NAME);
        self.downloader.download(item.url(), &downloaded).await?;

        let expected = self.payload_manifests.checksums_of(&target);
        let actual = compute_checksums_file(&downloaded, expected.keys())
            .await
            .map_err(BagError::checksum(&downloaded))?;
        let mismatches = compare(&target, &expected, &actual);
        if !mismatches.is_empty() {
            warn!(%item, mismatches = mismatches.len(), "fetched content does not match manifests");
            return Err(BagError::ChecksumMismatch(mismatches));
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(BagError::io(parent))?;
        }
        fs::rename(&downloaded, &target)
            .await
            .map_err(BagError::io(&target))?;

        self.fetch_items.remove(&target);
        self.forget_fetch_file_if_unused();

        info!(%item, "resolved fetch item");
        Ok(())
    }

    /// Download `url` to a scoped temporary file and compute its checksums
    ///
    /// The temporary directory is deleted whatever the outcome.
    pub(crate) async fn download_checksums(
        &self,
        url: &Url,
        algorithms: impl IntoIterator<Item = Algorithm>,
    ) -> Result<(u64, BTreeMap<Algorithm, Checksum>), BagError> {
        let scratch = self.scratch_dir()?;
        let downloaded = scratch.path().join(DOWNLOAD_FILE_NAME);

        let length = self.downloader.download(url, &downloaded).await?;
        let algorithms = algorithms.into_iter().collect::<Vec<_>>();
        let checksums = compute_checksums_file(&downloaded, &algorithms)
            .await
            .map_err(BagError::checksum(&downloaded))?;

        debug!(%url, length, "computed checksums of remote file");
        Ok((length, checksums))
    }

    /// Temporary directory inside the bag when writable, in the system location otherwise
    fn scratch_dir(&self) -> Result<TempDir, BagError> {
        scratch_builder()
            .tempdir_in(&self.base_dir)
            .or_else(|_| scratch_builder().tempdir())
            .map_err(BagError::io(std::env::temp_dir()))
    }
}

fn scratch_builder() -> tempfile::Builder<'static, 'static> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".bagit-fetch-");
    builder
}

fn compare(
    target: &Path,
    expected: &BTreeMap<Algorithm, Checksum>,
    actual: &BTreeMap<Algorithm, Checksum>,
) -> Vec<Mismatch> {
    expected
        .iter()
        .filter_map(|(algorithm, expected)| {
            let actual = actual.get(algorithm)?;
            (actual != expected).then(|| Mismatch {
                algorithm: *algorithm,
                path: target.to_path_buf(),
                expected: expected.clone(),
                actual: actual.clone(),
            })
        })
        .collect()
}
