use crate::error::BagError;
use crate::metadata::file::{read_tag_file, Declaration, BAG_INFO_TXT};
use crate::{BagInfo, BagIt, FetchRegistry, ManifestKind, Manifests};
use std::path::Path;
use tokio::fs;
use tracing::info;

impl BagIt {
    /// Load an existing bag, checksums are not verified
    ///
    /// `bagit.txt` is required, `bag-info.txt` and `fetch.txt` are optional.
    /// See [`BagIt::is_valid()`] to check the payload against the manifests.
    pub async fn read(base_dir: impl AsRef<Path>) -> Result<Self, BagError> {
        let base_dir = base_dir.as_ref();
        let metadata = fs::metadata(base_dir).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BagError::not_found("bag directory", base_dir.display()),
            _ => BagError::io(base_dir)(e),
        })?;
        if !metadata.is_dir() {
            return Err(BagError::invalid(format!(
                "`{}` is not a directory",
                base_dir.display()
            )));
        }
        let base_dir = fs::canonicalize(base_dir)
            .await
            .map_err(BagError::io(base_dir))?;

        let declaration = Declaration::read(&base_dir).await?;
        let encoding = declaration.encoding;

        let bag_info_path = base_dir.join(BAG_INFO_TXT);
        let info = if bag_info_path.is_file() {
            let contents = read_tag_file(&bag_info_path, encoding).await?;
            BagInfo::parse(&contents).map_err(|source| BagError::Metadata {
                path: bag_info_path,
                source,
            })?
        } else {
            BagInfo::new()
        };

        let payload_manifests =
            Manifests::read(&base_dir, ManifestKind::Payload, encoding, &[]).await?;
        let tag_manifests = Manifests::read(&base_dir, ManifestKind::Tag, encoding, &[]).await?;
        let fetch_items = FetchRegistry::read(&base_dir, encoding).await?;

        let bag = Self::assemble(
            base_dir,
            declaration.version,
            encoding,
            info,
            payload_manifests,
            tag_manifests,
            fetch_items,
        )?;

        info!(
            bag = %bag.base_dir.display(),
            version = %bag.version,
            payload_algorithms = bag.payload_manifests.algorithms().len(),
            fetch_items = bag.fetch_items.len(),
            "read bag"
        );
        Ok(bag)
    }
}
