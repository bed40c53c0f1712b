use crate::error::BagError;
use crate::metadata::file::{write_tag_file, Declaration, BAG_INFO_TXT, FETCH_TXT};
use crate::{
    format_bag_size, path, BagIt, ManifestKind, PayloadOxum, KEY_DATE, KEY_OXUM, KEY_SIZE,
};
use tokio::fs;
use tracing::{debug, info};

impl BagIt {
    /// Procedure to write the bag state to disk
    ///
    /// - Check the bag has a payload manifest algorithm and a writable directory
    /// - Bagit file declaration
    /// - Payload manifests, replacing the previous ones
    /// - `bag-info.txt`, with `Payload-Oxum`, `Bagging-Date` and `Bag-Size` computed again
    /// - `fetch.txt`, or its removal when there is no fetch item
    /// - Tag manifests, with every checksum computed again, replacing the previous ones
    ///
    /// Nothing is written when the checks fail. A failure after that leaves the files
    /// written so far in place.
    pub async fn save(&mut self) -> Result<(), BagError> {
        self.check_saveable().await?;

        Declaration {
            version: self.version,
            encoding: self.encoding,
        }
        .write(&self.base_dir)
        .await?;

        self.payload_manifests
            .write(&self.base_dir, ManifestKind::Payload, self.encoding)
            .await?;

        self.update_computed_info().await?;
        write_tag_file(
            self.base_dir.join(BAG_INFO_TXT),
            &self.info.render(),
            self.encoding,
        )
        .await?;

        let fetch_file = self.base_dir.join(FETCH_TXT);
        if !self.fetch_items.is_empty() {
            self.fetch_items.write(&self.base_dir, self.encoding).await?;
        } else if fetch_file.exists() {
            fs::remove_file(&fetch_file)
                .await
                .map_err(BagError::io(&fetch_file))?;
            debug!(path = %fetch_file.display(), "removed fetch file without items");
        }

        self.tag_manifests.recompute().await?;
        self.tag_manifests
            .write(&self.base_dir, ManifestKind::Tag, self.encoding)
            .await?;

        info!(bag = %self.base_dir.display(), "saved bag");
        Ok(())
    }

    async fn check_saveable(&self) -> Result<(), BagError> {
        if self.payload_manifests.is_empty() {
            return Err(BagError::IllegalState(
                "bag must contain at least one payload manifest".to_string(),
            ));
        }

        let metadata = fs::metadata(&self.base_dir)
            .await
            .map_err(BagError::io(&self.base_dir))?;
        if !metadata.is_dir() || metadata.permissions().readonly() {
            return Err(BagError::IllegalState(format!(
                "bag directory `{}` is not writable",
                self.base_dir.display()
            )));
        }

        Ok(())
    }

    /// Octet and file count of the files present in `data/`
    pub(crate) async fn payload_oxum(&self) -> Result<PayloadOxum, BagError> {
        let data = self.data_dir();
        let files = path::walk_files(&data).await.map_err(BagError::io(&data))?;

        let mut octet_count = 0;
        for file in &files {
            octet_count += fs::metadata(file).await.map_err(BagError::io(file))?.len();
        }

        Ok(PayloadOxum {
            octet_count,
            stream_count: files.len() as u64,
        })
    }

    async fn update_computed_info(&mut self) -> Result<(), BagError> {
        let oxum = self.payload_oxum().await?;
        let today = jiff::Zoned::now().date();

        for (key, value) in [
            (KEY_OXUM, oxum.to_string()),
            (KEY_DATE, today.to_string()),
            (KEY_SIZE, format_bag_size(oxum.octet_count)),
        ] {
            self.info
                .set(key, value)
                .map_err(|source| BagError::Metadata {
                    path: self.base_dir.join(BAG_INFO_TXT),
                    source,
                })?;
        }

        Ok(())
    }
}
