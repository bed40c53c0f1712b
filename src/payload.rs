use crate::error::BagError;
use crate::{path, Algorithm, BagIt, ManifestKind};
use std::path::Path;
use tokio::io::AsyncRead;
use tracing::info;

impl BagIt {
    /// Write the content of `source` to a new payload file
    ///
    /// # Arguments
    ///
    /// * `source` - Content of the file
    /// * `path_in_data` - Destination relative to `data/`, must not exist nor be a fetch target
    pub async fn add_payload_file<R: AsyncRead + Unpin>(
        &mut self,
        source: R,
        path_in_data: impl AsRef<Path>,
    ) -> Result<(), BagError> {
        self.add_file(ManifestKind::Payload, source, path_in_data.as_ref())
            .await?;
        Ok(())
    }

    /// Copy a file or a whole directory into the payload
    ///
    /// Every file of a directory is added at the same relative path below `path_in_data`.
    /// When one of them cannot be added, none is listed in the manifests, but files copied
    /// before the failure are left in `data/`.
    pub async fn add_payload_file_from(
        &mut self,
        source: impl AsRef<Path>,
        path_in_data: impl AsRef<Path>,
    ) -> Result<(), BagError> {
        self.add_file_from(ManifestKind::Payload, source.as_ref(), path_in_data.as_ref())
            .await
    }

    /// Delete a payload file, and the directories left empty up to `data/`
    pub async fn remove_payload_file(
        &mut self,
        path_in_data: impl AsRef<Path>,
    ) -> Result<(), BagError> {
        self.remove_file(ManifestKind::Payload, path_in_data.as_ref())
            .await
    }

    /// Track one more payload manifest algorithm
    ///
    /// Checksums of the payload files listed by the other algorithms are computed; without any
    /// other algorithm, every file present in `data/` is listed. Fetch items are downloaded once
    /// to get their checksum, then discarded. With `recompute`, an already tracked algorithm gets
    /// the checksums of its files computed again.
    pub async fn add_payload_manifest_algorithm(
        &mut self,
        algorithm: Algorithm,
        recompute: bool,
    ) -> Result<(), BagError> {
        let is_new = !self.payload_manifests.contains_algorithm(&algorithm);
        if !is_new && !recompute {
            return Ok(());
        }

        let mut fetched = Vec::new();
        if is_new {
            for item in self.fetch_items.iter() {
                let (_, mut checksums) = self.download_checksums(item.url(), [algorithm]).await?;
                fetched.push((item.path().to_path_buf(), checksums.remove(&algorithm)));
            }
        }

        let files = if self.payload_manifests.is_empty() {
            let data = self.data_dir();
            path::walk_files(&data).await.map_err(BagError::io(&data))?
        } else {
            self.payload_manifests
                .paths()
                .into_iter()
                .filter(|path| !self.fetch_items.contains_path(path))
                .collect()
        };
        self.payload_manifests
            .add_algorithm(algorithm, files, recompute)
            .await?;

        for (target, checksum) in fetched {
            self.payload_manifests.put(&algorithm, target, checksum);
        }

        if is_new {
            let manifest_file = self.base_dir.join(algorithm.manifest_file_name());
            for tag_algorithm in self.tag_manifests.algorithms() {
                self.tag_manifests
                    .put(&tag_algorithm, manifest_file.clone(), None);
            }
        }

        info!(%algorithm, recompute, "added payload manifest algorithm");
        Ok(())
    }

    /// Stop tracking a payload manifest algorithm
    ///
    /// Removing the last one is allowed, but the bag cannot be saved until another is added.
    pub fn remove_payload_manifest_algorithm(
        &mut self,
        algorithm: &Algorithm,
    ) -> Result<(), BagError> {
        self.payload_manifests.remove_algorithm(algorithm)?;
        self.tag_manifests
            .remove(&self.base_dir.join(algorithm.manifest_file_name()));

        info!(%algorithm, "removed payload manifest algorithm");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::error::BagError;
    use crate::test_support::{empty_bag, source_file};
    use crate::Algorithm;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    #[tokio::test]
    async fn add_from_stream() {
        let directory = tempfile::tempdir().unwrap();
        let mut bag = empty_bag(directory.path(), [Algorithm::Md5, Algorithm::Sha256]).await;

        bag.add_payload_file(&b"hello"[..], "greetings/x.txt")
            .await
            .unwrap();

        let target = bag.data_dir().join("greetings/x.txt");
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"hello");
        let manifests = bag.payload_manifests();
        assert_eq!(
            manifests[&Algorithm::Md5][&target].as_ref(),
            "5d41402abc4b2a76b9719d911017c592"
        );
        assert_eq!(
            manifests[&Algorithm::Sha256][&target].as_ref(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn add_requires_free_destination_inside_data() {
        let directory = tempfile::tempdir().unwrap();
        let mut bag = empty_bag(directory.path(), [Algorithm::Sha1]).await;
        bag.add_payload_file(&b"one"[..], "x").await.unwrap();

        assert!(matches!(
            bag.add_payload_file(&b"two"[..], "x").await,
            Err(BagError::AlreadyExists { what: "file", .. })
        ));
        assert!(matches!(
            bag.add_payload_file(&b"two"[..], "../bagit.txt").await,
            Err(BagError::InvalidArgument(_))
        ));
        assert!(matches!(
            bag.add_payload_file_from(directory.path().join("missing"), "y")
                .await,
            Err(BagError::NotFound { what: "source", .. })
        ));
        assert_eq!(
            tokio::fs::read(bag.data_dir().join("x")).await.unwrap(),
            b"one"
        );
    }

    #[tokio::test]
    async fn add_directory_recursively() {
        let directory = tempfile::tempdir().unwrap();
        let mut bag = empty_bag(directory.path(), [Algorithm::Sha1]).await;
        source_file(directory.path(), "tree/a.txt", "a").await;
        source_file(directory.path(), "tree/sub/b.txt", "b").await;
        source_file(directory.path(), "tree/sub/deeper/c.txt", "c").await;

        bag.add_payload_file_from(directory.path().join("sources/tree"), "imported")
            .await
            .unwrap();

        let data = bag.data_dir();
        assert_eq!(
            bag.payload_manifests()[&Algorithm::Sha1]
                .keys()
                .cloned()
                .collect::<BTreeSet<_>>(),
            BTreeSet::from([
                data.join("imported/a.txt"),
                data.join("imported/sub/b.txt"),
                data.join("imported/sub/deeper/c.txt"),
            ])
        );
    }

    #[tokio::test]
    async fn failed_directory_import_lists_nothing() {
        let directory = tempfile::tempdir().unwrap();
        let mut bag = empty_bag(directory.path(), [Algorithm::Sha1]).await;
        source_file(directory.path(), "tree/a.txt", "a").await;
        source_file(directory.path(), "tree/b.txt", "b").await;
        bag.add_payload_file(&b"taken"[..], "imported/b.txt")
            .await
            .unwrap();

        assert!(matches!(
            bag.add_payload_file_from(directory.path().join("sources/tree"), "imported")
                .await,
            Err(BagError::AlreadyExists { .. })
        ));

        let listed = bag.payload_manifests()[&Algorithm::Sha1]
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        assert_eq!(listed, vec![bag.data_dir().join("imported/b.txt")]);
        // Copied before the failure, not rolled back
        assert!(bag.data_dir().join("imported/a.txt").is_file());
    }

    #[tokio::test]
    async fn scenario_remove_prunes_directories() {
        let directory = tempfile::tempdir().unwrap();
        let mut bag = empty_bag(directory.path(), [Algorithm::Sha1]).await;
        bag.add_payload_file(&b"x"[..], "x").await.unwrap();
        bag.add_payload_file(&b"u"[..], "sub/u").await.unwrap();

        bag.remove_payload_file("x").await.unwrap();
        let data = bag.data_dir();
        assert_eq!(
            bag.payload_manifests()[&Algorithm::Sha1]
                .keys()
                .cloned()
                .collect::<Vec<PathBuf>>(),
            vec![data.join("sub/u")]
        );
        assert!(data.join("sub").is_dir());

        bag.remove_payload_file("sub/u").await.unwrap();
        assert!(data.is_dir());
        assert!(!data.join("sub").exists());
        assert!(bag.payload_manifests()[&Algorithm::Sha1].is_empty());

        // Algorithm stays tracked, its manifest is written empty
        bag.save().await.unwrap();
        assert_eq!(
            tokio::fs::read_to_string(bag.base_dir().join("manifest-sha1.txt"))
                .await
                .unwrap(),
            ""
        );
    }

    #[tokio::test]
    async fn remove_requires_existing_file() {
        let directory = tempfile::tempdir().unwrap();
        let mut bag = empty_bag(directory.path(), [Algorithm::Sha1]).await;
        bag.add_payload_file(&b"u"[..], "sub/u").await.unwrap();

        assert!(matches!(
            bag.remove_payload_file("nope").await,
            Err(BagError::NotFound { what: "file", .. })
        ));
        assert!(matches!(
            bag.remove_payload_file("sub").await,
            Err(BagError::InvalidArgument(_))
        ));
        assert!(matches!(
            bag.remove_payload_file("../bagit.txt").await,
            Err(BagError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn algorithms_follow_tag_manifests() {
        let directory = tempfile::tempdir().unwrap();
        let mut bag = empty_bag(directory.path(), [Algorithm::Sha1]).await;
        bag.add_payload_file(&b"hello"[..], "x").await.unwrap();

        bag.add_payload_manifest_algorithm(Algorithm::Md5, false)
            .await
            .unwrap();
        assert_eq!(
            bag.payload_manifests()[&Algorithm::Md5][&bag.data_dir().join("x")].as_ref(),
            "5d41402abc4b2a76b9719d911017c592"
        );
        let manifest_md5 = bag.base_dir().join("manifest-md5.txt");
        assert_eq!(bag.tag_manifests()[&Algorithm::Sha1][&manifest_md5], None);

        bag.save().await.unwrap();
        assert!(manifest_md5.is_file());
        assert!(bag.tag_manifests()[&Algorithm::Sha1][&manifest_md5].is_some());

        bag.remove_payload_manifest_algorithm(&Algorithm::Md5)
            .unwrap();
        assert!(!bag.tag_manifests()[&Algorithm::Sha1].contains_key(&manifest_md5));
        assert!(matches!(
            bag.remove_payload_manifest_algorithm(&Algorithm::Md5),
            Err(BagError::NotFound { .. })
        ));

        bag.save().await.unwrap();
        assert!(!manifest_md5.exists());
        assert_eq!(bag.is_valid().await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn recompute_after_outside_edit() {
        let directory = tempfile::tempdir().unwrap();
        let mut bag = empty_bag(directory.path(), [Algorithm::Sha1]).await;
        bag.add_payload_file(&b"hello"[..], "x").await.unwrap();
        let target = bag.data_dir().join("x");
        tokio::fs::write(&target, "world").await.unwrap();

        bag.add_payload_manifest_algorithm(Algorithm::Sha1, false)
            .await
            .unwrap();
        assert_eq!(
            bag.payload_manifests()[&Algorithm::Sha1][&target].as_ref(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );

        bag.add_payload_manifest_algorithm(Algorithm::Sha1, true)
            .await
            .unwrap();
        assert_eq!(
            bag.payload_manifests()[&Algorithm::Sha1][&target].as_ref(),
            "7c211433f02071597741e6ff5a8ea34789abbf43"
        );
    }

    #[tokio::test]
    async fn new_algorithm_ignores_files_left_by_failed_import() {
        let directory = tempfile::tempdir().unwrap();
        let mut bag = empty_bag(directory.path(), [Algorithm::Sha1]).await;
        source_file(directory.path(), "tree/a.txt", "a").await;
        source_file(directory.path(), "tree/b.txt", "b").await;
        bag.add_payload_file(&b"taken"[..], "imported/b.txt")
            .await
            .unwrap();
        assert!(bag
            .add_payload_file_from(directory.path().join("sources/tree"), "imported")
            .await
            .is_err());
        assert!(bag.data_dir().join("imported/a.txt").is_file());

        bag.add_payload_manifest_algorithm(Algorithm::Md5, false)
            .await
            .unwrap();
        bag.add_payload_manifest_algorithm(Algorithm::Sha1, true)
            .await
            .unwrap();

        let manifests = bag.payload_manifests();
        let keys = |algorithm: Algorithm| {
            manifests[&algorithm]
                .keys()
                .cloned()
                .collect::<BTreeSet<PathBuf>>()
        };
        assert_eq!(keys(Algorithm::Md5), keys(Algorithm::Sha1));
        assert_eq!(
            keys(Algorithm::Md5),
            BTreeSet::from([bag.data_dir().join("imported/b.txt")])
        );
    }

    #[tokio::test]
    async fn first_algorithm_lists_data_directory() {
        let directory = tempfile::tempdir().unwrap();
        let mut bag = empty_bag(directory.path(), [Algorithm::Sha1]).await;
        bag.add_payload_file(&b"hello"[..], "x").await.unwrap();
        bag.remove_payload_manifest_algorithm(&Algorithm::Sha1)
            .unwrap();

        bag.add_payload_manifest_algorithm(Algorithm::Md5, false)
            .await
            .unwrap();

        assert_eq!(
            bag.payload_manifests()[&Algorithm::Md5][&bag.data_dir().join("x")].as_ref(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[tokio::test]
    async fn scenario_last_algorithm_removed() {
        let directory = tempfile::tempdir().unwrap();
        let mut bag = empty_bag(directory.path(), [Algorithm::Sha1]).await;

        bag.remove_payload_manifest_algorithm(&Algorithm::Sha1)
            .unwrap();

        assert!(bag.payload_manifest_algorithms().is_empty());
        assert!(matches!(bag.save().await, Err(BagError::IllegalState(_))));
    }
}
