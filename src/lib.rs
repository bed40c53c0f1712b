#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))] // https://stackoverflow.com/a/61417700/4809297

/*!

Rust library to create, modify, save and verify BagIt bags and deposits, with the [Tokio async runtime](https://docs.rs/tokio).

# Learn about BagIt

Here are some resources to get started with BagIt containers:

- The [Wikipedia article](https://en.wikipedia.org/wiki/BagIt) to get started with the format or to get a brief explanation
- The container format itself: [RFC 8493](https://datatracker.ietf.org/doc/html/rfc8493)

A bag is a directory with a payload under `data/`, manifests of checksums for one or more
algorithms, an optional `fetch.txt` listing payload files available by reference, and
descriptive metadata in `bag-info.txt`.

# Mutation model

A [`BagIt`] is an in-memory model of the manifests, fetch items and metadata of one bag
directory. Operations changing payload or tag files act on the filesystem right away and
update the model in place through `&mut self`; manifests, `bag-info.txt` and `fetch.txt` are
only written by [`BagIt::save()`]. Two handles must never mutate the same directory.

Failures are not rolled back: a failed recursive import may leave copied files behind, a
failed save may leave some tag files written.

## Create a bag and add files

```no_run
use bagit_deposit::{Algorithm, BagInfo, BagIt};

# #[tokio::main]
# async fn main() -> Result<(), Box<dyn std::error::Error>> {
let mut bag = BagIt::empty(
    "/somewhere/where/the/bag/will/be/placed",
    [Algorithm::Sha1, Algorithm::Sha256],
    BagInfo::new(),
)
.await?;

// Copy a single file, or a whole directory, into the payload
bag.add_payload_file_from("handbag.jpg", "images/handbag.jpg").await?;
bag.add_payload_file_from("/home/me/papers", "papers").await?;

// Describe the bag
bag.add_bag_info("Source-Organization", "Library of Bags")?;

// Write manifests, bag-info.txt and tag manifests
bag.save().await?;
# Ok(())
# }
```

## Load and verify a bag

```no_run
use bagit_deposit::BagIt;

# #[tokio::main]
# async fn main() -> Result<(), Box<dyn std::error::Error>> {
let bag = BagIt::read("/somewhere/where/the/bag/is").await?;

match bag.is_valid().await? {
    Ok(()) => println!("every file matches its manifests"),
    Err(violation) => println!("bag is not valid: {violation}"),
}
# Ok(())
# }
```

*/

mod algorithm;
mod checksum;
mod deposit;
mod download;
/// Errors of every operation
pub mod error;
mod fetch;
mod files;
mod generate;
mod info;
mod manifest;
mod metadata;
mod path;
mod payload;
mod read;
mod remote;
mod save;
mod tag;
mod verify;

pub use algorithm::{Algorithm, HasherFactory};
pub use checksum::Checksum;
pub use deposit::{Deposit, DepositProperties, PropertiesError, DEPOSIT_PROPERTIES};
pub use download::{FetchConfig, ENV_CONNECT_TIMEOUT_MS, ENV_READ_TIMEOUT_MS};
pub use fetch::{FetchItem, FetchRegistry};
pub use manifest::{ManifestEntries, ManifestKind, Manifests};
pub use metadata::{
    format_bag_size, BagInfo, BagitVersion, Encoding, PayloadOxum, KEY_CREATED, KEY_DATE,
    KEY_IS_VERSION_OF, KEY_OXUM, KEY_SIZE, KEY_USER_ACCOUNT,
};
pub use verify::Violation;

use download::Downloader;
use error::BagError;
use metadata::file::{BAGIT_TXT, BAG_INFO_TXT, FETCH_TXT};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Name of the payload directory
pub const DATA_DIR: &str = "data";

#[derive(Debug)]
/// BagIt container: a set of opaque files contained within the structure defined by RFC 8493 <https://datatracker.ietf.org/doc/html/rfc8493>
///
/// Obtained with [`BagIt::empty()`], [`BagIt::create_from_data()`] or [`BagIt::read()`].
pub struct BagIt {
    /// Location of the bag, absolute
    base_dir: PathBuf,

    version: BagitVersion,

    /// Encoding of every tag file except `bagit.txt`
    encoding: Encoding,

    info: BagInfo,

    payload_manifests: Manifests,

    tag_manifests: Manifests,

    fetch_items: FetchRegistry,

    downloader: Downloader,
}

impl BagIt {
    fn assemble(
        base_dir: PathBuf,
        version: BagitVersion,
        encoding: Encoding,
        info: BagInfo,
        payload_manifests: Manifests,
        tag_manifests: Manifests,
        fetch_items: FetchRegistry,
    ) -> Result<Self, BagError> {
        Ok(Self {
            base_dir,
            version,
            encoding,
            info,
            payload_manifests,
            tag_manifests,
            fetch_items,
            downloader: Downloader::new(&FetchConfig::from_env())?,
        })
    }

    /// Use other network settings for fetch items
    pub fn with_fetch_config(mut self, config: &FetchConfig) -> Result<Self, BagError> {
        self.downloader = Downloader::new(config)?;
        Ok(self)
    }

    /// Path to the folder containing the bag
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path to the payload directory
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join(DATA_DIR)
    }

    /// Version declared in `bagit.txt`
    pub fn version(&self) -> BagitVersion {
        self.version
    }

    /// Change the version written to `bagit.txt` on the next save
    pub fn with_bagit_version(&mut self, version: BagitVersion) {
        self.version = version;
    }

    /// Encoding of tag files
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Change the encoding of tag files from the next save on
    pub fn with_encoding(&mut self, encoding: Encoding) {
        self.encoding = encoding;
    }

    /// Algorithms of the payload manifests
    pub fn payload_manifest_algorithms(&self) -> BTreeSet<Algorithm> {
        self.payload_manifests.algorithms()
    }

    /// Algorithms of the tag manifests
    pub fn tag_manifest_algorithms(&self) -> BTreeSet<Algorithm> {
        self.tag_manifests.algorithms()
    }

    /// Checksums of payload files, by algorithm then absolute path
    ///
    /// Fetch items are listed too, with the checksum their content must have.
    pub fn payload_manifests(&self) -> BTreeMap<Algorithm, BTreeMap<PathBuf, Checksum>> {
        self.payload_manifests
            .snapshot()
            .into_iter()
            .map(|(algorithm, entries)| {
                let entries = entries
                    .into_iter()
                    .filter_map(|(path, checksum)| Some((path, checksum?)))
                    .collect();
                (algorithm, entries)
            })
            .collect()
    }

    /// Checksums of tag files, by algorithm then absolute path
    ///
    /// Files whose content is only known after the next save have no checksum yet.
    pub fn tag_manifests(&self) -> BTreeMap<Algorithm, ManifestEntries> {
        self.tag_manifests.snapshot()
    }

    /// Payload files available by reference
    pub fn fetch_items(&self) -> impl Iterator<Item = &FetchItem> {
        self.fetch_items.iter()
    }

    /// Turn a path relative to `data/` into an absolute path strictly inside `data/`
    fn resolve_payload_path(&self, path_in_data: impl AsRef<Path>) -> Result<PathBuf, BagError> {
        let data = self.data_dir();
        let resolved = path::normalize(&data.join(path_in_data.as_ref()));

        if !path::is_strictly_under(&resolved, &data) {
            return Err(BagError::invalid(format!(
                "`{}` is not inside the payload directory",
                path_in_data.as_ref().display()
            )));
        }
        Ok(resolved)
    }

    /// Turn a path relative to the bag into an absolute path of a tag file callers may manage
    fn resolve_tag_path(&self, path_in_bag: impl AsRef<Path>) -> Result<PathBuf, BagError> {
        let resolved = path::normalize(&self.base_dir.join(path_in_bag.as_ref()));
        let display = path_in_bag.as_ref().display();

        if !path::is_strictly_under(&resolved, &self.base_dir) {
            return Err(BagError::invalid(format!("`{display}` is not inside the bag")));
        }
        if resolved.starts_with(self.data_dir()) {
            return Err(BagError::invalid(format!(
                "`{display}` is in the payload directory, not a tag file"
            )));
        }
        if self.is_control_file(&resolved) {
            return Err(BagError::invalid(format!(
                "`{display}` is managed by the bag itself"
            )));
        }
        Ok(resolved)
    }

    /// `bagit.txt`, `bag-info.txt`, `fetch.txt` and every (tag) manifest
    fn is_control_file(&self, path: &Path) -> bool {
        if path.parent() != Some(self.base_dir.as_path()) {
            return false;
        }

        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| {
                [BAGIT_TXT, BAG_INFO_TXT, FETCH_TXT].contains(&name)
                    || (name.ends_with(".txt")
                        && (name.starts_with(algorithm::MANIFEST_PREFIX)
                            || name.starts_with(algorithm::TAG_MANIFEST_PREFIX)))
            })
    }
}


#[cfg(test)]
mod test {
    use crate::error::BagError;
    use crate::test_support::empty_bag;
    use crate::Algorithm;
    use std::path::PathBuf;

    #[tokio::test]
    async fn payload_paths_must_stay_in_data() {
        let directory = tempfile::tempdir().unwrap();
        let bag = empty_bag(directory.path(), [Algorithm::Sha1]).await;

        assert_eq!(
            bag.resolve_payload_path("sub/../x").unwrap(),
            bag.data_dir().join("x")
        );
        for escaping in ["../bagit.txt", "", ".", "sub/../../outside"] {
            assert!(
                matches!(
                    bag.resolve_payload_path(escaping),
                    Err(BagError::InvalidArgument(_))
                ),
                "`{escaping}` should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn tag_paths_exclude_payload_and_control_files() {
        let directory = tempfile::tempdir().unwrap();
        let bag = empty_bag(directory.path(), [Algorithm::Sha1]).await;

        assert_eq!(
            bag.resolve_tag_path("metadata/dataset.xml").unwrap(),
            bag.base_dir().join("metadata/dataset.xml")
        );
        // Only top-level names are reserved
        assert!(bag.resolve_tag_path("metadata/bagit.txt").is_ok());

        for rejected in [
            "data",
            "data/x",
            "bagit.txt",
            "bag-info.txt",
            "fetch.txt",
            "manifest-md5.txt",
            "tagmanifest-sha1.txt",
            "../elsewhere.txt",
            "",
        ] {
            assert!(
                matches!(
                    bag.resolve_tag_path(PathBuf::from(rejected)),
                    Err(BagError::InvalidArgument(_))
                ),
                "`{rejected}` should be rejected"
            );
        }
    }
}
