//! Completeness and validity of a bag as found on disk

use crate::checksum::compute_checksums_file;
use crate::error::{BagError, Mismatch};
use crate::metadata::file::{Declaration, BAGIT_TXT};
use crate::{path, Algorithm, BagIt, BagitVersion, Checksum, FetchRegistry, ManifestKind, Manifests};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
/// First reason found for a bag not being complete or valid
pub enum Violation {
    /// No `bagit.txt`
    MissingDeclaration,
    /// No `data/` directory
    MissingDataDirectory,
    /// No `manifest-<algorithm>.txt`
    NoPayloadManifest,
    /// A tag file could not be parsed
    Malformed {
        /// Offending tag file, or the bag directory when unknown
        file: PathBuf,
        /// Parse error
        reason: String,
    },
    /// `fetch.txt` lists a file without checksum in the payload manifests
    FetchItemNotInManifest(PathBuf),
    /// A fetch item was not downloaded yet
    FetchItemNotFetched(PathBuf),
    /// A manifest lists a file that is not there
    ManifestedFileMissing {
        /// Manifest file name
        manifest: String,
        /// Listed path
        path: PathBuf,
    },
    /// Payload file absent from a manifest, `algorithm` is `None` when it is absent from all of them
    PayloadFileNotInManifest {
        /// Manifest missing the file
        algorithm: Option<Algorithm>,
        /// Payload file
        path: PathBuf,
    },
    /// First file whose content differs from a manifest
    ChecksumMismatch(Mismatch),
}

impl Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::MissingDeclaration => write!(f, "missing `{BAGIT_TXT}`"),
            Violation::MissingDataDirectory => write!(f, "missing payload directory"),
            Violation::NoPayloadManifest => write!(f, "no payload manifest"),
            Violation::Malformed { file, reason } => {
                write!(f, "cannot parse `{}`: {reason}", file.display())
            }
            Violation::FetchItemNotInManifest(path) => write!(
                f,
                "fetch item `{}` is not in the payload manifests",
                path.display()
            ),
            Violation::FetchItemNotFetched(path) => {
                write!(f, "fetch item `{}` is not fetched", path.display())
            }
            Violation::ManifestedFileMissing { manifest, path } => write!(
                f,
                "`{}` listed in `{manifest}` is missing",
                path.display()
            ),
            Violation::PayloadFileNotInManifest {
                algorithm: Some(algorithm),
                path,
            } => write!(
                f,
                "payload file `{}` is not in the {algorithm} manifest",
                path.display()
            ),
            Violation::PayloadFileNotInManifest {
                algorithm: None,
                path,
            } => write!(f, "payload file `{}` is in no manifest", path.display()),
            Violation::ChecksumMismatch(mismatch) => write!(f, "checksum mismatch: {mismatch}"),
        }
    }
}

/// Manifests and fetch items as currently written in the bag directory
struct OnDisk {
    version: BagitVersion,
    payload_manifests: Manifests,
    tag_manifests: Manifests,
    fetch_items: FetchRegistry,
}

impl BagIt {
    /// Check every file listed in the manifests on disk is present, and every payload file is listed
    ///
    /// The bag is read again from its directory: changes not saved yet are not considered.
    /// The outer error reports failures to inspect the bag, the inner one why it is not complete.
    pub async fn is_complete(&self) -> Result<Result<(), Violation>, BagError> {
        Ok(self.check_complete().await?.map(|_| ()))
    }

    /// Check the bag is complete and every checksum of every manifest on disk matches
    pub async fn is_valid(&self) -> Result<Result<(), Violation>, BagError> {
        let on_disk = match self.check_complete().await? {
            Ok(on_disk) => on_disk,
            Err(violation) => return Ok(Err(violation)),
        };

        let mut jobs = Vec::new();
        for manifests in [&on_disk.payload_manifests, &on_disk.tag_manifests] {
            for path in manifests.paths() {
                let expected = manifests.checksums_of(&path);
                jobs.push((path, expected));
            }
        }
        let files = jobs.len();

        let mut results = stream::iter(jobs.into_iter().enumerate())
            .map(|(index, (path, expected))| async move {
                let actual = compute_checksums_file(&path, expected.keys())
                    .await
                    .map_err(BagError::checksum(&path))?;
                Ok::<_, BagError>((index, first_mismatch(&path, &expected, &actual)))
            })
            .buffer_unordered(parallelism())
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        // Report the same mismatch whatever the completion order
        results.sort_by_key(|(index, _)| *index);
        if let Some(mismatch) = results.into_iter().find_map(|(_, mismatch)| mismatch) {
            info!(bag = %self.base_dir.display(), %mismatch, "bag is not valid");
            return Ok(Err(Violation::ChecksumMismatch(mismatch)));
        }

        debug!(bag = %self.base_dir.display(), files, "bag is valid");
        Ok(Ok(()))
    }

    async fn check_complete(&self) -> Result<Result<OnDisk, Violation>, BagError> {
        if !self.base_dir.join(BAGIT_TXT).is_file() {
            return Ok(Err(Violation::MissingDeclaration));
        }
        let data = self.data_dir();
        if !data.is_dir() {
            return Ok(Err(Violation::MissingDataDirectory));
        }

        let on_disk = match self.read_on_disk().await? {
            Ok(on_disk) => on_disk,
            Err(violation) => return Ok(Err(violation)),
        };

        if on_disk.payload_manifests.is_empty() {
            return Ok(Err(Violation::NoPayloadManifest));
        }

        for item in on_disk.fetch_items.iter() {
            if on_disk.payload_manifests.checksums_of(item.path()).is_empty() {
                return Ok(Err(Violation::FetchItemNotInManifest(
                    item.path().to_path_buf(),
                )));
            }
            if !item.path().is_file() {
                return Ok(Err(Violation::FetchItemNotFetched(item.path().to_path_buf())));
            }
        }

        for (kind, manifests) in [
            (ManifestKind::Payload, &on_disk.payload_manifests),
            (ManifestKind::Tag, &on_disk.tag_manifests),
        ] {
            for algorithm in manifests.algorithms() {
                let Some(entries) = manifests.get(&algorithm) else {
                    continue;
                };
                if let Some(missing) = entries.keys().find(|path| !path.is_file()) {
                    return Ok(Err(Violation::ManifestedFileMissing {
                        manifest: kind.file_name(&algorithm),
                        path: missing.clone(),
                    }));
                }
            }
        }

        let payload_files = path::walk_files(&data).await.map_err(BagError::io(&data))?;
        if let Some(violation) = unlisted_payload(&on_disk, &payload_files) {
            return Ok(Err(violation));
        }

        Ok(Ok(on_disk))
    }

    async fn read_on_disk(&self) -> Result<Result<OnDisk, Violation>, BagError> {
        let base_dir = &self.base_dir;
        let known = self
            .payload_manifests
            .algorithms()
            .into_iter()
            .chain(self.tag_manifests.algorithms())
            .collect::<Vec<_>>();

        let read = async {
            let declaration = Declaration::read(base_dir).await?;
            let encoding = declaration.encoding;
            Ok::<_, BagError>(OnDisk {
                version: declaration.version,
                payload_manifests: Manifests::read(
                    base_dir,
                    ManifestKind::Payload,
                    encoding,
                    &known,
                )
                .await?,
                tag_manifests: Manifests::read(base_dir, ManifestKind::Tag, encoding, &known)
                    .await?,
                fetch_items: FetchRegistry::read(base_dir, encoding).await?,
            })
        };

        match read.await {
            Ok(on_disk) => Ok(Ok(on_disk)),
            Err(BagError::Metadata { path, source }) => Ok(Err(Violation::Malformed {
                file: path,
                reason: source.to_string(),
            })),
            Err(BagError::InvalidArgument(reason)) => Ok(Err(Violation::Malformed {
                file: base_dir.clone(),
                reason,
            })),
            Err(e) => Err(e),
        }
    }
}

/// Payload files must be in every manifest from version 1.0 on, in at least one before
fn unlisted_payload(on_disk: &OnDisk, payload_files: &[PathBuf]) -> Option<Violation> {
    let manifests = &on_disk.payload_manifests;
    let every_manifest = on_disk.version >= BagitVersion::V1_0;

    for file in payload_files {
        let listed_in = manifests.checksums_of(file);

        if every_manifest {
            if let Some(algorithm) = manifests
                .algorithms()
                .into_iter()
                .find(|algorithm| !listed_in.contains_key(algorithm))
            {
                return Some(Violation::PayloadFileNotInManifest {
                    algorithm: Some(algorithm),
                    path: file.clone(),
                });
            }
        } else if listed_in.is_empty() {
            return Some(Violation::PayloadFileNotInManifest {
                algorithm: None,
                path: file.clone(),
            });
        }
    }
    None
}

fn first_mismatch(
    path: &Path,
    expected: &BTreeMap<Algorithm, Checksum>,
    actual: &BTreeMap<Algorithm, Checksum>,
) -> Option<Mismatch> {
    expected.iter().find_map(|(algorithm, expected)| {
        let actual = actual.get(algorithm)?;
        (actual != expected).then(|| Mismatch {
            algorithm: *algorithm,
            path: path.to_path_buf(),
            expected: expected.clone(),
            actual: actual.clone(),
        })
    })
}

fn parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
