use crate::algorithm::{MANIFEST_PREFIX, TAG_MANIFEST_PREFIX};
use crate::checksum::{compute_checksum_file, compute_checksums_file};
use crate::error::BagError;
use crate::metadata::file::{read_tag_file, write_tag_file};
use crate::metadata::Encoding;
use crate::path::{
    decode_path, encode_path, from_bag_relative, is_strictly_under, to_bag_relative,
};
use crate::{Algorithm, Checksum, DATA_DIR};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Payload manifests list files of `data/`, tag manifests everything else
pub enum ManifestKind {
    /// `manifest-<algorithm>.txt`
    Payload,
    /// `tagmanifest-<algorithm>.txt`
    Tag,
}

impl ManifestKind {
    pub(crate) fn prefix(&self) -> &'static str {
        match self {
            ManifestKind::Payload => MANIFEST_PREFIX,
            ManifestKind::Tag => TAG_MANIFEST_PREFIX,
        }
    }

    pub(crate) fn file_name(&self, algorithm: &Algorithm) -> String {
        match self {
            ManifestKind::Payload => algorithm.manifest_file_name(),
            ManifestKind::Tag => algorithm.tag_manifest_file_name(),
        }
    }

    /// Payload manifests only list files below `data/`, tag manifests files of the bag outside it
    pub(crate) fn may_list(&self, base_dir: &Path, path: &Path) -> bool {
        let data = base_dir.join(DATA_DIR);
        match self {
            ManifestKind::Payload => is_strictly_under(path, &data),
            ManifestKind::Tag => is_strictly_under(path, base_dir) && !path.starts_with(&data),
        }
    }
}

/// Absolute path to checksum, `None` while the checksum is only known after the next save
pub type ManifestEntries = BTreeMap<PathBuf, Option<Checksum>>;

#[derive(Debug, Clone, PartialEq, Default)]
/// Per-algorithm checksums of the files of one kind of manifest
pub struct Manifests {
    entries: BTreeMap<Algorithm, ManifestEntries>,
}

impl Manifests {
    /// Tracked algorithms
    pub fn algorithms(&self) -> BTreeSet<Algorithm> {
        self.entries.keys().copied().collect()
    }

    /// Whether `algorithm` is tracked
    pub fn contains_algorithm(&self, algorithm: &Algorithm) -> bool {
        self.entries.contains_key(algorithm)
    }

    /// No algorithm tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries for one algorithm, keyed by absolute path
    pub fn get(&self, algorithm: &Algorithm) -> Option<&ManifestEntries> {
        self.entries.get(algorithm)
    }

    /// Read-only copy of every manifest
    pub fn snapshot(&self) -> BTreeMap<Algorithm, ManifestEntries> {
        self.entries.clone()
    }

    /// `path` is listed by at least one algorithm
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.values().any(|entries| entries.contains_key(path))
    }

    /// Every path listed by any algorithm
    pub fn paths(&self) -> BTreeSet<PathBuf> {
        self.entries
            .values()
            .flat_map(|entries| entries.keys().cloned())
            .collect()
    }

    /// Known checksums of `path`, by algorithm
    pub fn checksums_of(&self, path: &Path) -> BTreeMap<Algorithm, Checksum> {
        self.entries
            .iter()
            .filter_map(|(algorithm, entries)| {
                let checksum = entries.get(path)?.clone()?;
                Some((*algorithm, checksum))
            })
            .collect()
    }

    /// Track `algorithm` for `files`
    ///
    /// A new algorithm gets the checksum of every file; a tracked one is left alone unless
    /// `recompute` is set, in which case the checksums of `files` are computed again.
    /// Files missing on disk are listed with an unknown checksum.
    pub async fn add_algorithm(
        &mut self,
        algorithm: Algorithm,
        files: impl IntoIterator<Item = PathBuf>,
        recompute: bool,
    ) -> Result<(), BagError> {
        if self.contains_algorithm(&algorithm) && !recompute {
            return Ok(());
        }

        let mut computed = ManifestEntries::new();
        for file in files {
            let checksum = if file.is_file() {
                Some(
                    compute_checksum_file(&file, &algorithm)
                        .await
                        .map_err(BagError::checksum(&file))?,
                )
            } else {
                None
            };
            computed.insert(file, checksum);
        }

        self.entries.entry(algorithm).or_default().extend(computed);
        Ok(())
    }

    /// Stop tracking `algorithm`, returns its entries
    pub fn remove_algorithm(&mut self, algorithm: &Algorithm) -> Result<ManifestEntries, BagError> {
        self.entries
            .remove(algorithm)
            .ok_or_else(|| BagError::not_found("manifest algorithm", algorithm))
    }

    /// Set the checksum of `path` for one tracked algorithm, returns whether it is tracked
    pub fn put(&mut self, algorithm: &Algorithm, path: PathBuf, checksum: Option<Checksum>) -> bool {
        match self.entries.get_mut(algorithm) {
            Some(entries) => {
                entries.insert(path, checksum);
                true
            }
            None => false,
        }
    }

    /// List `path` in every tracked algorithm, with the matching checksum of `checksums` if any
    pub fn insert(&mut self, path: &Path, checksums: &BTreeMap<Algorithm, Checksum>) {
        for (algorithm, entries) in self.entries.iter_mut() {
            entries.insert(path.to_path_buf(), checksums.get(algorithm).cloned());
        }
    }

    /// Remove `path` from every algorithm, returns whether it was listed
    pub fn remove(&mut self, path: &Path) -> bool {
        self.entries
            .values_mut()
            .fold(false, |removed, entries| entries.remove(path).is_some() || removed)
    }

    /// Forget the algorithms listing no file anymore, returns them
    pub fn drop_empty_algorithms(&mut self) -> Vec<Algorithm> {
        let empty = self
            .entries
            .iter()
            .filter(|(_, entries)| entries.is_empty())
            .map(|(algorithm, _)| *algorithm)
            .collect::<Vec<_>>();

        for algorithm in &empty {
            self.entries.remove(algorithm);
        }
        empty
    }

    /// Compute again the checksum of every listed path, in every algorithm
    pub(crate) async fn recompute(&mut self) -> Result<(), BagError> {
        let algorithms = self.algorithms();
        for path in self.paths() {
            let checksums = compute_checksums_file(&path, &algorithms)
                .await
                .map_err(BagError::checksum(&path))?;
            for (algorithm, checksum) in checksums {
                self.put(&algorithm, path.clone(), Some(checksum));
            }
        }
        Ok(())
    }

    /// Replace every manifest file of `kind` in `base_dir` with the in-memory state
    pub(crate) async fn write(
        &self,
        base_dir: &Path,
        kind: ManifestKind,
        encoding: Encoding,
    ) -> Result<(), BagError> {
        for existing in manifest_files(base_dir, kind).await? {
            fs::remove_file(&existing)
                .await
                .map_err(BagError::io(&existing))?;
        }

        for (algorithm, entries) in &self.entries {
            let mut contents = String::new();
            for (path, checksum) in entries {
                let checksum = checksum.as_ref().ok_or_else(|| {
                    BagError::IllegalState(format!(
                        "checksum of `{}` is unknown for {algorithm}",
                        path.display()
                    ))
                })?;
                let relative = to_bag_relative(base_dir, path).ok_or_else(|| {
                    BagError::invalid(format!("`{}` is outside the bag", path.display()))
                })?;
                contents.push_str(&format!("{checksum}  {}\n", encode_path(&relative)));
            }

            let manifest_path = base_dir.join(kind.file_name(algorithm));
            write_tag_file(&manifest_path, &contents, encoding).await?;
            tracing::debug!(manifest = %manifest_path.display(), files = entries.len(), "wrote manifest");
        }

        Ok(())
    }

    /// Load every manifest file of `kind` found in `base_dir`
    ///
    /// Builtin algorithms are recognized by name, custom ones only when listed in `known`.
    pub(crate) async fn read(
        base_dir: &Path,
        kind: ManifestKind,
        encoding: Encoding,
        known: &[Algorithm],
    ) -> Result<Self, BagError> {
        let mut manifests = Self::default();

        for manifest_path in manifest_files(base_dir, kind).await? {
            let algorithm = manifest_algorithm(&manifest_path, kind, known)?;
            let contents = read_tag_file(&manifest_path, encoding).await?;

            let mut entries = ManifestEntries::new();
            for line in contents.lines().filter(|line| !line.trim().is_empty()) {
                let (checksum, relative) = parse_manifest_line(line).ok_or_else(|| {
                    BagError::invalid(format!(
                        "malformed line in `{}`: `{line}`",
                        manifest_path.display()
                    ))
                })?;
                let path = from_bag_relative(base_dir, &decode_path(relative));
                if !kind.may_list(base_dir, &path) {
                    return Err(BagError::invalid(format!(
                        "`{}` lists `{relative}`, which it may not hold",
                        manifest_path.display()
                    )));
                }
                entries.insert(path, Some(Checksum::from(checksum)));
            }

            manifests.entries.insert(algorithm, entries);
        }

        Ok(manifests)
    }
}

/// `<checksum> <path>`, the path may contain whitespace
pub(crate) fn parse_manifest_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (checksum, relative) = line.split_once(char::is_whitespace)?;
    let relative = relative.trim_start();

    if checksum.is_empty() || relative.is_empty() {
        return None;
    }
    Some((checksum, relative))
}

fn manifest_algorithm(
    manifest_path: &Path,
    kind: ManifestKind,
    known: &[Algorithm],
) -> Result<Algorithm, BagError> {
    let file_name = manifest_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    if let Some(algorithm) = known
        .iter()
        .find(|algorithm| kind.file_name(algorithm) == file_name)
    {
        return Ok(*algorithm);
    }

    match Algorithm::from_file_name(file_name, kind.prefix()) {
        Some(Ok(algorithm)) => Ok(algorithm),
        Some(Err(token)) => Err(BagError::invalid(format!(
            "unsupported checksum algorithm `{token}` in `{file_name}`"
        ))),
        None => Err(BagError::invalid(format!("`{file_name}` is not a manifest"))),
    }
}

/// Manifest files of `kind` at the top of `base_dir`
pub(crate) async fn manifest_files(
    base_dir: &Path,
    kind: ManifestKind,
) -> Result<Vec<PathBuf>, BagError> {
    let mut dir = fs::read_dir(base_dir).await.map_err(BagError::io(base_dir))?;
    let mut files = Vec::new();

    while let Some(entry) = dir.next_entry().await.map_err(BagError::io(base_dir))? {
        let path = entry.path();

        if
        // Item is a regular file
        path.is_file()
            // And
            &&
            // Name is `<prefix><algorithm>.txt`
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(kind.prefix()) && name.ends_with(".txt"))
        {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
