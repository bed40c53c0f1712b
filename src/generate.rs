use crate::error::BagError;
use crate::metadata::file::{BAGIT_TXT, BAG_INFO_TXT, FETCH_TXT};
use crate::{
    path, Algorithm, BagInfo, BagIt, BagitVersion, Encoding, FetchRegistry, Manifests, DATA_DIR,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

impl BagIt {
    /// Create an empty bag, saved right away
    ///
    /// # Arguments
    ///
    /// * `base_dir` - Path where the bag will reside, must not exist yet
    /// * `algorithms` - Algorithms of the payload manifests, also used for tag manifests
    /// * `info` - Initial `bag-info.txt` entries, `Created` is set to now unless given
    pub async fn empty(
        base_dir: impl AsRef<Path>,
        algorithms: impl IntoIterator<Item = Algorithm>,
        info: BagInfo,
    ) -> Result<Self, BagError> {
        let algorithms = non_empty(algorithms)?;

        let base_dir = base_dir.as_ref();
        if fs::try_exists(base_dir).await.map_err(BagError::io(base_dir))? {
            return Err(BagError::already_exists("bag directory", base_dir));
        }

        fs::create_dir_all(base_dir.join(DATA_DIR))
            .await
            .map_err(BagError::io(base_dir))?;
        let base_dir = fs::canonicalize(base_dir)
            .await
            .map_err(BagError::io(base_dir))?;

        let mut bag = Self::initialize(base_dir, algorithms, info).await?;
        bag.save().await?;

        info!(bag = %bag.base_dir.display(), "created empty bag");
        Ok(bag)
    }

    /// Turn an existing directory into a bag: its contents become the payload
    ///
    /// # Arguments
    ///
    /// * `directory` - Directory holding the future payload
    /// * `algorithms` - Algorithms of the payload manifests, also used for tag manifests
    /// * `info` - Initial `bag-info.txt` entries, `Created` is set to now unless given
    pub async fn create_from_data(
        directory: impl AsRef<Path>,
        algorithms: impl IntoIterator<Item = Algorithm>,
        info: BagInfo,
    ) -> Result<Self, BagError> {
        let algorithms = non_empty(algorithms)?;

        let directory = directory.as_ref();
        if !directory.exists() {
            return Err(BagError::not_found("directory", directory.display()));
        }
        if !directory.is_dir() {
            return Err(BagError::invalid(format!(
                "`{}` is not a directory",
                directory.display()
            )));
        }
        let base_dir = fs::canonicalize(directory)
            .await
            .map_err(BagError::io(directory))?;

        move_contents_to_data(&base_dir).await?;

        let mut bag = Self::initialize(base_dir, algorithms.clone(), info).await?;
        let payload_files = path::walk_files(&bag.data_dir())
            .await
            .map_err(BagError::io(bag.data_dir()))?;
        // Every algorithm is already tracked, with no file yet
        for algorithm in algorithms {
            bag.payload_manifests
                .add_algorithm(algorithm, payload_files.clone(), true)
                .await?;
        }
        bag.save().await?;

        info!(bag = %bag.base_dir.display(), files = payload_files.len(), "created bag from data");
        Ok(bag)
    }

    /// In-memory model of a bag without payload, nothing written yet
    async fn initialize(
        base_dir: PathBuf,
        algorithms: BTreeSet<Algorithm>,
        mut info: BagInfo,
    ) -> Result<Self, BagError> {
        let mut payload_manifests = Manifests::default();
        for algorithm in &algorithms {
            payload_manifests
                .add_algorithm(*algorithm, Vec::new(), false)
                .await?;
        }

        let mut bag = Self::assemble(
            base_dir,
            BagitVersion::default(),
            Encoding::default(),
            BagInfo::new(),
            payload_manifests,
            Manifests::default(),
            FetchRegistry::default(),
        )?;

        if !info.contains_key(crate::KEY_CREATED) {
            let now = jiff::Timestamp::now();
            info.add(crate::KEY_CREATED, now.to_string())
                .map_err(|source| BagError::Metadata {
                    path: bag.base_dir.join(BAG_INFO_TXT),
                    source,
                })?;
        }
        bag.info = info;

        let control_files = bag.control_files();
        for algorithm in algorithms {
            bag.tag_manifests
                .add_algorithm(algorithm, control_files.clone(), false)
                .await?;
        }

        Ok(bag)
    }

    /// Tag files written by the bag itself and listed in tag manifests
    pub(crate) fn control_files(&self) -> Vec<PathBuf> {
        let mut files = vec![
            self.base_dir.join(BAGIT_TXT),
            self.base_dir.join(BAG_INFO_TXT),
        ];
        files.extend(
            self.payload_manifests
                .algorithms()
                .iter()
                .map(|algorithm| self.base_dir.join(algorithm.manifest_file_name())),
        );
        if !self.fetch_items.is_empty() {
            files.push(self.base_dir.join(FETCH_TXT));
        }
        files
    }
}

fn non_empty(
    algorithms: impl IntoIterator<Item = Algorithm>,
) -> Result<BTreeSet<Algorithm>, BagError> {
    let algorithms = algorithms.into_iter().collect::<BTreeSet<_>>();
    if algorithms.is_empty() {
        return Err(BagError::invalid(
            "a bag needs at least one payload manifest algorithm",
        ));
    }
    Ok(algorithms)
}

/// Move every entry of `base_dir` into `base_dir/data`
async fn move_contents_to_data(base_dir: &Path) -> Result<(), BagError> {
    // Staging directory, `data` may already be one of the entries
    let staging = base_dir.join(format!(".bagit-staging-{}", std::process::id()));
    fs::create_dir(&staging).await.map_err(BagError::io(&staging))?;

    let mut entries = fs::read_dir(base_dir).await.map_err(BagError::io(base_dir))?;
    while let Some(entry) = entries.next_entry().await.map_err(BagError::io(base_dir))? {
        let source = entry.path();
        if source == staging {
            continue;
        }
        let destination = staging.join(entry.file_name());
        fs::rename(&source, &destination)
            .await
            .map_err(BagError::io(&source))?;
    }

    let data = base_dir.join(DATA_DIR);
    fs::rename(&staging, &data).await.map_err(BagError::io(&data))
}
