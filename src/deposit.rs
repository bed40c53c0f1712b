//! A bag together with the workflow state of the archive it is deposited in

use crate::error::BagError;
use crate::{Algorithm, BagInfo, BagIt};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::info;

/// Name of the properties file, next to the bag inside a deposit directory
pub const DEPOSIT_PROPERTIES: &str = "deposit.properties";

/// Failure reported by a [`DepositProperties`] implementation
pub type PropertiesError = Box<dyn std::error::Error + Send + Sync>;

/// Workflow state stored alongside a bag, its format is up to the implementation
#[async_trait]
pub trait DepositProperties: Send + Sync + Sized {
    /// Write the properties to `file`, replacing it
    async fn save(&self, file: &Path) -> Result<(), PropertiesError>;

    /// Load properties from `file`
    async fn read(file: &Path) -> Result<Self, PropertiesError>;
}

#[derive(Debug)]
/// Deposit directory holding exactly one bag and a properties file
pub struct Deposit<P> {
    base_dir: PathBuf,
    bag: BagIt,
    properties: P,
}

impl<P: DepositProperties> Deposit<P> {
    /// Create a deposit directory with an empty bag named `bag_name`, then save it
    pub async fn create(
        base_dir: impl AsRef<Path>,
        bag_name: &str,
        algorithms: impl IntoIterator<Item = Algorithm>,
        info: BagInfo,
        properties: P,
    ) -> Result<Self, BagError> {
        let base_dir = base_dir.as_ref();
        if fs::try_exists(base_dir).await.map_err(BagError::io(base_dir))? {
            return Err(BagError::already_exists("deposit directory", base_dir));
        }
        let components = Path::new(bag_name).components().collect::<Vec<_>>();
        if !matches!(components.as_slice(), [Component::Normal(_)]) {
            return Err(BagError::invalid(format!(
                "bag name `{bag_name}` must be a single directory name"
            )));
        }

        fs::create_dir_all(base_dir)
            .await
            .map_err(BagError::io(base_dir))?;
        let base_dir = fs::canonicalize(base_dir)
            .await
            .map_err(BagError::io(base_dir))?;

        let bag = BagIt::empty(base_dir.join(bag_name), algorithms, info).await?;
        let mut deposit = Self {
            base_dir,
            bag,
            properties,
        };
        deposit.save().await?;

        info!(deposit = %deposit.base_dir.display(), "created deposit");
        Ok(deposit)
    }

    /// Open the deposit in `base_dir`, which must contain a single directory: the bag
    pub async fn read(base_dir: impl AsRef<Path>) -> Result<Self, BagError> {
        let base_dir = base_dir.as_ref();
        if !base_dir.is_dir() {
            return Err(BagError::not_found("deposit directory", base_dir.display()));
        }
        let base_dir = fs::canonicalize(base_dir)
            .await
            .map_err(BagError::io(base_dir))?;

        let mut bag_dirs = Vec::new();
        let mut entries = fs::read_dir(&base_dir)
            .await
            .map_err(BagError::io(&base_dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(BagError::io(&base_dir))? {
            let file_type = entry.file_type().await.map_err(BagError::io(entry.path()))?;
            if file_type.is_dir() {
                bag_dirs.push(entry.path());
            }
        }

        let bag_dir = match bag_dirs.as_slice() {
            [bag_dir] => bag_dir.clone(),
            _ => {
                return Err(BagError::invalid(format!(
                    "deposit `{}` must contain exactly one bag directory, found {}",
                    base_dir.display(),
                    bag_dirs.len()
                )))
            }
        };

        let bag = BagIt::read(&bag_dir).await?;
        let properties_file = base_dir.join(DEPOSIT_PROPERTIES);
        let properties = P::read(&properties_file)
            .await
            .map_err(|e| properties_error(&properties_file, e))?;

        Ok(Self {
            base_dir,
            bag,
            properties,
        })
    }

    /// Save the bag, then the properties; stops at the first failure
    pub async fn save(&mut self) -> Result<(), BagError> {
        self.bag.save().await?;

        let properties_file = self.properties_file();
        self.properties
            .save(&properties_file)
            .await
            .map_err(|e| properties_error(&properties_file, e))?;

        info!(deposit = %self.base_dir.display(), "saved deposit");
        Ok(())
    }
}

impl<P> Deposit<P> {
    /// Deposit directory, absolute
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of [`DEPOSIT_PROPERTIES`] in the deposit directory
    pub fn properties_file(&self) -> PathBuf {
        self.base_dir.join(DEPOSIT_PROPERTIES)
    }

    /// The bag of the deposit
    pub fn bag(&self) -> &BagIt {
        &self.bag
    }

    /// Mutable access to the bag, changes are written by [`Deposit::save()`]
    pub fn bag_mut(&mut self) -> &mut BagIt {
        &mut self.bag
    }

    /// Workflow state of the deposit
    pub fn properties(&self) -> &P {
        &self.properties
    }

    /// Mutable workflow state, written by [`Deposit::save()`]
    pub fn properties_mut(&mut self) -> &mut P {
        &mut self.properties
    }

    /// Give up the deposit, keeping the bag and its properties
    pub fn into_parts(self) -> (BagIt, P) {
        (self.bag, self.properties)
    }
}

fn properties_error(path: &Path, error: PropertiesError) -> BagError {
    BagError::Properties {
        path: path.to_path_buf(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::KEY_USER_ACCOUNT;

    #[derive(Debug, Clone, PartialEq)]
    struct State {
        label: String,
    }

    #[async_trait]
    impl DepositProperties for State {
        async fn save(&self, file: &Path) -> Result<(), PropertiesError> {
            fs::write(file, format!("state.label = {}\n", self.label)).await?;
            Ok(())
        }

        async fn read(file: &Path) -> Result<Self, PropertiesError> {
            let contents = fs::read_to_string(file).await?;
            let label = contents
                .trim()
                .strip_prefix("state.label = ")
                .ok_or("missing state.label")?;
            Ok(Self {
                label: label.to_string(),
            })
        }
    }

    /// Properties that can never be written
    struct Broken;

    #[async_trait]
    impl DepositProperties for Broken {
        async fn save(&self, _: &Path) -> Result<(), PropertiesError> {
            Err("disk on fire".into())
        }

        async fn read(_: &Path) -> Result<Self, PropertiesError> {
            Ok(Self)
        }
    }

    fn draft() -> State {
        State {
            label: "DRAFT".to_string(),
        }
    }

    #[tokio::test]
    async fn create_then_read() {
        let directory = tempfile::tempdir().unwrap();
        let info: BagInfo = [(KEY_USER_ACCOUNT, "user001")].into_iter().collect();

        let mut deposit = Deposit::create(
            directory.path().join("deposit"),
            "bag",
            [Algorithm::Sha1],
            info,
            draft(),
        )
        .await
        .unwrap();
        assert!(deposit.properties_file().is_file());

        deposit
            .bag_mut()
            .add_payload_file(&b"hello"[..], "x")
            .await
            .unwrap();
        deposit.properties_mut().label = "SUBMITTED".to_string();
        deposit.save().await.unwrap();

        let read = Deposit::<State>::read(directory.path().join("deposit"))
            .await
            .unwrap();
        assert_eq!(read.properties().label, "SUBMITTED");
        assert_eq!(read.bag().user_account(), Some("user001"));
        assert_eq!(read.bag().base_dir(), deposit.bag().base_dir());
        assert_eq!(read.bag().is_valid().await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn bag_saved_before_properties_fail() {
        let directory = tempfile::tempdir().unwrap();
        let deposit_dir = directory.path().join("deposit");

        let created =
            Deposit::create(&deposit_dir, "bag", [Algorithm::Sha1], BagInfo::new(), Broken).await;

        assert!(matches!(created, Err(BagError::Properties { .. })));
        assert!(deposit_dir.join("bag/bagit.txt").is_file());
        assert!(!deposit_dir.join(DEPOSIT_PROPERTIES).exists());
    }

    #[tokio::test]
    async fn read_requires_a_single_bag() {
        let directory = tempfile::tempdir().unwrap();
        let deposit_dir = directory.path().join("deposit");
        Deposit::create(&deposit_dir, "bag", [Algorithm::Sha1], BagInfo::new(), draft())
            .await
            .unwrap();
        fs::create_dir(deposit_dir.join("another")).await.unwrap();

        assert!(matches!(
            Deposit::<State>::read(&deposit_dir).await,
            Err(BagError::InvalidArgument(_))
        ));
        assert!(matches!(
            Deposit::<State>::read(directory.path().join("missing")).await,
            Err(BagError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn bag_name_is_a_single_component() {
        let directory = tempfile::tempdir().unwrap();

        assert!(matches!(
            Deposit::create(
                directory.path().join("deposit"),
                "../escape",
                [Algorithm::Sha1],
                BagInfo::new(),
                draft()
            )
            .await,
            Err(BagError::InvalidArgument(_))
        ));
    }
}
