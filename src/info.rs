use crate::error::BagError;
use crate::metadata::file::BAG_INFO_TXT;
use crate::metadata::MetadataError;
use crate::{BagInfo, BagIt, KEY_CREATED, KEY_IS_VERSION_OF, KEY_USER_ACCOUNT};
use jiff::Timestamp;
use uuid::Uuid;

impl BagIt {
    /// Entries of `bag-info.txt`, as they will be written on the next save
    pub fn bag_info(&self) -> &BagInfo {
        &self.info
    }

    /// Append a `bag-info.txt` entry, keeping existing values of the same key
    ///
    /// `Payload-Oxum`, `Bagging-Date` and `Bag-Size` are replaced when the bag is saved.
    pub fn add_bag_info(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), BagError> {
        let result = self.info.add(key, value);
        result.map_err(|source| self.info_error(source))
    }

    /// Remove every value of `key`
    pub fn remove_bag_info(&mut self, key: &str) {
        self.info.remove(key);
    }

    fn set_bag_info(&mut self, key: &str, value: String) -> Result<(), BagError> {
        let result = self.info.set(key, value);
        result.map_err(|source| self.info_error(source))
    }

    fn info_error(&self, source: MetadataError) -> BagError {
        BagError::Metadata {
            path: self.base_dir.join(BAG_INFO_TXT),
            source,
        }
    }

    /// Moment the bag was created, from the `Created` entry
    pub fn created(&self) -> Result<Option<Timestamp>, BagError> {
        self.info
            .first(KEY_CREATED)
            .map(|value| {
                value.parse::<Timestamp>().map_err(|e| {
                    BagError::invalid(format!("`{KEY_CREATED}` value `{value}`: {e}"))
                })
            })
            .transpose()
    }

    /// Replace any `Created` entry
    pub fn with_created(&mut self, created: Timestamp) -> Result<(), BagError> {
        self.set_bag_info(KEY_CREATED, created.to_string())
    }

    /// Remove the [`KEY_CREATED`] entries
    pub fn without_created(&mut self) {
        self.info.remove(KEY_CREATED);
    }

    /// Bag this one is a new version of, from the `Is-Version-Of` entry
    ///
    /// A malformed value only fails here, other entries stay readable.
    pub fn is_version_of(&self) -> Result<Option<Uuid>, BagError> {
        let Some(value) = self.info.first(KEY_IS_VERSION_OF) else {
            return Ok(None);
        };

        let malformed = || {
            BagError::invalid(format!(
                "`{KEY_IS_VERSION_OF}` value `{value}` is not a `urn:uuid:` reference"
            ))
        };
        let uuid = value.strip_prefix("urn:uuid:").ok_or_else(malformed)?;
        Uuid::parse_str(uuid).map(Some).map_err(|_| malformed())
    }

    /// Replace any `Is-Version-Of` entry with `urn:uuid:<version_of>`
    pub fn with_is_version_of(&mut self, version_of: Uuid) -> Result<(), BagError> {
        self.set_bag_info(KEY_IS_VERSION_OF, version_of.urn().to_string())
    }

    /// Remove the [`KEY_IS_VERSION_OF`] entries
    pub fn without_is_version_of(&mut self) {
        self.info.remove(KEY_IS_VERSION_OF);
    }

    /// Account of the depositor, from the `EASY-User-Account` entry
    pub fn user_account(&self) -> Option<&str> {
        self.info.first(KEY_USER_ACCOUNT)
    }

    /// Replace any `EASY-User-Account` entry
    pub fn with_user_account(&mut self, account: impl Into<String>) -> Result<(), BagError> {
        self.set_bag_info(KEY_USER_ACCOUNT, account.into())
    }

    /// Remove the [`KEY_USER_ACCOUNT`] entries
    pub fn without_user_account(&mut self) {
        self.info.remove(KEY_USER_ACCOUNT);
    }
}
