use crate::error::BagError;
use crate::metadata::file::{read_tag_file, write_tag_file};
use crate::metadata::Encoding;
use crate::path::{
    decode_path, encode_path, from_bag_relative, is_strictly_under, to_bag_relative,
};
use crate::DATA_DIR;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// A payload file available by reference instead of being present in `data/`
pub struct FetchItem {
    url: Url,
    /// Declared size in bytes, `-` in `fetch.txt` when unknown
    length: Option<u64>,
    /// Absolute path below `data/`
    path: PathBuf,
}

impl FetchItem {
    /// `path` is absolute, below `data/`
    pub fn new(url: Url, length: Option<u64>, path: impl Into<PathBuf>) -> Self {
        Self {
            url,
            length,
            path: path.into(),
        }
    }

    /// Where the content is downloaded from
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Size in bytes, when known
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Absolute path the item occupies once fetched
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn to_line(&self, base_dir: &Path) -> Result<String, BagError> {
        let relative = to_bag_relative(base_dir, &self.path).ok_or_else(|| {
            BagError::invalid(format!("`{}` is outside the bag", self.path.display()))
        })?;
        let length = self
            .length
            .map(|length| length.to_string())
            .unwrap_or_else(|| "-".to_string());

        Ok(format!("{} {length} {}\n", self.url, encode_path(&relative)))
    }

    fn from_line(line: &str, base_dir: &Path) -> Option<Self> {
        let mut parts = line.trim_end_matches(['\r', '\n']).splitn(3, ' ');
        let url = Url::parse(parts.next()?).ok()?;
        let length = match parts.next()? {
            "-" => None,
            length => Some(length.parse().ok()?),
        };
        let relative = parts.next()?.trim_start();
        if relative.is_empty() {
            return None;
        }

        Some(Self {
            url,
            length,
            path: from_bag_relative(base_dir, &decode_path(relative)),
        })
    }
}

impl Display for FetchItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.url, self.path.display())
    }
}

/// Only `http` and `https` urls can be fetched
pub(crate) fn validate_url(url: &Url) -> Result<(), BagError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(BagError::invalid(format!(
            "url `{url}` has scheme `{scheme}`, only http and https are allowed"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
/// Fetch items of a bag, at most one per target path
pub struct FetchRegistry {
    items: BTreeMap<PathBuf, FetchItem>,
}

impl FetchRegistry {
    /// No fetch item
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of fetch items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Items in target path order
    pub fn iter(&self) -> impl Iterator<Item = &FetchItem> {
        self.items.values()
    }

    /// An item targets the absolute `path`
    pub fn contains_path(&self, path: &Path) -> bool {
        self.items.contains_key(path)
    }

    /// Item whose target is the absolute `path`
    pub fn by_path(&self, path: &Path) -> Option<&FetchItem> {
        self.items.get(path)
    }

    /// First item, in path order, referencing `url`
    pub fn by_url(&self, url: &Url) -> Option<&FetchItem> {
        self.items.values().find(|item| item.url() == url)
    }

    /// Register `item`, fails if its target is already registered
    pub(crate) fn insert(&mut self, item: FetchItem) -> Result<(), BagError> {
        if self.items.contains_key(item.path()) {
            return Err(BagError::already_exists("fetch item", item.path()));
        }
        self.items.insert(item.path.clone(), item);
        Ok(())
    }

    pub(crate) fn remove(&mut self, path: &Path) -> Option<FetchItem> {
        self.items.remove(path)
    }

    pub(crate) async fn write(&self, base_dir: &Path, encoding: Encoding) -> Result<(), BagError> {
        let contents = self
            .items
            .values()
            .map(|item| item.to_line(base_dir))
            .collect::<Result<String, _>>()?;

        write_tag_file(base_dir.join(crate::metadata::file::FETCH_TXT), &contents, encoding).await
    }

    /// Parse `fetch.txt`, missing file means no fetch item
    pub(crate) async fn read(base_dir: &Path, encoding: Encoding) -> Result<Self, BagError> {
        let path = base_dir.join(crate::metadata::file::FETCH_TXT);
        if !path.is_file() {
            return Ok(Self::default());
        }

        let mut registry = Self::default();
        for line in read_tag_file(&path, encoding)
            .await?
            .lines()
            .filter(|line| !line.trim().is_empty())
        {
            let item = FetchItem::from_line(line, base_dir).ok_or_else(|| {
                BagError::invalid(format!("malformed line in `{}`: `{line}`", path.display()))
            })?;
            if !is_strictly_under(item.path(), &base_dir.join(DATA_DIR)) {
                return Err(BagError::invalid(format!(
                    "fetch target of `{line}` is not inside the payload directory"
                )));
            }
            registry.insert(item)?;
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn item(url: &str, length: Option<u64>, path: &str) -> FetchItem {
        FetchItem::new(Url::parse(url).unwrap(), length, path)
    }

    #[test]
    fn lines() {
        let base = Path::new("/bag");
        let with_length = item("http://example.org/y", Some(42), "/bag/data/y");
        let without_length = item("https://example.org/z", None, "/bag/data/dir/z z");

        assert_eq!(
            with_length.to_line(base).unwrap(),
            "http://example.org/y 42 data/y\n"
        );
        assert_eq!(
            without_length.to_line(base).unwrap(),
            "https://example.org/z - data/dir/z z\n"
        );

        assert_eq!(
            FetchItem::from_line("http://example.org/y 42 data/y", base),
            Some(with_length)
        );
        assert_eq!(
            FetchItem::from_line("https://example.org/z - data/dir/z z\r", base),
            Some(without_length)
        );
        assert_eq!(FetchItem::from_line("http://example.org/y 42", base), None);
        assert_eq!(
            FetchItem::from_line("http://example.org/y many data/y", base),
            None
        );
    }

    #[test]
    fn schemes() {
        assert!(validate_url(&Url::parse("http://example.org/y").unwrap()).is_ok());
        assert!(validate_url(&Url::parse("https://example.org/y").unwrap()).is_ok());
        assert!(matches!(
            validate_url(&Url::parse("ftp://example.org/y").unwrap()),
            Err(BagError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_url(&Url::parse("file:///etc/passwd").unwrap()),
            Err(BagError::InvalidArgument(_))
        ));
    }

    #[test]
    fn one_item_per_target() {
        let mut registry = FetchRegistry::default();
        registry
            .insert(item("http://example.org/y", Some(1), "/bag/data/y"))
            .unwrap();

        assert_eq!(
            registry.insert(item("http://example.org/other", Some(2), "/bag/data/y")),
            Err(BagError::already_exists("fetch item", "/bag/data/y"))
        );
        assert_eq!(
            registry
                .by_url(&Url::parse("http://example.org/y").unwrap())
                .map(FetchItem::path),
            Some(Path::new("/bag/data/y"))
        );
        assert!(registry.remove(Path::new("/bag/data/y")).is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn write_then_read() {
        let directory = tempfile::tempdir().unwrap();
        let base = directory.path();

        let mut registry = FetchRegistry::default();
        registry
            .insert(item("http://example.org/b", Some(3), &base.join("data/b").to_string_lossy()))
            .unwrap();
        registry
            .insert(item("http://example.org/a", None, &base.join("data/a").to_string_lossy()))
            .unwrap();

        registry.write(base, Encoding::Utf8).await.unwrap();
        assert_eq!(
            tokio::fs::read_to_string(base.join("fetch.txt")).await.unwrap(),
            "http://example.org/a - data/a\nhttp://example.org/b 3 data/b\n"
        );

        assert_eq!(FetchRegistry::read(base, Encoding::Utf8).await, Ok(registry));
    }

    #[tokio::test]
    async fn targets_stay_in_data() {
        let directory = tempfile::tempdir().unwrap();
        let base = directory.path();

        for line in [
            "http://example.org/y 1 ../y",
            "http://example.org/y 1 bagit.txt",
            "http://example.org/y 1 data",
            "http://example.org/y 1 data/../../y",
        ] {
            tokio::fs::write(base.join("fetch.txt"), format!("{line}\n"))
                .await
                .unwrap();
            assert!(
                matches!(
                    FetchRegistry::read(base, Encoding::Utf8).await,
                    Err(BagError::InvalidArgument(_))
                ),
                "`{line}` should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn no_fetch_file() {
        let directory = tempfile::tempdir().unwrap();
        assert_eq!(
            FetchRegistry::read(directory.path(), Encoding::Utf8).await,
            Ok(FetchRegistry::default())
        );
    }
}
