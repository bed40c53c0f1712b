use super::{BagInfo, BagitVersion, Encoding, MetadataError, KEY_ENCODING, KEY_VERSION};
use crate::error::BagError;
use std::path::Path;
use tokio::fs;

pub(crate) const BAGIT_TXT: &str = "bagit.txt";
pub(crate) const BAG_INFO_TXT: &str = "bag-info.txt";
pub(crate) const FETCH_TXT: &str = "fetch.txt";

/// Read a whole tag file as text
pub(crate) async fn read_tag_file(
    path: impl AsRef<Path>,
    encoding: Encoding,
) -> Result<String, BagError> {
    let path = path.as_ref();
    let bytes = fs::read(path).await.map_err(BagError::io(path))?;

    encoding.decode(bytes).map_err(|source| BagError::Metadata {
        path: path.to_path_buf(),
        source,
    })
}

/// Write (or overwrite) a whole tag file
pub(crate) async fn write_tag_file(
    path: impl AsRef<Path>,
    contents: &str,
    encoding: Encoding,
) -> Result<(), BagError> {
    let path = path.as_ref();
    let bytes = encoding
        .encode(contents)
        .map_err(|source| BagError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;

    fs::write(path, bytes).await.map_err(BagError::io(path))
}

/// Contents of `bagit.txt`, always UTF-8
#[derive(Debug, PartialEq)]
pub(crate) struct Declaration {
    pub version: BagitVersion,
    pub encoding: Encoding,
}

impl Declaration {
    pub async fn read(base_dir: &Path) -> Result<Self, BagError> {
        let path = base_dir.join(BAGIT_TXT);
        let contents = read_tag_file(&path, Encoding::Utf8).await?;

        Self::parse(&contents).map_err(|source| BagError::Metadata { path, source })
    }

    fn parse(contents: &str) -> Result<Self, MetadataError> {
        let lines = BagInfo::parse(contents)?;

        let version = lines
            .first(KEY_VERSION)
            .ok_or(MetadataError::MissingKey(KEY_VERSION))?
            .parse()?;
        let encoding = lines
            .first(KEY_ENCODING)
            .ok_or(MetadataError::MissingKey(KEY_ENCODING))?
            .parse()?;

        Ok(Self { version, encoding })
    }

    pub async fn write(&self, base_dir: &Path) -> Result<(), BagError> {
        let contents = format!(
            "{KEY_VERSION}: {}\n{KEY_ENCODING}: {}\n",
            self.version, self.encoding
        );

        write_tag_file(base_dir.join(BAGIT_TXT), &contents, Encoding::Utf8).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_declaration() {
        assert_eq!(
            Declaration::parse("BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n"),
            Ok(Declaration {
                version: BagitVersion::V0_97,
                encoding: Encoding::Utf8,
            })
        );
        assert_eq!(
            Declaration::parse("Tag-File-Character-Encoding: UTF-8\n"),
            Err(MetadataError::MissingKey(KEY_VERSION))
        );
    }

    #[tokio::test]
    async fn declaration_written_and_read_back() {
        let directory = tempfile::tempdir().unwrap();
        let declaration = Declaration {
            version: BagitVersion::V1_0,
            encoding: Encoding::Latin1,
        };

        declaration.write(directory.path()).await.unwrap();

        assert_eq!(
            fs::read_to_string(directory.path().join(BAGIT_TXT))
                .await
                .unwrap(),
            "BagIt-Version: 1.0\nTag-File-Character-Encoding: ISO-8859-1\n"
        );
        assert_eq!(Declaration::read(directory.path()).await, Ok(declaration));
    }

    #[tokio::test]
    async fn latin1_tag_file() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("bag-info.txt");

        write_tag_file(&path, "Contact-Name: Zoë\n", Encoding::Latin1)
            .await
            .unwrap();
        assert_eq!(fs::read(&path).await.unwrap().len(), 18);
        assert_eq!(
            read_tag_file(&path, Encoding::Latin1).await,
            Ok("Contact-Name: Zoë\n".to_string())
        );
    }
}
