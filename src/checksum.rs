pub(crate) use compute::{compute_checksum_file, compute_checksums_file};
pub use compute::ChecksumComputeError;
use std::fmt::Display;

mod compute {
    use super::Checksum;
    use crate::Algorithm;
    use digest::DynDigest;
    use std::{collections::BTreeMap, path::Path};
    use tokio::{fs::File, io::AsyncReadExt};

    const CHUNK_SIZE: usize = 64 * 1024;

    #[derive(thiserror::Error, Debug, PartialEq)]
    /// Failure to hash a file
    pub enum ChecksumComputeError {
        #[error("File not found on disk")]
        /// Nothing at the path
        FileNotFound,
        #[error("Failed to open file")]
        /// File could not be opened
        OpenFile(std::io::ErrorKind),
        #[error("Failed to read file")]
        /// Reading failed midway
        ReadFile(std::io::ErrorKind),
    }

    /// Hash `path` once, feeding every requested algorithm chunk by chunk
    pub(crate) async fn compute_checksums_file(
        path: impl AsRef<Path>,
        algorithms: impl IntoIterator<Item = &Algorithm>,
    ) -> Result<BTreeMap<Algorithm, Checksum>, ChecksumComputeError> {
        let (algorithms, mut hashers): (Vec<_>, Vec<_>) = algorithms
            .into_iter()
            .map(|algorithm| (*algorithm, algorithm.hasher()))
            .unzip();

        stream_file(path, &mut hashers).await?;

        Ok(algorithms
            .into_iter()
            .zip(hashers)
            .map(|(algorithm, hasher)| (algorithm, Checksum::from(&hasher.finalize()[..])))
            .collect())
    }

    pub(crate) async fn compute_checksum_file(
        path: impl AsRef<Path>,
        algorithm: &Algorithm,
    ) -> Result<Checksum, ChecksumComputeError> {
        let mut hasher = [algorithm.hasher()];
        stream_file(path, &mut hasher).await?;
        let [hasher] = hasher;

        Ok(Checksum::from(&hasher.finalize()[..]))
    }

    async fn stream_file(
        path: impl AsRef<Path>,
        hashers: &mut [Box<dyn DynDigest + Send>],
    ) -> Result<(), ChecksumComputeError> {
        if !path.as_ref().is_file() {
            return Err(ChecksumComputeError::FileNotFound);
        }

        let mut file = File::open(&path)
            .await
            .map_err(|e| ChecksumComputeError::OpenFile(e.kind()))?;

        let mut buffer = vec![0; CHUNK_SIZE];
        loop {
            let read_bytes = file
                .read(&mut buffer)
                .await
                .map_err(|e| ChecksumComputeError::ReadFile(e.kind()))?;

            // EOF
            if read_bytes == 0 {
                return Ok(());
            }

            for hasher in hashers.iter_mut() {
                hasher.update(&buffer[..read_bytes]);
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Lowercase hexadecimal digest of a file
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum for a slice of bytes
    pub fn digest(algorithm: &crate::Algorithm, bytes: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(bytes);
        Self::from(&hasher.finalize()[..])
    }
}

impl From<&[u8]> for Checksum {
    fn from(value: &[u8]) -> Self {
        Self(hex::encode(value))
    }
}

impl From<Vec<u8>> for Checksum {
    fn from(value: Vec<u8>) -> Self {
        Self(hex::encode(value))
    }
}

impl From<&str> for Checksum {
    fn from(value: &str) -> Checksum {
        Self(value.to_ascii_lowercase())
    }
}

impl From<String> for Checksum {
    fn from(value: String) -> Self {
        Self(value.to_ascii_lowercase())
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Checksum {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
