use digest::DynDigest;
use std::{cmp::Ordering, fmt::Display, hash::Hash, str::FromStr};

/// Builds a fresh hasher for one checksum computation
pub type HasherFactory = fn() -> Box<dyn DynDigest + Send>;

fn boxed<H: DynDigest + Default + Send + 'static>() -> Box<dyn DynDigest + Send> {
    Box::new(H::default())
}

#[derive(Clone, Copy)]
/// Checksum algorithms usable in payload and tag manifests
///
/// The name is the token used in manifest file names: `manifest-<name>.txt`,
/// names taken from <https://www.iana.org/assignments/named-information/named-information.xhtml>.
pub enum Algorithm {
    /// RFC 1321, kept for older bags
    Md5,
    /// FIPS 180-4
    Sha1,
    /// FIPS 180-4
    Sha256,
    /// FIPS 180-4
    Sha512,
    /// Any other hasher implementing the `digest` traits, see [`Algorithm::custom()`]
    Custom {
        /// Token of the manifest file names
        name: &'static str,
        /// Builds a fresh hasher per file
        hasher: HasherFactory,
    },
}

impl Algorithm {
    /// Algorithms known without registration
    pub const BUILTIN: [Algorithm; 4] = [
        Algorithm::Md5,
        Algorithm::Sha1,
        Algorithm::Sha256,
        Algorithm::Sha512,
    ];

    /// Register an algorithm backed by any hasher from the RustCrypto ecosystem
    ///
    /// ```
    /// # use bagit_deposit::Algorithm;
    /// let blake3 = Algorithm::custom::<blake3::Hasher>("blake3");
    /// assert_eq!(blake3.manifest_file_name(), "manifest-blake3.txt");
    /// ```
    pub fn custom<H: DynDigest + Default + Send + 'static>(name: &'static str) -> Self {
        Algorithm::Custom {
            name,
            hasher: boxed::<H>,
        }
    }

    /// Token used in manifest file names
    pub fn name(&self) -> &str {
        match self {
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
            Algorithm::Custom { name, .. } => name,
        }
    }

    pub(crate) fn hasher(&self) -> Box<dyn DynDigest + Send> {
        match self {
            Algorithm::Md5 => boxed::<md5::Md5>(),
            Algorithm::Sha1 => boxed::<sha1::Sha1>(),
            Algorithm::Sha256 => boxed::<sha2::Sha256>(),
            Algorithm::Sha512 => boxed::<sha2::Sha512>(),
            Algorithm::Custom { hasher, .. } => hasher(),
        }
    }

    /// `manifest-<name>.txt`
    pub fn manifest_file_name(&self) -> String {
        format!("{MANIFEST_PREFIX}{}.txt", self.name())
    }

    /// `tagmanifest-<name>.txt`
    pub fn tag_manifest_file_name(&self) -> String {
        format!("{TAG_MANIFEST_PREFIX}{}.txt", self.name())
    }

    /// Recognize the algorithm of a manifest file, given its file name and the expected prefix
    pub(crate) fn from_file_name(file_name: &str, prefix: &str) -> Option<Result<Self, String>> {
        let token = file_name.strip_prefix(prefix)?.strip_suffix(".txt")?;
        Some(token.parse())
    }
}

pub(crate) const MANIFEST_PREFIX: &str = "manifest-";
pub(crate) const TAG_MANIFEST_PREFIX: &str = "tagmanifest-";

impl FromStr for Algorithm {
    type Err = String;

    /// Only builtin algorithms can be parsed, custom ones have no hasher to attach
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowercase = s.to_ascii_lowercase();
        Algorithm::BUILTIN
            .into_iter()
            .find(|algorithm| algorithm.name() == lowercase.replace('-', ""))
            .ok_or_else(|| s.to_string())
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::fmt::Debug for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Algorithm({})", self.name())
    }
}

// Identity of an algorithm is its name
impl PartialEq for Algorithm {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for Algorithm {}

impl PartialOrd for Algorithm {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Algorithm {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name().cmp(other.name())
    }
}

impl Hash for Algorithm {
    fn hash<S: std::hash::Hasher>(&self, state: &mut S) {
        self.name().hash(state)
    }
}

#[cfg(test)]
mod test {
    use super::Algorithm;

    #[test]
    fn parse_names() {
        for (input, output) in [
            ("md5", Ok(Algorithm::Md5)),
            ("SHA1", Ok(Algorithm::Sha1)),
            ("sha-256", Ok(Algorithm::Sha256)),
            ("sha512", Ok(Algorithm::Sha512)),
            ("crc32", Err("crc32".to_string())),
        ] {
            assert_eq!(input.parse::<Algorithm>(), output, "failing on `{input}`");
        }
    }

    #[test]
    fn file_names() {
        assert_eq!(Algorithm::Sha1.manifest_file_name(), "manifest-sha1.txt");
        assert_eq!(
            Algorithm::Sha512.tag_manifest_file_name(),
            "tagmanifest-sha512.txt"
        );
        assert_eq!(
            Algorithm::from_file_name("manifest-md5.txt", "manifest-"),
            Some(Ok(Algorithm::Md5))
        );
        assert_eq!(Algorithm::from_file_name("bagit.txt", "manifest-"), None);
        assert_eq!(
            Algorithm::from_file_name("tagmanifest-md5.txt", "manifest-"),
            None
        );
    }

    #[test]
    fn custom_identity_is_name() {
        let blake3 = Algorithm::custom::<blake3::Hasher>("blake3");
        assert_eq!(blake3, Algorithm::custom::<blake3::Hasher>("blake3"));
        assert_ne!(blake3, Algorithm::Sha256);
        assert_eq!(blake3.to_string(), "blake3");
    }
}
