use std::{fmt::Display, str::FromStr};

pub(crate) mod file;

/// Version line of `bagit.txt`
pub const KEY_VERSION: &str = "BagIt-Version";
/// Encoding of the tag files
pub const KEY_ENCODING: &str = "Tag-File-Character-Encoding";
/// Date of the last save, computed
pub const KEY_DATE: &str = "Bagging-Date";
/// `<octets>.<files>` of the payload, computed
pub const KEY_OXUM: &str = "Payload-Oxum";
/// Human readable payload size, computed
pub const KEY_SIZE: &str = "Bag-Size";
/// Creation time of the bag
pub const KEY_CREATED: &str = "Created";
/// `urn:uuid:` of the bag this one is a new version of
pub const KEY_IS_VERSION_OF: &str = "Is-Version-Of";
/// Account of the depositor
pub const KEY_USER_ACCOUNT: &str = "EASY-User-Account";

#[derive(thiserror::Error, Debug, PartialEq)]
/// Invalid `bag-info.txt` content or entry
pub enum MetadataError {
    /// Metadata format must be: "<key>: <value>"
    #[error("Invalid format on line {0}")]
    Format(usize),
    /// Some characters are forbidden for labels
    #[error("Metadata key contains forbidden character `:`")]
    KeyForbiddenCharacter,
    /// Labels and values cannot be empty
    #[error("Metadata key or value is empty")]
    Empty,
    /// Line breaks would corrupt the tag file
    #[error("Metadata value contains a line break")]
    ValueForbiddenCharacter,
    #[error("Failed to parse metadata value for key `{0}`")]
    /// Value of a well-known key has the wrong shape
    ValueParsing(&'static str),
    /// Only UTF-8 and ISO-8859-1 are handled
    #[error("Unsupported encoding `{0}`")]
    Encoding(String),
    /// Text cannot be represented in the encoding of tag files
    #[error("Character `{0}` cannot be written as {1}")]
    Unencodable(char, Encoding),
    /// Bytes are not valid in the encoding of tag files
    #[error("Content is not valid {0}")]
    Undecodable(Encoding),
    #[error("Missing `{0}`")]
    /// Required key is absent
    MissingKey(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Version declared in `bagit.txt`, governs which completeness rules apply
pub struct BagitVersion {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
}

impl BagitVersion {
    /// Version before the RFC, written by older tools
    pub const V0_97: BagitVersion = BagitVersion::new(0, 97);
    /// RFC 8493
    pub const V1_0: BagitVersion = BagitVersion::new(1, 0);

    /// Any `major.minor` pair
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl Default for BagitVersion {
    fn default() -> Self {
        Self::V1_0
    }
}

impl Display for BagitVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for BagitVersion {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or(MetadataError::ValueParsing(KEY_VERSION))?;

        let major = major
            .parse()
            .map_err(|_| MetadataError::ValueParsing(KEY_VERSION))?;
        let minor = minor
            .parse()
            .map_err(|_| MetadataError::ValueParsing(KEY_VERSION))?;

        Ok(Self { major, minor })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Character encoding of every tag file of a bag
pub enum Encoding {
    #[default]
    /// Default for new bags
    Utf8,
    /// ISO-8859-1
    Latin1,
}

impl Encoding {
    /// Name written in `bagit.txt`
    pub fn label(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Latin1 => "ISO-8859-1",
        }
    }

    pub(crate) fn encode(&self, text: &str) -> Result<Vec<u8>, MetadataError> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(c).map_err(|_| MetadataError::Unencodable(c, *self)))
                .collect(),
        }
    }

    pub(crate) fn decode(&self, bytes: Vec<u8>) -> Result<String, MetadataError> {
        match self {
            Encoding::Utf8 => {
                let text = String::from_utf8(bytes).map_err(|_| MetadataError::Undecodable(*self))?;
                // Byte order mark is allowed at the start of tag files
                Ok(match text.strip_prefix('\u{feff}') {
                    Some(stripped) => stripped.to_string(),
                    None => text,
                })
            }
            Encoding::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
        }
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Encoding {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('_', "-").as_str() {
            "UTF-8" | "UTF8" => Ok(Encoding::Utf8),
            "ISO-8859-1" | "LATIN1" => Ok(Encoding::Latin1),
            _ => Err(MetadataError::Encoding(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Payload octet-stream summary: `<bytes>.<files>`
pub struct PayloadOxum {
    /// Count of bytes in all streams
    pub octet_count: u64,
    /// Number of streams (aka files)
    pub stream_count: u64,
}

impl Display for PayloadOxum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.octet_count, self.stream_count)
    }
}

impl FromStr for PayloadOxum {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (octet_count, stream_count) = s
            .split_once('.')
            .ok_or(MetadataError::ValueParsing(KEY_OXUM))?;

        let octet_count = octet_count
            .parse()
            .map_err(|_| MetadataError::ValueParsing(KEY_OXUM))?;
        let stream_count = stream_count
            .parse()
            .map_err(|_| MetadataError::ValueParsing(KEY_OXUM))?;

        Ok(Self {
            octet_count,
            stream_count,
        })
    }
}

/// Human readable size with binary units, e.g. `1.5 MB`
pub fn format_bag_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * KB;
    const GB: f64 = 1024.0 * MB;
    const TB: f64 = 1024.0 * GB;

    let size = bytes as f64;
    let (value, unit) = if size < MB {
        (size / KB, "KB")
    } else if size < GB {
        (size / MB, "MB")
    } else if size < TB {
        (size / GB, "GB")
    } else {
        (size / TB, "TB")
    };

    let rounded = format!("{value:.1}");
    let rounded = rounded.strip_suffix(".0").unwrap_or(&rounded);
    format!("{rounded} {unit}")
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// Ordered `key: value` lines of `bag-info.txt`, a key may repeat
pub struct BagInfo(Vec<(String, String)>);

impl BagInfo {
    /// No entry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping the existing ones for the same key
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), MetadataError> {
        let (key, value) = (key.into(), value.into());
        validate(&key, &value)?;
        self.0.push((key, value));
        Ok(())
    }

    /// Replace every value of `key` with a single one
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), MetadataError> {
        let key = key.into();
        self.remove(&key);
        self.add(key, value)
    }

    /// Remove every value of `key`
    pub fn remove(&mut self, key: &str) {
        self.0.retain(|(existing, _)| existing != key);
    }

    /// Every value of `key`, in file order
    pub fn get<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// First value of `key`
    pub fn first(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// At least one value is set for `key`
    pub fn contains_key(&self, key: &str) -> bool {
        self.first(key).is_some()
    }

    /// Every `(key, value)` pair, in file order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Number of lines, continuation lines excluded
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No entry at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse tag file contents, folding indented continuation lines into the previous value
    pub(crate) fn parse(contents: &str) -> Result<Self, MetadataError> {
        let mut entries: Vec<(String, String)> = Vec::new();

        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            if line.starts_with(char::is_whitespace) {
                let (_, value) = entries.last_mut().ok_or(MetadataError::Format(number + 1))?;
                value.push(' ');
                value.push_str(line.trim());
                continue;
            }

            let (key, value) = line
                .split_once(':')
                .ok_or(MetadataError::Format(number + 1))?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() {
                return Err(MetadataError::Format(number + 1));
            }

            entries.push((key.to_string(), value.to_string()));
        }

        Ok(Self(entries))
    }

    pub(crate) fn render(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| format!("{key}: {value}\n"))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BagInfo {
    /// Invalid entries are the caller's responsibility, see [`BagInfo::add()`] for checked insertion
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

fn validate(key: &str, value: &str) -> Result<(), MetadataError> {
    if key.trim().is_empty() || value.trim().is_empty() {
        return Err(MetadataError::Empty);
    }

    if key.contains(':') || key.contains(['\n', '\r']) {
        return Err(MetadataError::KeyForbiddenCharacter);
    }

    if value.contains(['\n', '\r']) {
        return Err(MetadataError::ValueForbiddenCharacter);
    }

    Ok(())
}
