//! MOTChallenge `seqinfo.ini` files.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::{Error, Result};

/// Metadata of one sequence, written as `seqinfo.ini`:
///
/// ```ini
/// [Sequence]
/// name=ncaa_dataset-01
/// imDir=img1
/// frameRate=30
/// seqLength=600
/// imWidth=1920
/// imHeight=1080
/// imExt=.jpg
/// source=game_1/anno
/// ```
///
/// `source` is the key of the folder the sequence was built from. MOT tools
/// ignore keys they do not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceInfo {
    pub name: String,
    pub im_dir: String,
    pub frame_rate: u32,
    pub seq_length: usize,
    /// `(width, height)` of the frames, when known.
    pub image_size: Option<(u32, u32)>,
    /// Frame extension including the dot, when known.
    pub im_ext: Option<String>,
    pub source: Option<String>,
}

impl SequenceInfo {
    pub fn to_ini(&self) -> String {
        let mut text = String::from("[Sequence]\n");
        text.push_str(&format!("name={}\n", self.name));
        text.push_str(&format!("imDir={}\n", self.im_dir));
        text.push_str(&format!("frameRate={}\n", self.frame_rate));
        text.push_str(&format!("seqLength={}\n", self.seq_length));
        if let Some((width, height)) = self.image_size {
            text.push_str(&format!("imWidth={}\n", width));
            text.push_str(&format!("imHeight={}\n", height));
        }
        if let Some(ext) = &self.im_ext {
            text.push_str(&format!("imExt={}\n", ext));
        }
        if let Some(source) = &self.source {
            text.push_str(&format!("source={}\n", source));
        }
        text
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_ini())?;
        Ok(())
    }

    /// Read a `seqinfo.ini` file.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::IoError(std::io::Error::new(
                e.kind(),
                format!("failed to open sequence info '{}': {}", path.display(), e),
            ))
        })?;
        Self::parse(&text).map_err(|e| Error::Mot(format!("{}: {}", path.display(), e)))
    }

    /// Parse `key=value` lines. Section headers, comments and unknown keys
    /// are ignored; `name`, `imDir`, `frameRate` and `seqLength` are required.
    pub fn parse(text: &str) -> Result<Self> {
        let entries: HashMap<&str, &str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('[') && !line.starts_with(';') && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim(), value.trim()))
            .collect();

        let required = |key: &str| {
            entries
                .get(key)
                .copied()
                .ok_or_else(|| Error::Mot(format!("missing '{}'", key)))
        };
        let optional_number = |key: &str| -> Result<Option<u32>> {
            entries.get(key).map(|value| number(key, value)).transpose()
        };

        let image_size = optional_number("imWidth")?.zip(optional_number("imHeight")?);
        Ok(Self {
            name: required("name")?.to_string(),
            im_dir: required("imDir")?.to_string(),
            frame_rate: number("frameRate", required("frameRate")?)?,
            seq_length: number("seqLength", required("seqLength")?)?,
            image_size,
            im_ext: entries.get("imExt").map(|s| s.to_string()),
            source: entries.get("source").map(|s| s.to_string()),
        })
    }
}

fn number<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Mot(format!("'{}' is not an integer: {}", key, e)))
}
