use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::offset_range::OffsetRange;

/// One source container file of a topic, with the offset range parsed from
/// its filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFile {
    pub topic: String,
    pub path: PathBuf,
    pub range: OffsetRange,
}

impl TopicFile {
    /// Build from a source path; fails when the filename does not follow
    /// the `topic+partition+from+to.ext` convention.
    pub fn new(topic: impl Into<String>, path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let range = OffsetRange::parse_filename(&filename)?;
        Ok(Self {
            topic: topic.into(),
            path: path.to_path_buf(),
            range,
        })
    }

    /// Number of offsets covered by this file.
    pub fn size(&self) -> u64 {
        self.range.size()
    }
}

/// Ordered list of source files of one topic with their cumulative offset
/// count. Workers process the largest lists first to shorten tail latency.
#[derive(Debug, Clone, Default)]
pub struct TopicFileList {
    pub files: Vec<TopicFile>,
    pub size: u64,
}

impl TopicFileList {
    pub fn new(files: Vec<TopicFile>) -> Self {
        let size = files.iter().map(TopicFile::size).sum();
        Self { files, size }
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    pub fn num_offsets(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sort files so the largest offset ranges go first.
    pub fn sort_largest_first(&mut self) {
        self.files.sort_by(|a, b| b.size().cmp(&a.size()));
    }
}
