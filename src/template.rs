//! Directory layouts described segment by segment.
//!
//! A [`PathTemplate`] is both a glob to enumerate files and the knowledge of which
//! directory level carries the label, so labels are read from path components instead
//! of splitting strings on a separator.
use crate::{DatasetError, Result};
use glob::Pattern;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
    Label,
}

/// A relative path where some levels are wildcards and at most one is the label.
///
/// ```
/// use dataset_collection::PathTemplate;
/// use std::path::Path;
///
/// // train/<label>/images/<file>
/// let template = PathTemplate::new()
///     .literal("train")
///     .label()
///     .literal("images")
///     .any();
/// let root = Path::new("/data");
/// let file = root.join("train/n01443537/images/n01443537_0.JPEG");
/// assert_eq!(template.label_of(root, &file).as_deref(), Some("n01443537"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// An empty template, matching the root itself.
    pub fn new() -> Self {
        Self::default()
    }

    /// A level with a fixed name.
    pub fn literal(mut self, name: impl Into<String>) -> Self {
        self.segments.push(Segment::Literal(name.into()));
        self
    }

    /// A level matching any name.
    pub fn any(mut self) -> Self {
        self.segments.push(Segment::Any);
        self
    }

    /// A level matching any name, which is the label. Replaces a previous label level.
    pub fn label(mut self) -> Self {
        for segment in self.segments.iter_mut() {
            if *segment == Segment::Label {
                *segment = Segment::Any;
            }
        }
        self.segments.push(Segment::Label);
        self
    }

    /// Glob pattern for this template below `root`.
    pub fn pattern(&self, root: &Path) -> String {
        let mut pattern = PathBuf::from(Pattern::escape(&root.to_string_lossy()));
        for segment in &self.segments {
            match segment {
                Segment::Literal(name) => pattern.push(Pattern::escape(name)),
                Segment::Any | Segment::Label => pattern.push("*"),
            }
        }
        pattern.to_string_lossy().into_owned()
    }

    /// Every regular file below `root` matching the template, in glob order.
    pub fn files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in glob::glob(&self.pattern(root))? {
            let path = entry.map_err(|err| DatasetError::Filesystem {
                path: err.path().to_path_buf(),
                source: err.into_error(),
            })?;
            if path.is_file() {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// The label level of `path`, which must lie below `root`.
    pub fn label_of(&self, root: &Path, path: &Path) -> Option<String> {
        let index = self.segments.iter().position(|s| *s == Segment::Label)?;
        let relative = path.strip_prefix(root).ok()?;
        let mut levels = relative.components().filter_map(|c| match c {
            Component::Normal(name) => Some(name),
            _ => None,
        });
        levels.nth(index)?.to_str().map(str::to_string)
    }
}

/// `path` as a string with forward slashes.
pub fn to_uri(path: &Path) -> String {
    let uri = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        uri.into_owned()
    } else {
        uri.replace(std::path::MAIN_SEPARATOR, "/")
    }
}
