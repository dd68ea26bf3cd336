use std::fmt;

use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// File name of the progress log inside every job output directory.
pub const PROGRESS_FILE_NAME: &str = "progress.txt";

/// Short identifier of a command, unique within its job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(String);

impl CommandId {
    const LEN: usize = 6;

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(Self::LEN);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mirror axis. `X` mirrors left-right, `Y` mirrors top-bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flip {
    #[serde(alias = "x")]
    X,
    #[serde(alias = "y")]
    Y,
}

/// Orientation change applied before cropping and resizing.
///
/// When both are present the flip is applied first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    #[serde(default, alias = "rotateDegrees", skip_serializing_if = "Option::is_none")]
    pub rotate: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flip: Option<Flip>,
}

impl Transform {
    pub fn is_identity(&self) -> bool {
        self.flip.is_none() && self.rotate.map_or(true, |deg| deg == 0.0)
    }
}

/// Rectangle to extract from the (transformed) source, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CropRegion {
    #[garde(skip)]
    pub top: u32,

    #[garde(skip)]
    pub left: u32,

    #[garde(range(min = 1))]
    pub width: u32,

    #[garde(range(min = 1))]
    pub height: u32,
}

/// One requested output of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Command {
    #[serde(rename = "filename", alias = "targetFilename")]
    #[garde(length(min = 1, max = 255), custom(plain_file_name))]
    pub target_filename: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1, max = 16384))]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1, max = 16384))]
    pub height: Option<u32>,

    #[serde(default, rename = "crop", alias = "cropRegion", skip_serializing_if = "Option::is_none")]
    #[garde(dive)]
    pub crop: Option<CropRegion>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub transform: Option<Transform>,
}

impl Command {
    /// A command that only re-encodes the source under a new name.
    pub fn new(target_filename: impl Into<String>) -> Self {
        Self {
            target_filename: target_filename.into(),
            width: None,
            height: None,
            crop: None,
            transform: None,
        }
    }

    pub fn with_size(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_crop(mut self, crop: CropRegion) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// Target names must stay inside the job's output directory.
fn plain_file_name(value: &str, _context: &()) -> garde::Result {
    if value.contains(['/', '\\']) {
        return Err(garde::Error::new("must not contain path separators"));
    }
    if value == "." || value == ".." {
        return Err(garde::Error::new("must name a file"));
    }
    if value == PROGRESS_FILE_NAME {
        return Err(garde::Error::new("is reserved for the progress log"));
    }
    Ok(())
}
