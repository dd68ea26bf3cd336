//! Source images for integration tests, generated on the fly

use std::path::{Path, PathBuf};

use image::{ImageFormat, Rgb, RgbImage};

/// A source image written into a test's temporary directory.
#[derive(Debug, Clone)]
pub struct TestImageFixture {
    pub filename: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub description: &'static str,
}

pub const TEST_FIXTURES: &[TestImageFixture] = &[
    TestImageFixture {
        filename: "img1.jpeg",
        width: 600,
        height: 900,
        format: ImageFormat::Jpeg,
        description: "Portrait JPEG, 2:3",
    },
    TestImageFixture {
        filename: "wide.png",
        width: 320,
        height: 180,
        format: ImageFormat::Png,
        description: "Landscape PNG, 16:9",
    },
];

pub fn portrait_jpeg() -> &'static TestImageFixture {
    &TEST_FIXTURES[0]
}

pub fn landscape_png() -> &'static TestImageFixture {
    &TEST_FIXTURES[1]
}

/// Write `fixture` into `dir` as a colour gradient and return its path.
pub fn write_fixture(dir: &Path, fixture: &TestImageFixture) -> PathBuf {
    let image = RgbImage::from_fn(fixture.width, fixture.height, |x, y| {
        Rgb([
            (x * 255 / fixture.width.max(1)) as u8,
            (y * 255 / fixture.height.max(1)) as u8,
            128,
        ])
    });
    let path = dir.join(fixture.filename);
    image
        .save_with_format(&path, fixture.format)
        .unwrap_or_else(|e| panic!("failed to write fixture {}: {e}", fixture.filename));
    path
}
