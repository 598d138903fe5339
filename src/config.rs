//! Run configuration.
//!
//! Everything a run needs to know lives in [`Config`], which is parsed once at
//! startup from command-line flags, falling back to environment variables
//! (and therefore to `.env`). Stages receive it by reference.

use std::fmt;

use clap::{Args, ValueEnum};

use crate::prelude::*;

/// Image format written by the rasterizer.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    #[value(alias = "jpg")]
    Jpeg,
    #[value(alias = "tif")]
    Tiff,
}

impl ImageFormat {
    /// The file extension `pdftocairo` gives files in this format.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Tiff => "tif",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Png => write!(f, "png"),
            ImageFormat::Jpeg => write!(f, "jpeg"),
            ImageFormat::Tiff => write!(f, "tiff"),
        }
    }
}

/// Settings shared by every stage of a run.
#[derive(Args, Clone, Debug)]
pub struct Config {
    /// Directory containing the source PDFs.
    #[clap(long, env = "INPUT_DIR", default_value = "./input")]
    pub input_dir: PathBuf,

    /// Directory for page images and OCR output.
    #[clap(long, env = "OUTPUT_DIR", default_value = "./output")]
    pub output_dir: PathBuf,

    /// Image format for rasterized pages.
    #[clap(
        long = "format",
        env = "TESSERACT_FORMAT",
        value_enum,
        default_value_t = ImageFormat::Png
    )]
    pub image_format: ImageFormat,

    /// Rasterization density, in DPI.
    #[clap(long, env = "TESSERACT_DENSITY", default_value = "300")]
    pub density: u32,

    /// Image quality (1-100). Only affects JPEG output.
    #[clap(
        long,
        env = "TESSERACT_QUALITY",
        default_value = "100",
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    pub quality: u8,

    /// Tesseract language code(s), e.g. `deu` or `deu+eng`.
    #[clap(long, env = "TESSERACT_LANGUAGE", default_value = "deu")]
    pub language: String,

    /// Base URL of the completion server. We POST to `{base_url}/completion`.
    #[clap(long, env = "BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Timeout, in seconds, for the extraction request. Defaults to no
    /// timeout beyond the HTTP client's own.
    #[clap(long, env = "EXTRACTION_TIMEOUT")]
    pub extraction_timeout: Option<u64>,

    /// JSON file holding the analytics history. It must already exist and
    /// contain at least `{"records": []}`.
    #[clap(long, env = "ANALYTICS_FILE", default_value = "./analytics.json")]
    pub analytics_file: PathBuf,
}

impl Config {
    /// Path of the source PDF for a document.
    pub fn document_path(&self, name: &str) -> PathBuf {
        self.input_dir.join(format!("{name}.pdf"))
    }

    /// Path of the rasterized image for a 1-based page of a document.
    pub fn page_image_path(&self, name: &str, page: usize) -> PathBuf {
        self.output_dir.join(format!(
            "{}.{}",
            page_image_base_name(name, page),
            self.image_format.extension()
        ))
    }

    /// Path of the concatenated OCR text for a document.
    pub fn text_output_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{name}.ocr-recognition.txt"))
    }

    /// Path of the concatenated hOCR markup for a document.
    pub fn markup_output_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{name}.ocr-recognition.hocr"))
    }
}

/// File name of a page image, without its extension.
pub fn page_image_base_name(name: &str, page: usize) -> String {
    format!("{name}.{page}")
}

#[cfg(test)]
pub(crate) fn test_config(root: &Path) -> Config {
    Config {
        input_dir: root.join("input"),
        output_dir: root.join("output"),
        image_format: ImageFormat::Png,
        density: 300,
        quality: 100,
        language: "deu".to_owned(),
        base_url: "http://127.0.0.1:9".to_owned(),
        extraction_timeout: Some(5),
        analytics_file: root.join("analytics.json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_images_are_named_by_document_and_page() {
        let config = test_config(Path::new("/data"));
        assert_eq!(
            config.page_image_path("invoice1", 3),
            Path::new("/data/output/invoice1.3.png")
        );
    }

    #[test]
    fn page_image_names_survive_dotted_document_names() {
        let mut config = test_config(Path::new("/data"));
        config.image_format = ImageFormat::Jpeg;
        assert_eq!(
            config.page_image_path("acme.2024-01", 1),
            Path::new("/data/output/acme.2024-01.1.jpg")
        );
    }

    #[test]
    fn ocr_outputs_live_in_output_dir() {
        let config = test_config(Path::new("/data"));
        assert_eq!(
            config.text_output_path("invoice1"),
            Path::new("/data/output/invoice1.ocr-recognition.txt")
        );
        assert_eq!(
            config.markup_output_path("invoice1"),
            Path::new("/data/output/invoice1.ocr-recognition.hocr")
        );
        assert_eq!(
            config.document_path("invoice1"),
            Path::new("/data/input/invoice1.pdf")
        );
    }
}
