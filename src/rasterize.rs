//! PDF inspection and page rasterization, using Poppler's `pdfinfo` and
//! `pdftocairo` CLI tools.

use std::{collections::BTreeMap, process::Stdio, sync::LazyLock};

use regex::Regex;
use tokio::{io::AsyncWriteExt as _, process::Command};

use crate::{
    command::{check_for_command_failure, is_poppler_error_line},
    config::ImageFormat,
    prelude::*,
};

/// `pdfinfo` reports sizes like `595.276 x 841.89 pts (A4)`.
static PAGE_SIZE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+(?:\.[0-9]+)?)\s*x\s*([0-9]+(?:\.[0-9]+)?)\s*pts")
        .expect("failed to compile regex")
});

/// Size of a PDF page, in points.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

/// What we need to know about a PDF before rasterizing it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PdfInfo {
    pub page_count: usize,
    /// Size of the first page. We assume all pages share it.
    pub page_size: PageSize,
}

/// Settings for rendering a single page.
#[derive(Clone, Debug)]
pub struct RenderOptions<'a> {
    pub format: ImageFormat,
    pub density: u32,
    pub quality: u8,
    pub width: u32,
    pub height: u32,
    pub preserve_aspect_ratio: bool,
    pub output_dir: &'a Path,
    /// File name of the image, without extension.
    pub output_base_name: &'a str,
}

/// Description of an image written by a [`Rasterizer`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RasterizedPage {
    /// 1-based page number.
    pub page: usize,
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub width: u32,
    pub height: u32,
}

/// Turns PDF pages into image files.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Count the pages of a PDF and measure its first page.
    async fn inspect(&self, path: &Path) -> Result<PdfInfo>;

    /// Render one 1-based page of `pdf` to an image file.
    async fn render(
        &self,
        pdf: &[u8],
        page: usize,
        options: &RenderOptions<'_>,
    ) -> Result<RasterizedPage>;
}

/// [`Rasterizer`] backed by `poppler-utils`.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct PopplerRasterizer {}

impl PopplerRasterizer {
    /// Create a rasterizer that runs `pdfinfo` and `pdftocairo` from the `PATH`.
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl Rasterizer for PopplerRasterizer {
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    async fn inspect(&self, path: &Path) -> Result<PdfInfo> {
        let output = Command::new("pdfinfo")
            .arg(path)
            .output()
            .await
            .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
        check_for_command_failure("pdfinfo", &output, None)?;
        let output = String::from_utf8(output.stdout)
            .context("pdfinfo output was not valid UTF-8")?;
        parse_pdfinfo(&output)
            .with_context(|| format!("failed to inspect {:?}", path.display()))
    }

    #[instrument(
        level = "debug",
        skip_all,
        fields(page = page, image = %options.output_base_name)
    )]
    async fn render(
        &self,
        pdf: &[u8],
        page: usize,
        options: &RenderOptions<'_>,
    ) -> Result<RasterizedPage> {
        let out_root = options.output_dir.join(options.output_base_name);
        let mut child = Command::new("pdftocairo")
            .args(pdftocairo_args(page, options))
            .arg("-")
            .arg(&out_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to run pdftocairo")?;

        // pdftocairo reads the whole document before writing anything, so we
        // can feed stdin before collecting output.
        let mut stdin = child
            .stdin
            .take()
            .context("failed to open pdftocairo stdin")?;
        stdin
            .write_all(pdf)
            .await
            .context("failed to send PDF to pdftocairo")?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .context("failed to wait for pdftocairo")?;
        check_for_command_failure("pdftocairo", &output, Some(&is_poppler_error_line))?;

        let path = options.output_dir.join(format!(
            "{}.{}",
            options.output_base_name,
            options.format.extension()
        ));
        describe_image(page, path).await
    }
}

/// Arguments for rendering exactly one page with `pdftocairo`.
fn pdftocairo_args(page: usize, options: &RenderOptions<'_>) -> Vec<String> {
    let mut args = vec![
        format!("-{}", options.format),
        "-r".to_owned(),
        options.density.to_string(),
        "-f".to_owned(),
        page.to_string(),
        "-l".to_owned(),
        page.to_string(),
        "-singlefile".to_owned(),
        "-scale-to-x".to_owned(),
        options.width.to_string(),
        "-scale-to-y".to_owned(),
    ];
    if options.preserve_aspect_ratio {
        args.push("-1".to_owned());
    } else {
        args.push(options.height.to_string());
    }
    if options.format == ImageFormat::Jpeg {
        args.push("-jpegopt".to_owned());
        args.push(format!("quality={}", options.quality));
    }
    args
}

/// Describe an image file that was just written.
async fn describe_image(page: usize, path: PathBuf) -> Result<RasterizedPage> {
    let metadata = tokio::fs::metadata(&path)
        .await
        .with_context(|| format!("rasterizer did not write {:?}", path.display()))?;
    let header_path = path.clone();
    let (width, height) =
        tokio::task::spawn_blocking(move || image::image_dimensions(&header_path))
            .await
            .context("image header task panicked")?
            .with_context(|| format!("failed to read image size of {:?}", path.display()))?;
    let name = path
        .file_name()
        .context("rasterized image has no file name")?
        .to_string_lossy()
        .into_owned();
    Ok(RasterizedPage {
        page,
        name,
        path,
        size_bytes: metadata.len(),
        width,
        height,
    })
}

/// Parse the output of `pdfinfo` into a [`PdfInfo`].
pub fn parse_pdfinfo(output: &str) -> Result<PdfInfo> {
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key, value);
    }

    let page_count = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?
        .parse::<usize>()
        .context("failed to parse page count from pdfinfo output")?;

    let size = properties
        .get("Page size")
        .ok_or_else(|| anyhow!("failed to find page size in pdfinfo output"))?;
    let caps = PAGE_SIZE_REGEX
        .captures(size)
        .ok_or_else(|| anyhow!("unrecognized page size {:?} in pdfinfo output", size))?;
    let page_size = PageSize {
        width: caps[1].parse().context("bad page width")?,
        height: caps[2].parse().context("bad page height")?,
    };

    Ok(PdfInfo {
        page_count,
        page_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    static PDFINFO_OUTPUT: &str = "\
Creator:         Canon iR-ADV C5535
Producer:        Adobe PSL 1.3e for Canon
CreationDate:    Tue Mar  5 09:12:44 2024 CET
Tagged:          no
Encrypted:       no
Pages:           3
Page size:       595.276 x 841.89 pts (A4)
Page rot:        0
File size:       412817 bytes
PDF version:     1.4
";

    fn options(format: ImageFormat, preserve_aspect_ratio: bool) -> RenderOptions<'static> {
        RenderOptions {
            format,
            density: 300,
            quality: 80,
            width: 1786,
            height: 2526,
            preserve_aspect_ratio,
            output_dir: Path::new("/tmp/out"),
            output_base_name: "invoice1.2",
        }
    }

    #[test]
    fn parses_page_count_and_size() {
        let info = parse_pdfinfo(PDFINFO_OUTPUT).unwrap();
        assert_eq!(info.page_count, 3);
        assert_eq!(
            info.page_size,
            PageSize {
                width: 595.276,
                height: 841.89
            }
        );
    }

    #[test]
    fn parses_integer_page_sizes() {
        let info = parse_pdfinfo("Pages: 1\nPage size: 612 x 792 pts (letter)\n").unwrap();
        assert_eq!(info.page_size.width, 612.0);
        assert_eq!(info.page_size.height, 792.0);
    }

    #[test]
    fn missing_page_count_is_an_error() {
        let err = parse_pdfinfo("Page size: 612 x 792 pts\n").unwrap_err();
        assert!(err.to_string().contains("page count"), "got: {err}");
    }

    #[test]
    fn pdftocairo_renders_a_single_page() {
        let args = pdftocairo_args(2, &options(ImageFormat::Png, false));
        assert_eq!(
            args,
            [
                "-png", "-r", "300", "-f", "2", "-l", "2", "-singlefile",
                "-scale-to-x", "1786", "-scale-to-y", "2526",
            ]
        );
    }

    #[test]
    fn pdftocairo_preserves_aspect_ratio_and_jpeg_quality() {
        let args = pdftocairo_args(1, &options(ImageFormat::Jpeg, true));
        assert_eq!(&args[0], "-jpeg");
        let scale_y = args.iter().position(|a| a == "-scale-to-y").unwrap();
        assert_eq!(args[scale_y + 1], "-1");
        assert!(args.ends_with(&["-jpegopt".to_owned(), "quality=80".to_owned()]));
    }
}
