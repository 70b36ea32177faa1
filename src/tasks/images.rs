use std::fs::{self, File};
use std::io::{BufReader, Cursor};

use camino::{Utf8Path, Utf8PathBuf};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageEncoder, ImageReader};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::core::Hash32;
use crate::error::{ImageError, TaskError};
use crate::namespace::Claim;
use crate::task::{Report, Task, TaskContext, expand_globs, glob_in, write_output};

const OUT_DIR: &str = "img";
const CACHE_DIR: &str = "img";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Png,
    Jpeg(u8),
}

impl Codec {
    fn for_path(path: &Utf8Path, quality: u8) -> Option<Self> {
        match path.extension()?.to_ascii_lowercase().as_str() {
            "png" => Some(Codec::Png),
            "jpg" | "jpeg" => Some(Codec::Jpeg(quality)),
            _ => None,
        }
    }

    /// Part of the cache key, so changing the settings invalidates old entries.
    fn settings(&self) -> String {
        match self {
            Codec::Png => "png-best-adaptive".to_string(),
            Codec::Jpeg(q) => format!("jpeg-q{q}"),
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            Codec::Png => "png",
            Codec::Jpeg(_) => "jpg",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageMetadata {
    width: u32,
    height: u32,
    original: u64,
    optimized: u64,
}

/// Losslessly recompresses PNGs and re-encodes JPEGs.
pub struct Images {
    root: Utf8PathBuf,
    dist: Utf8PathBuf,
    cache: Utf8PathBuf,
    quality: u8,
}

impl Images {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.paths.images.clone(),
            dist: config.paths.dist.join(OUT_DIR),
            cache: config.paths.cache.join(CACHE_DIR),
            quality: config.tools.jpeg_quality.clamp(1, 100),
        }
    }

    fn patterns(&self) -> Vec<String> {
        ["*.png", "*.jpg", "*.jpeg"]
            .iter()
            .map(|pattern| glob_in(&self.root, pattern))
            .collect()
    }

    fn optimize(&self, path: &Utf8Path) -> Result<Utf8PathBuf, TaskError> {
        let codec = match Codec::for_path(path, self.quality) {
            Some(codec) => codec,
            None => return Err(std::io::Error::other(format!("unsupported image {path}")).into()),
        };

        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let out = self.dist.join(relative);

        let source = fs::read(path)?;
        let settings = codec.settings();
        let hash = Hash32::hash_parts([source.as_slice(), settings.as_bytes()]).to_hex();

        let path_cache = self.cache.join(format!("{hash}.{}", codec.extension()));
        let path_meta = self.cache.join(format!("{hash}.meta.cbor"));

        if path_cache.exists() && path_meta.exists() {
            tracing::debug!("{path} cached");
        } else {
            let (data, meta) = encode(path, &source, codec)?;

            write_output(&path_cache, &data)?;

            let meta_file = File::create(&path_meta)?;
            ciborium::into_writer(&meta, meta_file)
                .map_err(|e| ImageError::Metadata(e.to_string()))?;

            tracing::debug!(
                "{path}: {} -> {} bytes ({}x{})",
                meta.original,
                meta.optimized,
                meta.width,
                meta.height
            );
        }

        if let Some(dir) = out.parent() {
            fs::create_dir_all(dir)?;
        }

        if out.exists() {
            fs::remove_file(&out)?;
        }

        // hard link with fallback to copy
        if fs::hard_link(&path_cache, &out).is_err() {
            fs::copy(&path_cache, &out)?;
        }

        Ok(out)
    }
}

impl Task for Images {
    fn name(&self) -> &str {
        "images"
    }

    fn run(&self, ctx: &TaskContext<'_>) -> Result<Report, TaskError> {
        let sources = expand_globs(&self.patterns())?;

        ctx.set_message(&format!("Optimizing {} images", sources.len()));

        let results: Vec<_> = sources.par_iter().map(|path| self.optimize(path)).collect();

        let mut report = Report::new();
        for result in results {
            report.push(result?);
        }

        Ok(report)
    }

    fn watched(&self) -> Vec<String> {
        self.patterns()
    }

    fn claims(&self) -> Vec<Claim> {
        vec![Claim::Flat(OUT_DIR.into())]
    }
}

/// Re-encodes `source`, falling back to the original bytes when that doesn't
/// make the file any smaller.
fn encode(
    path: &Utf8Path,
    source: &[u8],
    codec: Codec,
) -> Result<(Vec<u8>, ImageMetadata), ImageError> {
    let image_error = |e| ImageError::Image(path.to_owned(), e);

    let img = ImageReader::new(BufReader::new(Cursor::new(source)))
        .with_guessed_format()?
        .decode()
        .map_err(image_error)?;

    let width = img.width();
    let height = img.height();
    let mut data = Vec::with_capacity(source.len());

    match codec {
        Codec::Png => {
            let color = img.color();
            PngEncoder::new_with_quality(&mut data, CompressionType::Best, FilterType::Adaptive)
                .write_image(img.as_bytes(), width, height, color.into())
                .map_err(image_error)?;
        }
        Codec::Jpeg(quality) => {
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut data, quality)
                .write_image(rgb.as_raw(), width, height, image::ExtendedColorType::Rgb8)
                .map_err(image_error)?;
        }
    }

    if data.len() >= source.len() {
        data = source.to_vec();
    }

    let meta = ImageMetadata {
        width,
        height,
        original: source.len() as u64,
        optimized: data.len() as u64,
    };

    Ok((data, meta))
}
