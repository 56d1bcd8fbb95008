//! Getting sack images into memory: source collection for the CLI and decoding of
//! raw or base64 payloads for service callers.

use anyhow::{Context, Result};
use base64::Engine;
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};

use crate::color_utils::symbols;
use crate::error::{DetectorError, DetectorResult};

/// Configuration for image collection behavior
#[derive(Debug, Clone)]
pub struct ImageInputConfig {
    pub require_glob_matches: bool,
    pub strict_mode: bool,
}

impl Default for ImageInputConfig {
    fn default() -> Self {
        Self::strict()
    }
}

impl ImageInputConfig {
    pub fn strict() -> Self {
        Self {
            strict_mode: true,
            require_glob_matches: true,
        }
    }

    pub fn permissive() -> Self {
        Self {
            strict_mode: false,
            require_glob_matches: false,
        }
    }

    pub fn from_strict_flag(strict: bool) -> Self {
        if strict {
            Self::strict()
        } else {
            Self::permissive()
        }
    }
}

/// Supports: jpg, jpeg, png, webp, bmp, tiff, tif
pub fn is_supported_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| {
            matches!(
                ext.as_str(),
                "jpg" | "jpeg" | "png" | "webp" | "bmp" | "tiff" | "tif"
            )
        })
}

/// Find all image files in a directory (non-recursive), sorted
pub fn find_images_in_directory(dir_path: &Path) -> Result<Vec<PathBuf>> {
    let mut image_files = Vec::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read directory {}", dir_path.display()))?
    {
        let path = entry?.path();
        if path.is_file() && is_supported_image_file(&path) {
            image_files.push(path);
        }
    }

    image_files.sort();
    Ok(image_files)
}

fn looks_like_glob(source: &str) -> bool {
    source.contains('*') || source.contains('?') || source.contains('[')
}

/// Collect image files from files, directories, or glob patterns.
///
/// Strict mode fails on unsupported or missing inputs; permissive mode warns and skips them.
pub fn collect_images_from_sources(
    sources: &[String],
    config: &ImageInputConfig,
) -> Result<Vec<PathBuf>> {
    let mut all_image_files = Vec::new();

    for source in sources {
        let source_path = Path::new(source);

        if source_path.is_file() {
            if is_supported_image_file(source_path) {
                all_image_files.push(source_path.to_path_buf());
            } else if config.strict_mode {
                anyhow::bail!(
                    "File is not a supported image format: {}",
                    source_path.display()
                );
            } else {
                log::warn!(
                    "{}Skipping unsupported file: {}",
                    symbols::warning(),
                    source_path.display()
                );
            }
        } else if source_path.is_dir() {
            all_image_files.extend(find_images_in_directory(source_path)?);
        } else if !looks_like_glob(source) {
            if config.strict_mode {
                anyhow::bail!("File does not exist: {source}");
            }
            log::warn!("{}File does not exist: {source}", symbols::warning());
        } else {
            match glob::glob(source) {
                Ok(paths) => {
                    let mut found_any = false;
                    for path_result in paths {
                        match path_result {
                            Ok(path) if path.is_file() && is_supported_image_file(&path) => {
                                all_image_files.push(path);
                                found_any = true;
                            }
                            Ok(_) => {}
                            Err(e) => log::warn!(
                                "{}Error reading path in glob {source}: {e}",
                                symbols::warning()
                            ),
                        }
                    }
                    if !found_any && config.require_glob_matches {
                        anyhow::bail!("No image files found matching pattern: {source}");
                    }
                }
                Err(_) if config.strict_mode => {
                    anyhow::bail!(
                        "Source path does not exist and is not a valid glob pattern: {source}"
                    );
                }
                Err(_) => log::warn!("{}Source path does not exist: {source}", symbols::warning()),
            }
        }
    }

    all_image_files.sort();
    all_image_files.dedup();

    if all_image_files.is_empty() && config.strict_mode {
        anyhow::bail!("No image files found in the specified sources");
    }

    Ok(all_image_files)
}

/// Decode an encoded image (PNG, JPEG, ...) into 8-bit RGB.
///
/// Alpha is dropped and grayscale is expanded to three channels.
pub fn decode_image_bytes(bytes: &[u8]) -> DetectorResult<RgbImage> {
    if bytes.is_empty() {
        return Err(DetectorError::InvalidImage("empty image payload".to_string()));
    }

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| DetectorError::InvalidImage(format!("cannot decode image: {e}")))?;
    Ok(decoded.to_rgb8())
}

/// Decode a base64 image payload, with or without a `data:<mime>;base64,` prefix.
pub fn decode_base64_image(payload: &str) -> DetectorResult<RgbImage> {
    let trimmed = payload.trim();
    let encoded = match trimmed.split_once(',') {
        Some((header, rest)) if header.starts_with("data:") => rest,
        _ => trimmed,
    };
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();

    if compact.is_empty() {
        return Err(DetectorError::InvalidImage("empty base64 payload".to_string()));
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| DetectorError::InvalidImage(format!("invalid base64: {e}")))?;
    decode_image_bytes(&bytes)
}

/// Read and decode an image file from disk.
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    decode_image_bytes(&bytes).with_context(|| format!("Failed to decode {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;
    use tempfile::tempdir;

    fn png_bytes(img: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_is_supported_image_file() {
        assert!(is_supported_image_file(Path::new("karung.jpg")));
        assert!(is_supported_image_file(Path::new("karung.jpeg")));
        assert!(is_supported_image_file(Path::new("karung.png")));
        assert!(is_supported_image_file(Path::new("karung.webp")));
        assert!(is_supported_image_file(Path::new("karung.bmp")));
        assert!(is_supported_image_file(Path::new("karung.tif")));
        assert!(is_supported_image_file(Path::new("KARUNG.JPG")));

        assert!(!is_supported_image_file(Path::new("karung.txt")));
        assert!(!is_supported_image_file(Path::new("karung.gif")));
        assert!(!is_supported_image_file(Path::new("karung")));
    }

    #[test]
    fn test_collect_images_strict_and_permissive() {
        let temp_dir = tempdir().unwrap();
        let image_path = temp_dir.path().join("sack.jpg");
        let text_path = temp_dir.path().join("notes.txt");
        fs::write(&image_path, b"fake image").unwrap();
        fs::write(&text_path, b"text file").unwrap();

        let image_src = image_path.to_string_lossy().to_string();
        let text_src = text_path.to_string_lossy().to_string();
        let missing_src = temp_dir.path().join("gone.png").to_string_lossy().to_string();

        let strict = ImageInputConfig::strict();
        assert_eq!(
            collect_images_from_sources(&[image_src.clone()], &strict).unwrap(),
            vec![image_path.clone()]
        );
        assert!(collect_images_from_sources(&[text_src.clone()], &strict).is_err());
        assert!(collect_images_from_sources(&[missing_src.clone()], &strict).is_err());

        let permissive = ImageInputConfig::permissive();
        let found =
            collect_images_from_sources(&[image_src, text_src, missing_src], &permissive).unwrap();
        assert_eq!(found, vec![image_path]);
    }

    #[test]
    fn test_collect_images_directory_and_glob() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("b.png"), b"fake").unwrap();
        fs::write(temp_dir.path().join("a.jpg"), b"fake").unwrap();
        fs::write(temp_dir.path().join("c.txt"), b"text").unwrap();

        let dir_src = temp_dir.path().to_string_lossy().to_string();
        let found =
            collect_images_from_sources(&[dir_src.clone()], &ImageInputConfig::default()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.png"]);

        let glob_src = format!("{dir_src}/*.png");
        let found =
            collect_images_from_sources(&[glob_src, dir_src], &ImageInputConfig::default())
                .unwrap();
        assert_eq!(found.len(), 2, "duplicates are removed");

        let empty_glob = temp_dir.path().join("*.bmp").to_string_lossy().to_string();
        assert!(collect_images_from_sources(&[empty_glob], &ImageInputConfig::strict()).is_err());
    }

    #[test]
    fn test_decode_image_bytes() {
        let img = RgbImage::from_pixel(5, 3, Rgb([200, 30, 40]));
        let decoded = decode_image_bytes(&png_bytes(&img)).unwrap();
        assert_eq!(decoded, img);

        assert!(matches!(
            decode_image_bytes(&[]),
            Err(DetectorError::InvalidImage(_))
        ));
        assert!(matches!(
            decode_image_bytes(b"not an image at all"),
            Err(DetectorError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_decode_drops_alpha() {
        let rgba = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 0]));
        let mut buf = Cursor::new(Vec::new());
        rgba.write_to(&mut buf, ImageFormat::Png).unwrap();

        let decoded = decode_image_bytes(&buf.into_inner()).unwrap();
        assert_eq!(decoded.get_pixel(1, 1), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_base64_image_with_and_without_prefix() {
        let img = RgbImage::from_pixel(4, 4, Rgb([0, 160, 20]));
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes(&img));

        assert_eq!(decode_base64_image(&encoded).unwrap(), img);

        let data_url = format!("data:image/png;base64,{encoded}");
        assert_eq!(decode_base64_image(&data_url).unwrap(), img);

        let wrapped = format!("{}\n{}\n", &encoded[..10], &encoded[10..]);
        assert_eq!(decode_base64_image(&wrapped).unwrap(), img);
    }

    #[test]
    fn test_decode_base64_rejects_garbage() {
        assert!(matches!(
            decode_base64_image(""),
            Err(DetectorError::InvalidImage(_))
        ));
        assert!(matches!(
            decode_base64_image("data:image/png;base64,"),
            Err(DetectorError::InvalidImage(_))
        ));
        assert!(matches!(
            decode_base64_image("%%% not base64 %%%"),
            Err(DetectorError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_load_image_reports_path() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("broken.png");
        fs::write(&path, b"garbage").unwrap();

        let err = load_image(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.png"));
    }
}
