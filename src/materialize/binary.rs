/// Extensions fetched and kept as raw bytes: images, fonts, documents,
/// archives, audio and video.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "avif", // images
    "woff", "woff2", "ttf", "eot", // fonts
    "pdf", "zip", "tar", "gz", // documents and archives
    "mp4", "mov", "avi", "mp3", "wav", // media
];

/// Classify a repository path purely by its extension, case-insensitively.
pub fn is_binary_path(path: &str) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((_, ext)) => BINARY_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext)),
        None => false,
    }
}
