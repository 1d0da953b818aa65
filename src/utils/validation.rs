use std::path::Path;

/// Name used when the client sends nothing usable
pub const FALLBACK_FILENAME: &str = "document.pdf";

/// Upper bound on the sanitized name, leaving room for the staging prefix
const MAX_SANITIZED_LEN: usize = 200;

/// Sanitizes an uploaded filename for use on disk.
///
/// Keeps ASCII alphanumerics, `.` and `-`. Every other character becomes `_`,
/// runs of `_` or `.` collapse to a single character, and leading or trailing
/// separators are trimmed so the result can never be hidden or traverse paths.
pub fn sanitize_filename(filename: &str) -> String {
    // Browsers on Windows may still send full paths
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if name.contains("..") {
        tracing::warn!("Suspicious filename received: {}", filename);
    }

    let mut sanitized = String::with_capacity(name.len());
    for c in name.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            c
        } else {
            '_'
        };

        if (mapped == '_' || mapped == '.') && sanitized.ends_with(mapped) {
            continue;
        }
        sanitized.push(mapped);
    }

    let trimmed = sanitized.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        return FALLBACK_FILENAME.to_string();
    }

    // ASCII only at this point, byte slicing is safe
    trimmed[..trimmed.len().min(MAX_SANITIZED_LEN)].to_string()
}

/// Returns true when the declared content type is `application/pdf`
pub fn is_pdf_content_type(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .parse::<mime::Mime>()
        .map(|m| m.essence_str() == mime::APPLICATION_PDF.essence_str())
        .unwrap_or(false)
}
