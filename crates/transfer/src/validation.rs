use std::path::{Component, Path};

use crate::TransferError;

/// Validates a file name offered by a peer.
///
/// The name is joined onto the download directory, so it must be exactly
/// one normal path component. Rejects:
/// - Empty names and `.`
/// - Absolute paths and Windows prefixes (`C:`, `\\server`)
/// - Parent directory traversal (`..`)
/// - Any separator, including `\` on platforms that do not treat it as one
/// - Embedded NUL bytes
pub fn validate_file_name(file_name: &str) -> Result<(), TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidPath("empty file name".into()));
    }
    if file_name.contains(['/', '\\', '\0']) {
        return Err(TransferError::InvalidPath(format!(
            "file name must not contain separators: {file_name}"
        )));
    }

    let path = Path::new(file_name);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_name}"
        )));
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::ParentDir), _) => Err(TransferError::InvalidPath(format!(
            "parent directory traversal not allowed: {file_name}"
        ))),
        (Some(Component::Prefix(_)), _) => Err(TransferError::InvalidPath(format!(
            "path prefix not allowed: {file_name}"
        ))),
        _ => Err(TransferError::InvalidPath(format!(
            "not a plain file name: {file_name}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        assert!(validate_file_name("").is_err());
    }

    #[test]
    fn rejects_parent_dir() {
        assert!(validate_file_name("..").is_err());
    }

    #[test]
    fn rejects_current_dir() {
        assert!(validate_file_name(".").is_err());
    }

    #[test]
    fn rejects_traversal_with_separators() {
        assert!(validate_file_name("../../../etc/passwd").is_err());
        assert!(validate_file_name("..\\evil.exe").is_err());
    }

    #[test]
    fn rejects_absolute_path() {
        assert!(validate_file_name("/tmp/malicious").is_err());
    }

    #[test]
    fn rejects_subdirectories() {
        assert!(validate_file_name("sub/file.txt").is_err());
    }

    #[test]
    fn rejects_nul() {
        assert!(validate_file_name("a\0b").is_err());
    }

    #[test]
    fn accepts_plain_names() {
        assert!(validate_file_name("a.bin").is_ok());
        assert!(validate_file_name(".hidden").is_ok());
        assert!(validate_file_name("report final (2).pdf").is_ok());
    }

    #[test]
    fn error_is_invalid_path() {
        assert!(matches!(
            validate_file_name("../x"),
            Err(TransferError::InvalidPath(_))
        ));
    }
}
