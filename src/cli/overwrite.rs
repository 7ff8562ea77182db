//! Destination checks before a download starts

use std::io::Write;
use std::path::Path;

use reelvault::{Error, OverwriteBehavior, Result};

/// Check whether a download may write to `path`.
///
/// Returns the offset to start from: `0` for a fresh download, the current
/// file length when resuming.
pub fn check_overwrite_permission(path: &Path, behavior: OverwriteBehavior) -> Result<u64> {
    let existing = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(Error::IoError(e)),
    };
    let display = path.display();

    match behavior {
        OverwriteBehavior::Resume => {
            eprintln!("↪️  Resuming {display} from {existing} bytes");
            Ok(existing)
        }
        OverwriteBehavior::Force => {
            eprintln!("⚠️  Overwriting existing file: {display}");
            Ok(0)
        }
        OverwriteBehavior::NeverOverwrite => Err(Error::IoError(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("File already exists: {display} (use --force to overwrite or --continue to resume)"),
        ))),
        OverwriteBehavior::Prompt => {
            eprintln!("⚠️  File already exists: {display} ({existing} bytes)");
            eprint!("Overwrite? [y/N/c(ontinue)]: ");
            std::io::stderr().flush().map_err(Error::IoError)?;

            let mut input = String::new();
            std::io::stdin().read_line(&mut input).map_err(Error::IoError)?;

            match input.trim().to_lowercase().as_str() {
                "y" | "yes" => {
                    eprintln!("✅ Overwriting file");
                    Ok(0)
                }
                "c" | "continue" => {
                    eprintln!("↪️  Resuming from {existing} bytes");
                    Ok(existing)
                }
                _ => {
                    eprintln!("❌ Download cancelled");
                    Err(Error::IoError(std::io::Error::new(
                        std::io::ErrorKind::Interrupted,
                        "Download cancelled by user",
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.mp4");
        for behavior in [
            OverwriteBehavior::Force,
            OverwriteBehavior::NeverOverwrite,
            OverwriteBehavior::Prompt,
            OverwriteBehavior::Resume,
        ] {
            assert_eq!(check_overwrite_permission(&path, behavior).unwrap(), 0);
        }
    }

    #[test]
    fn test_force_and_resume() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("part.mp4");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        assert_eq!(check_overwrite_permission(&path, OverwriteBehavior::Force).unwrap(), 0);
        assert_eq!(check_overwrite_permission(&path, OverwriteBehavior::Resume).unwrap(), 4096);
    }

    #[test]
    fn test_never_overwrite_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("done.mp4");
        std::fs::write(&path, b"data").unwrap();

        match check_overwrite_permission(&path, OverwriteBehavior::NeverOverwrite) {
            Err(Error::IoError(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::AlreadyExists);
                assert!(e.to_string().contains("use --force to overwrite"));
            }
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }
}
