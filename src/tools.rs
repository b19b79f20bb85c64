//! External pixel-readback tool invocation.
//!
//! The bulk memory-to-file pixel transfer is done by an out-of-process
//! `pixeldump` helper; the driver only computes the base addresses and
//! treats the result as an opaque byte buffer.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::dumper::PixelDumpArgs;
use crate::error::ChameleonError;

/// Runs the pixel-readback tool and returns the raw pixel bytes.
///
/// The tool is invoked as
/// `pixeldump OUTFILE WIDTH HEIGHT BPP -a BASE [-b BASE]`.
pub fn pixeldump(
    binary: &Path,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    args: &PixelDumpArgs,
) -> Result<Vec<u8>, ChameleonError> {
    let tool = binary.display().to_string();
    let out = tempfile::NamedTempFile::new().map_err(|e| ChameleonError::Tool {
        tool: tool.clone(),
        message: format!("temp file: {e}"),
    })?;

    let mut command = Command::new(binary);
    command
        .arg(out.path())
        .arg(width.to_string())
        .arg(height.to_string())
        .arg(bytes_per_pixel.to_string())
        .arg("-a")
        .arg(format!("{:#x}", args.base));
    if let Some(secondary) = args.secondary {
        command.arg("-b").arg(format!("{secondary:#x}"));
    }
    debug!("run {command:?}");

    let output = command.output().map_err(|e| ChameleonError::Tool {
        tool: tool.clone(),
        message: e.to_string(),
    })?;
    if !output.status.success() {
        return Err(ChameleonError::Tool {
            tool,
            message: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    std::fs::read(out.path()).map_err(|e| ChameleonError::Tool {
        tool,
        message: format!("read output: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn fake_tool(dir: &tempfile::TempDir, script: &str) -> std::path::PathBuf {
        let path = dir.path().join("pixeldump");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(script.as_bytes()).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn returns_tool_output_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(&dir, "#!/bin/sh\nprintf PIXELS > \"$1\"\n");
        let args = PixelDumpArgs {
            base: 0xc000_0000,
            secondary: None,
        };
        let bytes = pixeldump(&tool, 64, 64, 3, &args).unwrap();
        assert_eq!(bytes, b"PIXELS");
    }

    #[test]
    fn failure_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(&dir, "#!/bin/sh\necho boom >&2\nexit 3\n");
        let args = PixelDumpArgs {
            base: 0xc000_0000,
            secondary: Some(0xe000_0000),
        };
        match pixeldump(&tool, 64, 64, 3, &args) {
            Err(ChameleonError::Tool { message, .. }) => assert!(message.contains("boom")),
            other => panic!("expected tool failure, got {other:?}"),
        }
    }
}
