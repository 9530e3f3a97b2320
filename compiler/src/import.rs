//! Asset imports: loading files named by `import` values and handing them
//! to an [`AssetConverter`].

use crate::error::{KdlError, Location, ReasonCode};
use crate::registry::ValueType;
use kdl_format::ByteBufferMut;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Converts imported file contents from one asset format to another.
/// Format names are plain lowercase strings such as `png` or `tga`.
pub trait AssetConverter {
    fn convert(&self, source: &str, target: &str, inputs: &[Vec<u8>]) -> Result<Vec<u8>, String>;
}

/// Accepts only conversions between identical formats. Several inputs are
/// packed with [`pack`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughConverter;

impl AssetConverter for PassthroughConverter {
    fn convert(&self, source: &str, target: &str, inputs: &[Vec<u8>]) -> Result<Vec<u8>, String> {
        if !source.eq_ignore_ascii_case(target) {
            return Err(format!("no converter from \"{}\" to \"{}\"", source, target));
        }
        match inputs {
            [single] => Ok(single.clone()),
            _ => pack(inputs),
        }
    }
}

/// A `u16` count followed by `u32` length prefixed blobs.
pub fn pack(inputs: &[Vec<u8>]) -> Result<Vec<u8>, String> {
    let mut bb = ByteBufferMut::new();
    let count = u16::try_from(inputs.len()).map_err(|_| format!("{} files do not fit a u16 count", inputs.len()))?;
    bb.write_u16(count);
    for input in inputs {
        let len = u32::try_from(input.len()).map_err(|_| format!("{} bytes do not fit a u32 length", input.len()))?;
        bb.write_u32(len);
        bb.write_bytes(input);
    }
    Ok(bb.data())
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Loads `paths` (relative to `root`) for a value of `value_type` and
/// returns the bytes to store. Files already in the target format skip
/// conversion.
pub fn import_files(
    paths: &[(String, Location)],
    multi: bool,
    value_type: &ValueType,
    root: &Path,
    converter: &dyn AssetConverter,
    at: &Location,
) -> Result<Vec<u8>, KdlError> {
    if !value_type.accepts_import() {
        return Err(KdlError::compile(
            ReasonCode::ImportNotAllowed,
            format!("values of type {:?} cannot be imported", value_type),
            at,
        ));
    }
    if multi && !value_type.accepts_multi_import() {
        return Err(KdlError::compile(
            ReasonCode::ImportNotAllowed,
            format!("values of type {:?} cannot import several files", value_type),
            at,
        ));
    }

    let mut resolved: Vec<PathBuf> = Vec::new();
    let mut inputs = Vec::new();
    for (path, location) in paths {
        let full = root.join(path);
        let bytes = fs::read(&full).map_err(|e| {
            KdlError::compile(
                ReasonCode::ImportFailed,
                format!("cannot import \"{}\": {}", full.display(), e),
                location,
            )
        })?;
        debug!(path = %full.display(), bytes = bytes.len(), "imported file");
        resolved.push(full);
        inputs.push(bytes);
    }

    let unconverted = |inputs: &[Vec<u8>]| {
        if multi {
            pack(inputs).map_err(|e| KdlError::compile(ReasonCode::ValueOutOfRange, e, at))
        } else {
            Ok(inputs.concat())
        }
    };

    let hint = match value_type.import_hint() {
        Some(hint) => hint,
        None => return unconverted(&inputs),
    };

    let already_target = resolved
        .iter()
        .all(|p| extension(p).map_or(false, |e| e.eq_ignore_ascii_case(&hint.target)));
    if already_target {
        return unconverted(&inputs);
    }

    converter
        .convert(&hint.source, &hint.target, &inputs)
        .map_err(|e| KdlError::compile(ReasonCode::ConversionFailed, e, at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ImportHint;
    use kdl_format::ByteBuffer;
    use std::io::Write;

    fn hint(source: &str, target: &str) -> ImportHint {
        ImportHint {
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> (String, Location) {
        let mut file = fs::File::create(dir.join(name)).unwrap();
        file.write_all(bytes).unwrap();
        (name.to_string(), Location::builtin())
    }

    #[test]
    fn passthrough_packs_multiple_inputs() {
        let packed = PassthroughConverter
            .convert("tga", "tga", &[vec![1, 2], vec![3]])
            .unwrap();
        let mut bb = ByteBuffer::new(&packed);
        assert_eq!(bb.read_u16(), Ok(2));
        assert_eq!(bb.read_u32(), Ok(2));
        assert_eq!(bb.read_bytes(2), Ok(&[1u8, 2][..]));
        assert_eq!(bb.read_u32(), Ok(1));
        assert_eq!(bb.read_bytes(1), Ok(&[3u8][..]));
        assert!(PassthroughConverter.convert("png", "tga", &[vec![]]).is_err());
    }

    #[test]
    fn multi_import_always_packs() {
        let dir = tempfile::tempdir().unwrap();
        let one = write(dir.path(), "one.tga", &[5, 6, 7]);
        let value_type = ValueType::Files(hint("png", "tga"));

        let bytes = import_files(&[one.clone()], true, &value_type, dir.path(), &PassthroughConverter, &Location::builtin())
            .unwrap();
        assert_eq!(bytes, vec![0, 1, 0, 0, 0, 3, 5, 6, 7]);

        let bytes = import_files(&[one], false, &ValueType::Data, dir.path(), &PassthroughConverter, &Location::builtin())
            .unwrap();
        assert_eq!(bytes, vec![5, 6, 7]);
    }

    #[test]
    fn pack_rejects_too_many_inputs() {
        let inputs = vec![Vec::new(); u16::MAX as usize + 1];
        assert!(pack(&inputs).is_err());
        assert_eq!(pack(&[]), Ok(vec![0, 0]));
    }

    #[test]
    fn imports_raw_data_without_hint() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "main.lua", b"print(1)");
        let bytes = import_files(
            &[path],
            false,
            &ValueType::Data,
            dir.path(),
            &PassthroughConverter,
            &Location::builtin(),
        )
        .unwrap();
        assert_eq!(bytes, b"print(1)");
    }

    #[test]
    fn files_in_target_format_skip_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let tga = write(dir.path(), "logo.tga", &[9, 9]);
        let png = write(dir.path(), "logo.png", &[8]);
        let value_type = ValueType::File(Some(hint("png", "tga")));

        let bytes = import_files(&[tga], false, &value_type, dir.path(), &PassthroughConverter, &Location::builtin())
            .unwrap();
        assert_eq!(bytes, vec![9, 9]);

        let err = import_files(&[png], false, &value_type, dir.path(), &PassthroughConverter, &Location::builtin())
            .unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::ConversionFailed));
    }

    #[test]
    fn import_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ("missing.tga".to_string(), Location::builtin());
        let err = import_files(
            &[missing.clone()],
            false,
            &ValueType::Data,
            dir.path(),
            &PassthroughConverter,
            &Location::builtin(),
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::ImportFailed));

        let err = import_files(&[missing.clone()], false, &ValueType::Integer, dir.path(), &PassthroughConverter, &Location::builtin())
            .unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::ImportNotAllowed));

        let err = import_files(&[missing], true, &ValueType::Data, dir.path(), &PassthroughConverter, &Location::builtin())
            .unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::ImportNotAllowed));
    }
}
