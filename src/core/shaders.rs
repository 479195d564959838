use crate::error::RenderError;

use std::path::Path;

use vulkanalia::prelude::v1_0::*;
use anyhow::{anyhow, Result};
use log::*;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Reads a compiled shader from disk. A missing file is fatal.
pub fn load_shader_bytes(path: &Path) -> Result<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => {
            debug!("Loaded shader {} ({} bytes).", path.display(), bytes.len());
            Ok(bytes)
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            Err(anyhow!(RenderError::ShaderMissing(path.to_path_buf())))
        },
        Err(error) => Err(anyhow!(error).context(format!("reading {}", path.display()))),
    }
}

/// Reinterprets SPIR-V bytes as little-endian words.
///
/// The byte buffer carries no alignment guarantee, so the words
/// are copied out rather than cast in place.
pub fn decode_spirv(path: &Path, bytes: &[u8]) -> Result<Vec<u32>> {
    let invalid = |reason| anyhow!(RenderError::InvalidShader { path: path.to_path_buf(), reason });

    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(invalid("length is not a multiple of 4"));
    }

    let words = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect::<Vec<_>>();

    if words[0] != SPIRV_MAGIC {
        return Err(invalid("bad magic number"));
    }

    Ok(words)
}

pub unsafe fn create_shader_module(
    device: &Device,
    code: &[u32],
) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::builder()
        .code_size(code.len() * 4)
        .code(code);

    Ok(device.create_shader_module(&info, None)?)
}

/// Loads, validates and uploads a shader in one step.
pub unsafe fn load_shader_module(device: &Device, path: &Path) -> Result<vk::ShaderModule> {
    let bytes = load_shader_bytes(path)?;
    let code = decode_spirv(path, &bytes)?;
    create_shader_module(device, &code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spirv(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn valid_module_decodes_to_words() {
        let bytes = spirv(&[SPIRV_MAGIC, 0x0001_0000, 7, 42, 0]);
        let words = decode_spirv(Path::new("a.spv"), &bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000, 7, 42, 0]);
    }

    #[test]
    fn unaligned_slices_still_decode() {
        let mut bytes = vec![0u8];
        bytes.extend(spirv(&[SPIRV_MAGIC, 1]));
        let words = decode_spirv(Path::new("a.spv"), &bytes[1..]).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 1]);
    }

    #[test]
    fn truncated_module_is_rejected() {
        let mut bytes = spirv(&[SPIRV_MAGIC, 1]);
        bytes.pop();
        let error = decode_spirv(Path::new("cut.spv"), &bytes).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<RenderError>(),
            Some(RenderError::InvalidShader { .. })
        ));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let bytes = spirv(&[0xdead_beef, 1]);
        assert!(decode_spirv(Path::new("x.spv"), &bytes).is_err());
        assert!(decode_spirv(Path::new("x.spv"), &[]).is_err());
    }

    #[test]
    fn missing_file_is_reported_as_missing_shader() {
        let path = std::env::temp_dir().join("evergreen-does-not-exist.vert.spv");
        let error = load_shader_bytes(&path).unwrap_err();
        match error.downcast_ref::<RenderError>() {
            Some(RenderError::ShaderMissing(missing)) => assert_eq!(missing, &path),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn existing_file_is_read() {
        let path = std::env::temp_dir().join(format!("evergreen-shader-{}.spv", std::process::id()));
        std::fs::write(&path, spirv(&[SPIRV_MAGIC])).unwrap();

        let bytes = load_shader_bytes(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(decode_spirv(&path, &bytes).unwrap(), vec![SPIRV_MAGIC]);
    }
}
